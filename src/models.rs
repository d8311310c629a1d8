//! Core data models used throughout doc-atlas.
//!
//! These types represent the projects, documents, and statements that flow
//! through the ingestion and analysis pipeline. The data lifecycle is:
//!
//! ```text
//! upload → Document → extract() → Statement → embed() → analysis views
//!                                                  ↓
//!                            clusters / similar pairs / anomalies / points
//! ```
//!
//! A **[`Project`]** owns documents; each **[`Document`]** owns the ordered
//! **[`Statement`]**s extracted from it. Statements are immutable after
//! creation: the text, position, and source line never change, and the
//! embedding is written once per (model, text). Everything derived from
//! them (cluster labels, similarity pairs, anomaly scores, projected
//! coordinates) is recomputed per request and never persisted.

use serde::Serialize;

/// An analysis project: the scoping unit for documents and statements.
#[derive(Debug, Clone, Serialize)]
pub struct Project {
    /// UUID v4 primary key.
    pub id: String,
    /// Human-readable unique name.
    pub name: String,
    /// Creation timestamp (Unix epoch seconds).
    pub created_at: i64,
}

/// An uploaded document, immutable after creation.
///
/// `(project_id, content_hash)` is unique: re-uploading identical content
/// into the same project is a no-op.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    /// UUID v4 primary key.
    pub id: String,
    /// Owning project.
    pub project_id: String,
    /// Original filename, used as the source label in analysis output.
    pub filename: String,
    /// SHA-256 hash of `content` for deduplication.
    pub content_hash: String,
    /// Full text content.
    pub content: String,
    /// Creation timestamp (Unix epoch seconds).
    pub created_at: i64,
}

/// A statement extracted from a document: the smallest unit of semantic
/// content, immutable after creation.
///
/// The embedding is either empty (not yet computed) or exactly the
/// dimensionality of the configured model.
#[derive(Debug, Clone)]
pub struct Statement {
    /// UUID v4 primary key.
    pub id: String,
    /// Owning document.
    pub document_id: String,
    /// Statement text.
    pub text: String,
    /// Zero-based ordinal within the document.
    pub position: i64,
    /// One-based source line where the statement starts.
    pub line: i64,
    /// Embedding vector; empty until computed.
    pub embedding: Vec<f32>,
    /// Source filename, resolved from the owning document at load time.
    pub file: String,
}

impl Statement {
    /// Whether the embedding has been computed.
    pub fn has_embedding(&self) -> bool {
        !self.embedding.is_empty()
    }
}
