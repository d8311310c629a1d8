//! Document ingestion pipeline.
//!
//! Coordinates the full upload flow: read file → dedup by content hash →
//! extract statements → embed → store. Embedding is inline but non-fatal:
//! a failed embedding run leaves statements with empty vectors that
//! `atlas embed pending` can backfill later.
//!
//! # Deduplication
//!
//! Each document is identified by `(project, content_hash)` where the
//! hash is a SHA-256 digest of the content. Re-uploading identical
//! content into the same project is a no-op.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::path::Path;
use uuid::Uuid;

use crate::embedding::Embedder;
use crate::extract::extract_statements;
use crate::models::{Document, Statement};
use crate::store;

/// Counters reported after an ingest run.
#[derive(Debug, Default)]
pub struct IngestSummary {
    pub documents_added: usize,
    pub documents_skipped: usize,
    pub statements_added: usize,
    pub statements_embedded: usize,
    pub statements_pending: usize,
}

/// Ingest one file into a project.
///
/// Creates the project on demand. If a document with the same content
/// hash already exists in the project, nothing is written. When an
/// embedder is supplied, statements are embedded before storage; on
/// embedding failure they are stored with empty vectors and counted as
/// pending.
pub async fn ingest_file(
    pool: &SqlitePool,
    project_name: &str,
    path: &Path,
    embedder: Option<&dyn Embedder>,
) -> Result<IngestSummary> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read file: {}", path.display()))?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());

    ingest_content(pool, project_name, &filename, &content, embedder).await
}

/// Ingest raw content under a filename. See [`ingest_file`].
pub async fn ingest_content(
    pool: &SqlitePool,
    project_name: &str,
    filename: &str,
    content: &str,
    embedder: Option<&dyn Embedder>,
) -> Result<IngestSummary> {
    let mut summary = IngestSummary::default();

    let project = store::get_or_create_project(pool, project_name).await?;
    let content_hash = hash_content(content);

    if store::document_by_hash(pool, &project.id, &content_hash)
        .await?
        .is_some()
    {
        summary.documents_skipped = 1;
        return Ok(summary);
    }

    let document = Document {
        id: Uuid::new_v4().to_string(),
        project_id: project.id.clone(),
        filename: filename.to_string(),
        content_hash,
        content: content.to_string(),
        created_at: chrono::Utc::now().timestamp(),
    };

    let extracted = extract_statements(content);
    let texts: Vec<String> = extracted.iter().map(|s| s.text.clone()).collect();

    // Inline embedding, non-fatal on failure.
    let embeddings: Vec<Vec<f32>> = match embedder {
        Some(embedder) if !texts.is_empty() => match embedder.embed_many(&texts).await {
            Ok(vectors) => {
                summary.statements_embedded = vectors.len();
                vectors
            }
            Err(e) => {
                eprintln!("Warning: embedding failed, statements stored unembedded: {}", e);
                summary.statements_pending = texts.len();
                vec![Vec::new(); texts.len()]
            }
        },
        _ => {
            summary.statements_pending = texts.len();
            vec![Vec::new(); texts.len()]
        }
    };

    let statements: Vec<Statement> = extracted
        .into_iter()
        .zip(embeddings)
        .map(|(s, embedding)| Statement {
            id: Uuid::new_v4().to_string(),
            document_id: document.id.clone(),
            text: s.text,
            position: s.position,
            line: s.line,
            embedding,
            file: document.filename.clone(),
        })
        .collect();

    store::insert_document(pool, &document).await?;
    store::insert_statements(pool, &statements).await?;

    summary.documents_added = 1;
    summary.statements_added = statements.len();
    Ok(summary)
}

/// Embed statements whose vectors are still empty, in batches.
///
/// Per-batch failures are warned and skipped; the run continues.
pub async fn embed_pending(
    pool: &SqlitePool,
    embedder: &dyn Embedder,
    batch_size: usize,
    limit: Option<usize>,
) -> Result<(usize, usize)> {
    let pending = store::statements_pending_embedding(pool, limit).await?;
    if pending.is_empty() {
        return Ok((0, 0));
    }

    let batch_size = batch_size.max(1);
    let mut embedded = 0usize;
    let mut failed = 0usize;

    for batch in pending.chunks(batch_size) {
        let texts: Vec<String> = batch.iter().map(|s| s.text.clone()).collect();

        match embedder.embed_many(&texts).await {
            Ok(vectors) => {
                for (statement, vector) in batch.iter().zip(vectors.iter()) {
                    store::update_statement_embedding(pool, &statement.id, vector).await?;
                    embedded += 1;
                }
            }
            Err(e) => {
                eprintln!("Warning: embedding batch failed: {}", e);
                failed += batch.len();
            }
        }
    }

    Ok((embedded, failed))
}

fn hash_content(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::OfflineEmbedder;

    async fn test_pool() -> SqlitePool {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::migrate::run_migrations(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn test_ingest_extracts_and_embeds() {
        let pool = test_pool().await;
        let embedder = OfflineEmbedder::new(8);

        let content = "First statement.\n\nSecond statement.\n\n- third item";
        let summary = ingest_content(&pool, "proj", "notes.txt", content, Some(&embedder))
            .await
            .unwrap();

        assert_eq!(summary.documents_added, 1);
        assert_eq!(summary.statements_added, 3);
        assert_eq!(summary.statements_embedded, 3);
        assert_eq!(summary.statements_pending, 0);

        let project = store::project_by_name(&pool, "proj").await.unwrap().unwrap();
        let statements = store::statements_by_project(&pool, &project.id).await.unwrap();
        assert_eq!(statements.len(), 3);
        assert!(statements.iter().all(|s| s.embedding.len() == 8));
        assert_eq!(statements[0].file, "notes.txt");
    }

    #[tokio::test]
    async fn test_duplicate_content_skipped() {
        let pool = test_pool().await;
        let content = "Same content.";

        let first = ingest_content(&pool, "proj", "a.txt", content, None)
            .await
            .unwrap();
        assert_eq!(first.documents_added, 1);

        let second = ingest_content(&pool, "proj", "b.txt", content, None)
            .await
            .unwrap();
        assert_eq!(second.documents_added, 0);
        assert_eq!(second.documents_skipped, 1);

        // A different project accepts the same content
        let other = ingest_content(&pool, "other", "a.txt", content, None)
            .await
            .unwrap();
        assert_eq!(other.documents_added, 1);
    }

    #[tokio::test]
    async fn test_embed_pending_backfills() {
        let pool = test_pool().await;

        // Ingest without an embedder: everything pending
        let summary = ingest_content(&pool, "proj", "a.txt", "One.\n\nTwo.\n\nThree.", None)
            .await
            .unwrap();
        assert_eq!(summary.statements_pending, 3);

        let embedder = OfflineEmbedder::new(8);
        let (embedded, failed) = embed_pending(&pool, &embedder, 2, None).await.unwrap();
        assert_eq!(embedded, 3);
        assert_eq!(failed, 0);

        let project = store::project_by_name(&pool, "proj").await.unwrap().unwrap();
        let statements = store::statements_by_project(&pool, &project.id).await.unwrap();
        assert!(statements.iter().all(|s| s.has_embedding()));
    }

    #[test]
    fn test_hash_content_stable() {
        assert_eq!(hash_content("abc"), hash_content("abc"));
        assert_ne!(hash_content("abc"), hash_content("abd"));
        assert_eq!(hash_content("abc").len(), 64);
    }
}
