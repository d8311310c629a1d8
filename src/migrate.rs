//! Database schema migrations.
//!
//! Creates all required tables and ensures idempotent execution.
//! Designed to be run via `atlas init`.
//!
//! # Schema
//!
//! ```text
//! ┌──────────────┐     ┌────────────────┐     ┌──────────────────┐
//! │  projects    │──┐  │   documents    │──┐  │   statements     │
//! │              │  │  │                │  │  │                  │
//! │ id (PK)      │  │  │ id (PK)        │  │  │ id (PK)          │
//! │ name         │  └──│ project_id     │  └──│ document_id      │
//! │ created_at   │     │ filename       │     │ text             │
//! └──────────────┘     │ content_hash   │     │ position         │
//!                      │ content        │     │ line             │
//! ┌────────────────┐   │ created_at     │     │ embedding (BLOB) │
//! │embedding_cache │   └────────────────┘     │ created_at       │
//! │                │                          └──────────────────┘
//! │ key (PK)       │
//! │ model          │
//! │ dims           │
//! │ embedding      │
//! │ created_at     │
//! └────────────────┘
//! ```
//!
//! # Tables
//!
//! | Table | Purpose |
//! |-------|---------|
//! | `projects` | Analysis projects (the scoping unit) |
//! | `documents` | Uploaded documents with content hashes |
//! | `statements` | Extracted statements with embedding BLOBs |
//! | `embedding_cache` | Cached embedding vectors keyed by (model, text) hash |
//!
//! # Idempotency
//!
//! All operations use `CREATE TABLE IF NOT EXISTS`. Running `atlas init`
//! multiple times is safe.

use anyhow::Result;
use sqlx::SqlitePool;

/// Run all database migrations.
///
/// Creates all tables and indexes required by doc-atlas. Safe to call
/// multiple times — all operations are idempotent.
///
/// # Errors
///
/// Returns an error if any SQL statement cannot be executed.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS projects (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL,
            filename TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            content TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE(project_id, content_hash),
            FOREIGN KEY (project_id) REFERENCES projects(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS statements (
            id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            text TEXT NOT NULL,
            position INTEGER NOT NULL,
            line INTEGER NOT NULL,
            embedding BLOB NOT NULL DEFAULT x'',
            created_at INTEGER NOT NULL,
            UNIQUE(document_id, position),
            FOREIGN KEY (document_id) REFERENCES documents(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS embedding_cache (
            key TEXT PRIMARY KEY,
            model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            embedding BLOB NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Indexes for common query patterns
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_project_id ON documents(project_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_statements_document_id ON statements(document_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_embedding_cache_model ON embedding_cache(model)")
        .execute(pool)
        .await?;

    Ok(())
}
