//! Document retrieval by ID.
//!
//! Fetches a full document and its extracted statements from the
//! database. Used by both the `atlas get` CLI command and the
//! `GET /documents/:id` HTTP endpoint.

use anyhow::{bail, Result};
use serde::Serialize;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;
use crate::store;

#[derive(Debug, Clone, Serialize)]
pub struct DocumentResponse {
    pub id: String,
    pub project_id: String,
    pub filename: String,
    pub content_hash: String,
    pub created_at: String, // ISO8601
    pub content: String,
    pub statements: Vec<StatementResponse>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatementResponse {
    pub position: i64,
    pub line: i64,
    pub text: String,
    pub embedded: bool,
}

/// Fetch a document and its statements. `None` when the ID is unknown.
pub async fn fetch_document(pool: &SqlitePool, id: &str) -> Result<Option<DocumentResponse>> {
    let Some(doc) = store::document_by_id(pool, id).await? else {
        return Ok(None);
    };

    let statements = store::statements_by_document(pool, id)
        .await?
        .into_iter()
        .map(|s| StatementResponse {
            position: s.position,
            line: s.line,
            embedded: s.has_embedding(),
            text: s.text,
        })
        .collect();

    Ok(Some(DocumentResponse {
        id: doc.id,
        project_id: doc.project_id,
        filename: doc.filename,
        content_hash: doc.content_hash,
        created_at: format_ts_iso(doc.created_at),
        content: doc.content,
        statements,
    }))
}

/// CLI entry point — fetches the document and prints it to stdout.
pub async fn run_get(config: &Config, id: &str) -> Result<()> {
    let pool = db::connect(config).await?;

    let doc = match fetch_document(&pool, id).await? {
        Some(d) => d,
        None => {
            pool.close().await;
            bail!("document not found: {}", id);
        }
    };

    println!("--- Document ---");
    println!("id:           {}", doc.id);
    println!("project_id:   {}", doc.project_id);
    println!("filename:     {}", doc.filename);
    println!("content_hash: {}", doc.content_hash);
    println!("created_at:   {}", doc.created_at);
    println!();

    println!("--- Content ---");
    println!("{}", doc.content);
    println!();

    println!("--- Statements ({}) ---", doc.statements.len());
    for s in &doc.statements {
        let marker = if s.embedded { "" } else { "  (not embedded)" };
        println!("[{}] line {}{}", s.position, s.line, marker);
        println!("{}", s.text);
        println!();
    }

    pool.close().await;
    Ok(())
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::OfflineEmbedder;
    use crate::ingest;

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
    async fn test_fetch_document_with_statements() {
        let pool = test_pool().await;
        let embedder = OfflineEmbedder::new(8);
        ingest::ingest_content(
            &pool,
            "proj",
            "notes.txt",
            "First statement.\n\nSecond statement.",
            Some(&embedder),
        )
        .await
        .unwrap();

        let project = store::project_by_name(&pool, "proj").await.unwrap().unwrap();
        let docs = store::documents_by_project(&pool, &project.id).await.unwrap();
        assert_eq!(docs.len(), 1);

        let doc = fetch_document(&pool, &docs[0].id).await.unwrap().unwrap();
        assert_eq!(doc.filename, "notes.txt");
        assert_eq!(doc.statements.len(), 2);
        assert_eq!(doc.statements[0].text, "First statement.");
        assert_eq!(doc.statements[0].position, 0);
        assert!(doc.statements.iter().all(|s| s.embedded));
        assert!(doc.created_at.ends_with('Z'));
    }

    #[tokio::test]
    async fn test_fetch_unknown_document() {
        let pool = test_pool().await;
        let missing = fetch_document(&pool, "no-such-id").await.unwrap();
        assert!(missing.is_none());
    }
}
