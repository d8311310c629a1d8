//! Storage collaborator: projects, documents, and statements in SQLite.
//!
//! The analysis core consumes this module read-only through two queries:
//!
//! - [`statements_by_project`] — all statements for a project, ordered by
//!   `(filename ASC, position ASC)`, each carrying its decoded embedding
//!   and resolved source filename.
//! - [`documents_by_project`] — used by the visualization orchestrator to
//!   pre-load a filename lookup map.
//!
//! Document retrieval (`atlas get`, `GET /documents/:id`) reads through
//! [`document_by_id`] and [`statements_by_document`].
//!
//! Embedding vectors are stored as little-endian `f32` BLOBs; see
//! [`vec_to_blob`] / [`blob_to_vec`].

use anyhow::Result;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::{Document, Project, Statement};

/// Encode a float vector as a BLOB (little-endian f32 bytes).
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

// ============ Projects ============

/// Fetch a project by name, creating it if absent.
pub async fn get_or_create_project(pool: &SqlitePool, name: &str) -> Result<Project> {
    if let Some(p) = project_by_name(pool, name).await? {
        return Ok(p);
    }

    let project = Project {
        id: Uuid::new_v4().to_string(),
        name: name.to_string(),
        created_at: chrono::Utc::now().timestamp(),
    };

    sqlx::query("INSERT INTO projects (id, name, created_at) VALUES (?, ?, ?)")
        .bind(&project.id)
        .bind(&project.name)
        .bind(project.created_at)
        .execute(pool)
        .await?;

    Ok(project)
}

pub async fn project_by_name(pool: &SqlitePool, name: &str) -> Result<Option<Project>> {
    let row = sqlx::query("SELECT id, name, created_at FROM projects WHERE name = ?")
        .bind(name)
        .fetch_optional(pool)
        .await?;

    Ok(row.map(|r| Project {
        id: r.get("id"),
        name: r.get("name"),
        created_at: r.get("created_at"),
    }))
}

pub async fn project_by_id(pool: &SqlitePool, id: &str) -> Result<Option<Project>> {
    let row = sqlx::query("SELECT id, name, created_at FROM projects WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    Ok(row.map(|r| Project {
        id: r.get("id"),
        name: r.get("name"),
        created_at: r.get("created_at"),
    }))
}

// ============ Documents ============

/// Insert a document. The caller has already checked the dedup hash.
pub async fn insert_document(pool: &SqlitePool, document: &Document) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO documents (id, project_id, filename, content_hash, content, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&document.id)
    .bind(&document.project_id)
    .bind(&document.filename)
    .bind(&document.content_hash)
    .bind(&document.content)
    .bind(document.created_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Look up a document by its content hash within a project. Used for
/// upload deduplication: `(project_id, content_hash)` is unique.
pub async fn document_by_hash(
    pool: &SqlitePool,
    project_id: &str,
    content_hash: &str,
) -> Result<Option<Document>> {
    let row = sqlx::query(
        r#"
        SELECT id, project_id, filename, content_hash, content, created_at
        FROM documents
        WHERE project_id = ? AND content_hash = ?
        "#,
    )
    .bind(project_id)
    .bind(content_hash)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(row_to_document))
}

pub async fn document_by_id(pool: &SqlitePool, id: &str) -> Result<Option<Document>> {
    let row = sqlx::query(
        r#"
        SELECT id, project_id, filename, content_hash, content, created_at
        FROM documents
        WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(row_to_document))
}

pub async fn documents_by_project(pool: &SqlitePool, project_id: &str) -> Result<Vec<Document>> {
    let rows = sqlx::query(
        r#"
        SELECT id, project_id, filename, content_hash, content, created_at
        FROM documents
        WHERE project_id = ?
        ORDER BY filename ASC
        "#,
    )
    .bind(project_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(row_to_document).collect())
}

fn row_to_document(r: sqlx::sqlite::SqliteRow) -> Document {
    Document {
        id: r.get("id"),
        project_id: r.get("project_id"),
        filename: r.get("filename"),
        content_hash: r.get("content_hash"),
        content: r.get("content"),
        created_at: r.get("created_at"),
    }
}

// ============ Statements ============

/// Insert a batch of statements for a freshly created document.
pub async fn insert_statements(pool: &SqlitePool, statements: &[Statement]) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    for s in statements {
        sqlx::query(
            r#"
            INSERT INTO statements (id, document_id, text, position, line, embedding, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&s.id)
        .bind(&s.document_id)
        .bind(&s.text)
        .bind(s.position)
        .bind(s.line)
        .bind(vec_to_blob(&s.embedding))
        .bind(now)
        .execute(pool)
        .await?;
    }
    Ok(())
}

/// Write the embedding for a single statement.
pub async fn update_statement_embedding(
    pool: &SqlitePool,
    statement_id: &str,
    embedding: &[f32],
) -> Result<()> {
    sqlx::query("UPDATE statements SET embedding = ? WHERE id = ?")
        .bind(vec_to_blob(embedding))
        .bind(statement_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Load all statements for a project, ordered by `(filename ASC,
/// position ASC)`, with embeddings decoded and filenames resolved from the
/// owning document in the same query (no per-statement document fetch).
pub async fn statements_by_project(pool: &SqlitePool, project_id: &str) -> Result<Vec<Statement>> {
    let rows = sqlx::query(
        r#"
        SELECT s.id, s.document_id, s.text, s.position, s.line, s.embedding,
               d.filename
        FROM statements s
        JOIN documents d ON d.id = s.document_id
        WHERE d.project_id = ?
        ORDER BY d.filename ASC, s.position ASC
        "#,
    )
    .bind(project_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|r| {
            let blob: Vec<u8> = r.get("embedding");
            Statement {
                id: r.get("id"),
                document_id: r.get("document_id"),
                text: r.get("text"),
                position: r.get("position"),
                line: r.get("line"),
                embedding: blob_to_vec(&blob),
                file: r.get("filename"),
            }
        })
        .collect())
}

/// Load one document's statements in position order, with embeddings
/// decoded and the filename resolved.
pub async fn statements_by_document(
    pool: &SqlitePool,
    document_id: &str,
) -> Result<Vec<Statement>> {
    let rows = sqlx::query(
        r#"
        SELECT s.id, s.document_id, s.text, s.position, s.line, s.embedding,
               d.filename
        FROM statements s
        JOIN documents d ON d.id = s.document_id
        WHERE s.document_id = ?
        ORDER BY s.position ASC
        "#,
    )
    .bind(document_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|r| {
            let blob: Vec<u8> = r.get("embedding");
            Statement {
                id: r.get("id"),
                document_id: r.get("document_id"),
                text: r.get("text"),
                position: r.get("position"),
                line: r.get("line"),
                embedding: blob_to_vec(&blob),
                file: r.get("filename"),
            }
        })
        .collect())
}

/// Statements whose embedding has not been computed yet, across all
/// projects. Used by `atlas embed pending`.
pub async fn statements_pending_embedding(
    pool: &SqlitePool,
    limit: Option<usize>,
) -> Result<Vec<Statement>> {
    let limit_val = limit.unwrap_or(usize::MAX).min(i64::MAX as usize) as i64;

    let rows = sqlx::query(
        r#"
        SELECT s.id, s.document_id, s.text, s.position, s.line, s.embedding,
               d.filename
        FROM statements s
        JOIN documents d ON d.id = s.document_id
        WHERE length(s.embedding) = 0
        ORDER BY d.filename ASC, s.position ASC
        LIMIT ?
        "#,
    )
    .bind(limit_val)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|r| Statement {
            id: r.get("id"),
            document_id: r.get("document_id"),
            text: r.get("text"),
            position: r.get("position"),
            line: r.get("line"),
            embedding: Vec::new(),
            file: r.get("filename"),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        let blob = vec_to_blob(&vec);
        assert_eq!(blob.len(), vec.len() * 4);
        assert_eq!(blob_to_vec(&blob), vec);
    }

    #[test]
    fn test_empty_blob() {
        assert!(blob_to_vec(&[]).is_empty());
        assert!(vec_to_blob(&[]).is_empty());
    }

    async fn test_pool() -> SqlitePool {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::migrate::run_migrations(&pool).await.unwrap();
        pool
    }

    fn statement(document_id: &str, position: i64, text: &str) -> Statement {
        Statement {
            id: Uuid::new_v4().to_string(),
            document_id: document_id.to_string(),
            text: text.to_string(),
            position,
            line: position + 1,
            embedding: vec![position as f32, 1.0],
            file: String::new(),
        }
    }

    #[tokio::test]
    async fn test_statement_ordering_across_documents() {
        let pool = test_pool().await;
        let project = get_or_create_project(&pool, "p").await.unwrap();

        // Insert documents out of filename order
        for (filename, texts) in [("b.txt", vec!["b0", "b1"]), ("a.txt", vec!["a0"])] {
            let doc = Document {
                id: Uuid::new_v4().to_string(),
                project_id: project.id.clone(),
                filename: filename.to_string(),
                content_hash: format!("hash-{}", filename),
                content: texts.join("\n"),
                created_at: 0,
            };
            insert_document(&pool, &doc).await.unwrap();
            let statements: Vec<Statement> = texts
                .iter()
                .enumerate()
                .map(|(i, t)| statement(&doc.id, i as i64, t))
                .collect();
            insert_statements(&pool, &statements).await.unwrap();
        }

        let loaded = statements_by_project(&pool, &project.id).await.unwrap();
        let texts: Vec<&str> = loaded.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, vec!["a0", "b0", "b1"]);
        assert_eq!(loaded[0].file, "a.txt");
        assert_eq!(loaded[1].file, "b.txt");
        // Embeddings decode round-trip through the BLOB column
        assert_eq!(loaded[1].embedding, vec![0.0, 1.0]);
    }

    #[tokio::test]
    async fn test_statements_by_document_scoped_and_ordered() {
        let pool = test_pool().await;
        let project = get_or_create_project(&pool, "p").await.unwrap();

        let mut doc_ids = Vec::new();
        for filename in ["a.txt", "b.txt"] {
            let doc = Document {
                id: Uuid::new_v4().to_string(),
                project_id: project.id.clone(),
                filename: filename.to_string(),
                content_hash: format!("hash-{}", filename),
                content: String::new(),
                created_at: 0,
            };
            insert_document(&pool, &doc).await.unwrap();
            let statements: Vec<Statement> = (0..2)
                .map(|i| statement(&doc.id, i, &format!("{}-{}", filename, i)))
                .collect();
            insert_statements(&pool, &statements).await.unwrap();
            doc_ids.push(doc.id);
        }

        let loaded = statements_by_document(&pool, &doc_ids[1]).await.unwrap();
        let texts: Vec<&str> = loaded.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, vec!["b.txt-0", "b.txt-1"]);
        assert!(loaded.iter().all(|s| s.file == "b.txt"));
    }

    #[tokio::test]
    async fn test_document_dedup_by_hash() {
        let pool = test_pool().await;
        let project = get_or_create_project(&pool, "p").await.unwrap();

        let doc = Document {
            id: Uuid::new_v4().to_string(),
            project_id: project.id.clone(),
            filename: "a.txt".to_string(),
            content_hash: "abc".to_string(),
            content: "hello".to_string(),
            created_at: 0,
        };
        insert_document(&pool, &doc).await.unwrap();

        let found = document_by_hash(&pool, &project.id, "abc").await.unwrap();
        assert!(found.is_some());
        assert_eq!(found.unwrap().id, doc.id);

        let missing = document_by_hash(&pool, &project.id, "other").await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_pending_embedding_and_update() {
        let pool = test_pool().await;
        let project = get_or_create_project(&pool, "p").await.unwrap();
        let doc = Document {
            id: Uuid::new_v4().to_string(),
            project_id: project.id.clone(),
            filename: "a.txt".to_string(),
            content_hash: "abc".to_string(),
            content: "hello".to_string(),
            created_at: 0,
        };
        insert_document(&pool, &doc).await.unwrap();

        let mut s = statement(&doc.id, 0, "hello");
        s.embedding = Vec::new();
        insert_statements(&pool, std::slice::from_ref(&s)).await.unwrap();

        let pending = statements_pending_embedding(&pool, None).await.unwrap();
        assert_eq!(pending.len(), 1);

        update_statement_embedding(&pool, &s.id, &[0.5, 0.5])
            .await
            .unwrap();
        let pending = statements_pending_embedding(&pool, None).await.unwrap();
        assert!(pending.is_empty());

        let loaded = statements_by_project(&pool, &project.id).await.unwrap();
        assert_eq!(loaded[0].embedding, vec![0.5, 0.5]);
    }

    #[tokio::test]
    async fn test_get_or_create_project_idempotent() {
        let pool = test_pool().await;
        let a = get_or_create_project(&pool, "p").await.unwrap();
        let b = get_or_create_project(&pool, "p").await.unwrap();
        assert_eq!(a.id, b.id);
    }
}
