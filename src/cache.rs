//! Embedding cache keyed by (model, text).
//!
//! The cache is advisory: a read failure is treated as "nothing cached"
//! and a write failure is dropped. It can never serve a vector of the
//! wrong dimensionality because the key hashes the model name together
//! with the text and the SQLite backend checks the stored dims on read.
//!
//! Implementations:
//! - [`MemoryCache`] — in-process map behind an async RwLock.
//! - [`SqliteCache`] — persistent, shared with the main database.
//! - [`NoOpCache`] — caches nothing; useful for tests and one-shot runs.
//!
//! [`CachedEmbedder`] wraps any [`Embedder`] and consults the cache in
//! bulk before dispatching only the uncached subset, preserving input
//! order in the combined result.

use anyhow::Result;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::embedding::{EmbedError, Embedder};
use crate::store::{blob_to_vec, vec_to_blob};

/// Cache key for a (model, text) pair: first 16 hex chars of
/// `sha256(model ":" text)`.
pub fn cache_key(model: &str, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(model.as_bytes());
    hasher.update(b":");
    hasher.update(text.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..16].to_string()
}

/// Interface for embedding caches. Bulk operations only: the caller
/// always works in batches.
#[async_trait]
pub trait EmbeddingCache: Send + Sync {
    /// Fetch cached vectors for the given keys. Missing keys are simply
    /// absent from the returned map.
    async fn get_multi(&self, keys: &[String]) -> Result<HashMap<String, Vec<f32>>>;

    /// Store vectors under the given keys.
    async fn set_multi(&self, entries: &HashMap<String, Vec<f32>>) -> Result<()>;
}

// ============ In-memory cache ============

/// In-process cache backed by a HashMap.
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, Vec<f32>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EmbeddingCache for MemoryCache {
    async fn get_multi(&self, keys: &[String]) -> Result<HashMap<String, Vec<f32>>> {
        let entries = self.entries.read().await;
        let mut found = HashMap::new();
        for key in keys {
            if let Some(v) = entries.get(key) {
                found.insert(key.clone(), v.clone());
            }
        }
        Ok(found)
    }

    async fn set_multi(&self, new_entries: &HashMap<String, Vec<f32>>) -> Result<()> {
        let mut entries = self.entries.write().await;
        for (k, v) in new_entries {
            entries.insert(k.clone(), v.clone());
        }
        Ok(())
    }
}

// ============ SQLite cache ============

/// Persistent cache stored in the `embedding_cache` table of the main
/// database. Entries are namespaced by model and validated against the
/// expected dimensionality on read.
pub struct SqliteCache {
    pool: SqlitePool,
    model: String,
    dims: usize,
}

impl SqliteCache {
    pub fn new(pool: SqlitePool, model: impl Into<String>, dims: usize) -> Self {
        Self {
            pool,
            model: model.into(),
            dims,
        }
    }
}

#[async_trait]
impl EmbeddingCache for SqliteCache {
    async fn get_multi(&self, keys: &[String]) -> Result<HashMap<String, Vec<f32>>> {
        let mut found = HashMap::new();
        for key in keys {
            let row = sqlx::query(
                "SELECT embedding, dims FROM embedding_cache WHERE key = ? AND model = ?",
            )
            .bind(key)
            .bind(&self.model)
            .fetch_optional(&self.pool)
            .await?;

            if let Some(row) = row {
                let dims: i64 = row.get("dims");
                if dims as usize != self.dims {
                    // Stale entry from a different model configuration.
                    continue;
                }
                let blob: Vec<u8> = row.get("embedding");
                let vector = blob_to_vec(&blob);
                if vector.len() == self.dims {
                    found.insert(key.clone(), vector);
                }
            }
        }
        Ok(found)
    }

    async fn set_multi(&self, entries: &HashMap<String, Vec<f32>>) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        for (key, vector) in entries {
            sqlx::query(
                r#"
                INSERT INTO embedding_cache (key, model, dims, embedding, created_at)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(key) DO UPDATE SET
                    model = excluded.model,
                    dims = excluded.dims,
                    embedding = excluded.embedding,
                    created_at = excluded.created_at
                "#,
            )
            .bind(key)
            .bind(&self.model)
            .bind(vector.len() as i64)
            .bind(vec_to_blob(vector))
            .bind(now)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }
}

// ============ No-op cache ============

/// A cache that stores nothing and finds nothing.
pub struct NoOpCache;

#[async_trait]
impl EmbeddingCache for NoOpCache {
    async fn get_multi(&self, _keys: &[String]) -> Result<HashMap<String, Vec<f32>>> {
        Ok(HashMap::new())
    }

    async fn set_multi(&self, _entries: &HashMap<String, Vec<f32>>) -> Result<()> {
        Ok(())
    }
}

// ============ Caching wrapper ============

/// Wraps an [`Embedder`] with an [`EmbeddingCache`].
///
/// `embed_many` consults the cache in bulk, embeds only the uncached
/// subset (in input order), writes the fresh vectors back best-effort,
/// and returns the combined result aligned with the input.
pub struct CachedEmbedder<E, C> {
    inner: E,
    cache: C,
}

impl<E: Embedder, C: EmbeddingCache> CachedEmbedder<E, C> {
    pub fn new(inner: E, cache: C) -> Self {
        Self { inner, cache }
    }
}

#[async_trait]
impl<E: Embedder, C: EmbeddingCache> Embedder for CachedEmbedder<E, C> {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn dims(&self) -> usize {
        self.inner.dims()
    }

    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = texts
            .iter()
            .map(|t| cache_key(self.inner.model_name(), t))
            .collect();

        // A failed read degrades to "nothing cached".
        let cached = self.cache.get_multi(&keys).await.unwrap_or_default();

        let mut uncached_texts = Vec::new();
        let mut uncached_indices = Vec::new();
        for (i, key) in keys.iter().enumerate() {
            if !cached.contains_key(key) {
                uncached_texts.push(texts[i].clone());
                uncached_indices.push(i);
            }
        }

        let mut fresh: Vec<Vec<f32>> = Vec::new();
        if !uncached_texts.is_empty() {
            fresh = self.inner.embed_many(&uncached_texts).await?;

            let mut to_store = HashMap::with_capacity(fresh.len());
            for (j, &i) in uncached_indices.iter().enumerate() {
                to_store.insert(keys[i].clone(), fresh[j].clone());
            }
            // Write failures are dropped.
            let _ = self.cache.set_multi(&to_store).await;
        }

        let mut results = vec![Vec::new(); texts.len()];
        let mut next_fresh = 0;
        for (i, key) in keys.iter().enumerate() {
            if let Some(v) = cached.get(key) {
                results[i] = v.clone();
            } else {
                results[i] = fresh[next_fresh].clone();
                next_fresh += 1;
            }
        }

        Ok(results)
    }
}
