//! Remote embedding client with batching and bounded concurrency.
//!
//! Defines the [`Embedder`] trait and the [`EmbedClient`] implementation
//! that calls an OpenAI-compatible `POST /embeddings` endpoint. Inputs are
//! partitioned into contiguous batches of at most `batch_size`; batches are
//! dispatched in parallel with at most `max_concurrent` in flight, and each
//! response vector is written back into its result slot by the per-batch
//! `index` field — completion order never leaks into output order.
//!
//! # Failure policy
//!
//! The first batch failure becomes the operation's error; batches already
//! in flight are allowed to finish but their results are discarded.
//! Cancellation is drop-based: dropping the future returned by
//! [`Embedder::embed_many`] aborts all in-flight batch requests.
//!
//! # Errors
//!
//! - [`EmbedError::Http`] — non-2xx status; the response body is surfaced.
//! - [`EmbedError::Transport`] — connection/IO failure or timeout.
//! - [`EmbedError::Parse`] — malformed or incomplete response JSON.
//! - [`EmbedError::Cancelled`] — the operation was cancelled.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::EmbeddingConfig;

pub const MODEL_TEXT_EMBEDDING_3_SMALL: &str = "openai/text-embedding-3-small";
pub const MODEL_TEXT_EMBEDDING_3_LARGE: &str = "openai/text-embedding-3-large";
pub const MODEL_TEXT_EMBEDDING_ADA_002: &str = "openai/text-embedding-ada-002";

pub const DEFAULT_MODEL: &str = MODEL_TEXT_EMBEDDING_3_SMALL;

/// Models accepted by [`embedding_dimension`], in catalogue order.
pub const SUPPORTED_MODELS: &[&str] = &[
    MODEL_TEXT_EMBEDDING_3_SMALL,
    MODEL_TEXT_EMBEDDING_3_LARGE,
    MODEL_TEXT_EMBEDDING_ADA_002,
];

/// Return the vector dimensionality for a catalogued model, or `None` for
/// an unknown model name.
pub fn embedding_dimension(model: &str) -> Option<usize> {
    match model {
        MODEL_TEXT_EMBEDDING_3_SMALL => Some(1536),
        MODEL_TEXT_EMBEDDING_3_LARGE => Some(3072),
        MODEL_TEXT_EMBEDDING_ADA_002 => Some(1536),
        _ => None,
    }
}

#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("embedding API error (status {status}): {body}")]
    Http { status: u16, body: String },
    #[error("embedding request failed: {0}")]
    Transport(String),
    #[error("malformed embedding response: {0}")]
    Parse(String),
    #[error("embedding request cancelled")]
    Cancelled,
}

// ============ Wire types ============

/// Request body for `POST {base_url}/embeddings`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingRequest {
    pub model: String,
    pub input: Vec<String>,
}

/// Response body: one `(index, embedding)` pair per input.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EmbeddingResponse {
    pub data: Vec<EmbeddingData>,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub usage: Usage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingData {
    pub index: usize,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

// ============ Embedder trait ============

/// Interface for embedding backends.
///
/// [`EmbedClient`] is the production implementation; the cache wrapper in
/// [`crate::cache`] and the test stubs implement it too.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier (e.g. `"openai/text-embedding-3-small"`).
    fn model_name(&self) -> &str;

    /// Embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;

    /// Embed a batch of texts. The result has the same length as the input
    /// and `result[i]` corresponds to `texts[i]`.
    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError>;

    /// Embed a single text.
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let results = self.embed_many(&[text.to_string()]).await?;
        results
            .into_iter()
            .next()
            .ok_or_else(|| EmbedError::Parse("empty embedding response".to_string()))
    }
}

// ============ HTTP client ============

/// Embedding client for an OpenAI-compatible embeddings API.
pub struct EmbedClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    dims: usize,
    batch_size: usize,
    max_concurrent: usize,
}

impl EmbedClient {
    /// Create a client from configuration. The API key is read from the
    /// environment variable named by `config.api_key_env`.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown model or a missing API key.
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let dims = embedding_dimension(&config.model).ok_or_else(|| {
            anyhow::anyhow!("Unknown embedding model: '{}'", config.model)
        })?;

        let api_key = config.api_key().ok_or_else(|| {
            anyhow::anyhow!(
                "{} environment variable not set (required for embeddings)",
                config.api_key_env
            )
        })?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            dims,
            batch_size: config.batch_size.max(1),
            max_concurrent: config.max_concurrent.max(1),
        })
    }
}

#[async_trait]
impl Embedder for EmbedClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut results: Vec<Vec<f32>> = vec![Vec::new(); texts.len()];
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut join_set = JoinSet::new();

        let mut offset = 0;
        for batch in texts.chunks(self.batch_size) {
            let start = offset;
            offset += batch.len();

            let semaphore = semaphore.clone();
            let http = self.http.clone();
            let url = format!("{}/embeddings", self.base_url);
            let api_key = self.api_key.clone();
            let model = self.model.clone();
            let batch: Vec<String> = batch.to_vec();

            join_set.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return (start, Err(EmbedError::Cancelled)),
                };

                let out = embed_batch(&http, &url, &api_key, &model, &batch).await;
                (start, out)
            });
        }

        // First error wins; remaining batches drain before we return.
        let mut first_err: Option<EmbedError> = None;
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((start, Ok(vectors))) => {
                    for (i, v) in vectors.into_iter().enumerate() {
                        results[start + i] = v;
                    }
                }
                Ok((_, Err(e))) => {
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                }
                Err(e) if e.is_cancelled() => {
                    if first_err.is_none() {
                        first_err = Some(EmbedError::Cancelled);
                    }
                }
                Err(e) => {
                    if first_err.is_none() {
                        first_err = Some(EmbedError::Transport(format!("join error: {e}")));
                    }
                }
            }
        }

        if let Some(e) = first_err {
            return Err(e);
        }

        for v in &results {
            if v.len() != self.dims {
                return Err(EmbedError::Parse(format!(
                    "expected {}-dimensional vectors, got {}",
                    self.dims,
                    v.len()
                )));
            }
        }

        Ok(results)
    }
}

/// One HTTPS POST for one batch.
async fn embed_batch(
    http: &reqwest::Client,
    url: &str,
    api_key: &str,
    model: &str,
    batch: &[String],
) -> Result<Vec<Vec<f32>>, EmbedError> {
    let req = EmbeddingRequest {
        model: model.to_string(),
        input: batch.to_vec(),
    };

    let resp = http
        .post(url)
        .header("Authorization", format!("Bearer {}", api_key))
        .header("Content-Type", "application/json")
        .json(&req)
        .send()
        .await
        .map_err(|e| EmbedError::Transport(e.to_string()))?;

    let status = resp.status();
    let body = resp
        .text()
        .await
        .map_err(|e| EmbedError::Transport(e.to_string()))?;

    if !status.is_success() {
        return Err(EmbedError::Http {
            status: status.as_u16(),
            body,
        });
    }

    let parsed: EmbeddingResponse =
        serde_json::from_str(&body).map_err(|e| EmbedError::Parse(e.to_string()))?;

    assign_by_index(parsed.data, batch.len())
}

/// Write response vectors into slots by their `index` field. The API does
/// not guarantee response order matches input order.
fn assign_by_index(
    data: Vec<EmbeddingData>,
    batch_len: usize,
) -> Result<Vec<Vec<f32>>, EmbedError> {
    let mut out = vec![Vec::new(); batch_len];
    for item in data {
        if item.index >= batch_len {
            return Err(EmbedError::Parse(format!(
                "response index {} out of range for batch of {}",
                item.index, batch_len
            )));
        }
        out[item.index] = item.embedding;
    }

    if out.iter().any(|v| v.is_empty()) {
        return Err(EmbedError::Parse(
            "response is missing vectors for some inputs".to_string(),
        ));
    }

    Ok(out)
}

// ============ Offline embedder ============

/// Deterministic offline embedder: maps each text to a fixed unit vector
/// derived from its SHA-256 digest. No network calls.
///
/// Used by tests and local smoke runs where a real embedding backend is
/// unavailable. Distinct texts map to (near-)orthogonal directions, which
/// is enough for the analysis engines to produce stable output.
#[derive(Debug, Clone)]
pub struct OfflineEmbedder {
    dims: usize,
}

impl OfflineEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }
}

#[async_trait]
impl Embedder for OfflineEmbedder {
    fn model_name(&self) -> &str {
        "offline/sha256"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }
}

impl OfflineEmbedder {
    fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut v = Vec::with_capacity(self.dims);
        let mut counter: u64 = 0;
        while v.len() < self.dims {
            let mut hasher = Sha256::new();
            hasher.update(text.as_bytes());
            hasher.update(counter.to_le_bytes());
            for byte in hasher.finalize() {
                if v.len() == self.dims {
                    break;
                }
                v.push(byte as f32 / 255.0 - 0.5);
            }
            counter += 1;
        }

        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_catalogue() {
        assert_eq!(embedding_dimension(MODEL_TEXT_EMBEDDING_3_SMALL), Some(1536));
        assert_eq!(embedding_dimension(MODEL_TEXT_EMBEDDING_3_LARGE), Some(3072));
        assert_eq!(embedding_dimension(MODEL_TEXT_EMBEDDING_ADA_002), Some(1536));
        assert_eq!(embedding_dimension("acme/unknown"), None);
    }

    #[test]
    fn test_request_roundtrip() {
        let req = EmbeddingRequest {
            model: DEFAULT_MODEL.to_string(),
            input: vec!["alpha".to_string(), "beta".to_string()],
        };
        let json = serde_json::to_string(&req).unwrap();
        let back: EmbeddingRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(req, back);
    }

    #[test]
    fn test_response_parse() {
        let body = r#"{
            "data": [
                {"index": 1, "embedding": [0.5, 0.5]},
                {"index": 0, "embedding": [1.0, 0.0]}
            ],
            "model": "openai/text-embedding-3-small",
            "usage": {"prompt_tokens": 4, "total_tokens": 4}
        }"#;
        let parsed: EmbeddingResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.data.len(), 2);
        assert_eq!(parsed.usage.total_tokens, 4);
    }

    #[test]
    fn test_assign_by_index_ignores_response_order() {
        let data = vec![
            EmbeddingData {
                index: 2,
                embedding: vec![3.0],
            },
            EmbeddingData {
                index: 0,
                embedding: vec![1.0],
            },
            EmbeddingData {
                index: 1,
                embedding: vec![2.0],
            },
        ];
        let out = assign_by_index(data, 3).unwrap();
        assert_eq!(out, vec![vec![1.0], vec![2.0], vec![3.0]]);
    }

    #[test]
    fn test_assign_by_index_missing_slot() {
        let data = vec![EmbeddingData {
            index: 0,
            embedding: vec![1.0],
        }];
        assert!(matches!(
            assign_by_index(data, 2),
            Err(EmbedError::Parse(_))
        ));
    }

    #[test]
    fn test_assign_by_index_out_of_range() {
        let data = vec![EmbeddingData {
            index: 5,
            embedding: vec![1.0],
        }];
        assert!(matches!(
            assign_by_index(data, 2),
            Err(EmbedError::Parse(_))
        ));
    }

    #[tokio::test]
    async fn test_offline_embedder_deterministic() {
        let e = OfflineEmbedder::new(32);
        let a = e.embed_one("hello").await.unwrap();
        let b = e.embed_one("hello").await.unwrap();
        let c = e.embed_one("world").await.unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 32);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_offline_embedder_aligned_output() {
        let e = OfflineEmbedder::new(8);
        let texts: Vec<String> = (0..5).map(|i| format!("text {}", i)).collect();
        let out = e.embed_many(&texts).await.unwrap();
        assert_eq!(out.len(), texts.len());
        for (i, t) in texts.iter().enumerate() {
            assert_eq!(out[i], e.embed_one(t).await.unwrap());
        }
    }
}
