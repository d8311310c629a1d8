//! Contradiction detection between similar statement pairs.
//!
//! Candidate pairs come from the similarity engine; this module filters
//! them to the most promising subset and dispatches each retained pair to
//! an external pairwise classifier with bounded concurrency. Per-pair
//! classifier failures are swallowed (counted, never fatal) — the result
//! is best-effort enrichment of the similarity view.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::ContradictionConfig;

#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("classifier API error (status {status}): {body}")]
    Http { status: u16, body: String },
    #[error("classifier request failed: {0}")]
    Transport(String),
    #[error("malformed classifier response: {0}")]
    Parse(String),
    #[error("classifier not configured")]
    NotConfigured,
}

/// Kind of contradiction reported by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContradictionType {
    Direct,
    Numerical,
    Temporal,
    Implicit,
}

impl ContradictionType {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "direct" => Some(Self::Direct),
            "numerical" => Some(Self::Numerical),
            "temporal" => Some(Self::Temporal),
            "implicit" => Some(Self::Implicit),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    High,
    Medium,
    Low,
}

impl Severity {
    fn parse(s: &str) -> Self {
        match s {
            "high" => Self::High,
            "medium" => Self::Medium,
            _ => Self::Low,
        }
    }

    fn rank(self) -> u8 {
        match self {
            Self::High => 3,
            Self::Medium => 2,
            Self::Low => 1,
        }
    }
}

/// Two statements to analyze, with the similarity that nominated them.
#[derive(Debug, Clone)]
pub struct StatementPair {
    pub statement1: String,
    pub statement2: String,
    pub statement1_id: String,
    pub statement2_id: String,
    pub file1: String,
    pub file2: String,
    pub similarity: f64,
}

/// A positive classifier verdict.
#[derive(Debug, Clone)]
pub struct Verdict {
    pub contradiction_type: ContradictionType,
    pub severity: Severity,
    pub explanation: String,
    pub confidence: f64,
}

/// A detected contradiction, ready for the API response.
#[derive(Debug, Clone, Serialize)]
pub struct ContradictionResult {
    pub statement1: String,
    pub statement2: String,
    pub statement1_id: String,
    pub statement2_id: String,
    pub file1: String,
    pub file2: String,
    #[serde(rename = "type")]
    pub contradiction_type: ContradictionType,
    pub severity: Severity,
    pub explanation: String,
    pub confidence: f64,
}

/// Outcome of one detection run. `failed` counts pairs whose classifier
/// call errored and was skipped.
#[derive(Debug, Default)]
pub struct ContradictionOutcome {
    pub results: Vec<ContradictionResult>,
    pub analyzed: usize,
    pub failed: usize,
}

/// Pairwise classifier interface. The production implementation is
/// [`ClassifierClient`]; tests use stubs.
#[async_trait]
pub trait PairClassifier: Send + Sync {
    /// Classify one pair. `Ok(None)` is a negative verdict.
    async fn classify(&self, pair: &StatementPair) -> Result<Option<Verdict>, ClassifyError>;
}

// ============ HTTP classifier ============

/// Classifier backed by an Anthropic-messages-style API.
pub struct ClassifierClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl ClassifierClient {
    /// Create a classifier from configuration. The API key is read from
    /// the environment variable named by `config.api_key_env`.
    pub fn new(config: &ContradictionConfig) -> Result<Self, ClassifyError> {
        let api_key = config.api_key().ok_or(ClassifyError::NotConfigured)?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ClassifyError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
        })
    }
}

#[derive(Serialize)]
struct ClassifierRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<ClassifierMessage>,
}

#[derive(Serialize)]
struct ClassifierMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ClassifierResponse {
    content: Vec<ClassifierContent>,
}

#[derive(Deserialize)]
struct ClassifierContent {
    text: String,
}

/// Raw verdict JSON emitted by the classifier.
#[derive(Deserialize)]
struct VerdictJson {
    is_contradiction: bool,
    #[serde(default)]
    r#type: String,
    #[serde(default)]
    severity: String,
    #[serde(default)]
    explanation: String,
    #[serde(default)]
    confidence: f64,
}

fn build_prompt(pair: &StatementPair) -> String {
    format!(
        r#"Analyze these two statements for contradictions:

Statement 1: "{}"
Statement 2: "{}"

Determine if they contradict each other. If yes, respond with JSON:
{{
  "is_contradiction": true,
  "type": "direct|numerical|temporal|implicit",
  "severity": "high|medium|low",
  "explanation": "brief explanation",
  "confidence": 0.0-1.0
}}

If no contradiction, respond:
{{"is_contradiction": false}}

Respond ONLY with valid JSON."#,
        pair.statement1, pair.statement2
    )
}

/// Parse the classifier's verdict text. A negative verdict, or a positive
/// verdict with an unrecognized type, yields `None`.
fn parse_verdict(text: &str) -> Result<Option<Verdict>, ClassifyError> {
    let raw: VerdictJson =
        serde_json::from_str(text).map_err(|e| ClassifyError::Parse(e.to_string()))?;

    if !raw.is_contradiction {
        return Ok(None);
    }

    let Some(contradiction_type) = ContradictionType::parse(&raw.r#type) else {
        return Ok(None);
    };

    Ok(Some(Verdict {
        contradiction_type,
        severity: Severity::parse(&raw.severity),
        explanation: raw.explanation,
        confidence: raw.confidence,
    }))
}

#[async_trait]
impl PairClassifier for ClassifierClient {
    async fn classify(&self, pair: &StatementPair) -> Result<Option<Verdict>, ClassifyError> {
        let request = ClassifierRequest {
            model: self.model.clone(),
            max_tokens: 500,
            messages: vec![ClassifierMessage {
                role: "user".to_string(),
                content: build_prompt(pair),
            }],
        };

        let resp = self
            .http
            .post(format!("{}/messages", self.base_url))
            .header("Content-Type", "application/json")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&request)
            .send()
            .await
            .map_err(|e| ClassifyError::Transport(e.to_string()))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| ClassifyError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(ClassifyError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ClassifierResponse =
            serde_json::from_str(&body).map_err(|e| ClassifyError::Parse(e.to_string()))?;
        let text = parsed
            .content
            .first()
            .map(|c| c.text.as_str())
            .ok_or_else(|| ClassifyError::Parse("empty response".to_string()))?;

        parse_verdict(text)
    }
}

// ============ Driver ============

/// Filters candidate pairs and drives the classifier over the survivors.
pub struct ContradictionService {
    classifier: Arc<dyn PairClassifier>,
    max_pairs_to_analyze: usize,
    min_similarity: f64,
    max_concurrent: usize,
}

impl ContradictionService {
    pub fn new(
        classifier: Arc<dyn PairClassifier>,
        max_pairs_to_analyze: usize,
        min_similarity: f64,
        max_concurrent: usize,
    ) -> Self {
        Self {
            classifier,
            max_pairs_to_analyze: if max_pairs_to_analyze == 0 {
                100
            } else {
                max_pairs_to_analyze
            },
            min_similarity: if min_similarity <= 0.0 {
                0.5
            } else {
                min_similarity
            },
            max_concurrent: if max_concurrent == 0 { 5 } else { max_concurrent },
        }
    }

    /// Analyze candidate pairs: filter by similarity, keep the top
    /// `max_pairs_to_analyze` by similarity, classify with bounded
    /// concurrency, and return positive verdicts sorted by severity then
    /// confidence.
    pub async fn detect_contradictions(
        &self,
        pairs: Vec<StatementPair>,
    ) -> ContradictionOutcome {
        let mut filtered: Vec<StatementPair> = pairs
            .into_iter()
            .filter(|p| p.similarity >= self.min_similarity)
            .collect();

        if filtered.len() > self.max_pairs_to_analyze {
            filtered.sort_by(|a, b| {
                b.similarity
                    .partial_cmp(&a.similarity)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            filtered.truncate(self.max_pairs_to_analyze);
        }

        let analyzed = filtered.len();
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut join_set = JoinSet::new();

        for pair in filtered {
            let classifier = self.classifier.clone();
            let semaphore = semaphore.clone();

            join_set.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return Err(ClassifyError::Transport("cancelled".to_string())),
                };

                let verdict = classifier.classify(&pair).await?;
                Ok(verdict.map(|v| ContradictionResult {
                    statement1: pair.statement1,
                    statement2: pair.statement2,
                    statement1_id: pair.statement1_id,
                    statement2_id: pair.statement2_id,
                    file1: pair.file1,
                    file2: pair.file2,
                    contradiction_type: v.contradiction_type,
                    severity: v.severity,
                    explanation: v.explanation,
                    confidence: v.confidence,
                }))
            });
        }

        let mut results = Vec::new();
        let mut failed = 0usize;
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(Ok(Some(result))) => results.push(result),
                Ok(Ok(None)) => {}
                Ok(Err(_)) | Err(_) => failed += 1,
            }
        }

        results.sort_by(|a, b| {
            b.severity
                .rank()
                .cmp(&a.severity.rank())
                .then(
                    b.confidence
                        .partial_cmp(&a.confidence)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
        });

        ContradictionOutcome {
            results,
            analyzed,
            failed,
        }
    }
}
