use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub clustering: ClusteringConfig,
    #[serde(default)]
    pub similarity: SimilarityConfig,
    #[serde(default)]
    pub anomaly: AnomalyConfig,
    #[serde(default)]
    pub contradiction: ContradictionConfig,
    #[serde(default)]
    pub visualization: VisualizationConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Environment variable holding the API key (never stored in the file).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            batch_size: default_batch_size(),
            max_concurrent: default_max_concurrent(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    /// Read the API key from the configured environment variable.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.is_empty())
    }
}

fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}
fn default_model() -> String {
    crate::embedding::DEFAULT_MODEL.to_string()
}
fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".to_string()
}
fn default_batch_size() -> usize {
    100
}
fn default_max_concurrent() -> usize {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClusteringConfig {
    #[serde(default = "default_k")]
    pub default_k: usize,
    #[serde(default = "default_keywords_per_cluster")]
    pub keywords_per_cluster: usize,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            default_k: default_k(),
            keywords_per_cluster: default_keywords_per_cluster(),
        }
    }
}

fn default_k() -> usize {
    5
}
fn default_keywords_per_cluster() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct SimilarityConfig {
    #[serde(default = "default_similarity_threshold")]
    pub threshold: f64,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            threshold: default_similarity_threshold(),
        }
    }
}

fn default_similarity_threshold() -> f64 {
    0.75
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnomalyConfig {
    /// Detector kind: `distance`, `isolation`, or `ensemble`.
    #[serde(default = "default_detector")]
    pub detector: String,
    #[serde(default = "default_neighbors")]
    pub k: usize,
    #[serde(default = "default_num_trees")]
    pub num_trees: usize,
    #[serde(default = "default_sample_size")]
    pub sample_size: usize,
    #[serde(default = "default_anomaly_threshold")]
    pub threshold: f64,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            detector: default_detector(),
            k: default_neighbors(),
            num_trees: default_num_trees(),
            sample_size: default_sample_size(),
            threshold: default_anomaly_threshold(),
        }
    }
}

fn default_detector() -> String {
    "ensemble".to_string()
}
fn default_neighbors() -> usize {
    5
}
fn default_num_trees() -> usize {
    100
}
fn default_sample_size() -> usize {
    256
}
fn default_anomaly_threshold() -> f64 {
    0.7
}

#[derive(Debug, Deserialize, Clone)]
pub struct ContradictionConfig {
    #[serde(default = "default_classifier_base_url")]
    pub base_url: String,
    #[serde(default = "default_classifier_model")]
    pub model: String,
    #[serde(default = "default_classifier_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_max_pairs")]
    pub max_pairs_to_analyze: usize,
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f64,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ContradictionConfig {
    fn default() -> Self {
        Self {
            base_url: default_classifier_base_url(),
            model: default_classifier_model(),
            api_key_env: default_classifier_key_env(),
            max_pairs_to_analyze: default_max_pairs(),
            min_similarity: default_min_similarity(),
            max_concurrent: default_max_concurrent(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl ContradictionConfig {
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.is_empty())
    }
}

fn default_classifier_base_url() -> String {
    "https://api.anthropic.com/v1".to_string()
}
fn default_classifier_model() -> String {
    "claude-3-haiku-20240307".to_string()
}
fn default_classifier_key_env() -> String {
    "ANTHROPIC_API_KEY".to_string()
}
fn default_max_pairs() -> usize {
    100
}
fn default_min_similarity() -> f64 {
    0.5
}

#[derive(Debug, Deserialize, Clone)]
pub struct VisualizationConfig {
    /// Default projection method: `pca` or `semantic`.
    #[serde(default = "default_method")]
    pub default_method: String,
    #[serde(default = "default_dimensions")]
    pub default_dimensions: usize,
    #[serde(default = "default_max_points")]
    pub max_points: usize,
}

impl Default for VisualizationConfig {
    fn default() -> Self {
        Self {
            default_method: default_method(),
            default_dimensions: default_dimensions(),
            max_points: default_max_points(),
        }
    }
}

fn default_method() -> String {
    "pca".to_string()
}
fn default_dimensions() -> usize {
    2
}
fn default_max_points() -> usize {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate db
    if config.db.max_connections == 0 {
        anyhow::bail!("db.max_connections must be > 0");
    }

    // Validate embedding
    if crate::embedding::embedding_dimension(&config.embedding.model).is_none() {
        anyhow::bail!(
            "Unknown embedding model: '{}'. Supported: {}",
            config.embedding.model,
            crate::embedding::SUPPORTED_MODELS.join(", ")
        );
    }
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }
    if config.embedding.max_concurrent == 0 {
        anyhow::bail!("embedding.max_concurrent must be > 0");
    }

    // Validate similarity
    if !(-1.0..=1.0).contains(&config.similarity.threshold) {
        anyhow::bail!("similarity.threshold must be in [-1.0, 1.0]");
    }

    // Validate anomaly
    match config.anomaly.detector.as_str() {
        "distance" | "isolation" | "ensemble" => {}
        other => anyhow::bail!(
            "Unknown anomaly detector: '{}'. Must be distance, isolation, or ensemble.",
            other
        ),
    }
    if config.anomaly.threshold <= 0.0 || config.anomaly.threshold > 1.0 {
        anyhow::bail!("anomaly.threshold must be in (0.0, 1.0]");
    }

    // Validate visualization
    match config.visualization.default_method.as_str() {
        "pca" | "semantic" => {}
        other => anyhow::bail!(
            "Unknown visualization method: '{}'. Must be pca or semantic.",
            other
        ),
    }
    if !(2..=3).contains(&config.visualization.default_dimensions) {
        anyhow::bail!("visualization.default_dimensions must be 2 or 3");
    }
    if config.visualization.max_points == 0 {
        anyhow::bail!("visualization.max_points must be > 0");
    }

    Ok(config)
}
