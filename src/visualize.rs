//! Visualization orchestrator.
//!
//! Composes the reducers, the coordinate-space clusterer, and the anomaly
//! ensemble into a single per-request response: one point per statement
//! (projected coordinates, cluster label, anomaly score, text preview,
//! source file) plus per-cluster metadata (keywords, color, size,
//! density).
//!
//! Two load-bearing decisions:
//!
//! - **Deterministic sub-sampling.** PCA is O(n·D²); above
//!   `max_points` statements the orchestrator keeps the evenly spaced
//!   indices `i·n/max_points`, which preserves corpus structure and keeps
//!   response times interactive.
//! - **Document pre-load.** Source filenames come from one
//!   documents-by-project query loaded into a map before composing
//!   points. A per-statement document fetch here would be an N+1 query
//!   against the largest table in the system.

use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::HashMap;
use thiserror::Error;

use crate::anomaly::{AnomalyService, DetectorKind};
use crate::clustering::ClusteringService;
use crate::config::Config;
use crate::embedding::Embedder;
use crate::models::Statement;
use crate::reduce::{find_semantic_axes, Reducer, ReduceError};
use crate::store;

/// Colors assigned to clusters by `id % palette length`.
pub const CLUSTER_COLORS: [&str; 10] = [
    "#3498db", "#e74c3c", "#2ecc71", "#f39c12", "#9b59b6", "#1abc9c", "#e91e63", "#00bcd4",
    "#ff5722", "#607d8b",
];

/// Preview text is truncated to this many characters.
const PREVIEW_CHARS: usize = 100;

/// The coordinate clusterer explores k = 1..=10.
const CLUSTER_MAX_K: usize = 10;

#[derive(Debug, Error)]
pub enum VisualizeError {
    #[error("unknown method: {0}")]
    UnknownMethod(String),
    #[error("dimensions must be 2 or 3")]
    InvalidDimensions,
    #[error("semantic method requires axis words")]
    MissingAxisWords,
    #[error("provide 1-3 words for semantic axes")]
    TooManyAxisWords,
    #[error("embedding provider not configured")]
    NotConfigured,
    #[error(transparent)]
    Reduce(#[from] ReduceError),
    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
    #[error("visualization task failed: {0}")]
    Task(String),
}

/// Parameters of one visualization request.
#[derive(Debug, Clone)]
pub struct VisualizationRequest {
    /// `pca` or `semantic`; empty selects the configured default.
    pub method: String,
    /// 2 or 3; zero selects the configured default. Ignored for the
    /// semantic method, where the axis count wins.
    pub dimensions: usize,
    /// Anchor words for the semantic method.
    pub axis_words: Vec<String>,
}

/// One statement as a projected point.
#[derive(Debug, Clone, Serialize)]
pub struct VisualizationPoint {
    pub id: String,
    pub x: f64,
    pub y: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub z: Option<f64>,
    pub cluster_id: usize,
    pub anomaly_score: f64,
    pub preview: String,
    pub source_file: String,
}

/// Cluster metadata for the legend.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterInfo {
    pub id: usize,
    pub keywords: Vec<String>,
    pub color: String,
    pub size: usize,
    pub density: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct VisualizationResponse {
    pub points: Vec<VisualizationPoint>,
    pub clusters: Vec<ClusterInfo>,
    pub dimensions: usize,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub axis_labels: Option<Vec<String>>,
}

/// Build the visualization response for a project.
///
/// Loads statements and documents, sub-samples, projects, clusters on the
/// projected coordinates, scores anomalies on the original embeddings,
/// and assembles the response. The numeric stages run on a blocking
/// thread; only the storage reads and the axis-word embedding await.
pub async fn build_visualization(
    pool: &SqlitePool,
    config: &Config,
    embedder: Option<&dyn Embedder>,
    project_id: &str,
    request: &VisualizationRequest,
) -> Result<VisualizationResponse, VisualizeError> {
    let method = if request.method.is_empty() {
        config.visualization.default_method.clone()
    } else {
        request.method.clone()
    };
    let dimensions = if request.dimensions == 0 {
        config.visualization.default_dimensions
    } else {
        request.dimensions
    };

    // Validate the request before touching storage.
    let (reducer_kind, dimensions, axis_labels) = match method.as_str() {
        "pca" => {
            if !(2..=3).contains(&dimensions) {
                return Err(VisualizeError::InvalidDimensions);
            }
            (ReducerKind::Pca, dimensions, None)
        }
        "semantic" => {
            if request.axis_words.is_empty() {
                return Err(VisualizeError::MissingAxisWords);
            }
            if request.axis_words.len() > 3 {
                return Err(VisualizeError::TooManyAxisWords);
            }
            (
                ReducerKind::Semantic,
                request.axis_words.len(),
                Some(request.axis_words.clone()),
            )
        }
        other => return Err(VisualizeError::UnknownMethod(other.to_string())),
    };

    let mut statements = store::statements_by_project(pool, project_id).await?;
    statements.retain(|s| s.has_embedding());

    // Deterministic sub-sample: evenly spaced indices i·n/max_points.
    let max_points = config.visualization.max_points;
    if statements.len() > max_points {
        statements = sample_statements(statements, max_points);
    }

    // Pre-load filenames for every document in the project.
    let docs = store::documents_by_project(pool, project_id).await?;
    let doc_files: HashMap<String, String> =
        docs.into_iter().map(|d| (d.id, d.filename)).collect();

    if statements.is_empty() {
        return Ok(VisualizationResponse {
            points: Vec::new(),
            clusters: Vec::new(),
            dimensions,
            method,
            axis_labels,
        });
    }

    // Axis embedding is the only remote call in the flow.
    let reducer = match reducer_kind {
        ReducerKind::Pca => Reducer::Pca,
        ReducerKind::Semantic => {
            let embedder = embedder.ok_or(VisualizeError::NotConfigured)?;
            let axes = find_semantic_axes(embedder, &request.axis_words).await?;
            Reducer::Semantic(axes)
        }
    };

    let clustering = ClusteringService::new(
        config.clustering.default_k,
        config.clustering.keywords_per_cluster,
    );
    let anomaly = AnomalyService::new(
        DetectorKind::parse(&config.anomaly.detector),
        config.anomaly.k,
        config.anomaly.num_trees,
        config.anomaly.sample_size,
        config.anomaly.threshold,
    );

    // The numeric stages are CPU-bound; keep them off the async workers.
    let response = tokio::task::spawn_blocking(move || {
        compose(
            statements,
            doc_files,
            reducer,
            clustering,
            anomaly,
            method,
            dimensions,
            axis_labels,
        )
    })
    .await
    .map_err(|e| VisualizeError::Task(e.to_string()))??;

    Ok(response)
}

enum ReducerKind {
    Pca,
    Semantic,
}

#[allow(clippy::too_many_arguments)]
fn compose(
    statements: Vec<Statement>,
    doc_files: HashMap<String, String>,
    reducer: Reducer,
    clustering: ClusteringService,
    anomaly: AnomalyService,
    method: String,
    dimensions: usize,
    axis_labels: Option<Vec<String>>,
) -> Result<VisualizationResponse, VisualizeError> {
    let embeddings: Vec<Vec<f32>> = statements.iter().map(|s| s.embedding.clone()).collect();
    let texts: Vec<String> = statements.iter().map(|s| s.text.clone()).collect();

    let coords = reducer.reduce(&embeddings, dimensions)?;

    // Cluster on the projected coordinates, not the raw embeddings.
    let cluster_result = clustering.auto_cluster_coordinates(&coords, &texts, CLUSTER_MAX_K);

    // Anomalies score on the original embeddings.
    let anomaly_results = anomaly.detect_anomalies(&statements);

    let points = statements
        .iter()
        .enumerate()
        .map(|(i, stmt)| VisualizationPoint {
            id: stmt.id.clone(),
            x: coords[i].first().copied().unwrap_or(0.0),
            y: coords[i].get(1).copied().unwrap_or(0.0),
            z: if dimensions == 3 {
                Some(coords[i].get(2).copied().unwrap_or(0.0))
            } else {
                None
            },
            cluster_id: cluster_result.labels[i],
            anomaly_score: anomaly_results[i].score,
            preview: preview_of(&stmt.text),
            source_file: doc_files
                .get(&stmt.document_id)
                .cloned()
                .unwrap_or_default(),
        })
        .collect();

    let clusters = cluster_result
        .clusters
        .iter()
        .map(|c| ClusterInfo {
            id: c.id,
            keywords: c.keywords.iter().map(|k| k.word.clone()).collect(),
            color: CLUSTER_COLORS[c.id % CLUSTER_COLORS.len()].to_string(),
            size: c.size,
            density: c.density,
        })
        .collect();

    Ok(VisualizationResponse {
        points,
        clusters,
        dimensions,
        method,
        axis_labels,
    })
}

/// Keep the evenly spaced indices `i·n/max_count` for i in [0, max_count).
fn sample_statements(statements: Vec<Statement>, max_count: usize) -> Vec<Statement> {
    let n = statements.len();
    if n <= max_count {
        return statements;
    }

    (0..max_count)
        .map(|i| statements[i * n / max_count].clone())
        .collect()
}

fn preview_of(text: &str) -> String {
    if text.chars().count() <= PREVIEW_CHARS {
        return text.to_string();
    }
    let mut preview: String = text.chars().take(PREVIEW_CHARS).collect();
    preview.push_str("...");
    preview
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::OfflineEmbedder;
    use crate::models::Document;
    use uuid::Uuid;

    fn test_config() -> Config {
        let toml = r#"
            [db]
            path = ":memory:"
            [server]
            bind = "127.0.0.1:0"
        "#;
        toml::from_str(toml).unwrap()
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

    /// Seed one project with one document and n statements whose
    /// embeddings are one-hot(i % 8) in 8 dimensions.
    async fn seed_project(pool: &SqlitePool, n: usize) -> String {
        let project = store::get_or_create_project(pool, "viz").await.unwrap();
        let doc = Document {
            id: Uuid::new_v4().to_string(),
            project_id: project.id.clone(),
            filename: "a.txt".to_string(),
            content_hash: "h".to_string(),
            content: String::new(),
            created_at: 0,
        };
        store::insert_document(pool, &doc).await.unwrap();

        let statements: Vec<Statement> = (0..n)
            .map(|i| {
                let mut embedding = vec![0.0f32; 8];
                embedding[i % 8] = 1.0;
                Statement {
                    id: format!("stmt-{:05}", i),
                    document_id: doc.id.clone(),
                    text: format!("statement number {}", i),
                    position: i as i64,
                    line: i as i64 + 1,
                    embedding,
                    file: String::new(),
                }
            })
            .collect();
        store::insert_statements(pool, &statements).await.unwrap();
        project.id
    }

    fn pca_request() -> VisualizationRequest {
        VisualizationRequest {
            method: "pca".to_string(),
            dimensions: 2,
            axis_words: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_empty_project() {
        let pool = test_pool().await;
        let config = test_config();
        let project = store::get_or_create_project(&pool, "empty").await.unwrap();

        let resp = build_visualization(&pool, &config, None, &project.id, &pca_request())
            .await
            .unwrap();
        assert!(resp.points.is_empty());
        assert!(resp.clusters.is_empty());
        assert_eq!(resp.method, "pca");
        assert_eq!(resp.dimensions, 2);
    }

    #[tokio::test]
    async fn test_sampling_picks_evenly_spaced_indices() {
        let pool = test_pool().await;
        let config = test_config();
        let project_id = seed_project(&pool, 3000).await;

        let resp = build_visualization(&pool, &config, None, &project_id, &pca_request())
            .await
            .unwrap();

        assert_eq!(resp.points.len(), 1000);
        // Point i corresponds to source index i·3000/1000 = 3i
        for (i, point) in resp.points.iter().enumerate() {
            assert_eq!(point.id, format!("stmt-{:05}", i * 3));
        }
    }

    #[tokio::test]
    async fn test_single_statement() {
        let pool = test_pool().await;
        let config = test_config();
        let project_id = seed_project(&pool, 1).await;

        let resp = build_visualization(&pool, &config, None, &project_id, &pca_request())
            .await
            .unwrap();

        assert_eq!(resp.points.len(), 1);
        assert_eq!(resp.clusters.len(), 1);
        let p = &resp.points[0];
        assert_eq!(p.cluster_id, 0);
        // A single point normalizes to the origin
        assert_eq!(p.x, 0.0);
        assert_eq!(p.y, 0.0);
        assert!(p.z.is_none());
        // Distance component 0.5, lone point isolates immediately (1.0)
        assert!((p.anomaly_score - 0.75).abs() < 1e-9);
        assert_eq!(p.source_file, "a.txt");
    }

    #[tokio::test]
    async fn test_points_carry_cluster_and_file_metadata() {
        let pool = test_pool().await;
        let config = test_config();
        let project_id = seed_project(&pool, 24).await;

        let resp = build_visualization(&pool, &config, None, &project_id, &pca_request())
            .await
            .unwrap();

        assert_eq!(resp.points.len(), 24);
        let k = resp.clusters.len();
        assert!(k >= 1);
        for p in &resp.points {
            assert!(p.cluster_id < k);
            assert!((-1.0..=1.0).contains(&p.x));
            assert!((-1.0..=1.0).contains(&p.y));
            assert!((0.0..=1.0).contains(&p.anomaly_score));
            assert_eq!(p.source_file, "a.txt");
        }
        let sizes: usize = resp.clusters.iter().map(|c| c.size).sum();
        assert_eq!(sizes, 24);
        for c in &resp.clusters {
            assert_eq!(c.color, CLUSTER_COLORS[c.id % CLUSTER_COLORS.len()]);
        }
    }

    #[tokio::test]
    async fn test_semantic_method() {
        let pool = test_pool().await;
        let config = test_config();
        let project_id = seed_project(&pool, 12).await;
        let embedder = OfflineEmbedder::new(8);

        let request = VisualizationRequest {
            method: "semantic".to_string(),
            dimensions: 2,
            axis_words: vec!["theory".to_string(), "practice".to_string(), "x".to_string()],
        };
        let resp = build_visualization(&pool, &config, Some(&embedder), &project_id, &request)
            .await
            .unwrap();

        // Axis count overrides requested dimensions
        assert_eq!(resp.dimensions, 3);
        assert_eq!(
            resp.axis_labels.as_deref(),
            Some(&["theory".to_string(), "practice".to_string(), "x".to_string()][..])
        );
        assert!(resp.points.iter().all(|p| p.z.is_some()));
    }

    #[tokio::test]
    async fn test_semantic_requires_embedder() {
        let pool = test_pool().await;
        let config = test_config();
        let project_id = seed_project(&pool, 4).await;

        let request = VisualizationRequest {
            method: "semantic".to_string(),
            dimensions: 2,
            axis_words: vec!["theory".to_string()],
        };
        let err = build_visualization(&pool, &config, None, &project_id, &request)
            .await
            .unwrap_err();
        assert!(matches!(err, VisualizeError::NotConfigured));
    }

    #[tokio::test]
    async fn test_semantic_validates_axis_words() {
        let pool = test_pool().await;
        let config = test_config();
        let project_id = seed_project(&pool, 4).await;
        let embedder = OfflineEmbedder::new(8);

        let no_words = VisualizationRequest {
            method: "semantic".to_string(),
            dimensions: 2,
            axis_words: Vec::new(),
        };
        assert!(matches!(
            build_visualization(&pool, &config, Some(&embedder), &project_id, &no_words).await,
            Err(VisualizeError::MissingAxisWords)
        ));

        let too_many = VisualizationRequest {
            method: "semantic".to_string(),
            dimensions: 2,
            axis_words: ["a", "b", "c", "d"].iter().map(|s| s.to_string()).collect(),
        };
        assert!(matches!(
            build_visualization(&pool, &config, Some(&embedder), &project_id, &too_many).await,
            Err(VisualizeError::TooManyAxisWords)
        ));
    }

    #[tokio::test]
    async fn test_unknown_method_and_bad_dimensions() {
        let pool = test_pool().await;
        let config = test_config();
        let project_id = seed_project(&pool, 4).await;

        let unknown = VisualizationRequest {
            method: "tsne".to_string(),
            dimensions: 2,
            axis_words: Vec::new(),
        };
        assert!(matches!(
            build_visualization(&pool, &config, None, &project_id, &unknown).await,
            Err(VisualizeError::UnknownMethod(_))
        ));

        let bad_dims = VisualizationRequest {
            method: "pca".to_string(),
            dimensions: 4,
            axis_words: Vec::new(),
        };
        assert!(matches!(
            build_visualization(&pool, &config, None, &project_id, &bad_dims).await,
            Err(VisualizeError::InvalidDimensions)
        ));
    }

    #[test]
    fn test_preview_truncation() {
        let short = "short text";
        assert_eq!(preview_of(short), short);

        let long = "x".repeat(250);
        let preview = preview_of(&long);
        assert_eq!(preview.chars().count(), 103);
        assert!(preview.ends_with("..."));
    }

    #[test]
    fn test_sample_statements_exact_indices() {
        let statements: Vec<Statement> = (0..10)
            .map(|i| Statement {
                id: format!("s{}", i),
                document_id: "d".to_string(),
                text: String::new(),
                position: i,
                line: i + 1,
                embedding: Vec::new(),
                file: String::new(),
            })
            .collect();

        let sampled = sample_statements(statements, 4);
        let ids: Vec<&str> = sampled.iter().map(|s| s.id.as_str()).collect();
        // floor(i·10/4) = 0, 2, 5, 7
        assert_eq!(ids, vec!["s0", "s2", "s5", "s7"]);
    }
}
