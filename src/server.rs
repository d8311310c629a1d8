//! HTTP analysis API.
//!
//! Exposes the analysis views over a project's corpus via a JSON API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/projects/:id/visualization` | 2D/3D projection with clusters and anomaly scores |
//! | `POST` | `/projects/:id/axes` | Re-project onto 1-3 semantic axis words |
//! | `GET`  | `/projects/:id/clusters` | Topical clusters with keywords |
//! | `GET`  | `/projects/:id/similar` | Similar statement pairs |
//! | `GET`  | `/projects/:id/anomalies` | Statements flagged as anomalous |
//! | `GET`  | `/projects/:id/contradictions` | Contradictions among similar pairs |
//! | `GET`  | `/documents/:id` | Full document with its statements |
//! | `GET`  | `/axes/presets` | Named semantic-axis presets |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "provide 1-3 words for semantic axes" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `not_configured`
//! (503, names the missing credential), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support
//! browser-based clients.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::analyze::build_embedder;
use crate::anomaly::{AnomalyService, DetectorKind};
use crate::clustering::ClusteringService;
use crate::config::Config;
use crate::contradiction::{
    ClassifierClient, ContradictionResult, ContradictionService, StatementPair,
};
use crate::db;
use crate::embedding::Embedder;
use crate::get::{fetch_document, DocumentResponse};
use crate::models::Statement;
use crate::reduce::{default_presets, PresetAxis};
use crate::similarity::SimilarityService;
use crate::store;
use crate::visualize::{
    build_visualization, VisualizationRequest, VisualizationResponse, VisualizeError,
};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    pool: SqlitePool,
}

/// Start the analysis API server on the configured bind address. Runs
/// until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let pool = db::connect(config).await?;

    let state = AppState {
        config: Arc::new(config.clone()),
        pool,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/projects/:project_id/visualization", get(handle_visualization))
        .route("/projects/:project_id/axes", post(handle_set_axes))
        .route("/projects/:project_id/clusters", get(handle_clusters))
        .route("/projects/:project_id/similar", get(handle_similar))
        .route("/projects/:project_id/anomalies", get(handle_anomalies))
        .route(
            "/projects/:project_id/contradictions",
            get(handle_contradictions),
        )
        .route("/documents/:document_id", get(handle_get_document))
        .route("/axes/presets", get(handle_presets))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state);

    println!("atlas server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

/// 503 with a message telling the operator which credential to set.
fn not_configured(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::SERVICE_UNAVAILABLE,
        code: "not_configured".to_string(),
        message: message.into(),
    }
}

fn internal_error(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

fn map_visualize_error(e: VisualizeError, state: &AppState) -> AppError {
    match e {
        VisualizeError::UnknownMethod(_)
        | VisualizeError::InvalidDimensions
        | VisualizeError::MissingAxisWords
        | VisualizeError::TooManyAxisWords => bad_request(e.to_string()),
        VisualizeError::NotConfigured => not_configured(format!(
            "embedding service not configured - set {}",
            state.config.embedding.api_key_env
        )),
        other => internal_error(other.to_string()),
    }
}

// ============ Shared loading ============

/// Load a project's statements, or 404 when the project is unknown.
/// Statements without embeddings are excluded from analysis.
async fn load_embedded_statements(
    state: &AppState,
    project_id: &str,
) -> Result<Vec<Statement>, AppError> {
    let project = store::project_by_id(&state.pool, project_id)
        .await
        .map_err(|e| internal_error(e.to_string()))?;
    if project.is_none() {
        return Err(not_found("project not found"));
    }

    let statements = store::statements_by_project(&state.pool, project_id)
        .await
        .map_err(|e| internal_error(e.to_string()))?;

    Ok(statements
        .into_iter()
        .filter(|s| s.has_embedding())
        .collect())
}

// ============ GET /projects/:id/visualization ============

#[derive(Deserialize)]
struct VisualizationQuery {
    method: Option<String>,
    dimensions: Option<usize>,
    /// Comma-separated axis words for the semantic method.
    words: Option<String>,
}

async fn handle_visualization(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Query(query): Query<VisualizationQuery>,
) -> Result<Json<VisualizationResponse>, AppError> {
    let project = store::project_by_id(&state.pool, &project_id)
        .await
        .map_err(|e| internal_error(e.to_string()))?;
    if project.is_none() {
        return Err(not_found("project not found"));
    }

    let axis_words: Vec<String> = query
        .words
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .map(|w| w.trim().to_string())
        .filter(|w| !w.is_empty())
        .collect();

    let request = VisualizationRequest {
        method: query.method.unwrap_or_default(),
        dimensions: query.dimensions.unwrap_or(0),
        axis_words,
    };

    let embedder = build_embedder(&state.config, &state.pool);
    let response = build_visualization(
        &state.pool,
        &state.config,
        embedder.as_ref().map(|e| e as &dyn Embedder),
        &project_id,
        &request,
    )
    .await
    .map_err(|e| map_visualize_error(e, &state))?;

    Ok(Json(response))
}

// ============ POST /projects/:id/axes ============

#[derive(Deserialize)]
struct SemanticAxesRequest {
    words: Vec<String>,
}

async fn handle_set_axes(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Json(req): Json<SemanticAxesRequest>,
) -> Result<Json<VisualizationResponse>, AppError> {
    if req.words.is_empty() || req.words.len() > 3 {
        return Err(bad_request("provide 1-3 words for semantic axes"));
    }

    let project = store::project_by_id(&state.pool, &project_id)
        .await
        .map_err(|e| internal_error(e.to_string()))?;
    if project.is_none() {
        return Err(not_found("project not found"));
    }

    let embedder = build_embedder(&state.config, &state.pool);
    if embedder.is_none() {
        return Err(not_configured(format!(
            "embedding service not configured - set {}",
            state.config.embedding.api_key_env
        )));
    }

    let request = VisualizationRequest {
        method: "semantic".to_string(),
        dimensions: req.words.len(),
        axis_words: req.words,
    };

    let response = build_visualization(
        &state.pool,
        &state.config,
        embedder.as_ref().map(|e| e as &dyn Embedder),
        &project_id,
        &request,
    )
    .await
    .map_err(|e| map_visualize_error(e, &state))?;

    Ok(Json(response))
}

// ============ GET /projects/:id/clusters ============

#[derive(Deserialize)]
struct ClustersQuery {
    k: Option<usize>,
}

#[derive(Serialize)]
struct ClusterResponse {
    id: usize,
    keywords: Vec<String>,
    size: usize,
    density: f64,
}

async fn handle_clusters(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Query(query): Query<ClustersQuery>,
) -> Result<Json<Vec<ClusterResponse>>, AppError> {
    let statements = load_embedded_statements(&state, &project_id).await?;

    let service = ClusteringService::new(
        state.config.clustering.default_k,
        state.config.clustering.keywords_per_cluster,
    );
    let k = query.k;

    let result = tokio::task::spawn_blocking(move || match k {
        Some(k) => service.cluster_statements(&statements, k),
        None => service.auto_cluster(&statements, 10),
    })
    .await
    .map_err(|e| internal_error(e.to_string()))?;

    let clusters = result
        .clusters
        .iter()
        .map(|c| ClusterResponse {
            id: c.id,
            keywords: c.keywords.iter().map(|kw| kw.word.clone()).collect(),
            size: c.size,
            density: c.density,
        })
        .collect();

    Ok(Json(clusters))
}

// ============ GET /projects/:id/similar ============

#[derive(Deserialize)]
struct SimilarQuery {
    threshold: Option<f64>,
}

#[derive(Serialize)]
struct SimilarPairResponse {
    statement1: String,
    statement2: String,
    file1: String,
    file2: String,
    similarity: f64,
}

async fn handle_similar(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Query(query): Query<SimilarQuery>,
) -> Result<Json<Vec<SimilarPairResponse>>, AppError> {
    let statements = load_embedded_statements(&state, &project_id).await?;

    let service = SimilarityService::new(state.config.similarity.threshold);
    let threshold = query.threshold.unwrap_or(0.0);

    let results = tokio::task::spawn_blocking(move || {
        service.find_similar_statements(&statements, threshold)
    })
    .await
    .map_err(|e| internal_error(e.to_string()))?;

    let pairs = results
        .into_iter()
        .map(|r| SimilarPairResponse {
            statement1: r.statement1,
            statement2: r.statement2,
            file1: r.file1,
            file2: r.file2,
            similarity: r.similarity,
        })
        .collect();

    Ok(Json(pairs))
}

// ============ GET /projects/:id/anomalies ============

#[derive(Serialize)]
struct AnomalyResponse {
    text: String,
    file: String,
    line: i64,
    score: f64,
}

async fn handle_anomalies(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> Result<Json<Vec<AnomalyResponse>>, AppError> {
    let statements = load_embedded_statements(&state, &project_id).await?;

    let service = AnomalyService::new(
        DetectorKind::parse(&state.config.anomaly.detector),
        state.config.anomaly.k,
        state.config.anomaly.num_trees,
        state.config.anomaly.sample_size,
        state.config.anomaly.threshold,
    );

    let anomalies =
        tokio::task::spawn_blocking(move || service.get_anomalies(&statements))
            .await
            .map_err(|e| internal_error(e.to_string()))?;

    let out = anomalies
        .into_iter()
        .map(|a| AnomalyResponse {
            text: a.text,
            file: a.file,
            line: a.line,
            score: a.score,
        })
        .collect();

    Ok(Json(out))
}

// ============ GET /projects/:id/contradictions ============

async fn handle_contradictions(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> Result<Json<Vec<ContradictionResult>>, AppError> {
    let statements = load_embedded_statements(&state, &project_id).await?;

    let classifier = ClassifierClient::new(&state.config.contradiction).map_err(|_| {
        not_configured(format!(
            "contradiction service not configured - set {}",
            state.config.contradiction.api_key_env
        ))
    })?;

    let min_similarity = state.config.contradiction.min_similarity;
    let similarity = SimilarityService::new(state.config.similarity.threshold);
    let candidates = tokio::task::spawn_blocking(move || {
        similarity.find_similar_statements(&statements, min_similarity)
    })
    .await
    .map_err(|e| internal_error(e.to_string()))?;

    let pairs: Vec<StatementPair> = candidates
        .into_iter()
        .map(|r| StatementPair {
            statement1: r.statement1,
            statement2: r.statement2,
            statement1_id: r.statement1_id,
            statement2_id: r.statement2_id,
            file1: r.file1,
            file2: r.file2,
            similarity: r.similarity,
        })
        .collect();

    let service = ContradictionService::new(
        Arc::new(classifier),
        state.config.contradiction.max_pairs_to_analyze,
        state.config.contradiction.min_similarity,
        state.config.contradiction.max_concurrent,
    );
    let outcome = service.detect_contradictions(pairs).await;

    Ok(Json(outcome.results))
}

// ============ GET /documents/:id ============

async fn handle_get_document(
    State(state): State<AppState>,
    Path(document_id): Path<String>,
) -> Result<Json<DocumentResponse>, AppError> {
    let doc = fetch_document(&state.pool, &document_id)
        .await
        .map_err(|e| internal_error(e.to_string()))?;

    match doc {
        Some(doc) => Ok(Json(doc)),
        None => Err(not_found("document not found")),
    }
}

// ============ GET /axes/presets ============

async fn handle_presets() -> Json<Vec<PresetAxis>> {
    Json(default_presets())
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
