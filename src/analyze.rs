//! CLI analysis runners.
//!
//! Each `run_*` function loads a project's statements, runs one analysis
//! engine per the configuration, and prints the result as text or JSON.
//! These are the command-line mirrors of the HTTP endpoints in
//! [`crate::server`].

use anyhow::{bail, Result};
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::anomaly::{AnomalyService, DetectorKind};
use crate::cache::{CachedEmbedder, SqliteCache};
use crate::clustering::ClusteringService;
use crate::config::Config;
use crate::contradiction::{ClassifierClient, ContradictionService, StatementPair};
use crate::db;
use crate::embedding::{EmbedClient, Embedder};
use crate::models::{Project, Statement};
use crate::similarity::SimilarityService;
use crate::store;
use crate::visualize::{build_visualization, VisualizationRequest};

/// Build the cached embedding client, or `None` when no API key is set.
pub fn build_embedder(
    config: &Config,
    pool: &SqlitePool,
) -> Option<CachedEmbedder<EmbedClient, SqliteCache>> {
    let client = EmbedClient::new(&config.embedding).ok()?;
    let cache = SqliteCache::new(pool.clone(), client.model_name().to_string(), client.dims());
    Some(CachedEmbedder::new(client, cache))
}

async fn load_project(pool: &SqlitePool, name: &str) -> Result<(Project, Vec<Statement>)> {
    let Some(project) = store::project_by_name(pool, name).await? else {
        bail!("Project '{}' not found. Ingest documents first.", name);
    };
    let statements = store::statements_by_project(pool, &project.id).await?;
    Ok((project, statements))
}

fn embedded_only(statements: Vec<Statement>) -> Vec<Statement> {
    let total = statements.len();
    let embedded: Vec<Statement> = statements.into_iter().filter(|s| s.has_embedding()).collect();
    if embedded.len() < total {
        eprintln!(
            "Warning: {} statements have no embedding yet; run `atlas embed pending`",
            total - embedded.len()
        );
    }
    embedded
}

/// `atlas analyze clusters`
pub async fn run_clusters(
    config: &Config,
    project_name: &str,
    k: Option<usize>,
    json: bool,
) -> Result<()> {
    let pool = db::connect(config).await?;
    let (_, statements) = load_project(&pool, project_name).await?;
    let statements = embedded_only(statements);

    let service = ClusteringService::new(
        config.clustering.default_k,
        config.clustering.keywords_per_cluster,
    );
    let result = match k {
        Some(k) => service.cluster_statements(&statements, k),
        None => service.auto_cluster(&statements, 10),
    };

    if json {
        let out: Vec<serde_json::Value> = result
            .clusters
            .iter()
            .map(|c| {
                serde_json::json!({
                    "id": c.id,
                    "keywords": c.keywords.iter().map(|kw| kw.word.clone()).collect::<Vec<_>>(),
                    "size": c.size,
                    "density": c.density,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("clusters (k = {}, inertia = {:.4})", result.k, result.inertia);
        for c in &result.clusters {
            let words: Vec<&str> = c.keywords.iter().map(|kw| kw.word.as_str()).collect();
            println!(
                "  #{}  size {:>4}  density {:.3}  [{}]",
                c.id,
                c.size,
                c.density,
                words.join(", ")
            );
        }
    }

    pool.close().await;
    Ok(())
}

/// `atlas analyze similar`
pub async fn run_similar(
    config: &Config,
    project_name: &str,
    threshold: Option<f64>,
    json: bool,
) -> Result<()> {
    let pool = db::connect(config).await?;
    let (_, statements) = load_project(&pool, project_name).await?;
    let statements = embedded_only(statements);

    let service = SimilarityService::new(config.similarity.threshold);
    let results = service.find_similar_statements(&statements, threshold.unwrap_or(0.0));

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else if results.is_empty() {
        println!("No similar pairs at threshold {:.2}.", threshold.unwrap_or(service.threshold()));
    } else {
        for r in &results {
            println!("[{:.3}] {}:{}  <->  {}:{}", r.similarity, r.file1, r.line1, r.file2, r.line2);
            println!("    \"{}\"", r.statement1);
            println!("    \"{}\"", r.statement2);
        }
    }

    pool.close().await;
    Ok(())
}

/// `atlas analyze anomalies`
pub async fn run_anomalies(config: &Config, project_name: &str, json: bool) -> Result<()> {
    let pool = db::connect(config).await?;
    let (_, statements) = load_project(&pool, project_name).await?;
    let statements = embedded_only(statements);

    let service = AnomalyService::new(
        DetectorKind::parse(&config.anomaly.detector),
        config.anomaly.k,
        config.anomaly.num_trees,
        config.anomaly.sample_size,
        config.anomaly.threshold,
    );
    let anomalies = service.get_anomalies(&statements);

    if json {
        let out: Vec<serde_json::Value> = anomalies
            .iter()
            .map(|a| {
                serde_json::json!({
                    "text": a.text,
                    "file": a.file,
                    "line": a.line,
                    "score": a.score,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else if anomalies.is_empty() {
        println!("No anomalies at threshold {:.2}.", service.threshold());
    } else {
        for a in &anomalies {
            println!("[{:.3}] {}:{}  \"{}\"", a.score, a.file, a.line, a.text);
        }
    }

    pool.close().await;
    Ok(())
}

/// `atlas analyze contradictions`
pub async fn run_contradictions(config: &Config, project_name: &str, json: bool) -> Result<()> {
    let pool = db::connect(config).await?;
    let (_, statements) = load_project(&pool, project_name).await?;
    let statements = embedded_only(statements);

    let classifier = match ClassifierClient::new(&config.contradiction) {
        Ok(c) => Arc::new(c),
        Err(_) => bail!(
            "Contradiction detection requires {} to be set.",
            config.contradiction.api_key_env
        ),
    };

    // Candidates are similar pairs above the contradiction floor.
    let similarity = SimilarityService::new(config.similarity.threshold);
    let pairs: Vec<StatementPair> = similarity
        .find_similar_statements(&statements, config.contradiction.min_similarity)
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
        classifier,
        config.contradiction.max_pairs_to_analyze,
        config.contradiction.min_similarity,
        config.contradiction.max_concurrent,
    );
    let outcome = service.detect_contradictions(pairs).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome.results)?);
    } else {
        println!(
            "analyzed {} pairs ({} classifier failures)",
            outcome.analyzed, outcome.failed
        );
        for r in &outcome.results {
            println!(
                "[{:?}/{:?} {:.2}] {} <-> {}",
                r.severity, r.contradiction_type, r.confidence, r.file1, r.file2
            );
            println!("    \"{}\"", r.statement1);
            println!("    \"{}\"", r.statement2);
            println!("    {}", r.explanation);
        }
    }

    pool.close().await;
    Ok(())
}

/// `atlas visualize`
pub async fn run_visualize(
    config: &Config,
    project_name: &str,
    method: Option<String>,
    dimensions: Option<usize>,
    words: Vec<String>,
    json: bool,
) -> Result<()> {
    let pool = db::connect(config).await?;
    let Some(project) = store::project_by_name(&pool, project_name).await? else {
        bail!("Project '{}' not found. Ingest documents first.", project_name);
    };

    let embedder = build_embedder(config, &pool);
    let request = VisualizationRequest {
        method: method.unwrap_or_default(),
        dimensions: dimensions.unwrap_or(0),
        axis_words: words,
    };

    let response = build_visualization(
        &pool,
        config,
        embedder.as_ref().map(|e| e as &dyn Embedder),
        &project.id,
        &request,
    )
    .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        println!(
            "{} points, {} clusters ({}D, method {})",
            response.points.len(),
            response.clusters.len(),
            response.dimensions,
            response.method
        );
        for c in &response.clusters {
            println!(
                "  cluster #{} size {:>4} [{}]",
                c.id,
                c.size,
                c.keywords.join(", ")
            );
        }
    }

    pool.close().await;
    Ok(())
}
