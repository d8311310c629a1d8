//! # doc-atlas CLI (`atlas`)
//!
//! The `atlas` binary is the primary interface for doc-atlas. It provides
//! commands for database initialization, document ingestion, embedding
//! backfill, corpus analysis, and starting the analysis API server.
//!
//! ## Usage
//!
//! ```bash
//! atlas --config ./config/atlas.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `atlas init` | Create the SQLite database and run schema migrations |
//! | `atlas ingest <files> --project <name>` | Ingest documents into a project |
//! | `atlas get <id>` | Retrieve a document and its statements by UUID |
//! | `atlas embed pending` | Backfill missing statement embeddings |
//! | `atlas analyze clusters --project <name>` | Topical clusters with keywords |
//! | `atlas analyze similar --project <name>` | Near-duplicate statement pairs |
//! | `atlas analyze anomalies --project <name>` | Statements far from the corpus |
//! | `atlas analyze contradictions --project <name>` | Contradictions among similar pairs |
//! | `atlas visualize --project <name>` | 2D/3D projection of the semantic space |
//! | `atlas presets` | List the named semantic-axis presets |
//! | `atlas serve` | Start the analysis API server |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the database
//! atlas init --config ./config/atlas.toml
//!
//! # Ingest a directory of notes
//! atlas ingest docs/*.txt --project research
//!
//! # Cluster the corpus
//! atlas analyze clusters --project research
//!
//! # Project onto semantic axes
//! atlas visualize --project research --method semantic --words theory,practice
//!
//! # The same via a named preset
//! atlas visualize --project research --preset theory-practice
//!
//! # Start the API server
//! atlas serve --config ./config/atlas.toml
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use doc_atlas::{analyze, config, db, embedding, get, ingest, migrate, reduce, server};

/// doc-atlas — document semantic analysis: clusters, similar pairs,
/// anomalies, and 2D/3D corpus visualization.
#[derive(Parser)]
#[command(
    name = "atlas",
    about = "doc-atlas — document semantic analysis over statement embeddings",
    version,
    long_about = "doc-atlas ingests text documents, decomposes them into statements, embeds each \
    statement via a remote embedding API, and derives topical clusters, near-duplicate pairs, \
    anomalies, and a 2D/3D semantic-space visualization per project."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/atlas.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables
    /// (projects, documents, statements, embedding_cache). Idempotent.
    Init,

    /// Ingest documents into a project.
    ///
    /// Reads each file, splits it into statements, embeds them (when an
    /// embedding API key is configured), and stores everything. Files
    /// whose content already exists in the project are skipped.
    Ingest {
        /// Files to ingest.
        files: Vec<PathBuf>,

        /// Project name (created on first use).
        #[arg(long)]
        project: String,

        /// Store statements without embedding them.
        #[arg(long)]
        no_embed: bool,
    },

    /// Retrieve a document by its UUID.
    ///
    /// Prints the document's metadata, full content, and all extracted
    /// statements.
    Get {
        /// Document UUID.
        id: String,
    },

    /// Manage statement embeddings.
    Embed {
        #[command(subcommand)]
        action: EmbedAction,
    },

    /// Run an analysis view over a project.
    Analyze {
        #[command(subcommand)]
        action: AnalyzeAction,
    },

    /// Project the corpus into 2D/3D for visualization.
    Visualize {
        /// Project name.
        #[arg(long)]
        project: String,

        /// Projection method: `pca` or `semantic`.
        #[arg(long)]
        method: Option<String>,

        /// Output dimensions: 2 or 3 (pca only).
        #[arg(long)]
        dimensions: Option<usize>,

        /// Comma-separated anchor words for the semantic method (max 3).
        #[arg(long, conflicts_with = "preset")]
        words: Option<String>,

        /// Named axis preset (see `atlas presets`); implies the semantic
        /// method.
        #[arg(long)]
        preset: Option<String>,

        /// Emit the full response as JSON.
        #[arg(long)]
        json: bool,
    },

    /// List the named semantic-axis presets.
    Presets,

    /// Start the analysis API server.
    Serve,
}

/// Embedding management subcommands.
#[derive(Subcommand)]
enum EmbedAction {
    /// Embed statements that have no embedding yet.
    Pending {
        /// Maximum number of statements to embed in this run.
        #[arg(long)]
        limit: Option<usize>,

        /// Override the batch size from config.
        #[arg(long)]
        batch_size: Option<usize>,
    },
}

/// Analysis subcommands.
#[derive(Subcommand)]
enum AnalyzeAction {
    /// Topical clusters with TF-IDF keywords.
    Clusters {
        #[arg(long)]
        project: String,

        /// Number of clusters; omitted selects k by the elbow method.
        #[arg(long)]
        k: Option<usize>,

        #[arg(long)]
        json: bool,
    },

    /// Near-duplicate statement pairs above a similarity threshold.
    Similar {
        #[arg(long)]
        project: String,

        /// Similarity threshold; omitted uses the configured default.
        #[arg(long)]
        threshold: Option<f64>,

        #[arg(long)]
        json: bool,
    },

    /// Statements far from the mass of the corpus.
    Anomalies {
        #[arg(long)]
        project: String,

        #[arg(long)]
        json: bool,
    },

    /// Contradictions among similar statement pairs.
    Contradictions {
        #[arg(long)]
        project: String,

        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;
            pool.close().await;
            println!("Database initialized successfully.");
        }
        Commands::Ingest {
            files,
            project,
            no_embed,
        } => {
            if files.is_empty() {
                anyhow::bail!("No files to ingest.");
            }

            let pool = db::connect(&cfg).await?;
            let embedder = if no_embed {
                None
            } else {
                let e = analyze::build_embedder(&cfg, &pool);
                if e.is_none() {
                    eprintln!(
                        "Warning: {} not set; statements will be stored unembedded",
                        cfg.embedding.api_key_env
                    );
                }
                e
            };

            let mut added = 0usize;
            let mut skipped = 0usize;
            let mut statements = 0usize;
            let mut pending = 0usize;

            for file in &files {
                let summary = ingest::ingest_file(
                    &pool,
                    &project,
                    file,
                    embedder.as_ref().map(|e| e as &dyn embedding::Embedder),
                )
                .await?;
                added += summary.documents_added;
                skipped += summary.documents_skipped;
                statements += summary.statements_added;
                pending += summary.statements_pending;
            }

            println!("ingest into '{}'", project);
            println!("  documents added: {}", added);
            println!("  documents skipped (duplicate): {}", skipped);
            println!("  statements added: {}", statements);
            if pending > 0 {
                println!("  statements pending embedding: {}", pending);
            }

            pool.close().await;
        }
        Commands::Embed { action } => match action {
            EmbedAction::Pending { limit, batch_size } => {
                let pool = db::connect(&cfg).await?;
                let Some(embedder) = analyze::build_embedder(&cfg, &pool) else {
                    anyhow::bail!(
                        "Embedding requires {} to be set.",
                        cfg.embedding.api_key_env
                    );
                };

                let batch = batch_size.unwrap_or(cfg.embedding.batch_size);
                let (embedded, failed) =
                    ingest::embed_pending(&pool, &embedder, batch, limit).await?;

                println!("embed pending");
                println!("  embedded: {}", embedded);
                println!("  failed: {}", failed);

                pool.close().await;
            }
        },
        Commands::Analyze { action } => match action {
            AnalyzeAction::Clusters { project, k, json } => {
                analyze::run_clusters(&cfg, &project, k, json).await?;
            }
            AnalyzeAction::Similar {
                project,
                threshold,
                json,
            } => {
                analyze::run_similar(&cfg, &project, threshold, json).await?;
            }
            AnalyzeAction::Anomalies { project, json } => {
                analyze::run_anomalies(&cfg, &project, json).await?;
            }
            AnalyzeAction::Contradictions { project, json } => {
                analyze::run_contradictions(&cfg, &project, json).await?;
            }
        },
        Commands::Get { id } => {
            get::run_get(&cfg, &id).await?;
        }
        Commands::Visualize {
            project,
            method,
            dimensions,
            words,
            preset,
            json,
        } => {
            let mut method = method;
            let words: Vec<String> = match preset {
                Some(name) => {
                    let Some(preset) = reduce::default_presets()
                        .into_iter()
                        .find(|p| p.name == name)
                    else {
                        anyhow::bail!("Unknown preset: '{}'. See `atlas presets`.", name);
                    };
                    method = Some("semantic".to_string());
                    preset.words
                }
                None => words
                    .as_deref()
                    .unwrap_or_default()
                    .split(',')
                    .map(|w| w.trim().to_string())
                    .filter(|w| !w.is_empty())
                    .collect(),
            };
            analyze::run_visualize(&cfg, &project, method, dimensions, words, json).await?;
        }
        Commands::Presets => {
            for preset in reduce::default_presets() {
                println!("{}  [{}]", preset.name, preset.words.join(", "));
                println!("    {}", preset.description);
            }
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
