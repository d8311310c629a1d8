//! # doc-atlas
//!
//! **A document semantic-analysis service.**
//!
//! doc-atlas ingests unstructured text documents, decomposes them into
//! statements, embeds each statement as a high-dimensional vector via a
//! remote embedding API, and derives four analytical views over a
//! project's corpus:
//!
//! 1. **Clusters** — topical groups with TF-IDF keyword summaries.
//! 2. **Similar pairs** — near-duplicate statements above a cosine
//!    similarity threshold.
//! 3. **Anomalies** — statements far from the mass of the corpus, scored
//!    by a k-NN/isolation-forest ensemble.
//! 4. **Visualization** — a 2D/3D projection of the semantic space via
//!    PCA, or onto user-chosen semantic axes.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────────┐   ┌───────────┐
//! │  upload   │──▶│  extract +   │──▶│  SQLite   │
//! │  (text)   │   │  embed       │   │  storage  │
//! └───────────┘   └──────────────┘   └─────┬─────┘
//!                                          │
//!                   ┌──────────────────────┤
//!                   ▼                      ▼
//!              ┌──────────┐         ┌──────────┐
//!              │   CLI    │         │   HTTP   │
//!              │ (atlas)  │         │  (axum)  │
//!              └──────────┘         └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | Core data types: `Project`, `Document`, `Statement` |
//! | [`db`] | SQLite connection pool with WAL mode |
//! | [`migrate`] | Database schema migrations (idempotent) |
//! | [`store`] | Storage collaborator: project-scoped loads, vector BLOBs |
//! | [`get`] | Document retrieval by ID |
//! | [`extract`] | Deterministic statement decomposition |
//! | [`ingest`] | Upload pipeline: dedup → extract → embed → store |
//! | [`vectors`] | Cosine, Euclidean, dot product, coordinate normalization |
//! | [`embedding`] | Batched bounded-concurrency embedding client |
//! | [`cache`] | Advisory embedding cache (memory, SQLite, no-op) |
//! | [`similarity`] | Cosine matrix and threshold pair mining |
//! | [`keywords`] | TF-IDF keyword extraction |
//! | [`clustering`] | K-means with k-means++ init and elbow k selection |
//! | [`anomaly`] | Distance, isolation-forest, and ensemble detectors |
//! | [`reduce`] | PCA and semantic-axis projection |
//! | [`visualize`] | Per-request visualization orchestrator |
//! | [`contradiction`] | Pairwise contradiction classification driver |
//! | [`analyze`] | CLI analysis runners |
//! | [`server`] | JSON analysis API (axum) with CORS |

pub mod analyze;
pub mod anomaly;
pub mod cache;
pub mod clustering;
pub mod config;
pub mod contradiction;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod get;
pub mod ingest;
pub mod keywords;
pub mod migrate;
pub mod models;
pub mod reduce;
pub mod server;
pub mod similarity;
pub mod store;
pub mod vectors;
pub mod visualize;
