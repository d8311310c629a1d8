//! Dimensionality reduction for visualization.
//!
//! Two reducers:
//!
//! - **PCA** — center the n×D embedding matrix, take a thin SVD, and
//!   project onto the leading right singular vectors. Centering before
//!   the SVD is required; the SVD of the raw matrix is not PCA. The sign
//!   of each component depends on the SVD implementation, which is why
//!   downstream code only consumes the min-max normalized projection.
//! - **Semantic axes** — embed user-chosen anchor words and use the dot
//!   product with each anchor embedding as a coordinate.
//!
//! Both normalize output coordinates per dimension to `[-1, 1]`.

use nalgebra::DMatrix;
use serde::Serialize;
use thiserror::Error;

use crate::embedding::{EmbedError, Embedder};
use crate::vectors::{dot_product, normalize_coordinates};

#[derive(Debug, Error)]
pub enum ReduceError {
    #[error("no semantic axes defined")]
    NoAxes,
    #[error("SVD factorization failed")]
    SvdFailed,
    #[error("embedding provider not configured")]
    NotConfigured,
    #[error(transparent)]
    Embed(#[from] EmbedError),
}

// ============ PCA ============

/// Project embeddings to `dims` dimensions with PCA and normalize each
/// output dimension to `[-1, 1]`.
///
/// `dims` is clamped to `min(dims, D, n)`. A degenerate input (a single
/// point, or identical points) produces all-zero coordinates.
pub fn pca_reduce(embeddings: &[Vec<f32>], dims: usize) -> Result<Vec<Vec<f64>>, ReduceError> {
    let projected = pca_project(embeddings, dims)?;
    Ok(normalize_coordinates(&projected))
}

/// PCA projection without the final normalization. Column variances come
/// out in non-increasing order (up to component sign).
pub fn pca_project(embeddings: &[Vec<f32>], dims: usize) -> Result<Vec<Vec<f64>>, ReduceError> {
    if embeddings.is_empty() {
        return Ok(Vec::new());
    }

    let n = embeddings.len();
    let d = embeddings[0].len();
    let dims = dims.min(d).min(n).max(1);

    let mut data = DMatrix::<f64>::zeros(n, d);
    for (i, emb) in embeddings.iter().enumerate() {
        for (j, &v) in emb.iter().enumerate() {
            data[(i, j)] = v as f64;
        }
    }

    // Center each column
    for j in 0..d {
        let mean = data.column(j).mean();
        for i in 0..n {
            data[(i, j)] -= mean;
        }
    }

    let svd = data.clone().svd(false, true);
    let v_t = svd.v_t.ok_or(ReduceError::SvdFailed)?;

    // First `dims` right singular vectors, as a D×dims projection matrix
    let projection = v_t.rows(0, dims).transpose();
    let reduced = &data * &projection;

    Ok((0..n)
        .map(|i| (0..dims).map(|j| reduced[(i, j)]).collect())
        .collect())
}

// ============ Semantic axes ============

/// A user-defined projection axis: an anchor word and its embedding.
#[derive(Debug, Clone, Serialize)]
pub struct SemanticAxis {
    pub word: String,
    #[serde(skip)]
    pub embedding: Vec<f32>,
}

/// A named preset of anchor words.
#[derive(Debug, Clone, Serialize)]
pub struct PresetAxis {
    pub name: String,
    pub description: String,
    pub words: Vec<String>,
}

/// Commonly useful axis presets.
pub fn default_presets() -> Vec<PresetAxis> {
    let preset = |name: &str, description: &str, words: &[&str]| PresetAxis {
        name: name.to_string(),
        description: description.to_string(),
        words: words.iter().map(|w| w.to_string()).collect(),
    };

    vec![
        preset(
            "abstract-concrete",
            "Abstract concepts vs concrete implementations",
            &["abstract", "concrete"],
        ),
        preset(
            "technical-simple",
            "Technical complexity vs simplicity",
            &["technical", "simple"],
        ),
        preset(
            "positive-negative",
            "Positive vs negative sentiment",
            &["positive", "negative"],
        ),
        preset(
            "theory-practice",
            "Theoretical concepts vs practical application",
            &["theory", "practice"],
        ),
    ]
}

/// Embed each anchor word into a semantic axis.
pub async fn find_semantic_axes(
    embedder: &dyn Embedder,
    words: &[String],
) -> Result<Vec<SemanticAxis>, ReduceError> {
    if words.is_empty() {
        return Err(ReduceError::NoAxes);
    }

    let embeddings = embedder.embed_many(words).await?;

    Ok(words
        .iter()
        .zip(embeddings)
        .map(|(word, embedding)| SemanticAxis {
            word: word.clone(),
            embedding,
        })
        .collect())
}

/// Project embeddings onto semantic axes via dot product (unnormalized
/// cosine), then normalize each output dimension to `[-1, 1]`.
pub fn project_to_axes(embeddings: &[Vec<f32>], axes: &[SemanticAxis]) -> Vec<Vec<f64>> {
    if embeddings.is_empty() || axes.is_empty() {
        return Vec::new();
    }

    let raw: Vec<Vec<f64>> = embeddings
        .iter()
        .map(|emb| {
            axes.iter()
                .map(|axis| dot_product(emb, &axis.embedding))
                .collect()
        })
        .collect();

    normalize_coordinates(&raw)
}

// ============ Reducer dispatch ============

/// The reducer variants the orchestrator chooses between.
pub enum Reducer {
    Pca,
    Semantic(Vec<SemanticAxis>),
}

impl Reducer {
    pub fn name(&self) -> &'static str {
        match self {
            Reducer::Pca => "pca",
            Reducer::Semantic(_) => "semantic",
        }
    }

    /// Reduce embeddings to `dims` normalized coordinates. For semantic
    /// reduction only the first `dims` axes are used when more are
    /// supplied.
    pub fn reduce(
        &self,
        embeddings: &[Vec<f32>],
        dims: usize,
    ) -> Result<Vec<Vec<f64>>, ReduceError> {
        match self {
            Reducer::Pca => pca_reduce(embeddings, dims),
            Reducer::Semantic(axes) => {
                if axes.is_empty() {
                    return Err(ReduceError::NoAxes);
                }
                let axes = if dims < axes.len() {
                    &axes[..dims]
                } else {
                    axes
                };
                Ok(project_to_axes(embeddings, axes))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn variance(values: &[f64]) -> f64 {
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n
    }

    #[test]
    fn test_pca_variance_ordering() {
        // Spread mostly along one direction, a little along another.
        let embeddings: Vec<Vec<f32>> = (0..20)
            .map(|i| {
                let t = i as f32;
                vec![t * 10.0, (i % 3) as f32, 0.0]
            })
            .collect();

        let projected = pca_project(&embeddings, 2).unwrap();
        let col0: Vec<f64> = projected.iter().map(|p| p[0]).collect();
        let col1: Vec<f64> = projected.iter().map(|p| p[1]).collect();
        assert!(variance(&col0) >= variance(&col1));
    }

    #[test]
    fn test_pca_output_normalized() {
        let embeddings: Vec<Vec<f32>> = (0..10)
            .map(|i| vec![i as f32, (i * i) as f32, 1.0])
            .collect();
        let reduced = pca_reduce(&embeddings, 2).unwrap();

        assert_eq!(reduced.len(), 10);
        for point in &reduced {
            assert_eq!(point.len(), 2);
            for &c in point {
                assert!((-1.0..=1.0).contains(&c));
            }
        }
        // min-max normalization hits both ends in each non-constant dim
        let xs: Vec<f64> = reduced.iter().map(|p| p[0]).collect();
        assert!(xs.iter().cloned().fold(f64::INFINITY, f64::min) == -1.0);
        assert!(xs.iter().cloned().fold(f64::NEG_INFINITY, f64::max) == 1.0);
    }

    #[test]
    fn test_pca_single_point_degenerates_to_origin() {
        let embeddings = vec![vec![3.0f32, 4.0, 5.0]];
        let reduced = pca_reduce(&embeddings, 2).unwrap();
        assert_eq!(reduced.len(), 1);
        for &c in &reduced[0] {
            assert_eq!(c, 0.0);
        }
    }

    #[test]
    fn test_pca_dims_clamped() {
        let embeddings = vec![vec![1.0f32, 2.0], vec![3.0, 4.0], vec![5.0, 7.0]];
        // Requested 5 dims, but D = 2
        let reduced = pca_reduce(&embeddings, 5).unwrap();
        assert_eq!(reduced[0].len(), 2);
    }

    #[test]
    fn test_pca_empty() {
        assert!(pca_reduce(&[], 2).unwrap().is_empty());
    }

    #[test]
    fn test_project_to_axes_orthogonal() {
        let axes = vec![
            SemanticAxis {
                word: "x".to_string(),
                embedding: vec![1.0, 0.0],
            },
            SemanticAxis {
                word: "y".to_string(),
                embedding: vec![0.0, 1.0],
            },
        ];
        let embeddings = vec![
            vec![2.0, 0.0],
            vec![0.0, 2.0],
            vec![1.0, 1.0],
        ];
        let coords = project_to_axes(&embeddings, &axes);

        // Dot products are (2,0), (0,2), (1,1); after normalization the
        // extremes land on ±1 and the middle on 0.
        assert_eq!(coords[0], vec![1.0, -1.0]);
        assert_eq!(coords[1], vec![-1.0, 1.0]);
        assert_eq!(coords[2], vec![0.0, 0.0]);
    }

    #[test]
    fn test_reducer_semantic_caps_axes_to_dims() {
        let axes: Vec<SemanticAxis> = ["a", "b", "c"]
            .iter()
            .map(|w| SemanticAxis {
                word: w.to_string(),
                embedding: vec![1.0, 0.0],
            })
            .collect();
        let reducer = Reducer::Semantic(axes);
        let coords = reducer
            .reduce(&[vec![1.0, 0.0], vec![0.5, 0.0]], 2)
            .unwrap();
        assert_eq!(coords[0].len(), 2);
    }

    #[test]
    fn test_reducer_semantic_no_axes() {
        let reducer = Reducer::Semantic(Vec::new());
        assert!(matches!(
            reducer.reduce(&[vec![1.0]], 2),
            Err(ReduceError::NoAxes)
        ));
    }

    #[test]
    fn test_reducer_names() {
        assert_eq!(Reducer::Pca.name(), "pca");
        assert_eq!(Reducer::Semantic(Vec::new()).name(), "semantic");
    }

    #[test]
    fn test_presets_fit_axis_limit() {
        for preset in default_presets() {
            assert!(!preset.words.is_empty());
            assert!(preset.words.len() <= 3);
        }
    }

    #[tokio::test]
    async fn test_find_semantic_axes() {
        let embedder = crate::embedding::OfflineEmbedder::new(8);
        let words = vec!["theory".to_string(), "practice".to_string()];
        let axes = find_semantic_axes(&embedder, &words).await.unwrap();
        assert_eq!(axes.len(), 2);
        assert_eq!(axes[0].word, "theory");
        assert_eq!(axes[0].embedding.len(), 8);
    }

    #[tokio::test]
    async fn test_find_semantic_axes_empty() {
        let embedder = crate::embedding::OfflineEmbedder::new(8);
        assert!(matches!(
            find_semantic_axes(&embedder, &[]).await,
            Err(ReduceError::NoAxes)
        ));
    }
}
