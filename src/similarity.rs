//! Pairwise cosine similarity over statement embeddings.
//!
//! Provides the full n×n similarity matrix, threshold-filtered pair
//! mining, and top-k retrieval. All pair output is totally ordered:
//! similarity descending, ties broken by `(i, j)` ascending, so repeated
//! runs over the same corpus produce identical output.
//!
//! Complexity is O(n²·D). The engine operates on the in-memory matrix for
//! a loaded project; it does not attempt approximate nearest neighbors.

use crate::models::Statement;
use crate::vectors::cosine_similarity;
use serde::Serialize;

pub const DEFAULT_THRESHOLD: f64 = 0.75;

/// A pair of similar items with their similarity score. `i < j` always.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarPair {
    pub i: usize,
    pub j: usize,
    pub similarity: f64,
}

/// Compute the full pairwise cosine similarity matrix.
///
/// The matrix is symmetric with diagonal `1.0`; only the upper triangle is
/// computed and the lower triangle mirrors it.
pub fn cosine_matrix(embeddings: &[Vec<f32>]) -> Vec<Vec<f64>> {
    let n = embeddings.len();
    let mut matrix = vec![vec![0.0; n]; n];

    for i in 0..n {
        matrix[i][i] = 1.0;
        for j in (i + 1)..n {
            let sim = cosine_similarity(&embeddings[i], &embeddings[j]);
            matrix[i][j] = sim;
            matrix[j][i] = sim;
        }
    }

    matrix
}

/// Find all pairs with similarity at or above the threshold.
///
/// A threshold of 0 or below selects [`DEFAULT_THRESHOLD`]. Only the upper
/// triangle is scanned, so each unordered pair appears once with `i < j`.
pub fn find_similar_pairs(embeddings: &[Vec<f32>], threshold: f64) -> Vec<SimilarPair> {
    let threshold = if threshold <= 0.0 {
        DEFAULT_THRESHOLD
    } else {
        threshold
    };

    let mut pairs = Vec::new();
    for i in 0..embeddings.len() {
        for j in (i + 1)..embeddings.len() {
            let sim = cosine_similarity(&embeddings[i], &embeddings[j]);
            if sim >= threshold {
                pairs.push(SimilarPair {
                    i,
                    j,
                    similarity: sim,
                });
            }
        }
    }

    sort_pairs(&mut pairs);
    pairs
}

/// Find similar pairs from a precomputed similarity matrix. More efficient
/// when the same matrix is mined at multiple thresholds.
pub fn find_similar_pairs_from_matrix(matrix: &[Vec<f64>], threshold: f64) -> Vec<SimilarPair> {
    let threshold = if threshold <= 0.0 {
        DEFAULT_THRESHOLD
    } else {
        threshold
    };

    let mut pairs = Vec::new();
    for i in 0..matrix.len() {
        for j in (i + 1)..matrix[i].len() {
            if matrix[i][j] >= threshold {
                pairs.push(SimilarPair {
                    i,
                    j,
                    similarity: matrix[i][j],
                });
            }
        }
    }

    sort_pairs(&mut pairs);
    pairs
}

/// The k most similar pairs, regardless of threshold.
pub fn top_k_similar(embeddings: &[Vec<f32>], k: usize) -> Vec<SimilarPair> {
    if embeddings.is_empty() || k == 0 {
        return Vec::new();
    }

    // f64::MIN as the threshold keeps every pair.
    let mut pairs = Vec::new();
    for i in 0..embeddings.len() {
        for j in (i + 1)..embeddings.len() {
            pairs.push(SimilarPair {
                i,
                j,
                similarity: cosine_similarity(&embeddings[i], &embeddings[j]),
            });
        }
    }

    sort_pairs(&mut pairs);
    pairs.truncate(k);
    pairs
}

/// Similarity descending, then (i, j) ascending for deterministic output.
fn sort_pairs(pairs: &mut [SimilarPair]) {
    pairs.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.i.cmp(&b.i))
            .then(a.j.cmp(&b.j))
    });
}

// ============ Statement-level service ============

/// A similar pair resolved against its statements.
#[derive(Debug, Clone, Serialize)]
pub struct SimilarPairResult {
    pub statement1: String,
    pub statement2: String,
    pub statement1_id: String,
    pub statement2_id: String,
    pub file1: String,
    pub file2: String,
    pub line1: i64,
    pub line2: i64,
    pub similarity: f64,
    pub index1: usize,
    pub index2: usize,
}

/// Similarity analysis over statements with a configured default threshold.
pub struct SimilarityService {
    threshold: f64,
}

impl SimilarityService {
    /// A threshold of 0 or below selects [`DEFAULT_THRESHOLD`].
    pub fn new(threshold: f64) -> Self {
        let threshold = if threshold <= 0.0 {
            DEFAULT_THRESHOLD
        } else {
            threshold
        };
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Find similar statement pairs, resolving text, file, and line for
    /// each side. A `threshold` of 0 or below uses the service default.
    pub fn find_similar_statements(
        &self,
        statements: &[Statement],
        threshold: f64,
    ) -> Vec<SimilarPairResult> {
        if statements.is_empty() {
            return Vec::new();
        }

        let threshold = if threshold <= 0.0 {
            self.threshold
        } else {
            threshold
        };

        let embeddings: Vec<Vec<f32>> =
            statements.iter().map(|s| s.embedding.clone()).collect();
        let pairs = find_similar_pairs(&embeddings, threshold);

        pairs
            .into_iter()
            .map(|pair| {
                let s1 = &statements[pair.i];
                let s2 = &statements[pair.j];
                SimilarPairResult {
                    statement1: s1.text.clone(),
                    statement2: s2.text.clone(),
                    statement1_id: s1.id.clone(),
                    statement2_id: s2.id.clone(),
                    file1: s1.file.clone(),
                    file2: s2.file.clone(),
                    line1: s1.line,
                    line2: s2.line,
                    similarity: pair.similarity,
                    index1: pair.i,
                    index2: pair.j,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_at_angle(degrees: f64) -> Vec<f32> {
        let rad = degrees.to_radians();
        vec![rad.cos() as f32, rad.sin() as f32]
    }

    #[test]
    fn test_matrix_diagonal_and_symmetry() {
        let embeddings = vec![
            vec![1.0, 0.0],
            vec![0.0, 1.0],
            vec![1.0, 1.0],
        ];
        let m = cosine_matrix(&embeddings);
        for i in 0..3 {
            assert_eq!(m[i][i], 1.0);
            for j in 0..3 {
                assert_eq!(m[i][j], m[j][i]);
            }
        }
        assert!(m[0][1].abs() < 1e-9);
    }

    #[test]
    fn test_threshold_scenario() {
        // Vectors at 0°, 10°, 90°; threshold 0.75 keeps only (0, 1).
        let embeddings = vec![unit_at_angle(0.0), unit_at_angle(10.0), unit_at_angle(90.0)];
        let pairs = find_similar_pairs(&embeddings, 0.75);
        assert_eq!(pairs.len(), 1);
        assert_eq!((pairs[0].i, pairs[0].j), (0, 1));
        assert!((pairs[0].similarity - 10.0f64.to_radians().cos()).abs() < 1e-6);
    }

    #[test]
    fn test_default_threshold_applied() {
        let embeddings = vec![unit_at_angle(0.0), unit_at_angle(50.0)];
        // cos(50°) ≈ 0.64 < 0.75, so zero-threshold input finds nothing.
        let pairs = find_similar_pairs(&embeddings, 0.0);
        assert!(pairs.is_empty());
    }

    #[test]
    fn test_sorted_descending_with_tie_break() {
        let embeddings = vec![
            vec![1.0, 0.0],
            vec![1.0, 0.0],
            vec![1.0, 0.0],
        ];
        let pairs = find_similar_pairs(&embeddings, 0.5);
        // All similarities are 1.0; ties resolve to (i, j) ascending.
        let order: Vec<(usize, usize)> = pairs.iter().map(|p| (p.i, p.j)).collect();
        assert_eq!(order, vec![(0, 1), (0, 2), (1, 2)]);
    }

    #[test]
    fn test_pairs_from_matrix_match_direct_scan() {
        let embeddings = vec![unit_at_angle(0.0), unit_at_angle(10.0), unit_at_angle(90.0)];
        let matrix = cosine_matrix(&embeddings);
        let direct = find_similar_pairs(&embeddings, 0.75);
        let from_matrix = find_similar_pairs_from_matrix(&matrix, 0.75);
        assert_eq!(direct, from_matrix);
    }

    #[test]
    fn test_all_identical_embeddings() {
        let embeddings = vec![vec![0.5, 0.5]; 4];
        let m = cosine_matrix(&embeddings);
        for row in &m {
            for &v in row {
                assert!((v - 1.0).abs() < 1e-9);
            }
        }
        let pairs = find_similar_pairs(&embeddings, 0.9);
        assert_eq!(pairs.len(), 6); // C(4,2)
    }

    #[test]
    fn test_top_k() {
        let embeddings = vec![unit_at_angle(0.0), unit_at_angle(10.0), unit_at_angle(90.0)];
        let top = top_k_similar(&embeddings, 2);
        assert_eq!(top.len(), 2);
        assert_eq!((top[0].i, top[0].j), (0, 1));
        assert!(top[0].similarity >= top[1].similarity);
    }

    #[test]
    fn test_empty_input() {
        assert!(find_similar_pairs(&[], 0.5).is_empty());
        assert!(cosine_matrix(&[]).is_empty());
        assert!(top_k_similar(&[], 3).is_empty());
    }

    #[test]
    fn test_service_resolves_statements() {
        let statements = vec![
            Statement {
                id: "s1".to_string(),
                document_id: "d1".to_string(),
                text: "alpha".to_string(),
                position: 0,
                line: 1,
                embedding: vec![1.0, 0.0],
                file: "a.txt".to_string(),
            },
            Statement {
                id: "s2".to_string(),
                document_id: "d2".to_string(),
                text: "beta".to_string(),
                position: 0,
                line: 3,
                embedding: vec![1.0, 0.01],
                file: "b.txt".to_string(),
            },
        ];
        let service = SimilarityService::new(0.75);
        let results = service.find_similar_statements(&statements, 0.0);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].statement1, "alpha");
        assert_eq!(results[0].file2, "b.txt");
        assert_eq!(results[0].line2, 3);
    }
}
