//! Anomaly scoring over statement embeddings.
//!
//! Three detectors, selectable per service instance:
//!
//! - **distance** — mean Euclidean distance to the k nearest neighbors,
//!   min-max normalized to `[0, 1]`.
//! - **isolation** — isolation forest; score `2^(-avgPath/c(sampleSize))`
//!   in `(0, 1]`.
//! - **ensemble** — elementwise mean of the two (the default).
//!
//! The distance detector is deterministic given fixed input. The forest
//! draws its samples and splits from the process RNG, so callers must
//! not assert exact isolation or ensemble scores.

use rand::Rng;

use crate::models::Statement;
use crate::vectors::euclidean;

const EULER_GAMMA: f64 = 0.5772156649;

// ============ Distance detector ============

/// Score each point by its mean distance to the `k` nearest neighbors.
///
/// `k` defaults to 5 when 0 and is clamped to `n - 1`. Raw scores are
/// min-max normalized; if all raw scores are equal every point gets 0.5.
pub fn distance_scores(embeddings: &[Vec<f32>], k: usize) -> Vec<f64> {
    let n = embeddings.len();
    if n == 0 {
        return Vec::new();
    }

    let k = if k == 0 { 5 } else { k }.min(n.saturating_sub(1));

    let mut scores = vec![0.0; n];
    for i in 0..n {
        let mut distances: Vec<f64> = (0..n)
            .filter(|&j| j != i)
            .map(|j| euclidean(&embeddings[i], &embeddings[j]))
            .collect();
        distances.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let actual_k = k.min(distances.len());
        if actual_k > 0 {
            scores[i] = distances[..actual_k].iter().sum::<f64>() / actual_k as f64;
        }
    }

    normalize_scores(scores)
}

/// Min-max normalization to `[0, 1]`; a flat score vector maps to all 0.5.
fn normalize_scores(scores: Vec<f64>) -> Vec<f64> {
    if scores.is_empty() {
        return scores;
    }

    let min = scores.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = scores.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;

    if range == 0.0 {
        return vec![0.5; scores.len()];
    }

    scores.into_iter().map(|s| (s - min) / range).collect()
}

// ============ Isolation forest ============

enum TreeNode {
    Leaf {
        size: usize,
    },
    Split {
        feature: usize,
        value: f64,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
    },
}

/// Isolation forest: an ensemble of randomized trees where anomalous
/// points isolate in fewer splits.
pub struct IsolationForest {
    trees: Vec<TreeNode>,
    num_trees: usize,
    sample_size: usize,
}

impl IsolationForest {
    /// Zero arguments fall back to the defaults (100 trees, sample 256).
    pub fn new(num_trees: usize, sample_size: usize) -> Self {
        Self {
            trees: Vec::new(),
            num_trees: if num_trees == 0 { 100 } else { num_trees },
            sample_size: if sample_size == 0 { 256 } else { sample_size },
        }
    }

    /// Build the forest: each tree is grown on a random subsample of size
    /// min(sample_size, n) up to depth ceil(log2(sample_size)).
    pub fn fit(&mut self, data: &[Vec<f32>]) {
        let n = data.len();
        if n == 0 {
            self.trees = Vec::new();
            return;
        }

        let sample_size = self.sample_size.min(n);
        let max_depth = (sample_size as f64).log2().ceil() as usize;

        let mut rng = rand::thread_rng();
        self.trees = (0..self.num_trees)
            .map(|_| {
                let sample = sample_without_replacement(data, sample_size, &mut rng);
                build_tree(&sample, 0, max_depth, &mut rng)
            })
            .collect();
    }

    /// Anomaly score per point in `(0, 1]`; higher means more isolated.
    pub fn score(&self, data: &[Vec<f32>]) -> Vec<f64> {
        if data.is_empty() || self.trees.is_empty() {
            return Vec::new();
        }

        let c = expected_path_length(self.sample_size as f64);

        data.iter()
            .map(|point| {
                let total: f64 = self
                    .trees
                    .iter()
                    .map(|tree| path_length(point, tree, 0))
                    .sum();
                let avg = total / self.trees.len() as f64;
                2f64.powf(-avg / c)
            })
            .collect()
    }
}

fn build_tree<R: Rng>(data: &[&Vec<f32>], depth: usize, max_depth: usize, rng: &mut R) -> TreeNode {
    let n = data.len();
    if n <= 1 || depth >= max_depth {
        return TreeNode::Leaf { size: n };
    }

    let num_features = data[0].len();
    if num_features == 0 {
        return TreeNode::Leaf { size: n };
    }
    let feature = rng.gen_range(0..num_features);

    let mut min_val = data[0][feature] as f64;
    let mut max_val = min_val;
    for point in data {
        let v = point[feature] as f64;
        if v < min_val {
            min_val = v;
        }
        if v > max_val {
            max_val = v;
        }
    }

    if min_val == max_val {
        return TreeNode::Leaf { size: n };
    }

    let split_value = min_val + rng.gen::<f64>() * (max_val - min_val);

    let (left, right): (Vec<&Vec<f32>>, Vec<&Vec<f32>>) = data
        .iter()
        .copied()
        .partition(|point| (point[feature] as f64) < split_value);

    if left.is_empty() || right.is_empty() {
        return TreeNode::Leaf { size: n };
    }

    TreeNode::Split {
        feature,
        value: split_value,
        left: Box::new(build_tree(&left, depth + 1, max_depth, rng)),
        right: Box::new(build_tree(&right, depth + 1, max_depth, rng)),
    }
}

fn path_length(point: &[f32], node: &TreeNode, depth: usize) -> f64 {
    match node {
        TreeNode::Leaf { size } => depth as f64 + expected_path_length(*size as f64),
        TreeNode::Split {
            feature,
            value,
            left,
            right,
        } => {
            let side = if (point[*feature] as f64) < *value {
                left
            } else {
                right
            };
            path_length(point, side, depth + 1)
        }
    }
}

/// Expected path length of an unsuccessful BST search over n nodes:
/// `c(n) = 2(ln(n-1) + γ) - 2(n-1)/n`, with c(n ≤ 1) = 0 and c(2) = 1.
fn expected_path_length(n: f64) -> f64 {
    if n <= 1.0 {
        return 0.0;
    }
    if n <= 2.0 {
        return 1.0;
    }
    2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
}

fn sample_without_replacement<'a, R: Rng>(
    data: &'a [Vec<f32>],
    sample_size: usize,
    rng: &mut R,
) -> Vec<&'a Vec<f32>> {
    let n = data.len();
    if sample_size >= n {
        return data.iter().collect();
    }

    // Partial Fisher-Yates over the index space
    let mut indices: Vec<usize> = (0..n).collect();
    for i in 0..sample_size {
        let j = rng.gen_range(i..n);
        indices.swap(i, j);
    }

    indices[..sample_size].iter().map(|&i| &data[i]).collect()
}

// ============ Service ============

/// Which detector the service runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorKind {
    Distance,
    Isolation,
    Ensemble,
}

impl DetectorKind {
    /// Parse a config string; unknown values fall back to the ensemble.
    pub fn parse(s: &str) -> Self {
        match s {
            "distance" => Self::Distance,
            "isolation" => Self::Isolation,
            _ => Self::Ensemble,
        }
    }
}

/// An anomaly score for one statement.
#[derive(Debug, Clone)]
pub struct AnomalyResult {
    pub index: usize,
    pub score: f64,
    pub is_anomaly: bool,
    pub text: String,
    pub file: String,
    pub line: i64,
}

/// Anomaly detection over statements with a configured detector and
/// threshold.
pub struct AnomalyService {
    detector: DetectorKind,
    k: usize,
    num_trees: usize,
    sample_size: usize,
    threshold: f64,
}

impl AnomalyService {
    pub fn new(
        detector: DetectorKind,
        k: usize,
        num_trees: usize,
        sample_size: usize,
        threshold: f64,
    ) -> Self {
        Self {
            detector,
            k: if k == 0 { 5 } else { k },
            num_trees: if num_trees == 0 { 100 } else { num_trees },
            sample_size: if sample_size == 0 { 256 } else { sample_size },
            threshold: if threshold <= 0.0 || threshold > 1.0 {
                0.7
            } else {
                threshold
            },
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Update the threshold; values outside (0, 1] are ignored.
    pub fn set_threshold(&mut self, threshold: f64) {
        if threshold > 0.0 && threshold <= 1.0 {
            self.threshold = threshold;
        }
    }

    /// Score every statement; `is_anomaly` flags scores at or above the
    /// threshold.
    pub fn detect_anomalies(&self, statements: &[Statement]) -> Vec<AnomalyResult> {
        if statements.is_empty() {
            return Vec::new();
        }

        let embeddings: Vec<Vec<f32>> =
            statements.iter().map(|s| s.embedding.clone()).collect();

        let scores = match self.detector {
            DetectorKind::Distance => distance_scores(&embeddings, self.k),
            DetectorKind::Isolation => {
                let mut forest = IsolationForest::new(self.num_trees, self.sample_size);
                forest.fit(&embeddings);
                forest.score(&embeddings)
            }
            DetectorKind::Ensemble => self.ensemble_scores(&embeddings),
        };

        statements
            .iter()
            .zip(scores)
            .enumerate()
            .map(|(index, (stmt, score))| AnomalyResult {
                index,
                score,
                is_anomaly: score >= self.threshold,
                text: stmt.text.clone(),
                file: stmt.file.clone(),
                line: stmt.line,
            })
            .collect()
    }

    /// Only the statements flagged as anomalies.
    pub fn get_anomalies(&self, statements: &[Statement]) -> Vec<AnomalyResult> {
        self.detect_anomalies(statements)
            .into_iter()
            .filter(|r| r.is_anomaly)
            .collect()
    }

    fn ensemble_scores(&self, embeddings: &[Vec<f32>]) -> Vec<f64> {
        let dist = distance_scores(embeddings, self.k);

        let mut forest = IsolationForest::new(self.num_trees, self.sample_size);
        forest.fit(embeddings);
        let iso = forest.score(embeddings);

        dist.iter()
            .zip(iso.iter())
            .map(|(d, i)| (d + i) / 2.0)
            .collect()
    }
}
