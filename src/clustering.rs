//! K-means clustering with k-means++ initialization and elbow-based k
//! selection.
//!
//! Two public entry points on [`ClusteringService`]: clustering on raw
//! embeddings (D-dimensional centroids) and clustering on projected 2D/3D
//! coordinates, used by the visualization orchestrator where running
//! k-means over the full embedding matrix would dominate request latency.
//!
//! Initialization is seeded from the data itself (size, dimensionality,
//! and three sampled values), so two fits over the same corpus produce
//! identical labels without any external seed plumbing.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::keywords::{Keyword, KeywordExtractor};
use crate::models::Statement;
use crate::vectors::squared_euclidean;

const MAX_ITER: usize = 100;
const TOLERANCE: f64 = 1e-4;

/// K-means clusterer. Holds the fitted centroids, labels, and inertia
/// after [`KMeans::fit`].
pub struct KMeans {
    pub k: usize,
    pub centroids: Vec<Vec<f64>>,
    pub labels: Vec<usize>,
    pub inertia: f64,
}

impl KMeans {
    pub fn new(k: usize) -> Self {
        Self {
            k,
            centroids: Vec::new(),
            labels: Vec::new(),
            inertia: 0.0,
        }
    }

    /// Cluster the data and return per-point labels in `[0, k)`.
    ///
    /// `k` is silently clamped to the number of points. Iterates
    /// assignment/update until the inertia change drops below tolerance
    /// or `MAX_ITER` is reached. Empty clusters keep their previous
    /// centroid.
    pub fn fit(&mut self, data: &[Vec<f64>]) -> &[usize] {
        let n = data.len();
        if n == 0 || self.k == 0 {
            self.labels = Vec::new();
            return &self.labels;
        }

        let k = self.k.min(n);
        let dim = data[0].len();

        self.centroids = kmeans_plus_plus_init(data, k);
        self.labels = vec![0; n];

        let mut prev_inertia = 0.0;
        for iter in 0..MAX_ITER {
            // Assignment step
            self.inertia = 0.0;
            for (i, point) in data.iter().enumerate() {
                let mut min_dist = f64::MAX;
                let mut min_idx = 0;
                for (j, centroid) in self.centroids.iter().enumerate() {
                    let dist = squared_euclidean(point, centroid);
                    if dist < min_dist {
                        min_dist = dist;
                        min_idx = j;
                    }
                }
                self.labels[i] = min_idx;
                self.inertia += min_dist;
            }

            if iter > 0 && (prev_inertia - self.inertia).abs() < TOLERANCE {
                break;
            }
            prev_inertia = self.inertia;

            // Update step
            let mut counts = vec![0usize; k];
            let mut sums = vec![vec![0.0; dim]; k];
            for (point, &label) in data.iter().zip(self.labels.iter()) {
                counts[label] += 1;
                for (s, v) in sums[label].iter_mut().zip(point.iter()) {
                    *s += v;
                }
            }

            for (j, count) in counts.iter().enumerate() {
                if *count > 0 {
                    for s in sums[j].iter_mut() {
                        *s /= *count as f64;
                    }
                    self.centroids[j] = std::mem::take(&mut sums[j]);
                }
                // count == 0: keep the previous centroid
            }
        }

        &self.labels
    }
}

/// k-means++ initialization: first centroid uniform, each subsequent
/// centroid drawn with probability proportional to squared distance to
/// the nearest already-chosen centroid.
fn kmeans_plus_plus_init(data: &[Vec<f64>], k: usize) -> Vec<Vec<f64>> {
    let n = data.len();
    let mut rng = StdRng::seed_from_u64(compute_data_seed(data));
    let mut centroids: Vec<Vec<f64>> = Vec::with_capacity(k);

    let first = rng.gen_range(0..n);
    centroids.push(data[first].clone());

    let mut distances = vec![0.0; n];
    for _ in 1..k {
        let mut total_dist = 0.0;
        for (j, point) in data.iter().enumerate() {
            let mut min_dist = f64::MAX;
            for centroid in &centroids {
                let dist = squared_euclidean(point, centroid);
                if dist < min_dist {
                    min_dist = dist;
                }
            }
            distances[j] = min_dist;
            total_dist += min_dist;
        }

        // Cumulative D² sampling. `cum_sum >= r` guarantees a point at
        // zero distance (an existing centroid) is never drawn again.
        let r = rng.gen::<f64>() * total_dist;
        let mut cum_sum = 0.0;
        for (j, &d) in distances.iter().enumerate() {
            cum_sum += d;
            if cum_sum >= r {
                centroids.push(data[j].clone());
                break;
            }
        }
    }

    centroids
}

/// Deterministic seed derived from the data: size, dimensionality, and
/// three sampled values mixed into an integer.
fn compute_data_seed(data: &[Vec<f64>]) -> u64 {
    if data.is_empty() {
        return 42;
    }

    let mut seed = data.len() as i64;
    if !data[0].is_empty() {
        seed = seed.wrapping_add((data[0].len() as i64).wrapping_mul(1000));
        seed = seed.wrapping_add((data[0][0] * 1_000_000.0) as i64);
        if data.len() > 1 {
            seed = seed.wrapping_add((data[data.len() / 2][0] * 1_000_000.0) as i64);
        }
        if data.len() > 2 {
            seed = seed.wrapping_add((data[data.len() - 1][0] * 1_000_000.0) as i64);
        }
    }
    seed as u64
}

/// Fit k = 1..=max_k and return the inertia curve.
pub fn elbow_method(data: &[Vec<f64>], max_k: usize) -> Vec<f64> {
    let max_k = if max_k == 0 { 10 } else { max_k }.min(data.len());

    let mut inertias = Vec::with_capacity(max_k);
    for k in 1..=max_k {
        let mut km = KMeans::new(k);
        km.fit(data);
        inertias.push(km.inertia);
    }
    inertias
}

/// Pick the elbow of an inertia curve: the interior point farthest from
/// the chord connecting the first and last points after normalizing the
/// curve into the unit square. Returns a 1-indexed k; a curve of two or
/// fewer points returns its length. The far endpoint itself can never be
/// selected.
pub fn find_elbow(inertias: &[f64]) -> usize {
    let n = inertias.len();
    if n <= 2 {
        return n;
    }

    let x_range = (n - 1) as f64;
    let y_range = inertias[0] - inertias[n - 1];

    let mut max_dist = 0.0;
    let mut elbow = 1;

    for i in 1..n - 1 {
        let x0 = i as f64 / x_range;
        let y0 = if y_range != 0.0 {
            (inertias[i] - inertias[n - 1]) / y_range
        } else {
            0.0
        };

        // Distance to the line through (0, 1) and (1, 0)
        let dist = (1.0 - x0 - y0).abs() / std::f64::consts::SQRT_2;
        if dist > max_dist {
            max_dist = dist;
            elbow = i + 1;
        }
    }

    elbow
}

// ============ Statement-level service ============

/// A cluster with derived metadata. The centroid dimensionality matches
/// the clustering input: D for embeddings, 2 or 3 for projected
/// coordinates.
#[derive(Debug, Clone)]
pub struct Cluster {
    pub id: usize,
    pub centroid: Vec<f64>,
    pub size: usize,
    pub keywords: Vec<Keyword>,
    pub density: f64,
}

/// Result of a clustering run.
#[derive(Debug, Clone, Default)]
pub struct ClusterResult {
    pub clusters: Vec<Cluster>,
    pub labels: Vec<usize>,
    pub k: usize,
    pub inertia: f64,
}

/// Clustering over statements or projected coordinates, with TF-IDF
/// keyword summaries per cluster.
pub struct ClusteringService {
    extractor: KeywordExtractor,
    default_k: usize,
    keywords_per_cluster: usize,
}

impl ClusteringService {
    pub fn new(default_k: usize, keywords_per_cluster: usize) -> Self {
        Self {
            extractor: KeywordExtractor::new(),
            default_k: if default_k == 0 { 5 } else { default_k },
            keywords_per_cluster: if keywords_per_cluster == 0 {
                5
            } else {
                keywords_per_cluster
            },
        }
    }

    /// Cluster statements in embedding space. `k == 0` uses the
    /// configured default; k is clamped to the statement count.
    pub fn cluster_statements(&self, statements: &[Statement], k: usize) -> ClusterResult {
        if statements.is_empty() {
            return ClusterResult::default();
        }

        let data: Vec<Vec<f64>> = statements
            .iter()
            .map(|s| s.embedding.iter().map(|&v| v as f64).collect())
            .collect();
        let texts: Vec<String> = statements.iter().map(|s| s.text.clone()).collect();

        let k = if k == 0 { self.default_k } else { k }.min(statements.len());
        self.cluster_data(&data, &texts, k)
    }

    /// Cluster statements in embedding space with k chosen by the elbow
    /// method over `1..=max_k`.
    pub fn auto_cluster(&self, statements: &[Statement], max_k: usize) -> ClusterResult {
        if statements.is_empty() {
            return ClusterResult::default();
        }

        let data: Vec<Vec<f64>> = statements
            .iter()
            .map(|s| s.embedding.iter().map(|&v| v as f64).collect())
            .collect();
        let texts: Vec<String> = statements.iter().map(|s| s.text.clone()).collect();

        let optimal_k = find_elbow(&elbow_method(&data, max_k));
        self.cluster_data(&data, &texts, optimal_k)
    }

    /// Cluster projected 2D/3D coordinates with k chosen by the elbow
    /// method. Centroids come out in coordinate space. The visualization
    /// orchestrator uses this entry point; full-embedding k-means over a
    /// thousand points would dwarf the projection cost.
    pub fn auto_cluster_coordinates(
        &self,
        coords: &[Vec<f64>],
        texts: &[String],
        max_k: usize,
    ) -> ClusterResult {
        if coords.is_empty() {
            return ClusterResult::default();
        }

        let optimal_k = find_elbow(&elbow_method(coords, max_k));
        self.cluster_data(coords, texts, optimal_k)
    }

    fn cluster_data(&self, data: &[Vec<f64>], texts: &[String], k: usize) -> ClusterResult {
        let k = k.max(1).min(data.len());

        let mut km = KMeans::new(k);
        km.fit(data);
        let labels = km.labels.clone();

        let keywords =
            self.extractor
                .extract_cluster_keywords(texts, &labels, k, self.keywords_per_cluster);

        let mut sizes = vec![0usize; k];
        for &label in &labels {
            sizes[label] += 1;
        }

        let clusters = (0..k)
            .map(|id| Cluster {
                id,
                centroid: km.centroids[id].clone(),
                size: sizes[id],
                keywords: keywords[id].clone(),
                density: compute_density(data, &labels, id, &km.centroids[id]),
            })
            .collect();

        ClusterResult {
            clusters,
            labels,
            k,
            inertia: km.inertia,
        }
    }
}

/// Density = reciprocal of the mean squared distance of members to the
/// centroid. A cluster whose members coincide with the centroid has
/// density 1.0; an empty cluster has density 0.0.
fn compute_density(data: &[Vec<f64>], labels: &[usize], cluster_id: usize, centroid: &[f64]) -> f64 {
    let mut total = 0.0;
    let mut count = 0usize;

    for (point, &label) in data.iter().zip(labels.iter()) {
        if label == cluster_id {
            total += squared_euclidean(point, centroid);
            count += 1;
        }
    }

    if count == 0 {
        return 0.0;
    }

    let avg = total / count as f64;
    if avg == 0.0 {
        1.0
    } else {
        1.0 / avg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(points: &[[f64; 2]]) -> Vec<Vec<f64>> {
        points.iter().map(|p| p.to_vec()).collect()
    }

    #[test]
    fn test_k_clamped_to_n() {
        // 3 points, k = 5: every point becomes its own cluster.
        let data = rows(&[[0.0, 0.0], [10.0, 0.0], [0.0, 10.0]]);
        let mut km = KMeans::new(5);
        let labels = km.fit(&data).to_vec();

        let mut distinct: Vec<usize> = labels.clone();
        distinct.sort();
        distinct.dedup();
        assert_eq!(distinct.len(), 3);
        assert!(labels.iter().all(|&l| l < 3));
        assert_eq!(km.inertia, 0.0);
    }

    #[test]
    fn test_two_obvious_clusters() {
        let data = rows(&[
            [0.0, 0.0],
            [0.1, 0.0],
            [0.0, 0.1],
            [10.0, 10.0],
            [10.1, 10.0],
            [10.0, 10.1],
        ]);
        let mut km = KMeans::new(2);
        let labels = km.fit(&data).to_vec();

        assert_eq!(labels[0], labels[1]);
        assert_eq!(labels[1], labels[2]);
        assert_eq!(labels[3], labels[4]);
        assert_eq!(labels[4], labels[5]);
        assert_ne!(labels[0], labels[3]);
    }

    #[test]
    fn test_deterministic_across_fits() {
        let data: Vec<Vec<f64>> = (0..40)
            .map(|i| vec![(i % 7) as f64, (i % 11) as f64, (i % 3) as f64])
            .collect();

        let mut km1 = KMeans::new(4);
        let labels1 = km1.fit(&data).to_vec();
        let mut km2 = KMeans::new(4);
        let labels2 = km2.fit(&data).to_vec();

        assert_eq!(labels1, labels2);
        assert_eq!(km1.inertia, km2.inertia);
        assert_eq!(km1.centroids, km2.centroids);
    }

    #[test]
    fn test_data_seed_varies_with_data() {
        let a = rows(&[[1.0, 2.0], [3.0, 4.0]]);
        let b = rows(&[[5.0, 2.0], [3.0, 4.0]]);
        assert_ne!(compute_data_seed(&a), compute_data_seed(&b));
        assert_eq!(compute_data_seed(&a), compute_data_seed(&a));
        assert_eq!(compute_data_seed(&[]), 42);
    }

    #[test]
    fn test_empty_and_zero_k() {
        let mut km = KMeans::new(0);
        assert!(km.fit(&rows(&[[1.0, 1.0]])).is_empty());

        let mut km = KMeans::new(3);
        assert!(km.fit(&[]).is_empty());
    }

    #[test]
    fn test_elbow_scenario() {
        let inertias = vec![100.0, 50.0, 20.0, 18.0, 17.0, 16.5];
        assert_eq!(find_elbow(&inertias), 3);
    }

    #[test]
    fn test_elbow_short_curves() {
        assert_eq!(find_elbow(&[]), 0);
        assert_eq!(find_elbow(&[10.0]), 1);
        assert_eq!(find_elbow(&[10.0, 5.0]), 2);
    }

    #[test]
    fn test_elbow_cannot_pick_last_k() {
        // The far endpoint anchors the reference chord and is excluded.
        let inertias = vec![100.0, 90.0, 80.0, 1.0];
        assert!(find_elbow(&inertias) < inertias.len());
    }

    #[test]
    fn test_elbow_method_curve_length() {
        let data: Vec<Vec<f64>> = (0..6).map(|i| vec![i as f64]).collect();
        let inertias = elbow_method(&data, 10);
        // max_k clamps to n
        assert_eq!(inertias.len(), 6);
        // k = 1 captures all the spread; k = n isolates every point
        assert!(inertias[0] > 0.0);
        assert!(*inertias.last().unwrap() <= inertias[0]);
        assert_eq!(*inertias.last().unwrap(), 0.0);
    }

    fn statements_from(points: &[[f32; 2]], texts: &[&str]) -> Vec<Statement> {
        points
            .iter()
            .zip(texts.iter())
            .enumerate()
            .map(|(i, (p, t))| Statement {
                id: format!("s{}", i),
                document_id: "d".to_string(),
                text: t.to_string(),
                position: i as i64,
                line: i as i64 + 1,
                embedding: p.to_vec(),
                file: "f.txt".to_string(),
            })
            .collect()
    }

    #[test]
    fn test_cluster_statements_metadata() {
        let statements = statements_from(
            &[[0.0, 0.0], [0.1, 0.0], [10.0, 10.0], [10.1, 10.0]],
            &[
                "database schema design",
                "database index tuning",
                "turtle sleeps today",
                "green turtle sleeps",
            ],
        );
        let service = ClusteringService::new(5, 5);
        let result = service.cluster_statements(&statements, 2);

        assert_eq!(result.k, 2);
        assert_eq!(result.labels.len(), 4);
        assert_eq!(result.clusters.len(), 2);

        let total: usize = result.clusters.iter().map(|c| c.size).sum();
        assert_eq!(total, 4);

        for c in &result.clusters {
            assert_eq!(c.centroid.len(), 2);
            assert!(c.density > 0.0);
        }

        // The turtle cluster keyword set mentions turtles
        let turtle_cluster = result.clusters[result.labels[2]].clone();
        assert!(turtle_cluster
            .keywords
            .iter()
            .any(|k| k.word == "turtle" || k.word == "sleeps"));
    }

    #[test]
    fn test_singleton_cluster_density() {
        let statements = statements_from(&[[1.0, 1.0]], &["only statement"]);
        let service = ClusteringService::new(5, 5);
        let result = service.cluster_statements(&statements, 3);

        assert_eq!(result.k, 1);
        assert_eq!(result.labels, vec![0]);
        assert_eq!(result.clusters[0].size, 1);
        // A member at the centroid gives density 1.0
        assert_eq!(result.clusters[0].density, 1.0);
    }

    #[test]
    fn test_auto_cluster_coordinates_dimension() {
        let coords: Vec<Vec<f64>> = (0..30)
            .map(|i| {
                if i < 15 {
                    vec![0.0 + (i as f64) * 0.01, 0.0]
                } else {
                    vec![1.0 + (i as f64) * 0.01, 1.0]
                }
            })
            .collect();
        let texts: Vec<String> = (0..30).map(|i| format!("statement {}", i)).collect();

        let service = ClusteringService::new(5, 5);
        let result = service.auto_cluster_coordinates(&coords, &texts, 10);

        assert_eq!(result.labels.len(), 30);
        assert!(result.k >= 1);
        for c in &result.clusters {
            // Centroids live in coordinate space
            assert_eq!(c.centroid.len(), 2);
        }
    }
}
