use rand::seq::index;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::debug;

pub const DEFAULT_MAX_ITERATIONS: usize = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KMeansParams {
    pub max_iterations: usize,
    pub seed: u64,
}

impl Default for KMeansParams {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KMeansOutcome {
    /// 0-based cluster label per input row.
    pub labels: Vec<usize>,
    pub iterations: usize,
    pub converged: bool,
}

pub fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Lloyd's k-means with seeded random initialization.
///
/// `k` is clamped to `1..=rows.len()`. Initial centroids are `k` distinct rows
/// sampled without replacement; a cluster left empty after an assignment pass
/// is reseeded from a random row drawn from the same generator. Rows are
/// assumed to share one width.
pub fn kmeans(rows: &[Vec<f64>], k: usize, params: KMeansParams) -> KMeansOutcome {
    let n = rows.len();
    if n == 0 {
        return KMeansOutcome {
            labels: Vec::new(),
            iterations: 0,
            converged: true,
        };
    }

    let dims = rows[0].len();
    if dims == 0 {
        return KMeansOutcome {
            labels: vec![0; n],
            iterations: 0,
            converged: true,
        };
    }

    let k = k.clamp(1, n);
    let mut rng = ChaCha8Rng::seed_from_u64(params.seed);
    let mut centroids: Vec<Vec<f64>> = index::sample(&mut rng, n, k)
        .into_iter()
        .map(|i| rows[i].clone())
        .collect();

    // usize::MAX marks "not yet assigned" so the first pass always counts as a change.
    let mut labels = vec![usize::MAX; n];
    let mut iterations = 0;
    let mut converged = false;

    while iterations < params.max_iterations {
        iterations += 1;
        let mut changed = false;

        for (row, label) in rows.iter().zip(labels.iter_mut()) {
            let nearest = nearest_centroid(row, &centroids);
            if *label != nearest {
                *label = nearest;
                changed = true;
            }
        }

        let mut sums = vec![vec![0.0; dims]; k];
        let mut counts = vec![0usize; k];
        for (row, &label) in rows.iter().zip(&labels) {
            counts[label] += 1;
            for (sum, value) in sums[label].iter_mut().zip(row) {
                *sum += value;
            }
        }

        for (cluster, centroid) in centroids.iter_mut().enumerate() {
            if counts[cluster] == 0 {
                let pick = rng.gen_range(0..n);
                debug!(cluster, row = pick, "reseeding empty cluster");
                *centroid = rows[pick].clone();
            } else {
                let count = counts[cluster] as f64;
                *centroid = sums[cluster].iter().map(|s| s / count).collect();
            }
        }

        if !changed {
            converged = true;
            break;
        }
    }

    KMeansOutcome {
        labels,
        iterations,
        converged,
    }
}

/// Index of the closest centroid; ties go to the lowest index.
fn nearest_centroid(row: &[f64], centroids: &[Vec<f64>]) -> usize {
    let mut best = 0;
    let mut best_distance = squared_distance(row, &centroids[0]);
    for (index, centroid) in centroids.iter().enumerate().skip(1) {
        let distance = squared_distance(row, centroid);
        if distance < best_distance {
            best_distance = distance;
            best = index;
        }
    }
    best
}
