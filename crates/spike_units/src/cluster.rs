//! Unsupervised clustering of feature matrices.

use std::fmt;

use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};
use spike_types::Labels;

use crate::error::{UnitError, UnitResult};

fn default_max_iter() -> usize {
    100
}

/// Clustering algorithm and its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum ClusterMethod {
    /// Lloyd's k-means with k-means++ seeding.
    KMeans {
        k: usize,
        #[serde(default = "default_max_iter")]
        max_iter: usize,
    },
}

impl ClusterMethod {
    pub fn k_means(k: usize) -> Self {
        ClusterMethod::KMeans {
            k,
            max_iter: default_max_iter(),
        }
    }

    /// Looks a method up by identifier, e.g. `"k_means"`.
    pub fn from_name(name: &str, k: usize) -> UnitResult<Self> {
        match name {
            "k_means" | "kmeans" => Ok(Self::k_means(k)),
            other => Err(UnitError::BadParam(format!("unknown clustering method '{other}'"))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ClusterMethod::KMeans { .. } => "k_means",
        }
    }

    pub fn n_clusters(&self) -> usize {
        match self {
            ClusterMethod::KMeans { k, .. } => *k,
        }
    }
}

impl fmt::Display for ClusterMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterMethod::KMeans { k, .. } => write!(f, "k_means(k={k})"),
        }
    }
}

/// Labels every row of `features` with a cluster id in `1..=k`.
pub fn cluster<R: Rng>(
    features: ArrayView2<'_, f64>,
    method: &ClusterMethod,
    rng: &mut R,
) -> UnitResult<Labels> {
    match method {
        ClusterMethod::KMeans { k, max_iter } => k_means(features, *k, *max_iter, rng),
    }
}

fn sq_dist(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Lloyd's algorithm; empty clusters are re-seeded with the point farthest
/// from its centroid so every label in `1..=k` stays populated.
pub fn k_means<R: Rng>(
    data: ArrayView2<'_, f64>,
    k: usize,
    max_iter: usize,
    rng: &mut R,
) -> UnitResult<Labels> {
    let (n, dims) = data.dim();
    if n == 0 || dims == 0 {
        return Err(UnitError::EmptyInput(format!(
            "cannot cluster a {n}x{dims} feature matrix"
        )));
    }
    if k == 0 || k > n {
        return Err(UnitError::BadParam(format!(
            "k must be in 1..={n}, got {k}"
        )));
    }

    let mut centers = seed_centers(data, k, rng);
    let mut assignment = vec![usize::MAX; n];

    for iter in 0..max_iter.max(1) {
        let mut changed = false;
        for (i, row) in data.axis_iter(Axis(0)).enumerate() {
            let best = nearest(&centers, row).0;
            if assignment[i] != best {
                assignment[i] = best;
                changed = true;
            }
        }
        if !changed {
            tracing::trace!(iter, "k-means converged");
            break;
        }

        let mut sums = Array2::<f64>::zeros((k, dims));
        let mut counts = vec![0usize; k];
        for (i, row) in data.axis_iter(Axis(0)).enumerate() {
            let c = assignment[i];
            counts[c] += 1;
            let mut sum = sums.row_mut(c);
            sum += &row;
        }

        for c in 0..k {
            if counts[c] > 0 {
                let mean = sums.row(c).mapv(|x| x / counts[c] as f64);
                centers.row_mut(c).assign(&mean);
                continue;
            }
            // Steal the point farthest from its own centroid.
            let far = (0..n)
                .filter(|&i| counts[assignment[i]] > 1)
                .max_by(|&a, &b| {
                    let da = sq_dist(data.row(a), centers.row(assignment[a]));
                    let db = sq_dist(data.row(b), centers.row(assignment[b]));
                    da.total_cmp(&db)
                });
            if let Some(i) = far {
                counts[assignment[i]] -= 1;
                counts[c] = 1;
                assignment[i] = c;
                centers.row_mut(c).assign(&data.row(i));
            }
        }
    }

    Ok(assignment.into_iter().map(|c| c as u32 + 1).collect())
}

/// k-means++ seeding.
fn seed_centers<R: Rng>(data: ArrayView2<'_, f64>, k: usize, rng: &mut R) -> Array2<f64> {
    let n = data.nrows();
    let mut centers = Array2::zeros((k, data.ncols()));
    centers.row_mut(0).assign(&data.row(rng.gen_range(0..n)));

    let mut d2: Vec<f64> = data
        .axis_iter(Axis(0))
        .map(|row| sq_dist(row, centers.row(0)))
        .collect();

    for c in 1..k {
        let total: f64 = d2.iter().sum();
        let pick = if total > 0.0 {
            let mut target = rng.gen::<f64>() * total;
            let mut chosen = n - 1;
            for (i, &w) in d2.iter().enumerate() {
                if target < w {
                    chosen = i;
                    break;
                }
                target -= w;
            }
            chosen
        } else {
            rng.gen_range(0..n)
        };
        centers.row_mut(c).assign(&data.row(pick));
        for (i, row) in data.axis_iter(Axis(0)).enumerate() {
            d2[i] = d2[i].min(sq_dist(row, centers.row(c)));
        }
    }
    centers
}

fn nearest(centers: &Array2<f64>, row: ArrayView1<'_, f64>) -> (usize, f64) {
    centers
        .axis_iter(Axis(0))
        .map(|center| sq_dist(row, center))
        .enumerate()
        .fold((0, f64::INFINITY), |best, (c, d)| if d < best.1 { (c, d) } else { best })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{concatenate, Array2};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::StandardNormal;

    #[test]
    fn test_two_constant_blocks_split() {
        let data = concatenate(
            Axis(0),
            &[Array2::<f64>::zeros((100, 2)).view(), Array2::<f64>::ones((100, 2)).view()],
        )
        .unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let labels = k_means(data.view(), 2, 100, &mut rng).unwrap();

        let first = labels[0];
        let second = labels[100];
        assert_ne!(first, second);
        assert!(labels[..100].iter().all(|&l| l == first));
        assert!(labels[100..].iter().all(|&l| l == second));
        let mut ids = vec![first, second];
        ids.sort();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_all_clusters_populated() {
        let mut rng = StdRng::seed_from_u64(3);
        let data = Array2::from_shape_fn((100, 2), |_| rng.sample::<f64, _>(StandardNormal));
        let labels = k_means(data.view(), 5, 100, &mut rng).unwrap();
        for label in 1..=5 {
            assert!(labels.contains(&label), "label {label} is empty");
        }
    }

    #[test]
    fn test_identical_points_terminate() {
        let data = Array2::<f64>::from_elem((10, 1), 100.0);
        let mut rng = StdRng::seed_from_u64(1);
        let labels = k_means(data.view(), 2, 20, &mut rng).unwrap();
        assert_eq!(labels.len(), 10);
    }

    #[test]
    fn test_rejects_bad_k() {
        let data = Array2::<f64>::zeros((3, 2));
        let mut rng = StdRng::seed_from_u64(1);
        assert!(k_means(data.view(), 0, 10, &mut rng).is_err());
        assert!(k_means(data.view(), 4, 10, &mut rng).is_err());
        let empty = Array2::<f64>::zeros((0, 2));
        assert!(matches!(
            k_means(empty.view(), 1, 10, &mut rng),
            Err(UnitError::EmptyInput(_))
        ));
    }

    #[test]
    fn test_method_lookup() {
        let method = ClusterMethod::from_name("k_means", 3).unwrap();
        assert_eq!(method.n_clusters(), 3);
        assert_eq!(method.to_string(), "k_means(k=3)");
        assert!(ClusterMethod::from_name("gmm", 3).is_err());
    }
}
