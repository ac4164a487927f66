//! Principal component analysis on a small dense covariance matrix.

use ndarray::{Array1, Array2, ArrayView2, Axis};

use crate::error::{UnitError, UnitResult};

const MAX_SWEEPS: usize = 100;
const TOLERANCE: f64 = 1e-12;

/// Result of [`pca`].
#[derive(Debug, Clone)]
pub struct Pca {
    /// Eigenvalues of the covariance matrix, in descending order.
    pub eigenvalues: Array1<f64>,
    /// Eigenvectors as columns, ordered like `eigenvalues`.
    pub eigenvectors: Array2<f64>,
    /// Whitened projection of the data on the leading components,
    /// shaped `(ncomps, n_obs)`.
    pub scores: Array2<f64>,
}

/// Principal component analysis of a `(n_vars, n_obs)` matrix.
///
/// The projection is `V[:, :n]ᵀ / sqrt(λ[:n]) · data`. Components with a
/// vanishing eigenvalue are projected without whitening.
pub fn pca(data: ArrayView2<'_, f64>, ncomps: usize) -> UnitResult<Pca> {
    let (n_vars, n_obs) = data.dim();
    if n_obs < 2 {
        return Err(UnitError::EmptyInput(format!(
            "PCA needs at least 2 observations, got {n_obs}"
        )));
    }
    if ncomps == 0 || ncomps > n_vars {
        return Err(UnitError::BadParam(format!(
            "ncomps must be in 1..={n_vars}, got {ncomps}"
        )));
    }

    let cov = covariance(data);
    let (eigenvalues, eigenvectors) = eigen_symmetric(cov)?;

    let mut scores = Array2::zeros((ncomps, n_obs));
    for i in 0..ncomps {
        let ev = eigenvalues[i];
        let scale = if ev > f64::EPSILON { ev.sqrt() } else { 1.0 };
        let component = eigenvectors.column(i);
        let projected = component.dot(&data) / scale;
        scores.row_mut(i).assign(&projected);
    }

    Ok(Pca {
        eigenvalues,
        eigenvectors,
        scores,
    })
}

/// Sample covariance of the rows of `data` (variables in rows).
fn covariance(data: ArrayView2<'_, f64>) -> Array2<f64> {
    let n_obs = data.ncols() as f64;
    let mean = data.mean_axis(Axis(1)).unwrap_or_else(|| Array1::zeros(data.nrows()));
    let centered = &data - &mean.insert_axis(Axis(1));
    centered.dot(&centered.t()) / (n_obs - 1.0)
}

/// Cyclic Jacobi eigen decomposition of a symmetric matrix.
///
/// Returns eigenvalues sorted descending and the matching eigenvectors as
/// columns.
fn eigen_symmetric(mut a: Array2<f64>) -> UnitResult<(Array1<f64>, Array2<f64>)> {
    let n = a.nrows();
    let mut v = Array2::eye(n);

    let mut converged = n < 2;
    for _sweep in 0..MAX_SWEEPS {
        if converged {
            break;
        }
        let off: f64 = (0..n)
            .flat_map(|p| ((p + 1)..n).map(move |q| (p, q)))
            .map(|(p, q)| a[[p, q]] * a[[p, q]])
            .sum();
        let scale: f64 = a.diag().iter().map(|d| d * d).sum::<f64>().max(1.0);
        if off <= TOLERANCE * scale {
            converged = true;
            break;
        }

        for p in 0..n {
            for q in (p + 1)..n {
                let apq = a[[p, q]];
                if apq.abs() < f64::MIN_POSITIVE {
                    continue;
                }
                let theta = (a[[q, q]] - a[[p, p]]) / (2.0 * apq);
                let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;
                rotate(&mut a, &mut v, p, q, c, s);
            }
        }
    }
    if !converged {
        return Err(UnitError::NoConvergence(MAX_SWEEPS));
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&i, &j| a[[j, j]].total_cmp(&a[[i, i]]));

    let eigenvalues = Array1::from_iter(order.iter().map(|&i| a[[i, i]]));
    let eigenvectors = v.select(Axis(1), &order);
    Ok((eigenvalues, eigenvectors))
}

/// Applies `A ← Jᵀ A J` and `V ← V J` for the rotation in plane `(p, q)`.
fn rotate(a: &mut Array2<f64>, v: &mut Array2<f64>, p: usize, q: usize, c: f64, s: f64) {
    let n = a.nrows();
    for k in 0..n {
        let (akp, akq) = (a[[k, p]], a[[k, q]]);
        a[[k, p]] = c * akp - s * akq;
        a[[k, q]] = s * akp + c * akq;
    }
    for k in 0..n {
        let (apk, aqk) = (a[[p, k]], a[[q, k]]);
        a[[p, k]] = c * apk - s * aqk;
        a[[q, k]] = s * apk + c * aqk;
    }
    for k in 0..n {
        let (vkp, vkq) = (v[[k, p]], v[[k, q]]);
        v[[k, p]] = c * vkp - s * vkq;
        v[[k, q]] = s * vkp + c * vkq;
    }
}
