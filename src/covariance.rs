//! Residual covariance estimation for Gaussian conditioning.
//!
//! Each emulator system models its regression residuals as a zero-mean
//! Gaussian process with a squared-exponential kernel over the active
//! parameters:
//!
//! ```text
//! k(x, x') = sigma2 * exp(-0.5 * sum_j ((x_j - x'_j) / l_j)^2) + nugget * [x == x']
//! ```
//!
//! The amplitude `sigma2` comes from the residual variance. Correlation
//! lengths start from a median-pairwise-distance heuristic, shared-scaled
//! by a small deterministic grid search that maximizes the Gaussian
//! pseudo-likelihood of the residuals. No iterative optimizer is involved,
//! so estimation is deterministic and cheap.

use nalgebra::{Cholesky, DMatrix, DVector, Dyn};
use serde::{Deserialize, Serialize};

/// Relative diagonal jitter applied before factorization.
const JITTER_FRAC: f64 = 1e-8;

/// Multipliers tried on the heuristic length scale, in search order.
const LENGTH_GRID: [f64; 9] = [0.25, 0.35, 0.5, 0.7, 1.0, 1.4, 2.0, 2.8, 4.0];

/// Kernel hyperparameters for one system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CovarianceParams {
    /// Marginal variance of the residual process.
    pub amplitude: f64,
    /// Correlation length per active parameter (unit-cube scale).
    pub lengths: Vec<f64>,
    /// Diagonal nugget added for numerical stability.
    pub nugget: f64,
}

impl CovarianceParams {
    /// Kernel value between two points in active-subspace coordinates.
    pub fn kernel(&self, a: &[f64], b: &[f64]) -> f64 {
        let mut q = 0.0;
        for ((&x, &y), &l) in a.iter().zip(b).zip(&self.lengths) {
            let d = (x - y) / l;
            q += d * d;
        }
        self.amplitude * (-0.5 * q).exp()
    }

    /// Training covariance matrix over the rows of `x` (n x n_active),
    /// nugget included on the diagonal.
    pub fn matrix(&self, x: &DMatrix<f64>) -> DMatrix<f64> {
        let n = x.nrows();
        let d = x.ncols();
        let rows: Vec<Vec<f64>> = (0..n)
            .map(|i| (0..d).map(|j| x[(i, j)]).collect())
            .collect();
        let mut k = DMatrix::zeros(n, n);
        for i in 0..n {
            for j in i..n {
                let v = self.kernel(&rows[i], &rows[j]);
                k[(i, j)] = v;
                k[(j, i)] = v;
            }
            k[(i, i)] += self.nugget;
        }
        k
    }
}

/// Estimated covariance model, factored and ready for conditioning.
#[derive(Debug, Clone)]
pub struct CovarianceFit {
    /// Hyperparameters the factorization was built from.
    pub params: CovarianceParams,
    /// Cholesky factor of the training covariance matrix.
    pub chol: Cholesky<f64, Dyn>,
    /// Precomputed `K^-1 r` over the training residuals.
    pub weights: DVector<f64>,
}

impl CovarianceFit {
    /// Rebuild the factorization from stored hyperparameters.
    ///
    /// Used when resuming: the grid search (the expensive step) is not
    /// repeated, only the deterministic factorization of the stored
    /// parameters. Returns `None` if the matrix no longer factorizes,
    /// which indicates a corrupt or mismatched record.
    pub fn from_params(
        params: CovarianceParams,
        x: &DMatrix<f64>,
        residuals: &DVector<f64>,
    ) -> Option<Self> {
        let chol = Cholesky::new(params.matrix(x))?;
        let weights = chol.solve(residuals);
        Some(Self {
            params,
            chol,
            weights,
        })
    }
}

/// Estimate the residual covariance for one system.
///
/// `x` is the training design restricted to the active subspace (unit
/// cube), `residuals` the regression residuals at those points. Returns
/// `None` when every candidate factorization fails, which the caller
/// reports as a singular-covariance construction error.
pub fn estimate(x: &DMatrix<f64>, residuals: &DVector<f64>) -> Option<CovarianceFit> {
    let n = x.nrows();
    debug_assert!(n > 0);

    let amplitude = {
        // Residuals are centered by the regression's constant term.
        let var = residuals.iter().map(|r| r * r).sum::<f64>() / n as f64;
        var.max(f64::MIN_POSITIVE)
    };
    let base_lengths = heuristic_lengths(x);

    let mut best: Option<(f64, CovarianceFit)> = None;
    for &mult in LENGTH_GRID.iter() {
        let params = CovarianceParams {
            amplitude,
            lengths: base_lengths.iter().map(|l| l * mult).collect(),
            nugget: amplitude * JITTER_FRAC,
        };
        let k = params.matrix(x);
        let Some(chol) = Cholesky::new(k) else {
            continue;
        };
        let score = pseudo_log_likelihood(&chol, residuals);
        if !score.is_finite() {
            continue;
        }
        if best.as_ref().map_or(true, |(s, _)| score > *s) {
            let weights = chol.solve(residuals);
            best = Some((
                score,
                CovarianceFit {
                    params,
                    chol,
                    weights,
                },
            ));
        }
    }
    best.map(|(_, fit)| fit)
}

/// Gaussian log-likelihood of the residuals under N(0, K), up to a
/// constant.
fn pseudo_log_likelihood(chol: &Cholesky<f64, Dyn>, residuals: &DVector<f64>) -> f64 {
    let alpha = chol.solve(residuals);
    let quad = residuals.dot(&alpha);
    let logdet: f64 = chol.l().diagonal().iter().map(|d| d.ln()).sum::<f64>() * 2.0;
    -0.5 * (quad + logdet)
}

/// Median pairwise distance per dimension, floored away from zero.
///
/// For a single training point (no pairs) the full unit range is used.
fn heuristic_lengths(x: &DMatrix<f64>) -> Vec<f64> {
    let n = x.nrows();
    let d = x.ncols();
    let mut lengths = Vec::with_capacity(d);
    for j in 0..d {
        let mut dists = Vec::with_capacity(n * (n - 1) / 2);
        for a in 0..n {
            for b in (a + 1)..n {
                let diff = (x[(a, j)] - x[(b, j)]).abs();
                if diff > 0.0 {
                    dists.push(diff);
                }
            }
        }
        if dists.is_empty() {
            lengths.push(1.0);
            continue;
        }
        dists.sort_by(f64::total_cmp);
        let median = dists[dists.len() / 2];
        lengths.push(median.max(1e-3));
    }
    lengths
}
