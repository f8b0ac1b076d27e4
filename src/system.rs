//! Emulator systems: one independent regression unit per constraint.
//!
//! A system owns its active-parameter subset, the polynomial fit over that
//! subspace and the residual covariance model, and answers
//! `evaluate -> (expectation, variance)` by Gaussian conditioning on the
//! training residuals. Systems are deterministic: no randomness is involved
//! after fitting, and the same input always produces the same prediction.

use nalgebra::{DMatrix, DVector};

use crate::constraint::ConstraintId;
use crate::covariance::CovarianceFit;
use crate::regression::PolyFit;
use crate::space::{ParameterSpace, Sample};

/// Emulator prediction for one sample and one constraint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    /// Adjusted expectation.
    pub expectation: f64,
    /// Adjusted variance, always >= 0.
    pub variance: f64,
}

/// Fitted regression + covariance unit for one constraint.
#[derive(Debug, Clone)]
pub struct EmulatorSystem {
    /// Constraint this system emulates.
    pub id: ConstraintId,
    /// Indices of the active parameters, ascending, in canonical parameter
    /// order.
    pub active: Vec<usize>,
    /// Polynomial mean over the active subspace.
    pub regression: PolyFit,
    /// Residual covariance model, factored over the training design.
    pub covariance: CovarianceFit,
    /// Training design restricted to the active subspace, unit-cube
    /// coordinates. Row order matches the training sample set.
    pub training: DMatrix<f64>,
}

impl EmulatorSystem {
    /// Number of training samples this system was fit on.
    pub fn training_size(&self) -> usize {
        self.training.nrows()
    }

    /// Project a full unit-cube point onto the active subspace.
    fn project(&self, unit: &[f64]) -> Vec<f64> {
        self.active.iter().map(|&j| unit[j]).collect()
    }

    /// Evaluate the system at one unit-cube point (full dimensionality).
    ///
    /// Computes the polynomial mean, then conditions on the training
    /// residuals through the precomputed Cholesky factor. A variance that
    /// undershoots zero from floating-point error is clamped to zero with
    /// no other change.
    pub fn evaluate_unit(&self, unit: &[f64]) -> Prediction {
        let x = self.project(unit);
        let mean = self.regression.predict(&x);

        // k(x, X) against every training point.
        let n = self.training.nrows();
        let d = x.len();
        let k_star = DVector::from_fn(n, |i, _| {
            let row: Vec<f64> = (0..d).map(|j| self.training[(i, j)]).collect();
            self.covariance.params.kernel(&x, &row)
        });

        let expectation = mean + k_star.dot(&self.covariance.weights);

        // v(x) = sigma2 - k* K^-1 k*
        let k_inv_kstar = self.covariance.chol.solve(&k_star);
        let variance = self.covariance.params.amplitude - k_star.dot(&k_inv_kstar);

        Prediction {
            expectation,
            variance: variance.max(0.0),
        }
    }

    /// Evaluate at one sample in parameter units.
    pub fn evaluate(&self, space: &ParameterSpace, sample: &Sample) -> Prediction {
        self.evaluate_unit(space.to_unit(sample).values())
    }

    /// Evaluate a batch of unit-cube points (rows of `units`).
    pub fn evaluate_batch_unit(&self, units: &DMatrix<f64>) -> Vec<Prediction> {
        let d = units.ncols();
        (0..units.nrows())
            .map(|i| {
                let point: Vec<f64> = (0..d).map(|j| units[(i, j)]).collect();
                self.evaluate_unit(&point)
            })
            .collect()
    }
}
