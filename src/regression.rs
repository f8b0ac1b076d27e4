//! Polynomial regression over active parameters.
//!
//! The mean function of every emulator system is an ordinary least-squares
//! polynomial fit (total degree up to the configured order, cross terms
//! included) over the system's active parameters, with inputs normalized to
//! the unit cube. Active parameters are chosen per iteration from the
//! normalized magnitudes of a first-order fit; sensitivities shift as the
//! plausible region shrinks, so the choice is never carried over.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// A polynomial basis over `n_active` variables with total degree up to
/// `order`.
///
/// Terms are multi-indices in a fixed deterministic order: the constant
/// term first, then degree 1 terms, then degree 2, and so on, each degree
/// block in lexicographic order of exponents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolyBasis {
    n_active: usize,
    order: usize,
    /// Exponent vectors, one per term, each of length `n_active`.
    terms: Vec<Vec<usize>>,
}

impl PolyBasis {
    /// Build the basis for `n_active` variables and maximum total degree
    /// `order`.
    pub fn new(n_active: usize, order: usize) -> Self {
        let mut terms = Vec::new();
        for degree in 0..=order {
            let mut exps = vec![0usize; n_active];
            collect_terms(&mut exps, 0, degree, &mut terms);
        }
        Self {
            n_active,
            order,
            terms,
        }
    }

    /// Number of basis terms (regression degrees of freedom).
    pub fn n_terms(&self) -> usize {
        self.terms.len()
    }

    /// Number of variables the basis spans.
    pub fn n_active(&self) -> usize {
        self.n_active
    }

    /// Maximum total degree.
    pub fn order(&self) -> usize {
        self.order
    }

    /// Evaluate every basis term at one point (length `n_active`).
    pub fn row(&self, x: &[f64]) -> DVector<f64> {
        debug_assert_eq!(x.len(), self.n_active);
        DVector::from_iterator(
            self.terms.len(),
            self.terms.iter().map(|exps| {
                exps.iter()
                    .zip(x)
                    .map(|(&e, &v)| v.powi(e as i32))
                    .product::<f64>()
            }),
        )
    }

    /// Evaluate the basis at every row of an (n x n_active) matrix,
    /// producing the (n x n_terms) design matrix.
    pub fn design_matrix(&self, x: &DMatrix<f64>) -> DMatrix<f64> {
        debug_assert_eq!(x.ncols(), self.n_active);
        let n = x.nrows();
        let mut design = DMatrix::zeros(n, self.terms.len());
        let mut point = vec![0.0; self.n_active];
        for i in 0..n {
            for (j, v) in point.iter_mut().enumerate() {
                *v = x[(i, j)];
            }
            design.set_row(i, &self.row(&point).transpose());
        }
        design
    }
}

/// Distribute `remaining` total degree over exponent slots from `from`.
fn collect_terms(exps: &mut Vec<usize>, from: usize, remaining: usize, out: &mut Vec<Vec<usize>>) {
    if remaining == 0 {
        out.push(exps.clone());
        return;
    }
    if from >= exps.len() {
        return;
    }
    for e in (0..=remaining).rev() {
        exps[from] = e;
        collect_terms(exps, from + 1, remaining - e, out);
        exps[from] = 0;
    }
}

/// A fitted least-squares polynomial.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolyFit {
    /// Basis the coefficients refer to.
    pub basis: PolyBasis,
    /// Coefficients in term order.
    pub coefficients: DVector<f64>,
}

impl PolyFit {
    /// Fit by ordinary least squares.
    ///
    /// `x` is (n x n_active) in unit-cube coordinates, `y` length n.
    /// Returns `None` when the normal equations are singular (collinear
    /// design); the caller turns that into a constraint-identified
    /// construction error. Requires `n > n_terms`, checked by the caller.
    pub fn fit(basis: PolyBasis, x: &DMatrix<f64>, y: &DVector<f64>) -> Option<Self> {
        let design = basis.design_matrix(x);
        let gtg = design.transpose() * &design;
        let gty = design.transpose() * y;
        let chol = gtg.cholesky()?;
        let coefficients = chol.solve(&gty);
        Some(Self {
            basis,
            coefficients,
        })
    }

    /// Predicted mean at one point (length `n_active`, unit cube).
    pub fn predict(&self, x: &[f64]) -> f64 {
        self.basis.row(x).dot(&self.coefficients)
    }

    /// Residuals `y - G beta` over the training design.
    pub fn residuals(&self, x: &DMatrix<f64>, y: &DVector<f64>) -> DVector<f64> {
        y - self.basis.design_matrix(x) * &self.coefficients
    }
}

/// Normalized first-order sensitivity scores, one per input column.
///
/// Fits a linear model over *all* parameters (unit-cube inputs, so the
/// coefficient magnitudes are directly comparable) and normalizes the
/// absolute coefficients so the largest is 1.0. Falls back to uniform
/// scores when the linear fit is singular or the response is flat.
pub fn sensitivity_scores(x_unit: &DMatrix<f64>, y: &DVector<f64>) -> Vec<f64> {
    let d = x_unit.ncols();
    let basis = PolyBasis::new(d, 1);
    let fallback = vec![1.0; d];

    if x_unit.nrows() <= basis.n_terms() {
        return fallback;
    }
    let fit = match PolyFit::fit(basis, x_unit, y) {
        Some(f) => f,
        None => return fallback,
    };

    // Coefficient 0 is the constant; 1..=d are the linear terms.
    let mags: Vec<f64> = (0..d).map(|j| fit.coefficients[j + 1].abs()).collect();
    let max = mags.iter().cloned().fold(0.0_f64, f64::max);
    if max <= 0.0 || !max.is_finite() {
        return fallback;
    }
    mags.iter().map(|m| m / max).collect()
}

/// Indices of the active parameters: score above `threshold`, with the
/// top-scoring parameter always retained.
pub fn select_active(scores: &[f64], threshold: f64) -> Vec<usize> {
    let mut active: Vec<usize> = scores
        .iter()
        .enumerate()
        .filter(|(_, &s)| s >= threshold)
        .map(|(i, _)| i)
        .collect();
    if active.is_empty() {
        // Scores are normalized to max 1.0, so this only happens for
        // threshold > 1.0 or a degenerate score vector.
        let best = scores
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap_or(0);
        active.push(best);
    }
    active
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basis_term_counts() {
        // 1 + d linear terms
        assert_eq!(PolyBasis::new(3, 1).n_terms(), 4);
        // + d squares + C(d,2) cross terms = 1 + 3 + 3 + 3 = 10
        assert_eq!(PolyBasis::new(3, 2).n_terms(), 10);
        assert_eq!(PolyBasis::new(1, 2).n_terms(), 3);
    }

    #[test]
    fn test_basis_row_constant_first() {
        let basis = PolyBasis::new(2, 2);
        let row = basis.row(&[2.0, 3.0]);
        assert_eq!(row[0], 1.0);
        // Full set of values regardless of ordering: {1, 2, 3, 4, 6, 9}
        let mut values: Vec<f64> = row.iter().cloned().collect();
        values.sort_by(f64::total_cmp);
        assert_eq!(values, vec![1.0, 2.0, 3.0, 4.0, 6.0, 9.0]);
    }

    #[test]
    fn test_fit_recovers_quadratic() {
        // y = 2 + 3x - x^2 on a grid
        let n = 21;
        let x = DMatrix::from_fn(n, 1, |i, _| i as f64 / (n - 1) as f64);
        let y = DVector::from_fn(n, |i, _| {
            let v = x[(i, 0)];
            2.0 + 3.0 * v - v * v
        });
        let fit = PolyFit::fit(PolyBasis::new(1, 2), &x, &y).unwrap();
        assert!((fit.predict(&[0.5]) - (2.0 + 1.5 - 0.25)).abs() < 1e-8);
        let resid = fit.residuals(&x, &y);
        assert!(resid.iter().all(|r| r.abs() < 1e-8));
    }

    #[test]
    fn test_sensitivity_scores_rank_inputs() {
        // y depends strongly on x0, weakly on x1, not at all on x2.
        let n = 40;
        let multipliers = [0.618_034, 0.414_214, 0.732_051];
        let x = DMatrix::from_fn(n, 3, |i, j| ((i + 1) as f64 * multipliers[j]).fract());
        let y = DVector::from_fn(n, |i, _| 10.0 * x[(i, 0)] + 0.1 * x[(i, 1)]);
        let scores = sensitivity_scores(&x, &y);
        assert!((scores[0] - 1.0).abs() < 1e-9);
        assert!(scores[1] < 0.05);
        assert!(scores[2] < 0.05);
    }

    #[test]
    fn test_select_active_keeps_top_scorer() {
        let scores = vec![0.01, 0.002, 0.03];
        let active = select_active(&scores, 0.5);
        assert_eq!(active, vec![2]);

        let active = select_active(&[0.9, 0.4, 0.05], 0.1);
        assert_eq!(active, vec![0, 1]);
    }
}
