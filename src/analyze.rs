//! Analysis engine: implausibility classification of proposal samples.
//!
//! Given a construction-complete iteration, the engine draws a large
//! seeded proposal set, evaluates it through every emulator system, and
//! classifies each sample by comparing its ranked implausibilities against
//! the cutoff sequence. The surviving plausible subset seeds the next
//! iteration's construction.
//!
//! Per sample and constraint:
//!
//! ```text
//! I = |E - z| / sqrt(Var + md_var + sigma_obs^2)
//! ```
//!
//! where `E`, `Var` are the emulator prediction, `z` the observed value,
//! `md_var` the model-discrepancy variance and `sigma_obs` the
//! observational uncertainty on the side the expectation falls on.
//!
//! Wildcard semantics are lock-step: with wildcard count `w`, the `w`
//! highest implausibilities *and* the `w` highest cutoffs are both
//! dropped, and the remainders are compared element-wise in rank order.
//! Equality counts as plausible.

use crate::config::Config;
use crate::constraint::ConstraintSet;
use crate::error::{Error, Result};
use crate::iteration::{AnalysisRecord, Iteration};
use crate::lhs::latin_hypercube;
use crate::model::Simulator;
use crate::pool::run_partitioned;
use crate::space::{ParameterSpace, SampleSet};
use crate::system::EmulatorSystem;

/// Seed offset separating proposal draws from design draws.
const PROPOSAL_SEED_OFFSET: u64 = 0x9e37_79b9_7f4a_7c15;

/// Summary of one analysis call.
#[derive(Debug, Clone)]
pub struct AnalysisSummary {
    /// Analyzed iteration.
    pub iteration: usize,
    /// Size of the classified proposal set.
    pub proposal_size: usize,
    /// Number of plausible samples.
    pub plausible: usize,
    /// Plausible fraction of the proposal.
    pub fraction: f64,
    /// Whether the count fell below the soft minimum (warning only).
    pub below_soft_minimum: bool,
}

/// Validate a cutoff sequence and wildcard count against the constraint
/// count.
///
/// Rejected eagerly, before any emulator evaluation: empty sequences,
/// non-positive or non-finite entries, increasing steps, sequences longer
/// than the constraint count, and wildcard counts outside `0..len`.
pub fn validate_cutoffs(cutoffs: &[f64], wildcard: usize, n_constraints: usize) -> Result<()> {
    if cutoffs.is_empty() {
        return Err(Error::config("cutoff sequence must not be empty"));
    }
    if cutoffs.len() > n_constraints {
        return Err(Error::config(format!(
            "{} cutoffs for {} constraints",
            cutoffs.len(),
            n_constraints
        )));
    }
    for pair in cutoffs.windows(2) {
        if pair[1] > pair[0] {
            return Err(Error::config("cutoff sequence must be non-increasing"));
        }
    }
    if cutoffs.iter().any(|c| !c.is_finite() || *c <= 0.0) {
        return Err(Error::config("cutoffs must be positive and finite"));
    }
    if wildcard >= cutoffs.len() {
        return Err(Error::config(format!(
            "wildcard count {} must be below the cutoff count {}",
            wildcard,
            cutoffs.len()
        )));
    }
    Ok(())
}

/// Classify one sample from its per-constraint implausibilities.
///
/// Lock-step wildcard rule; equality is plausible.
pub fn is_plausible(implausibilities: &[f64], cutoffs: &[f64], wildcard: usize) -> bool {
    let mut sorted = implausibilities.to_vec();
    sorted.sort_by(|a, b| b.total_cmp(a));

    // Both vectors drop their top `w` entries; the remaining ranks line up
    // one-to-one until either runs out.
    sorted
        .iter()
        .skip(wildcard)
        .zip(cutoffs.iter().skip(wildcard))
        .all(|(i, c)| i <= c)
}

/// Borrowed view of everything analysis needs.
pub(crate) struct AnalysisEngine<'a> {
    pub space: &'a ParameterSpace,
    pub constraints: &'a ConstraintSet,
    pub config: &'a Config,
    pub model: &'a dyn Simulator,
}

impl AnalysisEngine<'_> {
    /// Analyze a construction-complete iteration.
    ///
    /// Attaches the frozen [`AnalysisRecord`] on success. An iteration
    /// that already has one is rejected; reanalysis must clear the record
    /// first so every verdict in it used one consistent parameter set.
    pub fn analyze(
        &self,
        iteration: &mut Iteration,
        cutoffs: &[f64],
        wildcard: usize,
    ) -> Result<AnalysisSummary> {
        validate_cutoffs(cutoffs, wildcard, self.constraints.len())?;
        if !iteration.is_construction_complete() {
            return Err(Error::NotConstructed(iteration.index()));
        }
        if iteration.analysis().is_some() {
            return Err(Error::AlreadyAnalyzed(iteration.index()));
        }

        let seed = self
            .config
            .seed
            .wrapping_add(iteration.index() as u64)
            .wrapping_add(PROPOSAL_SEED_OFFSET);
        let proposal = latin_hypercube(self.space, self.config.proposal_size, seed);

        let implausibilities =
            self.implausibility_matrix(iteration.systems(), &proposal)?;

        let plausible_indices: Vec<usize> = (0..proposal.len())
            .filter(|&row| is_plausible(&implausibilities[row], cutoffs, wildcard))
            .collect();
        let plausible = proposal.subset(&plausible_indices);
        let count = plausible.len();

        if count < self.config.hard_min_plausible {
            tracing::warn!(
                iteration = iteration.index(),
                plausible = count,
                hard_minimum = self.config.hard_min_plausible,
                "analysis blocked: too few plausible samples"
            );
            return Err(Error::AnalysisBlocked {
                plausible: count,
                hard_minimum: self.config.hard_min_plausible,
            });
        }
        let below_soft_minimum = count < self.config.soft_min_plausible;
        if below_soft_minimum {
            tracing::warn!(
                iteration = iteration.index(),
                plausible = count,
                soft_minimum = self.config.soft_min_plausible,
                "plausible count below soft minimum"
            );
        }

        let summary = AnalysisSummary {
            iteration: iteration.index(),
            proposal_size: proposal.len(),
            plausible: count,
            fraction: count as f64 / proposal.len() as f64,
            below_soft_minimum,
        };
        iteration.set_analysis(AnalysisRecord {
            cutoffs: cutoffs.to_vec(),
            wildcard,
            proposal_size: proposal.len(),
            plausible,
            below_soft_minimum,
        })?;
        tracing::info!(
            iteration = summary.iteration,
            plausible = summary.plausible,
            fraction = summary.fraction,
            "analysis complete"
        );
        Ok(summary)
    }

    /// Per-sample implausibility vectors over every system.
    ///
    /// Systems are partitioned across the worker pool by training size,
    /// exactly as during construction; each worker produces the full
    /// implausibility column for its systems.
    pub fn implausibility_matrix(
        &self,
        systems: &[EmulatorSystem],
        samples: &SampleSet,
    ) -> Result<Vec<Vec<f64>>> {
        let ids = self.constraints.ids();
        let md_vars = self.model.discrepancy_variance(samples, &ids);
        if md_vars.len() != ids.len() {
            return Err(Error::config(format!(
                "model returned {} discrepancy variances for {} identifiers",
                md_vars.len(),
                ids.len()
            )));
        }

        let units = samples.to_unit(self.space).to_matrix();
        let sizes: Vec<usize> = systems.iter().map(EmulatorSystem::training_size).collect();

        let columns: Vec<Result<Vec<f64>>> =
            run_partitioned(self.config.workers, &sizes, |k| {
                let system = &systems[k];
                let constraint = self
                    .constraints
                    .get(system.id)
                    .ok_or_else(|| Error::config(format!("no constraint {}", system.id)))?;
                let md_var = ids
                    .iter()
                    .position(|&id| id == system.id)
                    .map(|pos| md_vars[pos])
                    .unwrap_or(0.0);
                let column = system
                    .evaluate_batch_unit(&units)
                    .into_iter()
                    .map(|p| {
                        let diff = p.expectation - constraint.observed;
                        let sigma = constraint.uncertainty.on_side(diff);
                        let denom = (p.variance + md_var + sigma * sigma).sqrt();
                        if denom > 0.0 {
                            diff.abs() / denom
                        } else {
                            // Zero total uncertainty: any mismatch is
                            // infinitely implausible, exact match is not.
                            if diff == 0.0 {
                                0.0
                            } else {
                                f64::INFINITY
                            }
                        }
                    })
                    .collect();
                Ok(column)
            });

        let mut rows = vec![Vec::with_capacity(systems.len()); samples.len()];
        for column in columns {
            let column = column?;
            for (row, value) in rows.iter_mut().zip(column) {
                row.push(value);
            }
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cutoff_validation() {
        assert!(validate_cutoffs(&[3.0, 2.5], 0, 3).is_ok());
        assert!(validate_cutoffs(&[], 0, 3).is_err());
        assert!(validate_cutoffs(&[2.0, 3.0], 0, 3).is_err());
        assert!(validate_cutoffs(&[3.0, 2.0], 2, 3).is_err());
        assert!(validate_cutoffs(&[3.0, 2.0, 1.0, 0.5], 0, 3).is_err());
        assert!(validate_cutoffs(&[3.0, -1.0], 0, 3).is_err());
        assert!(validate_cutoffs(&[3.0, f64::NAN], 0, 3).is_err());
        // Equal consecutive cutoffs are non-increasing, hence fine.
        assert!(validate_cutoffs(&[3.0, 3.0], 1, 3).is_ok());
    }

    #[test]
    fn test_worked_example_no_wildcard() {
        // Sorted descending: [3.8, 3.7, 3.1] vs [4.0, 3.5, 3.2].
        // 3.7 > 3.5 at rank 2, so implausible.
        assert!(!is_plausible(&[3.8, 3.1, 3.7], &[4.0, 3.5, 3.2], 0));
    }

    #[test]
    fn test_worked_example_one_wildcard() {
        // Dropping 3.8 and 4.0 leaves [3.7, 3.1] vs [3.5, 3.2];
        // 3.7 > 3.5, so still implausible.
        assert!(!is_plausible(&[3.8, 3.1, 3.7], &[4.0, 3.5, 3.2], 1));
    }

    #[test]
    fn test_equality_is_plausible() {
        assert!(is_plausible(&[3.0, 2.0], &[3.0, 2.0], 0));
    }

    #[test]
    fn test_wildcard_can_rescue() {
        // [9.0, 1.0] fails [3.0, 2.0] outright; dropping the top of both
        // leaves 1.0 <= 2.0.
        assert!(!is_plausible(&[9.0, 1.0], &[3.0, 2.0], 0));
        assert!(is_plausible(&[9.0, 1.0], &[3.0, 2.0], 1));
    }

    #[test]
    fn test_fewer_cutoffs_than_constraints() {
        // Three implausibilities, two cutoffs: only the top two ranks are
        // checked.
        assert!(is_plausible(&[2.9, 0.1, 1.9], &[3.0, 2.0], 0));
        assert!(!is_plausible(&[2.9, 2.5, 1.9], &[3.0, 2.0], 0));
    }

    #[test]
    fn test_monotonic_in_cutoffs() {
        let imp = [3.8, 3.1, 3.7];
        let tight = [4.0, 3.5, 3.2];
        let relaxed = [4.0, 3.8, 3.2];
        for w in 0..2 {
            if is_plausible(&imp, &tight, w) {
                assert!(is_plausible(&imp, &relaxed, w));
            }
        }
        // Relaxing rank 2 from 3.5 to 3.8 flips the verdict.
        assert!(!is_plausible(&imp, &tight, 0));
        assert!(is_plausible(&imp, &relaxed, 0));
    }
}
