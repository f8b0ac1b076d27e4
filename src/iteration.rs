//! Iterations: versioned snapshots of one emulation round.
//!
//! An iteration bundles the sample set it was built on, the model outputs,
//! per-system construction progress at step granularity, the fitted
//! systems, and (once analyzed) the frozen analysis record. Numbering
//! starts at 1; index 0 is reserved and never constructed.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::constraint::ConstraintId;
use crate::covariance::CovarianceParams;
use crate::error::{Error, Result};
use crate::regression::PolyFit;
use crate::space::SampleSet;
use crate::system::EmulatorSystem;

/// Per-system construction progress, step by step.
///
/// Each step's output is stored as soon as it completes, so an interrupted
/// construction resumes from the last finished step instead of redoing
/// earlier ones. `covariance` holds the hyperparameters only; the Cholesky
/// factorization is rebuilt deterministically from them on resume.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemProgress {
    /// Active-parameter indices, once determined.
    pub active: Option<Vec<usize>>,
    /// Fitted regression, once computed.
    pub regression: Option<PolyFit>,
    /// Covariance hyperparameters, once estimated.
    pub covariance: Option<CovarianceParams>,
}

impl SystemProgress {
    /// Whether all three construction steps have completed.
    pub fn is_complete(&self) -> bool {
        self.active.is_some() && self.regression.is_some() && self.covariance.is_some()
    }
}

/// Frozen analysis parameters and results for one iteration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRecord {
    /// Implausibility cutoffs, non-increasing.
    pub cutoffs: Vec<f64>,
    /// Number of highest implausibilities exempted per sample.
    pub wildcard: usize,
    /// Size of the proposal set that was classified.
    pub proposal_size: usize,
    /// The plausible subset, in proposal order.
    pub plausible: SampleSet,
    /// Whether the plausible count fell below the soft minimum.
    pub below_soft_minimum: bool,
}

/// Construction/analysis status of an iteration, per-step granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IterationStatus {
    /// Total number of systems (one per constraint).
    pub systems: usize,
    /// Systems with active parameters determined.
    pub active_done: usize,
    /// Systems with the regression fit.
    pub regression_done: usize,
    /// Systems with the covariance estimated.
    pub covariance_done: usize,
    /// Whether all systems finished all steps.
    pub construction_complete: bool,
    /// Whether the analysis record has been set.
    pub analyzed: bool,
}

/// One versioned round of sampling, construction and analysis.
#[derive(Debug)]
pub struct Iteration {
    index: usize,
    samples: SampleSet,
    /// Model outputs per constraint, one value per training sample.
    outputs: BTreeMap<ConstraintId, Vec<f64>>,
    progress: BTreeMap<ConstraintId, SystemProgress>,
    systems: Vec<EmulatorSystem>,
    analysis: Option<AnalysisRecord>,
}

impl Iteration {
    /// Create a fresh iteration from its evaluated sample set.
    ///
    /// `index` must be >= 1; 0 is reserved.
    pub fn new(
        index: usize,
        samples: SampleSet,
        outputs: BTreeMap<ConstraintId, Vec<f64>>,
    ) -> Result<Self> {
        if index == 0 {
            return Err(Error::config("iteration numbering starts at 1"));
        }
        for (id, values) in &outputs {
            if values.len() != samples.len() {
                return Err(Error::config(format!(
                    "constraint {} has {} outputs for {} samples",
                    id,
                    values.len(),
                    samples.len()
                )));
            }
        }
        let progress = outputs
            .keys()
            .map(|&id| (id, SystemProgress::default()))
            .collect();
        Ok(Self {
            index,
            samples,
            outputs,
            progress,
            systems: Vec::new(),
            analysis: None,
        })
    }

    /// Ordinal index (>= 1).
    pub fn index(&self) -> usize {
        self.index
    }

    /// The sample set this iteration was built on.
    pub fn samples(&self) -> &SampleSet {
        &self.samples
    }

    /// Model outputs for one constraint, in sample order.
    pub fn outputs(&self, id: ConstraintId) -> Option<&[f64]> {
        self.outputs.get(&id).map(Vec::as_slice)
    }

    /// Construction progress for one constraint.
    pub fn progress(&self, id: ConstraintId) -> Option<&SystemProgress> {
        self.progress.get(&id)
    }

    /// Replace the stored progress wholesale (used when resuming from
    /// persisted records).
    pub(crate) fn restore_progress(&mut self, progress: BTreeMap<ConstraintId, SystemProgress>) {
        for (id, p) in progress {
            if self.progress.contains_key(&id) {
                self.progress.insert(id, p);
            }
        }
    }

    /// Install the fitted systems, marking construction complete.
    ///
    /// Refused unless every system's progress shows all steps done.
    pub(crate) fn finalize(&mut self, systems: Vec<EmulatorSystem>) -> Result<()> {
        if !self.progress.values().all(SystemProgress::is_complete) {
            return Err(Error::NotConstructed(self.index));
        }
        self.systems = systems;
        Ok(())
    }

    /// The fitted systems, empty until construction completes.
    pub fn systems(&self) -> &[EmulatorSystem] {
        &self.systems
    }

    /// Whether every system finished every construction step.
    pub fn is_construction_complete(&self) -> bool {
        !self.systems.is_empty()
    }

    /// The frozen analysis record, if analyzed.
    pub fn analysis(&self) -> Option<&AnalysisRecord> {
        self.analysis.as_ref()
    }

    /// Attach the analysis record.
    ///
    /// Appending only: once set, the record is immutable and a second call
    /// is rejected. Reanalysis goes through [`Iteration::clear_analysis`]
    /// which discards the whole record first.
    pub(crate) fn set_analysis(&mut self, record: AnalysisRecord) -> Result<()> {
        if !self.is_construction_complete() {
            return Err(Error::NotConstructed(self.index));
        }
        if self.analysis.is_some() {
            return Err(Error::AlreadyAnalyzed(self.index));
        }
        self.analysis = Some(record);
        Ok(())
    }

    /// Discard the analysis record for a full reanalysis.
    pub(crate) fn clear_analysis(&mut self) {
        self.analysis = None;
    }

    /// Current status at step granularity.
    pub fn status(&self) -> IterationStatus {
        let systems = self.progress.len();
        let active_done = self.progress.values().filter(|p| p.active.is_some()).count();
        let regression_done = self
            .progress
            .values()
            .filter(|p| p.regression.is_some())
            .count();
        let covariance_done = self
            .progress
            .values()
            .filter(|p| p.covariance.is_some())
            .count();
        IterationStatus {
            systems,
            active_done,
            regression_done,
            covariance_done,
            construction_complete: self.is_construction_complete(),
            analyzed: self.analysis.is_some(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::space::Sample;

    fn outputs_for(ids: &[u64], n: usize) -> BTreeMap<ConstraintId, Vec<f64>> {
        ids.iter()
            .map(|&i| (ConstraintId::Scalar(i), vec![0.0; n]))
            .collect()
    }

    fn sample_set(n: usize) -> SampleSet {
        SampleSet::from_samples((0..n).map(|i| Sample::new(vec![i as f64])).collect())
    }

    #[test]
    fn test_index_zero_reserved() {
        assert!(Iteration::new(0, sample_set(3), outputs_for(&[0], 3)).is_err());
        assert!(Iteration::new(1, sample_set(3), outputs_for(&[0], 3)).is_ok());
    }

    #[test]
    fn test_output_length_checked() {
        assert!(Iteration::new(1, sample_set(3), outputs_for(&[0], 2)).is_err());
    }

    #[test]
    fn test_status_tracks_steps() {
        let mut iter = Iteration::new(1, sample_set(4), outputs_for(&[0, 1], 4)).unwrap();
        let status = iter.status();
        assert_eq!(status.systems, 2);
        assert_eq!(status.active_done, 0);
        assert!(!status.construction_complete);

        let mut partial = BTreeMap::new();
        partial.insert(
            ConstraintId::Scalar(0),
            SystemProgress {
                active: Some(vec![0]),
                ..Default::default()
            },
        );
        iter.restore_progress(partial);
        assert_eq!(iter.status().active_done, 1);
        assert_eq!(iter.status().regression_done, 0);
    }

    #[test]
    fn test_finalize_requires_complete_progress() {
        let mut iter = Iteration::new(1, sample_set(4), outputs_for(&[0], 4)).unwrap();
        assert!(iter.finalize(vec![]).is_err());
    }

    #[test]
    fn test_analysis_requires_construction() {
        let mut iter = Iteration::new(1, sample_set(4), outputs_for(&[0], 4)).unwrap();
        let record = AnalysisRecord {
            cutoffs: vec![3.0],
            wildcard: 0,
            proposal_size: 10,
            plausible: SampleSet::new(),
            below_soft_minimum: false,
        };
        assert!(matches!(
            iter.set_analysis(record),
            Err(Error::NotConstructed(1))
        ));
    }
}
