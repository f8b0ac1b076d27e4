//! Pipeline: the public surface the orchestration layer drives.
//!
//! A pipeline owns the parameter space, the constraint registry, the
//! wrapped model and the stores, and sequences
//! `construct -> analyze -> construct -> ...` rounds. Status, analysis
//! parameters and the plausible subset are readable per iteration for
//! display; rendering them is the orchestration layer's business.

use std::collections::BTreeMap;

use crate::analyze::{AnalysisEngine, AnalysisSummary};
use crate::backup::BackupStore;
use crate::config::Config;
use crate::constraint::{ConstraintId, ConstraintSet};
use crate::construct::{ConstructReport, ConstructionEngine};
use crate::error::{Error, Result};
use crate::iteration::{Iteration, IterationStatus};
use crate::model::Simulator;
use crate::space::{ParameterSpace, SampleSet};
use crate::store::{IterationRecord, RecordStore};
use crate::system::Prediction;

/// Emulator predictions and implausibilities for one constraint over a
/// sample set.
#[derive(Debug, Clone)]
pub struct ConstraintEvaluation {
    /// The constraint evaluated.
    pub id: ConstraintId,
    /// Prediction per sample, in sample order.
    pub predictions: Vec<Prediction>,
    /// Implausibility per sample, in sample order.
    pub implausibilities: Vec<f64>,
}

/// Iterative emulator pipeline over one model.
pub struct Pipeline<M: Simulator> {
    space: ParameterSpace,
    constraints: ConstraintSet,
    config: Config,
    model: M,
    backup: BackupStore,
    store: RecordStore,
    iterations: BTreeMap<usize, Iteration>,
}

impl<M: Simulator> Pipeline<M> {
    /// Create a pipeline, validating the configuration eagerly.
    pub fn new(
        space: ParameterSpace,
        constraints: ConstraintSet,
        model: M,
        config: Config,
    ) -> Result<Self> {
        config.validate()?;
        let backup = BackupStore::new(config.store_dir.clone());
        let store = RecordStore::new(config.store_dir.clone());
        Ok(Self {
            space,
            constraints,
            config,
            model,
            backup,
            store,
            iterations: BTreeMap::new(),
        })
    }

    /// The parameter space.
    pub fn space(&self) -> &ParameterSpace {
        &self.space
    }

    /// The constraint registry.
    pub fn constraints(&self) -> &ConstraintSet {
        &self.constraints
    }

    /// The configuration in force.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The backup store, for orchestration-level inspection.
    pub fn backup(&self) -> &BackupStore {
        &self.backup
    }

    /// Highest iteration number constructed so far, if any.
    pub fn latest(&self) -> Option<usize> {
        self.iterations.keys().next_back().copied()
    }

    /// Status of one iteration.
    pub fn status(&self, index: usize) -> Result<IterationStatus> {
        self.iteration(index).map(Iteration::status)
    }

    /// The plausible subset of an analyzed iteration.
    pub fn plausible(&self, index: usize) -> Result<&SampleSet> {
        let iteration = self.iteration(index)?;
        iteration
            .analysis()
            .map(|a| &a.plausible)
            .ok_or(Error::PreviousUnanalyzed(index + 1, index))
    }

    /// Access an iteration.
    pub fn iteration(&self, index: usize) -> Result<&Iteration> {
        self.iterations
            .get(&index)
            .ok_or(Error::UnknownIteration(index))
    }

    /// Construct iteration `index`.
    ///
    /// `index` must be 1 or follow an analyzed iteration `index - 1`.
    /// Re-constructing an already complete iteration is a no-op reported
    /// with zero step runs. Interrupted constructions resume from the
    /// persisted step records.
    pub fn construct(&mut self, index: usize) -> Result<ConstructReport> {
        if index == 0 {
            return Err(Error::config("iteration numbering starts at 1"));
        }
        if let Some(existing) = self.iterations.get(&index) {
            if existing.is_construction_complete() {
                return Ok(ConstructReport {
                    iteration: index,
                    systems: self.constraints.len(),
                    training_size: existing.samples().len(),
                    runs: Default::default(),
                    elapsed: Default::default(),
                });
            }
        }

        let previous_plausible = if index > 1 {
            Some(self.previous_plausible(index)?)
        } else {
            None
        };

        let engine = ConstructionEngine {
            space: &self.space,
            constraints: &self.constraints,
            config: &self.config,
            model: &self.model,
            backup: &self.backup,
            store: &self.store,
        };
        let (iteration, report) = engine.construct(index, previous_plausible.as_ref())?;
        self.iterations.insert(index, iteration);
        Ok(report)
    }

    /// Analyze a construction-complete iteration.
    ///
    /// Fails with [`Error::AlreadyAnalyzed`] if the iteration already
    /// carries an analysis record; use [`Pipeline::reanalyze`] to replace
    /// it wholesale.
    pub fn analyze(
        &mut self,
        index: usize,
        cutoffs: &[f64],
        wildcard: usize,
    ) -> Result<AnalysisSummary> {
        let engine = AnalysisEngine {
            space: &self.space,
            constraints: &self.constraints,
            config: &self.config,
            model: &self.model,
        };
        let iteration = self
            .iterations
            .get_mut(&index)
            .ok_or(Error::UnknownIteration(index))?;
        let summary = engine.analyze(iteration, cutoffs, wildcard)?;
        self.persist_analysis(index)?;
        Ok(summary)
    }

    /// Discard an iteration's analysis record and analyze afresh.
    ///
    /// This is the only way to change cutoffs or the wildcard count for
    /// an analyzed iteration: the whole record is recomputed so every
    /// verdict used one consistent parameter set.
    pub fn reanalyze(
        &mut self,
        index: usize,
        cutoffs: &[f64],
        wildcard: usize,
    ) -> Result<AnalysisSummary> {
        {
            let iteration = self
                .iterations
                .get_mut(&index)
                .ok_or(Error::UnknownIteration(index))?;
            iteration.clear_analysis();
        }
        self.analyze(index, cutoffs, wildcard)
    }

    /// Evaluate samples through an iteration's systems without
    /// classifying them.
    ///
    /// Returns predictions and implausibilities per constraint, for
    /// orchestration-level display or external consumers such as hybrid
    /// samplers.
    pub fn evaluate(
        &self,
        index: usize,
        samples: &SampleSet,
    ) -> Result<Vec<ConstraintEvaluation>> {
        self.space.check_dims(samples)?;
        let iteration = self.iteration(index)?;
        if !iteration.is_construction_complete() {
            return Err(Error::NotConstructed(index));
        }
        let engine = AnalysisEngine {
            space: &self.space,
            constraints: &self.constraints,
            config: &self.config,
            model: &self.model,
        };
        let matrix = engine.implausibility_matrix(iteration.systems(), samples)?;
        let units = samples.to_unit(&self.space).to_matrix();

        Ok(iteration
            .systems()
            .iter()
            .enumerate()
            .map(|(k, system)| ConstraintEvaluation {
                id: system.id,
                predictions: system.evaluate_batch_unit(&units),
                implausibilities: matrix.iter().map(|row| row[k]).collect(),
            })
            .collect())
    }

    /// The analyzed plausible subset of iteration `index - 1`, checking
    /// memory first and falling back to the persisted record so a fresh
    /// process can pick up where a previous one stopped.
    fn previous_plausible(&self, index: usize) -> Result<SampleSet> {
        if let Some(previous) = self.iterations.get(&(index - 1)) {
            return previous
                .analysis()
                .map(|a| a.plausible.clone())
                .ok_or(Error::PreviousUnanalyzed(index, index - 1));
        }
        if let Some(record) = self.store.load_iteration(index - 1)? {
            if let Some(analysis) = record.analysis {
                return Ok(analysis.plausible);
            }
        }
        Err(Error::PreviousUnanalyzed(index, index - 1))
    }

    /// Mirror an iteration's analysis record to the persistent store.
    fn persist_analysis(&self, index: usize) -> Result<()> {
        if !self.store.is_persistent() {
            return Ok(());
        }
        let iteration = self.iteration(index)?;
        let outputs = self
            .constraints
            .ids()
            .into_iter()
            .filter_map(|id| {
                iteration
                    .outputs(id)
                    .map(|values| (id, values.to_vec()))
            })
            .collect();
        self.store.save_iteration(&IterationRecord {
            index,
            samples: iteration.samples().clone(),
            outputs,
            analysis: iteration.analysis().cloned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraint::Constraint;
    use crate::model::{CallingConvention, EvalContext, ModelOutput};
    use crate::space::{Parameter, Sample};

    /// Linear toy model: output k is (sum of params) scaled by k + 1.
    struct Toy;

    impl Simulator for Toy {
        fn name(&self) -> &str {
            "toy"
        }
        fn calling_convention(&self) -> CallingConvention {
            CallingConvention::SingleSample
        }
        fn evaluate_single(
            &self,
            _ctx: &EvalContext<'_>,
            sample: &Sample,
            requested: &[ConstraintId],
        ) -> ModelOutput {
            let s: f64 = sample.values().iter().sum();
            ModelOutput::Scalars(
                requested
                    .iter()
                    .enumerate()
                    .map(|(k, _)| s * (k + 1) as f64)
                    .collect(),
            )
        }
    }

    fn pipeline() -> Pipeline<Toy> {
        let space = ParameterSpace::new(vec![
            Parameter::new("a", 0.0, 1.0),
            Parameter::new("b", 0.0, 1.0),
        ])
        .unwrap();
        // Observed values reachable around the middle of the space.
        let constraints = ConstraintSet::new(vec![
            Constraint::new(0u64, 1.0, 0.1),
            Constraint::new(1u64, 2.0, 0.2),
        ])
        .unwrap();
        let config = Config::quick().seed(42).proposal_size(500);
        Pipeline::new(space, constraints, Toy, config).unwrap()
    }

    #[test]
    fn test_construct_then_analyze_then_construct() {
        let mut p = pipeline();
        let report = p.construct(1).unwrap();
        assert_eq!(report.systems, 2);

        let summary = p.analyze(1, &[3.0], 0).unwrap();
        assert!(summary.plausible > 0);
        assert!(summary.fraction < 1.0);

        let report = p.construct(2).unwrap();
        assert_eq!(report.iteration, 2);
        assert_eq!(report.training_size, summary.plausible);
        assert_eq!(p.latest(), Some(2));
    }

    #[test]
    fn test_construct_out_of_order_is_refused() {
        let mut p = pipeline();
        assert!(matches!(p.construct(0), Err(Error::Config(_))));
        assert!(matches!(
            p.construct(2),
            Err(Error::PreviousUnanalyzed(2, 1))
        ));
        p.construct(1).unwrap();
        // Constructed but unanalyzed: 2 still blocked.
        assert!(matches!(
            p.construct(2),
            Err(Error::PreviousUnanalyzed(2, 1))
        ));
    }

    #[test]
    fn test_reconstruct_complete_iteration_is_noop() {
        let mut p = pipeline();
        let first = p.construct(1).unwrap();
        assert!(first.runs.regression > 0);
        let second = p.construct(1).unwrap();
        assert_eq!(second.runs, Default::default());
        assert_eq!(second.training_size, first.training_size);
    }

    #[test]
    fn test_double_analyze_refused_reanalyze_allowed() {
        let mut p = pipeline();
        p.construct(1).unwrap();
        let first = p.analyze(1, &[3.0], 0).unwrap();
        assert!(matches!(
            p.analyze(1, &[3.0], 0),
            Err(Error::AlreadyAnalyzed(1))
        ));

        // Looser cutoff admits at least as many samples.
        let second = p.reanalyze(1, &[5.0], 0).unwrap();
        assert!(second.plausible >= first.plausible);
        let record = p.iteration(1).unwrap().analysis().unwrap();
        assert_eq!(record.cutoffs, vec![5.0]);
    }

    #[test]
    fn test_analysis_blocked_leaves_iteration_unanalyzed() {
        let mut p = pipeline();
        p.construct(1).unwrap();
        // An absurdly tight cutoff admits nothing.
        let result = p.analyze(1, &[1e-9], 0);
        assert!(matches!(result, Err(Error::AnalysisBlocked { .. })));
        assert!(p.iteration(1).unwrap().analysis().is_none());
        assert!(matches!(
            p.construct(2),
            Err(Error::PreviousUnanalyzed(2, 1))
        ));
    }

    #[test]
    fn test_evaluate_pass_through() {
        let mut p = pipeline();
        p.construct(1).unwrap();

        let samples = SampleSet::from_samples(vec![
            Sample::new(vec![0.5, 0.5]),
            Sample::new(vec![0.1, 0.9]),
        ]);
        let evaluations = p.evaluate(1, &samples).unwrap();
        assert_eq!(evaluations.len(), 2);
        for eval in &evaluations {
            assert_eq!(eval.predictions.len(), 2);
            assert_eq!(eval.implausibilities.len(), 2);
            assert!(eval.implausibilities.iter().all(|i| *i >= 0.0));
        }
        // Sum of params is 1.0 at both points, so constraint 0 (observed
        // 1.0) should look plausible there.
        assert!(evaluations[0].implausibilities[0] < 3.0);
    }

    #[test]
    fn test_evaluate_rejects_wrong_dimension_samples() {
        let mut p = pipeline();
        p.construct(1).unwrap();

        let short = SampleSet::from_samples(vec![Sample::new(vec![0.5])]);
        assert!(matches!(p.evaluate(1, &short), Err(Error::Config(_))));

        let long = SampleSet::from_samples(vec![Sample::new(vec![0.5, 0.5, 0.5])]);
        assert!(matches!(p.evaluate(1, &long), Err(Error::Config(_))));
    }

    #[test]
    fn test_status_reports_analysis() {
        let mut p = pipeline();
        p.construct(1).unwrap();
        let status = p.status(1).unwrap();
        assert!(status.construction_complete);
        assert!(!status.analyzed);

        p.analyze(1, &[3.0], 0).unwrap();
        assert!(p.status(1).unwrap().analyzed);
        assert!(!p.plausible(1).unwrap().is_empty());
    }
}
