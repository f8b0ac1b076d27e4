//! Resumption and persistence across pipeline instances.
//!
//! Every test builds a pipeline pointed at a temporary store directory,
//! drops it, then builds a second pipeline over the same directory and
//! verifies that completed work is not redone: model evaluations are
//! counted through a shared atomic, and construction reports expose how
//! many steps actually ran.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use histmatch::{
    CallingConvention, Config, Constraint, ConstraintId, ConstraintSet, EvalContext, ModelOutput,
    Parameter, ParameterSpace, Pipeline, Sample, Simulator, StepRuns,
};

/// Counting toy model: output k is `(sum of params) * (k + 1)`.
struct Counted {
    calls: Arc<AtomicUsize>,
}

impl Simulator for Counted {
    fn name(&self) -> &str {
        "counted"
    }

    fn calling_convention(&self) -> CallingConvention {
        CallingConvention::SingleSample
    }

    fn evaluate_single(
        &self,
        ctx: &EvalContext<'_>,
        sample: &Sample,
        requested: &[ConstraintId],
    ) -> ModelOutput {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let sum: f64 = sample.values().iter().sum();
        // Opportunistic checkpoint, exercised by the backup test below.
        ctx.backup_write(
            serde_json::json!({ "sample": sample.values() }),
            serde_json::json!({ "iteration": ctx.iteration() }),
        );
        ModelOutput::Scalars(
            requested
                .iter()
                .enumerate()
                .map(|(k, _)| sum * (k + 1) as f64)
                .collect(),
        )
    }
}

fn setup(dir: &std::path::Path, calls: Arc<AtomicUsize>) -> Pipeline<Counted> {
    let space = ParameterSpace::new(vec![
        Parameter::new("a", 0.0, 1.0),
        Parameter::new("b", 0.0, 1.0),
    ])
    .unwrap();
    let constraints = ConstraintSet::new(vec![
        Constraint::new(0u64, 1.0, 0.1),
        Constraint::new(1u64, 2.0, 0.2),
    ])
    .unwrap();
    let config = Config::quick()
        .seed(17)
        .proposal_size(500)
        .store_dir(dir);
    Pipeline::new(space, constraints, Counted { calls }, config).unwrap()
}

// =============================================================================
// CONSTRUCTION RESUMPTION
// =============================================================================

#[test]
fn resumed_construction_runs_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));

    {
        let mut pipeline = setup(dir.path(), calls.clone());
        let report = pipeline.construct(1).unwrap();
        assert_eq!(report.runs.active, 2);
        assert_eq!(report.runs.regression, 2);
        assert_eq!(report.runs.covariance, 2);
    }
    let calls_after_first = calls.load(Ordering::SeqCst);
    assert_eq!(calls_after_first, 10); // 5 per param * 2 params

    // A fresh process over the same directory: no model calls, no steps.
    let mut pipeline = setup(dir.path(), calls.clone());
    let report = pipeline.construct(1).unwrap();
    assert_eq!(report.runs, StepRuns::default());
    assert_eq!(calls.load(Ordering::SeqCst), calls_after_first);
    assert!(pipeline.status(1).unwrap().construction_complete);
}

#[test]
fn interrupted_construction_keeps_completed_steps() {
    let dir = tempfile::tempdir().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));

    {
        let mut pipeline = setup(dir.path(), calls.clone());
        pipeline.construct(1).unwrap();
    }
    let calls_after_first = calls.load(Ordering::SeqCst);

    // Rewind both system records to just after active-parameter
    // determination, as if the process died before the regression step.
    for name in ["iter1_system_s0.json", "iter1_system_s1.json"] {
        let path = dir.path().join(name);
        let record: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        let truncated = serde_json::json!({
            "active": record["active"].clone(),
            "regression": null,
            "covariance": null,
        });
        std::fs::write(&path, serde_json::to_vec(&truncated).unwrap()).unwrap();
    }

    // Resuming reuses the persisted active sets and the evaluated sample
    // set; only the later steps run.
    let mut pipeline = setup(dir.path(), calls.clone());
    let report = pipeline.construct(1).unwrap();
    assert_eq!(report.runs.active, 0);
    assert_eq!(report.runs.regression, 2);
    assert_eq!(report.runs.covariance, 2);
    assert_eq!(calls.load(Ordering::SeqCst), calls_after_first);
    assert!(pipeline.status(1).unwrap().construction_complete);
}

#[test]
fn persisted_analysis_unblocks_next_iteration() {
    let dir = tempfile::tempdir().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));

    let plausible_count = {
        let mut pipeline = setup(dir.path(), calls.clone());
        pipeline.construct(1).unwrap();
        pipeline.analyze(1, &[3.0], 0).unwrap().plausible
    };
    assert!(plausible_count > 0);

    // The new process never saw iteration 1 in memory; the persisted
    // analysis record supplies the plausible subset for iteration 2.
    let mut pipeline = setup(dir.path(), calls.clone());
    let report = pipeline.construct(2).unwrap();
    assert_eq!(report.iteration, 2);
    assert_eq!(report.training_size, plausible_count);
}

#[test]
fn unanalyzed_store_still_blocks_next_iteration() {
    let dir = tempfile::tempdir().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));

    {
        let mut pipeline = setup(dir.path(), calls.clone());
        pipeline.construct(1).unwrap();
        // No analysis.
    }

    let mut pipeline = setup(dir.path(), calls);
    assert!(pipeline.construct(2).is_err());
}

#[test]
fn reanalysis_overwrites_persisted_record() {
    let dir = tempfile::tempdir().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));

    let relaxed_count = {
        let mut pipeline = setup(dir.path(), calls.clone());
        pipeline.construct(1).unwrap();
        pipeline.analyze(1, &[2.0], 0).unwrap();
        pipeline.reanalyze(1, &[4.0], 0).unwrap().plausible
    };

    // The resumed process sees the reanalyzed record, not the original.
    let mut pipeline = setup(dir.path(), calls);
    let report = pipeline.construct(2).unwrap();
    assert_eq!(report.training_size, relaxed_count);
}

// =============================================================================
// BACKUP CHECKPOINTS
// =============================================================================

#[test]
fn model_backups_survive_into_new_process() {
    let dir = tempfile::tempdir().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));

    {
        let mut pipeline = setup(dir.path(), calls.clone());
        pipeline.construct(1).unwrap();
        // Last write wins: the record holds the final evaluated sample.
        let record = pipeline.backup().read(1, "counted").unwrap();
        assert_eq!(record.iteration, 1);
        assert_eq!(record.payload, serde_json::json!({ "iteration": 1 }));
    }

    let pipeline = setup(dir.path(), calls);
    let record = pipeline.backup().read(1, "counted").unwrap();
    assert_eq!(record.model, "counted");
    assert!(record.inputs.get("sample").is_some());
}
