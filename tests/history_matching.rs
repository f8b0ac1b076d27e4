//! End-to-end history matching runs against analytic toy models.
//!
//! These tests drive the full pipeline surface (construct, analyze,
//! reanalyze, evaluate) on models cheap enough to evaluate thousands of
//! times, and check the statistical contract rather than exact numbers:
//! the plausible subset is consistent with the recorded cutoffs, runs are
//! reproducible bit for bit, and the calling convention does not affect
//! results.

use histmatch::{
    is_plausible, CallingConvention, Config, Constraint, ConstraintId, ConstraintSet, EvalContext,
    ModelOutput, Parameter, ParameterSpace, Pipeline, Sample, SampleSet, Simulator,
};

// =============================================================================
// TOY MODELS
// =============================================================================

/// Two outputs over a 2-d space: `a + b` and `a * b`.
///
/// Both are exactly representable by a second-order polynomial basis, so
/// the emulator mean is essentially exact and the plausible region is
/// driven by the observational uncertainties alone.
struct Quadratic {
    convention: CallingConvention,
}

impl Simulator for Quadratic {
    fn name(&self) -> &str {
        "quadratic"
    }

    fn calling_convention(&self) -> CallingConvention {
        self.convention
    }

    fn evaluate_single(
        &self,
        _ctx: &EvalContext<'_>,
        sample: &Sample,
        requested: &[ConstraintId],
    ) -> ModelOutput {
        let a = sample.values()[0];
        let b = sample.values()[1];
        let values = requested
            .iter()
            .map(|&id| match id {
                ConstraintId::Scalar(0) => a + b,
                ConstraintId::Scalar(1) => a * b,
                other => panic!("unexpected identifier {other}"),
            })
            .collect();
        ModelOutput::Scalars(values)
    }
}

fn space() -> ParameterSpace {
    ParameterSpace::new(vec![
        Parameter::new("a", 0.0, 2.0),
        Parameter::new("b", 0.0, 2.0),
    ])
    .unwrap()
}

fn constraints() -> ConstraintSet {
    // Satisfied near (1.0, 0.8): a + b = 1.8, a * b = 0.8.
    ConstraintSet::new(vec![
        Constraint::new(0u64, 1.8, 0.05),
        Constraint::new(1u64, 0.8, 0.05),
    ])
    .unwrap()
}

fn config(seed: u64) -> Config {
    Config::new().seed(seed).proposal_size(2_000)
}

// =============================================================================
// FULL ROUNDS
// =============================================================================

#[test]
fn two_iteration_round_shrinks_to_consistent_subset() {
    let mut pipeline = Pipeline::new(
        space(),
        constraints(),
        Quadratic {
            convention: CallingConvention::SingleSample,
        },
        config(7),
    )
    .unwrap();

    let report = pipeline.construct(1).unwrap();
    assert_eq!(report.systems, 2);
    assert_eq!(report.training_size, 20);

    let summary = pipeline.analyze(1, &[3.0], 0).unwrap();
    assert!(summary.plausible > 0);
    assert!(
        summary.fraction < 0.5,
        "tight constraints should cut most of the space, kept {:.3}",
        summary.fraction
    );

    // Every retained sample is inside the space and actually satisfies the
    // recorded cutoffs when re-evaluated through the same systems.
    let plausible = pipeline.plausible(1).unwrap().clone();
    let record = pipeline.iteration(1).unwrap().analysis().unwrap().clone();
    for sample in plausible.iter() {
        assert!(pipeline.space().contains(sample));
    }
    let evaluations = pipeline.evaluate(1, &plausible).unwrap();
    for row in 0..plausible.len() {
        let imps: Vec<f64> = evaluations
            .iter()
            .map(|eval| eval.implausibilities[row])
            .collect();
        assert!(is_plausible(&imps, &record.cutoffs, record.wildcard));
    }

    // Second iteration trains on the plausible subset and analyzes again.
    let report = pipeline.construct(2).unwrap();
    assert_eq!(report.training_size, summary.plausible);
    let summary2 = pipeline.analyze(2, &[3.0], 0).unwrap();
    assert!(summary2.plausible > 0);
}

#[test]
fn runs_are_reproducible() {
    let run = || {
        let mut pipeline = Pipeline::new(
            space(),
            constraints(),
            Quadratic {
                convention: CallingConvention::SingleSample,
            },
            config(123),
        )
        .unwrap();
        pipeline.construct(1).unwrap();
        pipeline.analyze(1, &[3.0], 0).unwrap();
        pipeline.plausible(1).unwrap().clone()
    };

    let first = run();
    let second = run();
    assert_eq!(first, second);
}

#[test]
fn calling_convention_does_not_change_results() {
    let run = |convention| {
        let mut pipeline = Pipeline::new(
            space(),
            constraints(),
            Quadratic { convention },
            config(55),
        )
        .unwrap();
        pipeline.construct(1).unwrap();
        pipeline.analyze(1, &[3.0], 0).unwrap();
        pipeline.plausible(1).unwrap().clone()
    };

    let single = run(CallingConvention::SingleSample);
    let batched = run(CallingConvention::Batched);
    let both = run(CallingConvention::Both);
    assert_eq!(single, batched);
    assert_eq!(single, both);
}

#[test]
fn parallel_workers_match_serial() {
    let run = |workers| {
        let mut pipeline = Pipeline::new(
            space(),
            constraints(),
            Quadratic {
                convention: CallingConvention::SingleSample,
            },
            config(9).workers(workers),
        )
        .unwrap();
        pipeline.construct(1).unwrap();
        pipeline.analyze(1, &[3.0], 0).unwrap();
        pipeline.plausible(1).unwrap().clone()
    };

    assert_eq!(run(1), run(4));
}

// =============================================================================
// CUTOFF HANDLING
// =============================================================================

#[test]
fn relaxed_reanalysis_admits_more() {
    let mut pipeline = Pipeline::new(
        space(),
        constraints(),
        Quadratic {
            convention: CallingConvention::SingleSample,
        },
        config(31),
    )
    .unwrap();
    pipeline.construct(1).unwrap();

    let tight = pipeline.analyze(1, &[2.0], 0).unwrap();
    let relaxed = pipeline.reanalyze(1, &[4.0], 0).unwrap();
    assert!(relaxed.plausible >= tight.plausible);
}

#[test]
fn wildcard_exempts_one_constraint() {
    // Observed value for constraint 1 is unreachable, so every sample is
    // implausible there; the wildcard makes analysis depend on constraint
    // 0 alone.
    let constraints = ConstraintSet::new(vec![
        Constraint::new(0u64, 1.8, 0.05),
        Constraint::new(1u64, 100.0, 0.05),
    ])
    .unwrap();
    let mut pipeline = Pipeline::new(
        space(),
        constraints,
        Quadratic {
            convention: CallingConvention::SingleSample,
        },
        config(77),
    )
    .unwrap();
    pipeline.construct(1).unwrap();

    let blocked = pipeline.analyze(1, &[3.0, 3.0], 0);
    assert!(blocked.is_err());

    let rescued = pipeline.analyze(1, &[3.0, 3.0], 1).unwrap();
    assert!(rescued.plausible > 0);
}

#[test]
fn evaluate_reports_predictions_per_constraint() {
    let mut pipeline = Pipeline::new(
        space(),
        constraints(),
        Quadratic {
            convention: CallingConvention::SingleSample,
        },
        config(3),
    )
    .unwrap();
    pipeline.construct(1).unwrap();

    let probe = SampleSet::from_samples(vec![Sample::new(vec![1.0, 0.8])]);
    let evaluations = pipeline.evaluate(1, &probe).unwrap();
    assert_eq!(evaluations.len(), 2);

    // The model is inside the emulator's function class, so predictions at
    // the satisfying point should be close to the observations.
    let sum = &evaluations[0];
    assert_eq!(sum.id, ConstraintId::Scalar(0));
    assert!((sum.predictions[0].expectation - 1.8).abs() < 0.1);
    assert!(sum.predictions[0].variance >= 0.0);
    assert!(sum.implausibilities[0] < 3.0);
}
