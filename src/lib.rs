//! Iterative emulation and history matching for expensive black-box models.
//!
//! The crate shrinks a model's parameter space toward the region compatible
//! with a set of observational constraints. Each iteration trains one cheap
//! emulator system per constraint (polynomial regression plus a Gaussian
//! residual process), classifies a large proposal set by implausibility
//! against user-supplied cutoffs, and carries the surviving plausible
//! subset into the next iteration as its training design.
//!
//! # Usage
//!
//! Implement [`Simulator`] for the model, describe its parameters and the
//! observations, then drive [`Pipeline`] through
//! `construct -> analyze -> construct` rounds:
//!
//! ```no_run
//! use histmatch::{
//!     CallingConvention, Config, Constraint, ConstraintId, ConstraintSet,
//!     EvalContext, ModelOutput, Parameter, ParameterSpace, Pipeline, Sample,
//!     Simulator,
//! };
//!
//! struct Line;
//!
//! impl Simulator for Line {
//!     fn name(&self) -> &str {
//!         "line"
//!     }
//!     fn calling_convention(&self) -> CallingConvention {
//!         CallingConvention::SingleSample
//!     }
//!     fn evaluate_single(
//!         &self,
//!         _ctx: &EvalContext<'_>,
//!         sample: &Sample,
//!         requested: &[ConstraintId],
//!     ) -> ModelOutput {
//!         let sum: f64 = sample.values().iter().sum();
//!         ModelOutput::Scalars(vec![sum; requested.len()])
//!     }
//! }
//!
//! # fn main() -> histmatch::Result<()> {
//! let space = ParameterSpace::new(vec![
//!     Parameter::new("a", -5.0, 5.0),
//!     Parameter::new("b", -5.0, 5.0),
//! ])?;
//! let constraints = ConstraintSet::new(vec![Constraint::new(0u64, 1.2, 0.05)])?;
//! let mut pipeline = Pipeline::new(space, constraints, Line, Config::default())?;
//!
//! pipeline.construct(1)?;
//! let summary = pipeline.analyze(1, &[3.0], 0)?;
//! println!("plausible fraction: {:.3}", summary.fraction);
//! # Ok(())
//! # }
//! ```
//!
//! # Determinism and resumption
//!
//! All sampling is seeded from [`Config::seed`], so a run is reproducible
//! bit for bit. With [`Config::store_dir`] set, every construction step and
//! analysis result is checkpointed as it completes; a new process pointed
//! at the same directory resumes from the last finished step instead of
//! redoing the work.

mod analyze;
mod backup;
mod config;
mod constraint;
mod construct;
mod covariance;
mod error;
mod iteration;
mod lhs;
mod model;
mod partition;
mod pipeline;
mod pool;
mod regression;
mod space;
mod store;
mod system;

pub use analyze::{is_plausible, validate_cutoffs, AnalysisSummary};
pub use backup::{BackupOutcome, BackupRecord, BackupStore};
pub use config::Config;
pub use constraint::{Constraint, ConstraintId, ConstraintSet, Uncertainty};
pub use construct::{ConstructReport, StepRuns};
pub use error::{Error, Result};
pub use iteration::{AnalysisRecord, Iteration, IterationStatus, SystemProgress};
pub use lhs::latin_hypercube;
pub use model::{
    CallingConvention, DistributionMode, EvalContext, ModelOutput, Simulator,
};
pub use pipeline::{ConstraintEvaluation, Pipeline};
pub use space::{Parameter, ParameterSpace, Sample, SampleSet};
pub use system::{EmulatorSystem, Prediction};
