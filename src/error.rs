//! Error types for emulator construction and analysis.
//!
//! The taxonomy separates four failure classes with different propagation
//! rules:
//! - configuration errors are rejected eagerly, before any model evaluation;
//! - construction errors abort the affected iteration and name the
//!   offending constraint;
//! - analysis blocking conditions refuse the next iteration's construction
//!   until the cutoffs are relaxed and the iteration reanalyzed;
//! - backup misuse is *not* an error at all (see [`crate::backup`]) and
//!   never reaches this enum.

use crate::constraint::ConstraintId;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced to the orchestration layer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration, parameter space, or analysis parameters.
    ///
    /// Rejected before any model evaluation and never silently corrected.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// An emulator system could not be fit.
    ///
    /// Construction aborts for the whole iteration, but systems that
    /// completed earlier remain checkpointed and are not recomputed on
    /// retry.
    #[error("construction failed for constraint {constraint}: {reason}")]
    Construction {
        /// The constraint whose system could not be fit.
        constraint: ConstraintId,
        /// What went wrong (insufficient samples, singular covariance, ...).
        reason: String,
    },

    /// The plausible count fell below the hard minimum.
    ///
    /// Construction of the next iteration is refused until the iteration is
    /// reanalyzed with relaxed cutoffs.
    #[error(
        "analysis blocked: {plausible} plausible samples, hard minimum is {hard_minimum}; \
         relax the cutoffs and reanalyze"
    )]
    AnalysisBlocked {
        /// Number of samples that passed the implausibility test.
        plausible: usize,
        /// Configured hard minimum.
        hard_minimum: usize,
    },

    /// The iteration has already been analyzed with a fixed parameter set.
    ///
    /// Changing cutoffs or the wildcard count requires a full reanalysis so
    /// that every verdict for one iteration used one consistent parameter
    /// set.
    #[error("iteration {0} is already analyzed; rerun analysis from scratch to change parameters")]
    AlreadyAnalyzed(usize),

    /// The operation needs a construction-complete iteration.
    #[error("iteration {0} is not construction-complete")]
    NotConstructed(usize),

    /// No iteration with this number exists yet.
    #[error("unknown iteration {0}")]
    UnknownIteration(usize),

    /// The previous iteration must be analyzed before this one can start.
    #[error("iteration {0} requires the plausible subset of iteration {1}, which is unanalyzed")]
    PreviousUnanalyzed(usize, usize),

    /// Persistence failure on the construction or analysis path.
    ///
    /// Best-effort backup writes do not use this variant; only the record
    /// store required for resumption does.
    #[error("store error: {0}")]
    Store(#[from] std::io::Error),

    /// A persisted record could not be decoded.
    #[error("corrupt record {path}: {source}")]
    CorruptRecord {
        /// File that failed to decode.
        path: String,
        /// Underlying decode error.
        #[source]
        source: serde_json::Error,
    },
}

impl Error {
    /// Shorthand for a configuration error.
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Shorthand for a construction error naming its constraint.
    pub(crate) fn construction(constraint: ConstraintId, reason: impl Into<String>) -> Self {
        Error::Construction {
            constraint,
            reason: reason.into(),
        }
    }
}
