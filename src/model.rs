//! The external model interface.
//!
//! The engines never run the black-box simulation themselves; they hand
//! sample sets to a [`Simulator`] implementation and normalize whatever
//! output shape it returns. The calling convention and distribution mode
//! are closed tags the core matches on, not capabilities probed at
//! runtime.

use std::collections::BTreeMap;

use nalgebra::DMatrix;

use crate::backup::{BackupOutcome, BackupRecord, BackupStore};
use crate::constraint::ConstraintId;
use crate::error::{Error, Result};
use crate::space::{Sample, SampleSet};

/// How the simulator prefers to be called.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallingConvention {
    /// One sample per call.
    SingleSample,
    /// One call per sample set.
    Batched,
    /// Either; the core uses the batched path.
    Both,
}

/// Which processes may call the simulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistributionMode {
    /// Every worker process may call the model.
    AllProcesses,
    /// Only the coordinating process calls the model.
    CoordinatorOnly,
}

/// Model output in any of the accepted shapes.
///
/// The core normalizes all three to an (n_samples x n_requested) matrix
/// with columns in requested-identifier order.
#[derive(Debug, Clone)]
pub enum ModelOutput {
    /// One value per requested identifier, single-sample calls only.
    Scalars(Vec<f64>),
    /// (n_samples x n_requested) matrix, rows in sample order.
    Table(DMatrix<f64>),
    /// Per-identifier value sequences, each of length n_samples.
    Keyed(BTreeMap<ConstraintId, Vec<f64>>),
}

impl ModelOutput {
    /// Normalize to an (n_samples x n_requested) matrix.
    pub fn normalize(self, n_samples: usize, requested: &[ConstraintId]) -> Result<DMatrix<f64>> {
        match self {
            Self::Scalars(values) => {
                if n_samples != 1 {
                    return Err(Error::config(format!(
                        "scalar-shaped model output for a batch of {n_samples} samples"
                    )));
                }
                if values.len() != requested.len() {
                    return Err(Error::config(format!(
                        "model returned {} values for {} requested identifiers",
                        values.len(),
                        requested.len()
                    )));
                }
                Ok(DMatrix::from_row_slice(1, values.len(), &values))
            }
            Self::Table(m) => {
                if m.nrows() != n_samples || m.ncols() != requested.len() {
                    return Err(Error::config(format!(
                        "model output shape ({} x {}) does not match ({} x {})",
                        m.nrows(),
                        m.ncols(),
                        n_samples,
                        requested.len()
                    )));
                }
                Ok(m)
            }
            Self::Keyed(map) => {
                let mut out = DMatrix::zeros(n_samples, requested.len());
                for (col, id) in requested.iter().enumerate() {
                    let values = map.get(id).ok_or_else(|| {
                        Error::config(format!("model output missing identifier {id}"))
                    })?;
                    if values.len() != n_samples {
                        return Err(Error::config(format!(
                            "model output for identifier {id} has {} values for {} samples",
                            values.len(),
                            n_samples
                        )));
                    }
                    for (row, &v) in values.iter().enumerate() {
                        out[(row, col)] = v;
                    }
                }
                Ok(out)
            }
        }
    }
}

/// Scoped handle a simulator receives during one evaluation call.
///
/// Grants access to the backup store for opportunistic mid-evaluation
/// checkpointing. Contexts are created by the engines around each call and
/// cannot be constructed or retained elsewhere, so backup writes are
/// structurally tied to an evaluation in progress.
pub struct EvalContext<'a> {
    store: &'a BackupStore,
    iteration: usize,
    model: &'a str,
}

impl<'a> EvalContext<'a> {
    pub(crate) fn new(store: &'a BackupStore, iteration: usize, model: &'a str) -> Self {
        Self {
            store,
            iteration,
            model,
        }
    }

    /// Iteration this evaluation belongs to.
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    /// Checkpoint the call inputs plus an auxiliary payload.
    ///
    /// Best-effort: never fails, see [`BackupStore::write`].
    pub fn backup_write(
        &self,
        inputs: serde_json::Value,
        payload: serde_json::Value,
    ) -> BackupOutcome {
        self.store
            .write(self.iteration, self.model, inputs, payload)
    }

    /// Read back the most recent checkpoint for this iteration and model.
    pub fn backup_read(&self) -> Option<BackupRecord> {
        self.store.read(self.iteration, self.model)
    }
}

/// A wrapped black-box simulation model.
///
/// Implementors override the evaluation method matching their declared
/// [`CallingConvention`]; the default implementations delegate each method
/// to the other, so overriding one of the two is sufficient.
pub trait Simulator: Send + Sync {
    /// Model-instance name, used as the backup-record key.
    fn name(&self) -> &str;

    /// Declared calling convention.
    fn calling_convention(&self) -> CallingConvention;

    /// Declared distribution mode.
    fn distribution_mode(&self) -> DistributionMode {
        DistributionMode::CoordinatorOnly
    }

    /// Evaluate one sample for the requested identifiers.
    fn evaluate_single(
        &self,
        ctx: &EvalContext<'_>,
        sample: &Sample,
        requested: &[ConstraintId],
    ) -> ModelOutput {
        let set = SampleSet::from_samples(vec![sample.clone()]);
        self.evaluate_batch(ctx, &set, requested)
    }

    /// Evaluate a sample set for the requested identifiers.
    fn evaluate_batch(
        &self,
        ctx: &EvalContext<'_>,
        samples: &SampleSet,
        requested: &[ConstraintId],
    ) -> ModelOutput {
        let mut map: BTreeMap<ConstraintId, Vec<f64>> = requested
            .iter()
            .map(|&id| (id, Vec::with_capacity(samples.len())))
            .collect();
        for sample in samples.iter() {
            if let ModelOutput::Scalars(values) = self.evaluate_single(ctx, sample, requested) {
                for (&id, v) in requested.iter().zip(values) {
                    if let Some(col) = map.get_mut(&id) {
                        col.push(v);
                    }
                }
            }
        }
        ModelOutput::Keyed(map)
    }

    /// Model-discrepancy variance per requested identifier.
    ///
    /// Enters the implausibility denominator alongside the emulator
    /// variance and the squared observational uncertainty. Defaults to
    /// zero for every identifier.
    fn discrepancy_variance(&self, samples: &SampleSet, requested: &[ConstraintId]) -> Vec<f64> {
        let _ = samples;
        vec![0.0; requested.len()]
    }
}

/// Run one model evaluation according to the declared convention and
/// normalize the output.
pub(crate) fn evaluate_normalized(
    model: &dyn Simulator,
    store: &BackupStore,
    iteration: usize,
    samples: &SampleSet,
    requested: &[ConstraintId],
) -> Result<DMatrix<f64>> {
    let ctx = EvalContext::new(store, iteration, model.name());
    match model.calling_convention() {
        CallingConvention::SingleSample => {
            let mut out = DMatrix::zeros(samples.len(), requested.len());
            for (i, sample) in samples.iter().enumerate() {
                let row = model
                    .evaluate_single(&ctx, sample, requested)
                    .normalize(1, requested)?;
                out.set_row(i, &row.row(0));
            }
            Ok(out)
        }
        CallingConvention::Batched | CallingConvention::Both => model
            .evaluate_batch(&ctx, samples, requested)
            .normalize(samples.len(), requested),
    }
}
