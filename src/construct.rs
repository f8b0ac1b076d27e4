//! Construction engine: builds an iteration's emulator systems.
//!
//! The per-system pipeline is a fixed step sequence (active-parameter
//! determination, regression, covariance estimation), and every completed
//! step is checkpointed through the record store before the next begins.
//! Resuming an interrupted construction reloads the persisted progress and
//! only runs the missing steps; the report's step-run counters make that
//! observable.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use nalgebra::{DMatrix, DVector};

use crate::backup::BackupStore;
use crate::config::Config;
use crate::constraint::{ConstraintId, ConstraintSet};
use crate::covariance::{self, CovarianceFit};
use crate::error::{Error, Result};
use crate::iteration::{Iteration, SystemProgress};
use crate::lhs::latin_hypercube;
use crate::model::{evaluate_normalized, DistributionMode, Simulator};
use crate::pool::run_partitioned;
use crate::regression::{select_active, sensitivity_scores, PolyBasis, PolyFit};
use crate::space::{ParameterSpace, SampleSet};
use crate::store::{IterationRecord, RecordStore};
use crate::system::EmulatorSystem;

/// How many times each construction step actually ran in one call.
///
/// Resumed steps do not run, so after an interruption the counters show
/// exactly the remaining work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepRuns {
    /// Active-parameter determinations executed.
    pub active: usize,
    /// Regression fits executed.
    pub regression: usize,
    /// Covariance estimations executed.
    pub covariance: usize,
}

impl StepRuns {
    fn add(&mut self, other: StepRuns) {
        self.active += other.active;
        self.regression += other.regression;
        self.covariance += other.covariance;
    }
}

/// Report returned by a successful construction call.
#[derive(Debug, Clone)]
pub struct ConstructReport {
    /// Iteration that was constructed.
    pub iteration: usize,
    /// Number of systems built (one per constraint).
    pub systems: usize,
    /// Training-set size shared by all systems.
    pub training_size: usize,
    /// Step executions in this call (see [`StepRuns`]).
    pub runs: StepRuns,
    /// Wall-clock time of the call.
    pub elapsed: Duration,
}

/// Borrowed view of everything construction needs.
pub(crate) struct ConstructionEngine<'a> {
    pub space: &'a ParameterSpace,
    pub constraints: &'a ConstraintSet,
    pub config: &'a Config,
    pub model: &'a dyn Simulator,
    pub backup: &'a BackupStore,
    pub store: &'a RecordStore,
}

impl ConstructionEngine<'_> {
    /// Build iteration `index`.
    ///
    /// For `index == 1` the training set is a fresh Latin hypercube; for
    /// later iterations it is `previous_plausible`, the analyzed plausible
    /// subset of iteration `index - 1`. A persisted record for `index`
    /// short-circuits both the design and the model evaluation.
    pub fn construct(
        &self,
        index: usize,
        previous_plausible: Option<&SampleSet>,
    ) -> Result<(Iteration, ConstructReport)> {
        if index == 0 {
            return Err(Error::config("iteration numbering starts at 1"));
        }
        let start = Instant::now();

        // Step 1 + 2: sample set and model outputs, resumable wholesale.
        let (samples, outputs) = match self.store.load_iteration(index)? {
            Some(record) => {
                tracing::info!(iteration = index, "resuming from persisted iteration record");
                (record.samples, record.outputs.into_iter().collect())
            }
            None => {
                let samples = self.sample_set(index, previous_plausible)?;
                let outputs = self.evaluate_model(index, &samples)?;
                self.store.save_iteration(&IterationRecord {
                    index,
                    samples: samples.clone(),
                    outputs: outputs.clone().into_iter().collect(),
                    analysis: None,
                })?;
                (samples, outputs)
            }
        };

        let mut iteration = Iteration::new(index, samples, outputs)?;
        iteration.restore_progress(self.store.load_systems(index)?);

        // Steps 3-5, partitioned across the worker pool by training size.
        let unit_x = iteration.samples().to_unit(self.space).to_matrix();
        let n = iteration.samples().len();
        let ids = self.constraints.ids();
        let sizes = vec![n; ids.len()];

        let jobs: Vec<(ConstraintId, SystemProgress, DVector<f64>)> = ids
            .iter()
            .map(|&id| {
                let y = DVector::from_column_slice(
                    iteration.outputs(id).unwrap_or(&[]),
                );
                let progress = iteration
                    .progress(id)
                    .cloned()
                    .unwrap_or_default();
                (id, progress, y)
            })
            .collect();

        let results = run_partitioned(self.config.workers, &sizes, |i| {
            let (id, progress, y) = &jobs[i];
            self.fit_missing_steps(*id, &unit_x, y, progress.clone())
        });

        // Checkpoint every completed system before surfacing any error, so
        // a retry does not redo them.
        let mut runs = StepRuns::default();
        let mut completed: BTreeMap<ConstraintId, SystemProgress> = BTreeMap::new();
        let mut first_error = None;
        for (job, result) in jobs.iter().zip(results) {
            match result {
                Ok((progress, step_runs)) => {
                    self.store.save_system(index, job.0, &progress)?;
                    runs.add(step_runs);
                    completed.insert(job.0, progress);
                }
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        iteration.restore_progress(completed);
        let systems = self.build_systems(&iteration, &unit_x)?;
        iteration.finalize(systems)?;

        let report = ConstructReport {
            iteration: index,
            systems: ids.len(),
            training_size: n,
            runs,
            elapsed: start.elapsed(),
        };
        tracing::info!(
            iteration = index,
            systems = report.systems,
            training_size = report.training_size,
            "construction complete"
        );
        Ok((iteration, report))
    }

    /// Determine the training sample set for `index`.
    fn sample_set(
        &self,
        index: usize,
        previous_plausible: Option<&SampleSet>,
    ) -> Result<SampleSet> {
        if index == 1 {
            let n = self.config.init_samples_per_param * self.space.dim();
            let seed = self.config.seed.wrapping_add(index as u64);
            return Ok(latin_hypercube(self.space, n, seed));
        }
        match previous_plausible {
            Some(set) if !set.is_empty() => Ok(set.clone()),
            _ => Err(Error::PreviousUnanalyzed(index, index - 1)),
        }
    }

    /// Evaluate the model over the sample set, honoring its declared
    /// distribution mode, and return outputs keyed per constraint.
    fn evaluate_model(
        &self,
        index: usize,
        samples: &SampleSet,
    ) -> Result<BTreeMap<ConstraintId, Vec<f64>>> {
        let ids = self.constraints.ids();
        let matrix = match self.model.distribution_mode() {
            DistributionMode::CoordinatorOnly => {
                evaluate_normalized(self.model, self.backup, index, samples, &ids)?
            }
            DistributionMode::AllProcesses => {
                // Sample batches go to the workers; every worker calls the
                // model on its own chunk.
                let chunk_len = samples.len().div_ceil(self.config.workers).max(1);
                let chunks: Vec<SampleSet> = samples
                    .samples()
                    .chunks(chunk_len)
                    .map(|c| SampleSet::from_samples(c.to_vec()))
                    .collect();
                let sizes: Vec<usize> = chunks.iter().map(SampleSet::len).collect();
                let results = run_partitioned(self.config.workers, &sizes, |i| {
                    evaluate_normalized(self.model, self.backup, index, &chunks[i], &ids)
                });
                let mut out = DMatrix::zeros(samples.len(), ids.len());
                let mut row = 0;
                for result in results {
                    let m = result?;
                    for i in 0..m.nrows() {
                        out.set_row(row, &m.row(i));
                        row += 1;
                    }
                }
                out
            }
        };

        Ok(ids
            .iter()
            .enumerate()
            .map(|(k, &id)| (id, matrix.column(k).iter().cloned().collect()))
            .collect())
    }

    /// Run the steps still missing from `progress` for one system.
    fn fit_missing_steps(
        &self,
        id: ConstraintId,
        unit_x: &DMatrix<f64>,
        y: &DVector<f64>,
        mut progress: SystemProgress,
    ) -> Result<(SystemProgress, StepRuns)> {
        let mut runs = StepRuns::default();
        let n = unit_x.nrows();

        let active = match progress.active.clone() {
            Some(active) => active,
            None => {
                let scores = sensitivity_scores(unit_x, y);
                let active = select_active(&scores, self.config.active_threshold);
                tracing::debug!(constraint = %id, ?active, "active parameters determined");
                progress.active = Some(active.clone());
                runs.active = 1;
                active
            }
        };

        let x_active = unit_x.select_columns(active.iter());

        let regression = match progress.regression.clone() {
            Some(fit) => fit,
            None => {
                let basis = PolyBasis::new(active.len(), self.config.poly_order);
                if basis.n_terms() >= n {
                    return Err(Error::construction(
                        id,
                        format!(
                            "{} regression terms need more than {} training samples",
                            basis.n_terms(),
                            n
                        ),
                    ));
                }
                let fit = PolyFit::fit(basis, &x_active, y).ok_or_else(|| {
                    Error::construction(id, "singular regression design")
                })?;
                progress.regression = Some(fit.clone());
                runs.regression = 1;
                fit
            }
        };

        if progress.covariance.is_none() {
            let residuals = regression.residuals(&x_active, y);
            let fit = covariance::estimate(&x_active, &residuals).ok_or_else(|| {
                Error::construction(id, "singular covariance: no length scale factorizes")
            })?;
            progress.covariance = Some(fit.params);
            runs.covariance = 1;
        }

        Ok((progress, runs))
    }

    /// Assemble evaluable systems from complete progress records.
    fn build_systems(
        &self,
        iteration: &Iteration,
        unit_x: &DMatrix<f64>,
    ) -> Result<Vec<EmulatorSystem>> {
        let mut systems = Vec::with_capacity(self.constraints.len());
        for &id in &self.constraints.ids() {
            let progress = iteration
                .progress(id)
                .ok_or_else(|| Error::construction(id, "missing progress record"))?;
            let (Some(active), Some(regression), Some(params)) = (
                progress.active.clone(),
                progress.regression.clone(),
                progress.covariance.clone(),
            ) else {
                return Err(Error::construction(id, "incomplete progress record"));
            };
            let x_active = unit_x.select_columns(active.iter());
            let y = DVector::from_column_slice(iteration.outputs(id).unwrap_or(&[]));
            let residuals = regression.residuals(&x_active, &y);
            let covariance = CovarianceFit::from_params(params, &x_active, &residuals)
                .ok_or_else(|| {
                    Error::construction(id, "stored covariance no longer factorizes")
                })?;
            systems.push(EmulatorSystem {
                id,
                active,
                regression,
                covariance,
                training: x_active,
            });
        }
        Ok(systems)
    }
}
