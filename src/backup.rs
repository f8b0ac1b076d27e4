//! Best-effort checkpoint store for model evaluations.
//!
//! The store keeps at most one record per (iteration, model-instance name)
//! key: the exact inputs handed to a model-evaluation call plus whatever
//! auxiliary payload the model chose to attach. Writes are last-write-wins.
//!
//! The store is explicitly best-effort. Misuse (an empty payload, an
//! unwritable directory) degrades to a no-op with a recoverable
//! [`BackupOutcome::Skipped`] signal and a `tracing::warn!`; it never
//! surfaces an error that could abort the model evaluation in progress.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One checkpoint record, keyed by (iteration, model name).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupRecord {
    /// Iteration the evaluation belonged to.
    pub iteration: usize,
    /// Model-instance name the record belongs to.
    pub model: String,
    /// The exact inputs given to the evaluation call.
    pub inputs: Value,
    /// Caller-supplied auxiliary payload.
    pub payload: Value,
}

/// Outcome of a backup write. Never an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupOutcome {
    /// The record was stored (and persisted, when a directory is set).
    Written,
    /// The write was a no-op; the reason is informational only.
    Skipped(String),
}

/// Last-write-wins store for [`BackupRecord`]s.
///
/// Records always live in memory; when a directory is configured they are
/// additionally mirrored to one JSON file per key so a later run can
/// recover them.
#[derive(Debug)]
pub struct BackupStore {
    dir: Option<PathBuf>,
    records: Mutex<HashMap<(usize, String), BackupRecord>>,
}

impl BackupStore {
    /// Create a store, optionally mirrored to `dir`.
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self {
            dir,
            records: Mutex::new(HashMap::new()),
        }
    }

    /// Write a record, overwriting any prior record with the same key.
    ///
    /// A null payload is treated as misuse and skipped: a backup with
    /// nothing in it cannot help resumption and usually means the caller
    /// forgot to fill it in.
    pub fn write(
        &self,
        iteration: usize,
        model: &str,
        inputs: Value,
        payload: Value,
    ) -> BackupOutcome {
        if payload.is_null() {
            tracing::warn!(iteration, model, "backup write skipped: empty payload");
            return BackupOutcome::Skipped("empty payload".to_string());
        }

        let record = BackupRecord {
            iteration,
            model: model.to_string(),
            inputs,
            payload,
        };

        if let Some(dir) = &self.dir {
            if let Err(e) = persist(dir, &record) {
                // Disk trouble must not abort the evaluation in progress;
                // the in-memory copy still serves reads within this run.
                tracing::warn!(iteration, model, error = %e, "backup not persisted to disk");
            }
        }

        let mut records = match self.records.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        records.insert((iteration, model.to_string()), record);
        BackupOutcome::Written
    }

    /// Read the most recently written record for (iteration, model).
    ///
    /// Falls back to the mirrored file when the in-memory map has no entry
    /// (e.g. after a restart).
    pub fn read(&self, iteration: usize, model: &str) -> Option<BackupRecord> {
        {
            let records = match self.records.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if let Some(record) = records.get(&(iteration, model.to_string())) {
                return Some(record.clone());
            }
        }
        let dir = self.dir.as_ref()?;
        let path = record_path(dir, iteration, model);
        let bytes = fs::read(&path).ok()?;
        match serde_json::from_slice::<BackupRecord>(&bytes) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "ignoring corrupt backup file");
                None
            }
        }
    }
}

fn record_path(dir: &Path, iteration: usize, model: &str) -> PathBuf {
    let sanitized: String = model
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    dir.join(format!("backup_iter{iteration}_{sanitized}.json"))
}

fn persist(dir: &Path, record: &BackupRecord) -> std::io::Result<()> {
    fs::create_dir_all(dir)?;
    let path = record_path(dir, record.iteration, &record.model);
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_vec_pretty(record)?)?;
    fs::rename(&tmp, &path)
}
