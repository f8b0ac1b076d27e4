//! Persisted construction and analysis records.
//!
//! Layout: one JSON file per emulator system per iteration (its step
//! progress: active set, regression coefficients, covariance parameters)
//! and one per iteration (sample set, outputs, analysis record). Records
//! are independently addressable so partial-iteration resumption never
//! rewrites unrelated files. Writes go through a temp file and rename.
//!
//! With no directory configured the store is inert: saves succeed as
//! no-ops and loads find nothing, which keeps purely in-memory pipelines
//! on the same code path.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constraint::ConstraintId;
use crate::error::{Error, Result};
use crate::iteration::{AnalysisRecord, SystemProgress};
use crate::space::SampleSet;

/// Persisted per-iteration record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationRecord {
    /// Iteration ordinal.
    pub index: usize,
    /// The evaluated sample set.
    pub samples: SampleSet,
    /// Model outputs per constraint (pairs, JSON maps need string keys).
    pub outputs: Vec<(ConstraintId, Vec<f64>)>,
    /// Frozen analysis record, if the iteration was analyzed.
    pub analysis: Option<AnalysisRecord>,
}

/// File-backed (or inert) record store.
#[derive(Debug)]
pub struct RecordStore {
    dir: Option<PathBuf>,
}

impl RecordStore {
    /// Create a store rooted at `dir`, or an inert store for `None`.
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self { dir }
    }

    /// Whether records actually persist anywhere.
    pub fn is_persistent(&self) -> bool {
        self.dir.is_some()
    }

    /// Save one system's step progress.
    pub fn save_system(
        &self,
        iteration: usize,
        id: ConstraintId,
        progress: &SystemProgress,
    ) -> Result<()> {
        let Some(dir) = &self.dir else {
            return Ok(());
        };
        write_json(&system_path(dir, iteration, id), progress)
    }

    /// Load every persisted system progress record for an iteration.
    pub fn load_systems(&self, iteration: usize) -> Result<BTreeMap<ConstraintId, SystemProgress>> {
        let mut out = BTreeMap::new();
        let Some(dir) = &self.dir else {
            return Ok(out);
        };
        let prefix = format!("iter{iteration}_system_");
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !name.starts_with(&prefix) || !name.ends_with(".json") {
                continue;
            }
            let Some(id) = parse_id(&name[prefix.len()..name.len() - ".json".len()]) else {
                continue;
            };
            let progress: SystemProgress = read_json(&path)?;
            out.insert(id, progress);
        }
        Ok(out)
    }

    /// Save the per-iteration record.
    pub fn save_iteration(&self, record: &IterationRecord) -> Result<()> {
        let Some(dir) = &self.dir else {
            return Ok(());
        };
        write_json(&iteration_path(dir, record.index), record)
    }

    /// Load the per-iteration record, if present.
    pub fn load_iteration(&self, iteration: usize) -> Result<Option<IterationRecord>> {
        let Some(dir) = &self.dir else {
            return Ok(None);
        };
        let path = iteration_path(dir, iteration);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(read_json(&path)?))
    }
}

fn iteration_path(dir: &Path, iteration: usize) -> PathBuf {
    dir.join(format!("iter{iteration}.json"))
}

fn system_path(dir: &Path, iteration: usize, id: ConstraintId) -> PathBuf {
    dir.join(format!("iter{iteration}_system_{}.json", id_tag(id)))
}

fn id_tag(id: ConstraintId) -> String {
    match id {
        ConstraintId::Scalar(i) => format!("s{i}"),
        ConstraintId::Pair(a, b) => format!("p{a}_{b}"),
    }
}

fn parse_id(tag: &str) -> Option<ConstraintId> {
    if let Some(rest) = tag.strip_prefix('s') {
        return rest.parse().ok().map(ConstraintId::Scalar);
    }
    if let Some(rest) = tag.strip_prefix('p') {
        let (a, b) = rest.split_once('_')?;
        return Some(ConstraintId::Pair(a.parse().ok()?, b.parse().ok()?));
    }
    None
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_vec_pretty(value).map_err(std::io::Error::from)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let bytes = fs::read(path)?;
    serde_json::from_slice(&bytes).map_err(|source| Error::CorruptRecord {
        path: path.display().to_string(),
        source,
    })
}
