//! Parameter space, samples and sample sets.
//!
//! A [`ParameterSpace`] is an immutable, ordered description of the tunable
//! model parameters. Declaration order is canonical: every array-like
//! representation of a sample uses it as the column order, and name-keyed
//! input is normalized to it on construction.

use std::collections::HashMap;

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One tunable model parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    /// Unique parameter name.
    pub name: String,
    /// Lower bound (inclusive).
    pub lower: f64,
    /// Upper bound (inclusive).
    pub upper: f64,
    /// Optional best-guess value, inside the bounds.
    pub estimate: Option<f64>,
}

impl Parameter {
    /// Create a parameter with the given name and bounds.
    pub fn new(name: impl Into<String>, lower: f64, upper: f64) -> Self {
        Self {
            name: name.into(),
            lower,
            upper,
            estimate: None,
        }
    }

    /// Attach an estimate value.
    pub fn with_estimate(mut self, estimate: f64) -> Self {
        self.estimate = Some(estimate);
        self
    }

    /// Width of the parameter range.
    pub fn range(&self) -> f64 {
        self.upper - self.lower
    }
}

/// Immutable, ordered set of parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterSpace {
    params: Vec<Parameter>,
}

impl ParameterSpace {
    /// Build a parameter space, validating names and bounds.
    ///
    /// Rejected eagerly: empty spaces, duplicate names, non-finite or
    /// inverted bounds, estimates outside the bounds.
    pub fn new(params: Vec<Parameter>) -> Result<Self> {
        if params.is_empty() {
            return Err(Error::config("parameter space must not be empty"));
        }
        let mut seen = HashMap::new();
        for (i, p) in params.iter().enumerate() {
            if p.name.is_empty() {
                return Err(Error::config("parameter name must not be empty"));
            }
            if let Some(prev) = seen.insert(p.name.clone(), i) {
                return Err(Error::config(format!(
                    "duplicate parameter name '{}' (positions {} and {})",
                    p.name, prev, i
                )));
            }
            if !p.lower.is_finite() || !p.upper.is_finite() || p.lower >= p.upper {
                return Err(Error::config(format!(
                    "parameter '{}' has invalid bounds [{}, {}]",
                    p.name, p.lower, p.upper
                )));
            }
            if let Some(est) = p.estimate {
                if !(p.lower..=p.upper).contains(&est) {
                    return Err(Error::config(format!(
                        "estimate {} of parameter '{}' is outside [{}, {}]",
                        est, p.name, p.lower, p.upper
                    )));
                }
            }
        }
        Ok(Self { params })
    }

    /// Number of parameters (dimensionality).
    pub fn dim(&self) -> usize {
        self.params.len()
    }

    /// Parameters in canonical order.
    pub fn params(&self) -> &[Parameter] {
        &self.params
    }

    /// Position of a parameter by name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.params.iter().position(|p| p.name == name)
    }

    /// Map a sample from parameter units to the unit cube.
    pub fn to_unit(&self, sample: &Sample) -> Sample {
        let values = sample
            .values()
            .iter()
            .zip(&self.params)
            .map(|(&v, p)| (v - p.lower) / p.range())
            .collect();
        Sample { values }
    }

    /// Map a unit-cube point back to parameter units.
    pub fn from_unit(&self, unit: &Sample) -> Sample {
        let values = unit
            .values()
            .iter()
            .zip(&self.params)
            .map(|(&u, p)| p.lower + u * p.range())
            .collect();
        Sample { values }
    }

    /// Check that every sample in the set has one coordinate per
    /// parameter.
    ///
    /// Externally supplied samples go through this before any matrix or
    /// projection work, so a wrong-length sample surfaces as a
    /// configuration error instead of an index panic deeper down.
    pub fn check_dims(&self, samples: &SampleSet) -> Result<()> {
        for (i, sample) in samples.iter().enumerate() {
            if sample.dim() != self.dim() {
                return Err(Error::config(format!(
                    "sample {} has {} coordinates for a {}-parameter space",
                    i,
                    sample.dim(),
                    self.dim()
                )));
            }
        }
        Ok(())
    }

    /// Whether every coordinate of the sample lies within its bounds.
    pub fn contains(&self, sample: &Sample) -> bool {
        sample
            .values()
            .iter()
            .zip(&self.params)
            .all(|(&v, p)| (p.lower..=p.upper).contains(&v))
    }
}

/// One point in parameter space, in canonical column order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    values: Vec<f64>,
}

impl Sample {
    /// Create a sample from values in canonical order.
    ///
    /// Length must equal the space dimensionality; checked at use sites
    /// that hold the space.
    pub fn new(values: Vec<f64>) -> Self {
        Self { values }
    }

    /// Create a sample from a name-keyed mapping, normalizing to canonical
    /// order. Every parameter must be present exactly once.
    pub fn from_named(space: &ParameterSpace, named: &HashMap<String, f64>) -> Result<Self> {
        if named.len() != space.dim() {
            return Err(Error::config(format!(
                "named sample has {} entries, space has {} parameters",
                named.len(),
                space.dim()
            )));
        }
        let mut values = Vec::with_capacity(space.dim());
        for p in space.params() {
            match named.get(&p.name) {
                Some(&v) => values.push(v),
                None => {
                    return Err(Error::config(format!(
                        "named sample is missing parameter '{}'",
                        p.name
                    )))
                }
            }
        }
        Ok(Self { values })
    }

    /// The coordinate values in canonical order.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Dimensionality of the sample.
    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// View as an nalgebra vector.
    pub fn as_vector(&self) -> DVector<f64> {
        DVector::from_column_slice(&self.values)
    }
}

/// Ordered sequence of samples. Index 0 is the first evaluated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleSet {
    samples: Vec<Sample>,
}

impl SampleSet {
    /// Create an empty sample set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a sample set from samples in evaluation order.
    pub fn from_samples(samples: Vec<Sample>) -> Self {
        Self { samples }
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Samples in insertion order.
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Append a sample, preserving insertion order.
    pub fn push(&mut self, sample: Sample) {
        self.samples.push(sample);
    }

    /// Iterate over samples in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }

    /// The subset at the given indices, preserving their order.
    pub fn subset(&self, indices: &[usize]) -> SampleSet {
        SampleSet {
            samples: indices.iter().map(|&i| self.samples[i].clone()).collect(),
        }
    }

    /// Pack into an (n x d) matrix, rows in insertion order.
    pub fn to_matrix(&self) -> DMatrix<f64> {
        let n = self.samples.len();
        let d = self.samples.first().map_or(0, Sample::dim);
        DMatrix::from_fn(n, d, |i, j| self.samples[i].values()[j])
    }

    /// Map every sample to the unit cube.
    pub fn to_unit(&self, space: &ParameterSpace) -> SampleSet {
        SampleSet {
            samples: self.samples.iter().map(|s| space.to_unit(s)).collect(),
        }
    }
}
