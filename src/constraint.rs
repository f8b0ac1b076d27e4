//! Observational constraints and their registry.
//!
//! Each constraint is one comparison point the emulator must match: an
//! identifier, an observed value and an observational uncertainty. One
//! emulator system is built per constraint per iteration.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Identifier of a constraint: a scalar index or a (group, index) pair.
///
/// Must be unique within a [`ConstraintSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConstraintId {
    /// Plain scalar identifier.
    Scalar(u64),
    /// Grouped identifier, e.g. (observable kind, bin index).
    Pair(u64, u64),
}

impl fmt::Display for ConstraintId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(i) => write!(f, "{i}"),
            Self::Pair(a, b) => write!(f, "({a}, {b})"),
        }
    }
}

impl From<u64> for ConstraintId {
    fn from(i: u64) -> Self {
        Self::Scalar(i)
    }
}

impl From<(u64, u64)> for ConstraintId {
    fn from((a, b): (u64, u64)) -> Self {
        Self::Pair(a, b)
    }
}

/// Observational uncertainty, symmetric or asymmetric about the value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Uncertainty {
    /// One standard deviation either side.
    Symmetric(f64),
    /// Distinct lower and upper standard deviations.
    Asymmetric {
        /// Uncertainty below the observed value.
        lower: f64,
        /// Uncertainty above the observed value.
        upper: f64,
    },
}

impl Uncertainty {
    /// The uncertainty on the side the emulator expectation falls on.
    ///
    /// For an asymmetric uncertainty the upper value applies when the
    /// expectation exceeds the observed value, the lower otherwise.
    pub fn on_side(&self, expectation_minus_observed: f64) -> f64 {
        match *self {
            Self::Symmetric(s) => s,
            Self::Asymmetric { lower, upper } => {
                if expectation_minus_observed > 0.0 {
                    upper
                } else {
                    lower
                }
            }
        }
    }

    fn is_valid(&self) -> bool {
        match *self {
            Self::Symmetric(s) => s.is_finite() && s >= 0.0,
            Self::Asymmetric { lower, upper } => {
                lower.is_finite() && upper.is_finite() && lower >= 0.0 && upper >= 0.0
            }
        }
    }
}

/// One observational comparison point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    /// Unique identifier within the set.
    pub id: ConstraintId,
    /// Observed value the emulator must reproduce.
    pub observed: f64,
    /// Observational uncertainty.
    pub uncertainty: Uncertainty,
}

impl Constraint {
    /// Create a constraint with symmetric uncertainty.
    pub fn new(id: impl Into<ConstraintId>, observed: f64, sigma: f64) -> Self {
        Self {
            id: id.into(),
            observed,
            uncertainty: Uncertainty::Symmetric(sigma),
        }
    }

    /// Create a constraint with asymmetric uncertainty.
    pub fn asymmetric(id: impl Into<ConstraintId>, observed: f64, lower: f64, upper: f64) -> Self {
        Self {
            id: id.into(),
            observed,
            uncertainty: Uncertainty::Asymmetric { lower, upper },
        }
    }
}

/// Ordered registry of constraints with unique identifiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstraintSet {
    constraints: Vec<Constraint>,
}

impl ConstraintSet {
    /// Build a registry, validating uniqueness and values.
    pub fn new(constraints: Vec<Constraint>) -> Result<Self> {
        if constraints.is_empty() {
            return Err(Error::config("constraint set must not be empty"));
        }
        for (i, c) in constraints.iter().enumerate() {
            if !c.observed.is_finite() {
                return Err(Error::config(format!(
                    "constraint {} has non-finite observed value",
                    c.id
                )));
            }
            if !c.uncertainty.is_valid() {
                return Err(Error::config(format!(
                    "constraint {} has invalid uncertainty",
                    c.id
                )));
            }
            if constraints[..i].iter().any(|prev| prev.id == c.id) {
                return Err(Error::config(format!(
                    "duplicate constraint identifier {}",
                    c.id
                )));
            }
        }
        Ok(Self { constraints })
    }

    /// Number of constraints.
    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    /// Whether the registry is empty (never true for a validated set).
    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    /// Constraints in insertion order.
    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    /// Identifiers in insertion order.
    pub fn ids(&self) -> Vec<ConstraintId> {
        self.constraints.iter().map(|c| c.id).collect()
    }

    /// Look up a constraint by identifier.
    pub fn get(&self, id: ConstraintId) -> Option<&Constraint> {
        self.constraints.iter().find(|c| c.id == id)
    }
}
