//! Configuration for the emulator pipeline.
//!
//! All tunable behavior is carried in an explicit [`Config`] threaded
//! through construction and analysis calls. There is no ambient mutable
//! state: the random seed, regression settings and plausibility minima all
//! live here, and an iteration freezes the analysis parameters it was
//! analyzed with.

use std::path::PathBuf;

use crate::error::{Error, Result};

/// Configuration options for a [`crate::Pipeline`].
#[derive(Debug, Clone)]
pub struct Config {
    // =========================================================================
    // Sampling
    // =========================================================================
    /// Number of design samples for the first iteration, per parameter.
    ///
    /// The initial Latin hypercube has `init_samples_per_param * d` points
    /// for a `d`-dimensional space. Default: 10.
    pub init_samples_per_param: usize,

    /// Number of proposal samples drawn per analysis call.
    ///
    /// The analysis engine classifies this many candidates against the
    /// fitted systems. Default: 10,000.
    pub proposal_size: usize,

    /// Seed for all random draws (design and proposal sampling).
    ///
    /// Draws for iteration `n` use `seed + n`, so reconstructing an
    /// iteration reproduces its design exactly. Default: 0.
    pub seed: u64,

    // =========================================================================
    // Regression
    // =========================================================================
    /// Maximum polynomial order of the regression basis. Default: 2.
    pub poly_order: usize,

    /// Threshold on the normalized first-order coefficient magnitude above
    /// which a parameter is considered active. Default: 0.05.
    ///
    /// Scores are normalized so the largest is 1.0; the top-scoring
    /// parameter is always retained regardless of this threshold.
    pub active_threshold: f64,

    // =========================================================================
    // Analysis minima
    // =========================================================================
    /// Hard minimum plausible count.
    ///
    /// Below this, analysis reports a blocking condition and the next
    /// iteration's construction is refused. Default: 10.
    pub hard_min_plausible: usize,

    /// Soft minimum plausible count.
    ///
    /// Below this (but at or above the hard minimum) analysis logs a
    /// warning and flags the summary; execution continues. Default: 100.
    pub soft_min_plausible: usize,

    // =========================================================================
    // Workers and persistence
    // =========================================================================
    /// Number of worker threads for system fitting and proposal
    /// classification. Default: 1 (serial).
    pub workers: usize,

    /// Directory for per-system and per-iteration records and backup
    /// payloads. `None` keeps everything in memory (no resumption across
    /// runs). Default: None.
    pub store_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            init_samples_per_param: 10,
            proposal_size: 10_000,
            seed: 0,
            poly_order: 2,
            active_threshold: 0.05,
            hard_min_plausible: 10,
            soft_min_plausible: 100,
            workers: 1,
            store_dir: None,
        }
    }
}

impl Config {
    /// Create a configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Small configuration for fast exploratory runs.
    ///
    /// - 5 design samples per parameter
    /// - 2,000 proposal samples
    /// - first-order regression
    pub fn quick() -> Self {
        Self {
            init_samples_per_param: 5,
            proposal_size: 2_000,
            poly_order: 1,
            soft_min_plausible: 50,
            ..Default::default()
        }
    }

    /// Generous configuration for production emulation runs.
    ///
    /// - 20 design samples per parameter
    /// - 100,000 proposal samples
    pub fn thorough() -> Self {
        Self {
            init_samples_per_param: 20,
            proposal_size: 100_000,
            soft_min_plausible: 500,
            ..Default::default()
        }
    }

    // =========================================================================
    // Builder methods
    // =========================================================================

    /// Set the initial design size per parameter.
    pub fn init_samples_per_param(mut self, n: usize) -> Self {
        assert!(n > 0, "init_samples_per_param must be positive");
        self.init_samples_per_param = n;
        self
    }

    /// Set the proposal sample count per analysis.
    pub fn proposal_size(mut self, n: usize) -> Self {
        assert!(n > 0, "proposal_size must be positive");
        self.proposal_size = n;
        self
    }

    /// Set the random seed.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set the maximum polynomial order of the regression basis.
    pub fn poly_order(mut self, order: usize) -> Self {
        assert!((1..=3).contains(&order), "poly_order must be 1, 2 or 3");
        self.poly_order = order;
        self
    }

    /// Set the active-parameter significance threshold.
    pub fn active_threshold(mut self, t: f64) -> Self {
        assert!(
            (0.0..=1.0).contains(&t),
            "active_threshold must be in [0, 1]"
        );
        self.active_threshold = t;
        self
    }

    /// Set the hard minimum plausible count.
    pub fn hard_min_plausible(mut self, n: usize) -> Self {
        self.hard_min_plausible = n;
        self
    }

    /// Set the soft minimum plausible count.
    pub fn soft_min_plausible(mut self, n: usize) -> Self {
        self.soft_min_plausible = n;
        self
    }

    /// Set the worker thread count.
    pub fn workers(mut self, n: usize) -> Self {
        assert!(n > 0, "workers must be positive");
        self.workers = n;
        self
    }

    /// Set the record/backup directory.
    pub fn store_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.store_dir = Some(dir.into());
        self
    }

    /// Check the configuration for consistency.
    ///
    /// Called eagerly by [`crate::Pipeline::new`], before any model
    /// evaluation.
    pub fn validate(&self) -> Result<()> {
        if self.init_samples_per_param == 0 {
            return Err(Error::config("init_samples_per_param must be positive"));
        }
        if self.proposal_size == 0 {
            return Err(Error::config("proposal_size must be positive"));
        }
        if !(1..=3).contains(&self.poly_order) {
            return Err(Error::config("poly_order must be 1, 2 or 3"));
        }
        if !(0.0..=1.0).contains(&self.active_threshold) {
            return Err(Error::config("active_threshold must be in [0, 1]"));
        }
        if self.workers == 0 {
            return Err(Error::config("workers must be positive"));
        }
        if self.soft_min_plausible < self.hard_min_plausible {
            return Err(Error::config(
                "soft_min_plausible must be >= hard_min_plausible",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.init_samples_per_param, 10);
        assert_eq!(config.proposal_size, 10_000);
        assert_eq!(config.poly_order, 2);
        assert_eq!(config.workers, 1);
    }

    #[test]
    fn test_preset_configs() {
        assert!(Config::quick().validate().is_ok());
        assert!(Config::thorough().validate().is_ok());
        assert_eq!(Config::quick().poly_order, 1);
        assert_eq!(Config::thorough().proposal_size, 100_000);
    }

    #[test]
    fn test_builder_methods() {
        let config = Config::new()
            .proposal_size(500)
            .seed(7)
            .poly_order(1)
            .workers(4);
        assert_eq!(config.proposal_size, 500);
        assert_eq!(config.seed, 7);
        assert_eq!(config.poly_order, 1);
        assert_eq!(config.workers, 4);
    }

    #[test]
    fn test_validation_rejects_inverted_minima() {
        let mut config = Config::default();
        config.hard_min_plausible = 200;
        config.soft_min_plausible = 100;
        assert!(config.validate().is_err());
    }

    #[test]
    #[should_panic]
    fn test_invalid_poly_order() {
        let _ = Config::new().poly_order(7);
    }
}
