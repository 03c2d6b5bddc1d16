//! Run configuration for the consensus driver.

use crate::minimizer::MinimizerSpec;
use crate::optimizer::MinimizerKind;
use rl_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// What a run computes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Upper limit on the POI
    #[default]
    Limit,
    /// Significance of the signal against POI = 0
    Significance,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Limit => f.write_str("limit"),
            Mode::Significance => f.write_str("significance"),
        }
    }
}

/// Options of a robust profile-likelihood run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfileLikelihoodConfig {
    /// `Family` or `Family,Algorithm` installed for the run.
    #[serde(default = "default_minimizer_algo")]
    pub minimizer_algo: String,

    /// Minimizer tolerance; also the EDM cut of the pre-fit.
    #[serde(default = "default_minimizer_tolerance")]
    pub minimizer_tolerance: f64,

    /// Hard cap on trials.
    #[serde(default = "default_one")]
    pub max_tries: usize,

    /// Accepted trials needed before consensus is evaluated (1 = first success wins).
    #[serde(default = "default_one")]
    pub tries: usize,

    /// Relative distance from the median below which a trial is an inlier.
    #[serde(default = "default_max_rel_deviation")]
    pub max_rel_deviation: f64,

    /// Fraction of accepted trials allowed to be outliers.
    #[serde(default = "default_max_outlier_fraction")]
    pub max_outlier_fraction: f64,

    /// Outlier count that abandons the run.
    #[serde(default = "default_max_outliers")]
    pub max_outliers: usize,

    /// Fit s+b before each trial and skip the trial on a poor fit.
    #[serde(default)]
    pub pre_fit: bool,

    /// Confidence level of the limit.
    #[serde(default = "default_cl")]
    pub cl: f64,

    /// -1 silences everything, 0 prints the result, higher values add diagnostics.
    #[serde(default)]
    pub verbosity: i32,

    /// Randomize nuisance parameters between trials.
    #[serde(default = "default_true")]
    pub with_systematics: bool,

    /// Limit or significance.
    #[serde(default)]
    pub mode: Mode,
}

fn default_minimizer_algo() -> String {
    crate::minimizer::DEFAULT_FAMILY.to_string()
}

fn default_minimizer_tolerance() -> f64 {
    1e-3
}

fn default_one() -> usize {
    1
}

fn default_max_rel_deviation() -> f64 {
    0.05
}

fn default_max_outlier_fraction() -> f64 {
    0.25
}

fn default_max_outliers() -> usize {
    3
}

fn default_cl() -> f64 {
    0.95
}

fn default_true() -> bool {
    true
}

impl Default for ProfileLikelihoodConfig {
    fn default() -> Self {
        Self {
            minimizer_algo: default_minimizer_algo(),
            minimizer_tolerance: default_minimizer_tolerance(),
            max_tries: default_one(),
            tries: default_one(),
            max_rel_deviation: default_max_rel_deviation(),
            max_outlier_fraction: default_max_outlier_fraction(),
            max_outliers: default_max_outliers(),
            pre_fit: false,
            cl: default_cl(),
            verbosity: 0,
            with_systematics: true,
            mode: Mode::Limit,
        }
    }
}

impl ProfileLikelihoodConfig {
    /// Minimizer selection to install for the run.
    pub fn minimizer_spec(&self) -> MinimizerSpec {
        MinimizerSpec::new(self.minimizer_algo.clone(), self.minimizer_tolerance)
    }

    /// Reject option combinations the driver cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_tries == 0 {
            return Err(Error::Validation("max_tries must be at least 1".to_string()));
        }
        if self.tries == 0 {
            return Err(Error::Validation("tries must be at least 1".to_string()));
        }
        if !(self.cl > 0.0 && self.cl < 1.0) {
            return Err(Error::Validation(format!("cl must be in (0, 1), got {}", self.cl)));
        }
        if !(self.max_rel_deviation.is_finite() && self.max_rel_deviation > 0.0) {
            return Err(Error::Validation(format!(
                "max_rel_deviation must be positive, got {}",
                self.max_rel_deviation
            )));
        }
        if !(0.0..=1.0).contains(&self.max_outlier_fraction) {
            return Err(Error::Validation(format!(
                "max_outlier_fraction must be in [0, 1], got {}",
                self.max_outlier_fraction
            )));
        }
        let spec = self.minimizer_spec();
        spec.validate()?;
        let (family, algorithm) = spec.split()?;
        MinimizerKind::from_names(family, algorithm.unwrap_or_default())?;
        if self.tries > self.max_tries {
            log::warn!(
                "tries ({}) exceeds max_tries ({}): consensus can never be reached",
                self.tries,
                self.max_tries
            );
        }
        Ok(())
    }
}
