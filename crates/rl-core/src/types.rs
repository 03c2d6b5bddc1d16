//! Common data types for robustlimit

use serde::{Deserialize, Serialize};

/// A bounded real-valued model parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealVar {
    /// Parameter name
    pub name: String,
    /// Current value
    pub value: f64,
    /// Lower bound
    pub min: f64,
    /// Upper bound
    pub max: f64,
}

impl RealVar {
    /// Create a new variable
    pub fn new(name: impl Into<String>, value: f64, min: f64, max: f64) -> Self {
        Self { name: name.into(), value, min, max }
    }
}

/// Quality summary of a free fit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitSummary {
    /// Best-fit parameter values
    pub parameters: Vec<f64>,

    /// Negative log-likelihood at minimum
    pub nll: f64,

    /// Covariance quality on the Minuit scale:
    /// 0 = not available, 1 = diagonal approximation, 3 = full and accurate.
    pub cov_qual: i32,

    /// Estimated distance to minimum
    pub edm: f64,

    /// Optimizer convergence status
    pub converged: bool,
}

impl FitSummary {
    /// Covariance quality required for a fit to count as usable.
    pub const FULL_ACCURATE_COVARIANCE: i32 = 3;

    /// True if the fit has full covariance and its EDM does not exceed `tolerance`.
    pub fn is_good(&self, tolerance: f64) -> bool {
        self.cov_qual == Self::FULL_ACCURATE_COVARIANCE && self.edm <= tolerance
    }
}

/// Confidence interval for the parameter of interest.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    /// Lower edge
    pub lower: f64,
    /// Upper edge
    pub upper: f64,
    /// Best-fit value of the POI
    pub best_fit: f64,
    /// Confidence level the interval was built for
    pub cl: f64,
}

/// Result of a likelihood-ratio hypothesis test.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HypoTestSummary {
    /// Signed significance in standard deviations
    pub significance: f64,
    /// One-sided p-value of the null hypothesis
    pub p_value: f64,
    /// NLL of the free fit
    pub nll_free: f64,
    /// NLL with the null parameters fixed
    pub nll_null: f64,
}

/// Parameter assignment defining a null hypothesis.
///
/// Parameters not listed keep their current values in the model.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NullHypothesis {
    /// `(name, value)` pairs fixed under the null
    pub fixed: Vec<(String, f64)>,
}

impl NullHypothesis {
    /// Null hypothesis with a single parameter fixed.
    pub fn with_fixed(name: impl Into<String>, value: f64) -> Self {
        Self { fixed: vec![(name.into(), value)] }
    }

    /// Value fixed for `name`, if any.
    pub fn value_of(&self, name: &str) -> Option<f64> {
        self.fixed.iter().find(|(n, _)| n == name).map(|&(_, v)| v)
    }
}
