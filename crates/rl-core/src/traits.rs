//! Core traits for robustlimit
//!
//! These traits separate the robustness layer from the machinery it
//! drives: the consensus driver in `rl-inference` only sees a
//! [`Workspace`] (mutable parameter state with snapshots) and a
//! [`LikelihoodEngine`] (fits, intervals, hypothesis tests).

use crate::types::{FitSummary, HypoTestSummary, Interval, NullHypothesis, RealVar};
use crate::Result;
use rand::RngCore;

/// Negative log-likelihood of a parametric model against a dataset.
pub trait LogDensityModel {
    /// Dataset type the likelihood is evaluated on
    type Data: ?Sized;

    /// Number of parameters
    fn n_parameters(&self) -> usize;

    /// Parameter names
    fn parameter_names(&self) -> Vec<String>;

    /// Parameter bounds (min, max)
    fn parameter_bounds(&self) -> Vec<(f64, f64)>;

    /// Current parameter values, used as the optimizer starting point
    fn parameter_init(&self) -> Vec<f64>;

    /// Install a full parameter vector (e.g. a best-fit point)
    fn set_parameters(&mut self, params: &[f64]) -> Result<()>;

    /// Negative log-likelihood at `params`
    fn nll(&self, data: &Self::Data, params: &[f64]) -> Result<f64>;

    /// Gradient of the NLL (central differences unless overridden)
    fn grad_nll(&self, data: &Self::Data, params: &[f64]) -> Result<Vec<f64>> {
        let mut grad = vec![0.0; params.len()];
        let mut work = params.to_vec();
        for i in 0..params.len() {
            let eps = 1e-8 * params[i].abs().max(1.0);
            work[i] = params[i] + eps;
            let f_plus = self.nll(data, &work)?;
            work[i] = params[i] - eps;
            let f_minus = self.nll(data, &work)?;
            work[i] = params[i];
            grad[i] = (f_plus - f_minus) / (2.0 * eps);
        }
        Ok(grad)
    }
}

/// Models with a designated parameter of interest.
pub trait PoiModel {
    /// Index of the POI in parameter order
    fn poi_index(&self) -> Option<usize>;
}

/// Mutable parameter state of a statistical model.
///
/// This is the handle the consensus driver resets, randomizes and widens
/// between trials. Implementations own their snapshots.
pub trait Workspace {
    /// Current state of the parameter of interest
    fn poi(&self) -> Result<RealVar>;

    /// Set the POI value (clamped to its range by the implementation if needed)
    fn set_poi_value(&mut self, value: f64) -> Result<()>;

    /// Set the POI upper bound
    fn set_poi_max(&mut self, max: f64) -> Result<()>;

    /// Number of constrained nuisance parameters
    fn n_nuisances(&self) -> usize;

    /// Current nuisance parameter values
    fn nuisance_values(&self) -> Vec<f64>;

    /// Install nuisance parameter values
    fn set_nuisances(&mut self, values: &[f64]) -> Result<()>;

    /// Draw one joint sample from the nuisance constraint density
    fn sample_nuisances(&self, rng: &mut dyn RngCore) -> Result<Vec<f64>>;

    /// Save all parameter values and ranges under `name`
    fn save_snapshot(&mut self, name: &str);

    /// Restore the parameter values and ranges saved under `name`
    fn load_snapshot(&mut self, name: &str) -> Result<()>;
}

/// Likelihood engine: the numerically delicate primitive the robustness
/// layer retries around.
///
/// Every call may move the model's parameter values. An `Err` means the
/// engine could not produce a result for this starting point.
pub trait LikelihoodEngine<M: ?Sized, D: ?Sized> {
    /// Free fit of the signal+background density, leaving the model at the best-fit point
    fn fit(&self, model: &mut M, data: &D) -> Result<FitSummary>;

    /// Profile-likelihood confidence interval for the POI at confidence level `cl`
    fn confidence_interval(&self, model: &mut M, data: &D, cl: f64) -> Result<Interval>;

    /// Likelihood-ratio test of `null` against the free signal+background fit
    fn hypothesis_test(
        &self,
        model: &mut M,
        data: &D,
        null: &NullHypothesis,
    ) -> Result<HypoTestSummary>;
}
