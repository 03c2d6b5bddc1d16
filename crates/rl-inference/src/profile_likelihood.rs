//! Profile likelihood calculator (frequentist).
//!
//! Two-sided profile-likelihood intervals and likelihood-ratio tests for a
//! single parameter of interest. Conditional fits fix parameters by clamping
//! their bounds (`lo == hi`) rather than cloning the model, and warm-start
//! from the previous conditional minimum.

use crate::mle::MaximumLikelihoodEstimator;
use rl_core::traits::{LikelihoodEngine, LogDensityModel, PoiModel, Workspace};
use rl_core::{Error, FitSummary, HypoTestSummary, Interval, NullHypothesis, Result};
use statrs::distribution::{ContinuousCDF, Normal};
use std::f64::consts::SQRT_2;

fn poi_index(model: &(impl PoiModel + ?Sized)) -> Result<usize> {
    model.poi_index().ok_or_else(|| Error::Validation("No POI defined".to_string()))
}

/// One-sided upper-tail probability of a standard normal.
fn normal_sf(z: f64) -> f64 {
    0.5 * statrs::function::erf::erfc(z / SQRT_2)
}

/// Half the chi-square(1) quantile: the NLL rise bounding a two-sided interval.
///
/// Uses `chi2_1^-1(cl) = (Phi^-1((1 + cl) / 2))^2`.
pub fn delta_nll_threshold(cl: f64) -> Result<f64> {
    if !(cl > 0.0 && cl < 1.0) {
        return Err(Error::Validation(format!("confidence level must be in (0, 1), got {cl}")));
    }
    let normal = Normal::new(0.0, 1.0).map_err(|e| Error::Computation(e.to_string()))?;
    let z = normal.inverse_cdf(0.5 * (1.0 + cl));
    Ok(0.5 * z * z)
}

/// Profile-likelihood engine for any bounded model with a POI.
#[derive(Debug, Clone)]
pub struct ProfileLikelihoodCalculator {
    mle: MaximumLikelihoodEstimator,
    /// Relative tolerance on the interval edges
    rtol: f64,
    /// Maximum bisection steps per edge
    max_bisection: usize,
}

impl ProfileLikelihoodCalculator {
    /// Calculator with default settings
    pub fn new() -> Self {
        Self { mle: MaximumLikelihoodEstimator::new(), rtol: 1e-5, max_bisection: 100 }
    }

    /// Profiled `NLL(mu) - NLL_hat` at a fixed POI value, warm-starting from `warm`.
    fn profile_delta<M>(
        &self,
        model: &M,
        data: &M::Data,
        poi: usize,
        mu: f64,
        nll_hat: f64,
        warm: &mut Vec<f64>,
    ) -> Result<f64>
    where
        M: LogDensityModel + ?Sized,
    {
        let mut bounds = model.parameter_bounds();
        bounds[poi] = (mu, mu);
        warm[poi] = mu;
        let fixed = self.mle.fit_minimum_from_with_bounds(model, data, warm, &bounds)?;
        if !fixed.converged {
            log::debug!("conditional fit at mu={mu} did not converge: {}", fixed.message);
        }
        warm.clone_from(&fixed.parameters);
        Ok((fixed.fval - nll_hat).max(0.0))
    }

    /// Bisect for the POI value where the profiled ΔNLL crosses `threshold`.
    ///
    /// `inside` has ΔNLL below the threshold, `outside` above it.
    #[allow(clippy::too_many_arguments)]
    fn bisect<M>(
        &self,
        model: &M,
        data: &M::Data,
        poi: usize,
        nll_hat: f64,
        threshold: f64,
        mut inside: f64,
        mut outside: f64,
        warm: &mut Vec<f64>,
    ) -> Result<f64>
    where
        M: LogDensityModel + ?Sized,
    {
        for _ in 0..self.max_bisection {
            if (outside - inside).abs() <= self.rtol * inside.abs().max(outside.abs()).max(1.0) {
                break;
            }
            let mid = 0.5 * (inside + outside);
            if self.profile_delta(model, data, poi, mid, nll_hat, warm)? < threshold {
                inside = mid;
            } else {
                outside = mid;
            }
        }
        Ok(0.5 * (inside + outside))
    }

    /// Compute the interval without going through the engine trait.
    pub fn interval<M>(&self, model: &mut M, data: &M::Data, cl: f64) -> Result<Interval>
    where
        M: LogDensityModel + PoiModel + ?Sized,
    {
        let threshold = delta_nll_threshold(cl)?;
        let poi = poi_index(&*model)?;
        let (lo, hi) = model.parameter_bounds()[poi];
        if !(lo.is_finite() && hi.is_finite() && hi > lo) {
            return Err(Error::Validation(format!("POI range [{lo}, {hi}] must be finite")));
        }

        let free = self.mle.fit_minimum(&*model, data)?;
        if !free.converged {
            log::debug!("free fit did not converge: {}", free.message);
        }
        let mu_hat = free.parameters[poi];
        let nll_hat = free.fval;

        let mut warm = free.parameters.clone();
        let upper = if self.profile_delta(&*model, data, poi, hi, nll_hat, &mut warm)? < threshold {
            hi
        } else {
            warm.clone_from(&free.parameters);
            self.bisect(&*model, data, poi, nll_hat, threshold, mu_hat, hi, &mut warm)?
        };

        warm.clone_from(&free.parameters);
        let lower = if mu_hat <= lo
            || self.profile_delta(&*model, data, poi, lo, nll_hat, &mut warm)? < threshold
        {
            lo
        } else {
            warm.clone_from(&free.parameters);
            self.bisect(&*model, data, poi, nll_hat, threshold, mu_hat, lo, &mut warm)?
        };

        model.set_parameters(&free.parameters)?;
        log::debug!("profile interval: [{lower}, {upper}] (mu_hat = {mu_hat}, cl = {cl})");

        Ok(Interval { lower, upper, best_fit: mu_hat, cl })
    }

    /// Likelihood-ratio test of `null` against the free fit.
    ///
    /// The significance is `sign(mu_hat - mu_null) * sqrt(q0)`.
    pub fn hypotest<M>(&self, model: &mut M, data: &M::Data, null: &NullHypothesis) -> Result<HypoTestSummary>
    where
        M: LogDensityModel + PoiModel + ?Sized,
    {
        let poi = poi_index(&*model)?;
        let names = model.parameter_names();
        let mut null_bounds = model.parameter_bounds();
        let mut null_init = model.parameter_init();
        for (name, value) in &null.fixed {
            let idx = names
                .iter()
                .position(|n| n == name)
                .ok_or_else(|| Error::Validation(format!("unknown null parameter '{name}'")))?;
            null_bounds[idx] = (*value, *value);
            null_init[idx] = *value;
        }
        let mu_null = null
            .value_of(&names[poi])
            .ok_or_else(|| Error::Validation("null hypothesis must fix the POI".to_string()))?;

        let free = self.mle.fit_minimum(&*model, data)?;
        let fixed = self.mle.fit_minimum_from_with_bounds(&*model, data, &null_init, &null_bounds)?;

        let q0 = (2.0 * (fixed.fval - free.fval)).max(0.0);
        let mu_hat = free.parameters[poi];
        let z = if mu_hat < mu_null { -q0.sqrt() } else { q0.sqrt() };

        model.set_parameters(&free.parameters)?;
        log::debug!("hypotest: mu_hat = {mu_hat}, q0 = {q0}, Z = {z}");

        Ok(HypoTestSummary {
            significance: z,
            p_value: normal_sf(z),
            nll_free: free.fval,
            nll_null: fixed.fval,
        })
    }
}

impl Default for ProfileLikelihoodCalculator {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> LikelihoodEngine<M, M::Data> for ProfileLikelihoodCalculator
where
    M: LogDensityModel + PoiModel + Workspace + ?Sized,
{
    fn fit(&self, model: &mut M, data: &M::Data) -> Result<FitSummary> {
        self.mle.fit(model, data)
    }

    fn confidence_interval(&self, model: &mut M, data: &M::Data, cl: f64) -> Result<Interval> {
        self.interval(model, data, cl)
    }

    fn hypothesis_test(
        &self,
        model: &mut M,
        data: &M::Data,
        null: &NullHypothesis,
    ) -> Result<HypoTestSummary> {
        self.hypotest(model, data, null)
    }
}
