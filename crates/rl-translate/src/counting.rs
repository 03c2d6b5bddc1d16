//! Multi-bin counting experiment with log-normal systematics.
//!
//! Parameters, in order: the signal strength `r`, then one nuisance
//! `theta_k` per systematic. The expected yield in bin `b` is
//!
//! ```text
//! nu_b = r * s_b * prod_k kappa_kb0^theta_k + sum_{p>0} b_bp * prod_k kappa_kbp^theta_k
//! ```
//!
//! and each `theta_k` carries a unit Gaussian constraint.

use crate::datacard::Datacard;
use rand::RngCore;
use rand_distr::{Distribution, StandardNormal};
use rl_core::traits::{LogDensityModel, PoiModel, Workspace};
use rl_core::{CLEAN_SNAPSHOT, Error, RealVar, Result};
use statrs::function::gamma::ln_gamma;
use std::collections::HashMap;

/// Default range of the signal strength.
pub const POI_RANGE: (f64, f64) = (0.0, 20.0);
/// Range of every nuisance parameter.
pub const NUISANCE_RANGE: (f64, f64) = (-5.0, 5.0);

const NU_FLOOR: f64 = 1e-300;
const MAX_SAMPLING_ATTEMPTS: usize = 1000;

/// Observed counts, one per bin.
#[derive(Debug, Clone, PartialEq)]
pub struct CountingData {
    /// Observed events per bin
    pub observed: Vec<f64>,
}

#[derive(Debug, Clone)]
struct Snapshot {
    values: Vec<f64>,
    bounds: Vec<(f64, f64)>,
}

/// Counting-experiment workspace built from a [`Datacard`].
#[derive(Debug, Clone)]
pub struct CountingModel {
    /// `rates[bin][process]`, process 0 is the signal
    rates: Vec<Vec<f64>>,
    /// `ln_kappas[syst][bin][process]`
    ln_kappas: Vec<Vec<Vec<f64>>>,
    names: Vec<String>,
    values: Vec<f64>,
    bounds: Vec<(f64, f64)>,
    snapshots: HashMap<String, Snapshot>,
}

impl CountingModel {
    /// Build the model and its dataset from a parsed card.
    ///
    /// The starting point is saved as the [`CLEAN_SNAPSHOT`].
    pub fn from_datacard(card: &Datacard) -> Result<(Self, CountingData)> {
        if card.rates.iter().flatten().any(|r| !r.is_finite() || *r < 0.0) {
            return Err(Error::Validation("datacard rates must be finite and non-negative".into()));
        }
        if card.observed.iter().any(|n| !n.is_finite() || *n < 0.0) {
            return Err(Error::Validation("observed counts must be finite and non-negative".into()));
        }

        let ln_kappas: Vec<Vec<Vec<f64>>> = card
            .systematics
            .iter()
            .map(|s| s.kappas.iter().map(|row| row.iter().map(|k| k.ln()).collect()).collect())
            .collect();

        let mut names = vec!["r".to_string()];
        names.extend(card.systematics.iter().map(|s| format!("theta_{}", s.index)));

        let n_syst = card.systematics.len();
        let mut values = vec![1.0];
        values.extend(std::iter::repeat_n(0.0, n_syst));
        let mut bounds = vec![POI_RANGE];
        bounds.extend(std::iter::repeat_n(NUISANCE_RANGE, n_syst));

        let mut model = Self {
            rates: card.rates.clone(),
            ln_kappas,
            names,
            values,
            bounds,
            snapshots: HashMap::new(),
        };
        model.save_snapshot(CLEAN_SNAPSHOT);

        Ok((model, CountingData { observed: card.observed.clone() }))
    }

    /// Number of bins
    pub fn n_bins(&self) -> usize {
        self.rates.len()
    }

    fn process_yield(&self, params: &[f64], bin: usize, process: usize) -> f64 {
        let mut log_mod = 0.0;
        for (k, lk) in self.ln_kappas.iter().enumerate() {
            log_mod += lk[bin][process] * params[1 + k];
        }
        let base = self.rates[bin][process] * log_mod.exp();
        if process == 0 { params[0] * base } else { base }
    }

    /// Expected yield per bin at `params`
    pub fn expected_yields(&self, params: &[f64]) -> Vec<f64> {
        (0..self.n_bins())
            .map(|b| (0..self.rates[b].len()).map(|p| self.process_yield(params, b, p)).sum())
            .collect()
    }

    fn check_len(&self, params: &[f64]) -> Result<()> {
        if params.len() != self.values.len() {
            return Err(Error::Validation(format!(
                "parameter length mismatch: {} != {}",
                params.len(),
                self.values.len()
            )));
        }
        Ok(())
    }
}

impl LogDensityModel for CountingModel {
    type Data = CountingData;

    fn n_parameters(&self) -> usize {
        self.values.len()
    }

    fn parameter_names(&self) -> Vec<String> {
        self.names.clone()
    }

    fn parameter_bounds(&self) -> Vec<(f64, f64)> {
        self.bounds.clone()
    }

    fn parameter_init(&self) -> Vec<f64> {
        self.values.clone()
    }

    fn set_parameters(&mut self, params: &[f64]) -> Result<()> {
        self.check_len(params)?;
        for ((v, &p), &(lo, hi)) in self.values.iter_mut().zip(params).zip(&self.bounds) {
            *v = p.clamp(lo, hi);
        }
        Ok(())
    }

    fn nll(&self, data: &CountingData, params: &[f64]) -> Result<f64> {
        self.check_len(params)?;
        if data.observed.len() != self.n_bins() {
            return Err(Error::Validation(format!(
                "dataset has {} bins, model has {}",
                data.observed.len(),
                self.n_bins()
            )));
        }
        let mut nll = 0.0;
        for (nu, &n) in self.expected_yields(params).into_iter().zip(&data.observed) {
            let nu = nu.max(NU_FLOOR);
            nll += nu - n * nu.ln() + ln_gamma(n + 1.0);
        }
        nll += 0.5 * params[1..].iter().map(|t| t * t).sum::<f64>();
        Ok(nll)
    }

    fn grad_nll(&self, data: &CountingData, params: &[f64]) -> Result<Vec<f64>> {
        self.check_len(params)?;
        let mut grad = vec![0.0; params.len()];
        for (b, &n) in data.observed.iter().enumerate() {
            let yields: Vec<f64> =
                (0..self.rates[b].len()).map(|p| self.process_yield(params, b, p)).collect();
            let nu: f64 = yields.iter().sum::<f64>().max(NU_FLOOR);
            let w = 1.0 - n / nu;

            // d nu / d r: signal yield without the r factor
            let signal_unit = if params[0] != 0.0 {
                yields[0] / params[0]
            } else {
                let log_mod: f64 =
                    self.ln_kappas.iter().enumerate().map(|(k, lk)| lk[b][0] * params[1 + k]).sum();
                self.rates[b][0] * log_mod.exp()
            };
            grad[0] += w * signal_unit;

            for (k, lk) in self.ln_kappas.iter().enumerate() {
                let dnu: f64 = yields.iter().zip(&lk[b]).map(|(y, l)| y * l).sum();
                grad[1 + k] += w * dnu;
            }
        }
        for k in 1..params.len() {
            grad[k] += params[k];
        }
        Ok(grad)
    }
}

impl PoiModel for CountingModel {
    fn poi_index(&self) -> Option<usize> {
        Some(0)
    }
}

impl Workspace for CountingModel {
    fn poi(&self) -> Result<RealVar> {
        let (min, max) = self.bounds[0];
        Ok(RealVar::new(self.names[0].clone(), self.values[0], min, max))
    }

    fn set_poi_value(&mut self, value: f64) -> Result<()> {
        let (lo, hi) = self.bounds[0];
        self.values[0] = value.clamp(lo, hi);
        Ok(())
    }

    fn set_poi_max(&mut self, max: f64) -> Result<()> {
        let lo = self.bounds[0].0;
        if !(max.is_finite() && max > lo) {
            return Err(Error::Validation(format!("invalid POI upper bound {max} (min {lo})")));
        }
        self.bounds[0].1 = max;
        self.values[0] = self.values[0].min(max);
        Ok(())
    }

    fn n_nuisances(&self) -> usize {
        self.values.len() - 1
    }

    fn nuisance_values(&self) -> Vec<f64> {
        self.values[1..].to_vec()
    }

    fn set_nuisances(&mut self, values: &[f64]) -> Result<()> {
        if values.len() != self.n_nuisances() {
            return Err(Error::Validation(format!(
                "expected {} nuisance values, got {}",
                self.n_nuisances(),
                values.len()
            )));
        }
        for (k, &v) in values.iter().enumerate() {
            let (lo, hi) = self.bounds[1 + k];
            self.values[1 + k] = v.clamp(lo, hi);
        }
        Ok(())
    }

    fn sample_nuisances(&self, rng: &mut dyn RngCore) -> Result<Vec<f64>> {
        // Unit Gaussians truncated to the nuisance range.
        let mut out = Vec::with_capacity(self.n_nuisances());
        for k in 0..self.n_nuisances() {
            let (lo, hi) = self.bounds[1 + k];
            let mut drawn = None;
            for _ in 0..MAX_SAMPLING_ATTEMPTS {
                let x: f64 = StandardNormal.sample(&mut *rng);
                if (lo..=hi).contains(&x) {
                    drawn = Some(x);
                    break;
                }
            }
            out.push(drawn.ok_or_else(|| {
                Error::Computation(format!("could not sample {} within its range", self.names[1 + k]))
            })?);
        }
        Ok(out)
    }

    fn save_snapshot(&mut self, name: &str) {
        self.snapshots.insert(
            name.to_string(),
            Snapshot { values: self.values.clone(), bounds: self.bounds.clone() },
        );
    }

    fn load_snapshot(&mut self, name: &str) -> Result<()> {
        let snap = self
            .snapshots
            .get(name)
            .ok_or_else(|| Error::Validation(format!("no snapshot named '{name}'")))?;
        self.values.clone_from(&snap.values);
        self.bounds.clone_from(&snap.bounds);
        Ok(())
    }
}
