//! Shared fixtures for unit tests.

use crate::minimizer::{self, MinimizerDefaults};
use rand::{Rng, RngCore};
use rl_core::traits::{LikelihoodEngine, Workspace};
use rl_core::{Error, FitSummary, HypoTestSummary, Interval, NullHypothesis, RealVar, Result};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

static GLOBAL_LOCK: Mutex<()> = Mutex::new(());

/// Serializes tests that touch the process-wide minimizer defaults or log level.
pub(crate) fn global_lock() -> MutexGuard<'static, ()> {
    GLOBAL_LOCK.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone)]
struct Snapshot {
    poi: RealVar,
    nuisances: Vec<f64>,
}

/// In-memory workspace: one POI plus unconstrained-looking nuisances.
#[derive(Debug, Clone)]
pub(crate) struct MockWorkspace {
    pub poi: RealVar,
    pub nuisances: Vec<f64>,
    snapshots: HashMap<String, Snapshot>,
    pub loads: usize,
}

impl MockWorkspace {
    pub fn new(max: f64, n_nuisances: usize) -> Self {
        let mut ws = Self {
            poi: RealVar::new("r", 1.0, 0.0, max),
            nuisances: vec![0.0; n_nuisances],
            snapshots: HashMap::new(),
            loads: 0,
        };
        ws.save_snapshot(rl_core::CLEAN_SNAPSHOT);
        ws
    }
}

impl Workspace for MockWorkspace {
    fn poi(&self) -> Result<RealVar> {
        Ok(self.poi.clone())
    }

    fn set_poi_value(&mut self, value: f64) -> Result<()> {
        self.poi.value = value;
        Ok(())
    }

    fn set_poi_max(&mut self, max: f64) -> Result<()> {
        self.poi.max = max;
        Ok(())
    }

    fn n_nuisances(&self) -> usize {
        self.nuisances.len()
    }

    fn nuisance_values(&self) -> Vec<f64> {
        self.nuisances.clone()
    }

    fn set_nuisances(&mut self, values: &[f64]) -> Result<()> {
        self.nuisances = values.to_vec();
        Ok(())
    }

    fn sample_nuisances(&self, rng: &mut dyn RngCore) -> Result<Vec<f64>> {
        Ok((0..self.nuisances.len()).map(|_| rng.random::<f64>() - 0.5).collect())
    }

    fn save_snapshot(&mut self, name: &str) {
        self.snapshots.insert(
            name.to_string(),
            Snapshot { poi: self.poi.clone(), nuisances: self.nuisances.clone() },
        );
    }

    fn load_snapshot(&mut self, name: &str) -> Result<()> {
        let snap = self
            .snapshots
            .get(name)
            .ok_or_else(|| Error::Validation(format!("no snapshot '{name}'")))?;
        self.poi = snap.poi.clone();
        self.nuisances = snap.nuisances.clone();
        self.loads += 1;
        Ok(())
    }
}

/// Engine that replays scripted answers, `None` meaning an engine error.
///
/// With `saturating` set, every interval reports an upper edge at 90% of the
/// POI's current maximum.
#[derive(Debug, Default)]
pub(crate) struct ScriptedEngine {
    pub limits: RefCell<VecDeque<Option<f64>>>,
    pub significances: RefCell<VecDeque<Option<f64>>>,
    pub fits: RefCell<VecDeque<(i32, f64)>>,
    pub saturating: bool,
    pub interval_calls: Cell<usize>,
    pub hypotest_calls: Cell<usize>,
    pub fit_calls: Cell<usize>,
    pub seen_defaults: RefCell<Vec<MinimizerDefaults>>,
    pub seen_poi: RefCell<Vec<RealVar>>,
    pub seen_nulls: RefCell<Vec<NullHypothesis>>,
}

impl ScriptedEngine {
    pub fn limits(values: &[Option<f64>]) -> Self {
        Self { limits: RefCell::new(values.iter().copied().collect()), ..Default::default() }
    }

    pub fn significances(values: &[Option<f64>]) -> Self {
        Self { significances: RefCell::new(values.iter().copied().collect()), ..Default::default() }
    }

    pub fn saturating() -> Self {
        Self { saturating: true, ..Default::default() }
    }

    pub fn with_fits(self, fits: &[(i32, f64)]) -> Self {
        *self.fits.borrow_mut() = fits.iter().copied().collect();
        self
    }

    fn record(&self, model: &MockWorkspace) {
        self.seen_defaults.borrow_mut().push(minimizer::defaults());
        self.seen_poi.borrow_mut().push(model.poi.clone());
    }
}

fn exhausted() -> Error {
    Error::Computation("scripted engine has no answer".to_string())
}

impl LikelihoodEngine<MockWorkspace, ()> for ScriptedEngine {
    fn fit(&self, model: &mut MockWorkspace, _data: &()) -> Result<FitSummary> {
        self.fit_calls.set(self.fit_calls.get() + 1);
        let (cov_qual, edm) = self.fits.borrow_mut().pop_front().ok_or_else(exhausted)?;
        Ok(FitSummary {
            parameters: vec![model.poi.value],
            nll: 0.0,
            cov_qual,
            edm,
            converged: true,
        })
    }

    fn confidence_interval(
        &self,
        model: &mut MockWorkspace,
        _data: &(),
        cl: f64,
    ) -> Result<Interval> {
        self.interval_calls.set(self.interval_calls.get() + 1);
        self.record(model);
        let upper = if self.saturating {
            0.9 * model.poi.max
        } else {
            self.limits.borrow_mut().pop_front().ok_or_else(exhausted)?.ok_or_else(exhausted)?
        };
        // engines move parameters around
        model.poi.value = 0.5 * upper;
        Ok(Interval { lower: model.poi.min, upper, best_fit: 0.5 * upper, cl })
    }

    fn hypothesis_test(
        &self,
        model: &mut MockWorkspace,
        _data: &(),
        null: &NullHypothesis,
    ) -> Result<HypoTestSummary> {
        self.hypotest_calls.set(self.hypotest_calls.get() + 1);
        self.record(model);
        self.seen_nulls.borrow_mut().push(null.clone());
        let z = self.significances.borrow_mut().pop_front().ok_or_else(exhausted)?.ok_or_else(exhausted)?;
        Ok(HypoTestSummary { significance: z, p_value: 0.5, nll_free: 0.0, nll_null: 0.0 })
    }
}
