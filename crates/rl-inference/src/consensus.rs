//! Randomized retries with median consensus.
//!
//! A single profile-likelihood computation depends on where the minimizer
//! starts and on the POI range it searches. [`ConsensusDriver::run`] repeats
//! the computation from randomized starting points and only reports a value
//! once enough trials agree with their median.
//!
//! Per trial: restore the clean snapshot, randomize the POI range, POI value
//! and nuisances (except on the first trial), optionally pre-fit, then run
//! exactly one [`BoundarySearch`] or [`SignificanceProbe`]. Accepted values
//! accumulate until the outlier fraction is small enough, the outlier count
//! exceeds its cap, or the trial budget runs out.

use crate::boundary::BoundarySearch;
use crate::config::{Mode, ProfileLikelihoodConfig};
use crate::minimizer::MinimizerScope;
use crate::quiet::QuietLogs;
use crate::significance::SignificanceProbe;
use rand::Rng;
use rl_core::traits::{LikelihoodEngine, Workspace};
use rl_core::{CLEAN_SNAPSHOT, Result};
use serde::Serialize;

/// Median of an ascending slice with the upper-middle index of even counts at `n/2 + 1`.
///
/// Even counts average `sorted[n/2]` and `sorted[n/2 + 1]`, which is one
/// past the conventional upper middle. For `n == 2` that index does not
/// exist and the last element is used. Returns NaN for an empty slice.
pub fn median_literal(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return f64::NAN;
    }
    if n % 2 == 1 {
        return sorted[n / 2];
    }
    let upper = (n / 2 + 1).min(n - 1);
    0.5 * (sorted[n / 2] + sorted[upper])
}

/// Median and outlier count of a set of accepted trial values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Screening {
    /// Consensus candidate
    pub median: f64,
    /// Values with `|v - median| / median < max_rel_deviation`
    pub n_inliers: usize,
    /// Everything else
    pub n_outliers: usize,
}

/// Classify sorted values against their [`median_literal`].
pub fn screen(sorted: &[f64], max_rel_deviation: f64) -> Screening {
    let median = median_literal(sorted);
    let n_inliers =
        sorted.iter().filter(|&&v| (v - median).abs() / median < max_rel_deviation).count();
    Screening { median, n_inliers, n_outliers: sorted.len() - n_inliers }
}

/// Why a run ended without a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Accepted outliers exceeded `max_outliers`
    TooManyOutliers,
    /// `max_tries` trials ran without reaching a result
    BudgetExhausted,
}

/// Result of [`ConsensusDriver::run`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunOutcome {
    /// Whether a value was found
    pub success: bool,
    /// Limit or significance, on success
    pub value: Option<f64>,
    /// Trials started
    pub n_tries: usize,
    /// Accepted trial values in acceptance order
    pub accepted: Vec<f64>,
    /// Outliers at the last consensus evaluation
    pub n_outliers: usize,
    /// Cause of failure
    pub failure: Option<FailureKind>,
}

impl RunOutcome {
    fn succeeded(value: f64, n_tries: usize, accepted: Vec<f64>, n_outliers: usize) -> Self {
        Self { success: true, value: Some(value), n_tries, accepted, n_outliers, failure: None }
    }

    fn failed(kind: FailureKind, n_tries: usize, accepted: Vec<f64>, n_outliers: usize) -> Self {
        Self { success: false, value: None, n_tries, accepted, n_outliers, failure: Some(kind) }
    }
}

/// Orchestrates randomized trials of one limit or significance computation.
#[derive(Debug, Clone)]
pub struct ConsensusDriver {
    config: ProfileLikelihoodConfig,
}

impl ConsensusDriver {
    /// Create a driver; the configuration is validated by [`Self::run`].
    pub fn new(config: ProfileLikelihoodConfig) -> Self {
        Self { config }
    }

    /// Compute a robust limit or significance.
    ///
    /// The model must carry a [`CLEAN_SNAPSHOT`]. The process-wide minimizer
    /// defaults are replaced for the duration of the call and restored on
    /// return. `hint` is accepted for interface compatibility and ignored.
    ///
    /// Statistical failures are reported through [`RunOutcome::success`];
    /// `Err` means misuse (bad configuration, a concurrent run, a model
    /// without the clean snapshot).
    pub fn run<M, D, E, R>(
        &self,
        engine: &E,
        model: &mut M,
        data: &D,
        hint: Option<f64>,
        rng: &mut R,
    ) -> Result<RunOutcome>
    where
        M: Workspace + ?Sized,
        D: ?Sized,
        E: LikelihoodEngine<M, D> + ?Sized,
        R: Rng,
    {
        let cfg = &self.config;
        cfg.validate()?;
        let _scope = MinimizerScope::acquire(&cfg.minimizer_spec(), cfg.verbosity)?;
        let _quiet = QuietLogs::new(cfg.verbosity < 0);

        if let Some(hint) = hint {
            log::debug!("ignoring hint {hint}");
        }

        model.load_snapshot(CLEAN_SNAPSHOT)?;
        let original_max = model.poi()?.max;
        let mut accepted: Vec<f64> = Vec::new();
        let mut n_outliers = 0;

        for i in 0..cfg.max_tries {
            let n_tries = i + 1;
            model.load_snapshot(CLEAN_SNAPSHOT)?;
            if i > 0 {
                self.randomize(model, original_max, rng)?;
            }
            if cfg.verbosity > 1 {
                log::info!("Number of tries: {i}");
            }

            if cfg.pre_fit && !self.pre_fit(engine, model, data)? {
                continue;
            }

            let trial = match cfg.mode {
                Mode::Limit => {
                    BoundarySearch::new(cfg.cl, cfg.verbosity).run_limit(engine, model, data)?
                }
                Mode::Significance => {
                    SignificanceProbe::new(cfg.verbosity).run_significance(engine, model, data)?
                }
            };
            let Some(value) = trial else {
                continue;
            };

            if cfg.tries == 1 {
                if cfg.verbosity > 1 {
                    log::info!("--> success!");
                }
                return Ok(RunOutcome::succeeded(value, n_tries, vec![value], 0));
            }

            accepted.push(value);
            if accepted.len() < cfg.tries {
                continue;
            }

            let mut sorted = accepted.clone();
            sorted.sort_by(f64::total_cmp);
            let screening = screen(&sorted, cfg.max_rel_deviation);
            n_outliers = screening.n_outliers;
            if cfg.verbosity > 1 {
                log::info!(
                    "Have {} results; median {}, {} inliers, {} outliers",
                    sorted.len(),
                    screening.median,
                    screening.n_inliers,
                    screening.n_outliers
                );
            }

            if n_outliers as f64 <= cfg.max_outlier_fraction * sorted.len() as f64 {
                if cfg.verbosity >= 0 {
                    log::info!(
                        "Consensus of {} trials: {} ({n_outliers} outliers)",
                        sorted.len(),
                        screening.median
                    );
                }
                return Ok(RunOutcome::succeeded(screening.median, n_tries, accepted, n_outliers));
            }
            if n_outliers > cfg.max_outliers {
                log::warn!(
                    "Too many outliers ({n_outliers} of {}), giving up after {n_tries} trials",
                    sorted.len()
                );
                return Ok(RunOutcome::failed(
                    FailureKind::TooManyOutliers,
                    n_tries,
                    accepted,
                    n_outliers,
                ));
            }
        }

        log::warn!(
            "No result after {} trials ({} accepted, {n_outliers} outliers)",
            cfg.max_tries,
            accepted.len()
        );
        Ok(RunOutcome::failed(FailureKind::BudgetExhausted, cfg.max_tries, accepted, n_outliers))
    }

    /// Move the POI range and starting values, and draw new nuisances.
    fn randomize<M, R>(&self, model: &mut M, original_max: f64, rng: &mut R) -> Result<()>
    where
        M: Workspace + ?Sized,
        R: Rng,
    {
        let new_max = original_max * (0.5 + rng.random::<f64>());
        model.set_poi_max(new_max)?;
        model.set_poi_value((0.1 + 0.5 * rng.random::<f64>()) * new_max)?;
        if self.config.with_systematics && model.n_nuisances() > 0 {
            let draw = model.sample_nuisances(rng)?;
            model.set_nuisances(&draw)?;
        }
        if self.config.verbosity > 2 {
            log::debug!("randomized start: poi max {new_max}, nuisances {:?}", model.nuisance_values());
        }
        Ok(())
    }

    /// Free s+b fit; `false` if its covariance or EDM is not good enough.
    fn pre_fit<M, D, E>(&self, engine: &E, model: &mut M, data: &D) -> Result<bool>
    where
        M: Workspace + ?Sized,
        D: ?Sized,
        E: LikelihoodEngine<M, D> + ?Sized,
    {
        let cfg = &self.config;
        let mut quiet = QuietLogs::new(cfg.verbosity < 2);
        let fit = engine.fit(model, data);
        quiet.clear();

        match fit {
            Ok(fit) if fit.is_good(cfg.minimizer_tolerance) => Ok(true),
            Ok(fit) => {
                if cfg.verbosity > 1 {
                    log::info!("Fit failed (covQual {}, edm {})", fit.cov_qual, fit.edm);
                }
                Ok(false)
            }
            Err(e) => {
                if cfg.verbosity > 1 {
                    log::info!("Fit failed: {e}");
                }
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::minimizer::{self, MinimizerDefaults};
    use crate::testing::{MockWorkspace, ScriptedEngine, global_lock};
    use approx::assert_relative_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn limits_config(max_tries: usize, tries: usize) -> ProfileLikelihoodConfig {
        ProfileLikelihoodConfig {
            max_tries,
            tries,
            max_rel_deviation: 0.05,
            max_outlier_fraction: 0.25,
            max_outliers: 3,
            verbosity: -1,
            ..Default::default()
        }
    }

    fn run(cfg: ProfileLikelihoodConfig, engine: &ScriptedEngine, ws: &mut MockWorkspace) -> RunOutcome {
        let mut rng = StdRng::seed_from_u64(7);
        ConsensusDriver::new(cfg).run(engine, ws, &(), None, &mut rng).unwrap()
    }

    #[test]
    fn test_median_literal_indexing() {
        assert_relative_eq!(median_literal(&[0.9, 1.0, 1.1, 1.2]), 1.15, epsilon = 1e-12);
        assert_eq!(median_literal(&[1.0, 2.0, 7.0]), 2.0);
        assert_eq!(median_literal(&[1.0, 3.0]), 3.0);
        assert_eq!(median_literal(&[4.0]), 4.0);
        assert!(median_literal(&[]).is_nan());
    }

    #[test]
    fn test_deviation_at_threshold_is_outlier() {
        // |1.5 - 1.0| / 1.0 == 0.5 exactly
        let s = screen(&[1.0, 1.0, 1.5], 0.5);
        assert_eq!(s.median, 1.0);
        assert_eq!(s.n_outliers, 1);
        assert_eq!(s.n_inliers, 2);

        let s = screen(&[1.0, 1.0, 1.5], 0.5000001);
        assert_eq!(s.n_outliers, 0);
    }

    #[test]
    fn test_single_try_returns_first_success_exactly() {
        let _guard = global_lock();
        let engine = ScriptedEngine::limits(&[Some(2.718281828)]);
        let mut ws = MockWorkspace::new(10.0, 0);
        let out = run(limits_config(5, 1), &engine, &mut ws);
        assert!(out.success);
        assert_eq!(out.value, Some(2.718281828));
        assert_eq!(out.n_tries, 1);
        assert_eq!(engine.interval_calls.get(), 1);
    }

    #[test]
    fn test_single_try_skips_failed_trials() {
        let _guard = global_lock();
        let engine = ScriptedEngine::limits(&[None, Some(3.0)]);
        let mut ws = MockWorkspace::new(10.0, 0);
        let out = run(limits_config(2, 1), &engine, &mut ws);
        assert_eq!(out.value, Some(3.0));
        assert_eq!(out.n_tries, 2);

        let engine = ScriptedEngine::limits(&[None]);
        let out = run(limits_config(1, 1), &engine, &mut ws);
        assert!(!out.success);
        assert_eq!(out.value, None);
        assert_eq!(out.failure, Some(FailureKind::BudgetExhausted));
    }

    #[test]
    fn test_three_agreeing_trials() {
        let _guard = global_lock();
        let engine = ScriptedEngine::limits(&[Some(1.00), Some(1.02), Some(0.98)]);
        let mut ws = MockWorkspace::new(10.0, 0);
        let out = run(limits_config(5, 3), &engine, &mut ws);
        assert!(out.success);
        assert_eq!(out.value, Some(1.00));
        assert_eq!(out.n_tries, 3);
        assert_eq!(out.n_outliers, 0);
        assert_eq!(out.accepted, vec![1.00, 1.02, 0.98]);
        assert_eq!(engine.interval_calls.get(), 3);
    }

    #[test]
    fn test_consensus_stops_before_late_outlier() {
        let _guard = global_lock();
        let engine = ScriptedEngine::limits(&[Some(1.0), Some(1.0), Some(1.0), Some(5.0)]);
        let mut ws = MockWorkspace::new(10.0, 0);
        let out = run(limits_config(5, 3), &engine, &mut ws);
        assert_eq!(out.value, Some(1.0));
        assert_eq!(out.n_tries, 3);
        assert_eq!(engine.limits.borrow().len(), 1);
    }

    #[test]
    fn test_consensus_reevaluated_on_each_new_trial() {
        let _guard = global_lock();
        let engine =
            ScriptedEngine::limits(&[Some(1.0), Some(1.0), Some(2.0), Some(1.0), Some(1.0)]);
        let mut ws = MockWorkspace::new(10.0, 0);
        let cfg = ProfileLikelihoodConfig { max_outliers: 10, ..limits_config(8, 3) };
        let out = run(cfg, &engine, &mut ws);
        // n=3: one outlier > 0.75 allowed; n=4: literal median 1.5 makes all four outliers
        assert!(out.success);
        assert_eq!(out.n_tries, 5);
        assert_eq!(out.value, Some(1.0));
        assert_eq!(out.n_outliers, 1);
    }

    #[test]
    fn test_too_many_outliers_abandons_run() {
        let _guard = global_lock();
        let engine = ScriptedEngine::limits(&[Some(1.0), Some(2.0), Some(3.0), Some(2.0)]);
        let mut ws = MockWorkspace::new(10.0, 0);
        let cfg = ProfileLikelihoodConfig {
            max_outlier_fraction: 0.0,
            max_outliers: 1,
            ..limits_config(10, 3)
        };
        let out = run(cfg, &engine, &mut ws);
        assert!(!out.success);
        assert_eq!(out.failure, Some(FailureKind::TooManyOutliers));
        assert_eq!(out.n_tries, 3);
        assert_eq!(out.n_outliers, 2);
    }

    #[test]
    fn test_budget_exhausted_before_target() {
        let _guard = global_lock();
        let engine = ScriptedEngine::limits(&[Some(1.0), None, Some(1.0)]);
        let mut ws = MockWorkspace::new(10.0, 0);
        let out = run(limits_config(3, 3), &engine, &mut ws);
        assert!(!out.success);
        assert_eq!(out.failure, Some(FailureKind::BudgetExhausted));
        assert_eq!(out.accepted, vec![1.0, 1.0]);
    }

    #[test]
    fn test_minimizer_defaults_restored_on_every_exit() {
        let _guard = global_lock();
        let before = MinimizerDefaults {
            family: "LBFGS".into(),
            algorithm: "HagerZhang".into(),
            tolerance: 0.125,
        };
        minimizer::set_defaults(before.clone());

        let cfg = ProfileLikelihoodConfig {
            minimizer_algo: "NelderMead".into(),
            minimizer_tolerance: 1e-4,
            ..limits_config(5, 3)
        };
        let mut ws = MockWorkspace::new(10.0, 0);

        // success
        let engine = ScriptedEngine::limits(&[Some(1.0), Some(1.0), Some(1.0)]);
        assert!(run(cfg.clone(), &engine, &mut ws).success);
        assert_eq!(minimizer::defaults(), before);
        for seen in engine.seen_defaults.borrow().iter() {
            assert_eq!(seen.family, "NelderMead");
            assert_eq!(seen.algorithm, "");
            assert_eq!(seen.tolerance, 1e-4);
        }

        // budget exhausted
        let engine = ScriptedEngine::limits(&[None, None, None, None, None]);
        assert!(!run(cfg.clone(), &engine, &mut ws).success);
        assert_eq!(minimizer::defaults(), before);

        // mid-loop abandonment
        let engine = ScriptedEngine::limits(&[Some(1.0), Some(2.0), Some(3.0)]);
        let abandon = ProfileLikelihoodConfig { max_outlier_fraction: 0.0, max_outliers: 0, ..cfg };
        let out = run(abandon, &engine, &mut ws);
        assert_eq!(out.failure, Some(FailureKind::TooManyOutliers));
        assert_eq!(minimizer::defaults(), before);
        assert!(!minimizer::scope_active());

        minimizer::set_defaults(MinimizerDefaults::default());
    }

    #[test]
    fn test_concurrent_scope_is_an_error() {
        let _guard = global_lock();
        let before = minimizer::defaults();
        let held =
            MinimizerScope::acquire(&crate::minimizer::MinimizerSpec::new("LBFGS", 1e-3), 0).unwrap();
        let engine = ScriptedEngine::limits(&[Some(1.0)]);
        let mut ws = MockWorkspace::new(10.0, 0);
        let mut rng = StdRng::seed_from_u64(1);
        let res = ConsensusDriver::new(limits_config(1, 1)).run(&engine, &mut ws, &(), None, &mut rng);
        assert!(res.is_err());
        assert_eq!(engine.interval_calls.get(), 0);
        drop(held);
        assert_eq!(minimizer::defaults(), before);
    }

    #[test]
    fn test_invalid_config_is_an_error() {
        let _guard = global_lock();
        let engine = ScriptedEngine::limits(&[Some(1.0)]);
        let mut ws = MockWorkspace::new(10.0, 0);
        let mut rng = StdRng::seed_from_u64(1);
        let res = ConsensusDriver::new(limits_config(0, 1)).run(&engine, &mut ws, &(), None, &mut rng);
        assert!(res.is_err());
        assert!(!minimizer::scope_active());
    }

    #[test]
    fn test_first_trial_clean_later_trials_randomized() {
        let _guard = global_lock();
        let engine = ScriptedEngine::limits(&[Some(1.0), Some(1.0), Some(1.0)]);
        let mut ws = MockWorkspace::new(10.0, 2);
        let out = run(limits_config(3, 3), &engine, &mut ws);
        assert!(out.success);
        // once for the original range, once per trial
        assert_eq!(ws.loads, 4);

        let seen = engine.seen_poi.borrow();
        assert_eq!(seen[0].max, 10.0);
        assert_eq!(seen[0].value, 1.0);
        for poi in &seen[1..] {
            assert!((5.0..15.0).contains(&poi.max), "max {}", poi.max);
            assert!(poi.value >= 0.1 * poi.max && poi.value < 0.6 * poi.max);
        }
        assert_ne!(seen[1].max, seen[2].max);
        assert!(ws.nuisances.iter().all(|v| (-0.5..0.5).contains(v)));
        assert!(ws.nuisances.iter().any(|v| *v != 0.0));
    }

    #[test]
    fn test_nuisances_untouched_without_systematics() {
        let _guard = global_lock();
        let engine = ScriptedEngine::limits(&[Some(1.0), Some(1.0)]);
        let mut ws = MockWorkspace::new(10.0, 2);
        let cfg = ProfileLikelihoodConfig { with_systematics: false, ..limits_config(2, 2) };
        run(cfg, &engine, &mut ws);
        assert_eq!(ws.nuisances, vec![0.0, 0.0]);
        assert_ne!(engine.seen_poi.borrow()[1].max, 10.0);
    }

    #[test]
    fn test_same_seed_same_trials() {
        let _guard = global_lock();
        let maxima = |seed: u64| {
            let engine = ScriptedEngine::limits(&[Some(1.0), Some(1.0), Some(1.0)]);
            let mut ws = MockWorkspace::new(10.0, 1);
            let mut rng = StdRng::seed_from_u64(seed);
            ConsensusDriver::new(limits_config(3, 3))
                .run(&engine, &mut ws, &(), Some(2.0), &mut rng)
                .unwrap();
            engine.seen_poi.borrow().iter().map(|p| p.max).collect::<Vec<_>>()
        };
        assert_eq!(maxima(11), maxima(11));
        assert_ne!(maxima(11), maxima(12));
    }

    #[test]
    fn test_repeated_runs_randomize_around_clean_range() {
        let _guard = global_lock();
        let mut ws = MockWorkspace::new(10.0, 1);
        let maxima = |ws: &mut MockWorkspace| {
            let engine = ScriptedEngine::limits(&[Some(1.0), Some(1.0), Some(1.0)]);
            let mut rng = StdRng::seed_from_u64(5);
            ConsensusDriver::new(limits_config(3, 3))
                .run(&engine, ws, &(), None, &mut rng)
                .unwrap();
            engine.seen_poi.borrow().iter().map(|p| p.max).collect::<Vec<_>>()
        };

        let first = maxima(&mut ws);
        // the run leaves a randomized range behind
        assert_ne!(ws.poi.max, 10.0);
        let second = maxima(&mut ws);
        assert_eq!(first, second);
        for max in &second[1..] {
            assert!((5.0..15.0).contains(max), "max {max}");
        }
    }

    #[test]
    fn test_pre_fit_quality_gates_trials() {
        let _guard = global_lock();
        let engine = ScriptedEngine::limits(&[Some(2.0)]).with_fits(&[(1, 1e-5), (3, 1e-2), (3, 1e-4)]);
        let mut ws = MockWorkspace::new(10.0, 0);
        let cfg = ProfileLikelihoodConfig { pre_fit: true, ..limits_config(3, 1) };
        let out = run(cfg, &engine, &mut ws);
        assert_eq!(out.value, Some(2.0));
        assert_eq!(out.n_tries, 3);
        assert_eq!(engine.fit_calls.get(), 3);
        assert_eq!(engine.interval_calls.get(), 1);
    }

    #[test]
    fn test_significance_mode() {
        let _guard = global_lock();
        let engine = ScriptedEngine::significances(&[Some(-0.0), Some(0.0)]);
        let mut ws = MockWorkspace::new(10.0, 0);
        let cfg = ProfileLikelihoodConfig { mode: Mode::Significance, ..limits_config(2, 1) };
        let out = run(cfg, &engine, &mut ws);
        assert!(out.success);
        assert_eq!(out.value, Some(0.0));
        assert_eq!(out.n_tries, 2);
        assert_eq!(engine.hypotest_calls.get(), 2);
        assert_eq!(engine.interval_calls.get(), 0);
    }

    #[test]
    fn test_silent_run_restores_log_level() {
        let _guard = global_lock();
        log::set_max_level(log::LevelFilter::Info);
        let engine = ScriptedEngine::limits(&[None]);
        let mut ws = MockWorkspace::new(10.0, 0);
        run(limits_config(1, 1), &engine, &mut ws);
        assert_eq!(log::max_level(), log::LevelFilter::Info);
    }

    #[test]
    fn test_outcome_json() {
        let out = RunOutcome::failed(FailureKind::TooManyOutliers, 4, vec![1.0, 2.0], 2);
        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(json["failure"], "too_many_outliers");
        assert_eq!(json["value"], serde_json::Value::Null);
        assert_eq!(json["n_tries"], 4);
    }
}
