//! Upper-limit search with adaptive widening of the POI range.
//!
//! A profile-likelihood interval can only report edges inside the POI range.
//! When the upper edge lands close to the range maximum the true limit may
//! lie beyond it, so the range is doubled and the interval recomputed, up to
//! a fixed growth cap relative to the range the search started with.

use crate::quiet::QuietLogs;
use rl_core::Result;
use rl_core::traits::{LikelihoodEngine, Workspace};

/// Fraction of the current POI maximum at which an upper edge counts as saturated.
pub const SATURATION_FRACTION: f64 = 0.75;

/// Largest allowed ratio of the widened POI maximum to the original one.
pub const MAX_RANGE_GROWTH: f64 = 20.0;

/// POI maxima tracked by one [`BoundarySearch::run_limit`] call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchBounds {
    /// Maximum when the search started
    pub original_max: f64,
    /// Maximum after widening so far
    pub current_max: f64,
}

impl SearchBounds {
    /// Start tracking from `max`.
    pub fn new(max: f64) -> Self {
        Self { original_max: max, current_max: max }
    }

    /// True once the range has grown past the cap.
    pub fn exhausted(&self) -> bool {
        self.current_max > MAX_RANGE_GROWTH * self.original_max
    }

    /// Double the current maximum and return it.
    pub fn widen(&mut self) -> f64 {
        self.current_max *= 2.0;
        self.current_max
    }
}

/// One limit computation at a fixed confidence level.
#[derive(Debug, Clone, Copy)]
pub struct BoundarySearch {
    /// Confidence level of the interval
    pub cl: f64,
    /// Verbosity level (see [`crate::ProfileLikelihoodConfig::verbosity`])
    pub verbosity: i32,
}

impl BoundarySearch {
    /// Create a search at `cl`.
    pub fn new(cl: f64, verbosity: i32) -> Self {
        Self { cl, verbosity }
    }

    /// Compute the upper limit, widening the POI range while it saturates.
    ///
    /// Returns `Ok(None)` when the engine fails, the range cap is reached, or
    /// the limit sits on the POI's lower bound. Parameter values are never
    /// reset between widenings; only the POI maximum changes.
    pub fn run_limit<M, D, E>(&self, engine: &E, model: &mut M, data: &D) -> Result<Option<f64>>
    where
        M: Workspace + ?Sized,
        D: ?Sized,
        E: LikelihoodEngine<M, D> + ?Sized,
    {
        let poi = model.poi()?;
        let mut bounds = SearchBounds::new(poi.max);
        let mut quiet = QuietLogs::new(self.verbosity <= 1);

        let limit = loop {
            let interval = match engine.confidence_interval(model, data, self.cl) {
                Ok(interval) => interval,
                Err(e) => {
                    quiet.clear();
                    if self.verbosity > 0 {
                        log::warn!("Failed to compute the interval for {}: {e}", poi.name);
                    }
                    return Ok(None);
                }
            };
            let candidate = interval.upper;

            if candidate >= SATURATION_FRACTION * bounds.current_max {
                if bounds.exhausted() {
                    quiet.clear();
                    if self.verbosity > 0 {
                        log::warn!(
                            "Limit {} < {candidate} still at the boundary after widening to {}; giving up",
                            poi.name,
                            bounds.current_max
                        );
                    }
                    return Ok(None);
                }
                let widened = bounds.widen();
                if self.verbosity > 1 {
                    log::info!(
                        "Limit {} < {candidate} is close to the boundary; search range doubled to {widened}",
                        poi.name
                    );
                }
                model.set_poi_max(widened)?;
                continue;
            }

            if candidate == model.poi()?.min {
                quiet.clear();
                if self.verbosity > 0 {
                    log::warn!("Limit {} < {candidate} sits on the lower bound; engine failure", poi.name);
                }
                return Ok(None);
            }

            break candidate;
        };

        quiet.clear();
        if self.verbosity >= 0 {
            log::info!("Limit: {} < {limit} @ {}% CL", poi.name, self.cl * 100.0);
        }
        Ok(Some(limit))
    }
}
