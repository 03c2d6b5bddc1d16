//! Significance of the signal+background hypothesis against POI = 0.

use crate::quiet::QuietLogs;
use rl_core::traits::{LikelihoodEngine, Workspace};
use rl_core::{NullHypothesis, Result};

/// One likelihood-ratio significance computation.
#[derive(Debug, Clone, Copy)]
pub struct SignificanceProbe {
    /// Verbosity level (see [`crate::ProfileLikelihoodConfig::verbosity`])
    pub verbosity: i32,
}

impl SignificanceProbe {
    /// Create a probe.
    pub fn new(verbosity: i32) -> Self {
        Self { verbosity }
    }

    /// Run the hypothesis test with the POI fixed at zero under the null.
    ///
    /// Returns `Ok(None)` when the engine fails or reports a negative zero,
    /// which engines produce for a degenerate fit. A positive zero is a valid
    /// result.
    pub fn run_significance<M, D, E>(&self, engine: &E, model: &mut M, data: &D) -> Result<Option<f64>>
    where
        M: Workspace + ?Sized,
        D: ?Sized,
        E: LikelihoodEngine<M, D> + ?Sized,
    {
        let poi = model.poi()?;
        let null = NullHypothesis::with_fixed(poi.name.clone(), 0.0);

        let mut quiet = QuietLogs::new(self.verbosity <= 1);
        let outcome = engine.hypothesis_test(model, data, &null);
        quiet.clear();

        let z = match outcome {
            Ok(result) => result.significance,
            Err(e) => {
                if self.verbosity > 0 {
                    log::warn!("Hypothesis test for {} = 0 failed: {e}", poi.name);
                }
                return Ok(None);
            }
        };

        if z == 0.0 && z.is_sign_negative() {
            log::warn!("Hypothesis test returned a significance of -0; treating the trial as failed");
            return Ok(None);
        }

        if self.verbosity >= 0 {
            log::info!("Significance: {z}");
        }
        Ok(Some(z))
    }
}
