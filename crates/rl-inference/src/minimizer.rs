//! Process-wide default minimizer configuration.
//!
//! Engines that do not receive an explicit optimizer configuration read the
//! defaults stored here (family, algorithm, tolerance). A run that needs
//! different defaults installs them through a [`MinimizerScope`], which
//! restores the previous values when dropped, on every exit path.
//!
//! Only one scope may be live at a time in a process; acquiring a second one
//! fails instead of silently corrupting the restore order.

use rl_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

/// Built-in default minimizer family.
pub const DEFAULT_FAMILY: &str = "LBFGS";
/// Built-in default tolerance.
pub const DEFAULT_TOLERANCE: f64 = 1e-2;

/// Default minimizer selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinimizerDefaults {
    /// Minimizer family (e.g. `LBFGS`, `NelderMead`)
    pub family: String,
    /// Algorithm within the family; empty selects the family default
    pub algorithm: String,
    /// Convergence tolerance
    pub tolerance: f64,
}

impl Default for MinimizerDefaults {
    fn default() -> Self {
        Self {
            family: DEFAULT_FAMILY.to_string(),
            algorithm: String::new(),
            tolerance: DEFAULT_TOLERANCE,
        }
    }
}

static DEFAULTS: Mutex<Option<MinimizerDefaults>> = Mutex::new(None);
static SCOPE_ACTIVE: AtomicBool = AtomicBool::new(false);

/// Current process-wide defaults.
pub fn defaults() -> MinimizerDefaults {
    DEFAULTS.lock().unwrap_or_else(PoisonError::into_inner).clone().unwrap_or_default()
}

/// Replace the process-wide defaults.
pub fn set_defaults(defaults: MinimizerDefaults) {
    *DEFAULTS.lock().unwrap_or_else(PoisonError::into_inner) = Some(defaults);
}

/// Requested minimizer: `"Family"` or `"Family,Algorithm"` plus a tolerance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinimizerSpec {
    /// Algorithm string, optionally `Family,Algorithm`
    pub algorithm: String,
    /// Tolerance to install
    pub tolerance: f64,
}

impl MinimizerSpec {
    /// Create a spec
    pub fn new(algorithm: impl Into<String>, tolerance: f64) -> Self {
        Self { algorithm: algorithm.into(), tolerance }
    }

    /// Split into `(family, algorithm)`; the algorithm is `None` for a bare family.
    pub fn split(&self) -> Result<(&str, Option<&str>)> {
        let (family, algorithm) = match self.algorithm.split_once(',') {
            Some((family, algorithm)) => (family.trim(), Some(algorithm.trim())),
            None => (self.algorithm.trim(), None),
        };
        if family.is_empty() {
            return Err(Error::Validation(format!(
                "minimizer '{}' has an empty family name",
                self.algorithm
            )));
        }
        if algorithm.is_some_and(str::is_empty) {
            return Err(Error::Validation(format!(
                "minimizer '{}' has an empty algorithm name",
                self.algorithm
            )));
        }
        Ok((family, algorithm))
    }

    /// Validate syntax and tolerance.
    pub fn validate(&self) -> Result<()> {
        self.split()?;
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(Error::Validation(format!(
                "minimizer tolerance must be positive, got {}",
                self.tolerance
            )));
        }
        Ok(())
    }
}

/// Scoped override of the process-wide minimizer defaults.
///
/// Not `Clone`, not `Send`: the token stays on the thread that installed it
/// and the previous defaults come back exactly once, in `Drop`.
#[derive(Debug)]
pub struct MinimizerScope {
    saved: MinimizerDefaults,
    _not_send: PhantomData<*const ()>,
}

impl MinimizerScope {
    /// Save the current defaults and install `spec`.
    ///
    /// A bare family name resets the algorithm to the family default.
    pub fn acquire(spec: &MinimizerSpec, verbosity: i32) -> Result<Self> {
        spec.validate()?;
        let (family, algorithm) = spec.split()?;

        if SCOPE_ACTIVE.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err()
        {
            return Err(Error::Validation(
                "a minimizer scope is already active in this process".to_string(),
            ));
        }

        let saved = defaults();
        match algorithm {
            Some(algo) if verbosity > 1 => {
                log::info!("Set default minimizer to {family}, algorithm {algo}");
            }
            None if verbosity > 1 => log::info!("Set default minimizer to {family}"),
            _ => {}
        }
        set_defaults(MinimizerDefaults {
            family: family.to_string(),
            algorithm: algorithm.unwrap_or_default().to_string(),
            tolerance: spec.tolerance,
        });

        Ok(Self { saved, _not_send: PhantomData })
    }
}

impl Drop for MinimizerScope {
    fn drop(&mut self) {
        set_defaults(self.saved.clone());
        SCOPE_ACTIVE.store(false, Ordering::Release);
    }
}

/// True while a [`MinimizerScope`] is live.
pub fn scope_active() -> bool {
    SCOPE_ACTIVE.load(Ordering::Acquire)
}
