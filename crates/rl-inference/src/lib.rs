//! # rl-inference
//!
//! Robust limits and significances for robustlimit.
//!
//! This crate provides:
//! - A profile-likelihood engine over argmin (L-BFGS, Nelder-Mead)
//! - Scoped control of the process-wide default minimizer
//! - Upper-limit search with adaptive POI range widening
//! - Likelihood-ratio significance against POI = 0
//! - The consensus driver that repeats either from randomized starts
//!
//! ## Architecture
//!
//! The driver only sees the `Workspace` and `LikelihoodEngine` traits from
//! rl-core. [`ProfileLikelihoodCalculator`] is one engine; tests plug in
//! scripted ones.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Upper-limit search with POI range doubling.
pub mod boundary;
/// Run configuration.
pub mod config;
/// Randomized trials and median consensus.
pub mod consensus;
/// Process-wide default minimizer and its scope guard.
pub mod minimizer;
/// Maximum-likelihood estimation with covariance quality.
pub mod mle;
/// Numerical optimizers (argmin backends).
pub mod optimizer;
/// Profile-likelihood intervals and hypothesis tests.
pub mod profile_likelihood;
/// Scoped log suppression.
pub mod quiet;
/// Significance against POI = 0.
pub mod significance;

#[cfg(test)]
mod testing;

pub use boundary::{BoundarySearch, SearchBounds};
pub use config::{Mode, ProfileLikelihoodConfig};
pub use consensus::{ConsensusDriver, FailureKind, RunOutcome};
pub use minimizer::{MinimizerDefaults, MinimizerScope, MinimizerSpec};
pub use mle::MaximumLikelihoodEstimator;
pub use optimizer::{LineSearchKind, Minimizer, MinimizerKind, ObjectiveFunction, OptimizationResult, OptimizerConfig};
pub use profile_likelihood::ProfileLikelihoodCalculator;
pub use quiet::QuietLogs;
pub use significance::SignificanceProbe;
