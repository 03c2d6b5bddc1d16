//! # rl-core
//!
//! Core types and traits for robustlimit.
//!
//! The inference layer (`rl-inference`) talks to statistical models and
//! likelihood engines only through the traits defined here, so the
//! consensus driver never depends on a concrete model format.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use types::{FitSummary, HypoTestSummary, Interval, NullHypothesis, RealVar};

/// robustlimit version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the snapshot every trial starts from.
pub const CLEAN_SNAPSHOT: &str = "clean";
