//! # rl-translate
//!
//! Input formats for robustlimit: LandS-style counting datacards and the
//! [`CountingModel`] workspace built from them.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Counting-experiment model (Poisson bins, log-normal systematics).
pub mod counting;
/// Datacard parsing.
pub mod datacard;

pub use counting::{CountingData, CountingModel};
pub use datacard::{Datacard, DatacardOptions, LnNSystematic};
