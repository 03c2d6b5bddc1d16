//! Error types for robustlimit

use thiserror::Error;

/// robustlimit error type
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Validation error (bad input, bad configuration, API misuse)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Computation error (the engine could not produce a result)
    #[error("Computation error: {0}")]
    Computation(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
