//! Common error types for the attendance engine crates.

use thiserror::Error;

/// Errors that can occur in shared helpers.
#[derive(Error, Debug)]
pub enum CommonError {
    /// The operating system's secure random source failed.
    #[error("Secure random source unavailable")]
    Randomness,

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Result type alias using `CommonError`
pub type Result<T> = std::result::Result<T, CommonError>;
