//! Error types for the Dualrate limiter.

use thiserror::Error;

/// Main error type for Dualrate operations.
#[derive(Error, Debug)]
pub enum DualrateError {
    /// Configuration could not be read or parsed
    #[error("Configuration error: {0}")]
    Config(String),

    /// A limit, window or count outside its valid domain
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl From<config::ConfigError> for DualrateError {
    fn from(err: config::ConfigError) -> Self {
        DualrateError::Config(err.to_string())
    }
}

/// Result type alias for Dualrate operations.
pub type Result<T> = std::result::Result<T, DualrateError>;
