//! Error types for risk engine

use thiserror::Error;

/// Risk engine error
#[derive(Debug, Error)]
pub enum Error {
    /// Daily or monthly transfer limit exceeded
    #[error("Limit exceeded: {0}")]
    LimitExceeded(String),

    /// Risk profile could not be fetched
    #[error("Profile unavailable: {0}")]
    ProfileUnavailable(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type
pub type Result<T> = std::result::Result<T, Error>;
