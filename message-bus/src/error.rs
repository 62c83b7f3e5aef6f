//! Error types for message bus

use thiserror::Error;

/// Message bus error
#[derive(Debug, Error)]
pub enum Error {
    /// Publish error
    #[error("Publish error: {0}")]
    Publish(String),

    /// Subscribe error
    #[error("Subscribe error: {0}")]
    Subscribe(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Payload does not match the expected event shape
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Topic name not known to the bus
    #[error("Unknown topic: {0}")]
    UnknownTopic(String),

    /// Handler failure that may succeed on redelivery
    #[error("Handler error: {0}")]
    Handler(String),

    /// Handler failure that will never succeed; skip redelivery
    #[error("Poison message: {0}")]
    Poison(String),

    /// Operation timed out (milliseconds)
    #[error("Timeout after {0}ms")]
    Timeout(u64),

    /// DLQ entry not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// DLQ entry failed for a permanent reason
    #[error("Not reprocessable: {0}")]
    NotReprocessable(String),
}

impl Error {
    /// True if redelivering the same message cannot help
    pub fn is_poison(&self) -> bool {
        matches!(
            self,
            Error::Deserialization(_) | Error::Poison(_) | Error::UnknownTopic(_)
        )
    }
}

/// Result type
pub type Result<T> = std::result::Result<T, Error>;
