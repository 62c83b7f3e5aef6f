//! Error types for the transfer saga

use crate::otp::ChallengeError;
use thiserror::Error;

/// Result type for saga operations
pub type Result<T> = std::result::Result<T, Error>;

/// Saga errors
#[derive(Error, Debug)]
pub enum Error {
    /// Ledger error
    #[error("Ledger error: {0}")]
    Ledger(#[from] ledger_core::Error),

    /// Message bus error
    #[error("Bus error: {0}")]
    Bus(#[from] message_bus::Error),

    /// Risk engine error (limits)
    #[error("Risk error: {0}")]
    Risk(#[from] risk_engine::Error),

    /// OTP challenge failure
    #[error("Challenge error: {0}")]
    Challenge(#[from] ChallengeError),

    /// Malformed request, rejected before any state is created
    #[error("Validation error: {0}")]
    Validation(String),

    /// Sender balance below amount + fee
    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),

    /// Caller may not act on this resource
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Operation not allowed in the current state
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Stable status code surfaced in the response envelope
    pub fn code(&self) -> u16 {
        match self {
            Error::Validation(_) | Error::InsufficientFunds(_) => 400,
            Error::Risk(risk_engine::Error::LimitExceeded(_)) => 400,
            Error::Challenge(ChallengeError::NotFound(_)) => 404,
            Error::Challenge(ChallengeError::Cooldown { .. }) => 409,
            Error::Challenge(_) => 400,
            Error::Forbidden(_) => 403,
            Error::Conflict(_) => 409,
            Error::Ledger(e) => match e {
                ledger_core::Error::InsufficientFunds { .. } | ledger_core::Error::InvalidUnit(_) => 400,
                ledger_core::Error::AccountNotFound(_)
                | ledger_core::Error::TransactionNotFound(_)
                | ledger_core::Error::OutboxEventNotFound(_) => 404,
                ledger_core::Error::AccountExists(_) | ledger_core::Error::PreconditionFailed(_) => 409,
                _ => 500,
            },
            _ => 500,
        }
    }
}
