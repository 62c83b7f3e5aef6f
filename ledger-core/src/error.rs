//! Error types for the ledger

use rust_decimal::Decimal;
use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Outbox payload encoding error
    #[error("Payload encoding error: {0}")]
    Payload(#[from] serde_json::Error),

    /// Debit larger than the available balance
    #[error("Insufficient funds on {account}: available {available}, requested {requested}")]
    InsufficientFunds {
        /// Debited account
        account: String,
        /// Balance at commit time
        available: Decimal,
        /// Requested debit
        requested: Decimal,
    },

    /// Account not found
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    /// Account already exists
    #[error("Account already exists: {0}")]
    AccountExists(String),

    /// Transaction not found
    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    /// Outbox event not found
    #[error("Outbox event not found: {0}")]
    OutboxEventNotFound(String),

    /// A unit of work precondition did not hold; nothing was applied
    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    /// Malformed unit of work
    #[error("Invalid unit of work: {0}")]
    InvalidUnit(String),

    /// Concurrency error (actor mailbox closed, etc.)
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Metrics registration error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Other(msg.to_string())
    }
}
