//! External Bank Gateway
//!
//! Partner-bank side of inter-bank transfers:
//!
//! 1. **Initiate**: consume `external.transfer.initiate`, record an
//!    [`ExternalTransfer`] once per originating transaction
//! 2. **Process**: PENDING → PROCESSING → COMPLETED | FAILED after a
//!    simulated processing time
//! 3. **Callback**: publish `external.transfer.callback` until the bus
//!    accepts it
//!
//! Transfers and the originating-transaction index live in a RocksDB store,
//! so a redelivered initiation stays a no-op across restarts and undelivered
//! callbacks are retried after one.
//!
//! Malformed initiations are returned as poison errors so the subscriber
//! dead-letters them instead of redelivering forever.

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod config;
pub mod error;
pub mod gateway;
pub mod listener;
pub mod outcome;
pub mod storage;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use gateway::{ExternalBankGateway, Initiation, ProcessReport};
pub use listener::InitiateListener;
pub use outcome::{FixedOutcome, Outcome, OutcomeSource, RandomOutcome, FAILURE_REASONS};
pub use storage::TransferStore;
pub use types::{ExternalTransfer, TransferStatus};
