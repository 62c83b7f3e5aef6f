//! Fortress Ledger Core
//!
//! Account balances, transaction records and the transactional outbox,
//! kept in one RocksDB instance and mutated by a single writer.
//!
//! # Architecture
//!
//! - **Single Writer**: One logical writer task eliminates lost updates
//! - **Units of Work**: Preconditions + mutations committed as one `WriteBatch`
//! - **Transactional Outbox**: Events are recorded in the same batch as the
//!   state change they describe and relayed to the bus later
//!
//! # Invariants
//!
//! - Money conservation: every unit's debits and credits land together or not at all
//! - No overdraft: a debit larger than the balance rejects the whole unit
//! - Outbox completeness: a committed state change always has its events recorded
//! - Outbox order: sequences are assigned in commit order

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod types;
pub mod storage;
pub mod unit;
pub mod ledger;
pub mod error;
pub mod actor;
pub mod config;
pub mod metrics;

// Re-exports
pub use error::{Error, Result};
pub use types::{
    Account, AccountId, BalanceChange, Currency, OutboxEvent, OutboxStatus, SagaStep,
    Transaction, TransactionStatus, TransactionType,
};
pub use unit::{CommitReceipt, UnitOfWork};
pub use storage::Storage;
pub use ledger::Ledger;
pub use config::Config;
