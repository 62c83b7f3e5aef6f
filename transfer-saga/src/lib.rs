//! Fortress Transfer Saga
//!
//! Takes a transfer request from creation through risk scoring, an optional
//! OTP challenge and funds movement to a terminal status. Inter-bank
//! transfers leave through the outbox and finish when the partner bank's
//! callback arrives.
//!
//! # Architecture
//!
//! - **Orchestrator**: the state machine; every transition is one ledger
//!   unit of work with a status/step precondition
//! - **Challenge Store**: single-use OTP challenges with TTL
//! - **Outbox Relay**: PENDING outbox rows to the bus, in order per aggregate
//! - **Callback Listener**: partner-bank results back into the orchestrator
//! - **Status Notifier**: best-effort push to watching clients
//!
//! # Invariants
//!
//! - Funds move at most once per transaction
//! - A challenge is consumed at most once
//! - A duplicate callback changes nothing
//! - Audit and push failures never fail a transfer

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod audit;
pub mod callback;
pub mod clock;
pub mod config;
pub mod error;
pub mod fees;
pub mod notifier;
pub mod orchestrator;
pub mod otp;
pub mod outbox;
pub mod response;
pub mod types;

// Re-exports
pub use audit::AuditPublisher;
pub use callback::CallbackListener;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use error::{Error, Result};
pub use fees::{FeePolicy, FeeSchedule, ScheduleFeePolicy};
pub use notifier::{StatusNotifier, StatusUpdate};
pub use orchestrator::TransferOrchestrator;
pub use otp::{ChallengeError, ChallengeStore, IssuedChallenge, PendingTransfer};
pub use outbox::{OutboxRelay, RelayReport};
pub use response::ApiResponse;
pub use types::{
    CallbackOutcome, ChallengeResponse, Destination, ResentChallenge, TransferOutcome,
    TransferRequest,
};
