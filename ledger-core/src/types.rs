//! Core types for the ledger
//!
//! All types are designed for:
//! - Deterministic serialization (bincode)
//! - Exact arithmetic (Decimal for money)
//! - Plain value semantics (no behavior beyond derived views)

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Account identifier (internal account number)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountId(String);

impl AccountId {
    /// Create new account ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// ISO 4217 currency code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Currency {
    /// Vietnamese Dong
    VND,
    /// US Dollar
    USD,
    /// Euro
    EUR,
}

impl Currency {
    /// ISO 4217 code
    pub fn code(&self) -> &'static str {
        match self {
            Currency::VND => "VND",
            Currency::USD => "USD",
            Currency::EUR => "EUR",
        }
    }

    /// Parse from string
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "VND" => Some(Currency::VND),
            "USD" => Some(Currency::USD),
            "EUR" => Some(Currency::EUR),
            _ => None,
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Account balance record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Account identifier
    pub account_id: AccountId,

    /// Current balance
    pub balance: Decimal,

    /// Account currency
    pub currency: Currency,

    /// Incremented on every balance mutation
    pub version: u64,

    /// Last mutation time
    pub updated_at: DateTime<Utc>,
}

/// Balance movement applied by a committed unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceChange {
    /// Account that moved
    pub account_id: AccountId,

    /// Balance before the unit
    pub old_balance: Decimal,

    /// Balance after the unit
    pub new_balance: Decimal,
}

/// Transaction status (the saga state field)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TransactionStatus {
    /// Awaiting OTP, execution or external callback
    Pending = 0,
    /// Funds settled
    Completed = 1,
    /// Funds movement failed (or was compensated)
    Failed = 2,
    /// OTP challenge rejected
    Rejected = 3,
    /// Cancelled by the client before funds moved
    Cancelled = 4,
    /// OTP challenge expired
    Expired = 5,
}

impl TransactionStatus {
    /// PENDING is the only non-terminal state
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }

    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::Completed => "COMPLETED",
            TransactionStatus::Failed => "FAILED",
            TransactionStatus::Rejected => "REJECTED",
            TransactionStatus::Cancelled => "CANCELLED",
            TransactionStatus::Expired => "EXPIRED",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a transaction is inside the saga
///
/// `status` alone cannot tell whether money has moved for a PENDING
/// transaction; the step can.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SagaStep {
    /// Waiting for the client to answer an OTP challenge
    AwaitingChallenge,
    /// Risk gating passed, funds movement in progress
    Executing,
    /// Sender debited, external bank callback outstanding
    AwaitingCallback,
    /// Funds settled
    Settled,
    /// Sender debit reversed after an external failure
    Compensated,
    /// Ended before any funds moved
    Aborted,
}

impl SagaStep {
    /// True once the sender has been debited
    pub fn funds_moved(&self) -> bool {
        matches!(
            self,
            SagaStep::AwaitingCallback | SagaStep::Settled | SagaStep::Compensated
        )
    }
}

/// Transaction type (fee schedules are keyed on it)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TransactionType {
    /// Both accounts held by this bank
    InternalTransfer,
    /// Destination held by a partner bank
    ExternalTransfer,
}

impl TransactionType {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::InternalTransfer => "INTERNAL_TRANSFER",
            TransactionType::ExternalTransfer => "EXTERNAL_TRANSFER",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable record of a transfer attempt
///
/// Never deleted. Mutated only by the transfer orchestrator through
/// units of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Transaction ID (UUIDv7, time ordered)
    pub transaction_id: Uuid,

    /// Debited account
    pub sender_account_id: AccountId,

    /// Credited account, or the external account number for inter-bank
    pub receiver_account_id: AccountId,

    /// Partner bank code for inter-bank transfers
    pub destination_bank_code: Option<String>,

    /// Transfer amount
    pub amount: Decimal,

    /// Fee charged to the sender on top of the amount
    pub fee_amount: Decimal,

    /// Currency
    pub currency: Currency,

    /// Transaction type
    pub transaction_type: TransactionType,

    /// State-machine status
    pub status: TransactionStatus,

    /// Saga progress
    pub saga_step: SagaStep,

    /// Free-text description from the client
    pub description: Option<String>,

    /// Outstanding OTP challenge, if any
    pub challenge_id: Option<String>,

    /// Created at
    pub created_at: DateTime<Utc>,

    /// Last update
    pub updated_at: DateTime<Utc>,

    /// Set when the transfer reaches COMPLETED
    pub completed_at: Option<DateTime<Utc>>,

    /// Reason for FAILED / REJECTED / EXPIRED
    pub failure_reason: Option<String>,

    /// Set when flagged for manual reconciliation
    pub reconciliation_flagged_at: Option<DateTime<Utc>>,

    /// Compensating refund could not be applied
    pub rollback_failed: bool,
}

impl Transaction {
    /// Amount debited from the sender (amount + fee)
    pub fn total_debit(&self) -> Decimal {
        self.amount + self.fee_amount
    }

    /// True if the status is terminal
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// True for inter-bank transfers
    pub fn is_external(&self) -> bool {
        self.transaction_type == TransactionType::ExternalTransfer
    }

    /// Copy with a new status, step and update time
    pub fn transition(
        &self,
        status: TransactionStatus,
        saga_step: SagaStep,
        at: DateTime<Utc>,
    ) -> Self {
        let mut next = self.clone();
        next.status = status;
        next.saga_step = saga_step;
        next.updated_at = at;
        if status == TransactionStatus::Completed {
            next.completed_at = Some(at);
        }
        next
    }

    /// Copy with a failure reason
    pub fn with_failure_reason(mut self, reason: impl Into<String>) -> Self {
        self.failure_reason = Some(reason.into());
        self
    }
}

/// Outbox row status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutboxStatus {
    /// Waiting for the relay
    Pending,
    /// Acknowledged by the broker
    Published,
    /// Retry ceiling reached, needs an operator
    Failed,
}

/// Event recorded in the same unit of work as the state change it describes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEvent {
    /// Event ID
    pub id: Uuid,

    /// Commit order, assigned by the ledger writer
    pub sequence: u64,

    /// Aggregate type (e.g. "Transaction")
    pub aggregate_type: String,

    /// Aggregate identity; relay order is preserved per aggregate
    pub aggregate_id: String,

    /// Event type (e.g. "ExternalTransferInitiated")
    pub event_type: String,

    /// Destination topic on the bus
    pub topic: String,

    /// JSON payload
    pub payload: String,

    /// Relay status
    pub status: OutboxStatus,

    /// Failed publish attempts
    pub attempts: u32,

    /// Last publish error
    pub last_error: Option<String>,

    /// Created at
    pub created_at: DateTime<Utc>,

    /// Earliest time of the next publish attempt
    pub next_attempt_at: DateTime<Utc>,

    /// Broker acknowledgment time
    pub published_at: Option<DateTime<Utc>>,
}

impl OutboxEvent {
    /// Build a PENDING event with a JSON-encoded payload
    pub fn new<T: Serialize>(
        aggregate_type: impl Into<String>,
        aggregate_id: impl Into<String>,
        event_type: impl Into<String>,
        topic: impl Into<String>,
        payload: &T,
        created_at: DateTime<Utc>,
    ) -> crate::Result<Self> {
        Ok(Self {
            id: Uuid::now_v7(),
            sequence: 0,
            aggregate_type: aggregate_type.into(),
            aggregate_id: aggregate_id.into(),
            event_type: event_type.into(),
            topic: topic.into(),
            payload: serde_json::to_string(payload)?,
            status: OutboxStatus::Pending,
            attempts: 0,
            last_error: None,
            created_at,
            next_attempt_at: created_at,
            published_at: None,
        })
    }

    /// Payload as a JSON value
    pub fn payload_json(&self) -> crate::Result<serde_json::Value> {
        Ok(serde_json::from_str(&self.payload)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_transaction() -> Transaction {
        let now = Utc::now();
        Transaction {
            transaction_id: Uuid::now_v7(),
            sender_account_id: AccountId::new("ACC-001"),
            receiver_account_id: AccountId::new("ACC-002"),
            destination_bank_code: None,
            amount: Decimal::new(50000, 2),
            fee_amount: Decimal::new(150, 2),
            currency: Currency::VND,
            transaction_type: TransactionType::InternalTransfer,
            status: TransactionStatus::Pending,
            saga_step: SagaStep::Executing,
            description: None,
            challenge_id: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
            failure_reason: None,
            reconciliation_flagged_at: None,
            rollback_failed: false,
        }
    }

    #[test]
    fn test_only_pending_is_non_terminal() {
        assert!(!TransactionStatus::Pending.is_terminal());
        for status in [
            TransactionStatus::Completed,
            TransactionStatus::Failed,
            TransactionStatus::Rejected,
            TransactionStatus::Cancelled,
            TransactionStatus::Expired,
        ] {
            assert!(status.is_terminal(), "{} should be terminal", status);
        }
    }

    #[test]
    fn test_total_debit_includes_fee() {
        let tx = sample_transaction();
        assert_eq!(tx.total_debit(), Decimal::new(50150, 2));
    }

    #[test]
    fn test_transition_sets_completed_at() {
        let tx = sample_transaction();
        let at = Utc::now();
        let done = tx.transition(TransactionStatus::Completed, SagaStep::Settled, at);

        assert_eq!(done.completed_at, Some(at));
        assert_eq!(done.updated_at, at);
        assert!(tx.completed_at.is_none());
    }

    #[test]
    fn test_funds_moved_steps() {
        assert!(!SagaStep::AwaitingChallenge.funds_moved());
        assert!(!SagaStep::Executing.funds_moved());
        assert!(SagaStep::AwaitingCallback.funds_moved());
        assert!(SagaStep::Compensated.funds_moved());
    }

    #[test]
    fn test_transaction_bincode_roundtrip() {
        let tx = sample_transaction();
        let bytes = bincode::serialize(&tx).unwrap();
        let back: Transaction = bincode::deserialize(&bytes).unwrap();
        assert_eq!(tx, back);
    }

    #[test]
    fn test_outbox_event_payload_is_json() {
        let event = OutboxEvent::new(
            "Transaction",
            "tx-1",
            "TransactionCompleted",
            "notification.transaction",
            &serde_json::json!({"amount": "500.00"}),
            Utc::now(),
        )
        .unwrap();

        assert_eq!(event.status, OutboxStatus::Pending);
        assert_eq!(event.next_attempt_at, event.created_at);
        assert_eq!(event.payload_json().unwrap()["amount"], "500.00");
    }
}
