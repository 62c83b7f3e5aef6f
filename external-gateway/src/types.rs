//! Partner-side transfer records

use chrono::{DateTime, Utc};
use message_bus::events::ExternalTransferInitiatedEvent;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Processing status at the partner bank
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferStatus {
    /// Received, not yet picked up
    Pending,
    /// Picked up by the processor
    Processing,
    /// Accepted by the partner
    Completed,
    /// Refused by the partner
    Failed,
}

impl TransferStatus {
    /// True for COMPLETED / FAILED
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferStatus::Completed | TransferStatus::Failed)
    }
}

/// Mirror of an inter-bank transaction on the partner side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalTransfer {
    /// External transaction ID
    pub id: Uuid,

    /// Originating transaction (unique, idempotency key)
    pub fortress_bank_transaction_id: Uuid,

    pub source_account_number: String,
    pub source_bank_code: String,
    pub destination_account_number: String,
    pub destination_bank_code: String,
    pub amount: Decimal,
    pub currency: String,
    pub description: Option<String>,

    /// Processing status
    pub status: TransferStatus,

    /// Human-readable status detail
    pub message: String,

    pub created_at: DateTime<Utc>,

    /// Earliest time the simulated partner decides
    pub ready_at: DateTime<Utc>,

    /// Set when the transfer reaches a terminal status
    pub processed_at: Option<DateTime<Utc>>,

    /// Set once the callback was accepted by the bus
    pub callback_sent_at: Option<DateTime<Utc>>,
}

impl ExternalTransfer {
    /// New PENDING transfer from an initiation event
    pub fn from_initiation(
        event: &ExternalTransferInitiatedEvent,
        created_at: DateTime<Utc>,
        ready_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            fortress_bank_transaction_id: event.transaction_id,
            source_account_number: event.source_account_number.clone(),
            source_bank_code: event.source_bank_code.clone(),
            destination_account_number: event.destination_account_number.clone(),
            destination_bank_code: event.destination_bank_code.clone(),
            amount: event.amount,
            currency: event.currency.clone(),
            description: event.description.clone(),
            status: TransferStatus::Pending,
            message: "Transfer request received, pending processing".to_string(),
            created_at,
            ready_at,
            processed_at: None,
            callback_sent_at: None,
        }
    }

    /// Terminal but the originating bank has not been told yet
    pub fn awaiting_callback(&self) -> bool {
        self.status.is_terminal() && self.callback_sent_at.is_none()
    }
}
