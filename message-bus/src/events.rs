//! Event payloads carried on each topic
//!
//! Field names are camelCase on the wire.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// `external.transfer.initiate` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalTransferInitiatedEvent {
    /// Originating transaction (idempotency key on the gateway side)
    pub transaction_id: Uuid,
    /// Debited account at the home bank
    pub source_account_number: String,
    /// Home bank code
    pub source_bank_code: String,
    /// Account at the partner bank
    pub destination_account_number: String,
    /// Partner bank code
    pub destination_bank_code: String,
    /// Transferred amount (fee excluded)
    pub amount: Decimal,
    /// ISO currency code
    pub currency: String,
    /// Free-text description
    pub description: Option<String>,
    /// Initiation time
    pub timestamp: DateTime<Utc>,
}

/// Partner-side outcome of an inter-bank transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExternalTransferStatus {
    /// Funds accepted by the partner bank
    Completed,
    /// Partner bank refused the transfer
    Failed,
}

/// `external.transfer.callback` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalTransferCompletedEvent {
    /// Gateway-side id
    pub external_transaction_id: Uuid,
    /// Originating transaction
    pub fortress_bank_transaction_id: Uuid,
    /// Outcome
    pub status: ExternalTransferStatus,
    /// Transferred amount
    pub amount: Decimal,
    /// Debited account at the home bank
    pub source_account_number: String,
    /// Account at the partner bank
    pub destination_account_number: String,
    /// Partner bank code
    pub destination_bank_code: String,
    /// Outcome detail (failure reason on FAILED)
    pub message: String,
    /// Processing time
    pub timestamp: DateTime<Utc>,
}

/// Audit outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditResult {
    /// Action succeeded
    Success,
    /// Action failed
    Failure,
}

/// `audit.log` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub service_name: String,
    pub entity_type: String,
    pub entity_id: String,
    pub action: String,
    pub user_id: Option<String>,
    pub result: AuditResult,
    pub details: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Kind of transaction notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationEventType {
    /// Transfer accepted, waiting for OTP or partner bank
    TransactionPending,
    /// Funds delivered
    TransactionCompleted,
    /// Execution or partner bank failure
    TransactionFailed,
    /// Wrong OTP
    TransactionRejected,
    /// Cancelled by the client
    TransactionCancelled,
    /// OTP not confirmed in time
    TransactionExpired,
}

/// `notification.transaction` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEvent {
    pub event_type: NotificationEventType,
    /// Account whose owner is notified
    pub account_id: String,
    pub title: String,
    pub message: String,
    pub transaction_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub timestamp: DateTime<Utc>,
}

/// OTP delivery channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OtpChannel {
    /// Plain SMS code
    Sms,
    /// Smart OTP app with transaction context
    Smart,
}

/// `notification.otp` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OtpEvent {
    pub challenge_id: String,
    pub account_id: String,
    pub otp_code: String,
    pub channel: OtpChannel,
    pub expires_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_callback_wire_format() {
        let tx = Uuid::new_v4();
        let event = ExternalTransferCompletedEvent {
            external_transaction_id: Uuid::new_v4(),
            fortress_bank_transaction_id: tx,
            status: ExternalTransferStatus::Failed,
            amount: Decimal::new(150_000, 2),
            source_account_number: "ACC-1".into(),
            destination_account_number: "999".into(),
            destination_bank_code: "VCB".into(),
            message: "Destination account closed".into(),
            timestamp: Utc::now(),
        };

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["status"], "FAILED");
        assert_eq!(value["fortressBankTransactionId"], json!(tx));
        assert_eq!(value["amount"], "1500.00");
    }

    #[test]
    fn test_initiation_accepts_missing_description() {
        let value = json!({
            "transactionId": Uuid::new_v4(),
            "sourceAccountNumber": "ACC-1",
            "sourceBankCode": "FTB",
            "destinationAccountNumber": "999",
            "destinationBankCode": "VCB",
            "amount": "10.00",
            "currency": "VND",
            "description": null,
            "timestamp": Utc::now(),
        });
        let event: ExternalTransferInitiatedEvent = serde_json::from_value(value).unwrap();
        assert_eq!(event.amount, Decimal::new(1000, 2));
        assert!(event.description.is_none());
    }
}
