//! Request and response values of the saga

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use ledger_core::{AccountId, Transaction, TransactionType};
use risk_engine::{RiskAssessment, RiskLevel};
use rust_decimal::Decimal;
use serde::Serialize;

/// Longest accepted description
pub const MAX_DESCRIPTION_LEN: usize = 255;

/// Where the money goes
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Destination {
    /// Account held by this bank
    Internal {
        /// Credited ledger account
        account_id: AccountId,
    },
    /// Account held by a partner bank
    External {
        /// Account number at the partner
        account_number: String,
        /// Partner bank code
        bank_code: String,
    },
}

/// Immutable transfer request
///
/// Only constructible through [`TransferRequest::internal`] and
/// [`TransferRequest::external`], which validate it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    sender_account_id: AccountId,
    destination: Destination,
    amount: Decimal,
    description: Option<String>,
}

impl TransferRequest {
    /// Transfer between two accounts of this bank
    pub fn internal(
        sender: impl Into<String>,
        receiver: impl Into<String>,
        amount: Decimal,
        description: Option<String>,
    ) -> Result<Self> {
        let sender = non_blank("sender account", sender.into())?;
        let receiver = non_blank("receiver account", receiver.into())?;
        if sender == receiver {
            return Err(Error::Validation(
                "sender and receiver accounts must differ".to_string(),
            ));
        }
        Self::build(
            sender,
            Destination::Internal {
                account_id: AccountId::new(receiver),
            },
            amount,
            description,
        )
    }

    /// Transfer to a partner bank
    pub fn external(
        sender: impl Into<String>,
        account_number: impl Into<String>,
        bank_code: impl Into<String>,
        amount: Decimal,
        description: Option<String>,
    ) -> Result<Self> {
        let sender = non_blank("sender account", sender.into())?;
        let account_number = non_blank("destination account", account_number.into())?;
        let bank_code = non_blank("destination bank code", bank_code.into())?;
        Self::build(
            sender,
            Destination::External {
                account_number,
                bank_code,
            },
            amount,
            description,
        )
    }

    fn build(
        sender: String,
        destination: Destination,
        amount: Decimal,
        description: Option<String>,
    ) -> Result<Self> {
        if amount <= Decimal::ZERO {
            return Err(Error::Validation(format!("amount must be positive, got {}", amount)));
        }
        if amount.scale() > 2 {
            return Err(Error::Validation(format!(
                "amount has more than 2 decimal places: {}",
                amount
            )));
        }
        if let Some(text) = &description {
            if text.chars().count() > MAX_DESCRIPTION_LEN {
                return Err(Error::Validation(format!(
                    "description longer than {} characters",
                    MAX_DESCRIPTION_LEN
                )));
            }
        }
        Ok(Self {
            sender_account_id: AccountId::new(sender),
            destination,
            amount,
            description,
        })
    }

    /// Debited account
    pub fn sender(&self) -> &AccountId {
        &self.sender_account_id
    }

    /// Destination
    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    /// Amount (fee excluded)
    pub fn amount(&self) -> Decimal {
        self.amount
    }

    /// Description
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Ledger account or external account number of the receiver
    pub fn receiver_id(&self) -> AccountId {
        match &self.destination {
            Destination::Internal { account_id } => account_id.clone(),
            Destination::External { account_number, .. } => AccountId::new(account_number.clone()),
        }
    }

    /// Partner bank code for external transfers
    pub fn bank_code(&self) -> Option<&str> {
        match &self.destination {
            Destination::Internal { .. } => None,
            Destination::External { bank_code, .. } => Some(bank_code),
        }
    }

    /// Transaction type derived from the destination
    pub fn transaction_type(&self) -> TransactionType {
        match self.destination {
            Destination::Internal { .. } => TransactionType::InternalTransfer,
            Destination::External { .. } => TransactionType::ExternalTransfer,
        }
    }
}

fn non_blank(field: &str, value: String) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(Error::Validation(format!("{} is required", field)));
    }
    Ok(trimmed.to_string())
}

/// Transfer details shown on a smart OTP device
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionContext {
    pub from_account: String,
    pub to_account: String,
    pub to_bank_code: Option<String>,
    pub amount: Decimal,
    pub fee_amount: Decimal,
    pub currency: String,
    pub current_balance: Decimal,
    pub remaining_balance: Decimal,
    pub is_new_recipient: bool,
}

/// Why the transfer was challenged
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskContext {
    pub risk_level: RiskLevel,
    pub risk_score: u8,
    pub detected_factors: Vec<String>,
    pub primary_reason: Option<String>,
}

impl From<&RiskAssessment> for RiskContext {
    fn from(assessment: &RiskAssessment) -> Self {
        Self {
            risk_level: assessment.risk_level,
            risk_score: assessment.risk_score.score(),
            detected_factors: assessment.factor_descriptions(),
            primary_reason: assessment.primary_reason.clone(),
        }
    }
}

/// What the user should do
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Guidance {
    pub message: String,
    pub warning: Option<String>,
    pub expiry_seconds: u64,
    pub support_contact: String,
}

/// OTP challenge handed to the client
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum ChallengeResponse {
    /// Plain SMS code
    Simple {
        challenge_id: String,
        message: String,
        expiry_seconds: u64,
    },
    /// Smart OTP with transaction and risk context
    Smart {
        challenge_id: String,
        transaction_context: TransactionContext,
        risk_context: RiskContext,
        guidance: Guidance,
    },
}

impl ChallengeResponse {
    /// Challenge identifier
    pub fn challenge_id(&self) -> &str {
        match self {
            ChallengeResponse::Simple { challenge_id, .. }
            | ChallengeResponse::Smart { challenge_id, .. } => challenge_id,
        }
    }
}

/// Result of `create` and `confirm`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferOutcome {
    /// Transaction as stored after the call
    pub transaction: Transaction,

    /// Challenge the client must answer, if any
    pub challenge: Option<ChallengeResponse>,

    /// Risk assessment (create only)
    pub risk: Option<RiskAssessment>,
}

impl TransferOutcome {
    /// True if the client must confirm an OTP
    pub fn requires_challenge(&self) -> bool {
        self.challenge.is_some()
    }
}

/// Result of applying an external callback
#[derive(Debug, Clone, PartialEq)]
pub enum CallbackOutcome {
    /// Transaction moved to a terminal status
    Applied(Transaction),
    /// Transaction was already terminal; nothing changed
    Duplicate(Transaction),
}

impl CallbackOutcome {
    /// Transaction after the callback
    pub fn transaction(&self) -> &Transaction {
        match self {
            CallbackOutcome::Applied(tx) | CallbackOutcome::Duplicate(tx) => tx,
        }
    }
}

/// New code issued by `resend_otp`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResentChallenge {
    pub challenge_id: String,
    pub expires_at: DateTime<Utc>,
}
