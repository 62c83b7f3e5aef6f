//! Units of work
//!
//! A [`UnitOfWork`] is the only way to change ledger state. The writer
//! checks every precondition, stages every mutation against a private view
//! of the accounts it touches, and only then commits one RocksDB
//! `WriteBatch`. Either the whole unit is visible afterwards or none of it is.

use crate::types::{
    Account, AccountId, BalanceChange, OutboxEvent, SagaStep, Transaction, TransactionStatus,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

/// Condition that must hold when the unit is applied
#[derive(Debug, Clone, PartialEq)]
pub enum Precondition {
    /// No transaction with this ID exists yet
    TransactionAbsent(Uuid),

    /// Transaction exists with the given status and step
    TransactionAt {
        /// Transaction ID
        transaction_id: Uuid,
        /// Required status
        status: TransactionStatus,
        /// Required saga step
        saga_step: SagaStep,
    },

    /// Transaction exists and is not terminal
    TransactionOpen(Uuid),
}

/// State change staged inside a unit
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Create a new account
    OpenAccount(Account),

    /// Subtract from a balance; fails the unit on insufficient funds
    Debit {
        /// Account
        account_id: AccountId,
        /// Positive amount
        amount: Decimal,
    },

    /// Add to a balance
    Credit {
        /// Account
        account_id: AccountId,
        /// Positive amount
        amount: Decimal,
    },

    /// Insert or replace a transaction row
    PutTransaction(Transaction),

    /// Append an outbox event
    Enqueue(OutboxEvent),
}

/// Atomic batch of preconditions and mutations
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnitOfWork {
    pub(crate) preconditions: Vec<Precondition>,
    pub(crate) mutations: Vec<Mutation>,
}

impl UnitOfWork {
    /// Empty unit
    pub fn new() -> Self {
        Self::default()
    }

    /// Require that the transaction does not exist yet
    pub fn expect_absent(mut self, transaction_id: Uuid) -> Self {
        self.preconditions
            .push(Precondition::TransactionAbsent(transaction_id));
        self
    }

    /// Require the transaction to be at `status` / `saga_step`
    pub fn expect_at(
        mut self,
        transaction_id: Uuid,
        status: TransactionStatus,
        saga_step: SagaStep,
    ) -> Self {
        self.preconditions.push(Precondition::TransactionAt {
            transaction_id,
            status,
            saga_step,
        });
        self
    }

    /// Require the transaction to exist in a non-terminal status
    pub fn expect_open(mut self, transaction_id: Uuid) -> Self {
        self.preconditions
            .push(Precondition::TransactionOpen(transaction_id));
        self
    }

    /// Open an account with an opening balance
    pub fn open_account(mut self, account: Account) -> Self {
        self.mutations.push(Mutation::OpenAccount(account));
        self
    }

    /// Debit an account
    pub fn debit(mut self, account_id: AccountId, amount: Decimal) -> Self {
        self.mutations.push(Mutation::Debit { account_id, amount });
        self
    }

    /// Credit an account
    pub fn credit(mut self, account_id: AccountId, amount: Decimal) -> Self {
        self.mutations.push(Mutation::Credit { account_id, amount });
        self
    }

    /// Insert or replace a transaction
    pub fn put_transaction(mut self, transaction: Transaction) -> Self {
        self.mutations.push(Mutation::PutTransaction(transaction));
        self
    }

    /// Record an outbox event in this unit
    pub fn enqueue<T: Serialize>(
        mut self,
        aggregate_type: &str,
        aggregate_id: &str,
        event_type: &str,
        topic: &str,
        payload: &T,
        at: DateTime<Utc>,
    ) -> crate::Result<Self> {
        let event = OutboxEvent::new(aggregate_type, aggregate_id, event_type, topic, payload, at)?;
        self.mutations.push(Mutation::Enqueue(event));
        Ok(self)
    }

    /// Staged mutations
    pub fn mutations(&self) -> &[Mutation] {
        &self.mutations
    }

    /// True if nothing is staged
    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    /// Reject zero or negative money movements before touching storage
    pub(crate) fn validate(&self) -> crate::Result<()> {
        if self.is_empty() {
            return Err(crate::Error::InvalidUnit("unit has no mutations".to_string()));
        }
        for mutation in &self.mutations {
            match mutation {
                Mutation::Debit { account_id, amount } | Mutation::Credit { account_id, amount }
                    if *amount <= Decimal::ZERO =>
                {
                    return Err(crate::Error::InvalidUnit(format!(
                        "non-positive amount {} for account {}",
                        amount, account_id
                    )));
                }
                Mutation::OpenAccount(account) if account.balance < Decimal::ZERO => {
                    return Err(crate::Error::InvalidUnit(format!(
                        "negative opening balance for account {}",
                        account.account_id
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Result of a committed unit
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommitReceipt {
    /// Net balance movement per touched account
    pub balances: Vec<BalanceChange>,

    /// Outbox events recorded, with their assigned sequence
    pub outbox: Vec<(Uuid, u64)>,
}

impl CommitReceipt {
    /// Balance change for one account
    pub fn balance_of(&self, account_id: &AccountId) -> Option<&BalanceChange> {
        self.balances.iter().find(|b| &b.account_id == account_id)
    }
}
