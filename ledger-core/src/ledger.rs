//! Main ledger orchestration layer
//!
//! This module ties together storage, metrics, and the writer actor
//! into a high-level API for balances, transactions and the outbox.
//!
//! # Example
//!
//! ```no_run
//! use ledger_core::{AccountId, Config, Currency, Ledger};
//! use rust_decimal::Decimal;
//!
//! #[tokio::main]
//! async fn main() -> ledger_core::Result<()> {
//!     let ledger = Ledger::open(Config::default()).await?;
//!     ledger
//!         .open_account(AccountId::new("ACC-001"), Currency::VND, Decimal::from(1_000))
//!         .await?;
//!     Ok(())
//! }
//! ```

use crate::{
    actor::{spawn_ledger_actor, LedgerHandle},
    metrics::Metrics,
    types::{Account, AccountId, Currency, OutboxEvent, Transaction, TransactionStatus},
    unit::{CommitReceipt, UnitOfWork},
    Config, Result, Storage,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

/// Main ledger interface
#[derive(Debug)]
pub struct Ledger {
    /// Actor handle for writes
    handle: LedgerHandle,

    /// Direct storage access (for reads)
    storage: Arc<Storage>,

    metrics: Metrics,

    /// Configuration
    config: Config,
}

impl Ledger {
    /// Open ledger with configuration
    pub async fn open(config: Config) -> Result<Self> {
        let storage = Arc::new(Storage::open(&config)?);
        let metrics = Metrics::new()?;
        let handle = spawn_ledger_actor(storage.clone(), config.mailbox_capacity, metrics.clone());

        tracing::info!(
            service = %config.service_name,
            data_dir = ?config.data_dir,
            "Ledger opened"
        );

        Ok(Self {
            handle,
            storage,
            metrics,
            config,
        })
    }

    /// Open an account with an opening balance
    pub async fn open_account(
        &self,
        account_id: AccountId,
        currency: Currency,
        opening_balance: Decimal,
    ) -> Result<Account> {
        let account = Account {
            account_id: account_id.clone(),
            balance: opening_balance,
            currency,
            version: 0,
            updated_at: Utc::now(),
        };
        self.handle
            .commit(UnitOfWork::new().open_account(account))
            .await?;
        self.storage.get_account(&account_id)
    }

    /// Apply a unit of work atomically
    pub async fn commit(&self, unit: UnitOfWork) -> Result<CommitReceipt> {
        self.handle.commit(unit).await
    }

    /// Get account
    pub fn account(&self, account_id: &AccountId) -> Result<Account> {
        self.storage.get_account(account_id)
    }

    /// Current balance
    pub fn balance(&self, account_id: &AccountId) -> Result<Decimal> {
        Ok(self.storage.get_account(account_id)?.balance)
    }

    /// Get transaction
    pub fn transaction(&self, transaction_id: Uuid) -> Result<Transaction> {
        self.storage.get_transaction(transaction_id)
    }

    /// Find transaction
    pub fn find_transaction(&self, transaction_id: Uuid) -> Result<Option<Transaction>> {
        self.storage.find_transaction(transaction_id)
    }

    /// Transaction that owns an OTP challenge
    pub fn transaction_by_challenge(&self, challenge_id: &str) -> Result<Option<Transaction>> {
        self.storage.transaction_by_challenge(challenge_id)
    }

    /// Transactions touching an account, newest first
    pub fn history(&self, account_id: &AccountId) -> Result<Vec<Transaction>> {
        self.storage.transactions_for_account(account_id)
    }

    /// Transactions currently in a status, oldest first
    pub fn transactions_by_status(&self, status: TransactionStatus) -> Result<Vec<Transaction>> {
        self.storage.transactions_by_status(status)
    }

    /// PENDING outbox events in creation order
    pub fn pending_outbox(&self, limit: usize) -> Result<Vec<OutboxEvent>> {
        self.storage.pending_outbox(limit)
    }

    /// PENDING outbox events after a sequence cursor
    pub fn pending_outbox_after(&self, after: u64, limit: usize) -> Result<Vec<OutboxEvent>> {
        self.storage.pending_outbox_after(after, limit)
    }

    /// FAILED outbox events awaiting an operator
    pub fn failed_outbox(&self) -> Result<Vec<OutboxEvent>> {
        self.storage.failed_outbox()
    }

    /// Get outbox event
    pub fn outbox_event(&self, id: Uuid) -> Result<OutboxEvent> {
        self.storage.get_outbox_event(id)
    }

    /// Mark outbox event published
    pub async fn mark_published(&self, id: Uuid, at: DateTime<Utc>) -> Result<OutboxEvent> {
        self.handle.mark_published(id, at).await
    }

    /// Record a failed publish attempt
    pub async fn record_publish_failure(
        &self,
        id: Uuid,
        error: String,
        next_attempt_at: DateTime<Utc>,
        max_attempts: u32,
    ) -> Result<OutboxEvent> {
        self.handle
            .record_publish_failure(id, error, next_attempt_at, max_attempts)
            .await
    }

    /// Put a FAILED outbox event back to PENDING
    pub async fn requeue_outbox(&self, id: Uuid, at: DateTime<Utc>) -> Result<OutboxEvent> {
        self.handle.requeue(id, at).await
    }

    /// Metrics
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Stop the writer
    pub async fn shutdown(&self) -> Result<()> {
        self.handle.shutdown().await
    }
}
