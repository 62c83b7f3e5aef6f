//! Actor-based concurrency for the ledger
//!
//! This module implements the single-writer pattern using Tokio actors:
//! - One logical writer task serializes every balance mutation, so two
//!   transfers touching the same account can never lose an update
//! - Unit-of-work preconditions are checked and applied without interleaving
//! - Async message passing with backpressure
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │       Transfer orchestrator / outbox relay            │
//! └─────────────────────┬────────────────────────────────┘
//!                       │
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │               LedgerHandle (Clone)                    │
//! │         Sends messages to actor mailbox              │
//! └─────────────────────┬────────────────────────────────┘
//!                       │
//!                       │ mpsc::channel (bounded)
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │              LedgerActor (Single Task)                │
//! │   check preconditions → stage → WriteBatch commit     │
//! └───────────────────────────────────────────────────────┘
//! ```

use crate::metrics::Metrics;
use crate::types::OutboxEvent;
use crate::unit::{CommitReceipt, UnitOfWork};
use crate::{Error, Result, Storage};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// Message sent to the ledger actor
#[derive(Debug)]
pub enum LedgerMessage {
    /// Apply a unit of work
    Commit {
        unit: UnitOfWork,
        response: oneshot::Sender<Result<CommitReceipt>>,
    },

    /// Mark an outbox event published
    MarkPublished {
        id: Uuid,
        at: DateTime<Utc>,
        response: oneshot::Sender<Result<OutboxEvent>>,
    },

    /// Record a failed publish attempt
    RecordPublishFailure {
        id: Uuid,
        error: String,
        next_attempt_at: DateTime<Utc>,
        max_attempts: u32,
        response: oneshot::Sender<Result<OutboxEvent>>,
    },

    /// Requeue a FAILED outbox event
    Requeue {
        id: Uuid,
        at: DateTime<Utc>,
        response: oneshot::Sender<Result<OutboxEvent>>,
    },

    /// Shutdown actor
    Shutdown,
}

/// Actor that owns all ledger writes
#[derive(Debug)]
pub struct LedgerActor {
    /// Storage backend
    storage: Arc<Storage>,

    /// Mailbox for incoming messages
    mailbox: mpsc::Receiver<LedgerMessage>,

    /// Commit and rejection counters
    metrics: Metrics,
}

impl LedgerActor {
    /// Create new actor
    pub fn new(
        storage: Arc<Storage>,
        mailbox: mpsc::Receiver<LedgerMessage>,
        metrics: Metrics,
    ) -> Self {
        Self {
            storage,
            mailbox,
            metrics,
        }
    }

    /// Run the actor event loop
    pub async fn run(mut self) {
        while let Some(msg) = self.mailbox.recv().await {
            match msg {
                LedgerMessage::Shutdown => break,
                msg => self.handle_message(msg),
            }
        }
        tracing::info!("Ledger writer stopped");
    }

    /// Handle a single message
    fn handle_message(&mut self, msg: LedgerMessage) {
        match msg {
            LedgerMessage::Commit { unit, response } => {
                let start = Instant::now();
                let result = self.storage.apply(unit, Utc::now());
                match &result {
                    Ok(receipt) => self
                        .metrics
                        .record_commit(receipt.outbox.len(), start.elapsed().as_secs_f64()),
                    Err(e) => {
                        tracing::debug!(error = %e, "Unit of work rejected");
                        self.metrics.record_rejection(e);
                    }
                }
                let _ = response.send(result);
            }

            LedgerMessage::MarkPublished { id, at, response } => {
                let _ = response.send(self.storage.mark_published(id, at));
            }

            LedgerMessage::RecordPublishFailure {
                id,
                error,
                next_attempt_at,
                max_attempts,
                response,
            } => {
                let result =
                    self.storage
                        .record_publish_failure(id, error, next_attempt_at, max_attempts);
                let _ = response.send(result);
            }

            LedgerMessage::Requeue { id, at, response } => {
                let _ = response.send(self.storage.requeue_outbox(id, at));
            }

            LedgerMessage::Shutdown => {
                // Handled in main loop
            }
        }
    }
}

/// Handle for sending messages to the actor
#[derive(Clone, Debug)]
pub struct LedgerHandle {
    sender: mpsc::Sender<LedgerMessage>,
}

impl LedgerHandle {
    /// Create new handle
    pub fn new(sender: mpsc::Sender<LedgerMessage>) -> Self {
        Self { sender }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T>>) -> LedgerMessage,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))?
    }

    /// Apply a unit of work
    pub async fn commit(&self, unit: UnitOfWork) -> Result<CommitReceipt> {
        self.request(|response| LedgerMessage::Commit { unit, response })
            .await
    }

    /// Mark an outbox event published
    pub async fn mark_published(&self, id: Uuid, at: DateTime<Utc>) -> Result<OutboxEvent> {
        self.request(|response| LedgerMessage::MarkPublished { id, at, response })
            .await
    }

    /// Record a failed publish attempt
    pub async fn record_publish_failure(
        &self,
        id: Uuid,
        error: String,
        next_attempt_at: DateTime<Utc>,
        max_attempts: u32,
    ) -> Result<OutboxEvent> {
        self.request(|response| LedgerMessage::RecordPublishFailure {
            id,
            error,
            next_attempt_at,
            max_attempts,
            response,
        })
        .await
    }

    /// Requeue a FAILED outbox event
    pub async fn requeue(&self, id: Uuid, at: DateTime<Utc>) -> Result<OutboxEvent> {
        self.request(|response| LedgerMessage::Requeue { id, at, response })
            .await
    }

    /// Shutdown actor
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(LedgerMessage::Shutdown)
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;
        Ok(())
    }
}

/// Spawn the ledger actor
pub fn spawn_ledger_actor(
    storage: Arc<Storage>,
    mailbox_capacity: usize,
    metrics: Metrics,
) -> LedgerHandle {
    let (tx, rx) = mpsc::channel(mailbox_capacity.max(1)); // Bounded channel for backpressure
    let actor = LedgerActor::new(storage, rx, metrics);

    tokio::spawn(async move {
        actor.run().await;
    });

    LedgerHandle::new(tx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Account, AccountId, Currency};
    use crate::Config;
    use rust_decimal::Decimal;
    use tempfile::TempDir;

    fn open() -> (Arc<Storage>, TempDir) {
        let temp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp.path().to_path_buf();
        (Arc::new(Storage::open(&config).unwrap()), temp)
    }

    fn account(id: &str, balance: i64) -> Account {
        Account {
            account_id: AccountId::new(id),
            balance: Decimal::from(balance),
            currency: Currency::VND,
            version: 0,
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_actor_commit() {
        let (storage, _temp) = open();
        let metrics = Metrics::new().unwrap();
        let handle = spawn_ledger_actor(storage.clone(), 16, metrics.clone());

        handle
            .commit(UnitOfWork::new().open_account(account("A", 100)))
            .await
            .unwrap();

        assert_eq!(
            storage.get_account(&AccountId::new("A")).unwrap().balance,
            Decimal::from(100)
        );
        assert_eq!(metrics.units_committed.get(), 1);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_debits_never_overdraw() {
        let (storage, _temp) = open();
        let handle = spawn_ledger_actor(storage.clone(), 64, Metrics::new().unwrap());
        handle
            .commit(
                UnitOfWork::new()
                    .open_account(account("A", 100))
                    .open_account(account("B", 0)),
            )
            .await
            .unwrap();

        let mut tasks = Vec::new();
        for _ in 0..20 {
            let handle = handle.clone();
            tasks.push(tokio::spawn(async move {
                handle
                    .commit(
                        UnitOfWork::new()
                            .debit(AccountId::new("A"), Decimal::from(10))
                            .credit(AccountId::new("B"), Decimal::from(10)),
                    )
                    .await
                    .is_ok()
            }));
        }

        let mut succeeded = 0;
        for task in tasks {
            if task.await.unwrap() {
                succeeded += 1;
            }
        }

        assert_eq!(succeeded, 10);
        assert_eq!(storage.get_account(&AccountId::new("A")).unwrap().balance, Decimal::ZERO);
        assert_eq!(
            storage.get_account(&AccountId::new("B")).unwrap().balance,
            Decimal::from(100)
        );
    }

    #[tokio::test]
    async fn test_closed_mailbox_is_concurrency_error() {
        let (storage, _temp) = open();
        let handle = spawn_ledger_actor(storage, 4, Metrics::new().unwrap());
        handle.shutdown().await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let err = handle
            .commit(UnitOfWork::new().open_account(account("A", 1)))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Concurrency(_)));
    }
}
