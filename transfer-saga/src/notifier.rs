//! Status notifier
//!
//! Best-effort push of status transitions to clients watching a
//! transaction. No buffering beyond the channel, no replay: a client that
//! reconnects re-reads the transaction through the query API.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use ledger_core::TransactionStatus;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tracing::debug;
use uuid::Uuid;

const CHANNEL_CAPACITY: usize = 16;

/// One status transition
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub transaction_id: Uuid,
    pub status: TransactionStatus,
    pub detail: Option<String>,
    pub at: DateTime<Utc>,
}

/// Per-transaction broadcast channels
#[derive(Debug, Default)]
pub struct StatusNotifier {
    channels: DashMap<Uuid, broadcast::Sender<StatusUpdate>>,
}

impl StatusNotifier {
    /// Create notifier
    pub fn new() -> Self {
        Self::default()
    }

    /// Stream of updates for one transaction
    pub fn subscribe(&self, transaction_id: Uuid) -> impl Stream<Item = StatusUpdate> {
        let receiver = self
            .channels
            .entry(transaction_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe();
        // Lagged receivers drop the missed updates
        BroadcastStream::new(receiver).filter_map(|update| update.ok())
    }

    /// Push an update; returns how many subscribers received it
    pub fn publish(
        &self,
        transaction_id: Uuid,
        status: TransactionStatus,
        detail: Option<String>,
        at: DateTime<Utc>,
    ) -> usize {
        let update = StatusUpdate {
            transaction_id,
            status,
            detail,
            at,
        };

        let delivered = match self.channels.get(&transaction_id) {
            Some(sender) => sender.send(update).unwrap_or(0),
            None => 0,
        };
        self.release(transaction_id, status.is_terminal());

        debug!(transaction_id = %transaction_id, status = %status, delivered, "Status pushed");
        delivered
    }

    /// Drop the channel, ending every stream for the transaction
    pub fn close(&self, transaction_id: Uuid) {
        self.release(transaction_id, true);
    }

    /// Remove the channel when forced or nobody listens; the check runs
    /// under the map's shard lock so a concurrent `subscribe` is never lost
    fn release(&self, transaction_id: Uuid, force: bool) -> bool {
        self.channels
            .remove_if(&transaction_id, |_, sender| {
                force || sender.receiver_count() == 0
            })
            .is_some()
    }

    /// Transactions with an open channel
    pub fn watched(&self) -> usize {
        self.channels.len()
    }
}
