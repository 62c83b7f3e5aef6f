//! Dead Letter Queue router
//!
//! Routes failed messages to DLQ with:
//! - Failure reason tracking
//! - Retry attempt counting
//! - Automatic expiration
//! - Manual reprocessing API

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{metrics::MESSAGE_DEAD_LETTER_TOTAL, Error, Message, Publisher, Result, Topic};

/// Failure reasons that may succeed on a later attempt
const TRANSIENT_ERRORS: [&str; 6] = [
    "timeout",
    "connection_refused",
    "service_unavailable",
    "unavailable",
    "rate_limit",
    "temporary",
];

/// DLQ entry with failure metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqEntry {
    pub id: String,
    pub original_message: Message,
    pub failure_reason: String,
    pub retry_count: u32,
    pub first_failure_at: DateTime<Utc>,
    pub last_failure_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub reprocessable: bool,
}

/// DLQ Router
#[derive(Debug)]
pub struct DlqRouter {
    entries: DashMap<String, DlqEntry>,
    max_retention_days: i64,
}

impl Default for DlqRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl DlqRouter {
    /// Create new DLQ router
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            max_retention_days: 30,
        }
    }

    /// Route message to DLQ
    ///
    /// A message that was dead-lettered before (and reprocessed) updates
    /// its existing entry instead of creating a second one.
    pub fn route_to_dlq(&self, message: Message, failure_reason: String, retry_count: u32) -> String {
        let now = Utc::now();
        let reprocessable = Self::is_reprocessable(&failure_reason);

        MESSAGE_DEAD_LETTER_TOTAL
            .with_label_values(&[
                message.topic.subject(),
                if reprocessable { "transient" } else { "permanent" },
            ])
            .inc();

        let existing = self
            .entries
            .iter()
            .find(|e| e.original_message.id == message.id)
            .map(|e| e.id.clone());

        let entry_id = existing.unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut entry = self.entries.entry(entry_id.clone()).or_insert_with(|| DlqEntry {
            id: entry_id.clone(),
            original_message: message.clone(),
            failure_reason: failure_reason.clone(),
            retry_count: 0,
            first_failure_at: now,
            last_failure_at: now,
            expires_at: now + Duration::days(self.max_retention_days),
            reprocessable,
        });
        entry.failure_reason = failure_reason.clone();
        entry.retry_count += retry_count;
        entry.last_failure_at = now;
        entry.reprocessable = reprocessable;

        warn!(
            message_id = %message.id,
            subject = %message.topic.dlq_subject(),
            entry_id = %entry_id,
            reason = %failure_reason,
            retry_count = entry.retry_count,
            "Message moved to DLQ"
        );

        entry_id
    }

    /// Check if failure is reprocessable
    pub fn is_reprocessable(reason: &str) -> bool {
        let reason = reason.to_lowercase();
        TRANSIENT_ERRORS.iter().any(|err| reason.contains(err))
    }

    /// Republish a DLQ entry to its original topic and drop it from the DLQ
    pub async fn reprocess(&self, entry_id: &str, publisher: &Publisher) -> Result<Message> {
        info!(entry_id, "Reprocessing DLQ entry");

        let entry = self.get(entry_id)?;

        if !entry.reprocessable {
            return Err(Error::NotReprocessable(format!(
                "Entry {} is not reprocessable: {}",
                entry_id, entry.failure_reason
            )));
        }

        publisher.publish(&entry.original_message).await?;
        self.entries.remove(entry_id);

        info!(entry_id, message_id = %entry.original_message.id, "DLQ entry reprocessed");
        Ok(entry.original_message)
    }

    /// Get DLQ entry by ID
    pub fn get(&self, entry_id: &str) -> Result<DlqEntry> {
        self.entries
            .get(entry_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| Error::NotFound(format!("DLQ entry {} not found", entry_id)))
    }

    /// List DLQ entries with filters, oldest failure first
    pub fn list_entries(
        &self,
        topic: Option<Topic>,
        reprocessable_only: bool,
        limit: usize,
    ) -> Vec<DlqEntry> {
        let mut entries: Vec<DlqEntry> = self
            .entries
            .iter()
            .filter(|e| topic.map_or(true, |t| e.original_message.topic == t))
            .filter(|e| !reprocessable_only || e.reprocessable)
            .map(|e| e.value().clone())
            .collect();
        entries.sort_by_key(|e| e.first_failure_at);
        entries.truncate(limit);
        entries
    }

    /// Drop entries past their retention
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| e.expires_at > now);
        before - self.entries.len()
    }

    /// Get DLQ statistics
    pub fn get_stats(&self, now: DateTime<Utc>) -> DlqStats {
        let mut stats = DlqStats::default();
        for entry in self.entries.iter() {
            stats.total_entries += 1;
            if entry.reprocessable {
                stats.reprocessable += 1;
            }
            if entry.expires_at <= now {
                stats.expired += 1;
            }
            *stats
                .by_reason
                .entry(entry.failure_reason.clone())
                .or_default() += 1;
        }
        stats
    }
}

/// DLQ statistics
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct DlqStats {
    pub total_entries: usize,
    pub reprocessable: usize,
    pub expired: usize,
    pub by_reason: HashMap<String, usize>,
}
