//! Outbox relay
//!
//! Moves PENDING outbox rows from the ledger onto the bus. Rows are read in
//! commit order; once a row of an aggregate cannot be published in a pass,
//! every later row of that aggregate is held back so per-aggregate order
//! survives retries. An aggregate with a FAILED row stays blocked until an
//! operator requeues it.

use crate::clock::Clock;
use crate::config::OutboxConfig;
use crate::Result;
use chrono::{DateTime, Duration, Utc};
use ledger_core::{Ledger, OutboxEvent, OutboxStatus};
use message_bus::{Message, Publisher, Topic};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// What one relay pass did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayReport {
    /// Rows acknowledged by the bus
    pub published: usize,
    /// Rows whose publish failed and will be retried
    pub failed: usize,
    /// Rows that hit the retry ceiling and are now FAILED
    pub dead: usize,
    /// Rows skipped for backoff or aggregate ordering
    pub deferred: usize,
}

/// Outbox relay
#[derive(Debug, Clone)]
pub struct OutboxRelay {
    ledger: Arc<Ledger>,
    publisher: Publisher,
    config: OutboxConfig,
    clock: Arc<dyn Clock>,
}

impl OutboxRelay {
    /// Create relay
    pub fn new(
        ledger: Arc<Ledger>,
        publisher: Publisher,
        config: OutboxConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ledger,
            publisher,
            config,
            clock,
        }
    }

    /// One pass over the PENDING rows
    pub async fn run_once(&self) -> Result<RelayReport> {
        let mut report = RelayReport::default();
        let now = self.clock.now();

        let mut blocked: HashSet<String> = self
            .ledger
            .failed_outbox()?
            .into_iter()
            .map(|event| event.aggregate_id)
            .collect();

        // Deferred rows do not count against the batch, so the scan pages
        // past them until `batch_size` rows were attempted or none are left
        let mut cursor = 0;
        let mut attempted = 0;
        'scan: loop {
            let page = self
                .ledger
                .pending_outbox_after(cursor, self.config.batch_size.max(1))?;
            let Some(last) = page.last() else {
                break;
            };
            let exhausted = page.len() < self.config.batch_size.max(1);
            cursor = last.sequence;

            for event in page {
                if blocked.contains(&event.aggregate_id) || event.next_attempt_at > now {
                    blocked.insert(event.aggregate_id.clone());
                    report.deferred += 1;
                    continue;
                }
                if attempted >= self.config.batch_size {
                    break 'scan;
                }
                attempted += 1;
                self.relay_event(event, now, &mut blocked, &mut report).await?;
            }

            if exhausted {
                break;
            }
        }

        if report.published > 0 || report.failed > 0 || report.dead > 0 {
            info!(
                published = report.published,
                failed = report.failed,
                dead = report.dead,
                deferred = report.deferred,
                "Outbox relay pass"
            );
        }
        Ok(report)
    }

    async fn relay_event(
        &self,
        event: OutboxEvent,
        now: DateTime<Utc>,
        blocked: &mut HashSet<String>,
        report: &mut RelayReport,
    ) -> Result<()> {
        let message = match to_message(&event) {
            Ok(message) => message,
            Err(reason) => {
                // Unroutable rows can never succeed
                self.fail(&event, reason, now, report, 1).await?;
                blocked.insert(event.aggregate_id);
                return Ok(());
            }
        };

        match self.publisher.publish_once(&message).await {
            Ok(()) => {
                self.ledger.mark_published(event.id, self.clock.now()).await?;
                debug!(
                    event_id = %event.id,
                    sequence = event.sequence,
                    topic = %event.topic,
                    "Outbox event published"
                );
                report.published += 1;
            }
            Err(e) => {
                self.fail(&event, e.to_string(), now, report, self.config.max_attempts)
                    .await?;
                blocked.insert(event.aggregate_id);
            }
        }
        Ok(())
    }

    async fn fail(
        &self,
        event: &OutboxEvent,
        reason: String,
        now: DateTime<Utc>,
        report: &mut RelayReport,
        max_attempts: u32,
    ) -> Result<()> {
        let next_attempt_at = now + backoff_delay(&self.config, event.attempts + 1);
        let updated = self
            .ledger
            .record_publish_failure(event.id, reason.clone(), next_attempt_at, max_attempts)
            .await?;

        if updated.status == OutboxStatus::Failed {
            error!(
                event_id = %event.id,
                aggregate_id = %event.aggregate_id,
                event_type = %event.event_type,
                attempts = updated.attempts,
                error = %reason,
                "Outbox event FAILED, operator action required"
            );
            report.dead += 1;
        } else {
            warn!(
                event_id = %event.id,
                attempts = updated.attempts,
                retry_at = %next_attempt_at,
                error = %reason,
                "Outbox publish failed, will retry"
            );
            report.failed += 1;
        }
        Ok(())
    }

    /// FAILED rows awaiting an operator
    pub fn failed_events(&self) -> Result<Vec<OutboxEvent>> {
        Ok(self.ledger.failed_outbox()?)
    }

    /// Put a FAILED row back to PENDING
    pub async fn requeue(&self, id: Uuid) -> Result<OutboxEvent> {
        let event = self.ledger.requeue_outbox(id, self.clock.now()).await?;
        info!(event_id = %id, aggregate_id = %event.aggregate_id, "Outbox event requeued");
        Ok(event)
    }

    /// Poll until shutdown
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_millis(self.config.poll_interval_ms));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(
            poll_interval_ms = self.config.poll_interval_ms,
            batch_size = self.config.batch_size,
            "Outbox relay started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.run_once().await {
                        error!(error = %e, "Outbox relay pass failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("Outbox relay stopping");
                    break;
                }
            }
        }
    }
}

/// Delay after the `attempts`-th failure: base * 2^(attempts-1), capped
fn backoff_delay(config: &OutboxConfig, attempts: u32) -> Duration {
    let exponent = attempts.saturating_sub(1).min(20);
    let millis = config
        .backoff_base_ms
        .saturating_mul(1u64 << exponent)
        .min(config.backoff_max_ms);
    Duration::milliseconds(millis as i64)
}

/// Bus message for an outbox row; the row id becomes the message id
fn to_message(event: &OutboxEvent) -> std::result::Result<Message, String> {
    let topic: Topic = event
        .topic
        .parse()
        .map_err(|e: message_bus::Error| e.to_string())?;
    let payload = event
        .payload_json()
        .map_err(|e| format!("undecodable payload: {}", e))?;

    Ok(Message::new(topic, payload)
        .with_id(event.id)
        .with_key(event.aggregate_id.clone())
        .with_correlation_id(event.aggregate_id.clone())
        .with_header("event_type", event.event_type.clone())
        .with_header("aggregate_type", event.aggregate_type.clone()))
}
