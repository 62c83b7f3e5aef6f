//! External bank gateway
//!
//! Receives initiation events, simulates the partner bank's processing and
//! reports the outcome back on the callback topic. Shares no storage with
//! the originating bank; the bus is the only channel.

use crate::{
    outcome::{Outcome, OutcomeSource},
    storage::TransferStore,
    types::{ExternalTransfer, TransferStatus},
    Config, Error, Result,
};
use chrono::{DateTime, Duration, Utc};
use message_bus::events::{
    ExternalTransferCompletedEvent, ExternalTransferInitiatedEvent, ExternalTransferStatus,
};
use message_bus::{Publisher, Topic};
use rand::Rng;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Result of an initiation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Initiation {
    /// New transfer recorded
    Created(Uuid),
    /// Transfer already known for this originating transaction
    Duplicate(Uuid),
}

impl Initiation {
    /// External transaction ID
    pub fn external_id(&self) -> Uuid {
        match self {
            Initiation::Created(id) | Initiation::Duplicate(id) => *id,
        }
    }
}

/// One processing pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessReport {
    /// Transfers that reached COMPLETED or FAILED
    pub decided: usize,
    /// Callbacks accepted by the bus
    pub callbacks_sent: usize,
    /// Callbacks that will be retried next pass
    pub callbacks_failed: usize,
}

/// External bank gateway
pub struct ExternalBankGateway {
    store: TransferStore,
    publisher: Publisher,
    outcomes: Arc<dyn OutcomeSource>,
    config: Config,
}

impl std::fmt::Debug for ExternalBankGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalBankGateway")
            .field("store", &self.store)
            .field("outcomes", &self.outcomes)
            .field("config", &self.config)
            .finish()
    }
}

impl ExternalBankGateway {
    /// Open the gateway over its store in `config.data_dir`
    pub fn open(
        config: Config,
        publisher: Publisher,
        outcomes: Arc<dyn OutcomeSource>,
    ) -> Result<Self> {
        config.validate()?;
        let store = TransferStore::open(&config.data_dir)?;
        Ok(Self {
            store,
            publisher,
            outcomes,
            config,
        })
    }

    /// Record an initiation; a repeated originating transaction is a no-op
    pub fn initiate(&self, event: &ExternalTransferInitiatedEvent) -> Result<Initiation> {
        Self::validate(event)?;

        let now = Utc::now();
        let transfer = ExternalTransfer::from_initiation(event, now, now + self.processing_time());

        match self.store.insert_unique(&transfer)? {
            Some(existing) => {
                warn!(
                    fortress_tx = %event.transaction_id,
                    external_tx = %existing,
                    "Transfer already exists, discarding duplicate initiation"
                );
                Ok(Initiation::Duplicate(existing))
            }
            None => {
                info!(
                    fortress_tx = %event.transaction_id,
                    external_tx = %transfer.id,
                    amount = %event.amount,
                    bank = %event.destination_bank_code,
                    "External transfer received"
                );
                Ok(Initiation::Created(transfer.id))
            }
        }
    }

    /// Advance every open transfer and deliver outstanding callbacks
    pub async fn process_pending(&self, now: DateTime<Utc>) -> Result<ProcessReport> {
        let mut report = ProcessReport::default();

        for mut transfer in self.store.open_transfers()? {
            if !self.advance(&mut transfer, now, &mut report)? {
                continue;
            }

            match self.send_callback(&transfer).await {
                Ok(()) => {
                    transfer.callback_sent_at = Some(Utc::now());
                    self.store.update(&transfer)?;
                    report.callbacks_sent += 1;
                }
                Err(e) => {
                    error!(
                        fortress_tx = %transfer.fortress_bank_transaction_id,
                        error = %e,
                        "Failed to send callback, will retry"
                    );
                    report.callbacks_failed += 1;
                }
            }
        }

        Ok(report)
    }

    /// Look up a transfer by its external ID
    pub fn query(&self, external_id: Uuid) -> Result<ExternalTransfer> {
        self.store
            .get(external_id)?
            .ok_or_else(|| Error::NotFound(external_id.to_string()))
    }

    /// Look up a transfer by the originating transaction
    pub fn find_by_origin(&self, fortress_tx: Uuid) -> Result<Option<ExternalTransfer>> {
        match self.store.id_for_origin(fortress_tx)? {
            Some(id) => self.store.get(id),
            None => Ok(None),
        }
    }

    /// Number of transfers recorded
    pub fn count(&self) -> Result<usize> {
        self.store.count()
    }

    /// Configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Process on a fixed interval until shutdown is signalled
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker =
            tokio::time::interval(std::time::Duration::from_millis(self.config.poll_interval_ms));
        info!(poll_ms = self.config.poll_interval_ms, "External gateway processor started");

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.process_pending(Utc::now()).await {
                        error!(error = %e, "External transfer processing failed");
                    }
                }
            }
        }

        info!("External gateway processor stopped");
    }

    /// Move one transfer forward and persist it; true when a callback is due
    fn advance(
        &self,
        transfer: &mut ExternalTransfer,
        now: DateTime<Utc>,
        report: &mut ProcessReport,
    ) -> Result<bool> {
        let id = transfer.id;
        let mut changed = false;

        if transfer.status == TransferStatus::Pending {
            transfer.status = TransferStatus::Processing;
            transfer.message = "Transfer is being processed by external bank".to_string();
            changed = true;
            info!(external_tx = %id, "External transfer now PROCESSING");
        }

        if transfer.status == TransferStatus::Processing && now >= transfer.ready_at {
            match self.outcomes.decide(transfer) {
                Outcome::Completed => {
                    transfer.status = TransferStatus::Completed;
                    transfer.message = "Transfer completed successfully".to_string();
                    info!(external_tx = %id, amount = %transfer.amount, "External transfer COMPLETED");
                }
                Outcome::Failed(reason) => {
                    transfer.status = TransferStatus::Failed;
                    transfer.message = format!("Transfer failed: {}", reason);
                    warn!(external_tx = %id, reason = %reason, "External transfer FAILED");
                }
            }
            transfer.processed_at = Some(now);
            changed = true;
            report.decided += 1;
        }

        if changed {
            self.store.update(transfer)?;
        }
        Ok(transfer.awaiting_callback())
    }

    async fn send_callback(&self, transfer: &ExternalTransfer) -> Result<()> {
        let status = match transfer.status {
            TransferStatus::Completed => ExternalTransferStatus::Completed,
            _ => ExternalTransferStatus::Failed,
        };

        let event = ExternalTransferCompletedEvent {
            external_transaction_id: transfer.id,
            fortress_bank_transaction_id: transfer.fortress_bank_transaction_id,
            status,
            amount: transfer.amount,
            source_account_number: transfer.source_account_number.clone(),
            destination_account_number: transfer.destination_account_number.clone(),
            destination_bank_code: transfer.destination_bank_code.clone(),
            message: transfer.message.clone(),
            timestamp: Utc::now(),
        };

        self.publisher
            .publish_event(
                Topic::ExternalTransferCallback,
                &transfer.fortress_bank_transaction_id.to_string(),
                &event,
            )
            .await?;

        info!(
            fortress_tx = %transfer.fortress_bank_transaction_id,
            status = ?status,
            "Callback sent"
        );
        Ok(())
    }

    fn processing_time(&self) -> Duration {
        let secs = rand::thread_rng()
            .gen_range(self.config.min_processing_secs..=self.config.max_processing_secs);
        Duration::seconds(secs as i64)
    }

    fn validate(event: &ExternalTransferInitiatedEvent) -> Result<()> {
        if event.amount <= Decimal::ZERO {
            return Err(Error::Validation(format!(
                "non-positive amount {} for {}",
                event.amount, event.transaction_id
            )));
        }
        if event.destination_account_number.trim().is_empty() {
            return Err(Error::Validation(format!(
                "missing destination account for {}",
                event.transaction_id
            )));
        }
        if event.destination_bank_code.trim().is_empty() {
            return Err(Error::Validation(format!(
                "missing destination bank code for {}",
                event.transaction_id
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::FixedOutcome;
    use message_bus::{InMemoryBus, PublisherConfig};
    use tempfile::TempDir;

    fn instant_config(dir: &TempDir) -> Config {
        Config {
            data_dir: dir.path().to_path_buf(),
            min_processing_secs: 0,
            max_processing_secs: 0,
            ..Config::default()
        }
    }

    fn open_gateway(dir: &TempDir, outcome: Outcome) -> (ExternalBankGateway, Arc<InMemoryBus>) {
        let bus = Arc::new(InMemoryBus::new());
        let publisher = Publisher::new(
            bus.clone(),
            PublisherConfig {
                max_retry_attempts: 1,
                ..PublisherConfig::default()
            },
        );
        let gateway =
            ExternalBankGateway::open(instant_config(dir), publisher, Arc::new(FixedOutcome(outcome)))
                .unwrap();
        (gateway, bus)
    }

    fn gateway(outcome: Outcome) -> (ExternalBankGateway, Arc<InMemoryBus>, TempDir) {
        let dir = TempDir::new().unwrap();
        let (gateway, bus) = open_gateway(&dir, outcome);
        (gateway, bus, dir)
    }

    fn initiation(amount: i64) -> ExternalTransferInitiatedEvent {
        ExternalTransferInitiatedEvent {
            transaction_id: Uuid::now_v7(),
            source_account_number: "ACC-1".into(),
            source_bank_code: "FTB".into(),
            destination_account_number: "0451000123".into(),
            destination_bank_code: "VCB".into(),
            amount: Decimal::from(amount),
            currency: "VND".into(),
            description: Some("rent".into()),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_duplicate_initiation_creates_one_transfer() {
        let (gateway, _bus, _dir) = gateway(Outcome::Completed);
        let event = initiation(500);

        let first = gateway.initiate(&event).unwrap();
        let second = gateway.initiate(&event).unwrap();

        assert!(matches!(first, Initiation::Created(_)));
        assert_eq!(second, Initiation::Duplicate(first.external_id()));
        assert_eq!(gateway.count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_invalid_initiation_rejected() {
        let (gateway, _bus, _dir) = gateway(Outcome::Completed);
        let mut event = initiation(0);
        assert!(matches!(gateway.initiate(&event), Err(Error::Validation(_))));

        event.amount = Decimal::from(10);
        event.destination_bank_code = " ".into();
        assert!(matches!(gateway.initiate(&event), Err(Error::Validation(_))));
        assert_eq!(gateway.count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_completed_callback_published_once() {
        let (gateway, bus, _dir) = gateway(Outcome::Completed);
        let event = initiation(500);
        let id = gateway.initiate(&event).unwrap().external_id();

        let report = gateway.process_pending(Utc::now()).await.unwrap();
        assert_eq!(report.decided, 1);
        assert_eq!(report.callbacks_sent, 1);

        let again = gateway.process_pending(Utc::now()).await.unwrap();
        assert_eq!(again, ProcessReport::default());

        let callbacks = bus.published(Topic::ExternalTransferCallback);
        assert_eq!(callbacks.len(), 1);
        let callback: ExternalTransferCompletedEvent = callbacks[0].decode().unwrap();
        assert_eq!(callback.fortress_bank_transaction_id, event.transaction_id);
        assert_eq!(callback.external_transaction_id, id);
        assert_eq!(callback.status, ExternalTransferStatus::Completed);

        let transfer = gateway.query(id).unwrap();
        assert_eq!(transfer.status, TransferStatus::Completed);
        assert!(transfer.processed_at.is_some());
    }

    #[tokio::test]
    async fn test_failed_outcome_carries_reason() {
        let (gateway, bus, _dir) = gateway(Outcome::Failed("Destination account closed".into()));
        gateway.initiate(&initiation(500)).unwrap();
        gateway.process_pending(Utc::now()).await.unwrap();

        let callback: ExternalTransferCompletedEvent =
            bus.published(Topic::ExternalTransferCallback)[0].decode().unwrap();
        assert_eq!(callback.status, ExternalTransferStatus::Failed);
        assert_eq!(callback.message, "Transfer failed: Destination account closed");
    }

    #[tokio::test]
    async fn test_not_ready_stays_processing() {
        let (gateway, bus, _dir) = gateway(Outcome::Completed);
        let id = gateway.initiate(&initiation(500)).unwrap().external_id();

        let earlier = Utc::now() - Duration::seconds(60);
        let report = gateway.process_pending(earlier).await.unwrap();

        assert_eq!(report.decided, 0);
        assert_eq!(gateway.query(id).unwrap().status, TransferStatus::Processing);
        assert!(bus.published(Topic::ExternalTransferCallback).is_empty());
    }

    #[tokio::test]
    async fn test_callback_retried_after_bus_failure() {
        let (gateway, bus, _dir) = gateway(Outcome::Completed);
        let id = gateway.initiate(&initiation(500)).unwrap().external_id();

        bus.fail_next(1);
        let report = gateway.process_pending(Utc::now()).await.unwrap();
        assert_eq!(report.callbacks_failed, 1);
        assert!(gateway.query(id).unwrap().awaiting_callback());

        let report = gateway.process_pending(Utc::now()).await.unwrap();
        assert_eq!(report.decided, 0);
        assert_eq!(report.callbacks_sent, 1);
        assert_eq!(bus.published(Topic::ExternalTransferCallback).len(), 1);
    }

    #[tokio::test]
    async fn test_query_unknown() {
        let (gateway, _bus, _dir) = gateway(Outcome::Completed);
        assert!(matches!(gateway.query(Uuid::new_v4()), Err(Error::NotFound(_))));
        assert!(gateway.find_by_origin(Uuid::new_v4()).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_redelivery_after_restart_is_noop() {
        let dir = TempDir::new().unwrap();
        let event = initiation(500);
        let first = {
            let (gateway, _bus) = open_gateway(&dir, Outcome::Completed);
            gateway.initiate(&event).unwrap().external_id()
        };

        let (gateway, _bus) = open_gateway(&dir, Outcome::Completed);
        assert_eq!(gateway.initiate(&event).unwrap(), Initiation::Duplicate(first));
        assert_eq!(gateway.count().unwrap(), 1);
        assert_eq!(gateway.find_by_origin(event.transaction_id).unwrap().unwrap().id, first);
    }

    #[tokio::test]
    async fn test_unsent_callback_survives_restart() {
        let dir = TempDir::new().unwrap();
        let event = initiation(500);
        let id = {
            let (gateway, bus) = open_gateway(&dir, Outcome::Completed);
            let id = gateway.initiate(&event).unwrap().external_id();
            bus.fail_next(1);
            let report = gateway.process_pending(Utc::now()).await.unwrap();
            assert_eq!(report.callbacks_failed, 1);
            id
        };

        let (gateway, bus) = open_gateway(&dir, Outcome::Completed);
        let report = gateway.process_pending(Utc::now()).await.unwrap();
        assert_eq!(report.decided, 0);
        assert_eq!(report.callbacks_sent, 1);

        let callback: ExternalTransferCompletedEvent =
            bus.published(Topic::ExternalTransferCallback)[0].decode().unwrap();
        assert_eq!(callback.external_transaction_id, id);
        assert!(!gateway.query(id).unwrap().awaiting_callback());
    }
}
