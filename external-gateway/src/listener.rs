//! Consumer of `external.transfer.initiate`

use crate::{gateway::ExternalBankGateway, Error};
use async_trait::async_trait;
use message_bus::events::ExternalTransferInitiatedEvent;
use message_bus::{Message, MessageHandler};
use std::sync::Arc;

/// Feeds initiation events into the gateway
#[derive(Debug, Clone)]
pub struct InitiateListener {
    gateway: Arc<ExternalBankGateway>,
}

impl InitiateListener {
    /// Create listener
    pub fn new(gateway: Arc<ExternalBankGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl MessageHandler for InitiateListener {
    async fn handle(&self, message: Message) -> message_bus::Result<()> {
        let event: ExternalTransferInitiatedEvent = message.decode()?;

        match self.gateway.initiate(&event) {
            Ok(_) => Ok(()),
            Err(Error::Validation(reason)) => Err(message_bus::Error::Poison(reason)),
            Err(e) => Err(message_bus::Error::Handler(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::{FixedOutcome, Outcome};
    use crate::Config;
    use chrono::Utc;
    use message_bus::{
        DlqRouter, Disposition, InMemoryBus, Publisher, PublisherConfig, Subscriber,
        SubscriberConfig, Topic,
    };
    use rust_decimal::Decimal;
    use serde_json::json;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn listener() -> (InitiateListener, Arc<ExternalBankGateway>, TempDir) {
        let dir = TempDir::new().unwrap();
        let publisher = Publisher::new(Arc::new(InMemoryBus::new()), PublisherConfig::default());
        let config = Config {
            data_dir: dir.path().to_path_buf(),
            ..Config::default()
        };
        let gateway = Arc::new(
            ExternalBankGateway::open(config, publisher, Arc::new(FixedOutcome(Outcome::Completed)))
                .unwrap(),
        );
        (InitiateListener::new(gateway.clone()), gateway, dir)
    }

    #[tokio::test]
    async fn test_redelivered_initiation_is_acked_once() {
        let (listener, gateway, _dir) = listener();
        let event = ExternalTransferInitiatedEvent {
            transaction_id: Uuid::now_v7(),
            source_account_number: "ACC-1".into(),
            source_bank_code: "FTB".into(),
            destination_account_number: "0451000123".into(),
            destination_bank_code: "VCB".into(),
            amount: Decimal::from(250),
            currency: "VND".into(),
            description: None,
            timestamp: Utc::now(),
        };
        let message = Message::from_event(Topic::ExternalTransferInitiate, &event).unwrap();

        listener.handle(message.clone()).await.unwrap();
        listener.handle(message).await.unwrap();
        assert_eq!(gateway.count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_malformed_initiation_dead_lettered_immediately() {
        let (listener, gateway, _dir) = listener();
        let dlq = Arc::new(DlqRouter::new());
        let subscriber = Subscriber::new(
            Topic::ExternalTransferInitiate,
            SubscriberConfig::default(),
            dlq.clone(),
        );

        let message = Message::new(Topic::ExternalTransferInitiate, json!({"amount": "oops"}));
        let disposition = subscriber.process(&listener, message).await;

        assert!(matches!(disposition, Disposition::DeadLettered { .. }));
        assert_eq!(dlq.list_entries(None, false, 10)[0].retry_count, 1);
        assert_eq!(gateway.count().unwrap(), 0);
    }
}
