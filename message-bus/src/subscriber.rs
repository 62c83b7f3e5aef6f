//! Message subscriber with redelivery and dead-letter routing

use crate::{
    dlq_router::DlqRouter,
    message::Message,
    metrics::{MESSAGE_PROCESS_DURATION, MESSAGE_RECEIVE_TOTAL},
    Result, Topic,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

/// Message handler trait
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle incoming message
    ///
    /// Return a poison error (see [`crate::Error::is_poison`]) for messages
    /// that can never succeed; anything else is redelivered.
    async fn handle(&self, message: Message) -> Result<()>;
}

/// Subscriber configuration
#[derive(Debug, Clone)]
pub struct SubscriberConfig {
    /// Max delivery attempts before dead-lettering
    pub max_deliver: u32,

    /// Delay before the first redelivery
    pub retry_delay: Duration,

    /// Max redelivery delay
    pub max_retry_delay: Duration,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            max_deliver: 3,
            retry_delay: Duration::from_millis(100),
            max_retry_delay: Duration::from_secs(2),
        }
    }
}

/// What happened to a delivered message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Handler succeeded
    Acked {
        /// Deliveries it took
        attempts: u32,
    },
    /// Routed to the DLQ
    DeadLettered {
        /// DLQ entry id
        entry_id: String,
    },
}

/// Message subscriber
#[derive(Debug)]
pub struct Subscriber {
    topic: Topic,
    config: SubscriberConfig,
    dlq: Arc<DlqRouter>,
}

impl Subscriber {
    /// Create new subscriber
    pub fn new(topic: Topic, config: SubscriberConfig, dlq: Arc<DlqRouter>) -> Self {
        Self { topic, config, dlq }
    }

    /// Topic this subscriber consumes
    pub fn topic(&self) -> Topic {
        self.topic
    }

    /// Deliver one message to the handler until it acks, turns out to be
    /// poison, or runs out of deliveries
    pub async fn process(&self, handler: &dyn MessageHandler, message: Message) -> Disposition {
        let start = Instant::now();
        let mut attempts = 0;
        let mut delay = self.config.retry_delay;

        MESSAGE_RECEIVE_TOTAL
            .with_label_values(&[self.topic.subject(), "received"])
            .inc();

        loop {
            attempts += 1;

            match handler.handle(message.clone()).await {
                Ok(()) => {
                    MESSAGE_PROCESS_DURATION
                        .with_label_values(&[self.topic.subject()])
                        .observe(start.elapsed().as_secs_f64());
                    return Disposition::Acked { attempts };
                }
                Err(e) if e.is_poison() => {
                    error!(message_id = %message.id, topic = %self.topic, error = %e, "Poison message");
                    MESSAGE_RECEIVE_TOTAL
                        .with_label_values(&[self.topic.subject(), "poison"])
                        .inc();
                    let entry_id = self.dlq.route_to_dlq(message, e.to_string(), attempts);
                    return Disposition::DeadLettered { entry_id };
                }
                Err(e) => {
                    if attempts >= self.config.max_deliver {
                        error!(
                            message_id = %message.id,
                            topic = %self.topic,
                            attempts,
                            error = %e,
                            "Delivery attempts exhausted"
                        );
                        MESSAGE_RECEIVE_TOTAL
                            .with_label_values(&[self.topic.subject(), "exhausted"])
                            .inc();
                        let entry_id = self.dlq.route_to_dlq(message, e.to_string(), attempts);
                        return Disposition::DeadLettered { entry_id };
                    }

                    warn!(
                        message_id = %message.id,
                        attempt = attempts,
                        retry_in = ?delay,
                        error = %e,
                        "Handler failed, redelivering"
                    );
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(self.config.max_retry_delay);
                }
            }
        }
    }

    /// Consume until the channel closes or shutdown is signalled
    pub async fn run<H>(
        self,
        mut receiver: mpsc::UnboundedReceiver<Message>,
        handler: Arc<H>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()>
    where
        H: MessageHandler + 'static,
    {
        info!(topic = %self.topic, max_deliver = self.config.max_deliver, "Subscriber started");

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                next = receiver.recv() => match next {
                    Some(message) => {
                        self.process(handler.as_ref(), message).await;
                    }
                    None => break,
                },
            }
        }

        info!(topic = %self.topic, "Subscriber stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Error, InMemoryBus, MessageBus};
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyHandler {
        calls: AtomicU32,
        failures: u32,
        poison: bool,
    }

    impl FlakyHandler {
        fn new(failures: u32, poison: bool) -> Self {
            Self {
                calls: AtomicU32::new(0),
                failures,
                poison,
            }
        }
    }

    #[async_trait]
    impl MessageHandler for FlakyHandler {
        async fn handle(&self, _message: Message) -> Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.poison {
                return Err(Error::Poison("malformed".into()));
            }
            if call <= self.failures {
                return Err(Error::Handler("ledger unavailable".into()));
            }
            Ok(())
        }
    }

    fn subscriber(dlq: Arc<DlqRouter>) -> Subscriber {
        Subscriber::new(
            Topic::ExternalTransferCallback,
            SubscriberConfig {
                max_deliver: 3,
                retry_delay: Duration::from_millis(1),
                max_retry_delay: Duration::from_millis(2),
            },
            dlq,
        )
    }

    #[tokio::test]
    async fn test_subscriber_config_default() {
        let config = SubscriberConfig::default();
        assert_eq!(config.max_deliver, 3);
    }

    #[tokio::test]
    async fn test_redelivery_then_ack() {
        let dlq = Arc::new(DlqRouter::new());
        let handler = FlakyHandler::new(2, false);

        let disposition = subscriber(dlq.clone())
            .process(&handler, Message::new(Topic::ExternalTransferCallback, json!({})))
            .await;

        assert_eq!(disposition, Disposition::Acked { attempts: 3 });
        assert!(dlq.list_entries(None, false, 10).is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_goes_to_dlq() {
        let dlq = Arc::new(DlqRouter::new());
        let handler = FlakyHandler::new(10, false);

        let disposition = subscriber(dlq.clone())
            .process(&handler, Message::new(Topic::ExternalTransferCallback, json!({})))
            .await;

        assert!(matches!(disposition, Disposition::DeadLettered { .. }));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
        let entries = dlq.list_entries(None, true, 10);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].retry_count, 3);
    }

    #[tokio::test]
    async fn test_poison_skips_redelivery() {
        let dlq = Arc::new(DlqRouter::new());
        let handler = FlakyHandler::new(0, true);

        let disposition = subscriber(dlq.clone())
            .process(&handler, Message::new(Topic::ExternalTransferCallback, json!({})))
            .await;

        assert!(matches!(disposition, Disposition::DeadLettered { .. }));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert!(!dlq.list_entries(None, false, 10)[0].reprocessable);
    }

    #[tokio::test]
    async fn test_run_consumes_until_shutdown() {
        let bus = InMemoryBus::new();
        let receiver = bus.subscribe(Topic::ExternalTransferCallback);
        let handler = Arc::new(FlakyHandler::new(0, false));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(
            subscriber(Arc::new(DlqRouter::new())).run(receiver, handler.clone(), shutdown_rx),
        );

        for _ in 0..3 {
            bus.publish(&Message::new(Topic::ExternalTransferCallback, json!({})))
                .await
                .unwrap();
        }
        while handler.calls.load(Ordering::SeqCst) < 3 {
            tokio::task::yield_now().await;
        }

        shutdown_tx.send(true).unwrap();
        task.await.unwrap().unwrap();
    }
}
