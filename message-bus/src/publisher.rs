//! Message publisher with retry logic

use crate::{
    bus::MessageBus,
    message::Message,
    metrics::{MESSAGE_PUBLISH_DURATION, MESSAGE_PUBLISH_TOTAL},
    Error, Result, Topic,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Publisher configuration
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Publish timeout
    pub publish_timeout: Duration,

    /// Max retry attempts
    pub max_retry_attempts: u32,

    /// Initial retry delay
    pub initial_retry_delay: Duration,

    /// Max retry delay
    pub max_retry_delay: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            publish_timeout: Duration::from_secs(5),
            max_retry_attempts: 3,
            initial_retry_delay: Duration::from_millis(100),
            max_retry_delay: Duration::from_secs(2),
        }
    }
}

/// Message publisher
#[derive(Clone)]
pub struct Publisher {
    bus: Arc<dyn MessageBus>,
    config: PublisherConfig,
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("config", &self.config)
            .finish()
    }
}

impl Publisher {
    /// Create new publisher
    pub fn new(bus: Arc<dyn MessageBus>, config: PublisherConfig) -> Self {
        Self { bus, config }
    }

    /// Publish message, retrying with exponential backoff
    pub async fn publish(&self, message: &Message) -> Result<()> {
        let start = Instant::now();

        info!(message_id = %message.id, topic = %message.topic, "Publishing message");

        let result = self.publish_with_retry(message).await;
        self.record(message.topic, start, result.is_ok());
        result
    }

    /// Serialize an event and publish it
    pub async fn publish_event<T: Serialize>(
        &self,
        topic: Topic,
        key: &str,
        event: &T,
    ) -> Result<Message> {
        let message = Message::from_event(topic, event)?.with_key(key);
        self.publish(&message).await?;
        Ok(message)
    }

    /// Single attempt, no retry; callers that own their own backoff use this
    pub async fn publish_once(&self, message: &Message) -> Result<()> {
        let start = Instant::now();
        let result = self.attempt(message).await;
        self.record(message.topic, start, result.is_ok());
        result
    }

    async fn publish_with_retry(&self, message: &Message) -> Result<()> {
        let mut attempts = 0;
        let mut delay = self.config.initial_retry_delay;

        loop {
            attempts += 1;

            match self.attempt(message).await {
                Ok(()) => {
                    if attempts > 1 {
                        info!(message_id = %message.id, attempts, "Message published after retry");
                    }
                    return Ok(());
                }
                Err(e) => {
                    if attempts >= self.config.max_retry_attempts {
                        error!(
                            message_id = %message.id,
                            attempts,
                            error = %e,
                            "Failed to publish"
                        );
                        return Err(e);
                    }

                    warn!(
                        message_id = %message.id,
                        attempt = attempts,
                        retry_in = ?delay,
                        error = %e,
                        "Publish failed, retrying"
                    );
                    tokio::time::sleep(delay).await;

                    // Exponential backoff
                    delay = (delay * 2).min(self.config.max_retry_delay);
                }
            }
        }
    }

    async fn attempt(&self, message: &Message) -> Result<()> {
        tokio::time::timeout(self.config.publish_timeout, self.bus.publish(message))
            .await
            .map_err(|_| Error::Timeout(self.config.publish_timeout.as_millis() as u64))?
    }

    fn record(&self, topic: Topic, start: Instant, ok: bool) {
        MESSAGE_PUBLISH_DURATION
            .with_label_values(&[topic.subject()])
            .observe(start.elapsed().as_secs_f64());

        let status = if ok { "success" } else { "error" };
        MESSAGE_PUBLISH_TOTAL
            .with_label_values(&[topic.subject(), status])
            .inc();
    }
}
