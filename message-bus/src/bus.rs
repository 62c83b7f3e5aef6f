//! Broker abstraction and the in-process broker

use crate::{metrics::BUS_JOURNAL_DEPTH, Error, Message, Result, Topic};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::mpsc;
use tracing::debug;

/// Broker a publisher hands messages to
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish one message; `Ok` means the broker accepted it
    async fn publish(&self, message: &Message) -> Result<()>;
}

/// In-process broker
///
/// Every subscriber of a topic gets its own copy of each message
/// (fan-out). Accepted messages are also kept in a bounded journal so
/// operators and tests can inspect what went over the wire.
#[derive(Debug)]
pub struct InMemoryBus {
    subscribers: DashMap<Topic, Vec<mpsc::UnboundedSender<Message>>>,
    journal: Mutex<VecDeque<Message>>,
    journal_capacity: usize,
    injected_failures: AtomicU32,
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBus {
    /// Default number of messages kept in the journal
    pub const DEFAULT_JOURNAL_CAPACITY: usize = 10_000;

    /// Create bus
    pub fn new() -> Self {
        Self::with_journal_capacity(Self::DEFAULT_JOURNAL_CAPACITY)
    }

    /// Create bus with a journal bound
    pub fn with_journal_capacity(journal_capacity: usize) -> Self {
        Self {
            subscribers: DashMap::new(),
            journal: Mutex::new(VecDeque::new()),
            journal_capacity,
            injected_failures: AtomicU32::new(0),
        }
    }

    /// Register a subscriber; it receives messages published from now on
    pub fn subscribe(&self, topic: Topic) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.entry(topic).or_default().push(tx);
        debug!(topic = %topic, "Subscriber registered");
        rx
    }

    /// Messages accepted on a topic, oldest first
    pub fn published(&self, topic: Topic) -> Vec<Message> {
        self.journal
            .lock()
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }

    /// Make the next `count` publishes fail as if the broker were down
    pub fn fail_next(&self, count: u32) {
        self.injected_failures.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish(&self, message: &Message) -> Result<()> {
        if self
            .injected_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(Error::Publish(format!(
                "broker unavailable for {}",
                message.topic
            )));
        }

        {
            let mut journal = self.journal.lock();
            journal.push_back(message.clone());
            while journal.len() > self.journal_capacity {
                journal.pop_front();
            }
            BUS_JOURNAL_DEPTH.set(journal.len() as i64);
        }

        let delivered = match self.subscribers.get_mut(&message.topic) {
            Some(mut senders) => {
                senders.retain(|tx| tx.send(message.clone()).is_ok());
                senders.len()
            }
            None => 0,
        };

        debug!(
            message_id = %message.id,
            topic = %message.topic,
            delivered,
            "Message accepted"
        );
        Ok(())
    }
}
