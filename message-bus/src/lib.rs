//! Message Bus
//!
//! Provides pub/sub messaging for the transfer saga with:
//! - Fixed topic routing (`external.transfer.*`, `audit.log`, `notification.*`)
//! - In-process broker with per-topic fan-out
//! - Retry logic with exponential backoff
//! - Redelivery and dead-letter routing for failing consumers
//! - Observability via Prometheus metrics

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod bus;
pub mod dlq_router;
pub mod error;
pub mod events;
pub mod message;
pub mod metrics;
pub mod publisher;
pub mod subscriber;
pub mod types;

pub use bus::{InMemoryBus, MessageBus};
pub use dlq_router::{DlqEntry, DlqRouter, DlqStats};
pub use error::{Error, Result};
pub use message::Message;
pub use publisher::{Publisher, PublisherConfig};
pub use subscriber::{Disposition, MessageHandler, Subscriber, SubscriberConfig};
pub use types::Topic;
