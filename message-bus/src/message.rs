//! Message envelope for pub/sub

use crate::types::Topic;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Message envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Message ID (UUIDv7 for ordering)
    pub id: Uuid,

    /// Destination topic
    pub topic: Topic,

    /// Aggregate the message belongs to (ordering key)
    pub key: Option<String>,

    /// Payload (JSON)
    pub payload: serde_json::Value,

    /// Timestamp
    pub timestamp: DateTime<Utc>,

    /// Correlation ID (for tracing)
    pub correlation_id: Option<String>,

    /// Headers (metadata)
    pub headers: std::collections::HashMap<String, String>,
}

impl Message {
    /// Create new message
    pub fn new(topic: Topic, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::now_v7(),
            topic,
            key: None,
            payload,
            timestamp: Utc::now(),
            correlation_id: None,
            headers: std::collections::HashMap::new(),
        }
    }

    /// Create a message carrying a serialized event
    pub fn from_event<T: Serialize>(topic: Topic, event: &T) -> crate::Result<Self> {
        Ok(Self::new(topic, serde_json::to_value(event)?))
    }

    /// Set the ordering key
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Keep an existing id (outbox rows carry their own)
    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    /// Set correlation ID
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Add header
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Decode the payload into an event type
    pub fn decode<T: DeserializeOwned>(&self) -> crate::Result<T> {
        serde_json::from_value(self.payload.clone())
            .map_err(|e| crate::Error::Deserialization(format!("{} on {}: {}", self.id, self.topic, e)))
    }

    /// Serialize to bytes
    pub fn to_bytes(&self) -> crate::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize from bytes
    pub fn from_bytes(bytes: &[u8]) -> crate::Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| crate::Error::Deserialization(e.to_string()))
    }
}
