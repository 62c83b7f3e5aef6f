//! Best-effort audit trail
//!
//! Audit events go straight to the bus with a single attempt. The result is
//! returned so the caller decides how to log it; callers never fail the
//! primary operation on an audit error.

use chrono::{DateTime, Utc};
use message_bus::events::{AuditEvent, AuditResult};
use message_bus::{Message, Publisher, Topic};

/// Audit publisher
#[derive(Debug, Clone)]
pub struct AuditPublisher {
    publisher: Publisher,
    service_name: String,
}

impl AuditPublisher {
    /// Create audit publisher
    pub fn new(publisher: Publisher, service_name: impl Into<String>) -> Self {
        Self {
            publisher,
            service_name: service_name.into(),
        }
    }

    /// Publish one audit record
    #[allow(clippy::too_many_arguments)]
    pub async fn record(
        &self,
        entity_type: &str,
        entity_id: &str,
        action: &str,
        user_id: Option<&str>,
        result: AuditResult,
        details: Option<String>,
        at: DateTime<Utc>,
    ) -> message_bus::Result<()> {
        let event = AuditEvent {
            service_name: self.service_name.clone(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            action: action.to_string(),
            user_id: user_id.map(str::to_string),
            result,
            details,
            timestamp: at,
        };
        let message = Message::from_event(Topic::AuditLog, &event)?.with_key(entity_id);
        self.publisher.publish_once(&message).await
    }
}
