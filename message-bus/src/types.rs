//! Type definitions for message bus

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Bus topic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topic {
    /// Inter-bank transfer initiation, consumed by the external gateway
    #[serde(rename = "external.transfer.initiate")]
    ExternalTransferInitiate,
    /// Completion/failure callback from the external gateway
    #[serde(rename = "external.transfer.callback")]
    ExternalTransferCallback,
    /// Best-effort audit trail
    #[serde(rename = "audit.log")]
    AuditLog,
    /// Transaction status notifications (email/SMS/push)
    #[serde(rename = "notification.transaction")]
    NotificationTransaction,
    /// OTP delivery
    #[serde(rename = "notification.otp")]
    NotificationOtp,
}

impl Topic {
    /// Every topic the bus routes
    pub const ALL: [Topic; 5] = [
        Topic::ExternalTransferInitiate,
        Topic::ExternalTransferCallback,
        Topic::AuditLog,
        Topic::NotificationTransaction,
        Topic::NotificationOtp,
    ];

    /// Subject name on the wire
    pub fn subject(&self) -> &'static str {
        match self {
            Topic::ExternalTransferInitiate => "external.transfer.initiate",
            Topic::ExternalTransferCallback => "external.transfer.callback",
            Topic::AuditLog => "audit.log",
            Topic::NotificationTransaction => "notification.transaction",
            Topic::NotificationOtp => "notification.otp",
        }
    }

    /// Dead-letter subject for this topic
    pub fn dlq_subject(&self) -> String {
        format!("dlq.{}", self.subject())
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.subject())
    }
}

impl FromStr for Topic {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Topic::ALL
            .iter()
            .copied()
            .find(|t| t.subject() == s)
            .ok_or_else(|| crate::Error::UnknownTopic(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_round_trip() {
        for topic in Topic::ALL {
            assert_eq!(topic.subject().parse::<Topic>().unwrap(), topic);
        }
        assert!("payments.unknown".parse::<Topic>().is_err());
    }

    #[test]
    fn test_serde_uses_subject() {
        assert_eq!(
            serde_json::to_string(&Topic::AuditLog).unwrap(),
            "\"audit.log\""
        );
        assert_eq!(Topic::NotificationOtp.dlq_subject(), "dlq.notification.otp");
    }
}
