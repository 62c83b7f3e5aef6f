//! Core types for risk engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Risk score (0-100)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RiskScore(u8);

impl RiskScore {
    /// Score at or above which a transfer is HIGH risk
    pub const HIGH: u8 = 70;

    /// Score at or above which a transfer is MEDIUM risk
    pub const MEDIUM: u8 = 40;

    /// Create new risk score (0-100)
    pub fn new(score: u8) -> Self {
        Self(score.min(100))
    }

    /// Get raw score
    pub fn score(&self) -> u8 {
        self.0
    }
}

/// Risk level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    /// Low risk
    Low,
    /// Medium risk
    Medium,
    /// High risk
    High,
}

impl From<RiskScore> for RiskLevel {
    fn from(score: RiskScore) -> Self {
        if score.score() >= RiskScore::HIGH {
            RiskLevel::High
        } else if score.score() >= RiskScore::MEDIUM {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

/// OTP challenge demanded by a risk level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChallengeType {
    /// No challenge, execute immediately
    None,
    /// Plain SMS passcode
    SmsOtp,
    /// Passcode with transaction and risk context
    SmartOtp,
}

impl From<RiskLevel> for ChallengeType {
    fn from(level: RiskLevel) -> Self {
        match level {
            RiskLevel::High => ChallengeType::SmartOtp,
            RiskLevel::Medium => ChallengeType::SmsOtp,
            RiskLevel::Low => ChallengeType::None,
        }
    }
}

/// Known devices, locations and payees of a user
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskProfile {
    /// Device fingerprints seen before
    pub known_devices: HashSet<String>,
    /// Locations seen before
    pub known_locations: HashSet<String>,
    /// Payees paid before
    pub known_payees: HashSet<String>,
}

impl RiskProfile {
    /// Profile with nothing known
    pub fn empty() -> Self {
        Self::default()
    }

    /// True if the user has paid this payee before
    pub fn knows_payee(&self, payee_id: &str) -> bool {
        self.known_payees.contains(payee_id)
    }
}

/// Risk factor that contributed points
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskFactor {
    /// Human-readable factor
    pub description: String,
    /// Points added to the score
    pub points: u8,
}

/// Risk assessment result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskAssessment {
    /// Risk level
    pub risk_level: RiskLevel,

    /// Risk score
    pub risk_score: RiskScore,

    /// Challenge the client must pass
    pub challenge_type: ChallengeType,

    /// Factors that fired, in rule order
    pub detected_factors: Vec<RiskFactor>,

    /// Highest-scoring factor
    pub primary_reason: Option<String>,

    /// The payee is not in the user's profile
    pub new_recipient: bool,

    /// Scored against an empty profile because the lookup failed
    pub profile_degraded: bool,

    /// Assessment timestamp
    pub assessed_at: DateTime<Utc>,
}

impl RiskAssessment {
    /// True if an OTP challenge is required
    pub fn requires_challenge(&self) -> bool {
        self.challenge_type != ChallengeType::None
    }

    /// Factor descriptions
    pub fn factor_descriptions(&self) -> Vec<String> {
        self.detected_factors
            .iter()
            .map(|f| f.description.clone())
            .collect()
    }
}
