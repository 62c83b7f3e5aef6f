//! Risk scoring engine
//!
//! Two fixed, additive rules:
//!
//! | rule | points |
//! |---|---|
//! | amount above 10,000 | 40 |
//! | local hour in [02:00, 06:00) | 30 |
//!
//! A score of 70+ is HIGH (smart OTP), 40+ is MEDIUM (SMS OTP), anything
//! else is LOW (no challenge).

use crate::profile::ProfileLookup;
use crate::{ChallengeType, RiskAssessment, RiskFactor, RiskLevel, RiskProfile, RiskScore};
use chrono::{DateTime, FixedOffset, Timelike, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

/// Factor recorded when the amount rule fires
pub const FACTOR_AMOUNT: &str = "amount exceeds threshold";

/// Factor recorded when the time-of-day rule fires
pub const FACTOR_UNUSUAL_HOUR: &str = "unusual hour";

/// Scoring configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Amount above which the amount rule fires
    pub amount_threshold: Decimal,

    /// First unusual hour (inclusive)
    pub unusual_hours_start: u32,

    /// Last unusual hour (exclusive)
    pub unusual_hours_end: u32,

    /// Offset of the bank's wall clock from UTC, in seconds
    pub utc_offset_seconds: i32,

    /// Profile lookup timeout (milliseconds)
    pub profile_timeout_ms: u64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            amount_threshold: Decimal::from(10_000),
            unusual_hours_start: 2,     // 02:00
            unusual_hours_end: 6,       // 06:00
            utc_offset_seconds: 0,
            profile_timeout_ms: 500,
        }
    }
}

/// Risk scorer (pure)
#[derive(Debug, Clone)]
pub struct RiskScorer {
    config: RiskConfig,
    offset: FixedOffset,
}

impl RiskScorer {
    /// Create new risk scorer
    pub fn new(config: RiskConfig) -> crate::Result<Self> {
        let offset = FixedOffset::east_opt(config.utc_offset_seconds).ok_or_else(|| {
            crate::Error::InvalidConfig(format!(
                "utc_offset_seconds out of range: {}",
                config.utc_offset_seconds
            ))
        })?;
        Ok(Self { config, offset })
    }

    /// Assess transfer risk
    pub fn assess(
        &self,
        amount: Decimal,
        user_id: &str,
        payee_id: &str,
        profile: &RiskProfile,
        at: DateTime<Utc>,
    ) -> RiskAssessment {
        let mut detected_factors = Vec::new();
        let mut score = 0u8;

        if amount > self.config.amount_threshold {
            score += 40;
            detected_factors.push(RiskFactor {
                description: FACTOR_AMOUNT.to_string(),
                points: 40,
            });
        }

        let hour = at.with_timezone(&self.offset).hour();
        if (self.config.unusual_hours_start..self.config.unusual_hours_end).contains(&hour) {
            score += 30;
            detected_factors.push(RiskFactor {
                description: FACTOR_UNUSUAL_HOUR.to_string(),
                points: 30,
            });
        }

        let risk_score = RiskScore::new(score);
        let risk_level = RiskLevel::from(risk_score);
        let primary_reason = detected_factors
            .iter()
            .max_by_key(|f| f.points)
            .map(|f| f.description.clone());

        debug!(
            user_id,
            payee_id,
            score,
            hour,
            "Risk scored"
        );

        RiskAssessment {
            risk_level,
            risk_score,
            challenge_type: ChallengeType::from(risk_level),
            detected_factors,
            primary_reason,
            new_recipient: !profile.knows_payee(payee_id),
            profile_degraded: false,
            assessed_at: at,
        }
    }
}

/// Profile lookup + scoring
#[derive(Debug, Clone)]
pub struct RiskAssessor {
    scorer: RiskScorer,
    profiles: ProfileLookup,
}

impl RiskAssessor {
    /// Create assessor
    pub fn new(scorer: RiskScorer, profiles: ProfileLookup) -> Self {
        Self { scorer, profiles }
    }

    /// Build from configuration and a profile source
    pub fn from_config(
        config: RiskConfig,
        source: std::sync::Arc<dyn crate::RiskProfileSource>,
    ) -> crate::Result<Self> {
        let timeout = Duration::from_millis(config.profile_timeout_ms);
        Ok(Self::new(
            RiskScorer::new(config)?,
            ProfileLookup::new(source, timeout),
        ))
    }

    /// Fetch the profile (fail-open) and score the transfer
    pub async fn assess(
        &self,
        amount: Decimal,
        user_id: &str,
        payee_id: &str,
        at: DateTime<Utc>,
    ) -> RiskAssessment {
        let outcome = self.profiles.fetch(user_id).await;
        let mut assessment = self
            .scorer
            .assess(amount, user_id, payee_id, &outcome.profile, at);
        assessment.profile_degraded = outcome.degraded;

        info!(
            user_id,
            risk_level = ?assessment.risk_level,
            risk_score = assessment.risk_score.score(),
            challenge = ?assessment.challenge_type,
            profile_degraded = assessment.profile_degraded,
            "Risk assessed"
        );
        assessment
    }
}
