//! OTP challenge store
//!
//! Holds one [`PendingTransfer`] per challenge id. Verification removes the
//! entry before looking at it, so a challenge can be consumed at most once
//! even under concurrent duplicate calls: the first caller gets the entry,
//! everyone else gets NOT_FOUND.

use crate::clock::Clock;
use crate::types::TransferRequest;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use message_bus::events::OtpChannel;
use rand::Rng;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

/// Challenge failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChallengeError {
    /// No live challenge with this id
    #[error("Challenge not found: {0}")]
    NotFound(String),

    /// Challenge outlived its TTL
    #[error("Challenge expired: {0}")]
    Expired(String),

    /// Wrong code; the challenge is consumed
    #[error("Invalid OTP for challenge {0}")]
    InvalidOtp(String),

    /// Resend requested too soon after the previous code
    #[error("OTP resent too recently for challenge {challenge_id}, retry in {retry_after_secs}s")]
    Cooldown {
        /// Challenge
        challenge_id: String,
        /// Seconds until a resend is allowed
        retry_after_secs: i64,
    },
}

/// Transfer parked behind an OTP challenge
#[derive(Debug, Clone)]
pub struct PendingTransfer {
    pub challenge_id: String,
    pub request: TransferRequest,
    pub otp_code: String,
    pub channel: OtpChannel,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// When the current code was issued
    pub issued_at: DateTime<Utc>,
}

/// Freshly issued code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedChallenge {
    pub challenge_id: String,
    pub otp_code: String,
    pub channel: OtpChannel,
    pub expires_at: DateTime<Utc>,
}

/// In-memory challenge store with TTL
#[derive(Debug)]
pub struct ChallengeStore {
    pending: DashMap<String, PendingTransfer>,
    ttl: Duration,
    resend_cooldown: Duration,
    clock: Arc<dyn Clock>,
}

impl ChallengeStore {
    /// Create store
    pub fn new(ttl: Duration, resend_cooldown: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            pending: DashMap::new(),
            ttl,
            resend_cooldown,
            clock,
        }
    }

    /// Park a transfer and issue a code
    pub fn create(&self, request: TransferRequest, channel: OtpChannel) -> IssuedChallenge {
        let now = self.clock.now();
        let challenge_id = Uuid::new_v4().to_string();
        let otp_code = generate_code();
        let expires_at = now + self.ttl;

        self.pending.insert(
            challenge_id.clone(),
            PendingTransfer {
                challenge_id: challenge_id.clone(),
                request,
                otp_code: otp_code.clone(),
                channel,
                created_at: now,
                expires_at,
                issued_at: now,
            },
        );

        debug!(challenge_id = %challenge_id, %expires_at, "Challenge created");
        IssuedChallenge {
            challenge_id,
            otp_code,
            channel,
            expires_at,
        }
    }

    /// Consume a challenge; returns the parked request iff the code matches
    /// and the challenge has not expired
    pub fn verify(&self, challenge_id: &str, code: &str) -> Result<TransferRequest, ChallengeError> {
        let (_, pending) = self
            .pending
            .remove(challenge_id)
            .ok_or_else(|| ChallengeError::NotFound(challenge_id.to_string()))?;

        if self.clock.now() >= pending.expires_at {
            info!(challenge_id, "Challenge expired before confirmation");
            return Err(ChallengeError::Expired(challenge_id.to_string()));
        }

        if !codes_match(&pending.otp_code, code.trim()) {
            info!(challenge_id, "Invalid OTP, challenge consumed");
            return Err(ChallengeError::InvalidOtp(challenge_id.to_string()));
        }

        Ok(pending.request)
    }

    /// Issue a new code for a live challenge and extend its expiry
    pub fn resend(&self, challenge_id: &str) -> Result<IssuedChallenge, ChallengeError> {
        let now = self.clock.now();

        let expired = {
            let mut pending = self
                .pending
                .get_mut(challenge_id)
                .ok_or_else(|| ChallengeError::NotFound(challenge_id.to_string()))?;

            if now >= pending.expires_at {
                true
            } else {
                let next_allowed = pending.issued_at + self.resend_cooldown;
                if now < next_allowed {
                    return Err(ChallengeError::Cooldown {
                        challenge_id: challenge_id.to_string(),
                        retry_after_secs: (next_allowed - now).num_seconds().max(1),
                    });
                }

                pending.otp_code = generate_code();
                pending.issued_at = now;
                pending.expires_at = now + self.ttl;
                info!(challenge_id, expires_at = %pending.expires_at, "OTP resent");
                return Ok(IssuedChallenge {
                    challenge_id: challenge_id.to_string(),
                    otp_code: pending.otp_code.clone(),
                    channel: pending.channel,
                    expires_at: pending.expires_at,
                });
            }
        };

        if expired {
            self.pending.remove(challenge_id);
        }
        Err(ChallengeError::Expired(challenge_id.to_string()))
    }

    /// Remove every challenge expired at `now`; returns their ids
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> Vec<String> {
        let candidates: Vec<String> = self
            .pending
            .iter()
            .filter(|p| p.expires_at <= now)
            .map(|p| p.challenge_id.clone())
            .collect();

        candidates
            .into_iter()
            .filter(|id| {
                self.pending
                    .remove_if(id, |_, p| p.expires_at <= now)
                    .is_some()
            })
            .collect()
    }

    /// Drop a challenge without verifying it
    pub fn discard(&self, challenge_id: &str) -> bool {
        self.pending.remove(challenge_id).is_some()
    }

    /// True if the challenge is still parked
    pub fn contains(&self, challenge_id: &str) -> bool {
        self.pending.contains_key(challenge_id)
    }

    /// Number of parked challenges
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// True if nothing is parked
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Challenge lifetime
    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

/// Six-digit numeric code
fn generate_code() -> String {
    rand::thread_rng().gen_range(100_000..1_000_000u32).to_string()
}

/// Compare without short-circuiting on the first differing digit
fn codes_match(expected: &str, supplied: &str) -> bool {
    expected.len() == supplied.len()
        && expected
            .bytes()
            .zip(supplied.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}
