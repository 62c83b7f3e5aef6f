//! Simulated partner decisions

use crate::types::ExternalTransfer;
use rand::seq::SliceRandom;
use rand::Rng;

/// Reasons a partner bank refuses a transfer
pub const FAILURE_REASONS: [&str; 5] = [
    "Destination account not found",
    "Destination account closed",
    "Destination bank system error",
    "Invalid routing information",
    "Transaction limit exceeded",
];

/// Partner decision for one transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Accepted
    Completed,
    /// Refused with a reason
    Failed(String),
}

/// Decides how the partner bank answers
pub trait OutcomeSource: Send + Sync + std::fmt::Debug {
    /// Decide the outcome of a transfer
    fn decide(&self, transfer: &ExternalTransfer) -> Outcome;
}

/// Random outcome with a fixed success rate
#[derive(Debug, Clone)]
pub struct RandomOutcome {
    success_rate: f64,
}

impl RandomOutcome {
    /// Create source; `success_rate` is clamped to [0, 1]
    pub fn new(success_rate: f64) -> Self {
        Self {
            success_rate: success_rate.clamp(0.0, 1.0),
        }
    }
}

impl OutcomeSource for RandomOutcome {
    fn decide(&self, _transfer: &ExternalTransfer) -> Outcome {
        let mut rng = rand::thread_rng();
        if rng.gen_bool(self.success_rate) {
            Outcome::Completed
        } else {
            let reason = FAILURE_REASONS
                .choose(&mut rng)
                .copied()
                .unwrap_or(FAILURE_REASONS[2]);
            Outcome::Failed(reason.to_string())
        }
    }
}

/// Same outcome for every transfer
#[derive(Debug, Clone)]
pub struct FixedOutcome(pub Outcome);

impl OutcomeSource for FixedOutcome {
    fn decide(&self, _transfer: &ExternalTransfer) -> Outcome {
        self.0.clone()
    }
}
