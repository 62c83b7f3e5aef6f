//! Fee calculation keyed by transaction type

use crate::config::FeeConfig;
use ledger_core::TransactionType;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Fee rule for one transaction type
///
/// `fee = amount * fee_percentage / 100 + fixed_fee`, raised to `min_fee`,
/// capped at `max_fee` when `max_fee` is positive, rounded to 2 places.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSchedule {
    pub transaction_type: TransactionType,
    #[serde(default)]
    pub fee_percentage: Decimal,
    #[serde(default)]
    pub fixed_fee: Decimal,
    #[serde(default)]
    pub min_fee: Decimal,
    #[serde(default)]
    pub max_fee: Decimal,
}

impl FeeSchedule {
    /// Free schedule
    pub fn free(transaction_type: TransactionType) -> Self {
        Self {
            transaction_type,
            fee_percentage: Decimal::ZERO,
            fixed_fee: Decimal::ZERO,
            min_fee: Decimal::ZERO,
            max_fee: Decimal::ZERO,
        }
    }

    /// Fee for an amount
    pub fn apply(&self, amount: Decimal) -> Decimal {
        let mut fee = amount * self.fee_percentage / Decimal::ONE_HUNDRED + self.fixed_fee;
        fee = fee.max(self.min_fee);
        if self.max_fee > Decimal::ZERO {
            fee = fee.min(self.max_fee);
        }
        fee.max(Decimal::ZERO).round_dp(2)
    }
}

/// Fee lookup
pub trait FeePolicy: Send + Sync + std::fmt::Debug {
    /// Fee charged on top of `amount`
    fn fee_for(&self, transaction_type: TransactionType, amount: Decimal) -> Decimal;
}

/// Schedule-table policy; types without a schedule are free
#[derive(Debug, Clone, Default)]
pub struct ScheduleFeePolicy {
    schedules: HashMap<TransactionType, FeeSchedule>,
}

impl ScheduleFeePolicy {
    /// Build from configuration; a later schedule for the same type wins
    pub fn from_config(config: &FeeConfig) -> Self {
        Self {
            schedules: config
                .schedules
                .iter()
                .map(|s| (s.transaction_type, s.clone()))
                .collect(),
        }
    }
}

impl FeePolicy for ScheduleFeePolicy {
    fn fee_for(&self, transaction_type: TransactionType, amount: Decimal) -> Decimal {
        self.schedules
            .get(&transaction_type)
            .map(|s| s.apply(amount))
            .unwrap_or(Decimal::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule() -> FeeSchedule {
        FeeSchedule {
            transaction_type: TransactionType::ExternalTransfer,
            fee_percentage: Decimal::new(5, 1), // 0.5%
            fixed_fee: Decimal::from(1_000),
            min_fee: Decimal::from(2_000),
            max_fee: Decimal::from(50_000),
        }
    }

    #[test]
    fn test_percentage_plus_fixed() {
        // 1,000,000 * 0.5% + 1,000
        assert_eq!(schedule().apply(Decimal::from(1_000_000)), Decimal::from(6_000));
    }

    #[test]
    fn test_min_and_max() {
        assert_eq!(schedule().apply(Decimal::from(100)), Decimal::from(2_000));
        assert_eq!(
            schedule().apply(Decimal::from(100_000_000)),
            Decimal::from(50_000)
        );
    }

    #[test]
    fn test_zero_max_means_uncapped() {
        let mut s = schedule();
        s.max_fee = Decimal::ZERO;
        assert_eq!(s.apply(Decimal::from(100_000_000)), Decimal::from(501_000));
    }

    #[test]
    fn test_rounding() {
        let s = FeeSchedule {
            fee_percentage: Decimal::new(1, 1),
            ..FeeSchedule::free(TransactionType::InternalTransfer)
        };
        assert_eq!(s.apply(Decimal::new(12_345, 2)), Decimal::new(12, 2));
    }

    #[test]
    fn test_policy_defaults_to_free() {
        let config = FeeConfig {
            fee_account: None,
            schedules: vec![schedule()],
        };
        let policy = ScheduleFeePolicy::from_config(&config);

        assert_eq!(
            policy.fee_for(TransactionType::InternalTransfer, Decimal::from(10_000)),
            Decimal::ZERO
        );
        assert_eq!(
            policy.fee_for(TransactionType::ExternalTransfer, Decimal::from(1_000_000)),
            Decimal::from(6_000)
        );
    }
}
