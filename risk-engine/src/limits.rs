//! Transaction limit checking
//!
//! Per-account daily and monthly outgoing totals. Daily usage resets at the
//! UTC day boundary, monthly usage when the calendar month changes.

use crate::{Error, Result};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Limit configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitConfig {
    /// Daily limit per account
    pub daily_limit: Decimal,

    /// Monthly limit per account
    pub monthly_limit: Decimal,
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self {
            daily_limit: Decimal::from(50_000),
            monthly_limit: Decimal::from(200_000),
        }
    }
}

#[derive(Debug, Clone)]
struct Usage {
    day: NaiveDate,
    daily: Decimal,
    month: (i32, u32),
    monthly: Decimal,
}

impl Usage {
    fn new(at: DateTime<Utc>) -> Self {
        Self {
            day: at.date_naive(),
            daily: Decimal::ZERO,
            month: (at.year(), at.month()),
            monthly: Decimal::ZERO,
        }
    }

    fn roll(&mut self, at: DateTime<Utc>) {
        if at.date_naive() != self.day {
            self.day = at.date_naive();
            self.daily = Decimal::ZERO;
        }
        if (at.year(), at.month()) != self.month {
            self.month = (at.year(), at.month());
            self.monthly = Decimal::ZERO;
        }
    }
}

/// Limit checker
#[derive(Debug)]
pub struct LimitChecker {
    config: LimitConfig,
    usage: DashMap<String, Usage>,
}

impl LimitChecker {
    /// Create new limit checker
    pub fn new(config: LimitConfig) -> Self {
        Self {
            config,
            usage: DashMap::new(),
        }
    }

    /// Check that `amount` fits in the remaining daily and monthly allowance
    pub fn check(&self, account_id: &str, amount: Decimal, at: DateTime<Utc>) -> Result<()> {
        let (daily, monthly) = self.usage(account_id, at);

        if daily + amount > self.config.daily_limit {
            return Err(Error::LimitExceeded(format!(
                "Daily limit {} would be exceeded (used {})",
                self.config.daily_limit, daily
            )));
        }

        if monthly + amount > self.config.monthly_limit {
            return Err(Error::LimitExceeded(format!(
                "Monthly limit {} would be exceeded (used {})",
                self.config.monthly_limit, monthly
            )));
        }
        Ok(())
    }

    /// Count an outgoing transfer against the limits
    pub fn record(&self, account_id: &str, amount: Decimal, at: DateTime<Utc>) {
        let mut usage = self
            .usage
            .entry(account_id.to_string())
            .or_insert_with(|| Usage::new(at));
        usage.roll(at);
        usage.daily += amount;
        usage.monthly += amount;
    }

    /// Give back usage of a reversed transfer
    pub fn release(&self, account_id: &str, amount: Decimal, at: DateTime<Utc>) {
        if let Some(mut usage) = self.usage.get_mut(account_id) {
            usage.roll(at);
            usage.daily = (usage.daily - amount).max(Decimal::ZERO);
            usage.monthly = (usage.monthly - amount).max(Decimal::ZERO);
        }
    }

    /// Current (daily, monthly) usage
    pub fn usage(&self, account_id: &str, at: DateTime<Utc>) -> (Decimal, Decimal) {
        match self.usage.get(account_id) {
            Some(usage) => {
                let mut current = usage.clone();
                current.roll(at);
                (current.daily, current.monthly)
            }
            None => (Decimal::ZERO, Decimal::ZERO),
        }
    }

    /// Configured limits
    pub fn config(&self) -> &LimitConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32, month: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, month, day, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_daily_limit() {
        let checker = LimitChecker::new(LimitConfig::default());
        checker.record("A", Decimal::from(45_000), at(10, 3));

        assert!(checker.check("A", Decimal::from(5_000), at(10, 3)).is_ok());
        assert!(matches!(
            checker.check("A", Decimal::from(5_001), at(10, 3)),
            Err(Error::LimitExceeded(_))
        ));
        // Other accounts are independent
        assert!(checker.check("B", Decimal::from(50_000), at(10, 3)).is_ok());
    }

    #[test]
    fn test_daily_usage_resets_next_day() {
        let checker = LimitChecker::new(LimitConfig::default());
        checker.record("A", Decimal::from(50_000), at(10, 3));

        assert!(checker.check("A", Decimal::ONE, at(10, 3)).is_err());
        assert!(checker.check("A", Decimal::from(50_000), at(11, 3)).is_ok());
        assert_eq!(
            checker.usage("A", at(11, 3)),
            (Decimal::ZERO, Decimal::from(50_000))
        );
    }

    #[test]
    fn test_monthly_limit_and_rollover() {
        let checker = LimitChecker::new(LimitConfig::default());
        for day in 1..=4 {
            checker.record("A", Decimal::from(50_000), at(day, 3));
        }

        let err = checker.check("A", Decimal::ONE, at(5, 3)).unwrap_err();
        assert!(err.to_string().contains("Monthly"));
        assert!(checker.check("A", Decimal::ONE, at(1, 4)).is_ok());
    }

    #[test]
    fn test_release_restores_allowance() {
        let checker = LimitChecker::new(LimitConfig::default());
        checker.record("A", Decimal::from(50_000), at(10, 3));
        checker.release("A", Decimal::from(20_000), at(10, 3));

        assert_eq!(
            checker.usage("A", at(10, 3)),
            (Decimal::from(30_000), Decimal::from(30_000))
        );
    }
}
