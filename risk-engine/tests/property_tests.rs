//! Property-based tests for risk scoring
//!
//! - Small daytime transfers never need a challenge
//! - Large transfers always need one and score at least 40

use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use risk_engine::{ChallengeType, RiskConfig, RiskProfile, RiskScorer};
use rust_decimal::Decimal;

/// Amounts up to and including 10,000.00
fn small_amount() -> impl Strategy<Value = Decimal> {
    (1i64..=1_000_000i64).prop_map(|cents| Decimal::new(cents, 2))
}

/// Amounts strictly above 10,000
fn large_amount() -> impl Strategy<Value = Decimal> {
    (1_000_001i64..100_000_000i64).prop_map(|cents| Decimal::new(cents, 2))
}

/// Hours outside [2, 6)
fn usual_hour() -> impl Strategy<Value = u32> {
    prop_oneof![0u32..2, 6u32..24]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_small_daytime_amounts_need_no_challenge(
        amount in small_amount(),
        hour in usual_hour(),
        minute in 0u32..60,
    ) {
        let scorer = RiskScorer::new(RiskConfig::default()).unwrap();
        let at = Utc.with_ymd_and_hms(2025, 6, 1, hour, minute, 0).unwrap();

        let assessment = scorer.assess(amount, "user", "payee", &RiskProfile::empty(), at);
        prop_assert_eq!(assessment.challenge_type, ChallengeType::None);
    }

    #[test]
    fn prop_large_amounts_always_challenged(
        amount in large_amount(),
        hour in 0u32..24,
    ) {
        let scorer = RiskScorer::new(RiskConfig::default()).unwrap();
        let at = Utc.with_ymd_and_hms(2025, 6, 1, hour, 0, 0).unwrap();

        let assessment = scorer.assess(amount, "user", "payee", &RiskProfile::empty(), at);
        prop_assert!(assessment.risk_score.score() >= 40);
        prop_assert_ne!(assessment.challenge_type, ChallengeType::None);
    }
}
