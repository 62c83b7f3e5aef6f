//! Property-based tests for ledger invariants
//!
//! These tests use proptest to verify critical invariants:
//! - Money conservation: the sum of balances never changes under transfers
//! - No overdraft: balances never go negative
//! - Atomicity: a rejected unit leaves every balance untouched

use ledger_core::{AccountId, Config, Currency, Ledger, UnitOfWork};
use proptest::prelude::*;
use rust_decimal::Decimal;
use tempfile::TempDir;

const ACCOUNTS: [&str; 3] = ["ACC-A", "ACC-B", "ACC-C"];

/// Strategy for generating valid amounts (positive decimals)
fn amount_strategy() -> impl Strategy<Value = Decimal> {
    (1u64..5_000_00u64).prop_map(|cents| Decimal::new(cents as i64, 2))
}

/// Strategy for a transfer between two distinct accounts
fn transfer_strategy() -> impl Strategy<Value = (usize, usize, Decimal)> {
    (0..ACCOUNTS.len(), 1..ACCOUNTS.len(), amount_strategy())
        .prop_map(|(from, offset, amount)| (from, (from + offset) % ACCOUNTS.len(), amount))
}

/// Create test ledger with seeded accounts
async fn create_test_ledger() -> (Ledger, TempDir) {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.data_dir = temp_dir.path().to_path_buf();

    let ledger = Ledger::open(config).await.unwrap();
    for id in ACCOUNTS {
        ledger
            .open_account(AccountId::new(id), Currency::VND, Decimal::from(10_000))
            .await
            .unwrap();
    }
    (ledger, temp_dir)
}

fn total(ledger: &Ledger) -> Decimal {
    ACCOUNTS
        .iter()
        .map(|id| ledger.balance(&AccountId::new(*id)).unwrap())
        .sum()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(20))]

    /// Property: transfers conserve money and never overdraw
    #[test]
    fn prop_money_conservation(transfers in prop::collection::vec(transfer_strategy(), 1..30)) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (ledger, _temp) = create_test_ledger().await;
            let before = total(&ledger);

            for (from, to, amount) in transfers {
                let unit = UnitOfWork::new()
                    .debit(AccountId::new(ACCOUNTS[from]), amount)
                    .credit(AccountId::new(ACCOUNTS[to]), amount);
                // Insufficient funds is an expected outcome here
                let _ = ledger.commit(unit).await;
            }

            prop_assert_eq!(total(&ledger), before);
            for id in ACCOUNTS {
                prop_assert!(ledger.balance(&AccountId::new(id)).unwrap() >= Decimal::ZERO);
            }

            ledger.shutdown().await.unwrap();
            Ok(())
        })?;
    }

    /// Property: a unit whose credit leg fails leaves the debit unapplied
    #[test]
    fn prop_failed_credit_is_atomic(amount in amount_strategy()) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (ledger, _temp) = create_test_ledger().await;
            let sender = AccountId::new(ACCOUNTS[0]);

            let unit = UnitOfWork::new()
                .debit(sender.clone(), amount)
                .credit(AccountId::new("UNKNOWN"), amount);
            prop_assert!(ledger.commit(unit).await.is_err());
            prop_assert_eq!(ledger.balance(&sender).unwrap(), Decimal::from(10_000));

            ledger.shutdown().await.unwrap();
            Ok(())
        })?;
    }
}
