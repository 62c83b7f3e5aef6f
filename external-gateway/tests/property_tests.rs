//! Property-based tests for the gateway
//!
//! - Any interleaving of repeated initiations records one transfer per
//!   originating transaction

use chrono::Utc;
use external_gateway::{Config, ExternalBankGateway, FixedOutcome, Initiation, Outcome};
use message_bus::events::ExternalTransferInitiatedEvent;
use message_bus::{InMemoryBus, Publisher, PublisherConfig};
use proptest::prelude::*;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tempfile::TempDir;
use uuid::Uuid;

fn event(transaction_id: Uuid) -> ExternalTransferInitiatedEvent {
    ExternalTransferInitiatedEvent {
        transaction_id,
        source_account_number: "ACC-1".into(),
        source_bank_code: "FTB".into(),
        destination_account_number: "0451000123".into(),
        destination_bank_code: "VCB".into(),
        amount: Decimal::from(100),
        currency: "VND".into(),
        description: None,
        timestamp: Utc::now(),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    #[test]
    fn prop_one_transfer_per_origin(deliveries in prop::collection::vec(0usize..5, 1..40)) {
        let dir = TempDir::new().unwrap();
        let publisher = Publisher::new(Arc::new(InMemoryBus::new()), PublisherConfig::default());
        let config = Config {
            data_dir: dir.path().to_path_buf(),
            ..Config::default()
        };
        let gateway = ExternalBankGateway::open(
            config,
            publisher,
            Arc::new(FixedOutcome(Outcome::Completed)),
        )
        .unwrap();
        let origins: Vec<Uuid> = (0..5).map(|_| Uuid::now_v7()).collect();
        let mut seen: HashMap<Uuid, Uuid> = HashMap::new();

        for index in &deliveries {
            let origin = origins[*index];
            match gateway.initiate(&event(origin)).unwrap() {
                Initiation::Created(id) => {
                    prop_assert!(seen.insert(origin, id).is_none());
                }
                Initiation::Duplicate(id) => {
                    prop_assert_eq!(seen.get(&origin), Some(&id));
                }
            }
        }

        prop_assert_eq!(gateway.count().unwrap(), seen.len());
    }
}
