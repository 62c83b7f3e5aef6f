//! End-to-end saga scenarios
//!
//! Ledger, relay, bus, partner gateway and callback consumer wired together
//! in one process; time is driven by a manual clock.

use chrono::{Duration, TimeZone, Utc};
use external_gateway::{ExternalBankGateway, FixedOutcome, InitiateListener, Outcome};
use ledger_core::{AccountId, Currency, Ledger, SagaStep, TransactionStatus};
use message_bus::events::{ExternalTransferCompletedEvent, NotificationEvent, OtpEvent};
use message_bus::{
    DlqRouter, Disposition, InMemoryBus, Message, MessageBus, MessageHandler, Publisher,
    PublisherConfig, Subscriber, SubscriberConfig, Topic,
};
use risk_engine::{ChallengeType, RiskAssessor, RiskConfig, StaticProfileSource};
use rust_decimal::Decimal;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;
use transfer_saga::{
    CallbackListener, CallbackOutcome, ChallengeError, ChallengeResponse, Config, Error,
    ManualClock, OutboxRelay, TransferOrchestrator, TransferRequest,
};

struct Harness {
    saga: Arc<TransferOrchestrator>,
    ledger: Arc<Ledger>,
    bus: Arc<InMemoryBus>,
    clock: Arc<ManualClock>,
    relay: OutboxRelay,
    gateway: Arc<ExternalBankGateway>,
    initiations: UnboundedReceiver<Message>,
    callbacks: UnboundedReceiver<Message>,
    _temp: TempDir,
}

impl Harness {
    async fn new(partner: Outcome) -> Self {
        let temp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.ledger.data_dir = temp.path().join("ledger");

        let ledger = Arc::new(Ledger::open(config.ledger.clone()).await.unwrap());
        ledger
            .open_account(AccountId::new("ACC-1"), Currency::VND, Decimal::from(100_000))
            .await
            .unwrap();
        ledger
            .open_account(AccountId::new("ACC-2"), Currency::VND, Decimal::from(1_000))
            .await
            .unwrap();

        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 6, 2, 14, 0, 0).unwrap(),
        ));
        let bus = Arc::new(InMemoryBus::new());
        let initiations = bus.subscribe(Topic::ExternalTransferInitiate);
        let callbacks = bus.subscribe(Topic::ExternalTransferCallback);
        let publisher = Publisher::new(bus.clone() as Arc<dyn MessageBus>, PublisherConfig::default());

        let risk =
            RiskAssessor::from_config(RiskConfig::default(), Arc::new(StaticProfileSource::new()))
                .unwrap();
        let saga = Arc::new(TransferOrchestrator::new(
            config.clone(),
            ledger.clone(),
            risk,
            publisher.clone(),
            clock.clone(),
        ));
        let relay = OutboxRelay::new(ledger.clone(), publisher.clone(), config.outbox, clock.clone());
        let gateway_config = external_gateway::Config {
            data_dir: temp.path().join("gateway"),
            ..external_gateway::Config::default()
        };
        let gateway = Arc::new(
            ExternalBankGateway::open(gateway_config, publisher, Arc::new(FixedOutcome(partner)))
                .unwrap(),
        );

        Self {
            saga,
            ledger,
            bus,
            clock,
            relay,
            gateway,
            initiations,
            callbacks,
            _temp: temp,
        }
    }

    fn balance(&self, id: &str) -> Decimal {
        self.ledger.balance(&AccountId::new(id)).unwrap()
    }

    /// Relay the outbox, let the partner answer and deliver its callbacks
    async fn pump(&mut self) -> Vec<CallbackOutcome> {
        self.relay.run_once().await.unwrap();

        let initiate = InitiateListener::new(self.gateway.clone());
        while let Ok(message) = self.initiations.try_recv() {
            initiate.handle(message).await.unwrap();
        }

        self.gateway
            .process_pending(Utc::now() + Duration::hours(1))
            .await
            .unwrap();

        let mut outcomes = Vec::new();
        while let Ok(message) = self.callbacks.try_recv() {
            let event: ExternalTransferCompletedEvent = message.decode().unwrap();
            outcomes.push(self.saga.apply_external_result(&event).await.unwrap());
        }
        outcomes
    }

    /// OTP code delivered for a challenge
    async fn otp_code(&self, challenge_id: &str) -> String {
        self.relay.run_once().await.unwrap();
        self.bus
            .published(Topic::NotificationOtp)
            .iter()
            .map(|m| m.decode::<OtpEvent>().unwrap())
            .filter(|e| e.challenge_id == challenge_id)
            .last()
            .unwrap()
            .otp_code
    }
}

fn internal(amount: i64) -> TransferRequest {
    TransferRequest::internal("ACC-1", "ACC-2", Decimal::from(amount), None).unwrap()
}

fn external(amount: i64) -> TransferRequest {
    TransferRequest::external(
        "ACC-1",
        "0451000123",
        "VCB",
        Decimal::from(amount),
        Some("rent".to_string()),
    )
    .unwrap()
}

fn wrong(code: &str) -> &'static str {
    if code == "000000" {
        "999999"
    } else {
        "000000"
    }
}

#[tokio::test]
async fn test_scenario_a_domestic_transfer() {
    let h = Harness::new(Outcome::Completed).await;

    let outcome = h.saga.create(internal(500)).await.unwrap();
    assert_eq!(outcome.transaction.status, TransactionStatus::Completed);
    assert_eq!(h.balance("ACC-1"), Decimal::from(99_500));
    assert_eq!(h.balance("ACC-2"), Decimal::from(1_500));

    h.relay.run_once().await.unwrap();
    let notifications = h.bus.published(Topic::NotificationTransaction);
    assert_eq!(notifications.len(), 1);
    let event: NotificationEvent = notifications[0].decode().unwrap();
    assert_eq!(event.transaction_id, outcome.transaction.transaction_id);
    assert_eq!(event.account_id, "ACC-1");
}

#[tokio::test]
async fn test_scenario_b_smart_otp_at_night() {
    let h = Harness::new(Outcome::Completed).await;
    h.clock.set(Utc.with_ymd_and_hms(2025, 6, 2, 3, 0, 0).unwrap());

    let first = h.saga.create(internal(15_000)).await.unwrap();
    let risk = first.risk.as_ref().unwrap();
    assert_eq!(risk.risk_score.score(), 70);
    assert_eq!(risk.challenge_type, ChallengeType::SmartOtp);
    assert!(matches!(first.challenge, Some(ChallengeResponse::Smart { .. })));
    assert_eq!(first.transaction.status, TransactionStatus::Pending);

    // Wrong code rejects
    let challenge_id = first.challenge.as_ref().unwrap().challenge_id().to_string();
    let code = h.otp_code(&challenge_id).await;
    let err = h.saga.confirm(&challenge_id, wrong(&code)).await.unwrap_err();
    assert!(matches!(err, Error::Challenge(ChallengeError::InvalidOtp(_))));
    assert_eq!(err.code(), 400);
    let rejected = h
        .saga
        .get_transaction(first.transaction.transaction_id)
        .unwrap();
    assert_eq!(rejected.status, TransactionStatus::Rejected);
    assert_eq!(h.balance("ACC-1"), Decimal::from(100_000));

    // Correct code within the TTL executes
    let second = h.saga.create(internal(15_000)).await.unwrap();
    let challenge_id = second.challenge.as_ref().unwrap().challenge_id().to_string();
    let code = h.otp_code(&challenge_id).await;
    h.clock.advance(Duration::seconds(299));

    let confirmed = h.saga.confirm(&challenge_id, &code).await.unwrap();
    assert_eq!(confirmed.transaction.status, TransactionStatus::Completed);
    assert_eq!(h.balance("ACC-1"), Decimal::from(85_000));
    assert_eq!(h.balance("ACC-2"), Decimal::from(16_000));
}

#[tokio::test]
async fn test_scenario_c_confirm_after_expiry() {
    let h = Harness::new(Outcome::Completed).await;

    let outcome = h.saga.create(internal(15_000)).await.unwrap();
    let challenge_id = outcome.challenge.as_ref().unwrap().challenge_id().to_string();
    let code = h.otp_code(&challenge_id).await;

    h.clock.advance(Duration::seconds(301));
    let err = h.saga.confirm(&challenge_id, &code).await.unwrap_err();
    assert!(matches!(err, Error::Challenge(ChallengeError::Expired(_))));

    let tx = h
        .saga
        .get_transaction(outcome.transaction.transaction_id)
        .unwrap();
    assert_eq!(tx.status, TransactionStatus::Expired);
    assert!(!tx.saga_step.funds_moved());
    assert_eq!(h.balance("ACC-1"), Decimal::from(100_000));
    assert_eq!(h.balance("ACC-2"), Decimal::from(1_000));
}

#[tokio::test]
async fn test_scenario_d_interbank_completed_and_duplicate_callback() {
    let mut h = Harness::new(Outcome::Completed).await;

    let outcome = h.saga.create(external(500)).await.unwrap();
    let id = outcome.transaction.transaction_id;
    assert_eq!(outcome.transaction.status, TransactionStatus::Pending);
    assert_eq!(outcome.transaction.saga_step, SagaStep::AwaitingCallback);
    assert_eq!(h.balance("ACC-1"), Decimal::from(99_500));

    let applied = h.pump().await;
    assert!(matches!(applied.as_slice(), [CallbackOutcome::Applied(_)]));
    let tx = h.saga.get_transaction(id).unwrap();
    assert_eq!(tx.status, TransactionStatus::Completed);
    assert_eq!(tx.saga_step, SagaStep::Settled);

    // Same callback again
    let callback = h.bus.published(Topic::ExternalTransferCallback)[0].clone();
    let event: ExternalTransferCompletedEvent = callback.decode().unwrap();
    let again = h.saga.apply_external_result(&event).await.unwrap();
    assert!(matches!(again, CallbackOutcome::Duplicate(_)));
    assert_eq!(h.saga.get_transaction(id).unwrap(), tx);
    assert_eq!(h.balance("ACC-1"), Decimal::from(99_500));

    let partner = h.gateway.find_by_origin(id).unwrap().unwrap();
    assert_eq!(partner.amount, Decimal::from(500));
    assert_eq!(partner.source_bank_code, "FTB");
}

#[tokio::test]
async fn test_scenario_e_interbank_failed_is_compensated() {
    let mut h = Harness::new(Outcome::Failed("Destination account closed".to_string())).await;

    let outcome = h.saga.create(external(500)).await.unwrap();
    assert_eq!(h.balance("ACC-1"), Decimal::from(99_500));

    h.pump().await;
    let tx = h
        .saga
        .get_transaction(outcome.transaction.transaction_id)
        .unwrap();
    assert_eq!(tx.status, TransactionStatus::Failed);
    assert_eq!(tx.saga_step, SagaStep::Compensated);
    assert!(tx
        .failure_reason
        .as_deref()
        .unwrap()
        .contains("Destination account closed"));
    assert!(!tx.rollback_failed);
    assert_eq!(h.balance("ACC-1"), Decimal::from(100_000));
}

#[tokio::test]
async fn test_redelivered_initiation_reaches_partner_once() {
    let mut h = Harness::new(Outcome::Completed).await;
    h.saga.create(external(500)).await.unwrap();
    h.relay.run_once().await.unwrap();

    let message = h.initiations.try_recv().unwrap();
    let listener = InitiateListener::new(h.gateway.clone());
    listener.handle(message.clone()).await.unwrap();
    listener.handle(message).await.unwrap();
    assert_eq!(h.gateway.count().unwrap(), 1);
}

#[tokio::test]
async fn test_concurrent_confirms_move_funds_once() {
    let h = Harness::new(Outcome::Completed).await;
    let outcome = h.saga.create(internal(15_000)).await.unwrap();
    let challenge_id = outcome.challenge.as_ref().unwrap().challenge_id().to_string();
    let code = h.otp_code(&challenge_id).await;

    let (a, b) = tokio::join!(
        h.saga.confirm(&challenge_id, &code),
        h.saga.confirm(&challenge_id, &code)
    );
    assert_eq!([a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(), 1);
    assert_eq!(h.balance("ACC-1"), Decimal::from(85_000));
}

#[tokio::test]
async fn test_callback_for_unknown_transaction_is_dead_lettered() {
    let h = Harness::new(Outcome::Completed).await;
    let listener = CallbackListener::new(h.saga.clone());
    let dlq = Arc::new(DlqRouter::new());
    let subscriber = Subscriber::new(
        Topic::ExternalTransferCallback,
        SubscriberConfig::default(),
        dlq.clone(),
    );

    let event = ExternalTransferCompletedEvent {
        external_transaction_id: uuid::Uuid::new_v4(),
        fortress_bank_transaction_id: uuid::Uuid::now_v7(),
        status: message_bus::events::ExternalTransferStatus::Completed,
        amount: Decimal::from(500),
        source_account_number: "ACC-1".to_string(),
        destination_account_number: "0451000123".to_string(),
        destination_bank_code: "VCB".to_string(),
        message: "Transfer completed successfully".to_string(),
        timestamp: Utc::now(),
    };
    let message = Message::from_event(Topic::ExternalTransferCallback, &event).unwrap();

    let disposition = subscriber.process(&listener, message).await;
    assert!(matches!(disposition, Disposition::DeadLettered { .. }));
    assert_eq!(dlq.list_entries(None, false, 10).len(), 1);
}

#[tokio::test]
async fn test_cancel_races_confirm() {
    let h = Harness::new(Outcome::Completed).await;
    let outcome = h.saga.create(internal(15_000)).await.unwrap();
    let id = outcome.transaction.transaction_id;
    let challenge_id = outcome.challenge.as_ref().unwrap().challenge_id().to_string();
    let code = h.otp_code(&challenge_id).await;

    h.saga.cancel(id, &AccountId::new("ACC-1")).await.unwrap();
    let err = h.saga.confirm(&challenge_id, &code).await.unwrap_err();
    assert_eq!(err.code(), 404);
    assert_eq!(
        h.saga.get_transaction(id).unwrap().status,
        TransactionStatus::Cancelled
    );
    assert_eq!(h.balance("ACC-1"), Decimal::from(100_000));
}
