//! Transfer node binary
//!
//! Runs the saga, the outbox relay, the partner-bank gateway and both bus
//! consumers in one process over the in-memory bus.

use anyhow::Context;
use external_gateway::{ExternalBankGateway, InitiateListener, RandomOutcome};
use ledger_core::Ledger;
use message_bus::{
    DlqRouter, InMemoryBus, MessageBus, Publisher, PublisherConfig, Subscriber, Topic,
};
use risk_engine::{RiskAssessor, StaticProfileSource};
use std::sync::Arc;
use tokio::sync::watch;
use transfer_saga::{
    CallbackListener, Clock, Config, OutboxRelay, SystemClock, TransferOrchestrator,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    // Load configuration
    let config = match std::env::var("SAGA_CONFIG") {
        Ok(path) => Config::from_file(&path)
            .with_context(|| format!("failed to load saga config from {}", path))?,
        Err(_) => Config::from_env().context("invalid saga environment")?,
    };
    let gateway_config =
        external_gateway::Config::from_env().context("invalid gateway environment")?;

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        home_bank = %config.home_bank_code,
        "Starting transfer node"
    );

    let ledger = Arc::new(
        Ledger::open(config.ledger.clone())
            .await
            .context("failed to open ledger")?,
    );
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let bus = Arc::new(InMemoryBus::new());
    let publisher = Publisher::new(bus.clone() as Arc<dyn MessageBus>, PublisherConfig::default());
    let dlq = Arc::new(DlqRouter::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Saga
    let risk = RiskAssessor::from_config(config.risk.clone(), Arc::new(StaticProfileSource::new()))
        .context("invalid risk configuration")?;
    let saga = Arc::new(TransferOrchestrator::new(
        config.clone(),
        ledger.clone(),
        risk,
        publisher.clone(),
        clock.clone(),
    ));
    let relay = OutboxRelay::new(
        ledger.clone(),
        publisher.clone(),
        config.outbox.clone(),
        clock.clone(),
    );

    // Partner bank
    let outcomes = Arc::new(RandomOutcome::new(gateway_config.success_rate));
    let gateway = Arc::new(
        ExternalBankGateway::open(gateway_config, publisher.clone(), outcomes)
            .context("failed to open gateway storage")?,
    );

    let mut tasks = Vec::new();

    let initiate = Subscriber::new(
        Topic::ExternalTransferInitiate,
        config.consumer.subscriber_config(),
        dlq.clone(),
    );
    tasks.push(tokio::spawn(initiate.run(
        bus.subscribe(Topic::ExternalTransferInitiate),
        Arc::new(InitiateListener::new(gateway.clone())),
        shutdown_rx.clone(),
    )));

    let callbacks = Subscriber::new(
        Topic::ExternalTransferCallback,
        config.consumer.subscriber_config(),
        dlq.clone(),
    );
    tasks.push(tokio::spawn(callbacks.run(
        bus.subscribe(Topic::ExternalTransferCallback),
        Arc::new(CallbackListener::new(saga.clone())),
        shutdown_rx.clone(),
    )));

    let background = vec![
        tokio::spawn(relay.run(shutdown_rx.clone())),
        tokio::spawn(gateway.run(shutdown_rx.clone())),
        tokio::spawn(saga.run_maintenance(shutdown_rx.clone())),
    ];

    tracing::info!("Transfer node running");
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down transfer node");

    shutdown_tx.send(true).ok();
    for task in tasks {
        if let Ok(Err(e)) = task.await {
            tracing::warn!(error = %e, "Subscriber stopped with error");
        }
    }
    for task in background {
        task.await.ok();
    }

    let stats = dlq.get_stats(chrono::Utc::now());
    if stats.total_entries > 0 {
        tracing::warn!(entries = stats.total_entries, "Dead-letter queue not empty at shutdown");
    }

    ledger.shutdown().await.context("failed to stop ledger")?;
    Ok(())
}
