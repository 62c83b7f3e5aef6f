//! Metrics collection for observability
//!
//! This module provides Prometheus metrics for monitoring the ledger.
//!
//! # Metrics
//!
//! - `ledger_units_committed_total` - Units of work committed
//! - `ledger_units_rejected_total` - Units rejected, by reason
//! - `ledger_outbox_enqueued_total` - Outbox events recorded
//! - `ledger_commit_duration_seconds` - Histogram of commit latencies

use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone, Debug)]
pub struct Metrics {
    /// Units committed
    pub units_committed: IntCounter,

    /// Units rejected, labelled by reason
    pub units_rejected: IntCounterVec,

    /// Outbox events recorded
    pub outbox_enqueued: IntCounter,

    /// Commit duration histogram
    pub commit_duration: Histogram,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector with its own registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let units_committed = IntCounter::new(
            "ledger_units_committed_total",
            "Units of work committed",
        )?;
        registry.register(Box::new(units_committed.clone()))?;

        let units_rejected = IntCounterVec::new(
            Opts::new("ledger_units_rejected_total", "Units of work rejected"),
            &["reason"],
        )?;
        registry.register(Box::new(units_rejected.clone()))?;

        let outbox_enqueued = IntCounter::new(
            "ledger_outbox_enqueued_total",
            "Outbox events recorded",
        )?;
        registry.register(Box::new(outbox_enqueued.clone()))?;

        let commit_duration = Histogram::with_opts(
            HistogramOpts::new("ledger_commit_duration_seconds", "Histogram of commit latencies")
                .buckets(vec![0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250]),
        )?;
        registry.register(Box::new(commit_duration.clone()))?;

        Ok(Self {
            units_committed,
            units_rejected,
            outbox_enqueued,
            commit_duration,
            registry,
        })
    }

    /// Record a committed unit
    pub fn record_commit(&self, outbox_events: usize, duration_seconds: f64) {
        self.units_committed.inc();
        self.outbox_enqueued.inc_by(outbox_events as u64);
        self.commit_duration.observe(duration_seconds);
    }

    /// Record a rejected unit
    pub fn record_rejection(&self, error: &crate::Error) {
        let reason = match error {
            crate::Error::InsufficientFunds { .. } => "insufficient_funds",
            crate::Error::AccountNotFound(_) => "account_not_found",
            crate::Error::PreconditionFailed(_) => "precondition",
            crate::Error::InvalidUnit(_) => "invalid",
            _ => "storage",
        };
        self.units_rejected.with_label_values(&[reason]).inc();
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        assert_eq!(metrics.units_committed.get(), 0);
        // Per-instance registries do not collide
        assert!(Metrics::new().is_ok());
    }

    #[test]
    fn test_record_commit() {
        let metrics = Metrics::new().unwrap();
        metrics.record_commit(2, 0.001);
        metrics.record_commit(0, 0.002);

        assert_eq!(metrics.units_committed.get(), 2);
        assert_eq!(metrics.outbox_enqueued.get(), 2);
    }

    #[test]
    fn test_record_rejection_by_reason() {
        let metrics = Metrics::new().unwrap();
        metrics.record_rejection(&crate::Error::AccountNotFound("X".to_string()));

        assert_eq!(
            metrics
                .units_rejected
                .with_label_values(&["account_not_found"])
                .get(),
            1
        );
    }
}
