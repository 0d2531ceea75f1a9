//! Metrics collection for observability
//!
//! This module provides Prometheus metrics for monitoring reconciliation.
//!
//! # Metrics
//!
//! - `ticket_sync_events_applied_total` - Events that changed a record
//! - `ticket_sync_events_skipped_total` - Events already covered by a record
//! - `ticket_sync_inconsistencies_total{kind}` - Reported data inconsistencies
//! - `ticket_sync_passes_total{result}` - Sync passes by outcome
//! - `ticket_sync_pass_duration_seconds` - Histogram of sync pass latencies
//! - `ticket_sync_confirmed_block` - Last confirmed block
//! - `ticket_sync_provider_retries_total` - Provider calls retried

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

/// Metrics collector
///
/// Each collector owns its registry, so several engines (or tests) can coexist
/// in one process.
#[derive(Clone)]
pub struct Metrics {
    /// Events that changed a record
    pub events_applied: IntCounter,

    /// Events skipped by the block guard
    pub events_skipped: IntCounter,

    /// Inconsistencies by kind
    pub inconsistencies: IntCounterVec,

    /// Sync passes by result
    pub sync_passes: IntCounterVec,

    /// Sync pass duration histogram
    pub sync_duration: Histogram,

    /// Last confirmed block
    pub confirmed_block: IntGauge,

    /// Provider calls retried
    pub provider_retries: IntCounter,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let events_applied = IntCounter::new(
            "ticket_sync_events_applied_total",
            "Events that changed a ticket record",
        )?;
        registry.register(Box::new(events_applied.clone()))?;

        let events_skipped = IntCounter::new(
            "ticket_sync_events_skipped_total",
            "Events already covered by a ticket record",
        )?;
        registry.register(Box::new(events_skipped.clone()))?;

        let inconsistencies = IntCounterVec::new(
            Opts::new(
                "ticket_sync_inconsistencies_total",
                "Reported data inconsistencies",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(inconsistencies.clone()))?;

        let sync_passes = IntCounterVec::new(
            Opts::new("ticket_sync_passes_total", "Sync passes by outcome"),
            &["result"],
        )?;
        registry.register(Box::new(sync_passes.clone()))?;

        let sync_duration = Histogram::with_opts(
            HistogramOpts::new(
                "ticket_sync_pass_duration_seconds",
                "Histogram of sync pass latencies",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 120.0]),
        )?;
        registry.register(Box::new(sync_duration.clone()))?;

        let confirmed_block = IntGauge::new(
            "ticket_sync_confirmed_block",
            "Last block whose events are fully applied",
        )?;
        registry.register(Box::new(confirmed_block.clone()))?;

        let provider_retries = IntCounter::new(
            "ticket_sync_provider_retries_total",
            "Provider calls retried after a transient error",
        )?;
        registry.register(Box::new(provider_retries.clone()))?;

        Ok(Self {
            events_applied,
            events_skipped,
            inconsistencies,
            sync_passes,
            sync_duration,
            confirmed_block,
            provider_retries,
            registry,
        })
    }

    /// Record a sync pass
    pub fn record_pass(&self, result: &str, duration_seconds: f64) {
        self.sync_passes.with_label_values(&[result]).inc();
        self.sync_duration.observe(duration_seconds);
    }

    /// Record an inconsistency report
    pub fn record_inconsistency(&self, kind: &str) {
        self.inconsistencies.with_label_values(&[kind]).inc();
    }

    /// Update the confirmed block gauge
    pub fn set_confirmed_block(&self, block: u64) {
        self.confirmed_block.set(i64::try_from(block).unwrap_or(i64::MAX));
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Prometheus text exposition of every registered metric
    pub fn render(&self) -> prometheus::Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry().gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("events_applied", &self.events_applied.get())
            .field("confirmed_block", &self.confirmed_block.get())
            .finish_non_exhaustive()
    }
}
