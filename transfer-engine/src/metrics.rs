//! Metrics collection for observability
//!
//! Prometheus metrics for the transfer engine, held in a per-instance
//! registry so several services can live in one process (tests, benches).
//!
//! # Metrics
//!
//! - `transfers_completed_total` - Committed transfers, deposits, withdrawals
//! - `transfers_failed_total` - Requests that ended in an error
//! - `transfer_retries_total` - Attempts beyond the first
//! - `transfer_contention_total` - Deadlock, serialization and lock-wait signals
//! - `transfer_duration_seconds` - End-to-end latency including retries

use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, Registry, TextEncoder};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Committed operations
    pub completed_total: IntCounter,

    /// Failed operations
    pub failed_total: IntCounter,

    /// Retries issued by the backoff controller
    pub retries_total: IntCounter,

    /// Contention signals reported by the store
    pub contention_total: IntCounter,

    /// End-to-end duration histogram
    pub duration: Histogram,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let completed_total = IntCounter::new(
            "transfers_completed_total",
            "Total number of committed transfers",
        )?;
        registry.register(Box::new(completed_total.clone()))?;

        let failed_total =
            IntCounter::new("transfers_failed_total", "Total number of failed transfers")?;
        registry.register(Box::new(failed_total.clone()))?;

        let retries_total = IntCounter::new(
            "transfer_retries_total",
            "Total number of retried transfer attempts",
        )?;
        registry.register(Box::new(retries_total.clone()))?;

        let contention_total = IntCounter::new(
            "transfer_contention_total",
            "Deadlock, serialization and lock-wait signals from the store",
        )?;
        registry.register(Box::new(contention_total.clone()))?;

        let duration = Histogram::with_opts(
            HistogramOpts::new(
                "transfer_duration_seconds",
                "Histogram of end-to-end transfer latencies",
            )
            .buckets(vec![
                0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 5.0,
            ]),
        )?;
        registry.register(Box::new(duration.clone()))?;

        Ok(Self {
            completed_total,
            failed_total,
            retries_total,
            contention_total,
            duration,
            registry,
        })
    }

    /// Record a committed operation
    pub fn record_completed(&self, duration_seconds: f64) {
        self.completed_total.inc();
        self.duration.observe(duration_seconds);
    }

    /// Record a failed operation
    pub fn record_failed(&self, duration_seconds: f64) {
        self.failed_total.inc();
        self.duration.observe(duration_seconds);
    }

    /// Record a retry
    pub fn record_retry(&self) {
        self.retries_total.inc();
    }

    /// Record a contention signal
    pub fn record_contention(&self) {
        self.contention_total.inc();
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render every metric in the Prometheus text format
    pub fn encode(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("completed_total", &self.completed_total.get())
            .field("failed_total", &self.failed_total.get())
            .field("retries_total", &self.retries_total.get())
            .field("contention_total", &self.contention_total.get())
            .finish_non_exhaustive()
    }
}
