//! Prometheus metrics for the harvester
//!
//! This module tracks:
//! - Claims: items leased per worker
//! - Outcomes: completed, incomplete, failed and skipped items per worker
//! - Leases: releases by scope and reclaimed expired leases
//! - Batches: processing duration per worker, active worker count
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization fails, metrics operations become no-ops.

use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram_vec, Counter,
    CounterVec, Encoder, Gauge, HistogramVec, TextEncoder,
};
use std::sync::OnceLock;

// ============================================================================
// Metrics Storage
// ============================================================================

/// Container for all harvester metrics
struct HarvesterMetrics {
    items_claimed: CounterVec,
    item_outcomes: CounterVec,
    leases_released: CounterVec,
    leases_reclaimed: Counter,
    batch_duration: HistogramVec,
    active_workers: Gauge,
}

/// Global storage for harvester metrics
static HARVESTER_METRICS: OnceLock<HarvesterMetrics> = OnceLock::new();

/// Flag to track if initialization was attempted
static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// This function should be called once at application startup.
/// Subsequent calls are no-ops.
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    // Prevent double initialization
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let metrics = HarvesterMetrics {
        items_claimed: register_counter_vec!(
            "harvester_items_claimed_total",
            "Total work items leased by worker",
            &["worker"]
        )?,
        item_outcomes: register_counter_vec!(
            "harvester_item_outcomes_total",
            "Processed work items by worker and outcome",
            &["worker", "outcome"]
        )?,
        leases_released: register_counter_vec!(
            "harvester_leases_released_total",
            "Leases cleared by release scope (worker, all)",
            &["scope"]
        )?,
        leases_reclaimed: register_counter!(
            "harvester_leases_reclaimed_total",
            "Expired leases reclaimed by the reaper"
        )?,
        batch_duration: register_histogram_vec!(
            "harvester_batch_duration_seconds",
            "Time spent processing one claimed batch",
            &["worker"],
            vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]
        )?,
        active_workers: register_gauge!(
            "harvester_active_workers",
            "Number of worker loops currently running"
        )?,
    };

    HARVESTER_METRICS
        .set(metrics)
        .map_err(|_| "Harvester metrics already initialized")?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

/// Check if metrics have been initialized
pub fn metrics_initialized() -> bool {
    HARVESTER_METRICS.get().is_some()
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Encode all metrics to Prometheus text format
pub fn gather_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Record items leased by one claim
pub fn record_claimed(worker: &str, count: usize) {
    if count == 0 {
        return;
    }
    if let Some(m) = HARVESTER_METRICS.get() {
        m.items_claimed
            .with_label_values(&[worker])
            .inc_by(count as f64);
    }
}

/// Record the outcome of one processed item
pub fn record_item_outcome(worker: &str, outcome: &str) {
    if let Some(m) = HARVESTER_METRICS.get() {
        m.item_outcomes.with_label_values(&[worker, outcome]).inc();
    }
}

/// Record leases cleared by a release operation
pub fn record_released(scope: &str, count: usize) {
    if count == 0 {
        return;
    }
    if let Some(m) = HARVESTER_METRICS.get() {
        m.leases_released
            .with_label_values(&[scope])
            .inc_by(count as f64);
    }
}

/// Record leases reclaimed after expiring
pub fn record_reclaimed(count: usize) {
    if count == 0 {
        return;
    }
    if let Some(m) = HARVESTER_METRICS.get() {
        m.leases_reclaimed.inc_by(count as f64);
    }
}

/// Gauge guard counting a running worker loop
pub struct ActiveWorkerGuard {
    gauge: Option<Gauge>,
}

impl Drop for ActiveWorkerGuard {
    fn drop(&mut self) {
        if let Some(gauge) = self.gauge.take() {
            gauge.dec();
        }
    }
}

/// Mark a worker loop as active until the guard is dropped
pub fn worker_started() -> ActiveWorkerGuard {
    let gauge = HARVESTER_METRICS.get().map(|m| {
        m.active_workers.inc();
        m.active_workers.clone()
    });
    ActiveWorkerGuard { gauge }
}

/// Histogram timer guard that records duration on drop
pub struct MetricsTimer {
    timer: Option<prometheus::HistogramTimer>,
}

impl MetricsTimer {
    fn new(timer: prometheus::HistogramTimer) -> Self {
        Self { timer: Some(timer) }
    }

    /// Create a no-op timer when metrics are not initialized
    fn noop() -> Self {
        Self { timer: None }
    }
}

impl Drop for MetricsTimer {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.stop_and_record();
        }
    }
}

/// Start a batch timer (returns a timer handle)
pub fn start_batch_timer(worker: &str) -> MetricsTimer {
    match HARVESTER_METRICS.get() {
        Some(m) => MetricsTimer::new(m.batch_duration.with_label_values(&[worker]).start_timer()),
        None => MetricsTimer::noop(),
    }
}

// ============================================================================
// Tests
// ============================================================================
