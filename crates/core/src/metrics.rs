//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Admission queue (occupancy, dispatches, expirations, rejections)
//! - Completion aggregation

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts};

// =============================================================================
// Admission Queue - Occupancy
// =============================================================================

/// Reports currently holding an active slot.
pub static QUEUE_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "exploitiq_queue_active",
        "Number of reports currently dispatched and awaiting a result",
    )
    .unwrap()
});

/// Reports waiting for a free slot.
pub static QUEUE_PENDING: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "exploitiq_queue_pending",
        "Number of reports waiting in the pending queue",
    )
    .unwrap()
});

/// Configured active slot limit.
pub static QUEUE_MAX_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("exploitiq_queue_max_active", "Configured maximum active reports").unwrap()
});

/// Configured pending capacity.
pub static QUEUE_MAX_SIZE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("exploitiq_queue_max_size", "Configured pending queue capacity").unwrap()
});

// =============================================================================
// Admission Queue - Flow
// =============================================================================

/// Dispatch attempts by result.
pub static DISPATCHES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("exploitiq_dispatches_total", "Total dispatch attempts"),
        &["result"], // "accepted", "failed"
    )
    .unwrap()
});

/// Dispatcher call duration in seconds.
pub static DISPATCH_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "exploitiq_dispatch_duration_seconds",
            "Duration of dispatcher calls",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        &["result"],
    )
    .unwrap()
});

/// Pending reports promoted into an active slot by the sweep.
pub static PROMOTIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "exploitiq_promotions_total",
        "Total pending reports promoted by the sweep",
    )
    .unwrap()
});

/// Active reports reclaimed after their deadline.
pub static EXPIRATIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "exploitiq_expirations_total",
        "Total dispatched reports expired without a result",
    )
    .unwrap()
});

/// Submissions refused because the pending queue was full.
pub static QUEUE_REJECTIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "exploitiq_queue_rejections_total",
        "Total submissions rejected with queue exceeded",
    )
    .unwrap()
});

// =============================================================================
// Completion Aggregation
// =============================================================================

/// Products stamped as completed.
pub static PRODUCTS_COMPLETED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "exploitiq_products_completed_total",
        "Total products converged to completed",
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Occupancy
        Box::new(QUEUE_ACTIVE.clone()),
        Box::new(QUEUE_PENDING.clone()),
        Box::new(QUEUE_MAX_ACTIVE.clone()),
        Box::new(QUEUE_MAX_SIZE.clone()),
        // Flow
        Box::new(DISPATCHES_TOTAL.clone()),
        Box::new(DISPATCH_DURATION.clone()),
        Box::new(PROMOTIONS_TOTAL.clone()),
        Box::new(EXPIRATIONS_TOTAL.clone()),
        Box::new(QUEUE_REJECTIONS_TOTAL.clone()),
        // Aggregation
        Box::new(PRODUCTS_COMPLETED.clone()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_metrics_register_once() {
        let registry = prometheus::Registry::new();
        for metric in all_metrics() {
            registry.register(metric).unwrap();
        }
        DISPATCHES_TOTAL.with_label_values(&["accepted"]).inc();
        QUEUE_MAX_ACTIVE.set(5);

        let names: Vec<String> = registry
            .gather()
            .iter()
            .map(|family| family.get_name().to_string())
            .collect();
        assert!(names.contains(&"exploitiq_dispatches_total".to_string()));
        assert!(names.contains(&"exploitiq_queue_max_active".to_string()));
    }
}
