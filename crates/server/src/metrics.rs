//! Prometheus metrics export.
//!
//! The queue and aggregator record into the core metrics; this module adds
//! process-level gauges, gathers everything into one registry and writes it
//! in the text exposition format for a node-exporter style textfile collector.

use std::path::Path;
use std::time::Instant;

use once_cell::sync::Lazy;
use prometheus::{self, Encoder, IntGauge, Registry, TextEncoder};

use exploitiq_core::LifecycleService;

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

static STARTED: Lazy<Instant> = Lazy::new(Instant::now);

/// Whether the sweep loop is running (1) or stopped (0).
pub static LIFECYCLE_RUNNING: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "exploitiq_lifecycle_running",
        "Whether the lifecycle sweep loop is running",
    )
    .unwrap()
});

/// Seconds since the process started.
pub static UPTIME_SECONDS: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("exploitiq_uptime_seconds", "Seconds since process start").unwrap()
});

fn register_metrics(registry: &Registry) {
    registry
        .register(Box::new(LIFECYCLE_RUNNING.clone()))
        .unwrap();
    registry.register(Box::new(UPTIME_SECONDS.clone())).unwrap();

    for metric in exploitiq_core::metrics::all_metrics() {
        registry.register(metric).unwrap();
    }
}

/// Encode all metrics in Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap_or_default();
    String::from_utf8(buffer).unwrap_or_default()
}

/// Refresh gauges that are read from the service rather than pushed.
pub async fn collect_dynamic_metrics(service: &LifecycleService) {
    let status = service.status().await;
    LIFECYCLE_RUNNING.set(status.running as i64);
    UPTIME_SECONDS.set(STARTED.elapsed().as_secs() as i64);
}

/// Write the current metrics to `path`.
///
/// Writes to a sibling temp file first and renames it over the target, so a
/// collector never reads a partial file.
pub async fn write_textfile(path: &Path) -> std::io::Result<()> {
    let body = encode_metrics();
    let tmp = path.with_extension("prom.tmp");
    tokio::fs::write(&tmp, body).await?;
    tokio::fs::rename(&tmp, path).await
}
