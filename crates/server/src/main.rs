mod metrics;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use exploitiq_core::{
    create_event_system, load_config, validate_config, AdmissionQueue, Clock,
    CompletionAggregator, Dispatcher, EventStore, HttpDispatcher, LifecycleEvent,
    LifecycleService, ProductStore, ReportStore, SanitizedConfig, SqliteEventStore,
    SqliteProductStore, SqliteReportStore, SystemClock,
};

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// How often the metrics textfile is rewritten
const METRICS_WRITE_INTERVAL: Duration = Duration::from_secs(15);

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Determine config path
    let config_path = std::env::var("EXPLOITIQ_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    // Load configuration
    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    // Validate configuration
    validate_config(&config).context("Configuration validation failed")?;

    info!("Configuration loaded successfully");
    info!("Database path: {:?}", config.database.path);
    info!("Analysis engine: {}", config.dispatcher.url);

    // Compute config hash for the event log (token excluded)
    let sanitized = SanitizedConfig::from(&config);
    let config_json = serde_json::to_string(&sanitized).unwrap_or_default();
    let config_hash = format!("{:x}", Sha256::digest(config_json.as_bytes()));
    let config_hash_short = &config_hash[..16];

    // Create SQLite stores
    let report_store: Arc<dyn ReportStore> = Arc::new(
        SqliteReportStore::new(&config.database.path).context("Failed to create report store")?,
    );
    let product_store: Arc<dyn ProductStore> = Arc::new(
        SqliteProductStore::new(&config.database.path)
            .context("Failed to create product store")?,
    );
    let event_store: Arc<dyn EventStore> = Arc::new(
        SqliteEventStore::new(&config.database.path).context("Failed to create event store")?,
    );
    info!("Stores initialized");

    // Create event system
    let (event_handle, event_writer) =
        create_event_system(Arc::clone(&event_store), config.events.buffer_size);

    // Spawn event writer task
    let writer_handle = tokio::spawn(event_writer.run());

    event_handle
        .emit(LifecycleEvent::ServiceStarted {
            version: VERSION.to_string(),
            config_hash: config_hash_short.to_string(),
        })
        .await;

    // Create analysis engine client
    let dispatcher: Arc<dyn Dispatcher> = Arc::new(
        HttpDispatcher::new(config.dispatcher.clone())
            .context("Failed to create analysis engine client")?,
    );
    info!("Using dispatcher: {}", dispatcher.name());

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let aggregator = Arc::new(CompletionAggregator::new(
        Arc::clone(&report_store),
        Arc::clone(&product_store),
        Some(event_handle.clone()),
    ));

    let queue = Arc::new(AdmissionQueue::new(
        config.queue.clone(),
        Arc::clone(&report_store),
        dispatcher,
        Arc::clone(&aggregator),
        clock,
        Some(event_handle.clone()),
    ));

    let service = Arc::new(LifecycleService::new(
        queue,
        aggregator,
        Arc::clone(&report_store),
        Some(event_handle.clone()),
    ));

    if let Some(summary) = service
        .start()
        .await
        .context("Failed to start lifecycle service")?
    {
        info!(
            pending = summary.pending,
            active = summary.active,
            untracked = summary.untracked,
            "Recovered queue state from store"
        );
    }

    // Periodically export metrics if configured
    let metrics_task = config.metrics.textfile_path.clone().map(|path| {
        info!("Writing metrics to {:?}", path);
        let service = Arc::clone(&service);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(METRICS_WRITE_INTERVAL);
            loop {
                ticker.tick().await;
                metrics::collect_dynamic_metrics(&service).await;
                if let Err(e) = metrics::write_textfile(&path).await {
                    warn!("Failed to write metrics textfile {:?}: {}", path, e);
                }
            }
        })
    });

    info!(version = VERSION, "exploitiq running");

    shutdown_signal().await;
    info!("Shutting down...");

    service.stop().await;

    if let Some(task) = metrics_task {
        task.abort();
        let _ = task.await;
    }

    event_handle
        .emit(LifecycleEvent::ServiceStopped {
            reason: "graceful_shutdown".to_string(),
        })
        .await;

    // Every EventHandle clone must go before the writer sees its channel close.
    // The service owns the queue and aggregator, which hold the remaining clones.
    drop(service);
    drop(event_handle);

    let _ = writer_handle.await;
    info!("Event writer stopped");

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
