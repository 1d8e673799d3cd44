use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub dispatcher: DispatcherConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("exploitiq.db")
}

/// Admission queue configuration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct QueueConfig {
    /// Maximum reports dispatched and awaiting a result at once (must be > 0).
    #[serde(default = "default_max_active")]
    pub max_active: usize,
    /// Pending queue capacity.
    #[serde(default = "default_max_size")]
    pub max_size: usize,
    /// Per-dispatch deadline in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Seconds between sweeps.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Re-track reports left Sent by a previous run at startup.
    #[serde(default = "default_recover_sent")]
    pub recover_sent: bool,
}

impl QueueConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_active: default_max_active(),
            max_size: default_max_size(),
            timeout_secs: default_timeout_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            recover_sent: default_recover_sent(),
        }
    }
}

fn default_max_active() -> usize {
    5
}

fn default_max_size() -> usize {
    100
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_sweep_interval_secs() -> u64 {
    10
}

fn default_recover_sent() -> bool {
    true
}

/// Downstream analysis engine configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DispatcherConfig {
    /// Endpoint that accepts analysis requests (e.g., "http://localhost:8080/scan")
    pub url: String,
    /// Request timeout in seconds (default: 30)
    #[serde(default = "default_dispatcher_timeout")]
    pub timeout_secs: u32,
    /// Optional bearer token sent with each request
    #[serde(default)]
    pub token: Option<String>,
}

fn default_dispatcher_timeout() -> u32 {
    30
}

/// Lifecycle event pipeline configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EventsConfig {
    /// Channel capacity between emitters and the writer
    #[serde(default = "default_events_buffer")]
    pub buffer_size: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_events_buffer(),
        }
    }
}

fn default_events_buffer() -> usize {
    1000
}

/// Metrics export configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MetricsConfig {
    /// Write Prometheus text exposition to this file after each sweep
    /// (node_exporter textfile collector). Disabled when unset.
    #[serde(default)]
    pub textfile_path: Option<PathBuf>,
}

/// Sanitized config for logging and status output (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub database: DatabaseConfig,
    pub queue: QueueConfig,
    pub dispatcher: SanitizedDispatcherConfig,
    pub events: EventsConfig,
    pub metrics: MetricsConfig,
}

/// Sanitized dispatcher config (token hidden)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedDispatcherConfig {
    pub url: String,
    pub timeout_secs: u32,
    pub token_configured: bool,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            database: config.database.clone(),
            queue: config.queue.clone(),
            dispatcher: SanitizedDispatcherConfig {
                url: config.dispatcher.url.clone(),
                timeout_secs: config.dispatcher.timeout_secs,
                token_configured: config
                    .dispatcher
                    .token
                    .as_ref()
                    .is_some_and(|t| !t.is_empty()),
            },
            events: config.events.clone(),
            metrics: config.metrics.clone(),
        }
    }
}
