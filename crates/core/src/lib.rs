pub mod clock;
pub mod config;
mod db;
pub mod dispatcher;
pub mod events;
pub mod lifecycle;
pub mod metrics;
pub mod product;
pub mod report;
pub mod testing;

pub use clock::{Clock, SystemClock};
pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, QueueConfig,
    SanitizedConfig,
};
pub use dispatcher::{DispatchError, Dispatcher, HttpDispatcher};
pub use events::{
    create_event_system, EventHandle, EventStore, EventWriter, LifecycleEvent, SqliteEventStore,
};
pub use lifecycle::{
    Admission, AdmissionQueue, LifecycleError, LifecycleService, QueueError, QueueSnapshot,
    SweepSummary,
};
pub use product::{
    CompletionAggregator, Product, ProductStore, ProductSummary, SqliteProductStore,
};
pub use report::{
    derive_status, CreateReportRequest, Report, ReportStatus, ReportStore, SqliteReportStore,
};
