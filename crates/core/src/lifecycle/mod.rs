//! Report admission control and lifecycle orchestration.
//!
//! - **Admission queue**: bounded active set plus pending FIFO, timeout sweep,
//!   startup recovery
//! - **Lifecycle service**: sweep loop and the report-mutation paths that feed
//!   the queue and the completion aggregator

mod queue;
mod service;
mod types;

pub use queue::AdmissionQueue;
pub use service::LifecycleService;
pub use types::{
    ActiveEntrySnapshot, Admission, BootstrapSummary, LifecycleError, LifecycleStatus,
    QueueError, QueueSnapshot, SweepSummary,
};
