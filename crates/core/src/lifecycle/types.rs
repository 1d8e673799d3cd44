//! Types for the admission queue and lifecycle service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::product::AggregatorError;
use crate::report::ReportError;

/// Errors surfaced by queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Pending queue is at capacity. Nothing was mutated; retry later.
    #[error("queue exceeded: pending capacity of {max_size} reached")]
    QueueExceeded { max_size: usize },

    /// The report is already active, in flight or pending.
    #[error("report already queued: {0}")]
    Duplicate(String),

    /// Bootstrap was called after the queue was bootstrapped or had admitted reports.
    #[error("queue already initialized")]
    AlreadyInitialized,

    /// Report store error.
    #[error("report store error: {0}")]
    Store(#[from] ReportError),
}

/// Errors surfaced by the lifecycle service.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Report not found.
    #[error("report not found: {0}")]
    ReportNotFound(String),

    /// Admission failed.
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// Report store error.
    #[error("report store error: {0}")]
    Report(#[from] ReportError),

    /// Aggregation error.
    #[error("aggregation error: {0}")]
    Aggregator(#[from] AggregatorError),
}

impl LifecycleError {
    /// Whether the caller should back off and retry (maps to "too many requests").
    pub fn is_backpressure(&self) -> bool {
        matches!(self, Self::Queue(QueueError::QueueExceeded { .. }))
    }
}

/// Outcome of admitting a report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Admission {
    /// Handed to the analysis engine; holds an active slot.
    Dispatched,
    /// Waiting in the pending queue for a free slot.
    Deferred,
    /// The engine refused the report; it is now Failed and holds no slot.
    DispatchFailed { reason: String },
}

/// What one sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepSummary {
    /// Active entries reclaimed as Expired.
    pub expired: usize,
    /// Pending reports dispatched successfully.
    pub promoted: usize,
    /// Pending reports whose dispatch was refused.
    pub dispatch_failed: usize,
    /// Pending ids skipped because the report was deleted or no longer Queued.
    pub dropped: usize,
}

impl SweepSummary {
    pub fn is_idle(&self) -> bool {
        *self == Self::default()
    }
}

/// What bootstrap restored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapSummary {
    /// Queued reports appended to pending.
    pub pending: usize,
    /// Sent reports re-tracked as active.
    pub active: usize,
    /// Sent reports that did not fit into `max_active`.
    pub untracked: usize,
}

/// An active entry as seen from outside the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveEntrySnapshot {
    pub report_id: String,
    pub dispatched_at: DateTime<Utc>,
}

/// Point-in-time copy of the queue state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    /// Active entries in dispatch order.
    pub active: Vec<ActiveEntrySnapshot>,
    /// Dispatch calls currently in flight.
    pub in_flight: usize,
    /// Pending ids in FIFO order.
    pub pending: Vec<String>,
    pub max_active: usize,
    pub max_size: usize,
}

impl QueueSnapshot {
    pub fn active_ids(&self) -> Vec<String> {
        self.active.iter().map(|e| e.report_id.clone()).collect()
    }
}

/// Current status of the lifecycle service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LifecycleStatus {
    /// Whether the sweep loop is running.
    pub running: bool,
    /// Reports holding an active slot.
    pub active: usize,
    /// Reports waiting for a slot.
    pub pending: usize,
    pub max_active: usize,
    pub max_size: usize,
}
