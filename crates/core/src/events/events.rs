use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::report::ReportStatus;

/// Lifecycle event types
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LifecycleEvent {
    // System events
    ServiceStarted {
        version: String,
        config_hash: String,
    },
    ServiceStopped {
        reason: String,
    },

    // Report lifecycle
    ReportStatusChanged {
        report_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        product_id: Option<String>,
        from: ReportStatus,
        to: ReportStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// Report was permanently deleted.
    ReportDeleted {
        report_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        product_id: Option<String>,
        previous_status: ReportStatus,
    },
    /// Admission refused because the pending queue is full.
    QueueRejected {
        report_id: String,
        max_size: usize,
    },

    // Product lifecycle
    ProductCompleted {
        product_id: String,
        completed_at: DateTime<Utc>,
    },
}

impl LifecycleEvent {
    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ServiceStarted { .. } => "service_started",
            Self::ServiceStopped { .. } => "service_stopped",
            Self::ReportStatusChanged { .. } => "report_status_changed",
            Self::ReportDeleted { .. } => "report_deleted",
            Self::QueueRejected { .. } => "queue_rejected",
            Self::ProductCompleted { .. } => "product_completed",
        }
    }

    /// Get the report ID if this event is associated with a report
    pub fn report_id(&self) -> Option<&str> {
        match self {
            Self::ReportStatusChanged { report_id, .. }
            | Self::ReportDeleted { report_id, .. }
            | Self::QueueRejected { report_id, .. } => Some(report_id),
            _ => None,
        }
    }

    /// Get the product ID if this event is associated with a product
    pub fn product_id(&self) -> Option<&str> {
        match self {
            Self::ReportStatusChanged { product_id, .. }
            | Self::ReportDeleted { product_id, .. } => product_id.as_deref(),
            Self::ProductCompleted { product_id, .. } => Some(product_id),
            _ => None,
        }
    }
}

/// A stored lifecycle event record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub report_id: Option<String>,
    pub product_id: Option<String>,
    pub data: LifecycleEvent,
}
