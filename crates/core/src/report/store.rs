//! Report storage trait and types.

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::{FailureInfo, Report, ReportStatus};

/// Error type for report store operations.
#[derive(Debug, Error)]
pub enum ReportError {
    /// Report not found.
    #[error("Report not found: {0}")]
    NotFound(String),

    /// The update does not apply to the report's current status.
    #[error("Cannot {operation} report {report_id}: current status is {current_status}")]
    InvalidState {
        report_id: String,
        current_status: ReportStatus,
        operation: String,
    },

    /// Database error.
    #[error("Database error: {0}")]
    Database(String),
}

/// Request to create a new report.
#[derive(Debug, Clone)]
pub struct CreateReportRequest {
    /// Caller-assigned correlation key.
    pub scan_id: String,
    /// Owning product, if any.
    pub product_id: Option<String>,
    /// Request document forwarded to the analysis engine.
    pub payload: serde_json::Value,
    /// Stamp `submitted_at` on creation (the report starts out Queued).
    pub submitted: bool,
}

impl CreateReportRequest {
    /// A report submitted for analysis right away.
    pub fn submitted(scan_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            scan_id: scan_id.into(),
            product_id: None,
            payload,
            submitted: true,
        }
    }

    /// Attach the report to a product.
    pub fn with_product(mut self, product_id: impl Into<String>) -> Self {
        self.product_id = Some(product_id.into());
        self
    }
}

/// A single lifecycle write.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusUpdate {
    /// Handed to the analysis engine. Only applies while the report is still Queued.
    Sent { at: DateTime<Utc> },
    /// Result delivered. Clears any previous error, including an expiry.
    Completed { at: DateTime<Utc> },
    /// Dispatch or processing failure.
    Failed(FailureInfo),
    /// Dispatch deadline passed. Only applies while the report is still Sent.
    Expired { message: String },
}

impl StatusUpdate {
    pub fn name(&self) -> &'static str {
        match self {
            StatusUpdate::Sent { .. } => "send",
            StatusUpdate::Completed { .. } => "complete",
            StatusUpdate::Failed(_) => "fail",
            StatusUpdate::Expired { .. } => "expire",
        }
    }
}

/// Filter for querying reports.
#[derive(Debug, Clone, Default)]
pub struct ReportFilter {
    /// Filter by derived status.
    pub status: Option<ReportStatus>,
    /// Filter by owning product.
    pub product_id: Option<String>,
    /// Filter by correlation key.
    pub scan_id: Option<String>,
    /// Maximum number of results.
    pub limit: i64,
    /// Offset for pagination.
    pub offset: i64,
}

impl ReportFilter {
    /// Create a new filter with defaults.
    pub fn new() -> Self {
        Self {
            limit: 100,
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: ReportStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_product_id(mut self, product_id: impl Into<String>) -> Self {
        self.product_id = Some(product_id.into());
        self
    }

    pub fn with_scan_id(mut self, scan_id: impl Into<String>) -> Self {
        self.scan_id = Some(scan_id.into());
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }
}

/// Trait for report storage backends.
///
/// Every call is a point operation or a filtered scan. Nothing here spans
/// calls transactionally; consumers tolerate re-scans instead.
pub trait ReportStore: Send + Sync {
    /// Persist a new report.
    fn create(&self, request: CreateReportRequest) -> Result<Report, ReportError>;

    /// Get a report by ID.
    fn get(&self, id: &str) -> Result<Option<Report>, ReportError>;

    /// List reports matching the filter, in submission order.
    fn list(&self, filter: &ReportFilter) -> Result<Vec<Report>, ReportError>;

    /// Count reports matching the filter.
    fn count(&self, filter: &ReportFilter) -> Result<i64, ReportError>;

    /// Apply a lifecycle write and return the updated report.
    fn update_status(&self, id: &str, update: StatusUpdate) -> Result<Report, ReportError>;

    /// Permanently delete a report, returning it.
    fn delete(&self, id: &str) -> Result<Report, ReportError>;

    /// Reports with the given derived status, oldest submission first.
    fn find_by_status(&self, status: ReportStatus, limit: i64) -> Result<Vec<Report>, ReportError> {
        self.list(&ReportFilter::new().with_status(status).with_limit(limit))
    }

    /// Every report belonging to a product.
    fn find_by_product_id(&self, product_id: &str) -> Result<Vec<Report>, ReportError> {
        self.list(&ReportFilter::new().with_product_id(product_id).with_limit(-1))
    }
}
