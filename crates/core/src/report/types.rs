//! Core report data types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::status::{derive_status, ReportStatus};

/// Failure kind written when a dispatched report gets no answer in time.
pub const EXPIRED_KIND: &str = "expired";

/// Failure kind written when the analysis engine refuses a dispatch.
pub const DISPATCH_ERROR_KIND: &str = "dispatch-error";

/// Failure recorded on a report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FailureInfo {
    /// Machine-readable kind (`expired`, `dispatch-error`, ...).
    pub kind: String,
    /// Human-readable description.
    pub message: String,
}

impl FailureInfo {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Failure for a dispatch that outlived its deadline.
    pub fn expired(message: impl Into<String>) -> Self {
        Self::new(EXPIRED_KIND, message)
    }

    pub fn is_expired(&self) -> bool {
        self.kind == EXPIRED_KIND
    }
}

/// An analysis report as persisted by the report store.
///
/// The queue and the aggregator only ever hold report ids; this struct is a
/// read snapshot, never a private copy that gets written back.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Report {
    /// Store-assigned identifier.
    pub id: String,
    /// Caller-assigned correlation key.
    pub scan_id: String,
    /// Owning product, if the report was requested as part of one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_id: Option<String>,
    /// Request document forwarded to the analysis engine.
    pub payload: serde_json::Value,
    /// When the row was created.
    pub created_at: DateTime<Utc>,
    /// When the report was submitted for analysis.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<DateTime<Utc>>,
    /// When the report was handed to the analysis engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
    /// When the analysis engine delivered its result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Failure, if dispatch or processing failed or the report expired.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<FailureInfo>,
}

impl Report {
    /// Lifecycle status derived from the raw fields.
    pub fn status(&self) -> ReportStatus {
        derive_status(self)
    }

    /// Time used when folding this report into its product's completion time.
    ///
    /// Reports that failed before producing output fall back to their
    /// submission time.
    pub fn completion_time(&self) -> Option<DateTime<Utc>> {
        self.completed_at.or(self.submitted_at)
    }
}
