//! Lifecycle status derivation.
//!
//! Status is never stored. It is recomputed from the raw report fields by
//! [`derive_status`], which both the admission queue and the completion
//! aggregator call so they can never disagree on classification.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::types::Report;

/// Canonical lifecycle status of a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    /// No lifecycle field is set.
    Unknown,
    /// Belongs to a product but has not been submitted yet.
    Pending,
    /// Submitted, waiting for a free dispatch slot.
    Queued,
    /// Handed to the analysis engine, waiting for its result.
    Sent,
    /// The analysis engine delivered a result.
    Completed,
    /// Dispatch or processing failed.
    Failed,
    /// No result arrived before the dispatch deadline.
    Expired,
}

impl ReportStatus {
    /// Every status, in precedence-independent declaration order.
    pub const ALL: [ReportStatus; 7] = [
        ReportStatus::Unknown,
        ReportStatus::Pending,
        ReportStatus::Queued,
        ReportStatus::Sent,
        ReportStatus::Completed,
        ReportStatus::Failed,
        ReportStatus::Expired,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Unknown => "unknown",
            ReportStatus::Pending => "pending",
            ReportStatus::Queued => "queued",
            ReportStatus::Sent => "sent",
            ReportStatus::Completed => "completed",
            ReportStatus::Failed => "failed",
            ReportStatus::Expired => "expired",
        }
    }

    /// Completed, Failed and Expired admit no further transition.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReportStatus::Completed | ReportStatus::Failed | ReportStatus::Expired
        )
    }

    /// Statuses that keep a product in the "analysing" state.
    pub fn is_in_progress(&self) -> bool {
        matches!(
            self,
            ReportStatus::Pending | ReportStatus::Queued | ReportStatus::Sent
        )
    }
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ReportStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown report status: {}", s))
    }
}

/// Derive the lifecycle status of a report. First match wins:
///
/// 1. error of kind `expired` -> Expired
/// 2. any other error -> Failed
/// 3. `completed_at` -> Completed
/// 4. `sent_at` -> Sent
/// 5. `submitted_at` -> Queued
/// 6. `product_id` -> Pending
/// 7. otherwise Unknown
pub fn derive_status(report: &Report) -> ReportStatus {
    if let Some(error) = &report.error {
        if error.is_expired() {
            return ReportStatus::Expired;
        }
        return ReportStatus::Failed;
    }
    if report.completed_at.is_some() {
        return ReportStatus::Completed;
    }
    if report.sent_at.is_some() {
        return ReportStatus::Sent;
    }
    if report.submitted_at.is_some() {
        return ReportStatus::Queued;
    }
    if report.product_id.is_some() {
        return ReportStatus::Pending;
    }
    ReportStatus::Unknown
}
