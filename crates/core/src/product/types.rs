//! Product aggregate types.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::report::ReportStatus;

/// A component of a product that could not be submitted for analysis.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FailedComponent {
    /// Image name of the component.
    pub image_name: String,
    /// Image version or tag, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_version: Option<String>,
    /// Why submission failed.
    pub error: String,
}

/// A product groups the reports requested for each of its components.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Product {
    /// External product identifier.
    pub id: String,
    pub name: String,
    pub version: String,
    /// When the product analysis was requested.
    pub submitted_at: DateTime<Utc>,
    /// Write-once: when every member report reached a terminal status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Number of component reports submitted.
    pub submitted_count: u32,
    /// Components that never made it to a report.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub submission_failures: Vec<FailedComponent>,
}

/// Display state of a product, derived from its members.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProductState {
    /// At least one member is Pending, Queued or Sent.
    Analysing,
    /// Every member is terminal.
    Completed,
}

impl ProductState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductState::Analysing => "analysing",
            ProductState::Completed => "completed",
        }
    }
}

/// Member status breakdown for one product.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProductSummary {
    pub product_id: String,
    pub state: ProductState,
    /// Number of member reports per derived status.
    pub status_counts: BTreeMap<ReportStatus, usize>,
}

impl ProductSummary {
    /// Build a summary from member statuses.
    pub fn from_statuses(
        product_id: impl Into<String>,
        statuses: impl IntoIterator<Item = ReportStatus>,
    ) -> Self {
        let mut status_counts = BTreeMap::new();
        for status in statuses {
            *status_counts.entry(status).or_insert(0) += 1;
        }

        let analysing = status_counts.keys().any(|s: &ReportStatus| s.is_in_progress());
        Self {
            product_id: product_id.into(),
            state: if analysing {
                ProductState::Analysing
            } else {
                ProductState::Completed
            },
            status_counts,
        }
    }

    pub fn total(&self) -> usize {
        self.status_counts.values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_counts_and_state() {
        let summary = ProductSummary::from_statuses(
            "prod-1",
            [
                ReportStatus::Completed,
                ReportStatus::Completed,
                ReportStatus::Sent,
                ReportStatus::Failed,
            ],
        );
        assert_eq!(summary.state, ProductState::Analysing);
        assert_eq!(summary.status_counts[&ReportStatus::Completed], 2);
        assert_eq!(summary.total(), 4);
    }

    #[test]
    fn test_summary_all_terminal_is_completed() {
        let summary = ProductSummary::from_statuses(
            "prod-1",
            [ReportStatus::Completed, ReportStatus::Expired],
        );
        assert_eq!(summary.state, ProductState::Completed);
    }

    #[test]
    fn test_summary_serializes_status_names() {
        let summary = ProductSummary::from_statuses("prod-1", [ReportStatus::Queued]);
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["state"], "analysing");
        assert_eq!(json["status_counts"]["queued"], 1);
    }
}
