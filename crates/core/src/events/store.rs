use chrono::{DateTime, Utc};
use thiserror::Error;

use super::EventRecord;

#[derive(Debug, Error)]
pub enum EventError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Filter for querying lifecycle events
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub report_id: Option<String>,
    pub product_id: Option<String>,
    pub event_type: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: i64,
    pub offset: i64,
}

impl EventFilter {
    pub fn new() -> Self {
        Self {
            limit: 100,
            offset: 0,
            ..Default::default()
        }
    }

    pub fn with_report_id(mut self, report_id: impl Into<String>) -> Self {
        self.report_id = Some(report_id.into());
        self
    }

    pub fn with_product_id(mut self, product_id: impl Into<String>) -> Self {
        self.product_id = Some(product_id.into());
        self
    }

    pub fn with_event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn with_time_range(
        mut self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Self {
        self.from = from;
        self.to = to;
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }
}

/// Trait for lifecycle event storage
pub trait EventStore: Send + Sync {
    /// Insert an event record, returns the assigned ID
    fn insert(&self, record: &EventRecord) -> Result<i64, EventError>;

    /// Query event records, oldest first
    fn query(&self, filter: &EventFilter) -> Result<Vec<EventRecord>, EventError>;

    /// Count matching event records
    fn count(&self, filter: &EventFilter) -> Result<i64, EventError>;
}
