use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection};

use crate::db::{format_timestamp, parse_timestamp};

use super::{EventError, EventFilter, EventRecord, EventStore, LifecycleEvent};

/// SQLite-backed lifecycle event store
pub struct SqliteEventStore {
    conn: Mutex<Connection>,
}

impl SqliteEventStore {
    /// Create a new SQLite event store, creating the database file and tables if needed
    pub fn new(path: &Path) -> Result<Self, EventError> {
        let conn = Connection::open(path).map_err(|e| EventError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory SQLite event store (useful for testing)
    pub fn in_memory() -> Result<Self, EventError> {
        let conn = Connection::open_in_memory().map_err(|e| EventError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), EventError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS lifecycle_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                event_type TEXT NOT NULL,
                report_id TEXT,
                product_id TEXT,
                data TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_lifecycle_events_timestamp ON lifecycle_events(timestamp);
            CREATE INDEX IF NOT EXISTS idx_lifecycle_events_report_id ON lifecycle_events(report_id);
            CREATE INDEX IF NOT EXISTS idx_lifecycle_events_product_id ON lifecycle_events(product_id);
            CREATE INDEX IF NOT EXISTS idx_lifecycle_events_event_type ON lifecycle_events(event_type);
            "#,
        )
        .map_err(|e| EventError::Database(e.to_string()))?;

        Ok(())
    }

    fn build_where_clause(filter: &EventFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(ref report_id) = filter.report_id {
            conditions.push("report_id = ?");
            params.push(Box::new(report_id.clone()));
        }

        if let Some(ref product_id) = filter.product_id {
            conditions.push("product_id = ?");
            params.push(Box::new(product_id.clone()));
        }

        if let Some(ref event_type) = filter.event_type {
            conditions.push("event_type = ?");
            params.push(Box::new(event_type.clone()));
        }

        if let Some(ref from) = filter.from {
            conditions.push("timestamp >= ?");
            params.push(Box::new(format_timestamp(from)));
        }

        if let Some(ref to) = filter.to {
            conditions.push("timestamp <= ?");
            params.push(Box::new(format_timestamp(to)));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }
}

impl EventStore for SqliteEventStore {
    fn insert(&self, record: &EventRecord) -> Result<i64, EventError> {
        let conn = self.conn.lock().unwrap();

        let data_json = serde_json::to_string(&record.data)
            .map_err(|e| EventError::Serialization(e.to_string()))?;

        conn.execute(
            "INSERT INTO lifecycle_events (timestamp, event_type, report_id, product_id, data) VALUES (?, ?, ?, ?, ?)",
            params![
                format_timestamp(&record.timestamp),
                record.event_type,
                record.report_id,
                record.product_id,
                data_json,
            ],
        )
        .map_err(|e| EventError::Database(e.to_string()))?;

        Ok(conn.last_insert_rowid())
    }

    fn query(&self, filter: &EventFilter) -> Result<Vec<EventRecord>, EventError> {
        let conn = self.conn.lock().unwrap();

        let (where_clause, params) = Self::build_where_clause(filter);

        let sql = format!(
            "SELECT id, timestamp, event_type, report_id, product_id, data FROM lifecycle_events {} ORDER BY id ASC LIMIT ? OFFSET ?",
            where_clause
        );

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| EventError::Database(e.to_string()))?;

        let mut all_params: Vec<Box<dyn rusqlite::ToSql>> = params;
        all_params.push(Box::new(filter.limit));
        all_params.push(Box::new(filter.offset));

        let param_refs: Vec<&dyn rusqlite::ToSql> = all_params.iter().map(|p| p.as_ref()).collect();

        let rows = stmt
            .query_map(param_refs.as_slice(), |row| {
                let id: i64 = row.get(0)?;
                let timestamp_str: String = row.get(1)?;
                let event_type: String = row.get(2)?;
                let report_id: Option<String> = row.get(3)?;
                let product_id: Option<String> = row.get(4)?;
                let data_json: String = row.get(5)?;

                Ok((id, timestamp_str, event_type, report_id, product_id, data_json))
            })
            .map_err(|e| EventError::Database(e.to_string()))?;

        let mut records = Vec::new();
        for row_result in rows {
            let (id, timestamp_str, event_type, report_id, product_id, data_json) =
                row_result.map_err(|e| EventError::Database(e.to_string()))?;

            let timestamp = parse_timestamp(&timestamp_str).ok_or_else(|| {
                EventError::Database(format!("Invalid timestamp: {}", timestamp_str))
            })?;

            let data: LifecycleEvent = serde_json::from_str(&data_json)
                .map_err(|e| EventError::Serialization(e.to_string()))?;

            records.push(EventRecord {
                id,
                timestamp,
                event_type,
                report_id,
                product_id,
                data,
            });
        }

        Ok(records)
    }

    fn count(&self, filter: &EventFilter) -> Result<i64, EventError> {
        let conn = self.conn.lock().unwrap();

        let (where_clause, params) = Self::build_where_clause(filter);

        let sql = format!("SELECT COUNT(*) FROM lifecycle_events {}", where_clause);

        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let count: i64 = conn
            .query_row(&sql, param_refs.as_slice(), |row| row.get(0))
            .map_err(|e| EventError::Database(e.to_string()))?;

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;
    use crate::report::ReportStatus;

    fn record(event: LifecycleEvent) -> EventRecord {
        EventRecord {
            id: 0,
            timestamp: Utc::now(),
            event_type: event.event_type().to_string(),
            report_id: event.report_id().map(String::from),
            product_id: event.product_id().map(String::from),
            data: event,
        }
    }

    fn status_changed(report_id: &str, product_id: Option<&str>) -> LifecycleEvent {
        LifecycleEvent::ReportStatusChanged {
            report_id: report_id.to_string(),
            product_id: product_id.map(String::from),
            from: ReportStatus::Sent,
            to: ReportStatus::Completed,
            reason: None,
        }
    }

    #[test]
    fn test_insert_and_query() {
        let store = SqliteEventStore::in_memory().unwrap();

        let id = store
            .insert(&record(status_changed("r-1", Some("prod-1"))))
            .unwrap();
        assert!(id > 0);

        let records = store.query(&EventFilter::new()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].event_type, "report_status_changed");
        assert_eq!(records[0].report_id.as_deref(), Some("r-1"));
        assert_eq!(records[0].product_id.as_deref(), Some("prod-1"));
        assert_eq!(records[0].data, status_changed("r-1", Some("prod-1")));
    }

    #[test]
    fn test_filters() {
        let store = SqliteEventStore::in_memory().unwrap();
        store.insert(&record(status_changed("r-1", Some("prod-1")))).unwrap();
        store.insert(&record(status_changed("r-2", Some("prod-1")))).unwrap();
        store.insert(&record(status_changed("r-3", None))).unwrap();
        store
            .insert(&record(LifecycleEvent::ProductCompleted {
                product_id: "prod-1".to_string(),
                completed_at: Utc::now(),
            }))
            .unwrap();

        let by_report = EventFilter::new().with_report_id("r-2");
        assert_eq!(store.count(&by_report).unwrap(), 1);

        let by_product = EventFilter::new().with_product_id("prod-1");
        let records = store.query(&by_product).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[2].event_type, "product_completed");

        let by_type = EventFilter::new().with_event_type("product_completed");
        assert_eq!(store.count(&by_type).unwrap(), 1);

        let limited = store.query(&EventFilter::new().with_limit(2)).unwrap();
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[0].report_id.as_deref(), Some("r-1"));
    }

    #[test]
    fn test_time_range_filter() {
        let store = SqliteEventStore::in_memory().unwrap();
        let mut old = record(status_changed("r-old", None));
        old.timestamp = Utc::now() - Duration::hours(2);
        store.insert(&old).unwrap();
        store.insert(&record(status_changed("r-new", None))).unwrap();

        let recent = EventFilter::new()
            .with_time_range(Some(Utc::now() - Duration::hours(1)), None);
        let records = store.query(&recent).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].report_id.as_deref(), Some("r-new"));
    }
}
