//! SQLite-backed report store implementation.

use std::path::Path;
use std::sync::Mutex;

use chrono::{SubsecRound, Utc};
use rusqlite::{params, Connection};

use crate::db::{format_timestamp, parse_timestamp};

use super::{
    CreateReportRequest, FailureInfo, Report, ReportError, ReportFilter, ReportStatus,
    ReportStore, StatusUpdate,
};

const SELECT_COLUMNS: &str = "SELECT id, scan_id, product_id, payload, created_at, submitted_at, sent_at, completed_at, error_kind, error_message FROM reports";

/// SQLite-backed report store.
pub struct SqliteReportStore {
    conn: Mutex<Connection>,
}

impl SqliteReportStore {
    /// Create a new SQLite report store, creating the database file and tables if needed.
    pub fn new(path: &Path) -> Result<Self, ReportError> {
        let conn = Connection::open(path).map_err(|e| ReportError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory SQLite report store (useful for testing).
    pub fn in_memory() -> Result<Self, ReportError> {
        let conn =
            Connection::open_in_memory().map_err(|e| ReportError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), ReportError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS reports (
                id TEXT PRIMARY KEY,
                scan_id TEXT NOT NULL,
                product_id TEXT,
                payload TEXT NOT NULL,
                created_at TEXT NOT NULL,
                submitted_at TEXT,
                sent_at TEXT,
                completed_at TEXT,
                error_kind TEXT,
                error_message TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_reports_product_id ON reports(product_id);
            CREATE INDEX IF NOT EXISTS idx_reports_scan_id ON reports(scan_id);
            CREATE INDEX IF NOT EXISTS idx_reports_submitted_at ON reports(submitted_at);
            "#,
        )
        .map_err(|e| ReportError::Database(e.to_string()))?;

        Ok(())
    }

    /// SQL predicate equivalent to `derive_status(report) == status`.
    fn status_condition(status: ReportStatus) -> &'static str {
        match status {
            ReportStatus::Expired => "error_kind = 'expired'",
            ReportStatus::Failed => "error_kind IS NOT NULL AND error_kind != 'expired'",
            ReportStatus::Completed => "error_kind IS NULL AND completed_at IS NOT NULL",
            ReportStatus::Sent => {
                "error_kind IS NULL AND completed_at IS NULL AND sent_at IS NOT NULL"
            }
            ReportStatus::Queued => {
                "error_kind IS NULL AND completed_at IS NULL AND sent_at IS NULL AND submitted_at IS NOT NULL"
            }
            ReportStatus::Pending => {
                "error_kind IS NULL AND completed_at IS NULL AND sent_at IS NULL AND submitted_at IS NULL AND product_id IS NOT NULL"
            }
            ReportStatus::Unknown => {
                "error_kind IS NULL AND completed_at IS NULL AND sent_at IS NULL AND submitted_at IS NULL AND product_id IS NULL"
            }
        }
    }

    fn build_where_clause(filter: &ReportFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(status) = filter.status {
            conditions.push(format!("({})", Self::status_condition(status)));
        }

        if let Some(ref product_id) = filter.product_id {
            conditions.push("product_id = ?".to_string());
            params.push(Box::new(product_id.clone()));
        }

        if let Some(ref scan_id) = filter.scan_id {
            conditions.push("scan_id = ?".to_string());
            params.push(Box::new(scan_id.clone()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    fn order_clause(filter: &ReportFilter) -> &'static str {
        match filter.status {
            // In-flight reports are recovered in the order they were handed over.
            Some(ReportStatus::Sent) => "ORDER BY sent_at ASC, rowid ASC",
            _ => "ORDER BY submitted_at IS NULL, submitted_at ASC, created_at ASC, rowid ASC",
        }
    }

    fn row_to_report(row: &rusqlite::Row) -> rusqlite::Result<Report> {
        let id: String = row.get(0)?;
        let scan_id: String = row.get(1)?;
        let product_id: Option<String> = row.get(2)?;
        let payload_json: String = row.get(3)?;
        let created_at_str: String = row.get(4)?;
        let submitted_at: Option<String> = row.get(5)?;
        let sent_at: Option<String> = row.get(6)?;
        let completed_at: Option<String> = row.get(7)?;
        let error_kind: Option<String> = row.get(8)?;
        let error_message: Option<String> = row.get(9)?;

        let payload =
            serde_json::from_str(&payload_json).unwrap_or(serde_json::Value::Null);

        let created_at = parse_timestamp(&created_at_str).unwrap_or_else(Utc::now);

        let error = error_kind.map(|kind| FailureInfo {
            kind,
            message: error_message.unwrap_or_default(),
        });

        Ok(Report {
            id,
            scan_id,
            product_id,
            payload,
            created_at,
            submitted_at: submitted_at.as_deref().and_then(parse_timestamp),
            sent_at: sent_at.as_deref().and_then(parse_timestamp),
            completed_at: completed_at.as_deref().and_then(parse_timestamp),
            error,
        })
    }

    fn fetch(conn: &Connection, id: &str) -> Result<Report, ReportError> {
        let result = conn.query_row(
            &format!("{} WHERE id = ?", SELECT_COLUMNS),
            params![id],
            Self::row_to_report,
        );

        match result {
            Ok(report) => Ok(report),
            Err(rusqlite::Error::QueryReturnedNoRows) => Err(ReportError::NotFound(id.to_string())),
            Err(e) => Err(ReportError::Database(e.to_string())),
        }
    }

    /// Apply an update to the in-memory snapshot, rejecting it when it doesn't fit.
    fn apply(mut report: Report, update: StatusUpdate) -> Result<Report, ReportError> {
        match update {
            StatusUpdate::Sent { at } => {
                let current = report.status();
                if current != ReportStatus::Queued {
                    return Err(ReportError::InvalidState {
                        report_id: report.id,
                        current_status: current,
                        operation: "send".to_string(),
                    });
                }
                report.sent_at = Some(at.trunc_subsecs(6));
            }
            StatusUpdate::Completed { at } => {
                report.completed_at = Some(at.trunc_subsecs(6));
                report.error = None;
            }
            StatusUpdate::Failed(failure) => {
                report.error = Some(failure);
            }
            StatusUpdate::Expired { message } => {
                let current = report.status();
                if current != ReportStatus::Sent {
                    return Err(ReportError::InvalidState {
                        report_id: report.id,
                        current_status: current,
                        operation: "expire".to_string(),
                    });
                }
                report.error = Some(FailureInfo::expired(message));
            }
        }
        Ok(report)
    }
}

impl ReportStore for SqliteReportStore {
    fn create(&self, request: CreateReportRequest) -> Result<Report, ReportError> {
        let conn = self.conn.lock().unwrap();

        let id = uuid::Uuid::new_v4().to_string();
        // Stored with microsecond precision; keep the returned copy identical.
        let now = Utc::now().trunc_subsecs(6);
        let submitted_at = request.submitted.then_some(now);

        let payload_json = serde_json::to_string(&request.payload)
            .map_err(|e| ReportError::Database(e.to_string()))?;

        conn.execute(
            "INSERT INTO reports (id, scan_id, product_id, payload, created_at, submitted_at) VALUES (?, ?, ?, ?, ?, ?)",
            params![
                id,
                request.scan_id,
                request.product_id,
                payload_json,
                format_timestamp(&now),
                submitted_at.as_ref().map(format_timestamp),
            ],
        )
        .map_err(|e| ReportError::Database(e.to_string()))?;

        Ok(Report {
            id,
            scan_id: request.scan_id,
            product_id: request.product_id,
            payload: request.payload,
            created_at: now,
            submitted_at,
            sent_at: None,
            completed_at: None,
            error: None,
        })
    }

    fn get(&self, id: &str) -> Result<Option<Report>, ReportError> {
        let conn = self.conn.lock().unwrap();

        match Self::fetch(&conn, id) {
            Ok(report) => Ok(Some(report)),
            Err(ReportError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn list(&self, filter: &ReportFilter) -> Result<Vec<Report>, ReportError> {
        let conn = self.conn.lock().unwrap();

        let (where_clause, params) = Self::build_where_clause(filter);

        let sql = format!(
            "{} {} {} LIMIT ? OFFSET ?",
            SELECT_COLUMNS,
            where_clause,
            Self::order_clause(filter)
        );

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| ReportError::Database(e.to_string()))?;

        let mut all_params: Vec<Box<dyn rusqlite::ToSql>> = params;
        all_params.push(Box::new(filter.limit));
        all_params.push(Box::new(filter.offset));

        let param_refs: Vec<&dyn rusqlite::ToSql> = all_params.iter().map(|p| p.as_ref()).collect();

        let rows = stmt
            .query_map(param_refs.as_slice(), Self::row_to_report)
            .map_err(|e| ReportError::Database(e.to_string()))?;

        let mut reports = Vec::new();
        for row_result in rows {
            let report = row_result.map_err(|e| ReportError::Database(e.to_string()))?;
            reports.push(report);
        }

        Ok(reports)
    }

    fn count(&self, filter: &ReportFilter) -> Result<i64, ReportError> {
        let conn = self.conn.lock().unwrap();

        let (where_clause, params) = Self::build_where_clause(filter);

        let sql = format!("SELECT COUNT(*) FROM reports {}", where_clause);

        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let count: i64 = conn
            .query_row(&sql, param_refs.as_slice(), |row| row.get(0))
            .map_err(|e| ReportError::Database(e.to_string()))?;

        Ok(count)
    }

    fn update_status(&self, id: &str, update: StatusUpdate) -> Result<Report, ReportError> {
        let conn = self.conn.lock().unwrap();

        let current = Self::fetch(&conn, id)?;
        let updated = Self::apply(current, update)?;

        conn.execute(
            "UPDATE reports SET sent_at = ?, completed_at = ?, error_kind = ?, error_message = ? WHERE id = ?",
            params![
                updated.sent_at.as_ref().map(format_timestamp),
                updated.completed_at.as_ref().map(format_timestamp),
                updated.error.as_ref().map(|e| e.kind.clone()),
                updated.error.as_ref().map(|e| e.message.clone()),
                id,
            ],
        )
        .map_err(|e| ReportError::Database(e.to_string()))?;

        Ok(updated)
    }

    fn delete(&self, id: &str) -> Result<Report, ReportError> {
        let conn = self.conn.lock().unwrap();

        let report = Self::fetch(&conn, id)?;

        conn.execute("DELETE FROM reports WHERE id = ?", params![id])
            .map_err(|e| ReportError::Database(e.to_string()))?;

        Ok(report)
    }
}
