//! SQLite-backed product store implementation.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, SubsecRound, Utc};
use rusqlite::{params, Connection};

use crate::db::{format_timestamp, parse_timestamp};

use super::{CreateProductRequest, FailedComponent, Product, ProductError, ProductStore};

const SELECT_COLUMNS: &str = "SELECT id, name, version, submitted_at, completed_at, submitted_count, submission_failures FROM products";

/// SQLite-backed product store.
pub struct SqliteProductStore {
    conn: Mutex<Connection>,
}

impl SqliteProductStore {
    /// Create a new SQLite product store, creating the database file and tables if needed.
    pub fn new(path: &Path) -> Result<Self, ProductError> {
        let conn = Connection::open(path).map_err(|e| ProductError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory SQLite product store (useful for testing).
    pub fn in_memory() -> Result<Self, ProductError> {
        let conn =
            Connection::open_in_memory().map_err(|e| ProductError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), ProductError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS products (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                version TEXT NOT NULL,
                submitted_at TEXT NOT NULL,
                completed_at TEXT,
                submitted_count INTEGER NOT NULL DEFAULT 0,
                submission_failures TEXT NOT NULL DEFAULT '[]'
            );

            CREATE INDEX IF NOT EXISTS idx_products_submitted_at ON products(submitted_at);
            "#,
        )
        .map_err(|e| ProductError::Database(e.to_string()))?;

        Ok(())
    }

    fn row_to_product(row: &rusqlite::Row) -> rusqlite::Result<Product> {
        let id: String = row.get(0)?;
        let name: String = row.get(1)?;
        let version: String = row.get(2)?;
        let submitted_at_str: String = row.get(3)?;
        let completed_at: Option<String> = row.get(4)?;
        let submitted_count: u32 = row.get(5)?;
        let failures_json: String = row.get(6)?;

        let submission_failures: Vec<FailedComponent> =
            serde_json::from_str(&failures_json).unwrap_or_default();

        Ok(Product {
            id,
            name,
            version,
            submitted_at: parse_timestamp(&submitted_at_str).unwrap_or_else(Utc::now),
            completed_at: completed_at.as_deref().and_then(parse_timestamp),
            submitted_count,
            submission_failures,
        })
    }

    fn fetch(conn: &Connection, id: &str) -> Result<Product, ProductError> {
        let result = conn.query_row(
            &format!("{} WHERE id = ?", SELECT_COLUMNS),
            params![id],
            Self::row_to_product,
        );

        match result {
            Ok(product) => Ok(product),
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                Err(ProductError::NotFound(id.to_string()))
            }
            Err(e) => Err(ProductError::Database(e.to_string())),
        }
    }
}

impl ProductStore for SqliteProductStore {
    fn create(&self, request: CreateProductRequest) -> Result<Product, ProductError> {
        let conn = self.conn.lock().unwrap();

        let now = Utc::now().trunc_subsecs(6);
        let failures_json = serde_json::to_string(&request.submission_failures)
            .map_err(|e| ProductError::Database(e.to_string()))?;

        let result = conn.execute(
            "INSERT INTO products (id, name, version, submitted_at, submitted_count, submission_failures) VALUES (?, ?, ?, ?, ?, ?)",
            params![
                request.id,
                request.name,
                request.version,
                format_timestamp(&now),
                request.submitted_count,
                failures_json,
            ],
        );

        match result {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                return Err(ProductError::AlreadyExists(request.id));
            }
            Err(e) => return Err(ProductError::Database(e.to_string())),
        }

        Ok(Product {
            id: request.id,
            name: request.name,
            version: request.version,
            submitted_at: now,
            completed_at: None,
            submitted_count: request.submitted_count,
            submission_failures: request.submission_failures,
        })
    }

    fn get(&self, id: &str) -> Result<Option<Product>, ProductError> {
        let conn = self.conn.lock().unwrap();

        match Self::fetch(&conn, id) {
            Ok(product) => Ok(Some(product)),
            Err(ProductError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn list(&self, limit: i64, offset: i64) -> Result<Vec<Product>, ProductError> {
        let conn = self.conn.lock().unwrap();

        let sql = format!(
            "{} ORDER BY submitted_at DESC, rowid DESC LIMIT ? OFFSET ?",
            SELECT_COLUMNS
        );
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| ProductError::Database(e.to_string()))?;

        let rows = stmt
            .query_map(params![limit, offset], Self::row_to_product)
            .map_err(|e| ProductError::Database(e.to_string()))?;

        let mut products = Vec::new();
        for row_result in rows {
            products.push(row_result.map_err(|e| ProductError::Database(e.to_string()))?);
        }

        Ok(products)
    }

    fn set_completed_at_if_unset(
        &self,
        id: &str,
        completed_at: DateTime<Utc>,
    ) -> Result<bool, ProductError> {
        let conn = self.conn.lock().unwrap();

        let changed = conn
            .execute(
                "UPDATE products SET completed_at = ? WHERE id = ? AND completed_at IS NULL",
                params![format_timestamp(&completed_at.trunc_subsecs(6)), id],
            )
            .map_err(|e| ProductError::Database(e.to_string()))?;

        Ok(changed == 1)
    }

    fn delete(&self, id: &str) -> Result<Product, ProductError> {
        let conn = self.conn.lock().unwrap();

        let product = Self::fetch(&conn, id)?;

        conn.execute("DELETE FROM products WHERE id = ?", params![id])
            .map_err(|e| ProductError::Database(e.to_string()))?;

        Ok(product)
    }
}
