//! Product storage trait and types.

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::{FailedComponent, Product};

/// Error type for product store operations.
#[derive(Debug, Error)]
pub enum ProductError {
    /// Product not found.
    #[error("Product not found: {0}")]
    NotFound(String),

    /// A product with this ID already exists.
    #[error("Product already exists: {0}")]
    AlreadyExists(String),

    /// Database error.
    #[error("Database error: {0}")]
    Database(String),
}

/// Request to create a new product.
#[derive(Debug, Clone)]
pub struct CreateProductRequest {
    /// External product identifier.
    pub id: String,
    pub name: String,
    pub version: String,
    /// Number of component reports submitted.
    pub submitted_count: u32,
    /// Components that could not be submitted.
    pub submission_failures: Vec<FailedComponent>,
}

/// Trait for product storage backends.
pub trait ProductStore: Send + Sync {
    /// Persist a new product.
    fn create(&self, request: CreateProductRequest) -> Result<Product, ProductError>;

    /// Get a product by ID.
    fn get(&self, id: &str) -> Result<Option<Product>, ProductError>;

    /// List products, newest submission first.
    fn list(&self, limit: i64, offset: i64) -> Result<Vec<Product>, ProductError>;

    /// Stamp `completed_at` unless it is already set.
    ///
    /// Conditional write: returns `false` when the product is missing or was
    /// already stamped, so concurrent callers cannot overwrite each other.
    fn set_completed_at_if_unset(
        &self,
        id: &str,
        completed_at: DateTime<Utc>,
    ) -> Result<bool, ProductError>;

    /// Permanently delete a product, returning it.
    fn delete(&self, id: &str) -> Result<Product, ProductError>;
}
