//! Products: aggregates of component reports and their completion tracking.

mod aggregator;
mod sqlite_store;
mod store;
mod types;

pub use aggregator::{AggregatorError, CompletionAggregator, Reconciliation};
pub use sqlite_store::SqliteProductStore;
pub use store::{CreateProductRequest, ProductError, ProductStore};
pub use types::{FailedComponent, Product, ProductState, ProductSummary};
