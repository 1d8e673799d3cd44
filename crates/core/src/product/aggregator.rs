//! Convergence of a product once every member report is terminal.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::events::{EventHandle, LifecycleEvent};
use crate::metrics::PRODUCTS_COMPLETED;
use crate::report::{derive_status, ReportError, ReportStore};

use super::{ProductError, ProductStore, ProductSummary};

/// Errors from reconciliation. Both are store failures; callers log and retry later.
#[derive(Debug, Error)]
pub enum AggregatorError {
    #[error(transparent)]
    Report(#[from] ReportError),

    #[error(transparent)]
    Product(#[from] ProductError),
}

/// Outcome of a single `reconcile` call.
#[derive(Debug, Clone, PartialEq)]
pub enum Reconciliation {
    /// No product with this ID exists.
    UnknownProduct,
    /// `completed_at` was already set; nothing evaluated.
    AlreadyConverged,
    /// At least one member is still in progress.
    Analysing { in_progress: usize },
    /// Every member is terminal but none carries a usable timestamp.
    NothingToStamp,
    /// This call stamped the product.
    Converged { completed_at: DateTime<Utc> },
}

/// Detects, exactly once, when all reports of a product are terminal.
pub struct CompletionAggregator {
    reports: Arc<dyn ReportStore>,
    products: Arc<dyn ProductStore>,
    events: Option<EventHandle>,
}

impl CompletionAggregator {
    pub fn new(
        reports: Arc<dyn ReportStore>,
        products: Arc<dyn ProductStore>,
        events: Option<EventHandle>,
    ) -> Self {
        Self {
            reports,
            products,
            events,
        }
    }

    /// Re-evaluate a product. Safe to call any number of times from any path.
    pub async fn reconcile(&self, product_id: &str) -> Result<Reconciliation, AggregatorError> {
        let Some(product) = self.products.get(product_id)? else {
            debug!(product_id = %product_id, "Reconcile skipped, product not found");
            return Ok(Reconciliation::UnknownProduct);
        };

        if product.completed_at.is_some() {
            return Ok(Reconciliation::AlreadyConverged);
        }

        let members = self.reports.find_by_product_id(product_id)?;

        let in_progress = members
            .iter()
            .filter(|r| derive_status(r).is_in_progress())
            .count();
        if in_progress > 0 {
            debug!(
                product_id = %product_id,
                in_progress,
                members = members.len(),
                "Product still analysing"
            );
            return Ok(Reconciliation::Analysing { in_progress });
        }

        let Some(latest) = members.iter().filter_map(|r| r.completion_time()).max() else {
            debug!(product_id = %product_id, "No member completion time to stamp");
            return Ok(Reconciliation::NothingToStamp);
        };

        if !self.products.set_completed_at_if_unset(product_id, latest)? {
            // Lost the race to a concurrent reconcile, or the product was removed.
            return Ok(Reconciliation::AlreadyConverged);
        }

        PRODUCTS_COMPLETED.inc();
        info!(
            product_id = %product_id,
            completed_at = %latest,
            members = members.len(),
            "Product completed"
        );

        if let Some(ref events) = self.events {
            events
                .emit(LifecycleEvent::ProductCompleted {
                    product_id: product_id.to_string(),
                    completed_at: latest,
                })
                .await;
        }

        Ok(Reconciliation::Converged {
            completed_at: latest,
        })
    }

    /// Reconcile from a report-mutation path. Store failures are logged; the
    /// next mutation or sweep re-triggers reconciliation.
    pub async fn reconcile_logged(&self, product_id: &str) {
        if let Err(e) = self.reconcile(product_id).await {
            warn!(product_id = %product_id, error = %e, "Product reconciliation failed");
        }
    }

    /// Display state and per-status member counts. Derived, never stored.
    pub fn summary(&self, product_id: &str) -> Result<ProductSummary, AggregatorError> {
        let members = self.reports.find_by_product_id(product_id)?;
        Ok(ProductSummary::from_statuses(
            product_id,
            members.iter().map(derive_status),
        ))
    }
}
