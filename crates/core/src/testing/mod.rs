//! Testing utilities and mock implementations.
//!
//! Provides a scriptable dispatcher, a manually advanced clock and fixtures,
//! so queue and lifecycle behavior can be exercised without a real analysis
//! engine or wall-clock sleeps.
//!
//! # Example
//!
//! ```rust,ignore
//! use exploitiq_core::testing::{fixtures, ManualClock, MockDispatcher};
//!
//! let clock = Arc::new(ManualClock::default());
//! let dispatcher = Arc::new(MockDispatcher::new());
//! let harness = fixtures::Harness::new(fixtures::queue_config(2, 3), dispatcher, clock.clone());
//!
//! clock.advance(Duration::from_secs(300));
//! harness.queue.sweep().await;
//! ```

mod manual_clock;
mod mock_dispatcher;

pub use manual_clock::ManualClock;
pub use mock_dispatcher::{MockDispatcher, RecordedDispatch};

/// Test fixtures and helper functions.
pub mod fixtures {
    use std::sync::Arc;

    use crate::clock::Clock;
    use crate::config::QueueConfig;
    use crate::dispatcher::Dispatcher;
    use crate::events::EventHandle;
    use crate::lifecycle::AdmissionQueue;
    use crate::product::{
        CompletionAggregator, CreateProductRequest, ProductStore, SqliteProductStore,
    };
    use crate::report::{CreateReportRequest, ReportStore, SqliteReportStore};

    /// Queue configuration with a 5 minute timeout and 10 second sweep.
    pub fn queue_config(max_active: usize, max_size: usize) -> QueueConfig {
        QueueConfig {
            max_active,
            max_size,
            timeout_secs: 300,
            sweep_interval_secs: 10,
            recover_sent: true,
        }
    }

    /// A submitted report request with a typical analysis payload.
    pub fn report_request(scan_id: &str) -> CreateReportRequest {
        CreateReportRequest::submitted(
            scan_id,
            serde_json::json!({
                "input": {
                    "scan": {"id": scan_id, "vulns": [{"vuln_id": "CVE-2024-0001"}]},
                    "image": {"name": "registry.example.com/app", "tag": "1.0"}
                },
                "metadata": {"user": "test"}
            }),
        )
    }

    /// A product request with no submission failures.
    pub fn product_request(id: &str, submitted_count: u32) -> CreateProductRequest {
        CreateProductRequest {
            id: id.to_string(),
            name: format!("{}-name", id),
            version: "1.0.0".to_string(),
            submitted_count,
            submission_failures: vec![],
        }
    }

    /// In-memory stores, aggregator and queue wired together.
    pub struct Harness {
        pub reports: Arc<SqliteReportStore>,
        pub products: Arc<SqliteProductStore>,
        pub aggregator: Arc<CompletionAggregator>,
        pub queue: Arc<AdmissionQueue>,
    }

    impl Harness {
        pub fn new(
            config: QueueConfig,
            dispatcher: Arc<dyn Dispatcher>,
            clock: Arc<dyn Clock>,
        ) -> Self {
            Self::with_events(config, dispatcher, clock, None)
        }

        pub fn with_events(
            config: QueueConfig,
            dispatcher: Arc<dyn Dispatcher>,
            clock: Arc<dyn Clock>,
            events: Option<EventHandle>,
        ) -> Self {
            let reports = Arc::new(SqliteReportStore::in_memory().unwrap());
            let products = Arc::new(SqliteProductStore::in_memory().unwrap());
            Self::with_stores(config, reports, products, dispatcher, clock, events)
        }

        /// Wire a fresh queue over existing stores (simulates a restart).
        pub fn with_stores(
            config: QueueConfig,
            reports: Arc<SqliteReportStore>,
            products: Arc<SqliteProductStore>,
            dispatcher: Arc<dyn Dispatcher>,
            clock: Arc<dyn Clock>,
            events: Option<EventHandle>,
        ) -> Self {
            let aggregator = Arc::new(CompletionAggregator::new(
                reports.clone(),
                products.clone(),
                events.clone(),
            ));
            let queue = Arc::new(AdmissionQueue::new(
                config,
                reports.clone(),
                dispatcher,
                Arc::clone(&aggregator),
                clock,
                events,
            ));
            Self {
                reports,
                products,
                aggregator,
                queue,
            }
        }

        /// Persist a Queued report and return its id.
        pub fn create_report(&self, scan_id: &str) -> String {
            self.reports.create(report_request(scan_id)).unwrap().id
        }

        /// Persist a Queued report belonging to `product_id`.
        pub fn create_member(&self, scan_id: &str, product_id: &str) -> String {
            self.reports
                .create(report_request(scan_id).with_product(product_id))
                .unwrap()
                .id
        }

        /// Persist a product.
        pub fn create_product(&self, id: &str, submitted_count: u32) {
            self.products
                .create(product_request(id, submitted_count))
                .unwrap();
        }

        /// Persist a Queued report and submit it.
        pub async fn submit_new(
            &self,
            scan_id: &str,
        ) -> (String, Result<crate::lifecycle::Admission, crate::lifecycle::QueueError>) {
            let id = self.create_report(scan_id);
            let payload = self.reports.get(&id).unwrap().unwrap().payload;
            let result = self.queue.submit(&id, &payload).await;
            (id, result)
        }
    }
}
