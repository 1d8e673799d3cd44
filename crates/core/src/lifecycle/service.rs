//! Lifecycle service: owns the admission queue and drives the sweep loop.
//!
//! Every report-mutation path goes through here so the queue is told about
//! results and deletions and the owning product is reconciled afterwards.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::events::{EventHandle, LifecycleEvent};
use crate::product::{CompletionAggregator, ProductSummary, Reconciliation};
use crate::report::{
    CreateReportRequest, FailureInfo, Report, ReportError, ReportStatus, ReportStore,
    StatusUpdate,
};

use super::queue::AdmissionQueue;
use super::types::{Admission, BootstrapSummary, LifecycleError, LifecycleStatus, QueueError};

/// How long `stop` waits for an in-progress sweep to finish.
const STOP_GRACE: Duration = Duration::from_secs(5);

pub struct LifecycleService {
    queue: Arc<AdmissionQueue>,
    aggregator: Arc<CompletionAggregator>,
    reports: Arc<dyn ReportStore>,
    events: Option<EventHandle>,

    // Runtime state
    running: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
    sweep_task: Mutex<Option<JoinHandle<()>>>,
}

impl LifecycleService {
    pub fn new(
        queue: Arc<AdmissionQueue>,
        aggregator: Arc<CompletionAggregator>,
        reports: Arc<dyn ReportStore>,
        events: Option<EventHandle>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            queue,
            aggregator,
            reports,
            events,
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            sweep_task: Mutex::new(None),
        }
    }

    pub fn queue(&self) -> &Arc<AdmissionQueue> {
        &self.queue
    }

    /// Bootstrap the queue from the store, then spawn the sweep loop.
    ///
    /// Bootstrap runs on the first start only. A restart after `stop` keeps the
    /// live queue state and returns an empty summary. Fails if reports were
    /// admitted before the first start.
    pub async fn start(&self) -> Result<Option<BootstrapSummary>, LifecycleError> {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Lifecycle service already running");
            return Ok(None);
        }

        info!("Starting lifecycle service");

        let summary = if self.queue.is_bootstrapped().await {
            BootstrapSummary::default()
        } else {
            match self.queue.bootstrap().await {
                Ok(summary) => summary,
                Err(e) => {
                    self.running.store(false, Ordering::SeqCst);
                    return Err(e.into());
                }
            }
        };

        let task = self.spawn_sweep_loop();
        *self.sweep_task.lock().await = Some(task);

        info!(
            sweep_interval_secs = self.queue.config().sweep_interval_secs,
            "Lifecycle service started"
        );
        Ok(Some(summary))
    }

    /// Stop the sweep loop, waiting for a sweep in progress to finish.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("Lifecycle service not running");
            return;
        }

        info!("Stopping lifecycle service");

        let _ = self.shutdown_tx.send(());

        if let Some(task) = self.sweep_task.lock().await.take() {
            if tokio::time::timeout(STOP_GRACE, task).await.is_err() {
                warn!("Sweep loop did not stop within {:?}", STOP_GRACE);
            }
        }

        info!("Lifecycle service stopped");
    }

    pub async fn status(&self) -> LifecycleStatus {
        let snapshot = self.queue.snapshot().await;
        LifecycleStatus {
            running: self.running.load(Ordering::Relaxed),
            active: snapshot.active.len(),
            pending: snapshot.pending.len(),
            max_active: snapshot.max_active,
            max_size: snapshot.max_size,
        }
    }

    fn spawn_sweep_loop(&self) -> JoinHandle<()> {
        let queue = Arc::clone(&self.queue);
        let running = Arc::clone(&self.running);
        let interval = queue.config().sweep_interval();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            info!("Sweep loop started");
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Sweep loop received shutdown signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        if !running.load(Ordering::Relaxed) {
                            break;
                        }
                        queue.sweep().await;
                    }
                }
            }

            info!("Sweep loop stopped");
        })
    }

    /// Persist a new report as Queued and admit it.
    ///
    /// On `QueueExceeded` the report is removed again, a `ReportDeleted` event
    /// closes out its `Queued` event, and the error is returned.
    pub async fn request_analysis(
        &self,
        mut request: CreateReportRequest,
    ) -> Result<(Report, Admission), LifecycleError> {
        request.submitted = true;
        let report = self.reports.create(request)?;

        self.emit(LifecycleEvent::ReportStatusChanged {
            report_id: report.id.clone(),
            product_id: report.product_id.clone(),
            from: ReportStatus::Unknown,
            to: ReportStatus::Queued,
            reason: None,
        })
        .await;

        match self.queue.submit(&report.id, &report.payload).await {
            Ok(admission) => {
                let current = self.reports.get(&report.id)?.unwrap_or(report);
                Ok((current, admission))
            }
            Err(e @ QueueError::QueueExceeded { .. }) => {
                match self.reports.delete(&report.id) {
                    Ok(_) => {
                        self.emit(LifecycleEvent::ReportDeleted {
                            report_id: report.id.clone(),
                            product_id: report.product_id.clone(),
                            previous_status: ReportStatus::Queued,
                        })
                        .await;
                    }
                    Err(delete_err) => {
                        warn!(
                            report_id = %report.id,
                            error = %delete_err,
                            "Failed to remove rejected report"
                        );
                    }
                }
                Err(e.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// The analysis engine delivered a result.
    ///
    /// A result that arrives after the report expired still completes it.
    pub async fn receive_result(
        &self,
        report_id: &str,
        completed_at: DateTime<Utc>,
    ) -> Result<Report, LifecycleError> {
        self.resolve(report_id, StatusUpdate::Completed { at: completed_at }, None)
            .await
    }

    /// Processing failed downstream.
    pub async fn fail_report(
        &self,
        report_id: &str,
        kind: &str,
        message: &str,
    ) -> Result<Report, LifecycleError> {
        let failure = FailureInfo::new(kind, message);
        self.resolve(
            report_id,
            StatusUpdate::Failed(failure),
            Some(message.to_string()),
        )
        .await
    }

    async fn resolve(
        &self,
        report_id: &str,
        update: StatusUpdate,
        reason: Option<String>,
    ) -> Result<Report, LifecycleError> {
        let previous = self
            .reports
            .get(report_id)?
            .ok_or_else(|| LifecycleError::ReportNotFound(report_id.to_string()))?
            .status();

        let held_slot = self.queue.received(report_id).await;
        let report = self
            .reports
            .update_status(report_id, update)
            .map_err(not_found)?;
        let to = report.status();

        debug!(
            report_id = %report_id,
            from = %previous,
            to = %to,
            held_slot,
            "Report resolved"
        );

        self.emit(LifecycleEvent::ReportStatusChanged {
            report_id: report_id.to_string(),
            product_id: report.product_id.clone(),
            from: previous,
            to,
            reason,
        })
        .await;

        if let Some(ref product_id) = report.product_id {
            self.aggregator.reconcile_logged(product_id).await;
        }

        Ok(report)
    }

    /// Permanently delete a report and re-evaluate its product.
    pub async fn delete_report(&self, report_id: &str) -> Result<Report, LifecycleError> {
        self.queue.deleted(report_id).await;
        let report = self.reports.delete(report_id).map_err(not_found)?;

        info!(report_id = %report_id, "Report deleted");
        self.emit(LifecycleEvent::ReportDeleted {
            report_id: report_id.to_string(),
            product_id: report.product_id.clone(),
            previous_status: report.status(),
        })
        .await;

        if let Some(ref product_id) = report.product_id {
            self.aggregator.reconcile_logged(product_id).await;
        }

        Ok(report)
    }

    /// Re-evaluate a product on demand.
    pub async fn reconcile_product(
        &self,
        product_id: &str,
    ) -> Result<Reconciliation, LifecycleError> {
        Ok(self.aggregator.reconcile(product_id).await?)
    }

    pub fn product_summary(&self, product_id: &str) -> Result<ProductSummary, LifecycleError> {
        Ok(self.aggregator.summary(product_id)?)
    }

    async fn emit(&self, event: LifecycleEvent) {
        if let Some(ref events) = self.events {
            events.emit(event).await;
        }
    }
}

fn not_found(e: ReportError) -> LifecycleError {
    match e {
        ReportError::NotFound(id) => LifecycleError::ReportNotFound(id),
        other => LifecycleError::Report(other),
    }
}
