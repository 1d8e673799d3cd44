//! Bounded admission of reports to the analysis engine.
//!
//! All state lives behind one mutex. Slots are reserved under the lock, the
//! dispatcher is called with the lock released, and the outcome is committed
//! under the lock again, so `active + in-flight <= max_active` always holds.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::config::QueueConfig;
use crate::dispatcher::Dispatcher;
use crate::events::{EventHandle, LifecycleEvent};
use crate::metrics::{
    DISPATCHES_TOTAL, DISPATCH_DURATION, EXPIRATIONS_TOTAL, PROMOTIONS_TOTAL, QUEUE_ACTIVE,
    QUEUE_MAX_ACTIVE, QUEUE_MAX_SIZE, QUEUE_PENDING, QUEUE_REJECTIONS_TOTAL,
};
use crate::product::CompletionAggregator;
use crate::report::{
    FailureInfo, Report, ReportError, ReportStatus, ReportStore, StatusUpdate,
    DISPATCH_ERROR_KIND,
};

use super::types::{
    ActiveEntrySnapshot, Admission, BootstrapSummary, QueueError, QueueSnapshot, SweepSummary,
};

/// A report holding an active slot.
#[derive(Debug, Clone)]
struct ActiveEntry {
    dispatched_at: DateTime<Utc>,
    /// Monotonic start of the deadline.
    started: Instant,
    /// Insertion order, for snapshots.
    seq: u64,
    /// The Sent write failed; the next sweep retries it.
    sent_pending: bool,
}

/// A slot held while the dispatcher call is in flight.
#[derive(Debug, Default)]
struct Reservation {
    /// Set when a result or deletion arrived during the call.
    resolved: bool,
}

#[derive(Debug, Default)]
struct QueueState {
    active: HashMap<String, ActiveEntry>,
    reserved: HashMap<String, Reservation>,
    pending: VecDeque<String>,
    next_seq: u64,
    bootstrapped: bool,
}

impl QueueState {
    fn occupied(&self) -> usize {
        self.active.len() + self.reserved.len()
    }

    fn is_empty(&self) -> bool {
        self.active.is_empty() && self.reserved.is_empty() && self.pending.is_empty()
    }

    fn contains(&self, report_id: &str) -> bool {
        self.active.contains_key(report_id)
            || self.reserved.contains_key(report_id)
            || self.pending.iter().any(|id| id == report_id)
    }

    fn activate(&mut self, report_id: String, dispatched_at: DateTime<Utc>, started: Instant) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.active.insert(
            report_id,
            ActiveEntry {
                dispatched_at,
                started,
                seq,
                sent_pending: false,
            },
        );
    }

    fn record_occupancy(&self) {
        QUEUE_ACTIVE.set(self.active.len() as i64);
        QUEUE_PENDING.set(self.pending.len() as i64);
    }
}

/// Admission queue: a bounded active set plus a bounded FIFO of pending ids.
///
/// The report store stays the system of record; this state only lives for the
/// lifetime of the process and is rebuilt by [`AdmissionQueue::bootstrap`].
pub struct AdmissionQueue {
    config: QueueConfig,
    reports: Arc<dyn ReportStore>,
    dispatcher: Arc<dyn Dispatcher>,
    aggregator: Arc<CompletionAggregator>,
    clock: Arc<dyn Clock>,
    events: Option<EventHandle>,
    state: Mutex<QueueState>,
}

impl AdmissionQueue {
    pub fn new(
        config: QueueConfig,
        reports: Arc<dyn ReportStore>,
        dispatcher: Arc<dyn Dispatcher>,
        aggregator: Arc<CompletionAggregator>,
        clock: Arc<dyn Clock>,
        events: Option<EventHandle>,
    ) -> Self {
        QUEUE_MAX_ACTIVE.set(config.max_active as i64);
        QUEUE_MAX_SIZE.set(config.max_size as i64);

        Self {
            config,
            reports,
            dispatcher,
            aggregator,
            clock,
            events,
            state: Mutex::new(QueueState::default()),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Admit a report that the store already holds as Queued.
    ///
    /// Dispatches right away when a slot is free, otherwise appends to pending.
    /// Fails with `QueueExceeded` when pending is full, leaving all state untouched.
    pub async fn submit(
        &self,
        report_id: &str,
        payload: &serde_json::Value,
    ) -> Result<Admission, QueueError> {
        let mut state = self.state.lock().await;

        if state.contains(report_id) {
            return Err(QueueError::Duplicate(report_id.to_string()));
        }

        if state.occupied() < self.config.max_active {
            state
                .reserved
                .insert(report_id.to_string(), Reservation::default());
            drop(state);
            return Ok(self.dispatch(report_id, payload).await);
        }

        if state.pending.len() >= self.config.max_size {
            drop(state);
            QUEUE_REJECTIONS_TOTAL.inc();
            warn!(
                report_id = %report_id,
                max_size = self.config.max_size,
                "Pending queue full, rejecting report"
            );
            self.emit(LifecycleEvent::QueueRejected {
                report_id: report_id.to_string(),
                max_size: self.config.max_size,
            })
            .await;
            return Err(QueueError::QueueExceeded {
                max_size: self.config.max_size,
            });
        }

        state.pending.push_back(report_id.to_string());
        state.record_occupancy();
        debug!(
            report_id = %report_id,
            position = state.pending.len(),
            "Report deferred"
        );
        Ok(Admission::Deferred)
    }

    /// A terminal result arrived for the report. Frees its slot.
    ///
    /// Returns false when the report held no slot (already reclaimed, never
    /// dispatched, or unknown).
    pub async fn received(&self, report_id: &str) -> bool {
        let mut state = self.state.lock().await;
        let released = Self::release(&mut state, report_id);
        state.record_occupancy();
        released
    }

    /// The report was deleted. Frees its slot and drops it from pending.
    pub async fn deleted(&self, report_id: &str) -> bool {
        let mut state = self.state.lock().await;
        let mut removed = Self::release(&mut state, report_id);

        let before = state.pending.len();
        state.pending.retain(|id| id != report_id);
        removed |= state.pending.len() != before;

        state.record_occupancy();
        removed
    }

    fn release(state: &mut QueueState, report_id: &str) -> bool {
        if state.active.remove(report_id).is_some() {
            return true;
        }
        match state.reserved.get_mut(report_id) {
            Some(reservation) => {
                reservation.resolved = true;
                true
            }
            None => false,
        }
    }

    /// Reclaim overdue dispatches, then promote pending reports into free slots.
    ///
    /// An entry may live up to `timeout + sweep_interval` before it is noticed.
    pub async fn sweep(&self) -> SweepSummary {
        let mut summary = SweepSummary {
            expired: self.reclaim().await,
            ..Default::default()
        };
        self.promote(&mut summary).await;

        if !summary.is_idle() {
            debug!(
                expired = summary.expired,
                promoted = summary.promoted,
                dispatch_failed = summary.dispatch_failed,
                dropped = summary.dropped,
                "Sweep finished"
            );
        }
        summary
    }

    async fn reclaim(&self) -> usize {
        let now = self.clock.monotonic_now();
        let timeout = self.config.timeout();
        let message = format!("timeout after {} seconds", self.config.timeout_secs);

        let mut sent: Vec<Report> = Vec::new();
        let mut expired: Vec<Report> = Vec::new();
        {
            let mut state = self.state.lock().await;

            let unsent: Vec<(String, DateTime<Utc>)> = state
                .active
                .iter()
                .filter(|(_, entry)| entry.sent_pending)
                .map(|(id, entry)| (id.clone(), entry.dispatched_at))
                .collect();
            for (report_id, at) in unsent {
                match self.reports.update_status(&report_id, StatusUpdate::Sent { at }) {
                    Ok(report) => {
                        if let Some(entry) = state.active.get_mut(&report_id) {
                            entry.sent_pending = false;
                        }
                        sent.push(report);
                    }
                    Err(ReportError::InvalidState { .. }) | Err(ReportError::NotFound(_)) => {
                        state.active.remove(&report_id);
                        debug!(report_id = %report_id, "Unsent entry already resolved");
                    }
                    Err(e) => {
                        warn!(
                            report_id = %report_id,
                            error = %e,
                            "Failed to persist sent status, retrying next sweep"
                        );
                    }
                }
            }

            let mut overdue: Vec<(u64, String)> = state
                .active
                .iter()
                .filter(|(_, entry)| !entry.sent_pending)
                .filter(|(_, entry)| now.saturating_duration_since(entry.started) >= timeout)
                .map(|(id, entry)| (entry.seq, id.clone()))
                .collect();
            overdue.sort();

            for (_, report_id) in overdue {
                let update = StatusUpdate::Expired {
                    message: message.clone(),
                };
                match self.reports.update_status(&report_id, update) {
                    Ok(report) => {
                        state.active.remove(&report_id);
                        expired.push(report);
                    }
                    Err(ReportError::InvalidState { current_status, .. }) => {
                        // A result landed without going through `received`.
                        state.active.remove(&report_id);
                        debug!(
                            report_id = %report_id,
                            status = %current_status,
                            "Overdue entry already resolved"
                        );
                    }
                    Err(ReportError::NotFound(_)) => {
                        state.active.remove(&report_id);
                        debug!(report_id = %report_id, "Overdue entry no longer exists");
                    }
                    Err(e) => {
                        warn!(
                            report_id = %report_id,
                            error = %e,
                            "Failed to expire report, retrying next sweep"
                        );
                    }
                }
            }

            state.record_occupancy();
        }

        for report in sent {
            info!(report_id = %report.id, "Report dispatched");
            self.emit(LifecycleEvent::ReportStatusChanged {
                report_id: report.id,
                product_id: report.product_id,
                from: ReportStatus::Queued,
                to: ReportStatus::Sent,
                reason: None,
            })
            .await;
        }

        for report in &expired {
            EXPIRATIONS_TOTAL.inc();
            warn!(report_id = %report.id, "{}", message);
            self.emit(LifecycleEvent::ReportStatusChanged {
                report_id: report.id.clone(),
                product_id: report.product_id.clone(),
                from: ReportStatus::Sent,
                to: ReportStatus::Expired,
                reason: Some(message.clone()),
            })
            .await;
            if let Some(ref product_id) = report.product_id {
                self.aggregator.reconcile_logged(product_id).await;
            }
        }

        expired.len()
    }

    async fn promote(&self, summary: &mut SweepSummary) {
        loop {
            let report_id = {
                let mut state = self.state.lock().await;
                if state.occupied() >= self.config.max_active {
                    break;
                }
                let Some(report_id) = state.pending.pop_front() else {
                    break;
                };
                state
                    .reserved
                    .insert(report_id.clone(), Reservation::default());
                state.record_occupancy();
                report_id
            };

            match self.reports.get(&report_id) {
                Ok(Some(report)) if report.status() == ReportStatus::Queued => {
                    PROMOTIONS_TOTAL.inc();
                    match self.dispatch(&report_id, &report.payload).await {
                        Admission::DispatchFailed { .. } => summary.dispatch_failed += 1,
                        _ => summary.promoted += 1,
                    }
                }
                Ok(found) => {
                    self.state.lock().await.reserved.remove(&report_id);
                    summary.dropped += 1;
                    debug!(
                        report_id = %report_id,
                        status = ?found.map(|r| r.status()),
                        "Dropping pending report that is no longer queued"
                    );
                }
                Err(e) => {
                    let mut state = self.state.lock().await;
                    state.reserved.remove(&report_id);
                    state.pending.push_front(report_id.clone());
                    state.record_occupancy();
                    warn!(
                        report_id = %report_id,
                        error = %e,
                        "Failed to load pending report, retrying next sweep"
                    );
                    break;
                }
            }
        }
    }

    /// Call the dispatcher for a reserved slot and commit the outcome.
    async fn dispatch(&self, report_id: &str, payload: &serde_json::Value) -> Admission {
        let timer = Instant::now();
        let result = self.dispatcher.dispatch(report_id, payload).await;
        let label = if result.is_ok() { "accepted" } else { "failed" };
        DISPATCHES_TOTAL.with_label_values(&[label]).inc();
        DISPATCH_DURATION
            .with_label_values(&[label])
            .observe(timer.elapsed().as_secs_f64());

        let dispatched_at = self.clock.now();
        let resolved = {
            let mut state = self.state.lock().await;
            let resolved = state
                .reserved
                .remove(report_id)
                .map(|r| r.resolved)
                .unwrap_or(true);
            if result.is_ok() && !resolved {
                let started = self.clock.monotonic_now();
                state.activate(report_id.to_string(), dispatched_at, started);
            }
            state.record_occupancy();
            resolved
        };

        match result {
            Ok(()) => {
                if resolved {
                    debug!(
                        report_id = %report_id,
                        "Report resolved while dispatch was in flight, slot not committed"
                    );
                    return Admission::Dispatched;
                }
                self.persist_sent(report_id, dispatched_at).await;
                Admission::Dispatched
            }
            Err(e) => {
                let reason = e.to_string();
                warn!(
                    report_id = %report_id,
                    dispatcher = self.dispatcher.name(),
                    error = %reason,
                    "Dispatch failed"
                );
                if !resolved {
                    self.persist_dispatch_failure(report_id, &reason).await;
                }
                Admission::DispatchFailed { reason }
            }
        }
    }

    async fn persist_sent(&self, report_id: &str, at: DateTime<Utc>) {
        match self.reports.update_status(report_id, StatusUpdate::Sent { at }) {
            Ok(report) => {
                info!(report_id = %report_id, "Report dispatched");
                self.emit(LifecycleEvent::ReportStatusChanged {
                    report_id: report_id.to_string(),
                    product_id: report.product_id,
                    from: ReportStatus::Queued,
                    to: ReportStatus::Sent,
                    reason: None,
                })
                .await;
            }
            Err(ReportError::NotFound(_)) => {
                let mut state = self.state.lock().await;
                state.active.remove(report_id);
                state.record_occupancy();
                debug!(report_id = %report_id, "Dispatched report was deleted, slot freed");
            }
            Err(ReportError::InvalidState { current_status, .. }) => {
                // A result landed between committing the slot and the Sent write.
                let mut state = self.state.lock().await;
                state.active.remove(report_id);
                state.record_occupancy();
                debug!(
                    report_id = %report_id,
                    status = %current_status,
                    "Dispatched report already resolved, slot freed"
                );
            }
            Err(e) => {
                // The slot stays held and the next sweep retries the write.
                error!(report_id = %report_id, error = %e, "Failed to persist sent status");
                if let Some(entry) = self.state.lock().await.active.get_mut(report_id) {
                    entry.sent_pending = true;
                }
            }
        }
    }

    async fn persist_dispatch_failure(&self, report_id: &str, reason: &str) {
        let failure = FailureInfo::new(DISPATCH_ERROR_KIND, reason);
        match self
            .reports
            .update_status(report_id, StatusUpdate::Failed(failure))
        {
            Ok(report) => {
                self.emit(LifecycleEvent::ReportStatusChanged {
                    report_id: report_id.to_string(),
                    product_id: report.product_id.clone(),
                    from: ReportStatus::Queued,
                    to: ReportStatus::Failed,
                    reason: Some(reason.to_string()),
                })
                .await;
                if let Some(ref product_id) = report.product_id {
                    self.aggregator.reconcile_logged(product_id).await;
                }
            }
            Err(ReportError::NotFound(_)) => {
                debug!(report_id = %report_id, "Failed report no longer exists");
            }
            Err(e) => {
                error!(report_id = %report_id, error = %e, "Failed to persist dispatch failure");
            }
        }
    }

    /// Rebuild queue state from the store. Call once, before accepting submissions.
    ///
    /// Queued reports (submission order, up to `max_size`) go to pending. With
    /// `recover_sent`, reports left Sent are re-tracked as active with their
    /// deadline starting now. Fails with `AlreadyInitialized` once the queue has
    /// been bootstrapped or has admitted anything.
    pub async fn bootstrap(&self) -> Result<BootstrapSummary, QueueError> {
        let mut state = self.state.lock().await;
        if state.bootstrapped || !state.is_empty() {
            return Err(QueueError::AlreadyInitialized);
        }

        let queued = self
            .reports
            .find_by_status(ReportStatus::Queued, self.config.max_size as i64)?;
        let sent = if self.config.recover_sent {
            self.reports.find_by_status(ReportStatus::Sent, -1)?
        } else {
            Vec::new()
        };

        let now = self.clock.now();
        let started = self.clock.monotonic_now();
        let mut summary = BootstrapSummary::default();

        for report in queued {
            if state.pending.len() >= self.config.max_size {
                break;
            }
            if !state.contains(&report.id) {
                state.pending.push_back(report.id);
                summary.pending += 1;
            }
        }
        for report in sent {
            if state.contains(&report.id) {
                continue;
            }
            if state.occupied() < self.config.max_active {
                state.activate(report.id, now, started);
                summary.active += 1;
            } else {
                summary.untracked += 1;
            }
        }
        state.bootstrapped = true;
        state.record_occupancy();
        drop(state);

        if summary.untracked > 0 {
            warn!(
                untracked = summary.untracked,
                max_active = self.config.max_active,
                "Sent reports exceed max_active, leaving them to external reconciliation"
            );
        }
        info!(
            pending = summary.pending,
            active = summary.active,
            "Admission queue bootstrapped"
        );

        Ok(summary)
    }

    pub async fn is_bootstrapped(&self) -> bool {
        self.state.lock().await.bootstrapped
    }

    /// Copy of the current state: active in dispatch order, pending in FIFO order.
    pub async fn snapshot(&self) -> QueueSnapshot {
        let state = self.state.lock().await;

        let mut active: Vec<(&String, &ActiveEntry)> = state.active.iter().collect();
        active.sort_by_key(|(_, entry)| entry.seq);

        QueueSnapshot {
            active: active
                .into_iter()
                .map(|(id, entry)| ActiveEntrySnapshot {
                    report_id: id.clone(),
                    dispatched_at: entry.dispatched_at,
                })
                .collect(),
            in_flight: state.reserved.len(),
            pending: state.pending.iter().cloned().collect(),
            max_active: self.config.max_active,
            max_size: self.config.max_size,
        }
    }

    async fn emit(&self, event: LifecycleEvent) {
        if let Some(ref events) = self.events {
            events.emit(event).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::dispatcher::DispatchError;
    use crate::product::SqliteProductStore;
    use crate::report::{CreateReportRequest, ReportFilter, SqliteReportStore};
    use crate::testing::fixtures::{queue_config, report_request, Harness};
    use crate::testing::{ManualClock, MockDispatcher};

    fn harness(
        max_active: usize,
        max_size: usize,
    ) -> (Harness, Arc<MockDispatcher>, Arc<ManualClock>) {
        let dispatcher = Arc::new(MockDispatcher::new());
        let clock = Arc::new(ManualClock::default());
        let harness = Harness::new(
            queue_config(max_active, max_size),
            dispatcher.clone(),
            clock.clone(),
        );
        (harness, dispatcher, clock)
    }

    #[tokio::test]
    async fn test_duplicate_submit_is_rejected() {
        let (h, dispatcher, _) = harness(1, 2);
        let (a, result) = h.submit_new("a").await;
        assert_eq!(result.unwrap(), Admission::Dispatched);

        let payload = serde_json::json!({});
        let result = h.queue.submit(&a, &payload).await;
        assert!(matches!(result, Err(QueueError::Duplicate(id)) if id == a));
        assert_eq!(dispatcher.call_count().await, 1);
        assert!(h.queue.snapshot().await.pending.is_empty());
    }

    #[tokio::test]
    async fn test_in_flight_dispatch_counts_toward_capacity() {
        let (h, dispatcher, _) = harness(1, 2);
        dispatcher.hold_calls().await;

        let a = h.create_report("a");
        let queue = Arc::clone(&h.queue);
        let a_task = {
            let a = a.clone();
            tokio::spawn(async move { queue.submit(&a, &serde_json::json!({})).await })
        };
        assert!(dispatcher.wait_for_calls(1).await);

        let snapshot = h.queue.snapshot().await;
        assert_eq!(snapshot.in_flight, 1);
        assert!(snapshot.active.is_empty());

        let (b, result) = h.submit_new("b").await;
        assert_eq!(result.unwrap(), Admission::Deferred);

        dispatcher.release_calls(1).await;
        assert_eq!(a_task.await.unwrap().unwrap(), Admission::Dispatched);

        let snapshot = h.queue.snapshot().await;
        assert_eq!(snapshot.active_ids(), vec![a.clone()]);
        assert_eq!(snapshot.pending, vec![b]);
        assert_eq!(snapshot.in_flight, 0);
        assert_eq!(
            h.reports.get(&a).unwrap().unwrap().status(),
            ReportStatus::Sent
        );
    }

    #[tokio::test]
    async fn test_result_during_in_flight_dispatch_does_not_commit_slot() {
        let (h, dispatcher, _) = harness(1, 2);
        dispatcher.hold_calls().await;

        let a = h.create_report("a");
        let queue = Arc::clone(&h.queue);
        let a_task = {
            let a = a.clone();
            tokio::spawn(async move { queue.submit(&a, &serde_json::json!({})).await })
        };
        assert!(dispatcher.wait_for_calls(1).await);

        assert!(h.queue.received(&a).await);
        h.reports
            .update_status(&a, StatusUpdate::Completed { at: Utc::now() })
            .unwrap();

        dispatcher.release_calls(1).await;
        assert_eq!(a_task.await.unwrap().unwrap(), Admission::Dispatched);

        let snapshot = h.queue.snapshot().await;
        assert!(snapshot.active.is_empty());
        assert_eq!(snapshot.in_flight, 0);
        assert_eq!(
            h.reports.get(&a).unwrap().unwrap().status(),
            ReportStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_failed_dispatch_during_delete_is_not_persisted() {
        let (h, dispatcher, _) = harness(1, 2);
        dispatcher.hold_calls().await;
        dispatcher
            .set_next_error(DispatchError::Rejected("busy".to_string()))
            .await;

        let a = h.create_report("a");
        let queue = Arc::clone(&h.queue);
        let a_task = {
            let a = a.clone();
            tokio::spawn(async move { queue.submit(&a, &serde_json::json!({})).await })
        };
        assert!(dispatcher.wait_for_calls(1).await);

        assert!(h.queue.deleted(&a).await);
        h.reports.delete(&a).unwrap();

        dispatcher.release_calls(1).await;
        assert!(matches!(
            a_task.await.unwrap().unwrap(),
            Admission::DispatchFailed { .. }
        ));
        assert!(h.reports.get(&a).unwrap().is_none());
        assert_eq!(h.queue.snapshot().await.in_flight, 0);
    }

    #[tokio::test]
    async fn test_dispatch_failure_marks_report_failed() {
        let (h, dispatcher, _) = harness(2, 2);
        dispatcher
            .set_next_error(DispatchError::Rejected("HTTP 400: bad input".to_string()))
            .await;

        let (a, result) = h.submit_new("a").await;
        assert_eq!(
            result.unwrap(),
            Admission::DispatchFailed {
                reason: "Rejected by analysis engine: HTTP 400: bad input".to_string()
            }
        );

        let report = h.reports.get(&a).unwrap().unwrap();
        assert_eq!(report.status(), ReportStatus::Failed);
        let error = report.error.unwrap();
        assert_eq!(error.kind, DISPATCH_ERROR_KIND);
        assert!(error.message.contains("bad input"));
        assert!(h.queue.snapshot().await.active.is_empty());
    }

    #[tokio::test]
    async fn test_deleted_removes_pending_entry() {
        let (h, _, _) = harness(1, 3);
        let (_a, _) = h.submit_new("a").await;
        let (b, _) = h.submit_new("b").await;
        let (c, _) = h.submit_new("c").await;

        assert!(h.queue.deleted(&b).await);
        assert!(!h.queue.deleted(&b).await);
        assert_eq!(h.queue.snapshot().await.pending, vec![c]);
    }

    #[tokio::test]
    async fn test_promotion_drops_reports_that_left_queued() {
        let (h, dispatcher, _) = harness(1, 3);
        let (a, _) = h.submit_new("a").await;
        let (b, _) = h.submit_new("b").await;
        let (c, _) = h.submit_new("c").await;
        let (d, _) = h.submit_new("d").await;

        // b deleted and c failed behind the queue's back
        h.reports.delete(&b).unwrap();
        h.reports
            .update_status(&c, StatusUpdate::Failed(FailureInfo::new("manual", "cancelled")))
            .unwrap();

        assert!(h.queue.received(&a).await);
        let summary = h.queue.sweep().await;

        assert_eq!(summary.dropped, 2);
        assert_eq!(summary.promoted, 1);
        assert_eq!(h.queue.snapshot().await.active_ids(), vec![d.clone()]);
        assert_eq!(dispatcher.dispatched_ids().await, vec![a, d]);
    }

    #[tokio::test]
    async fn test_reclaim_skips_entries_resolved_in_store() {
        let (h, _, clock) = harness(1, 1);
        let (a, _) = h.submit_new("a").await;
        h.reports
            .update_status(&a, StatusUpdate::Completed { at: Utc::now() })
            .unwrap();

        clock.advance(Duration::from_secs(301));
        let summary = h.queue.sweep().await;

        assert_eq!(summary.expired, 0);
        assert!(h.queue.snapshot().await.active.is_empty());
        assert_eq!(
            h.reports.get(&a).unwrap().unwrap().status(),
            ReportStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_bootstrap_without_sent_recovery() {
        let (h, _, clock) = harness(2, 5);
        let (a, _) = h.submit_new("a").await;
        let b = h.create_report("b");

        let mut config = queue_config(2, 5);
        config.recover_sent = false;
        let restarted = Harness::with_stores(
            config,
            h.reports.clone(),
            h.products.clone(),
            Arc::new(MockDispatcher::new()),
            clock,
            None,
        );

        let summary = restarted.queue.bootstrap().await.unwrap();
        assert_eq!(summary.pending, 1);
        assert_eq!(summary.active, 0);

        let snapshot = restarted.queue.snapshot().await;
        assert_eq!(snapshot.pending, vec![b]);
        assert!(!snapshot.active_ids().contains(&a));
    }

    #[tokio::test]
    async fn test_bootstrap_runs_once() {
        let (h, _, _) = harness(1, 2);
        let a = h.create_report("a");
        assert!(!h.queue.is_bootstrapped().await);

        assert_eq!(h.queue.bootstrap().await.unwrap().pending, 1);
        assert!(h.queue.is_bootstrapped().await);

        assert!(matches!(
            h.queue.bootstrap().await,
            Err(QueueError::AlreadyInitialized)
        ));
        assert_eq!(h.queue.snapshot().await.pending, vec![a]);
    }

    #[tokio::test]
    async fn test_bootstrap_after_submit_is_refused() {
        let (h, _, _) = harness(1, 2);
        let left_over = h.create_report("left-over");
        let (a, _) = h.submit_new("a").await;
        let (b, _) = h.submit_new("b").await;

        assert!(matches!(
            h.queue.bootstrap().await,
            Err(QueueError::AlreadyInitialized)
        ));

        let snapshot = h.queue.snapshot().await;
        assert_eq!(snapshot.active_ids(), vec![a]);
        assert_eq!(snapshot.pending, vec![b]);
        assert!(!snapshot.pending.contains(&left_over));
    }

    /// Report store whose reads and writes can be made to fail.
    struct FlakyReportStore {
        inner: SqliteReportStore,
        failing: AtomicBool,
        /// Fail only Sent writes.
        failing_sends: AtomicBool,
        /// Complete the report just before the next Sent write.
        resolve_before_send: AtomicBool,
    }

    impl FlakyReportStore {
        fn check(&self) -> Result<(), ReportError> {
            if self.failing.load(Ordering::SeqCst) {
                Err(ReportError::Database("database is locked".to_string()))
            } else {
                Ok(())
            }
        }
    }

    impl ReportStore for FlakyReportStore {
        fn create(&self, request: CreateReportRequest) -> Result<Report, ReportError> {
            self.inner.create(request)
        }

        fn get(&self, id: &str) -> Result<Option<Report>, ReportError> {
            self.check()?;
            self.inner.get(id)
        }

        fn list(&self, filter: &ReportFilter) -> Result<Vec<Report>, ReportError> {
            self.check()?;
            self.inner.list(filter)
        }

        fn count(&self, filter: &ReportFilter) -> Result<i64, ReportError> {
            self.inner.count(filter)
        }

        fn update_status(&self, id: &str, update: StatusUpdate) -> Result<Report, ReportError> {
            self.check()?;
            if matches!(update, StatusUpdate::Sent { .. }) {
                if self.failing_sends.load(Ordering::SeqCst) {
                    return Err(ReportError::Database("database is locked".to_string()));
                }
                if self.resolve_before_send.swap(false, Ordering::SeqCst) {
                    self.inner.update_status(id, StatusUpdate::Completed { at: Utc::now() })?;
                }
            }
            self.inner.update_status(id, update)
        }

        fn delete(&self, id: &str) -> Result<Report, ReportError> {
            self.inner.delete(id)
        }
    }

    fn flaky_queue(clock: Arc<ManualClock>) -> (Arc<FlakyReportStore>, AdmissionQueue) {
        let reports = Arc::new(FlakyReportStore {
            inner: SqliteReportStore::in_memory().unwrap(),
            failing: AtomicBool::new(false),
            failing_sends: AtomicBool::new(false),
            resolve_before_send: AtomicBool::new(false),
        });
        let products = Arc::new(SqliteProductStore::in_memory().unwrap());
        let aggregator = Arc::new(CompletionAggregator::new(reports.clone(), products, None));
        let queue = AdmissionQueue::new(
            queue_config(1, 2),
            reports.clone(),
            Arc::new(MockDispatcher::new()),
            aggregator,
            clock,
            None,
        );
        (reports, queue)
    }

    #[tokio::test]
    async fn test_transient_error_during_reclaim_keeps_entry() {
        let clock = Arc::new(ManualClock::default());
        let (reports, queue) = flaky_queue(clock.clone());
        let a = reports.create(report_request("a")).unwrap();
        assert_eq!(
            queue.submit(&a.id, &a.payload).await.unwrap(),
            Admission::Dispatched
        );

        clock.advance(Duration::from_secs(300));
        reports.failing.store(true, Ordering::SeqCst);
        let summary = queue.sweep().await;
        assert_eq!(summary.expired, 0);
        assert_eq!(queue.snapshot().await.active_ids(), vec![a.id.clone()]);

        reports.failing.store(false, Ordering::SeqCst);
        let summary = queue.sweep().await;
        assert_eq!(summary.expired, 1);
        assert!(queue.snapshot().await.active.is_empty());
        assert_eq!(
            reports.get(&a.id).unwrap().unwrap().status(),
            ReportStatus::Expired
        );
    }

    #[tokio::test]
    async fn test_transient_error_during_promotion_keeps_pending_head() {
        let clock = Arc::new(ManualClock::default());
        let (reports, queue) = flaky_queue(clock);
        let a = reports.create(report_request("a")).unwrap();
        let b = reports.create(report_request("b")).unwrap();
        let c = reports.create(report_request("c")).unwrap();
        queue.submit(&a.id, &a.payload).await.unwrap();
        queue.submit(&b.id, &b.payload).await.unwrap();
        queue.submit(&c.id, &c.payload).await.unwrap();
        assert!(queue.received(&a.id).await);

        reports.failing.store(true, Ordering::SeqCst);
        let summary = queue.sweep().await;
        assert_eq!(summary.promoted, 0);
        let snapshot = queue.snapshot().await;
        assert_eq!(snapshot.pending, vec![b.id.clone(), c.id.clone()]);
        assert_eq!(snapshot.in_flight, 0);

        reports.failing.store(false, Ordering::SeqCst);
        let summary = queue.sweep().await;
        assert_eq!(summary.promoted, 1);
        let snapshot = queue.snapshot().await;
        assert_eq!(snapshot.active_ids(), vec![b.id]);
        assert_eq!(snapshot.pending, vec![c.id]);
    }

    #[tokio::test]
    async fn test_failed_sent_write_is_retried_by_sweep() {
        let clock = Arc::new(ManualClock::default());
        let (reports, queue) = flaky_queue(clock.clone());
        let a = reports.create(report_request("a")).unwrap();

        reports.failing_sends.store(true, Ordering::SeqCst);
        assert_eq!(
            queue.submit(&a.id, &a.payload).await.unwrap(),
            Admission::Dispatched
        );
        assert_eq!(
            reports.get(&a.id).unwrap().unwrap().status(),
            ReportStatus::Queued
        );

        // While the write keeps failing the entry is neither expired nor dropped
        clock.advance(Duration::from_secs(301));
        let summary = queue.sweep().await;
        assert_eq!(summary.expired, 0);
        assert_eq!(queue.snapshot().await.active_ids(), vec![a.id.clone()]);

        reports.failing_sends.store(false, Ordering::SeqCst);
        let summary = queue.sweep().await;
        assert_eq!(summary.expired, 1);
        assert!(queue.snapshot().await.active.is_empty());

        let report = reports.get(&a.id).unwrap().unwrap();
        assert_eq!(report.status(), ReportStatus::Expired);
        assert!(report.sent_at.is_some());
    }

    #[tokio::test]
    async fn test_failed_sent_write_recovers_before_deadline() {
        let clock = Arc::new(ManualClock::default());
        let (reports, queue) = flaky_queue(clock);
        let a = reports.create(report_request("a")).unwrap();

        reports.failing_sends.store(true, Ordering::SeqCst);
        queue.submit(&a.id, &a.payload).await.unwrap();
        reports.failing_sends.store(false, Ordering::SeqCst);

        let summary = queue.sweep().await;
        assert_eq!(summary.expired, 0);
        assert_eq!(queue.snapshot().await.active_ids(), vec![a.id.clone()]);
        assert_eq!(
            reports.get(&a.id).unwrap().unwrap().status(),
            ReportStatus::Sent
        );
    }

    #[tokio::test]
    async fn test_result_before_sent_write_frees_slot() {
        let clock = Arc::new(ManualClock::default());
        let (reports, queue) = flaky_queue(clock);
        let a = reports.create(report_request("a")).unwrap();
        let b = reports.create(report_request("b")).unwrap();

        reports.resolve_before_send.store(true, Ordering::SeqCst);
        assert_eq!(
            queue.submit(&a.id, &a.payload).await.unwrap(),
            Admission::Dispatched
        );

        let report = reports.get(&a.id).unwrap().unwrap();
        assert_eq!(report.status(), ReportStatus::Completed);
        assert!(report.sent_at.is_none());
        assert!(queue.snapshot().await.active.is_empty());

        // The freed slot admits the next report directly
        assert_eq!(
            queue.submit(&b.id, &b.payload).await.unwrap(),
            Admission::Dispatched
        );
    }
}
