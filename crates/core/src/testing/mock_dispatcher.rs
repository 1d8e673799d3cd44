//! Mock dispatcher for testing.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, Semaphore};

use crate::dispatcher::{DispatchError, Dispatcher};

/// A recorded dispatch call for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedDispatch {
    /// Report that was dispatched.
    pub report_id: String,
    /// Payload it was dispatched with.
    pub payload: serde_json::Value,
    /// When the call was made.
    pub timestamp: chrono::DateTime<Utc>,
}

/// Mock implementation of the Dispatcher trait.
///
/// Provides controllable behavior for testing:
/// - Track dispatch calls for assertions
/// - Fail the next call or every call
/// - Hold calls on a gate to keep them in flight
///
/// # Example
///
/// ```rust,ignore
/// let dispatcher = MockDispatcher::new();
/// dispatcher.set_next_error(DispatchError::Rejected("busy".into())).await;
///
/// queue.submit(&id, &payload).await?; // DispatchFailed
///
/// assert_eq!(dispatcher.dispatched_ids().await, vec![id]);
/// ```
#[derive(Debug)]
pub struct MockDispatcher {
    /// Recorded dispatch calls.
    calls: Arc<RwLock<Vec<RecordedDispatch>>>,
    /// If set, the next call will fail with this error.
    next_error: Arc<RwLock<Option<DispatchError>>>,
    /// If set, every call is rejected with this reason.
    reject_all: Arc<RwLock<Option<String>>>,
    /// If set, calls wait for a permit before returning.
    gate: Arc<RwLock<Option<Arc<Semaphore>>>>,
}

impl Default for MockDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDispatcher {
    /// Create a mock dispatcher that accepts everything.
    pub fn new() -> Self {
        Self {
            calls: Arc::new(RwLock::new(Vec::new())),
            next_error: Arc::new(RwLock::new(None)),
            reject_all: Arc::new(RwLock::new(None)),
            gate: Arc::new(RwLock::new(None)),
        }
    }

    /// Get all recorded dispatch calls.
    pub async fn calls(&self) -> Vec<RecordedDispatch> {
        self.calls.read().await.clone()
    }

    /// Report ids in the order they were dispatched.
    pub async fn dispatched_ids(&self) -> Vec<String> {
        self.calls
            .read()
            .await
            .iter()
            .map(|c| c.report_id.clone())
            .collect()
    }

    /// Number of dispatch calls made so far.
    pub async fn call_count(&self) -> usize {
        self.calls.read().await.len()
    }

    /// Fail the next call with this error.
    pub async fn set_next_error(&self, error: DispatchError) {
        *self.next_error.write().await = Some(error);
    }

    /// Reject every call with this reason until cleared.
    pub async fn reject_all(&self, reason: impl Into<String>) {
        *self.reject_all.write().await = Some(reason.into());
    }

    /// Stop rejecting calls.
    pub async fn accept_all(&self) {
        *self.reject_all.write().await = None;
    }

    /// Make subsequent calls wait until released.
    pub async fn hold_calls(&self) {
        *self.gate.write().await = Some(Arc::new(Semaphore::new(0)));
    }

    /// Let `n` held calls return.
    pub async fn release_calls(&self, n: usize) {
        if let Some(ref gate) = *self.gate.read().await {
            gate.add_permits(n);
        }
    }

    /// Wait until at least `n` calls were made. Returns false after ~2 seconds.
    pub async fn wait_for_calls(&self, n: usize) -> bool {
        for _ in 0..400 {
            if self.call_count().await >= n {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        false
    }
}

#[async_trait]
impl Dispatcher for MockDispatcher {
    fn name(&self) -> &str {
        "mock"
    }

    async fn dispatch(
        &self,
        report_id: &str,
        payload: &serde_json::Value,
    ) -> Result<(), DispatchError> {
        self.calls.write().await.push(RecordedDispatch {
            report_id: report_id.to_string(),
            payload: payload.clone(),
            timestamp: Utc::now(),
        });

        let gate = self.gate.read().await.clone();
        if let Some(gate) = gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }

        if let Some(error) = self.next_error.write().await.take() {
            return Err(error);
        }

        if let Some(ref reason) = *self.reject_all.read().await {
            return Err(DispatchError::Rejected(reason.clone()));
        }

        Ok(())
    }
}
