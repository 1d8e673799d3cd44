use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use super::LifecycleEvent;

/// Envelope wrapping a lifecycle event with metadata
#[derive(Debug, Clone)]
pub struct EventEnvelope {
    pub timestamp: DateTime<Utc>,
    pub event: LifecycleEvent,
}

/// Handle for emitting lifecycle events
///
/// This is cheaply cloneable and can be shared across tasks.
/// Events are sent through an async channel to be written by the EventWriter.
#[derive(Debug, Clone)]
pub struct EventHandle {
    tx: mpsc::Sender<EventEnvelope>,
}

impl EventHandle {
    pub fn new(tx: mpsc::Sender<EventEnvelope>) -> Self {
        Self { tx }
    }

    /// Emit an event asynchronously
    ///
    /// If the channel is closed the error is logged; the caller never fails.
    pub async fn emit(&self, event: LifecycleEvent) {
        let envelope = EventEnvelope {
            timestamp: Utc::now(),
            event,
        };
        if let Err(e) = self.tx.send(envelope).await {
            tracing::error!("Failed to emit lifecycle event: {}", e);
        }
    }

    /// Try to emit an event without waiting for buffer space
    ///
    /// Returns true if the event was queued.
    pub fn try_emit(&self, event: LifecycleEvent) -> bool {
        let envelope = EventEnvelope {
            timestamp: Utc::now(),
            event,
        };
        match self.tx.try_send(envelope) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("Failed to emit lifecycle event: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::ReportStatus;

    fn status_changed(id: &str) -> LifecycleEvent {
        LifecycleEvent::ReportStatusChanged {
            report_id: id.to_string(),
            product_id: None,
            from: ReportStatus::Queued,
            to: ReportStatus::Sent,
            reason: None,
        }
    }

    #[tokio::test]
    async fn test_emit_event() {
        let (tx, mut rx) = mpsc::channel(10);
        let handle = EventHandle::new(tx);

        handle.emit(status_changed("r-1")).await;

        let envelope = rx.recv().await.expect("Should receive event");
        assert_eq!(envelope.event.report_id(), Some("r-1"));
    }

    #[test]
    fn test_try_emit_full_channel() {
        let (tx, _rx) = mpsc::channel(1);
        let handle = EventHandle::new(tx);

        assert!(handle.try_emit(status_changed("r-1")));
        // Buffer of one is now full
        assert!(!handle.try_emit(status_changed("r-2")));
    }

    #[tokio::test]
    async fn test_emit_closed_channel() {
        let (tx, rx) = mpsc::channel::<EventEnvelope>(10);
        let handle = EventHandle::new(tx);
        drop(rx);

        // Logged, not propagated
        handle.emit(status_changed("r-1")).await;
        assert!(!handle.try_emit(status_changed("r-2")));
    }
}
