use std::sync::Arc;

use tokio::sync::mpsc;

use super::{EventEnvelope, EventHandle, EventRecord, EventStore};

/// Background task that receives lifecycle events and writes them to storage
pub struct EventWriter {
    rx: mpsc::Receiver<EventEnvelope>,
    store: Arc<dyn EventStore>,
}

impl EventWriter {
    pub fn new(rx: mpsc::Receiver<EventEnvelope>, store: Arc<dyn EventStore>) -> Self {
        Self { rx, store }
    }

    /// Run the writer, consuming events until every handle is dropped
    pub async fn run(mut self) {
        tracing::info!("Event writer started");

        while let Some(envelope) = self.rx.recv().await {
            let record = EventRecord {
                id: 0, // Will be set by database
                timestamp: envelope.timestamp,
                event_type: envelope.event.event_type().to_string(),
                report_id: envelope.event.report_id().map(String::from),
                product_id: envelope.event.product_id().map(String::from),
                data: envelope.event,
            };

            if let Err(e) = self.store.insert(&record) {
                tracing::error!("Failed to write lifecycle event: {}", e);
            }
        }

        tracing::info!("Event writer shutting down");
    }
}

/// Create a complete event system
///
/// Returns the `EventHandle` to clone into emitters and the `EventWriter` to
/// spawn with `tokio::spawn(writer.run())`.
pub fn create_event_system(
    store: Arc<dyn EventStore>,
    buffer_size: usize,
) -> (EventHandle, EventWriter) {
    let (tx, rx) = mpsc::channel(buffer_size);
    let handle = EventHandle::new(tx);
    let writer = EventWriter::new(rx, store);
    (handle, writer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventFilter, LifecycleEvent, SqliteEventStore};
    use crate::report::ReportStatus;

    #[tokio::test]
    async fn test_writer_persists_events_in_order() {
        let store = Arc::new(SqliteEventStore::in_memory().unwrap());
        let (handle, writer) = create_event_system(store.clone(), 10);
        let writer_task = tokio::spawn(writer.run());

        handle
            .emit(LifecycleEvent::ServiceStarted {
                version: "0.1.0".to_string(),
                config_hash: "abc123".to_string(),
            })
            .await;
        handle
            .emit(LifecycleEvent::ReportStatusChanged {
                report_id: "r-1".to_string(),
                product_id: Some("prod-1".to_string()),
                from: ReportStatus::Queued,
                to: ReportStatus::Sent,
                reason: None,
            })
            .await;
        handle
            .emit(LifecycleEvent::ServiceStopped {
                reason: "graceful_shutdown".to_string(),
            })
            .await;

        drop(handle);
        writer_task.await.unwrap();

        let records = store.query(&EventFilter::new()).unwrap();
        let types: Vec<&str> = records.iter().map(|r| r.event_type.as_str()).collect();
        assert_eq!(
            types,
            vec!["service_started", "report_status_changed", "service_stopped"]
        );
        assert_eq!(records[1].report_id.as_deref(), Some("r-1"));
        assert_eq!(records[1].product_id.as_deref(), Some("prod-1"));
    }

    #[tokio::test]
    async fn test_writer_waits_for_all_handles_to_drop() {
        let store = Arc::new(SqliteEventStore::in_memory().unwrap());
        let (main_handle, writer) = create_event_system(store.clone(), 10);
        let queue_handle = main_handle.clone();

        let writer_task = tokio::spawn(writer.run());

        queue_handle
            .emit(LifecycleEvent::QueueRejected {
                report_id: "r-1".to_string(),
                max_size: 3,
            })
            .await;
        drop(main_handle);

        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        assert!(!writer_task.is_finished());

        drop(queue_handle);
        let result =
            tokio::time::timeout(tokio::time::Duration::from_secs(1), writer_task).await;
        assert!(result.is_ok(), "Writer should exit after all handles dropped");
        assert_eq!(store.count(&EventFilter::new()).unwrap(), 1);
    }
}
