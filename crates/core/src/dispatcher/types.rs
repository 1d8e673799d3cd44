use async_trait::async_trait;
use thiserror::Error;

/// Errors from handing a report to the analysis engine.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Rejected by analysis engine: {0}")]
    Rejected(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Request timeout")]
    Timeout,

    #[error("API error: {0}")]
    Api(String),
}

/// Hands analysis requests to the downstream engine.
///
/// A call either accepts the request (`Ok`) or fails; there is no partial
/// acceptance. Implementations must not retry internally.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Name of the implementation, for logging.
    fn name(&self) -> &str;

    /// Submit the payload of `report_id` for analysis.
    async fn dispatch(
        &self,
        report_id: &str,
        payload: &serde_json::Value,
    ) -> Result<(), DispatchError>;
}
