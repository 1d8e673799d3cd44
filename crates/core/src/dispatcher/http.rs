//! HTTP dispatcher for the analysis engine.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use crate::config::DispatcherConfig;

use super::{DispatchError, Dispatcher};

/// Posts analysis requests as JSON to the configured endpoint.
pub struct HttpDispatcher {
    client: Client,
    config: DispatcherConfig,
}

impl HttpDispatcher {
    pub fn new(config: DispatcherConfig) -> Result<Self, DispatchError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs as u64))
            .build()
            .map_err(|e| DispatchError::Api(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    /// The engine takes the `input` member of the stored request document;
    /// documents without one are forwarded whole.
    fn request_body(payload: &serde_json::Value) -> &serde_json::Value {
        payload.get("input").unwrap_or(payload)
    }
}

#[async_trait]
impl Dispatcher for HttpDispatcher {
    fn name(&self) -> &str {
        "http"
    }

    async fn dispatch(
        &self,
        report_id: &str,
        payload: &serde_json::Value,
    ) -> Result<(), DispatchError> {
        let mut request = self
            .client
            .post(&self.config.url)
            .json(Self::request_body(payload));

        if let Some(ref token) = self.config.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                DispatchError::Timeout
            } else if e.is_connect() {
                DispatchError::ConnectionFailed(e.to_string())
            } else {
                DispatchError::Api(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DispatchError::Rejected(format!(
                "HTTP {}: {}",
                status,
                body.trim()
            )));
        }

        debug!(report_id = %report_id, status = %status, "Analysis request accepted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(url: &str) -> DispatcherConfig {
        DispatcherConfig {
            url: url.to_string(),
            timeout_secs: 1,
            token: None,
        }
    }

    #[test]
    fn test_request_body_prefers_input_member() {
        let payload = serde_json::json!({
            "input": {"scan": {"id": "scan-1"}},
            "metadata": {"user": "alice"}
        });
        assert_eq!(
            HttpDispatcher::request_body(&payload),
            &serde_json::json!({"scan": {"id": "scan-1"}})
        );

        let bare = serde_json::json!({"scan": {"id": "scan-2"}});
        assert_eq!(HttpDispatcher::request_body(&bare), &bare);
    }

    #[tokio::test]
    async fn test_connection_refused_is_an_error() {
        // Port 9 (discard) is not expected to be listening locally.
        let dispatcher = HttpDispatcher::new(config("http://127.0.0.1:9/scan")).unwrap();
        let result = dispatcher
            .dispatch("r-1", &serde_json::json!({"input": {}}))
            .await;
        assert!(matches!(
            result,
            Err(DispatchError::ConnectionFailed(_))
                | Err(DispatchError::Timeout)
                | Err(DispatchError::Api(_))
        ));
    }

    #[tokio::test]
    async fn test_non_success_status_is_rejected() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            // Drain the whole request (headers, then the `{}` body).
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request);
                if n == 0 || (text.contains("\r\n\r\n") && text.ends_with('}')) {
                    break;
                }
            }
            let body = "engine busy";
            let response = format!(
                "HTTP/1.1 503 Service Unavailable\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
        });

        let dispatcher =
            HttpDispatcher::new(config(&format!("http://{}/scan", addr))).unwrap();
        let result = dispatcher
            .dispatch("r-1", &serde_json::json!({"input": {}}))
            .await;
        match result {
            Err(DispatchError::Rejected(reason)) => {
                assert!(reason.contains("503"));
                assert!(reason.contains("engine busy"));
            }
            other => panic!("expected rejection, got {:?}", other),
        }
    }
}
