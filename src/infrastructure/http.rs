use crate::types::{RealtimeError, error::Result};
use reqwest::StatusCode;
use serde::Serialize;

#[derive(Debug, Serialize)]
struct HeartbeatBody<'a> {
    page: &'a str,
}

/// Outcome of a successful heartbeat round trip
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatAck {
    pub status: u16,
}

/// HTTP heartbeat fallback, used when the realtime channel is silent or down.
pub struct HeartbeatClient {
    http: reqwest::Client,
    url: String,
    credentials: Option<String>,
}

impl HeartbeatClient {
    pub fn new(url: String, credentials: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            url,
            credentials,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Sends one heartbeat for `page`.
    ///
    /// 401/403 is the server revoking the session and maps to
    /// [`RealtimeError::SessionTerminated`]; any other failure is ordinary connectivity loss.
    pub async fn beat(&self, page: &str) -> Result<HeartbeatAck> {
        let mut request = self
            .http
            .post(&self.url)
            .header("Content-Type", "application/json")
            .json(&HeartbeatBody { page });

        if let Some(cookie) = &self.credentials {
            request = request.header("Cookie", cookie);
        }

        let response = request
            .send()
            .await
            .map_err(|e| RealtimeError::Connection(format!("Heartbeat failed: {}", e)))?;

        let status = response.status();
        classify_heartbeat_status(status)?;

        tracing::debug!("Heartbeat for page '{}' acknowledged ({})", page, status);
        Ok(HeartbeatAck {
            status: status.as_u16(),
        })
    }
}

fn classify_heartbeat_status(status: StatusCode) -> Result<()> {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(RealtimeError::SessionTerminated {
            status: Some(status.as_u16()),
        });
    }
    if !status.is_success() {
        return Err(RealtimeError::Connection(format!(
            "Heartbeat rejected with status: {}",
            status
        )));
    }
    Ok(())
}

/// Converts an HTTP base URL to its WebSocket counterpart
pub fn http_to_ws_endpoint(http_endpoint: &str) -> String {
    http_endpoint
        .replacen("http://", "ws://", 1)
        .replacen("https://", "wss://", 1)
}
