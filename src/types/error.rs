use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Errors that can occur in the realtime tab client.
#[derive(Error, Debug)]
pub enum RealtimeError {
    /// WebSocket protocol error (connection failed, invalid frame, etc.)
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// General connection error with descriptive message
    #[error("Connection error: {0}")]
    Connection(String),

    /// The server revoked the session (HTTP 401/403 or a pushed termination event)
    #[error("Session terminated (status {status:?})")]
    SessionTerminated { status: Option<u16> },

    /// No activity registered under this name
    #[error("Unknown activity: {0}")]
    UnknownActivity(String),

    /// Invalid or unavailable configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP request error (polling channel and heartbeat)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// URL parsing error (malformed base URL)
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),
}

impl RealtimeError {
    /// Whether this error means the session is gone for good and must not be retried.
    pub fn is_session_terminated(&self) -> bool {
        matches!(self, Self::SessionTerminated { .. })
    }
}

/// Convenience type alias for `Result<T, RealtimeError>`.
pub type Result<T> = std::result::Result<T, RealtimeError>;

/// Boxed error returned by user callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type for event handlers and activity ticks.
pub type HandlerResult = std::result::Result<(), BoxError>;
