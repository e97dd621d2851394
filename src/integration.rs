//! Seams to the collaborators that live outside the connection core.
//!
//! UI pages, settings storage and navigation are not part of this crate. They are
//! reached through the small traits below, each optional at the call site: when a
//! collaborator is absent the core falls back to logging or built-in defaults.

use crate::types::{BoxError, DEFAULT_RECONNECT_INTERVAL_SECS, Result};
use async_trait::async_trait;
use std::time::Duration;

/// Surfaces callback failures to the user (toast, banner, ...).
pub trait Notifier: Send + Sync {
    fn notify_error(&self, context: &str, message: &str);
}

/// Navigates away after the server revoked the session.
pub trait Redirector: Send + Sync {
    fn redirect(&self, reason: &TerminationReason);
}

/// Why the session was ended by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationReason {
    /// Heartbeat answered 401/403
    HeartbeatRejected { status: u16 },
    /// The server pushed a termination event over the realtime channel
    ServerPushed,
}

/// Read access to user-tunable settings.
pub trait SettingsProvider: Send + Sync {
    /// Supervisor reconnect interval, in seconds
    fn reconnect_interval_secs(&self) -> std::result::Result<u64, BoxError>;
}

/// Resolves the supervisor reconnect interval, falling back to the default when the
/// provider is missing, fails, or reports zero.
pub fn reconnect_interval(settings: Option<&dyn SettingsProvider>) -> Duration {
    let secs = match settings.map(|s| s.reconnect_interval_secs()) {
        Some(Ok(secs)) if secs > 0 => secs,
        Some(Ok(_)) => DEFAULT_RECONNECT_INTERVAL_SECS,
        Some(Err(e)) => {
            tracing::debug!("Settings provider failed, using default reconnect interval: {}", e);
            DEFAULT_RECONNECT_INTERVAL_SECS
        }
        None => DEFAULT_RECONNECT_INTERVAL_SECS,
    };
    Duration::from_secs(secs)
}

/// Reports whether the realtime connection is currently up.
pub trait LivenessSource: Send + Sync {
    fn is_connected(&self) -> bool;
}

/// Connection control used by the reconnection supervisor.
#[async_trait]
pub trait ReconnectControl: LivenessSource {
    /// Forces a reconnect, reusing the live transport when one exists.
    async fn force_reconnect(&self) -> Result<()>;

    /// True once the server has ended the session; nothing should reconnect after that.
    fn is_terminated(&self) -> bool {
        false
    }
}
