use super::http::{HeartbeatAck, HeartbeatClient};
use crate::client::ConnectionManager;
use crate::integration::{LivenessSource, TerminationReason};
use crate::scheduler::ActivityScheduler;
use crate::types::{HandlerResult, RealtimeError, Result};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Status assumed when a termination carries none
const DEFAULT_TERMINATION_STATUS: u16 = 401;

/// Periodic HTTP heartbeat bound to the scheduler's heartbeat timer.
///
/// A 401/403 answer ends the session through the connection manager; any other failure
/// is ordinary connectivity loss and only logged.
pub struct HeartbeatMonitor {
    client: HeartbeatClient,
    page: String,
    connection: Weak<ConnectionManager>,
}

impl HeartbeatMonitor {
    pub fn new(client: HeartbeatClient, page: impl Into<String>, connection: Weak<ConnectionManager>) -> Self {
        Self {
            client,
            page: page.into(),
            connection,
        }
    }

    pub fn page(&self) -> &str {
        &self.page
    }

    /// Installs the heartbeat timer; returns its current period
    pub fn spawn_on(self: Arc<Self>, scheduler: &ActivityScheduler) -> Duration {
        tracing::info!("Starting heartbeat for page '{}' -> {}", self.page, self.client.url());
        scheduler.create_heartbeat_monitor(move || {
            let monitor = Arc::clone(&self);
            async move { monitor.beat().await }
        })
    }

    /// Sends one heartbeat and acts on the answer
    pub async fn beat(&self) -> HandlerResult {
        let outcome = self.client.beat(&self.page).await;
        self.handle_outcome(outcome).await
    }

    pub(crate) async fn handle_outcome(&self, outcome: Result<HeartbeatAck>) -> HandlerResult {
        let Some(connection) = self.connection.upgrade() else {
            return Ok(());
        };

        match outcome {
            Ok(ack) => {
                tracing::trace!("Heartbeat ok ({})", ack.status);
                if !connection.is_connected() && !connection.is_terminated() {
                    tracing::debug!("Server reachable while realtime is down, nudging connect");
                    connection.connect().await?;
                }
                Ok(())
            }
            Err(RealtimeError::SessionTerminated { status }) => {
                let status = status.unwrap_or(DEFAULT_TERMINATION_STATUS);
                connection
                    .terminate(TerminationReason::HeartbeatRejected { status })
                    .await;
                Ok(())
            }
            Err(e) => {
                tracing::debug!("Heartbeat failed: {}", e);
                Ok(())
            }
        }
    }
}
