use super::{
    ChannelKind, Transport, TransportEvent, TransportEventSender, TransportFactory, TransportMode,
    polling, websocket,
};
use crate::infrastructure::http_to_ws_endpoint;
use crate::infrastructure::timer::{BackoffStrategy, SteppedDelay, backoff_sleep};
use crate::types::{Envelope, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Grace period for a channel to say goodbye before its task is aborted
const CLOSE_GRACE: Duration = Duration::from_millis(500);

/// Where and how to reach the realtime endpoint
#[derive(Debug, Clone)]
pub struct TransportEndpoint {
    /// Same-origin base URL (http or https)
    pub base_url: Url,
    /// Fixed transport path
    pub path: String,
    /// Cookie header sent with every request
    pub credentials: Option<String>,
    /// Pause between two long-poll requests
    pub poll_interval: Duration,
}

impl TransportEndpoint {
    pub fn http_url(&self) -> Result<String> {
        Ok(self.base_url.join(&self.path)?.to_string())
    }

    pub fn ws_url(&self) -> Result<String> {
        Ok(http_to_ws_endpoint(&self.http_url()?))
    }
}

/// State shared by the driver and the per-channel session loops
pub(crate) struct SessionContext {
    pub ws_url: String,
    pub poll_url: String,
    pub credentials: Option<String>,
    pub poll_interval: Duration,
    pub http: reqwest::Client,
    events: TransportEventSender,
    connected: Arc<AtomicBool>,
}

impl SessionContext {
    pub fn emit(&self, event: TransportEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!("Transport event receiver dropped");
        }
    }

    pub fn mark_connected(&self, channel: ChannelKind) {
        self.connected.store(true, Ordering::Release);
        tracing::info!("Transport session established over {:?}", channel);
        self.emit(TransportEvent::Connected { channel });
    }

    /// Decodes a text frame and forwards every envelope it carries
    pub fn deliver_frame(&self, text: &str) {
        match Envelope::decode_frame(text) {
            Ok(envelopes) => {
                for envelope in envelopes {
                    self.emit(TransportEvent::Message(envelope));
                }
            }
            Err(e) => {
                tracing::error!("Failed to parse frame: {} - Raw: {}", e, text);
            }
        }
    }
}

/// How one session on one channel ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionOutcome {
    Cancelled,
    Ended {
        was_connected: bool,
        protocol_failure: bool,
    },
}

struct Driver {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Transport over a websocket channel with long-polling fallback.
///
/// Network failures are retried forever with the stepped delay table; a protocol
/// failure stops the loop after being reported.
pub struct ChannelTransport {
    mode: TransportMode,
    context: Arc<SessionContext>,
    connected: Arc<AtomicBool>,
    driver: Mutex<Option<Driver>>,
}

impl ChannelTransport {
    pub fn new(
        endpoint: &TransportEndpoint,
        mode: TransportMode,
        events: TransportEventSender,
    ) -> Result<Self> {
        let connected = Arc::new(AtomicBool::new(false));
        let context = SessionContext {
            ws_url: endpoint.ws_url()?,
            poll_url: endpoint.http_url()?,
            credentials: endpoint.credentials.clone(),
            poll_interval: endpoint.poll_interval,
            http: reqwest::Client::new(),
            events,
            connected: Arc::clone(&connected),
        };

        Ok(Self {
            mode,
            context: Arc::new(context),
            connected,
            driver: Mutex::new(None),
        })
    }

    fn spawn_driver(&self) {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_driver(
            Arc::clone(&self.context),
            self.mode,
            cancel.clone(),
        ));
        *self.driver.lock() = Some(Driver { cancel, handle });
    }

    async fn stop_driver(&self) {
        let driver = self.driver.lock().take();
        if let Some(Driver { cancel, mut handle }) = driver {
            cancel.cancel();
            if tokio::time::timeout(CLOSE_GRACE, &mut handle).await.is_err() {
                handle.abort();
            }
        }
        self.connected.store(false, Ordering::Release);
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    fn mode(&self) -> TransportMode {
        self.mode
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    async fn open(&self) -> Result<()> {
        let running = self
            .driver
            .lock()
            .as_ref()
            .is_some_and(|driver| !driver.handle.is_finished());
        if running {
            return Ok(());
        }
        tracing::info!("Opening transport ({})", self.mode);
        self.spawn_driver();
        Ok(())
    }

    async fn reconnect(&self) -> Result<()> {
        tracing::info!("Restarting transport ({})", self.mode);
        self.stop_driver().await;
        self.spawn_driver();
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        tracing::info!("Closing transport ({})", self.mode);
        self.stop_driver().await;
        Ok(())
    }
}

impl Drop for ChannelTransport {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.lock().take() {
            driver.cancel.cancel();
            driver.handle.abort();
        }
    }
}

/// Connection loop: one session at a time, stepped delay between failed attempts.
async fn run_driver(context: Arc<SessionContext>, mode: TransportMode, cancel: CancellationToken) {
    let mut backoff = SteppedDelay::default();
    let mut channel = mode.initial_channel();

    loop {
        if cancel.is_cancelled() {
            break;
        }

        let outcome = match channel {
            ChannelKind::WebSocket => websocket::run_session(&context, &cancel).await,
            ChannelKind::Polling => polling::run_session(&context, &cancel).await,
        };
        context.connected.store(false, Ordering::Release);

        let SessionOutcome::Ended {
            was_connected,
            protocol_failure,
        } = outcome
        else {
            break;
        };

        if was_connected {
            backoff.reset();
            context.emit(TransportEvent::Disconnected {
                reason: format!("{:?} session ended", channel),
            });
        }

        if protocol_failure {
            tracing::warn!("Protocol failure on {:?}, transport stops retrying", channel);
            break;
        }

        if mode.allows_upgrade() {
            match channel {
                // Handshake never completed: degrade right away without waiting.
                ChannelKind::WebSocket if !was_connected => {
                    tracing::info!("Websocket unavailable, degrading to long-polling");
                    channel = ChannelKind::Polling;
                    continue;
                }
                ChannelKind::Polling => channel = ChannelKind::WebSocket,
                ChannelKind::WebSocket => {}
            }
        }

        if !backoff_sleep(&mut backoff, &cancel).await {
            break;
        }
    }
    tracing::info!("Transport driver finished");
}

/// Builds [`ChannelTransport`]s for a fixed endpoint.
pub struct DefaultTransportFactory {
    endpoint: TransportEndpoint,
}

impl DefaultTransportFactory {
    pub fn new(endpoint: TransportEndpoint) -> Self {
        Self { endpoint }
    }
}

impl TransportFactory for DefaultTransportFactory {
    fn create(&self, mode: TransportMode, events: TransportEventSender) -> Arc<dyn Transport> {
        match ChannelTransport::new(&self.endpoint, mode, events) {
            Ok(transport) => Arc::new(transport),
            // The builder validated the URL; this only trips on a malformed path.
            Err(e) => {
                tracing::error!("Invalid transport endpoint: {}", e);
                Arc::new(InertTransport { mode })
            }
        }
    }
}

/// Stand-in when the endpoint cannot be built: never connects.
struct InertTransport {
    mode: TransportMode,
}

#[async_trait]
impl Transport for InertTransport {
    fn mode(&self) -> TransportMode {
        self.mode
    }

    fn is_connected(&self) -> bool {
        false
    }

    async fn open(&self) -> Result<()> {
        Ok(())
    }

    async fn reconnect(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
