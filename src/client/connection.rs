use super::state::{ConnectionPhase, ConnectionState, Visibility};
use crate::integration::{
    LivenessSource, Notifier, ReconnectControl, Redirector, TerminationReason,
};
use crate::messaging::router::run_guarded;
use crate::messaging::{EventName, EventRouter, SubscriptionId, SystemEvent};
use crate::transport::{
    Transport, TransportEvent, TransportFactory, TransportFailure, TransportMode,
};
use crate::types::{Envelope, HandlerResult, RealtimeError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{RwLock, mpsc, watch};
use tokio::task::JoinHandle;

/// Callback run when the page becomes visible again
pub type ResumeCallback = Arc<dyn Fn() -> HandlerResult + Send + Sync + 'static>;

/// The one live transport plus the generation its events are tagged with
struct AttachedTransport {
    generation: u64,
    transport: Arc<dyn Transport>,
}

/// Owns the transport and is the source of truth for connection liveness.
///
/// There is at most one live transport. Replacing it (protocol-failure rebuild) closes
/// the old one before the factory is asked for a new one, and events still in flight
/// from a retired transport are dropped by generation.
///
/// Only the manager replaces the transport; callers get a shared handle at most:
///
/// ```compile_fail
/// # async fn swap(manager: &tabsync_realtime::ConnectionManager) {
/// *manager.transport.write().await = None;
/// # }
/// ```
pub struct ConnectionManager {
    this: Weak<ConnectionManager>,
    factory: Arc<dyn TransportFactory>,
    router: EventRouter,
    transport: RwLock<Option<AttachedTransport>>,
    generation: AtomicU64,
    state: watch::Sender<ConnectionState>,
    resume_callbacks: Mutex<Vec<ResumeCallback>>,
    visibility: Mutex<Visibility>,
    debug: AtomicBool,
    terminated: AtomicBool,
    termination: watch::Sender<Option<TerminationReason>>,
    redirector: Option<Arc<dyn Redirector>>,
    notifier: Option<Arc<dyn Notifier>>,
    rebuild_delay: Duration,
    rebuild_task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    pub fn new(
        factory: Arc<dyn TransportFactory>,
        initial_mode: TransportMode,
        rebuild_delay: Duration,
        notifier: Option<Arc<dyn Notifier>>,
        redirector: Option<Arc<dyn Redirector>>,
    ) -> Arc<Self> {
        let (state, _) = watch::channel(ConnectionState::new(initial_mode));
        let (termination, _) = watch::channel(None);
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            factory,
            router: EventRouter::new(notifier.clone()),
            transport: RwLock::new(None),
            generation: AtomicU64::new(0),
            state,
            resume_callbacks: Mutex::new(Vec::new()),
            visibility: Mutex::new(Visibility::Visible),
            debug: AtomicBool::new(false),
            terminated: AtomicBool::new(false),
            termination,
            redirector,
            notifier,
            rebuild_delay,
            rebuild_task: Mutex::new(None),
        })
    }

    /// Connects on page load
    pub async fn init(&self) -> Result<()> {
        tracing::info!("Initializing connection manager");
        self.connect().await
    }

    /// Establishes the transport under the current mode.
    ///
    /// If a transport already exists it is reused: its own retry loop keeps running.
    pub async fn connect(&self) -> Result<()> {
        if self.is_terminated() {
            return Err(RealtimeError::SessionTerminated { status: None });
        }

        let mut slot = self.transport.write().await;
        if let Some(attached) = slot.as_ref() {
            if attached.transport.is_connected() {
                return Ok(());
            }
            self.set_phase(ConnectionPhase::Connecting);
            return attached.transport.open().await;
        }

        let mode = self.state.borrow().transport_mode;
        let attached = self.attach(mode);
        tracing::info!("Connecting with transport mode {}", mode);
        self.set_phase(ConnectionPhase::Connecting);
        let opened = attached.transport.open().await;
        *slot = Some(attached);
        opened
    }

    /// Closes the transport without scheduling any rebuild
    pub async fn disconnect(&self) -> Result<()> {
        self.cancel_rebuild();
        let retired = self.retire(&mut *self.transport.write().await);
        if let Some(transport) = retired {
            tracing::info!("Disconnecting transport");
            transport.close().await?;
        }
        self.set_phase(ConnectionPhase::Disconnected);
        Ok(())
    }

    /// Registers a change-event handler
    pub fn on<F>(&self, event: impl Into<EventName>, handler: F) -> SubscriptionId
    where
        F: Fn(&Value) -> HandlerResult + Send + Sync + 'static,
    {
        self.router.on(event, handler)
    }

    /// Removes one change-event handler
    pub fn off(&self, event: impl Into<EventName>, id: SubscriptionId) -> bool {
        self.router.off(event, id)
    }

    /// Registers a callback for hidden → visible transitions
    pub fn on_resume<F>(&self, callback: F)
    where
        F: Fn() -> HandlerResult + Send + Sync + 'static,
    {
        self.resume_callbacks.lock().push(Arc::new(callback));
    }

    /// The live transport, if any
    pub async fn transport(&self) -> Option<Arc<dyn Transport>> {
        self.transport
            .read()
            .await
            .as_ref()
            .map(|attached| Arc::clone(&attached.transport))
    }

    pub fn set_debug(&self, enabled: bool) {
        self.debug.store(enabled, Ordering::Relaxed);
        tracing::info!("Connection debug logging {}", if enabled { "on" } else { "off" });
    }

    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    pub fn transport_mode(&self) -> TransportMode {
        self.state.borrow().transport_mode
    }

    /// Watch channel carrying every state change
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Watch channel that turns `Some` once the server ends the session
    pub fn subscribe_termination(&self) -> watch::Receiver<Option<TerminationReason>> {
        self.termination.subscribe()
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    /// Feeds a page visibility change.
    ///
    /// On hidden → visible every resume callback runs in registration order, then the
    /// manager reconnects if the link is down.
    pub async fn set_visibility(&self, visibility: Visibility) -> Result<()> {
        let previous = std::mem::replace(&mut *self.visibility.lock(), visibility);
        if previous != Visibility::Hidden || visibility != Visibility::Visible {
            return Ok(());
        }

        tracing::debug!("Page resumed");
        let callbacks: Vec<ResumeCallback> = self.resume_callbacks.lock().clone();
        for callback in callbacks {
            if let Err(message) = run_guarded(|| callback()) {
                tracing::error!("Resume callback failed: {}", message);
                if let Some(notifier) = &self.notifier {
                    notifier.notify_error("resume", &message);
                }
            }
        }

        if !self.is_connected() && !self.is_terminated() {
            self.connect().await?;
        }
        Ok(())
    }

    /// Ends the session for good: closes the transport, parks the manager and calls
    /// the redirector. Only the first call has any effect.
    pub async fn terminate(&self, reason: TerminationReason) -> bool {
        if self.terminated.swap(true, Ordering::AcqRel) {
            return false;
        }
        tracing::warn!("Session terminated by server: {:?}", reason);

        self.cancel_rebuild();
        let retired = self.retire(&mut *self.transport.write().await);
        if let Some(transport) = retired
            && let Err(e) = transport.close().await
        {
            tracing::debug!("Transport close after termination failed: {}", e);
        }
        self.set_phase(ConnectionPhase::Disconnected);
        self.termination.send_replace(Some(reason.clone()));

        if let Some(redirector) = &self.redirector {
            redirector.redirect(&reason);
        }
        true
    }

    /// Builds a transport and starts pumping its events
    fn attach(&self, mode: TransportMode) -> AttachedTransport {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = self.factory.create(mode, tx);
        tokio::spawn(pump_events(self.this.clone(), generation, rx));
        tracing::debug!(
            "Attached transport generation {} with {} handlers",
            generation,
            self.router.handler_count()
        );
        AttachedTransport {
            generation,
            transport,
        }
    }

    /// Detaches the live transport; its late events are ignored from here on
    fn retire(&self, slot: &mut Option<AttachedTransport>) -> Option<Arc<dyn Transport>> {
        let attached = slot.take()?;
        self.generation.fetch_add(1, Ordering::AcqRel);
        Some(attached.transport)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::Acquire) == generation
    }

    fn set_phase(&self, phase: ConnectionPhase) {
        self.state.send_if_modified(|state| {
            if state.phase == phase {
                return false;
            }
            tracing::debug!("Connection phase {:?} -> {:?}", state.phase, phase);
            state.phase = phase;
            if phase == ConnectionPhase::Connected {
                state.last_error = None;
            }
            true
        });
    }

    fn record_error(&self, message: &str) {
        self.state.send_modify(|state| {
            state.last_error = Some(message.to_string());
        });
    }

    fn cancel_rebuild(&self) {
        if let Some(task) = self.rebuild_task.lock().take() {
            task.abort();
        }
    }

    async fn handle_event(&self, generation: u64, event: TransportEvent) {
        match event {
            TransportEvent::Connected { channel } => {
                tracing::info!("Connected over {:?}", channel);
                self.set_phase(ConnectionPhase::Connected);
            }
            TransportEvent::Disconnected { reason } => {
                tracing::warn!("Disconnected: {}", reason);
                self.set_phase(ConnectionPhase::Disconnected);
            }
            TransportEvent::ConnectError(failure) | TransportEvent::ChannelDiagnostic(failure) => {
                self.record_error(&failure.message);
                if failure.is_protocol() {
                    self.handle_protocol_failure(generation, failure).await;
                } else {
                    // The transport's own retry loop takes it from here.
                    tracing::warn!("Network failure, transport will retry: {}", failure);
                    self.set_phase(ConnectionPhase::Disconnected);
                }
            }
            TransportEvent::Message(envelope) => self.handle_message(envelope).await,
        }
    }

    async fn handle_message(&self, envelope: Envelope) {
        if self.debug.load(Ordering::Relaxed) {
            tracing::debug!(
                "Inbound event={}, payload={}",
                envelope.event,
                serde_json::to_string(&envelope.payload).unwrap_or_default()
            );
        }
        if envelope.name() == EventName::System(SystemEvent::SessionTerminated) {
            self.terminate(TerminationReason::ServerPushed).await;
            return;
        }
        self.router.route(&envelope);
    }

    /// Rotates the mode, tears the transport down, and schedules a rebuild
    async fn handle_protocol_failure(&self, generation: u64, failure: TransportFailure) {
        let retired = {
            let mut slot = self.transport.write().await;
            if slot.as_ref().map(|a| a.generation) != Some(generation) {
                return;
            }
            let retired = self.retire(&mut slot);

            let mut next_mode = None;
            self.state.send_modify(|state| {
                state.transport_mode = state.transport_mode.rotate();
                state.phase = ConnectionPhase::Disconnected;
                next_mode = Some(state.transport_mode);
            });
            tracing::warn!(
                "Protocol failure ({}), rebuilding transport as {:?}",
                failure.message,
                next_mode
            );

            // Close while still holding the slot so nothing can attach in between.
            if let Some(transport) = &retired
                && let Err(e) = transport.close().await
            {
                tracing::debug!("Closing failed transport: {}", e);
            }
            retired
        };
        drop(retired);

        let this = self.this.clone();
        let delay = self.rebuild_delay;
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(manager) = this.upgrade() else {
                return;
            };
            if let Err(e) = manager.connect().await {
                tracing::error!("Transport rebuild failed: {}", e);
            }
        });
        if let Some(previous) = self.rebuild_task.lock().replace(task) {
            previous.abort();
        }
    }
}

async fn pump_events(
    manager: Weak<ConnectionManager>,
    generation: u64,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(manager) = manager.upgrade() else {
            break;
        };
        if !manager.is_current(generation) {
            tracing::debug!("Dropping event from retired transport {}", generation);
            break;
        }
        manager.handle_event(generation, event).await;
    }
    tracing::debug!("Event pump for transport {} finished", generation);
}

impl LivenessSource for ConnectionManager {
    fn is_connected(&self) -> bool {
        self.state.borrow().is_connected()
    }
}

#[async_trait]
impl ReconnectControl for ConnectionManager {
    async fn force_reconnect(&self) -> Result<()> {
        if self.is_terminated() {
            return Err(RealtimeError::SessionTerminated { status: None });
        }
        let existing = self.transport().await;
        match existing {
            Some(transport) => {
                self.set_phase(ConnectionPhase::Connecting);
                transport.reconnect().await
            }
            None => self.connect().await,
        }
    }

    fn is_terminated(&self) -> bool {
        ConnectionManager::is_terminated(self)
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.cancel_rebuild();
    }
}
