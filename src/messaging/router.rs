use super::EventName;
use crate::integration::Notifier;
use crate::types::{Envelope, HandlerResult};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Callback invoked with the opaque payload of a change event
pub type EventHandler = Arc<dyn Fn(&Value) -> HandlerResult + Send + Sync + 'static>;

/// Handle returned by [`EventRouter::on`], used to remove that one registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct EventBinding {
    id: SubscriptionId,
    handler: EventHandler,
}

/// Outcome of one dispatch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub invoked: usize,
    pub failed: usize,
}

/// Routes inbound envelopes to registered handlers.
///
/// The table is owned by the connection manager rather than by any transport, so
/// registrations survive every transport rebuild.
pub struct EventRouter {
    bindings: RwLock<HashMap<EventName, Vec<EventBinding>>>,
    next_id: AtomicU64,
    notifier: Option<Arc<dyn Notifier>>,
}

impl EventRouter {
    pub fn new(notifier: Option<Arc<dyn Notifier>>) -> Self {
        Self {
            bindings: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            notifier,
        }
    }

    /// Appends a handler for `event`; earlier registrations are untouched.
    pub fn on<F>(&self, event: impl Into<EventName>, handler: F) -> SubscriptionId
    where
        F: Fn(&Value) -> HandlerResult + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let event = event.into();
        tracing::debug!("Registering handler {:?} for {}", id, event);
        self.bindings
            .write()
            .entry(event)
            .or_default()
            .push(EventBinding {
                id,
                handler: Arc::new(handler),
            });
        id
    }

    /// Removes one registration. Returns false if it was not registered.
    pub fn off(&self, event: impl Into<EventName>, id: SubscriptionId) -> bool {
        let event = event.into();
        let mut bindings = self.bindings.write();
        let Some(list) = bindings.get_mut(&event) else {
            return false;
        };
        let before = list.len();
        list.retain(|binding| binding.id != id);
        let removed = list.len() != before;
        if list.is_empty() {
            bindings.remove(&event);
        }
        removed
    }

    pub fn handler_count(&self) -> usize {
        self.bindings.read().values().map(Vec::len).sum()
    }

    /// Routes an envelope if its name belongs to the application change set
    pub fn route(&self, envelope: &Envelope) -> Option<DispatchReport> {
        let name = envelope.name();
        if !name.is_dispatchable() {
            tracing::debug!("Ignoring non-application event: {}", name);
            return None;
        }
        Some(self.dispatch(&name, &envelope.payload))
    }

    /// Invokes every handler for `event` in registration order.
    ///
    /// A handler that returns `Err` or panics is reported and skipped; the remaining
    /// handlers still run.
    pub fn dispatch(&self, event: &EventName, payload: &Value) -> DispatchReport {
        // Snapshot so handlers may call on/off without deadlocking.
        let handlers: Vec<(SubscriptionId, EventHandler)> = {
            let bindings = self.bindings.read();
            match bindings.get(event) {
                Some(list) => list
                    .iter()
                    .map(|binding| (binding.id, Arc::clone(&binding.handler)))
                    .collect(),
                None => return DispatchReport::default(),
            }
        };

        let mut report = DispatchReport::default();
        for (id, handler) in handlers {
            report.invoked += 1;
            if let Err(message) = run_guarded(|| handler(payload)) {
                report.failed += 1;
                tracing::error!("Handler {:?} for {} failed: {}", id, event, message);
                if let Some(notifier) = &self.notifier {
                    notifier.notify_error(event.as_str(), &message);
                }
            }
        }
        report
    }
}

/// Runs a user callback, turning both `Err` and panics into an error message.
pub(crate) fn run_guarded<F>(callback: F) -> Result<(), String>
where
    F: FnOnce() -> HandlerResult,
{
    match catch_unwind(AssertUnwindSafe(callback)) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(panic) => Err(panic_message(panic.as_ref())),
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}
