use crate::infrastructure::timer::{BackoffStrategy, FixedDelay};
use crate::integration::{ReconnectControl, SettingsProvider, reconnect_interval};
use crate::types::RECONNECT_SETTLE_DELAY;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, sleep_until};
use tokio_util::sync::CancellationToken;

/// Hook run when a cycle finds the connection restored
pub type RestoredHook = Box<dyn Fn() + Send + Sync + 'static>;

struct SupervisorState {
    attempts: u32,
    is_reconnecting: bool,
    pending: Option<JoinHandle<()>>,
    cancel: CancellationToken,
    backoff: Box<dyn BackoffStrategy>,
    halted: bool,
}

/// Unbounded, fixed-delay reconnection cycles after a connection loss.
///
/// Single-flight: while a cycle is scheduled or a reconnect is in flight, further
/// `start` calls are ignored. The reconnecting flag is read-only from outside:
///
/// ```compile_fail
/// # fn force(supervisor: &tabsync_realtime::activity::ReconnectSupervisor) {
/// supervisor.state.lock().is_reconnecting = true;
/// # }
/// ```
pub struct ReconnectSupervisor {
    this: Weak<ReconnectSupervisor>,
    control: Option<Arc<dyn ReconnectControl>>,
    settle: Duration,
    state: Mutex<SupervisorState>,
    on_restored: RestoredHook,
}

impl ReconnectSupervisor {
    pub fn new(
        control: Option<Arc<dyn ReconnectControl>>,
        settings: Option<&dyn SettingsProvider>,
        on_restored: RestoredHook,
    ) -> Arc<Self> {
        let delay = reconnect_interval(settings);
        Self::with_backoff(control, Box::new(FixedDelay::new(delay)), on_restored)
    }

    pub fn with_backoff(
        control: Option<Arc<dyn ReconnectControl>>,
        backoff: Box<dyn BackoffStrategy>,
        on_restored: RestoredHook,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            control,
            settle: Duration::from_millis(RECONNECT_SETTLE_DELAY),
            state: Mutex::new(SupervisorState {
                attempts: 0,
                is_reconnecting: false,
                pending: None,
                cancel: CancellationToken::new(),
                backoff,
                halted: false,
            }),
            on_restored,
        })
    }

    /// Schedules the next cycle unless one is already scheduled or in flight
    pub fn start(&self) {
        let Some(control) = &self.control else {
            tracing::debug!("No connection control, reconnect supervisor idle");
            return;
        };
        if control.is_terminated() {
            tracing::debug!("Session terminated, not scheduling reconnect");
            return;
        }

        let mut state = self.state.lock();
        if state.halted || state.is_reconnecting || state.pending.is_some() {
            tracing::debug!("Reconnect cycle already in flight");
            return;
        }

        state.attempts = state.attempts.saturating_add(1);
        let attempt = state.attempts;
        let deadline = Instant::now() + state.backoff.next_delay();
        let cancel = state.cancel.clone();
        let this = self.this.clone();
        tracing::info!("Reconnect attempt {} scheduled", attempt);

        state.pending = Some(tokio::spawn(async move {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                () = sleep_until(deadline) => {}
            }
            if let Some(supervisor) = this.upgrade() {
                supervisor.run_cycle(attempt, cancel).await;
            }
        }));
    }

    /// Connection came back: forget attempts and cancel whatever is scheduled
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.attempts = 0;
        state.is_reconnecting = false;
        state.backoff.reset();
        Self::cancel_pending(&mut state);
    }

    /// Stops for good; later `start` calls do nothing
    pub fn halt(&self) {
        let mut state = self.state.lock();
        state.halted = true;
        state.is_reconnecting = false;
        Self::cancel_pending(&mut state);
    }

    pub fn attempts(&self) -> u32 {
        self.state.lock().attempts
    }

    pub fn is_reconnecting(&self) -> bool {
        self.state.lock().is_reconnecting
    }

    /// True while a cycle is scheduled or running
    pub fn is_active(&self) -> bool {
        let state = self.state.lock();
        state.is_reconnecting || state.pending.is_some()
    }

    fn cancel_pending(state: &mut SupervisorState) {
        state.cancel.cancel();
        state.cancel = CancellationToken::new();
        if let Some(pending) = state.pending.take() {
            pending.abort();
        }
    }

    async fn run_cycle(&self, attempt: u32, cancel: CancellationToken) {
        let Some(control) = self.control.clone() else {
            return;
        };
        if control.is_terminated() {
            self.finish_without_retry();
            return;
        }
        if control.is_connected() {
            tracing::info!("Connection already restored before attempt {}", attempt);
            self.succeed();
            return;
        }

        self.state.lock().is_reconnecting = true;
        tracing::info!("Forcing reconnect, attempt {}", attempt);
        if let Err(e) = control.force_reconnect().await {
            tracing::warn!("Forced reconnect failed: {}", e);
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tracing::debug!("Reconnect settle wait cancelled");
                return;
            }
            () = sleep(self.settle) => {}
        }

        if control.is_terminated() {
            self.finish_without_retry();
        } else if control.is_connected() {
            tracing::info!("Reconnected after {} attempts", attempt);
            self.succeed();
        } else {
            {
                let mut state = self.state.lock();
                state.is_reconnecting = false;
                // Detach our own handle so the next cycle can be scheduled.
                state.pending = None;
            }
            self.start();
        }
    }

    fn succeed(&self) {
        {
            let mut state = self.state.lock();
            state.attempts = 0;
            state.is_reconnecting = false;
            state.backoff.reset();
            state.pending = None;
        }
        (self.on_restored)();
    }

    fn finish_without_retry(&self) {
        let mut state = self.state.lock();
        state.is_reconnecting = false;
        state.pending = None;
        tracing::info!("Session terminated, reconnect supervisor stops");
    }
}
