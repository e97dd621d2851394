use super::config::{ActivityConfig, ActivityFn, ActivityInfo};
use super::supervisor::ReconnectSupervisor;
use crate::integration::{Notifier, ReconnectControl, SettingsProvider};
use crate::messaging::router::run_guarded;
use crate::types::{LIVENESS_PROBE_INTERVAL, RealtimeError, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

struct ActivityEntry {
    name: String,
    config: ActivityConfig,
    running: bool,
    started_at: Option<Instant>,
    timer: Option<JoinHandle<()>>,
}

impl ActivityEntry {
    fn info(&self) -> ActivityInfo {
        ActivityInfo {
            name: self.name.clone(),
            running: self.running,
            interval: self.config.interval(),
            auto_start: self.config.auto_start,
            started_at: self.started_at,
        }
    }
}

/// Named recurring activities started and stopped in lockstep with the connection.
///
/// Liveness transitions arrive through [`handle_connection_change`](Self::handle_connection_change),
/// either from the registry's own 1 s probe or from a caller. A drop stops every
/// activity and hands over to the [`ReconnectSupervisor`]; a recovery restarts the
/// auto-start activities.
pub struct ActivityRegistry {
    control: Option<Arc<dyn ReconnectControl>>,
    notifier: Option<Arc<dyn Notifier>>,
    activities: Mutex<Vec<ActivityEntry>>,
    connected: AtomicBool,
    halted: AtomicBool,
    supervisor: Arc<ReconnectSupervisor>,
    probe: Mutex<Option<JoinHandle<()>>>,
    this: Weak<ActivityRegistry>,
}

impl ActivityRegistry {
    pub fn new(
        control: Option<Arc<dyn ReconnectControl>>,
        settings: Option<&dyn SettingsProvider>,
        notifier: Option<Arc<dyn Notifier>>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this: &Weak<Self>| {
            let restored = this.clone();
            let supervisor = ReconnectSupervisor::new(
                control.clone(),
                settings,
                Box::new(move || {
                    if let Some(registry) = restored.upgrade() {
                        registry.handle_connection_change(true);
                    }
                }),
            );
            Self {
                control,
                notifier,
                activities: Mutex::new(Vec::new()),
                connected: AtomicBool::new(false),
                halted: AtomicBool::new(false),
                supervisor,
                probe: Mutex::new(None),
                this: this.clone(),
            }
        })
    }

    /// Samples liveness and, when a connection control is present, polls it once per
    /// second for transitions nobody reported.
    pub fn init(&self) {
        let Some(control) = self.control.clone() else {
            tracing::debug!("Activity registry running without liveness source");
            return;
        };

        if control.is_connected() {
            self.handle_connection_change(true);
        }

        let this = self.this.clone();
        let period = Duration::from_millis(LIVENESS_PROBE_INTERVAL);
        let start = Instant::now() + period;
        let handle = tokio::spawn(async move {
            let mut ticker = time::interval_at(start, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(registry) = this.upgrade() else {
                    break;
                };
                let connected = control.is_connected();
                if connected != registry.is_connected() {
                    registry.handle_connection_change(connected);
                }
            }
        });

        if let Some(previous) = self.probe.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Stores `config` under `name`, replacing (and stopping) any previous registration.
    /// Starts it right away when connected and auto-start.
    pub fn register(&self, name: impl Into<String>, config: ActivityConfig) -> Result<()> {
        let name = name.into();
        let auto_start = config.auto_start;
        tracing::debug!("Registering activity '{}' ({:?})", name, config);

        let replaced = {
            let mut activities = self.activities.lock();
            let previous = activities
                .iter()
                .position(|entry| entry.name == name)
                .map(|index| activities.remove(index));
            activities.push(ActivityEntry {
                name: name.clone(),
                config,
                running: false,
                started_at: None,
                timer: None,
            });
            previous
        };

        if let Some(mut previous) = replaced
            && previous.running
        {
            if let Some(timer) = previous.timer.take() {
                timer.abort();
            }
            tracing::info!("Stopping replaced activity '{}'", name);
            if let Some(stop_fn) = previous.config.stop.as_ref() {
                self.invoke(&name, "stop", stop_fn);
            }
        }

        if self.is_connected() && auto_start && !self.is_halted() {
            self.start(&name)?;
        }
        Ok(())
    }

    /// Stops the activity if running, then forgets it
    pub fn unregister(&self, name: &str) -> bool {
        if let Err(e) = self.stop(name) {
            tracing::debug!("Stopping '{}' before unregister: {}", name, e);
        }
        let mut activities = self.activities.lock();
        let before = activities.len();
        activities.retain(|entry| entry.name != name);
        before != activities.len()
    }

    /// Runs `config.start` now and, with an interval, on every tick. No-op if running.
    pub fn start(&self, name: &str) -> Result<()> {
        let start_fn = {
            let mut activities = self.activities.lock();
            let entry = activities
                .iter_mut()
                .find(|entry| entry.name == name)
                .ok_or_else(|| RealtimeError::UnknownActivity(name.to_string()))?;
            if entry.running {
                return Ok(());
            }

            entry.running = true;
            entry.started_at = Some(Instant::now());
            if let Some(period) = entry.config.interval() {
                entry.timer = Some(self.spawn_timer(name, period, Arc::clone(&entry.config.start)));
            }
            Arc::clone(&entry.config.start)
        };

        tracing::info!("Starting activity '{}'", name);
        self.invoke(name, "start", &start_fn);
        Ok(())
    }

    /// Clears the timer and runs `config.stop`. No-op if not running.
    pub fn stop(&self, name: &str) -> Result<()> {
        let stop_fn = {
            let mut activities = self.activities.lock();
            let Some(entry) = activities.iter_mut().find(|entry| entry.name == name) else {
                return Ok(());
            };
            if !entry.running {
                return Ok(());
            }

            entry.running = false;
            entry.started_at = None;
            if let Some(timer) = entry.timer.take() {
                timer.abort();
            }
            entry.config.stop.clone()
        };

        tracing::info!("Stopping activity '{}'", name);
        if let Some(stop_fn) = stop_fn {
            self.invoke(name, "stop", &stop_fn);
        }
        Ok(())
    }

    /// Starts every auto-start activity
    pub fn start_all(&self) {
        for name in self.names(true) {
            if let Err(e) = self.start(&name) {
                tracing::warn!("Could not start '{}': {}", name, e);
            }
        }
    }

    /// Stops every activity regardless of auto-start
    pub fn stop_all(&self) {
        for name in self.names(false) {
            if let Err(e) = self.stop(&name) {
                tracing::warn!("Could not stop '{}': {}", name, e);
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.activities
            .lock()
            .iter()
            .any(|entry| entry.name == name && entry.running)
    }

    /// Snapshot of every registered activity, in registration order
    pub fn activities(&self) -> Vec<ActivityInfo> {
        self.activities.lock().iter().map(ActivityEntry::info).collect()
    }

    pub fn supervisor(&self) -> &Arc<ReconnectSupervisor> {
        &self.supervisor
    }

    /// Reacts to a liveness transition; repeated reports of the same state are ignored.
    pub fn handle_connection_change(&self, connected: bool) {
        if self.is_halted() {
            return;
        }
        let was_connected = self.connected.swap(connected, Ordering::AcqRel);
        if was_connected == connected {
            return;
        }

        if connected {
            tracing::info!("Connection restored, starting activities");
            self.start_all();
            self.supervisor.reset();
        } else {
            tracing::warn!("Connection lost, stopping activities");
            self.stop_all();
            self.supervisor.start();
        }
    }

    /// Stops everything for good after the session was terminated
    pub fn halt(&self) {
        if self.halted.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::info!("Halting activity registry");
        if let Some(probe) = self.probe.lock().take() {
            probe.abort();
        }
        self.supervisor.halt();
        self.stop_all();
        self.connected.store(false, Ordering::Release);
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    fn names(&self, auto_start_only: bool) -> Vec<String> {
        self.activities
            .lock()
            .iter()
            .filter(|entry| !auto_start_only || entry.config.auto_start)
            .map(|entry| entry.name.clone())
            .collect()
    }

    fn spawn_timer(&self, name: &str, period: Duration, start_fn: ActivityFn) -> JoinHandle<()> {
        let name = name.to_string();
        let notifier = self.notifier.clone();
        let start = Instant::now() + period;
        tokio::spawn(async move {
            let mut ticker = time::interval_at(start, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(message) = run_guarded(|| start_fn()) {
                    report(notifier.as_deref(), &name, &message);
                }
            }
        })
    }

    fn invoke(&self, name: &str, hook: &str, callback: &ActivityFn) {
        if let Err(message) = run_guarded(|| callback()) {
            report(self.notifier.as_deref(), name, &format!("{} failed: {}", hook, message));
        }
    }
}

fn report(notifier: Option<&dyn Notifier>, name: &str, message: &str) {
    match notifier {
        Some(notifier) => notifier.notify_error(name, message),
        None => tracing::error!("Activity '{}': {}", name, message),
    }
}

impl Drop for ActivityRegistry {
    fn drop(&mut self) {
        if let Some(probe) = self.probe.get_mut().take() {
            probe.abort();
        }
        for entry in self.activities.get_mut().iter_mut() {
            if let Some(timer) = entry.timer.take() {
                timer.abort();
            }
        }
        self.supervisor.halt();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::supervisor::tests::FakeControl;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Counters {
        starts: AtomicUsize,
        stops: AtomicUsize,
    }

    impl Counters {
        fn starts(&self) -> usize {
            self.starts.load(Ordering::SeqCst)
        }

        fn stops(&self) -> usize {
            self.stops.load(Ordering::SeqCst)
        }
    }

    fn counted(counters: &Arc<Counters>) -> ActivityConfig {
        let on_start = Arc::clone(counters);
        let on_stop = Arc::clone(counters);
        ActivityConfig::new(move || {
            on_start.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .with_stop(move || {
            on_stop.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn registry(control: &Arc<FakeControl>) -> Arc<ActivityRegistry> {
        ActivityRegistry::new(Some(control.clone()), None, None)
    }

    async fn advance(ms: u64) {
        tokio::time::advance(Duration::from_millis(ms)).await;
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_double_start_keeps_one_timer() {
        let registry = registry(&FakeControl::new(false));
        let counters = Arc::new(Counters::default());
        registry
            .register("upload", counted(&counters).with_interval(Duration::from_secs(5)))
            .unwrap();

        registry.start("upload").unwrap();
        registry.start("upload").unwrap();
        assert_eq!(counters.starts(), 1);
        advance(0).await;

        advance(5_000).await;
        assert_eq!(counters.starts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_when_not_running_is_silent() {
        let registry = registry(&FakeControl::new(false));
        let counters = Arc::new(Counters::default());
        registry.register("watchdog", counted(&counters)).unwrap();

        registry.stop("watchdog").unwrap();
        registry.stop("never-registered").unwrap();
        assert_eq!(counters.stops(), 0);
        assert!(matches!(
            registry.start("never-registered"),
            Err(RealtimeError::UnknownActivity(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_flap_within_one_tick_restarts_once() {
        let registry = registry(&FakeControl::new(true));
        registry.handle_connection_change(true);
        let counters = Arc::new(Counters::default());
        registry.register("presence", counted(&counters)).unwrap();
        assert_eq!(counters.starts(), 1);

        registry.handle_connection_change(false);
        registry.handle_connection_change(true);

        assert_eq!(counters.stops(), 1);
        assert_eq!(counters.starts(), 2);
        assert!(registry.is_running("presence"));
        assert!(!registry.supervisor().is_active());
        assert_eq!(registry.supervisor().attempts(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_register_keeps_one_entry_per_name() {
        let registry = registry(&FakeControl::new(true));
        registry.handle_connection_change(true);
        let counters = Arc::new(Counters::default());

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..25 {
                        registry.register("presence", counted(&counters)).unwrap();
                    }
                });
            }
        });

        let activities = registry.activities();
        assert_eq!(activities.len(), 1);
        assert!(activities[0].running);
        assert_eq!(counters.starts() - counters.stops(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_registered_while_disconnected_starts_on_recovery() {
        let control = FakeControl::new(false);
        let registry = registry(&control);
        registry.init();
        let counters = Arc::new(Counters::default());
        registry
            .register("presence", counted(&counters).with_interval(Duration::from_secs(5)))
            .unwrap();
        assert!(!registry.is_running("presence"));
        advance(0).await;

        control.set_connected(true);
        advance(1_000).await;

        assert!(registry.is_running("presence"));
        assert_eq!(counters.starts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_all_honors_auto_start_stop_all_does_not() {
        let registry = registry(&FakeControl::new(false));
        let auto = Arc::new(Counters::default());
        let manual = Arc::new(Counters::default());
        registry.register("auto", counted(&auto)).unwrap();
        registry
            .register("manual", counted(&manual).with_auto_start(false))
            .unwrap();

        registry.start_all();
        assert!(registry.is_running("auto"));
        assert!(!registry.is_running("manual"));

        registry.start("manual").unwrap();
        registry.stop_all();
        assert_eq!(auto.stops(), 1);
        assert_eq!(manual.stops(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_loss_stops_and_supervises() {
        let control = FakeControl::new(true);
        let registry = registry(&control);
        registry.init();
        let counters = Arc::new(Counters::default());
        registry.register("heartbeat", counted(&counters)).unwrap();
        assert!(registry.is_running("heartbeat"));

        control.set_connected(false);
        advance(1_000).await;
        assert!(!registry.is_running("heartbeat"));
        assert_eq!(registry.supervisor().attempts(), 1);

        // The supervisor's forced reconnect brings the link back.
        control.reconnect_succeeds.store(true, Ordering::SeqCst);
        advance(5_000).await;
        assert_eq!(control.reconnects(), 1);
        advance(1_000).await;

        assert!(registry.is_running("heartbeat"));
        assert_eq!(counters.starts(), 2);
        assert_eq!(registry.supervisor().attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unregister_and_snapshot() {
        let registry = registry(&FakeControl::new(false));
        registry.handle_connection_change(true);
        let counters = Arc::new(Counters::default());
        registry
            .register("upload", counted(&counters).with_interval(Duration::from_secs(5)))
            .unwrap();
        registry
            .register("watchdog", counted(&counters).with_auto_start(false))
            .unwrap();

        let info = registry.activities();
        assert_eq!(info.len(), 2);
        assert_eq!(info[0].name, "upload");
        assert!(info[0].running);
        assert_eq!(info[0].interval, Some(Duration::from_secs(5)));
        assert!(info[0].started_at.is_some());
        assert!(!info[1].running);

        assert!(registry.unregister("upload"));
        assert!(!registry.unregister("upload"));
        assert_eq!(counters.stops(), 1);
        assert_eq!(registry.activities().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_hooks_are_reported_not_propagated() {
        let registry = registry(&FakeControl::new(false));
        registry
            .register(
                "flaky",
                ActivityConfig::new(|| Err("boom".into())).with_stop(|| panic!("stop exploded")),
            )
            .unwrap();
        registry.start("flaky").unwrap();
        registry.stop("flaky").unwrap();
        assert!(!registry.is_running("flaky"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_halt_blocks_restart() {
        let control = FakeControl::new(true);
        let registry = registry(&control);
        registry.init();
        let counters = Arc::new(Counters::default());
        registry.register("presence", counted(&counters)).unwrap();

        registry.halt();
        assert!(!registry.is_running("presence"));

        control.set_connected(false);
        advance(1_000).await;
        control.set_connected(true);
        advance(10_000).await;
        assert_eq!(counters.starts(), 1);
        assert_eq!(registry.supervisor().attempts(), 0);
        assert_eq!(control.reconnects(), 0);
    }
}
