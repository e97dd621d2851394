use super::liveness::LivenessCache;
use super::profile::{ActivityKind, IntervalProfile};
use crate::infrastructure::TaskManager;
use crate::integration::{LivenessSource, Notifier};
use crate::messaging::router::panic_message;
use crate::types::{HandlerResult, LIVENESS_PROBE_INTERVAL};
use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

/// Async tick callback
pub type TickCallback = Arc<dyn Fn() -> BoxFuture<'static, HandlerResult> + Send + Sync + 'static>;

/// Emitted when the scheduler's probe sees liveness flip
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionChange {
    pub connected: bool,
}

/// Recurring timers whose period follows connection liveness.
///
/// At most one timer per [`ActivityKind`]. When the probe sees liveness flip every timer
/// is cleared and a [`ConnectionChange`] is broadcast; owners re-create their timers
/// from that notification, picking up the other profile's period.
pub struct ActivityScheduler {
    this: Weak<ActivityScheduler>,
    liveness: LivenessCache,
    profile: IntervalProfile,
    timers: Mutex<TaskManager<ActivityKind>>,
    changes: broadcast::Sender<ConnectionChange>,
    notifier: Option<Arc<dyn Notifier>>,
    probe: Mutex<Option<JoinHandle<()>>>,
}

impl ActivityScheduler {
    pub fn new(
        source: Arc<dyn LivenessSource>,
        profile: IntervalProfile,
        notifier: Option<Arc<dyn Notifier>>,
    ) -> Arc<Self> {
        let (changes, _) = broadcast::channel(16);
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            liveness: LivenessCache::new(source),
            profile,
            timers: Mutex::new(TaskManager::new()),
            changes,
            notifier,
            probe: Mutex::new(None),
        })
    }

    /// Starts the 1 s liveness probe. Calling it again restarts the probe.
    pub fn init(&self) {
        let this = self.this.clone();
        let period = Duration::from_millis(LIVENESS_PROBE_INTERVAL);
        let start = Instant::now() + period;
        let mut last = self.liveness.refresh();

        let handle = tokio::spawn(async move {
            let mut ticker = time::interval_at(start, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(scheduler) = this.upgrade() else {
                    break;
                };
                let connected = scheduler.liveness.refresh();
                if connected != last {
                    last = connected;
                    scheduler.on_transition(connected);
                }
            }
        });

        if let Some(previous) = self.probe.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Period for `kind` under the current liveness
    pub fn optimal_interval(&self, kind: ActivityKind) -> Duration {
        self.profile.select(kind, self.liveness.is_connected())
    }

    /// Cached liveness as seen by the timers
    pub fn connection_state(&self) -> bool {
        self.liveness.is_connected()
    }

    /// Creates (or replaces) the timer for `kind`; returns the period it runs at.
    pub fn create_adaptive_interval<F, Fut>(&self, kind: ActivityKind, callback: F) -> Duration
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.spawn_timer(kind, false, wrap(callback))
    }

    pub fn create_presence_monitor<F, Fut>(&self, callback: F) -> Duration
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.spawn_timer(ActivityKind::Presence, true, wrap(callback))
    }

    pub fn create_upload_monitor<F, Fut>(&self, callback: F) -> Duration
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.spawn_timer(ActivityKind::Upload, true, wrap(callback))
    }

    pub fn create_watchdog_monitor<F, Fut>(&self, callback: F) -> Duration
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.spawn_timer(ActivityKind::Watchdog, true, wrap(callback))
    }

    /// Heartbeat timer; fires while disconnected too since it is what notices recovery
    /// when the realtime channel is silent.
    pub fn create_heartbeat_monitor<F, Fut>(&self, callback: F) -> Duration
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.spawn_timer(ActivityKind::Heartbeat, false, wrap(callback))
    }

    pub fn has_interval(&self, kind: ActivityKind) -> bool {
        self.timers.lock().contains(&kind)
    }

    pub fn clear_interval(&self, kind: ActivityKind) -> bool {
        self.timers.lock().abort(&kind)
    }

    pub fn clear_all_intervals(&self) {
        let mut timers = self.timers.lock();
        if !timers.is_empty() {
            tracing::debug!("Clearing {} scheduled intervals", timers.len());
        }
        timers.abort_all();
    }

    /// Receiver for liveness transitions seen by the probe
    pub fn subscribe_changes(&self) -> broadcast::Receiver<ConnectionChange> {
        self.changes.subscribe()
    }

    /// Stops the probe and every timer
    pub fn halt(&self) {
        if let Some(probe) = self.probe.lock().take() {
            probe.abort();
        }
        self.clear_all_intervals();
    }

    fn on_transition(&self, connected: bool) {
        tracing::info!(
            "Scheduler observed connection {}",
            if connected { "up" } else { "down" }
        );
        self.clear_all_intervals();
        // No subscribers is fine: nobody has timers to rebuild.
        let _ = self.changes.send(ConnectionChange { connected });
    }

    fn spawn_timer(&self, kind: ActivityKind, skip_when_down: bool, callback: TickCallback) -> Duration {
        let period = self.optimal_interval(kind);
        let start = Instant::now() + period;
        let this = self.this.clone();
        tracing::debug!("Scheduling {} every {:?}", kind, period);

        self.timers.lock().spawn(kind, async move {
            let mut ticker = time::interval_at(start, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(scheduler) = this.upgrade() else {
                    break;
                };
                let live = scheduler.liveness.is_connected();
                if skip_when_down && !live {
                    tracing::trace!("Skipping {} tick while disconnected", kind);
                    continue;
                }

                let outcome = AssertUnwindSafe(async { callback().await })
                    .catch_unwind()
                    .await;
                let failure = match outcome {
                    Ok(Ok(())) => None,
                    Ok(Err(e)) => Some(e.to_string()),
                    Err(panic) => Some(panic_message(&*panic)),
                };
                if let Some(message) = failure {
                    scheduler.report_failure(kind, &message);
                }
            }
        });
        period
    }

    fn report_failure(&self, kind: ActivityKind, message: &str) {
        match &self.notifier {
            Some(notifier) => notifier.notify_error(kind.as_str(), message),
            None => tracing::error!("{} tick failed: {}", kind, message),
        }
    }
}

impl Drop for ActivityScheduler {
    fn drop(&mut self) {
        if let Some(probe) = self.probe.get_mut().take() {
            probe.abort();
        }
    }
}

fn wrap<F, Fut>(callback: F) -> TickCallback
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(move || callback().boxed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::liveness::tests::Switch;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingNotifier(Mutex<Vec<(String, String)>>);

    impl Notifier for RecordingNotifier {
        fn notify_error(&self, context: &str, message: &str) {
            self.0.lock().push((context.to_string(), message.to_string()));
        }
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    async fn advance(ms: u64) {
        tokio::time::advance(Duration::from_millis(ms)).await;
        settle().await;
    }

    fn counter() -> (Arc<AtomicUsize>, impl Fn() -> futures::future::Ready<HandlerResult> + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = Arc::clone(&count);
        let callback = move || {
            inner.fetch_add(1, Ordering::SeqCst);
            futures::future::ready(Ok(()))
        };
        (count, callback)
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_interval_follows_liveness() {
        let switch = Switch::new(true);
        let scheduler = ActivityScheduler::new(switch.clone(), IntervalProfile::default(), None);
        assert_eq!(
            scheduler.optimal_interval(ActivityKind::Heartbeat),
            Duration::from_millis(30_000)
        );

        switch.set(false);
        assert_eq!(
            scheduler.optimal_interval(ActivityKind::Heartbeat),
            Duration::from_millis(60_000)
        );

        switch.set(true);
        tokio::time::advance(Duration::from_millis(1000)).await;
        assert_eq!(
            scheduler.optimal_interval(ActivityKind::Heartbeat),
            Duration::from_millis(30_000)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_recreating_replaces_timer_for_kind() {
        let scheduler = ActivityScheduler::new(Switch::new(true), IntervalProfile::default(), None);
        let (first, first_cb) = counter();
        let (second, second_cb) = counter();

        scheduler.create_adaptive_interval(ActivityKind::Upload, first_cb);
        let period = scheduler.create_adaptive_interval(ActivityKind::Upload, second_cb);
        assert_eq!(period, Duration::from_millis(5_000));
        settle().await;

        advance(5_000).await;
        advance(5_000).await;
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_callback_keeps_timer_alive() {
        let notifier = Arc::new(RecordingNotifier::default());
        let scheduler =
            ActivityScheduler::new(Switch::new(true), IntervalProfile::default(), Some(notifier.clone()));
        let calls = Arc::new(AtomicUsize::new(0));
        let inner = Arc::clone(&calls);
        scheduler.create_adaptive_interval(ActivityKind::Watchdog, move || {
            let n = inner.fetch_add(1, Ordering::SeqCst);
            async move {
                let result: HandlerResult = if n == 0 {
                    Err("watchdog check failed".into())
                } else {
                    panic!("watchdog exploded")
                };
                result
            }
        });
        settle().await;

        advance(10_000).await;
        advance(10_000).await;
        advance(10_000).await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(scheduler.has_interval(ActivityKind::Watchdog));
        let reports = notifier.0.lock();
        assert_eq!(reports.len(), 3);
        assert_eq!(reports[0], ("watchdog".to_string(), "watchdog check failed".to_string()));
        assert_eq!(reports[1].1, "panicked: watchdog exploded");
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitors_skip_while_disconnected_except_heartbeat() {
        let switch = Switch::new(true);
        let scheduler = ActivityScheduler::new(switch.clone(), IntervalProfile::default(), None);
        let (presence, presence_cb) = counter();
        let (heartbeat, heartbeat_cb) = counter();
        scheduler.create_presence_monitor(presence_cb);
        scheduler.create_heartbeat_monitor(heartbeat_cb);
        settle().await;

        switch.set(false);
        advance(30_000).await;
        assert_eq!(presence.load(Ordering::SeqCst), 0);
        assert_eq!(heartbeat.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_clears_timers_and_broadcasts_transition() {
        let switch = Switch::new(true);
        let scheduler = ActivityScheduler::new(switch.clone(), IntervalProfile::default(), None);
        let mut changes = scheduler.subscribe_changes();
        scheduler.init();
        let (_, cb) = counter();
        scheduler.create_upload_monitor(cb);
        settle().await;
        assert!(scheduler.has_interval(ActivityKind::Upload));

        switch.set(false);
        advance(1_000).await;

        assert!(!scheduler.has_interval(ActivityKind::Upload));
        assert_eq!(changes.try_recv().unwrap(), ConnectionChange { connected: false });

        // The owner re-creates its timer and gets the disconnected period.
        let (_, cb) = counter();
        assert_eq!(
            scheduler.create_upload_monitor(cb),
            Duration::from_millis(30_000)
        );

        advance(1_000).await;
        assert!(changes.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_period_in_profile_keeps_timer_running() {
        let json = r#"{
            "connected": { "presence": 0, "upload": 5000, "heartbeat": 30000, "watchdog": 10000 }
        }"#;
        let profile: IntervalProfile = serde_json::from_str(json).unwrap();
        let scheduler = ActivityScheduler::new(Switch::new(true), profile, None);
        let (calls, cb) = counter();

        let period = scheduler.create_presence_monitor(cb);
        assert!(!period.is_zero());
        settle().await;
        assert!(scheduler.has_interval(ActivityKind::Presence));

        advance(period.as_millis() as u64).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(scheduler.has_interval(ActivityKind::Presence));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_single_watchdog_interval() {
        let switch = Switch::new(true);
        let scheduler = ActivityScheduler::new(switch.clone(), IntervalProfile::default(), None);
        assert!(scheduler.connection_state());
        let (calls, cb) = counter();
        let (_, upload_cb) = counter();
        scheduler.create_watchdog_monitor(cb);
        scheduler.create_upload_monitor(upload_cb);
        settle().await;

        assert!(scheduler.clear_interval(ActivityKind::Watchdog));
        assert!(!scheduler.clear_interval(ActivityKind::Watchdog));
        assert!(scheduler.has_interval(ActivityKind::Upload));

        advance(10_000).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        switch.set(false);
        assert!(!scheduler.connection_state());
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_all_intervals() {
        let scheduler = ActivityScheduler::new(Switch::new(true), IntervalProfile::default(), None);
        for kind in ActivityKind::ALL {
            let (_, cb) = counter();
            scheduler.create_adaptive_interval(kind, cb);
        }
        settle().await;
        scheduler.clear_all_intervals();
        assert!(ActivityKind::ALL.iter().all(|k| !scheduler.has_interval(*k)));
    }
}
