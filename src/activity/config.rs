use crate::types::HandlerResult;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Start or stop hook of an activity
pub type ActivityFn = Arc<dyn Fn() -> HandlerResult + Send + Sync + 'static>;

/// How a named background activity runs.
///
/// `start` runs once when the activity starts and then on every tick of `interval` when
/// one is set; `stop` runs once when it stops.
#[derive(Clone)]
pub struct ActivityConfig {
    pub(crate) start: ActivityFn,
    pub(crate) stop: Option<ActivityFn>,
    pub(crate) interval: Option<Duration>,
    pub(crate) auto_start: bool,
}

impl ActivityConfig {
    pub fn new<F>(start: F) -> Self
    where
        F: Fn() -> HandlerResult + Send + Sync + 'static,
    {
        Self {
            start: Arc::new(start),
            stop: None,
            interval: None,
            auto_start: true,
        }
    }

    pub fn with_stop<F>(mut self, stop: F) -> Self
    where
        F: Fn() -> HandlerResult + Send + Sync + 'static,
    {
        self.stop = Some(Arc::new(stop));
        self
    }

    /// Repeats `start` every `interval`; a zero interval means run once
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    /// Whether connection recovery starts this activity (default true)
    pub fn with_auto_start(mut self, auto_start: bool) -> Self {
        self.auto_start = auto_start;
        self
    }

    pub fn interval(&self) -> Option<Duration> {
        self.interval.filter(|d| !d.is_zero())
    }

    pub fn auto_start(&self) -> bool {
        self.auto_start
    }
}

impl fmt::Debug for ActivityConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActivityConfig")
            .field("interval", &self.interval)
            .field("auto_start", &self.auto_start)
            .field("has_stop", &self.stop.is_some())
            .finish()
    }
}

/// Snapshot of one registered activity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityInfo {
    pub name: String,
    pub running: bool,
    pub interval: Option<Duration>,
    pub auto_start: bool,
    pub started_at: Option<Instant>,
}
