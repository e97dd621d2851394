use crate::types::{connected_intervals, disconnected_intervals};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Kinds of recurring background work whose cadence follows liveness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityKind {
    Presence,
    Upload,
    Heartbeat,
    Watchdog,
}

impl ActivityKind {
    pub const ALL: [ActivityKind; 4] = [
        ActivityKind::Presence,
        ActivityKind::Upload,
        ActivityKind::Heartbeat,
        ActivityKind::Watchdog,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityKind::Presence => "presence",
            ActivityKind::Upload => "upload",
            ActivityKind::Heartbeat => "heartbeat",
            ActivityKind::Watchdog => "watchdog",
        }
    }
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One interval per activity kind, in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntervalSet {
    pub presence: u64,
    pub upload: u64,
    pub heartbeat: u64,
    pub watchdog: u64,
}

impl IntervalSet {
    pub fn get(&self, kind: ActivityKind) -> Duration {
        let ms = match kind {
            ActivityKind::Presence => self.presence,
            ActivityKind::Upload => self.upload,
            ActivityKind::Heartbeat => self.heartbeat,
            ActivityKind::Watchdog => self.watchdog,
        };
        Duration::from_millis(ms)
    }

    pub fn connected() -> Self {
        Self {
            presence: connected_intervals::PRESENCE,
            upload: connected_intervals::UPLOAD,
            heartbeat: connected_intervals::HEARTBEAT,
            watchdog: connected_intervals::WATCHDOG,
        }
    }

    pub fn disconnected() -> Self {
        Self {
            presence: disconnected_intervals::PRESENCE,
            upload: disconnected_intervals::UPLOAD,
            heartbeat: disconnected_intervals::HEARTBEAT,
            watchdog: disconnected_intervals::WATCHDOG,
        }
    }
}

/// Intervals used while the link is up and while it is down.
///
/// Loadable from JSON; a missing profile falls back to the built-in one, and so does a
/// zero entry, since a timer cannot run with a zero period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntervalProfile {
    pub connected: IntervalSet,
    pub disconnected: IntervalSet,
}

impl IntervalProfile {
    pub fn select(&self, kind: ActivityKind, connected: bool) -> Duration {
        let (set, builtin) = if connected {
            (&self.connected, IntervalSet::connected())
        } else {
            (&self.disconnected, IntervalSet::disconnected())
        };
        let period = set.get(kind);
        if period.is_zero() {
            tracing::warn!("Zero {} interval configured, using {:?}", kind, builtin.get(kind));
            builtin.get(kind)
        } else {
            period
        }
    }
}

impl Default for IntervalProfile {
    fn default() -> Self {
        Self {
            connected: IntervalSet::connected(),
            disconnected: IntervalSet::disconnected(),
        }
    }
}
