/// Connection lifecycle events emitted by the transport (magic strings layer)
pub mod system_events {
    pub const CONNECT: &str = "connect";
    pub const DISCONNECT: &str = "disconnect";
    pub const CONNECT_ERROR: &str = "connect_error";
    pub const SESSION_TERMINATED: &str = "session_terminated";
}

/// Application change events fanned out to UI consumers
pub mod change_events {
    pub const CATEGORY_CHANGED: &str = "category_changed";
    pub const SUBCATEGORY_CHANGED: &str = "subcategory_changed";
    pub const FILE_CHANGED: &str = "file_changed";
    pub const USER_CHANGED: &str = "user_changed";
    pub const GROUP_CHANGED: &str = "group_changed";
    pub const REGISTRATOR_CHANGED: &str = "registrator_changed";
    pub const ADMIN_CHANGED: &str = "admin_changed";
}

/// Default transport path, appended to the same-origin base URL
pub const DEFAULT_TRANSPORT_PATH: &str = "/realtime";

/// Default heartbeat endpoint path
pub const DEFAULT_HEARTBEAT_PATH: &str = "/api/heartbeat";

/// Transport-level reconnect delays (milliseconds). The last entry repeats forever.
pub const TRANSPORT_RECONNECT_INTERVALS: [u64; 4] = [1000, 2000, 5000, 10000];
pub const DEFAULT_RECONNECT_FALLBACK: u64 = 10000;

/// Delay before rebuilding the transport after a protocol failure (milliseconds)
pub const PROTOCOL_REBUILD_DELAY: u64 = 1000;

/// Delay between two long-poll requests on the polling channel (milliseconds)
pub const DEFAULT_POLL_INTERVAL: u64 = 1000;

/// Supervisor reconnect interval when the settings provider is absent or fails (seconds)
pub const DEFAULT_RECONNECT_INTERVAL_SECS: u64 = 5;

/// Settle period between a forced reconnect and the liveness re-check (milliseconds)
pub const RECONNECT_SETTLE_DELAY: u64 = 1000;

/// Cadence of the liveness probes, and the maximum age of a cached liveness sample
pub const LIVENESS_PROBE_INTERVAL: u64 = 1000;

/// Connected-profile intervals (milliseconds)
pub mod connected_intervals {
    pub const PRESENCE: u64 = 30_000;
    pub const UPLOAD: u64 = 5_000;
    pub const HEARTBEAT: u64 = 30_000;
    pub const WATCHDOG: u64 = 10_000;
}

/// Disconnected-profile intervals (milliseconds), longer to shed load while the link is down
pub mod disconnected_intervals {
    pub const PRESENCE: u64 = 120_000;
    pub const UPLOAD: u64 = 30_000;
    pub const HEARTBEAT: u64 = 60_000;
    pub const WATCHDOG: u64 = 30_000;
}

/// WebSocket close codes
pub const WS_CLOSE_NORMAL: u16 = 1000;
