// Infrastructure module - Core background services and utilities
pub mod heartbeat;
pub mod http;
pub mod task_manager;
pub mod timer;

pub use heartbeat::HeartbeatMonitor;
pub use http::{HeartbeatAck, HeartbeatClient, http_to_ws_endpoint};
pub use task_manager::TaskManager;
pub use timer::{BackoffStrategy, FixedDelay, SteppedDelay};
