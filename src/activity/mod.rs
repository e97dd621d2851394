// Background activities gated by connection liveness
mod config;
mod registry;
mod supervisor;

pub use config::{ActivityConfig, ActivityFn, ActivityInfo};
pub use registry::ActivityRegistry;
pub use supervisor::{ReconnectSupervisor, RestoredHook};
