// Module declarations
mod builder;
mod connection;
mod core;
mod state;

// Public API exports
pub use builder::{RuntimeOptions, TabRuntimeBuilder};
pub use connection::{ConnectionManager, ResumeCallback};
pub use self::core::TabRuntime;
pub use state::{ConnectionPhase, ConnectionState, Visibility};
