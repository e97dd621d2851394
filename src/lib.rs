//! # Tabsync Realtime
//!
//! Connection resilience and background-activity orchestration for a browser-tab style
//! realtime client: one long-lived transport fanning change events out to many
//! consumers, plus recurring background work whose cadence follows connection liveness.
//!
//! ## Example
//!
//! ```no_run
//! use tabsync_realtime::{ChangeEvent, RuntimeOptions, TabRuntime};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runtime = TabRuntime::new(RuntimeOptions {
//!         base_url: "https://files.example.com".to_string(),
//!         ..Default::default()
//!     })?;
//!
//!     runtime.connection().on(ChangeEvent::User, |payload| {
//!         println!("user changed: {}", payload);
//!         Ok(())
//!     });
//!     runtime.init().await?;
//!     Ok(())
//! }
//! ```

pub mod activity;
pub mod client;
pub mod infrastructure;
pub mod integration;
pub mod messaging;
pub mod scheduler;
pub mod transport;
pub mod types;

pub use activity::{ActivityConfig, ActivityInfo, ActivityRegistry};
pub use client::{
    ConnectionManager, ConnectionPhase, ConnectionState, RuntimeOptions, TabRuntime,
    TabRuntimeBuilder, Visibility,
};
pub use integration::{
    LivenessSource, Notifier, ReconnectControl, Redirector, SettingsProvider, TerminationReason,
};
pub use messaging::{ChangeEvent, EventName, SubscriptionId, SystemEvent};
pub use scheduler::{ActivityKind, ActivityScheduler, IntervalProfile};
pub use transport::{FailureKind, TransportFailure, TransportMode};
pub use types::{Envelope, HandlerResult, RealtimeError, Result};
