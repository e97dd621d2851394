// Adaptive scheduling of liveness-dependent background work
pub mod core;
pub mod liveness;
pub mod profile;

pub use self::core::{ActivityScheduler, ConnectionChange, TickCallback};
pub use liveness::LivenessCache;
pub use profile::{ActivityKind, IntervalProfile, IntervalSet};
