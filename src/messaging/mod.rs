// Messaging module - Event names and handler dispatch
pub mod event;
pub mod router;

pub use event::{ChangeEvent, EventName, SystemEvent};
pub use router::{DispatchReport, EventHandler, EventRouter, SubscriptionId};
