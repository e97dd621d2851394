pub mod constants;
pub mod error;
pub mod message;

pub use constants::*;
pub use error::{BoxError, HandlerResult, RealtimeError, Result};
pub use message::Envelope;
