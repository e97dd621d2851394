use serde::{Deserialize, Serialize};

use crate::messaging::EventName;

/// Wire envelope: an event name plus an opaque payload.
///
/// The payload is never inspected or rewritten by this crate, so fields such as
/// `originClientId` reach handlers exactly as the server sent them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    pub event: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Envelope {
    pub fn new(event: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            event: event.into(),
            payload,
        }
    }

    /// Typed view of the event name
    pub fn name(&self) -> EventName {
        EventName::from_str(&self.event)
    }

    /// Decodes one text frame, which may carry a single envelope or a batch.
    pub fn decode_frame(text: &str) -> serde_json::Result<Vec<Envelope>> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        if value.is_array() {
            serde_json::from_value(value)
        } else {
            serde_json::from_value(value).map(|envelope| vec![envelope])
        }
    }
}
