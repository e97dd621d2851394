use crate::types::constants::{change_events, system_events};
use serde::{Deserialize, Serialize};

/// Type-safe inbound event names
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventName {
    /// Connection lifecycle events
    System(SystemEvent),

    /// Application change notifications fanned out to handlers
    Change(ChangeEvent),

    /// Anything else the server sends; never dispatched
    Custom(String),
}

impl EventName {
    /// Parse a string into an EventName
    pub fn from_str(s: &str) -> Self {
        if let Some(change) = ChangeEvent::parse(s) {
            return Self::Change(change);
        }
        if let Some(system) = SystemEvent::parse(s) {
            return Self::System(system);
        }
        Self::Custom(s.to_string())
    }

    /// Convert event to string representation
    pub fn as_str(&self) -> &str {
        match self {
            Self::System(sys) => sys.as_str(),
            Self::Change(change) => change.as_str(),
            Self::Custom(s) => s,
        }
    }

    pub fn is_dispatchable(&self) -> bool {
        matches!(self, Self::Change(_))
    }
}

impl From<&str> for EventName {
    fn from(s: &str) -> Self {
        Self::from_str(s)
    }
}

impl From<String> for EventName {
    fn from(s: String) -> Self {
        Self::from_str(&s)
    }
}

impl From<ChangeEvent> for EventName {
    fn from(change: ChangeEvent) -> Self {
        Self::Change(change)
    }
}

impl std::fmt::Display for EventName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The fixed set of application change notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeEvent {
    #[serde(rename = "category_changed")]
    Category,
    #[serde(rename = "subcategory_changed")]
    Subcategory,
    #[serde(rename = "file_changed")]
    File,
    #[serde(rename = "user_changed")]
    User,
    #[serde(rename = "group_changed")]
    Group,
    #[serde(rename = "registrator_changed")]
    Registrator,
    #[serde(rename = "admin_changed")]
    Admin,
}

impl ChangeEvent {
    pub const ALL: [ChangeEvent; 7] = [
        Self::Category,
        Self::Subcategory,
        Self::File,
        Self::User,
        Self::Group,
        Self::Registrator,
        Self::Admin,
    ];

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            change_events::CATEGORY_CHANGED => Some(Self::Category),
            change_events::SUBCATEGORY_CHANGED => Some(Self::Subcategory),
            change_events::FILE_CHANGED => Some(Self::File),
            change_events::USER_CHANGED => Some(Self::User),
            change_events::GROUP_CHANGED => Some(Self::Group),
            change_events::REGISTRATOR_CHANGED => Some(Self::Registrator),
            change_events::ADMIN_CHANGED => Some(Self::Admin),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Category => change_events::CATEGORY_CHANGED,
            Self::Subcategory => change_events::SUBCATEGORY_CHANGED,
            Self::File => change_events::FILE_CHANGED,
            Self::User => change_events::USER_CHANGED,
            Self::Group => change_events::GROUP_CHANGED,
            Self::Registrator => change_events::REGISTRATOR_CHANGED,
            Self::Admin => change_events::ADMIN_CHANGED,
        }
    }
}

/// Connection lifecycle events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SystemEvent {
    #[serde(rename = "connect")]
    Connect,
    #[serde(rename = "disconnect")]
    Disconnect,
    #[serde(rename = "connect_error")]
    ConnectError,
    /// Server-pushed forced logout
    #[serde(rename = "session_terminated")]
    SessionTerminated,
}

impl SystemEvent {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            system_events::CONNECT => Some(Self::Connect),
            system_events::DISCONNECT => Some(Self::Disconnect),
            system_events::CONNECT_ERROR => Some(Self::ConnectError),
            system_events::SESSION_TERMINATED => Some(Self::SessionTerminated),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connect => system_events::CONNECT,
            Self::Disconnect => system_events::DISCONNECT,
            Self::ConnectError => system_events::CONNECT_ERROR,
            Self::SessionTerminated => system_events::SESSION_TERMINATED,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_name_from_str() {
        assert_eq!(
            EventName::from_str("category_changed"),
            EventName::Change(ChangeEvent::Category)
        );
        assert_eq!(
            EventName::from_str("connect_error"),
            EventName::System(SystemEvent::ConnectError)
        );
        assert_eq!(
            EventName::from_str("chat_message"),
            EventName::Custom("chat_message".to_string())
        );
    }

    #[test]
    fn test_only_change_events_are_dispatchable() {
        for change in ChangeEvent::ALL {
            assert!(EventName::from(change).is_dispatchable());
            assert_eq!(ChangeEvent::parse(change.as_str()), Some(change));
        }
        assert!(!EventName::from_str("connect").is_dispatchable());
        assert!(!EventName::from_str("session_terminated").is_dispatchable());
        assert!(!EventName::from_str("whatever").is_dispatchable());
    }

    #[test]
    fn test_change_event_serde_names_match_wire() {
        let json = serde_json::to_string(&ChangeEvent::Registrator).unwrap();
        assert_eq!(json, r#""registrator_changed""#);
    }
}
