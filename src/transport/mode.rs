use serde::{Deserialize, Serialize};

/// Which channels a transport may use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportMode {
    /// Prefer the websocket channel, degrade to long-polling, upgrade again on the next cycle
    #[default]
    Auto,
    /// Websocket only, no fallback
    RealtimeOnly,
    /// Long-polling only, no upgrade
    PollingOnly,
}

impl TransportMode {
    /// Next mode in the protocol-failure rotation: auto → realtime-only → polling-only → auto
    pub fn rotate(self) -> Self {
        match self {
            Self::Auto => Self::RealtimeOnly,
            Self::RealtimeOnly => Self::PollingOnly,
            Self::PollingOnly => Self::Auto,
        }
    }

    pub fn allows_upgrade(self) -> bool {
        self == Self::Auto
    }

    /// Channel used for the first attempt under this mode
    pub fn initial_channel(self) -> ChannelKind {
        match self {
            Self::Auto | Self::RealtimeOnly => ChannelKind::WebSocket,
            Self::PollingOnly => ChannelKind::Polling,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::RealtimeOnly => "realtime-only",
            Self::PollingOnly => "polling-only",
        }
    }
}

impl std::fmt::Display for TransportMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Concrete channel carrying a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    WebSocket,
    Polling,
}
