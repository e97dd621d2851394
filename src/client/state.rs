use crate::transport::TransportMode;

/// Connection lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionPhase {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Observable connection state, mutated only by the connection manager
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnectionState {
    pub phase: ConnectionPhase,
    pub transport_mode: TransportMode,
    pub last_error: Option<String>,
}

impl ConnectionState {
    pub fn new(transport_mode: TransportMode) -> Self {
        Self {
            transport_mode,
            ..Default::default()
        }
    }

    pub fn is_connected(&self) -> bool {
        self.phase == ConnectionPhase::Connected
    }
}

/// Page visibility as reported by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    #[default]
    Visible,
    Hidden,
}
