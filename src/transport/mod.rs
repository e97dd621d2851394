//! Transport abstraction: one bidirectional channel to the server.
//!
//! A transport owns its own retry loop for network failures and reports everything
//! else through [`TransportEvent`]s on the sender it was built with. Protocol
//! failures are reported and then the transport stops; rebuilding is the connection
//! manager's job.

mod channel;
mod failure;
mod mode;
mod polling;
mod websocket;

pub use channel::{ChannelTransport, DefaultTransportFactory, TransportEndpoint};
pub use failure::{FailureKind, TransportFailure};
pub use mode::{ChannelKind, TransportMode};
pub use websocket::WebSocketFactory;

use crate::types::{Envelope, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Everything a transport reports to its owner
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A session is established on `channel`
    Connected { channel: ChannelKind },
    /// An established session ended; the transport will retry on its own
    Disconnected { reason: String },
    /// A connection attempt failed before a session was established
    ConnectError(TransportFailure),
    /// Low-level close/error on an established channel, reported before `Disconnected`
    ChannelDiagnostic(TransportFailure),
    /// Inbound application message
    Message(Envelope),
}

pub type TransportEventSender = mpsc::UnboundedSender<TransportEvent>;

/// A live connection to the server.
#[async_trait]
pub trait Transport: Send + Sync {
    fn mode(&self) -> TransportMode;

    fn is_connected(&self) -> bool;

    /// Starts the connection loop. No-op when already running.
    async fn open(&self) -> Result<()>;

    /// Drops the current session and starts a fresh attempt immediately.
    async fn reconnect(&self) -> Result<()>;

    /// Stops the connection loop and closes the channel.
    async fn close(&self) -> Result<()>;
}

/// Builds transports for the connection manager.
pub trait TransportFactory: Send + Sync {
    fn create(&self, mode: TransportMode, events: TransportEventSender) -> Arc<dyn Transport>;
}
