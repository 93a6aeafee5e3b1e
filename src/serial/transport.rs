use std::fmt;

use async_trait::async_trait;

use super::config::{ReadConfig, SessionConfig};
use super::Result;
use crate::device::PortDescriptor;
use crate::events::{Event, EventHub};

/// Per-port event channel a transport publishes on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TransportChannel {
    Bytes(String),
    Text(String),
    Disconnect(String),
}

impl TransportChannel {
    pub fn port_name(&self) -> &str {
        match self {
            TransportChannel::Bytes(port)
            | TransportChannel::Text(port)
            | TransportChannel::Disconnect(port) => port,
        }
    }
}

impl fmt::Display for TransportChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportChannel::Bytes(port) => write!(f, "read-{}", port),
            TransportChannel::Text(port) => write!(f, "read-string-{}", port),
            TransportChannel::Disconnect(port) => write!(f, "disconnect-{}", port),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Bytes { port_name: String, data: Vec<u8> },
    Text { port_name: String, text: String },
    /// The port went away without a close command.
    Disconnected { port_name: String },
}

impl Event for TransportEvent {
    type Kind = TransportChannel;

    fn kind(&self) -> TransportChannel {
        match self {
            TransportEvent::Bytes { port_name, .. } => TransportChannel::Bytes(port_name.clone()),
            TransportEvent::Text { port_name, .. } => TransportChannel::Text(port_name.clone()),
            TransportEvent::Disconnected { port_name } => {
                TransportChannel::Disconnect(port_name.clone())
            }
        }
    }
}

/// Command/event contract between a serial session and the platform port
/// layer.
///
/// Commands are async. Incoming data and unsolicited disconnects arrive on
/// the transport's [`EventHub`], keyed by [`TransportChannel`].
#[async_trait]
pub trait Transport: Send + Sync {
    async fn available_ports(&self) -> Result<Vec<PortDescriptor>>;

    async fn connect(&self, port_name: &str, config: &SessionConfig) -> Result<()>;

    async fn start_read(&self, port_name: &str, read: &ReadConfig) -> Result<()>;

    async fn cancel_read(&self, port_name: &str) -> Result<()>;

    async fn close(&self, port_name: &str) -> Result<()>;

    async fn close_all(&self) -> Result<()>;

    fn events(&self) -> &EventHub<TransportEvent>;
}
