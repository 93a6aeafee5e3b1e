pub mod config;
pub mod memory;
pub mod native;
pub mod session;
pub mod transport;
pub mod utf8;

pub use config::{
    ConfigField, DataBits, FlowControl, Parity, ReadConfig, SessionConfig, StopBits,
    DEFAULT_BAUD_RATE,
};
pub use memory::{MemoryTransport, TransportCommand};
pub use native::NativeTransport;
pub use session::{SerialSession, SessionStatus};
pub use transport::{Transport, TransportChannel, TransportEvent};
pub use utf8::Utf8Decoder;

#[derive(Debug, thiserror::Error)]
pub enum SerialError {
    #[error("Port not found: {0}")]
    PortNotFound(String),

    #[error("Port already open: {0}")]
    AlreadyOpen(String),

    #[error("Port not open: {0}")]
    NotOpen(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialport error: {0}")]
    SerialportError(#[from] serialport::Error),
}

pub type Result<T> = std::result::Result<T, SerialError>;
