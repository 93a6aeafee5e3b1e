use serde::{Deserialize, Serialize};

use super::hub::Event;

/// Everything a serial session and the framer layered on it publish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum SessionEvent {
    Open,
    Close,
    /// Decoded text chunk as delivered by the transport.
    Data(String),
    ReceivedBytes(Vec<u8>),
    /// A scrollback line. `complete` is false while the line is still being
    /// amended by later chunks.
    NewLine { text: String, complete: bool },
    Sensor { channels: Vec<u16>, aux: u8 },
    Value { name: String, value: String },
    Alert { message: String },
    AlertPlay { id: Option<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEventKind {
    Open,
    Close,
    Data,
    ReceivedBytes,
    NewLine,
    Sensor,
    Value,
    Alert,
    AlertPlay,
}

impl Event for SessionEvent {
    type Kind = SessionEventKind;

    fn kind(&self) -> SessionEventKind {
        match self {
            SessionEvent::Open => SessionEventKind::Open,
            SessionEvent::Close => SessionEventKind::Close,
            SessionEvent::Data(_) => SessionEventKind::Data,
            SessionEvent::ReceivedBytes(_) => SessionEventKind::ReceivedBytes,
            SessionEvent::NewLine { .. } => SessionEventKind::NewLine,
            SessionEvent::Sensor { .. } => SessionEventKind::Sensor,
            SessionEvent::Value { .. } => SessionEventKind::Value,
            SessionEvent::Alert { .. } => SessionEventKind::Alert,
            SessionEvent::AlertPlay { .. } => SessionEventKind::AlertPlay,
        }
    }
}
