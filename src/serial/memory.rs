use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::config::{ReadConfig, SessionConfig};
use super::transport::{Transport, TransportEvent};
use super::utf8::Utf8Decoder;
use super::{Result, SerialError};
use crate::device::PortDescriptor;
use crate::events::EventHub;
use crate::lock;

/// A command as issued to a [`MemoryTransport`], in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCommand {
    AvailablePorts,
    Connect { port_name: String, config: SessionConfig },
    StartRead { port_name: String, read: ReadConfig },
    CancelRead { port_name: String },
    Close { port_name: String },
    CloseAll,
}

struct OpenPort {
    config: SessionConfig,
    reading: Option<ReadConfig>,
    decoder: Utf8Decoder,
}

#[derive(Default)]
struct MemoryState {
    ports: Vec<PortDescriptor>,
    open: HashMap<String, OpenPort>,
    commands: Vec<TransportCommand>,
    enumerations: usize,
    fail_enumeration: bool,
    fail_connect: bool,
    fail_close: bool,
}

/// Scriptable in-process transport.
///
/// Ports are whatever was registered with [`set_ports`](Self::set_ports) or
/// [`add_port`](Self::add_port). Data is injected by the caller and
/// delivered only to ports that are open and reading, the same as a real
/// device whose read loop is stopped.
pub struct MemoryTransport {
    state: Mutex<MemoryState>,
    events: EventHub<TransportEvent>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            events: EventHub::new(),
        }
    }

    pub fn with_ports(ports: Vec<PortDescriptor>) -> Self {
        let transport = Self::new();
        transport.set_ports(ports);
        transport
    }

    pub fn set_ports(&self, ports: Vec<PortDescriptor>) {
        lock(&self.state).ports = ports;
    }

    pub fn add_port(&self, port: PortDescriptor) {
        let mut state = lock(&self.state);
        state.ports.retain(|p| p.name != port.name);
        state.ports.push(port);
    }

    pub fn remove_port(&self, port_name: &str) {
        lock(&self.state).ports.retain(|p| p.name != port_name);
    }

    pub fn set_fail_enumeration(&self, fail: bool) {
        lock(&self.state).fail_enumeration = fail;
    }

    pub fn set_fail_connect(&self, fail: bool) {
        lock(&self.state).fail_connect = fail;
    }

    /// Make `close` report failure. The handle is still released.
    pub fn set_fail_close(&self, fail: bool) {
        lock(&self.state).fail_close = fail;
    }

    pub fn is_open(&self, port_name: &str) -> bool {
        lock(&self.state).open.contains_key(port_name)
    }

    pub fn is_reading(&self, port_name: &str) -> bool {
        lock(&self.state)
            .open
            .get(port_name)
            .is_some_and(|p| p.reading.is_some())
    }

    pub fn config_of(&self, port_name: &str) -> Option<SessionConfig> {
        lock(&self.state).open.get(port_name).map(|p| p.config.clone())
    }

    pub fn read_config_of(&self, port_name: &str) -> Option<ReadConfig> {
        lock(&self.state).open.get(port_name).and_then(|p| p.reading)
    }

    pub fn commands(&self) -> Vec<TransportCommand> {
        lock(&self.state).commands.clone()
    }

    pub fn clear_commands(&self) {
        lock(&self.state).commands.clear();
    }

    pub fn enumeration_count(&self) -> usize {
        lock(&self.state).enumerations
    }

    /// Deliver bytes as if read from the device: a raw-bytes event followed
    /// by the decoded text. Returns false if the port is not reading.
    pub fn inject_bytes(&self, port_name: &str, data: &[u8]) -> bool {
        let text = {
            let mut state = lock(&self.state);
            match state.open.get_mut(port_name) {
                Some(port) if port.reading.is_some() => port.decoder.decode(data),
                _ => return false,
            }
        };

        self.events.publish(&TransportEvent::Bytes {
            port_name: port_name.to_string(),
            data: data.to_vec(),
        });
        if !text.is_empty() {
            self.events.publish(&TransportEvent::Text {
                port_name: port_name.to_string(),
                text,
            });
        }
        true
    }

    /// Deliver an already-decoded text chunk. Returns false if the port is
    /// not reading.
    pub fn inject_text(&self, port_name: &str, text: &str) -> bool {
        if !self.is_reading(port_name) {
            return false;
        }
        self.events.publish(&TransportEvent::Text {
            port_name: port_name.to_string(),
            text: text.to_string(),
        });
        true
    }

    /// Simulate the device vanishing: the port leaves the enumeration, its
    /// handle is dropped and an unsolicited disconnect is published.
    pub fn unplug(&self, port_name: &str) -> bool {
        let was_open = {
            let mut state = lock(&self.state);
            state.ports.retain(|p| p.name != port_name);
            state.open.remove(port_name).is_some()
        };
        if was_open {
            self.events.publish(&TransportEvent::Disconnected {
                port_name: port_name.to_string(),
            });
        }
        was_open
    }

    fn record(&self, command: TransportCommand) {
        lock(&self.state).commands.push(command);
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn available_ports(&self) -> Result<Vec<PortDescriptor>> {
        let mut state = lock(&self.state);
        state.commands.push(TransportCommand::AvailablePorts);
        state.enumerations += 1;
        if state.fail_enumeration {
            return Err(SerialError::ConnectionFailed("port enumeration failed".to_string()));
        }
        Ok(state.ports.clone())
    }

    async fn connect(&self, port_name: &str, config: &SessionConfig) -> Result<()> {
        let mut state = lock(&self.state);
        state.commands.push(TransportCommand::Connect {
            port_name: port_name.to_string(),
            config: config.clone(),
        });
        if state.fail_connect {
            return Err(SerialError::ConnectionFailed(format!("cannot open {}", port_name)));
        }
        if state.open.contains_key(port_name) {
            return Err(SerialError::AlreadyOpen(port_name.to_string()));
        }
        if !state.ports.iter().any(|p| p.name == port_name) {
            return Err(SerialError::PortNotFound(port_name.to_string()));
        }
        state.open.insert(
            port_name.to_string(),
            OpenPort {
                config: config.clone(),
                reading: None,
                decoder: Utf8Decoder::new(),
            },
        );
        Ok(())
    }

    async fn start_read(&self, port_name: &str, read: &ReadConfig) -> Result<()> {
        let mut state = lock(&self.state);
        state.commands.push(TransportCommand::StartRead {
            port_name: port_name.to_string(),
            read: *read,
        });
        let port = state
            .open
            .get_mut(port_name)
            .ok_or_else(|| SerialError::NotOpen(port_name.to_string()))?;
        if port.reading.is_none() {
            port.reading = Some(*read);
        }
        Ok(())
    }

    async fn cancel_read(&self, port_name: &str) -> Result<()> {
        let mut state = lock(&self.state);
        state.commands.push(TransportCommand::CancelRead {
            port_name: port_name.to_string(),
        });
        let port = state
            .open
            .get_mut(port_name)
            .ok_or_else(|| SerialError::NotOpen(port_name.to_string()))?;
        port.reading = None;
        Ok(())
    }

    async fn close(&self, port_name: &str) -> Result<()> {
        let mut state = lock(&self.state);
        state.commands.push(TransportCommand::Close {
            port_name: port_name.to_string(),
        });
        let removed = state.open.remove(port_name).is_some();
        if state.fail_close {
            return Err(SerialError::ConnectionFailed(format!("close failed for {}", port_name)));
        }
        if !removed {
            return Err(SerialError::PortNotFound(port_name.to_string()));
        }
        Ok(())
    }

    async fn close_all(&self) -> Result<()> {
        self.record(TransportCommand::CloseAll);
        lock(&self.state).open.clear();
        Ok(())
    }

    fn events(&self) -> &EventHub<TransportEvent> {
        &self.events
    }
}
