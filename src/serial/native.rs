use std::collections::HashMap;
use std::io::ErrorKind;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serialport::SerialPortType;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_serial::{SerialPortBuilderExt, SerialStream};

use super::config::{ReadConfig, SessionConfig};
use super::transport::{Transport, TransportEvent};
use super::utf8::Utf8Decoder;
use super::{Result, SerialError};
use crate::device::{PortDescriptor, PortKind};
use crate::events::EventHub;
use crate::lock;

const IO_TIMEOUT: Duration = Duration::from_millis(500);
const DEFAULT_CHUNK_SIZE: usize = 1024;
const DEFAULT_POLL_INTERVAL_MS: u64 = 200;
// Idle polls a truncated UTF-8 tail may wait before it is flushed lossily.
const MAX_PENDING_POLLS: u32 = 2;

struct ReaderHandle {
    stop_tx: mpsc::Sender<()>,
    task: JoinHandle<Option<SerialStream>>,
}

/// An open port. The stream lives here while idle and moves into the read
/// task while reading.
struct NativePort {
    stream: Option<SerialStream>,
    reader: Option<ReaderHandle>,
}

struct NativeInner {
    ports: Mutex<HashMap<String, NativePort>>,
    events: EventHub<TransportEvent>,
}

/// Transport over the operating system's serial ports.
pub struct NativeTransport {
    inner: Arc<NativeInner>,
}

impl NativeTransport {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(NativeInner {
                ports: Mutex::new(HashMap::new()),
                events: EventHub::new(),
            }),
        }
    }

    pub fn open_ports(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.inner.ports).keys().cloned().collect();
        names.sort();
        names
    }

    async fn stop_reader(&self, port_name: &str) {
        let reader = match lock(&self.inner.ports).get_mut(port_name) {
            Some(port) => port.reader.take(),
            None => return,
        };
        let Some(reader) = reader else {
            return;
        };

        let _ = reader.stop_tx.send(()).await;
        match reader.task.await {
            Ok(Some(stream)) => {
                if let Some(port) = lock(&self.inner.ports).get_mut(port_name) {
                    port.stream = Some(stream);
                }
            }
            Ok(None) => {}
            Err(e) => log::warn!("Read task for {} ended abnormally: {}", port_name, e),
        }
    }
}

impl Default for NativeTransport {
    fn default() -> Self {
        Self::new()
    }
}

/// Strip a trailing ` (COMn)` that Windows appends to USB product strings.
fn strip_com_suffix(product: &str) -> &str {
    let Some(head) = product.strip_suffix(')') else {
        return product;
    };
    match head.rfind(" (COM") {
        Some(pos) => {
            let digits = &head[pos + " (COM".len()..];
            if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
                &product[..pos]
            } else {
                product
            }
        }
        None => product,
    }
}

fn describe_port(info: &serialport::SerialPortInfo) -> PortDescriptor {
    match &info.port_type {
        SerialPortType::UsbPort(usb) => {
            let mut port = PortDescriptor::usb(info.port_name.as_str(), usb.vid, usb.pid);
            port.manufacturer = usb.manufacturer.clone();
            port.product = usb.product.clone();
            if let Some(product) = usb.product.as_deref() {
                port.display_name = format!("{} [{}]", info.port_name, strip_com_suffix(product));
            }
            port
        }
        SerialPortType::PciPort => PortDescriptor::new(info.port_name.as_str(), PortKind::Pci),
        SerialPortType::BluetoothPort => {
            PortDescriptor::new(info.port_name.as_str(), PortKind::Bluetooth)
        }
        SerialPortType::Unknown => PortDescriptor::new(info.port_name.as_str(), PortKind::Unknown),
    }
}

fn is_disconnect(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::NotFound
            | ErrorKind::PermissionDenied
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof
    )
}

async fn read_loop(
    inner: Arc<NativeInner>,
    port_name: String,
    mut stream: SerialStream,
    read: ReadConfig,
    mut stop_rx: mpsc::Receiver<()>,
) -> Option<SerialStream> {
    let mut buffer = vec![0u8; read.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE).max(1)];
    let interval = Duration::from_millis(read.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS));
    let mut decoder = Utf8Decoder::new();
    let mut idle_polls = 0u32;

    log::info!("Reading from {}", port_name);
    loop {
        let result = tokio::select! {
            _ = stop_rx.recv() => break,
            result = tokio::time::timeout(IO_TIMEOUT, stream.read(&mut buffer)) => result,
        };

        match result {
            Ok(Ok(0)) => {
                log::info!("{} reported end of stream", port_name);
                disconnect(&inner, &port_name);
                return None;
            }
            Ok(Ok(n)) => {
                idle_polls = 0;
                let data = buffer[..n].to_vec();
                let text = decoder.decode(&data);
                inner.events.publish(&TransportEvent::Bytes {
                    port_name: port_name.clone(),
                    data,
                });
                if !text.is_empty() {
                    inner.events.publish(&TransportEvent::Text {
                        port_name: port_name.clone(),
                        text,
                    });
                }
            }
            Ok(Err(e)) if is_disconnect(e.kind()) => {
                log::warn!("{} disconnected: {}", port_name, e);
                disconnect(&inner, &port_name);
                return None;
            }
            Ok(Err(e)) if e.kind() == ErrorKind::TimedOut => idle_polls += 1,
            Ok(Err(e)) => log::warn!("Read error on {}: {}", port_name, e),
            Err(_) => idle_polls += 1,
        }

        if decoder.has_pending() && idle_polls > MAX_PENDING_POLLS {
            let text = decoder.flush();
            inner.events.publish(&TransportEvent::Text {
                port_name: port_name.clone(),
                text,
            });
        }

        tokio::select! {
            _ = stop_rx.recv() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    log::info!("Stopped reading from {}", port_name);
    Some(stream)
}

fn disconnect(inner: &NativeInner, port_name: &str) {
    lock(&inner.ports).remove(port_name);
    inner.events.publish(&TransportEvent::Disconnected {
        port_name: port_name.to_string(),
    });
}

#[async_trait]
impl Transport for NativeTransport {
    async fn available_ports(&self) -> Result<Vec<PortDescriptor>> {
        let mut ports: Vec<PortDescriptor> = serialport::available_ports()?
            .iter()
            .map(describe_port)
            .collect();
        ports.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(ports)
    }

    async fn connect(&self, port_name: &str, config: &SessionConfig) -> Result<()> {
        if lock(&self.inner.ports).contains_key(port_name) {
            return Err(SerialError::AlreadyOpen(port_name.to_string()));
        }

        let stream = tokio_serial::new(port_name, config.baud_rate)
            .data_bits(config.data_bits.into())
            .parity(config.parity.into())
            .stop_bits(config.stop_bits.into())
            .flow_control(config.flow_control.into())
            .timeout(IO_TIMEOUT)
            .open_native_async()
            .map_err(|e| SerialError::ConnectionFailed(format!("{}: {}", port_name, e)))?;

        let mut ports = lock(&self.inner.ports);
        if ports.contains_key(port_name) {
            return Err(SerialError::AlreadyOpen(port_name.to_string()));
        }
        ports.insert(
            port_name.to_string(),
            NativePort {
                stream: Some(stream),
                reader: None,
            },
        );
        log::info!("Opened {} at {} baud", port_name, config.baud_rate);
        Ok(())
    }

    async fn start_read(&self, port_name: &str, read: &ReadConfig) -> Result<()> {
        let mut ports = lock(&self.inner.ports);
        let port = ports
            .get_mut(port_name)
            .ok_or_else(|| SerialError::NotOpen(port_name.to_string()))?;
        if port.reader.is_some() {
            return Ok(());
        }
        let Some(stream) = port.stream.take() else {
            return Err(SerialError::NotOpen(port_name.to_string()));
        };

        let (stop_tx, stop_rx) = mpsc::channel(1);
        let task = tokio::spawn(read_loop(
            self.inner.clone(),
            port_name.to_string(),
            stream,
            *read,
            stop_rx,
        ));
        port.reader = Some(ReaderHandle { stop_tx, task });
        Ok(())
    }

    async fn cancel_read(&self, port_name: &str) -> Result<()> {
        if !lock(&self.inner.ports).contains_key(port_name) {
            return Err(SerialError::NotOpen(port_name.to_string()));
        }
        self.stop_reader(port_name).await;
        Ok(())
    }

    async fn close(&self, port_name: &str) -> Result<()> {
        self.stop_reader(port_name).await;
        match lock(&self.inner.ports).remove(port_name) {
            Some(_) => {
                log::info!("Closed {}", port_name);
                Ok(())
            }
            None => Err(SerialError::PortNotFound(port_name.to_string())),
        }
    }

    async fn close_all(&self) -> Result<()> {
        for port_name in self.open_ports() {
            if let Err(e) = self.close(&port_name).await {
                log::warn!("Failed to close {}: {}", port_name, e);
            }
        }
        Ok(())
    }

    fn events(&self) -> &EventHub<TransportEvent> {
        &self.inner.events
    }
}
