use std::sync::{Arc, Mutex, Weak};

use serde::{Deserialize, Serialize};

use super::config::{ConfigField, ReadConfig, SessionConfig};
use super::transport::{Transport, TransportChannel, TransportEvent};
use super::{Result, SerialError};
use crate::events::{EventHub, SessionEvent, SubscriptionId};
use crate::lock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Closed,
    Opening,
    Open,
    Closing,
}

/// Transport subscriptions held while a session is open or reading.
#[derive(Default)]
struct Listeners {
    bytes: Option<SubscriptionId>,
    text: Option<SubscriptionId>,
    disconnect: Option<SubscriptionId>,
}

impl Listeners {
    fn take_read(&mut self) -> Vec<SubscriptionId> {
        self.bytes.take().into_iter().chain(self.text.take()).collect()
    }

    fn take_all(&mut self) -> Vec<SubscriptionId> {
        let mut ids = self.take_read();
        ids.extend(self.disconnect.take());
        ids
    }
}

struct SessionState {
    port_name: String,
    config: SessionConfig,
    read_config: Option<ReadConfig>,
    status: SessionStatus,
    listeners: Listeners,
}

struct SessionInner {
    transport: Arc<dyn Transport>,
    events: Arc<EventHub<SessionEvent>>,
    state: Mutex<SessionState>,
    // Serializes open/close/reconfigure so config is read by one transition
    // at a time.
    transition: tokio::sync::Mutex<()>,
}

impl SessionInner {
    fn release(&self, ids: Vec<SubscriptionId>) {
        let hub = self.transport.events();
        for id in ids {
            hub.unsubscribe(id);
        }
    }

    fn handle_disconnect(&self) {
        let (port_name, ids) = {
            let mut state = lock(&self.state);
            if state.status == SessionStatus::Closed {
                return;
            }
            state.status = SessionStatus::Closed;
            (state.port_name.clone(), state.listeners.take_all())
        };
        self.release(ids);
        log::info!("{} disconnected", port_name);
        self.events.publish(&SessionEvent::Close);
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        let ids = lock(&self.state).listeners.take_all();
        self.release(ids);
    }
}

/// Lifecycle of one serial port: open, read, reconfigure, close.
///
/// Transport data for the port is re-published on the session's hub as
/// [`SessionEvent::ReceivedBytes`] and [`SessionEvent::Data`]; state changes
/// as [`SessionEvent::Open`] and [`SessionEvent::Close`]. Clones share the
/// same session.
#[derive(Clone)]
pub struct SerialSession {
    inner: Arc<SessionInner>,
}

impl SerialSession {
    pub fn new(
        transport: Arc<dyn Transport>,
        port_name: impl Into<String>,
        config: SessionConfig,
    ) -> Self {
        Self::with_events(transport, Arc::new(EventHub::new()), port_name, config)
    }

    /// Build a session that publishes on an existing hub.
    pub fn with_events(
        transport: Arc<dyn Transport>,
        events: Arc<EventHub<SessionEvent>>,
        port_name: impl Into<String>,
        config: SessionConfig,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                transport,
                events,
                state: Mutex::new(SessionState {
                    port_name: port_name.into(),
                    config,
                    read_config: None,
                    status: SessionStatus::Closed,
                    listeners: Listeners::default(),
                }),
                transition: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn events(&self) -> &Arc<EventHub<SessionEvent>> {
        &self.inner.events
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        self.inner.transport.clone()
    }

    pub fn port_name(&self) -> String {
        lock(&self.inner.state).port_name.clone()
    }

    pub fn config(&self) -> SessionConfig {
        lock(&self.inner.state).config.clone()
    }

    pub fn read_config(&self) -> Option<ReadConfig> {
        lock(&self.inner.state).read_config
    }

    pub fn status(&self) -> SessionStatus {
        lock(&self.inner.state).status
    }

    pub fn is_open(&self) -> bool {
        self.status() == SessionStatus::Open
    }

    pub fn is_reading(&self) -> bool {
        let state = lock(&self.inner.state);
        state.status == SessionStatus::Open && state.read_config.is_some()
    }

    /// Connect the port. A no-op when already open; on failure the session
    /// stays closed and the error is returned.
    pub async fn open(&self) -> Result<()> {
        let _transition = self.inner.transition.lock().await;
        self.open_locked().await
    }

    /// Start delivering data. Parameters are kept so a later reopen resumes
    /// reading with them.
    ///
    /// Calling again with different parameters restarts the transport read
    /// with the new ones. Same parameters are a no-op.
    pub async fn start_read(
        &self,
        chunk_size: Option<usize>,
        poll_interval_ms: Option<u64>,
    ) -> Result<()> {
        let _transition = self.inner.transition.lock().await;
        let read = ReadConfig::new(chunk_size, poll_interval_ms);
        let (port_name, restart) = {
            let mut state = lock(&self.inner.state);
            if state.status != SessionStatus::Open {
                return Err(SerialError::NotOpen(state.port_name.clone()));
            }
            let restart = state.read_config.is_some_and(|current| current != read);
            state.read_config = Some(read);
            (state.port_name.clone(), restart)
        };
        if restart {
            log::debug!("Restarting read on {} with {:?}", port_name, read);
            self.inner.transport.cancel_read(&port_name).await?;
        }
        self.begin_read(&port_name, read).await
    }

    pub async fn stop_read(&self) -> Result<()> {
        let _transition = self.inner.transition.lock().await;
        let (port_name, open, ids) = {
            let mut state = lock(&self.inner.state);
            state.read_config = None;
            (
                state.port_name.clone(),
                state.status == SessionStatus::Open,
                state.listeners.take_read(),
            )
        };

        let result = if open {
            self.inner.transport.cancel_read(&port_name).await
        } else {
            Ok(())
        };
        self.inner.release(ids);
        result
    }

    /// Close the port. Transport failures are logged, never returned.
    pub async fn close(&self) {
        let _transition = self.inner.transition.lock().await;
        self.close_locked().await;
    }

    /// Settle the session as closed before the transport confirms, and drop
    /// the retained read parameters.
    pub async fn force_close(&self) {
        let _transition = self.inner.transition.lock().await;
        self.force_close_locked().await;
    }

    /// Change one setting. Line settings take effect through a close and
    /// reopen if the port was open; a port name change closes the old port
    /// and leaves the session closed.
    pub async fn set_config_field(&self, field: ConfigField) -> Result<()> {
        if field == ConfigField::BaudRate(0) {
            return Err(SerialError::InvalidInput("baud rate must be positive".to_string()));
        }

        let _transition = self.inner.transition.lock().await;
        log::debug!("Setting {} on {}", field, self.port_name());

        if let ConfigField::PortName(name) = field {
            self.force_close_locked().await;
            lock(&self.inner.state).port_name = name;
            return Ok(());
        }

        let was_open = self.status() == SessionStatus::Open;
        if was_open {
            self.close_locked().await;
        }
        {
            let mut state = lock(&self.inner.state);
            let config = &mut state.config;
            match field {
                ConfigField::BaudRate(baud) => config.baud_rate = baud,
                ConfigField::DataBits(bits) => config.data_bits = bits,
                ConfigField::Parity(parity) => config.parity = parity,
                ConfigField::StopBits(bits) => config.stop_bits = bits,
                ConfigField::FlowControl(flow) => config.flow_control = flow,
                ConfigField::PortName(_) => {}
            }
        }
        if was_open {
            self.open_locked().await?;
        }
        Ok(())
    }

    async fn open_locked(&self) -> Result<()> {
        let (port_name, config) = {
            let mut state = lock(&self.inner.state);
            if state.status == SessionStatus::Open {
                return Ok(());
            }
            state.status = SessionStatus::Opening;
            (state.port_name.clone(), state.config.clone())
        };

        if let Err(e) = self.inner.transport.connect(&port_name, &config).await {
            lock(&self.inner.state).status = SessionStatus::Closed;
            return Err(e);
        }

        let resume = {
            let mut state = lock(&self.inner.state);
            state.status = SessionStatus::Open;
            if state.listeners.disconnect.is_none() {
                state.listeners.disconnect = Some(self.listen_disconnect(&port_name));
            }
            state.read_config
        };
        log::info!("Opened session on {} at {} baud", port_name, config.baud_rate);

        if let Some(read) = resume {
            if let Err(e) = self.begin_read(&port_name, read).await {
                log::warn!("Failed to resume reading on {}: {}", port_name, e);
            }
        }

        self.inner.events.publish(&SessionEvent::Open);
        Ok(())
    }

    async fn close_locked(&self) {
        let (port_name, was_active) = {
            let mut state = lock(&self.inner.state);
            let was_active = state.status != SessionStatus::Closed;
            if was_active {
                state.status = SessionStatus::Closing;
            }
            (state.port_name.clone(), was_active)
        };

        match self.inner.transport.close(&port_name).await {
            Ok(()) => log::info!("Closed session on {}", port_name),
            Err(e) if was_active => log::warn!("Failed to close {}: {}", port_name, e),
            Err(e) => log::debug!("Close of already closed {} failed: {}", port_name, e),
        }

        let ids = {
            let mut state = lock(&self.inner.state);
            state.status = SessionStatus::Closed;
            state.listeners.take_all()
        };
        self.inner.release(ids);

        if was_active {
            self.inner.events.publish(&SessionEvent::Close);
        }
    }

    async fn force_close_locked(&self) {
        let (port_name, was_active, ids) = {
            let mut state = lock(&self.inner.state);
            let was_active = state.status != SessionStatus::Closed;
            state.status = SessionStatus::Closed;
            state.read_config = None;
            (state.port_name.clone(), was_active, state.listeners.take_all())
        };
        self.inner.release(ids);
        if was_active {
            self.inner.events.publish(&SessionEvent::Close);
        }

        if let Err(e) = self.inner.transport.close(&port_name).await {
            log::debug!("Forced close of {}: {}", port_name, e);
        }
    }

    async fn begin_read(&self, port_name: &str, read: ReadConfig) -> Result<()> {
        {
            let mut state = lock(&self.inner.state);
            if state.listeners.bytes.is_none() {
                state.listeners.bytes = Some(self.listen_bytes(port_name));
            }
            if state.listeners.text.is_none() {
                state.listeners.text = Some(self.listen_text(port_name));
            }
        }
        self.inner.transport.start_read(port_name, &read).await?;
        log::info!("Reading from {}", port_name);
        Ok(())
    }

    fn listen_bytes(&self, port_name: &str) -> SubscriptionId {
        let events = self.inner.events.clone();
        self.inner
            .transport
            .events()
            .subscribe(TransportChannel::Bytes(port_name.to_string()), move |event| {
                if let TransportEvent::Bytes { data, .. } = event {
                    events.publish(&SessionEvent::ReceivedBytes(data.clone()));
                }
            })
    }

    fn listen_text(&self, port_name: &str) -> SubscriptionId {
        let events = self.inner.events.clone();
        self.inner
            .transport
            .events()
            .subscribe(TransportChannel::Text(port_name.to_string()), move |event| {
                if let TransportEvent::Text { text, .. } = event {
                    events.publish(&SessionEvent::Data(text.clone()));
                }
            })
    }

    fn listen_disconnect(&self, port_name: &str) -> SubscriptionId {
        let inner: Weak<SessionInner> = Arc::downgrade(&self.inner);
        self.inner
            .transport
            .events()
            .subscribe(TransportChannel::Disconnect(port_name.to_string()), move |_| {
                if let Some(inner) = inner.upgrade() {
                    inner.handle_disconnect();
                }
            })
    }
}

impl std::fmt::Debug for SerialSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.inner.state);
        f.debug_struct("SerialSession")
            .field("port_name", &state.port_name)
            .field("status", &state.status)
            .field("config", &state.config)
            .field("read_config", &state.read_config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::PortDescriptor;
    use crate::serial::MemoryTransport;

    fn setup() -> (Arc<MemoryTransport>, SerialSession) {
        let transport = Arc::new(MemoryTransport::with_ports(vec![PortDescriptor::usb(
            "COM3", 0x2341, 0x0043,
        )]));
        let session = SerialSession::new(transport.clone(), "COM3", SessionConfig::default());
        (transport, session)
    }

    #[tokio::test]
    async fn test_open_is_idempotent() {
        let (transport, session) = setup();
        session.open().await.unwrap();
        session.open().await.unwrap();
        assert!(session.is_open());
        let connects = transport
            .commands()
            .into_iter()
            .filter(|c| matches!(c, crate::serial::TransportCommand::Connect { .. }))
            .count();
        assert_eq!(connects, 1);
    }

    #[tokio::test]
    async fn test_start_read_requires_open() {
        let (_transport, session) = setup();
        assert!(matches!(
            session.start_read(None, None).await,
            Err(SerialError::NotOpen(_))
        ));
        assert_eq!(session.read_config(), None);
    }

    #[tokio::test]
    async fn test_zero_baud_rejected() {
        let (_transport, session) = setup();
        assert!(matches!(
            session.set_config_field(ConfigField::BaudRate(0)).await,
            Err(SerialError::InvalidInput(_))
        ));
        assert_eq!(session.config().baud_rate, 115200);
    }
}
