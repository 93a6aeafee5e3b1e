use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use super::framer::LineFramer;
use super::types::{LineRecord, MonitorConfig};
use crate::device::{find_target_port, HardwareIdMatcher, PortDescriptor, PortMatcher};
use crate::events::{EventHub, SessionEvent, SessionEventKind, SubscriptionId};
use crate::lock;
use crate::serial::{ConfigField, Result, SerialSession, Transport};

/// A serial session with line framing and cached device readings, the shape
/// a UI binds to.
///
/// Framed events (`new_line`, `sensor`, `value`, `alert`, `alert_play`) are
/// published on the session's own hub, after the session's `data` event
/// that carried them.
pub struct SerialMonitor {
    session: SerialSession,
    framer: Arc<Mutex<LineFramer>>,
    config: MonitorConfig,
    connected: Arc<AtomicBool>,
    connecting: Arc<AtomicBool>,
    subscriptions: Vec<SubscriptionId>,
}

impl SerialMonitor {
    pub fn new(
        transport: Arc<dyn Transport>,
        port_name: impl Into<String>,
        config: MonitorConfig,
    ) -> Self {
        let session = SerialSession::new(transport, port_name, config.session.clone());
        let framer = Arc::new(Mutex::new(LineFramer::with_limits(
            config.max_lines,
            config.max_line_length,
        )));
        let connected = Arc::new(AtomicBool::new(false));
        let hub = session.events();

        let mut subscriptions = Vec::with_capacity(4);
        {
            let framer = framer.clone();
            let weak_hub = Arc::downgrade(hub);
            subscriptions.push(hub.subscribe(SessionEventKind::Data, move |event| {
                let SessionEvent::Data(text) = event else {
                    return;
                };
                let framed = lock(&framer).feed(text);
                if let Some(hub) = weak_hub.upgrade() {
                    for event in &framed {
                        hub.publish(event);
                    }
                }
            }));
        }
        {
            let framer = framer.clone();
            let connected = connected.clone();
            subscriptions.push(hub.subscribe(SessionEventKind::Open, move |_| {
                lock(&framer).clear_values();
                // Reopens done by the session itself (reconfigure, resume after
                // unplug) bypass `connect`.
                connected.store(true, Ordering::SeqCst);
            }));
        }
        {
            let connected = connected.clone();
            subscriptions.push(hub.subscribe(SessionEventKind::Close, move |_| {
                connected.store(false, Ordering::SeqCst);
            }));
        }

        Self {
            session,
            framer,
            config,
            connected,
            connecting: Arc::new(AtomicBool::new(false)),
            subscriptions,
        }
    }

    /// (Re)connect the current port and start reading.
    ///
    /// Any previous connection is dropped first. Open failures are returned;
    /// a failure to start reading only gets logged.
    pub async fn connect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        self.connecting.store(true, Ordering::SeqCst);

        self.session.force_close().await;
        let result = self.session.open().await;
        match &result {
            Ok(()) => {
                if let Err(e) = self
                    .session
                    .start_read(Some(self.config.chunk_size), Some(self.config.poll_interval_ms))
                    .await
                {
                    log::warn!("Failed to start reading {}: {}", self.session.port_name(), e);
                }
                self.connected.store(self.session.is_open(), Ordering::SeqCst);
            }
            Err(e) => log::warn!("Failed to connect {}: {}", self.session.port_name(), e),
        }

        self.connecting.store(false, Ordering::SeqCst);
        result
    }

    pub async fn disconnect(&self) {
        self.session.close().await;
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Switch to another port. The old one is closed and the monitor stays
    /// disconnected until [`connect`](Self::connect).
    pub async fn set_port(&self, port_name: impl Into<String>) -> Result<()> {
        self.session
            .set_config_field(ConfigField::PortName(port_name.into()))
            .await?;
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Look for a known board and connect to it. `Ok(None)` when none shows
    /// up within the discovery budget.
    pub async fn discover_and_connect(&self) -> Result<Option<PortDescriptor>> {
        self.discover_and_connect_with(&HardwareIdMatcher::arduino()).await
    }

    pub async fn discover_and_connect_with<M>(&self, matcher: &M) -> Result<Option<PortDescriptor>>
    where
        M: PortMatcher + ?Sized,
    {
        let transport = self.session.transport();
        let found = find_target_port(
            transport.as_ref(),
            matcher,
            self.config.discovery_timeout(),
            self.config.discovery_step(),
        )
        .await;

        let Some(port) = found else {
            return Ok(None);
        };
        if port.name != self.session.port_name() || !self.session.is_open() {
            self.set_port(port.name.clone()).await?;
            self.connect().await?;
        }
        Ok(Some(port))
    }

    pub fn session(&self) -> &SerialSession {
        &self.session
    }

    pub fn events(&self) -> &Arc<EventHub<SessionEvent>> {
        self.session.events()
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn lines(&self) -> Vec<LineRecord> {
        lock(&self.framer).lines().iter().cloned().collect()
    }

    pub fn sensor_channels(&self) -> Vec<u16> {
        lock(&self.framer).sensor_channels().to_vec()
    }

    pub fn aux_value(&self) -> Option<u8> {
        lock(&self.framer).aux_value()
    }

    pub fn values(&self) -> BTreeMap<String, String> {
        lock(&self.framer).values().clone()
    }

    pub fn clear_lines(&self) {
        lock(&self.framer).clear_lines();
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn is_connecting(&self) -> bool {
        self.connecting.load(Ordering::SeqCst)
    }
}

impl Drop for SerialMonitor {
    fn drop(&mut self) {
        let hub = self.session.events();
        for id in self.subscriptions.drain(..) {
            hub.unsubscribe(id);
        }
    }
}
