use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::models::PortDescriptor;
use super::{DeviceError, Result};
use crate::serial::Transport;

/// Events emitted by the port monitor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortEvent {
    /// A serial port appeared
    PortAdded(PortDescriptor),
    /// A serial port went away
    PortRemoved(String),
    /// A port kept its name but its description changed
    PortChanged(PortDescriptor),
}

/// Watches the system's serial ports for changes
#[async_trait]
pub trait PortMonitor: Send + Sync {
    /// Start monitoring for port changes
    async fn start(&mut self) -> Result<()>;

    /// Stop monitoring
    async fn stop(&mut self) -> Result<()>;

    /// Take the receiver for port events. Only the first call gets it.
    fn get_receiver(&mut self) -> Option<mpsc::Receiver<PortEvent>>;
}

/// Compare two enumeration snapshots by value.
///
/// Removals come first, then additions and changes in `current` order.
pub fn diff_ports(previous: &[PortDescriptor], current: &[PortDescriptor]) -> Vec<PortEvent> {
    let before: HashMap<&str, &PortDescriptor> =
        previous.iter().map(|p| (p.name.as_str(), p)).collect();
    let after: HashMap<&str, &PortDescriptor> =
        current.iter().map(|p| (p.name.as_str(), p)).collect();

    let mut events: Vec<PortEvent> = previous
        .iter()
        .filter(|p| !after.contains_key(p.name.as_str()))
        .map(|p| PortEvent::PortRemoved(p.name.clone()))
        .collect();

    for port in current {
        match before.get(port.name.as_str()) {
            None => events.push(PortEvent::PortAdded(port.clone())),
            Some(old) if *old != port => events.push(PortEvent::PortChanged(port.clone())),
            Some(_) => {}
        }
    }
    events
}

/// Port monitor that polls the transport's enumeration on a fixed interval.
pub struct PollingPortMonitor {
    transport: Arc<dyn Transport>,
    interval: Duration,
    tx: Option<mpsc::Sender<PortEvent>>,
    rx: Option<mpsc::Receiver<PortEvent>>,
    stop_tx: Option<mpsc::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl PollingPortMonitor {
    pub fn new(transport: Arc<dyn Transport>, interval: Duration) -> Self {
        let (tx, rx) = mpsc::channel(100);
        Self {
            transport,
            interval,
            tx: Some(tx),
            rx: Some(rx),
            stop_tx: None,
            task: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }
}

async fn poll_loop(
    transport: Arc<dyn Transport>,
    interval: Duration,
    tx: mpsc::Sender<PortEvent>,
    mut stop_rx: mpsc::Receiver<()>,
) {
    // The first snapshot is the baseline; only later differences are events.
    let mut known = match transport.available_ports().await {
        Ok(ports) => ports,
        Err(e) => {
            log::warn!("Initial port enumeration failed: {}", e);
            Vec::new()
        }
    };
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = stop_rx.recv() => {
                log::info!("Port monitor stopping");
                break;
            }
            _ = ticker.tick() => {
                let current = match transport.available_ports().await {
                    Ok(ports) => ports,
                    Err(e) => {
                        log::warn!("Port enumeration failed: {}", e);
                        continue;
                    }
                };
                for event in diff_ports(&known, &current) {
                    log::debug!("Port event: {:?}", event);
                    if tx.send(event).await.is_err() {
                        log::debug!("Port event receiver dropped, stopping monitor");
                        return;
                    }
                }
                known = current;
            }
        }
    }
}

#[async_trait]
impl PortMonitor for PollingPortMonitor {
    async fn start(&mut self) -> Result<()> {
        let tx = self.tx.take().ok_or(DeviceError::MonitorAlreadyStarted)?;
        let (stop_tx, stop_rx) = mpsc::channel(1);
        self.stop_tx = Some(stop_tx);
        self.task = Some(tokio::spawn(poll_loop(
            self.transport.clone(),
            self.interval,
            tx,
            stop_rx,
        )));
        log::info!("Port monitor started, polling every {:?}", self.interval);
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        let stop_tx = self.stop_tx.take().ok_or(DeviceError::MonitorNotStarted)?;
        let _ = stop_tx.send(()).await;
        if let Some(task) = self.task.take() {
            task.await
                .map_err(|e| DeviceError::MonitorTaskFailed(e.to_string()))?;
        }
        Ok(())
    }

    fn get_receiver(&mut self) -> Option<mpsc::Receiver<PortEvent>> {
        self.rx.take()
    }
}
