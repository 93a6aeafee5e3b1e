use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use sensorport::device::PortDescriptor;
use sensorport::events::{SessionEvent, SessionEventKind};
use sensorport::serial::{ConfigField, MemoryTransport, ReadConfig, SerialError};
use sensorport::stream::{MonitorConfig, SerialMonitor};

fn uno_on(port_name: &str) -> Arc<MemoryTransport> {
    Arc::new(MemoryTransport::with_ports(vec![PortDescriptor::usb(port_name, 0x2341, 0x0043)]))
}

fn fast_config() -> MonitorConfig {
    MonitorConfig {
        discovery_timeout_ms: 40,
        discovery_step_ms: 10,
        ..MonitorConfig::default()
    }
}

#[tokio::test]
async fn test_connect_frames_incoming_text() {
    let transport = uno_on("COM3");
    let monitor = SerialMonitor::new(transport.clone(), "COM3", MonitorConfig::default());

    let lines = Arc::new(Mutex::new(Vec::new()));
    {
        let lines = lines.clone();
        monitor.events().subscribe(SessionEventKind::NewLine, move |event| {
            if let SessionEvent::NewLine { text, complete: true } = event {
                lines.lock().unwrap().push(text.clone());
            }
        });
    }

    monitor.connect().await.unwrap();
    assert!(monitor.is_connected());
    assert!(!monitor.is_connecting());
    assert_eq!(transport.read_config_of("COM3"), Some(ReadConfig::new(Some(512), Some(10))));

    transport.inject_text("COM3", "value:mode:au");
    transport.inject_text("COM3", "to\nsen:10203040E4FFFFFFFFFF-07\npart");

    assert_eq!(*lines.lock().unwrap(), vec!["value:mode:auto", "sen:10203040E4FFFFFFFFFF-07"]);
    assert_eq!(monitor.values().get("mode").map(String::as_str), Some("auto"));
    assert_eq!(monitor.sensor_channels(), vec![784, 544, 304, 64, 1023, 1023, 1023, 1023]);
    assert_eq!(monitor.aux_value(), Some(7));
    assert_eq!(monitor.lines().last().map(|l| l.text.clone()), Some("part".to_string()));
}

#[tokio::test]
async fn test_values_cleared_on_open() {
    let transport = uno_on("COM3");
    let monitor = SerialMonitor::new(transport.clone(), "COM3", MonitorConfig::default());
    monitor.connect().await.unwrap();
    transport.inject_text("COM3", "value:a:1\n");
    assert_eq!(monitor.values().len(), 1);

    monitor.connect().await.unwrap();
    assert!(monitor.values().is_empty());
    assert_eq!(monitor.lines().len(), 1, "scrollback survives reconnect");
}

#[tokio::test]
async fn test_unplug_marks_disconnected() {
    let transport = uno_on("COM3");
    let monitor = SerialMonitor::new(transport.clone(), "COM3", MonitorConfig::default());
    monitor.connect().await.unwrap();

    transport.unplug("COM3");
    assert!(!monitor.is_connected());
}

#[tokio::test]
async fn test_reconfigure_keeps_connected_flag() {
    let transport = uno_on("COM3");
    let monitor = SerialMonitor::new(transport.clone(), "COM3", MonitorConfig::default());
    monitor.connect().await.unwrap();

    monitor
        .session()
        .set_config_field(ConfigField::BaudRate(9600))
        .await
        .unwrap();
    assert!(monitor.session().is_open());
    assert_eq!(monitor.is_connected(), monitor.session().is_open());
    assert_eq!(transport.config_of("COM3").map(|c| c.baud_rate), Some(9600));
}

#[tokio::test]
async fn test_session_reopen_marks_connected() {
    let transport = uno_on("COM3");
    let monitor = SerialMonitor::new(transport.clone(), "COM3", MonitorConfig::default());
    monitor.connect().await.unwrap();
    monitor.disconnect().await;
    assert!(!monitor.is_connected());

    monitor.session().open().await.unwrap();
    assert!(monitor.is_connected());
    assert_eq!(monitor.is_connected(), monitor.session().is_open());
}

#[tokio::test]
async fn test_connect_failure_propagates() {
    let transport = Arc::new(MemoryTransport::new());
    let monitor = SerialMonitor::new(transport, "COM9", MonitorConfig::default());
    assert!(matches!(monitor.connect().await, Err(SerialError::PortNotFound(_))));
    assert!(!monitor.is_connected());
    assert!(!monitor.is_connecting());
}

#[tokio::test]
async fn test_discover_and_connect() {
    let transport = Arc::new(MemoryTransport::with_ports(vec![
        PortDescriptor::usb("COM1", 0x046D, 0xC52B),
        PortDescriptor::usb("COM5", 0x2341, 0x0043),
    ]));
    let monitor = SerialMonitor::new(transport.clone(), "", fast_config());

    let found = monitor.discover_and_connect().await.unwrap();
    assert_eq!(found.map(|p| p.name), Some("COM5".to_string()));
    assert_eq!(monitor.session().port_name(), "COM5");
    assert!(monitor.is_connected());
    assert!(transport.is_reading("COM5"));
}

#[tokio::test]
async fn test_discover_nothing() {
    let port = PortDescriptor::usb("COM1", 0x046D, 0xC52B);
    let transport = Arc::new(MemoryTransport::with_ports(vec![port]));
    let monitor = SerialMonitor::new(transport, "COM1", fast_config());
    assert_eq!(monitor.discover_and_connect().await.unwrap(), None);
    assert!(!monitor.is_connected());
}

#[tokio::test]
async fn test_set_port_disconnects() {
    let transport = Arc::new(MemoryTransport::with_ports(vec![
        PortDescriptor::usb("COM3", 0x2341, 0x0043),
        PortDescriptor::usb("COM4", 0x2341, 0x0043),
    ]));
    let monitor = SerialMonitor::new(transport.clone(), "COM3", MonitorConfig::default());
    monitor.connect().await.unwrap();

    monitor.set_port("COM4").await.unwrap();
    assert!(!monitor.is_connected());
    assert!(!transport.is_open("COM3"));
    monitor.connect().await.unwrap();
    assert!(transport.is_open("COM4"));
}

#[tokio::test]
async fn test_dropped_monitor_stops_framing() {
    let transport = uno_on("COM3");
    let monitor = SerialMonitor::new(transport.clone(), "COM3", MonitorConfig::default());
    let hub = monitor.events().clone();
    monitor.connect().await.unwrap();

    let framed = Arc::new(AtomicUsize::new(0));
    {
        let framed = framed.clone();
        hub.subscribe(SessionEventKind::NewLine, move |_| {
            framed.fetch_add(1, Ordering::SeqCst);
        });
    }
    drop(monitor);
    assert_eq!(hub.handler_count(&SessionEventKind::Data), 0);
    transport.inject_text("COM3", "after drop\n");
    assert_eq!(framed.load(Ordering::SeqCst), 0);
}
