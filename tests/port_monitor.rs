use std::sync::Arc;
use std::time::Duration;

use sensorport::device::{DeviceError, PollingPortMonitor, PortDescriptor, PortEvent, PortMonitor};
use sensorport::serial::MemoryTransport;

#[tokio::test]
async fn test_reports_added_and_removed_ports() {
    let port = PortDescriptor::usb("COM1", 0x2341, 0x0043);
    let transport = Arc::new(MemoryTransport::with_ports(vec![port]));
    let mut monitor = PollingPortMonitor::new(transport.clone(), Duration::from_millis(10));
    let mut rx = monitor.get_receiver().expect("receiver available once");
    assert!(monitor.get_receiver().is_none());

    monitor.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;

    let added = PortDescriptor::usb("COM2", 0x1A86, 0x7523);
    transport.add_port(added.clone());
    let event = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
    assert_eq!(event, Some(PortEvent::PortAdded(added)));

    transport.remove_port("COM1");
    let event = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
    assert_eq!(event, Some(PortEvent::PortRemoved("COM1".into())));

    monitor.stop().await.unwrap();
}

#[tokio::test]
async fn test_start_stop_state() {
    let transport = Arc::new(MemoryTransport::new());
    let mut monitor = PollingPortMonitor::new(transport, Duration::from_millis(10));

    assert!(matches!(monitor.stop().await, Err(DeviceError::MonitorNotStarted)));
    monitor.start().await.unwrap();
    assert!(monitor.is_running());
    assert!(matches!(monitor.start().await, Err(DeviceError::MonitorAlreadyStarted)));
    monitor.stop().await.unwrap();
    assert!(!monitor.is_running());
}
