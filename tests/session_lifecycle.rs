use std::sync::{Arc, Mutex};

use sensorport::device::PortDescriptor;
use sensorport::events::{SessionEvent, SessionEventKind};
use sensorport::serial::{
    ConfigField, MemoryTransport, Parity, ReadConfig, SerialError, SerialSession, SessionConfig,
    SessionStatus, TransportChannel, TransportCommand,
};
use sensorport::Transport;

fn setup() -> (Arc<MemoryTransport>, SerialSession) {
    let transport = Arc::new(MemoryTransport::with_ports(vec![
        PortDescriptor::usb("COM3", 0x2341, 0x0043),
        PortDescriptor::usb("COM4", 0x1A86, 0x7523),
    ]));
    let session = SerialSession::new(transport.clone(), "COM3", SessionConfig::default());
    (transport, session)
}

fn record(session: &SerialSession) -> Arc<Mutex<Vec<SessionEvent>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    for kind in [
        SessionEventKind::Open,
        SessionEventKind::Close,
        SessionEventKind::Data,
        SessionEventKind::ReceivedBytes,
    ] {
        let seen = seen.clone();
        session.events().subscribe(kind, move |event| {
            seen.lock().unwrap().push(event.clone());
        });
    }
    seen
}

#[tokio::test]
async fn test_open_read_close() {
    let (transport, session) = setup();
    let seen = record(&session);

    session.open().await.unwrap();
    session.start_read(Some(512), Some(10)).await.unwrap();
    assert!(session.is_reading());
    assert_eq!(transport.read_config_of("COM3"), Some(ReadConfig::new(Some(512), Some(10))));

    assert!(transport.inject_bytes("COM3", b"hi\n"));
    session.close().await;

    assert_eq!(session.status(), SessionStatus::Closed);
    assert!(!transport.is_open("COM3"));
    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            SessionEvent::Open,
            SessionEvent::ReceivedBytes(b"hi\n".to_vec()),
            SessionEvent::Data("hi\n".into()),
            SessionEvent::Close,
        ]
    );
    assert_eq!(transport.events().handler_count(&TransportChannel::Text("COM3".into())), 0);
}

#[tokio::test]
async fn test_read_listeners_registered_once() {
    let (transport, session) = setup();
    let seen = record(&session);
    session.open().await.unwrap();
    session.start_read(None, None).await.unwrap();
    session.start_read(Some(64), None).await.unwrap();

    transport.inject_text("COM3", "once");
    let data = seen
        .lock()
        .unwrap()
        .iter()
        .filter(|e| matches!(e, SessionEvent::Data(_)))
        .count();
    assert_eq!(data, 1, "duplicate text listeners");
    assert_eq!(session.read_config(), Some(ReadConfig::new(Some(64), None)));
}

#[tokio::test]
async fn test_start_read_with_new_parameters_restarts_read() {
    let (transport, session) = setup();
    session.open().await.unwrap();
    session.start_read(Some(512), Some(10)).await.unwrap();
    transport.clear_commands();

    session.start_read(Some(512), Some(10)).await.unwrap();
    assert!(
        !transport
            .commands()
            .iter()
            .any(|c| matches!(c, TransportCommand::CancelRead { .. })),
        "same parameters must not restart the read"
    );

    session.start_read(Some(64), None).await.unwrap();
    assert!(transport
        .commands()
        .contains(&TransportCommand::CancelRead { port_name: "COM3".into() }));
    assert_eq!(transport.read_config_of("COM3"), Some(ReadConfig::new(Some(64), None)));
    assert_eq!(session.read_config(), transport.read_config_of("COM3"));
}

#[tokio::test]
async fn test_open_failure_leaves_closed() {
    let (transport, session) = setup();
    transport.set_fail_connect(true);
    let seen = record(&session);

    assert!(matches!(session.open().await, Err(SerialError::ConnectionFailed(_))));
    assert_eq!(session.status(), SessionStatus::Closed);
    assert!(seen.lock().unwrap().is_empty(), "no open event on failure");
}

#[tokio::test]
async fn test_unsolicited_disconnect() {
    let (transport, session) = setup();
    let seen = record(&session);
    session.open().await.unwrap();
    session.start_read(None, None).await.unwrap();

    assert!(transport.unplug("COM3"));
    assert_eq!(session.status(), SessionStatus::Closed);
    assert_eq!(seen.lock().unwrap().last(), Some(&SessionEvent::Close));
    // Kept so a reconnect resumes reading.
    assert!(session.read_config().is_some());
    assert_eq!(transport.events().handler_count(&TransportChannel::Disconnect("COM3".into())), 0);
}

#[tokio::test]
async fn test_reopen_resumes_reading() {
    let (transport, session) = setup();
    session.open().await.unwrap();
    session.start_read(Some(128), Some(5)).await.unwrap();
    transport.unplug("COM3");

    transport.add_port(PortDescriptor::usb("COM3", 0x2341, 0x0043));
    session.open().await.unwrap();
    assert!(transport.is_reading("COM3"));
    assert_eq!(transport.read_config_of("COM3"), Some(ReadConfig::new(Some(128), Some(5))));
}

#[tokio::test]
async fn test_stop_read() {
    let (transport, session) = setup();
    let seen = record(&session);
    session.open().await.unwrap();
    session.start_read(None, None).await.unwrap();
    session.stop_read().await.unwrap();

    assert!(session.read_config().is_none());
    assert!(!transport.is_reading("COM3"));
    assert!(!transport.inject_text("COM3", "dropped"));
    assert!(!seen.lock().unwrap().iter().any(|e| matches!(e, SessionEvent::Data(_))));
}

#[tokio::test]
async fn test_close_failure_is_not_propagated() {
    let (transport, session) = setup();
    session.open().await.unwrap();
    transport.set_fail_close(true);
    session.close().await;
    assert_eq!(session.status(), SessionStatus::Closed);
}

#[tokio::test]
async fn test_force_close_clears_read_config() {
    let (transport, session) = setup();
    let seen = record(&session);
    session.open().await.unwrap();
    session.start_read(None, Some(10)).await.unwrap();

    session.force_close().await;
    assert_eq!(session.status(), SessionStatus::Closed);
    assert!(session.read_config().is_none());
    assert!(!transport.is_open("COM3"));

    // Already closed: no second close event.
    session.force_close().await;
    let closes = seen
        .lock()
        .unwrap()
        .iter()
        .filter(|e| **e == SessionEvent::Close)
        .count();
    assert_eq!(closes, 1);
}

#[tokio::test]
async fn test_set_config_field_reopens() {
    let (transport, session) = setup();
    session.open().await.unwrap();
    session.start_read(Some(32), None).await.unwrap();
    transport.clear_commands();

    session.set_config_field(ConfigField::BaudRate(9600)).await.unwrap();
    session.set_config_field(ConfigField::Parity(Parity::Even)).await.unwrap();

    assert!(session.is_open());
    let config = transport.config_of("COM3").unwrap();
    assert_eq!(config.baud_rate, 9600);
    assert_eq!(config.parity, Parity::Even);
    assert!(transport.is_reading("COM3"), "reading resumes after reconfigure");

    let commands = transport.commands();
    assert!(matches!(commands[0], TransportCommand::Close { .. }));
    assert!(matches!(commands[1], TransportCommand::Connect { .. }));
}

#[tokio::test]
async fn test_set_config_field_while_closed_does_not_open() {
    let (transport, session) = setup();
    session.set_config_field(ConfigField::BaudRate(57600)).await.unwrap();
    assert_eq!(session.status(), SessionStatus::Closed);
    assert!(transport.commands().is_empty());
    assert_eq!(session.config().baud_rate, 57600);
}

#[tokio::test]
async fn test_port_name_change_closes_old_port() {
    let (transport, session) = setup();
    session.open().await.unwrap();
    session.set_config_field(ConfigField::PortName("COM4".into())).await.unwrap();

    assert_eq!(session.port_name(), "COM4");
    assert_eq!(session.status(), SessionStatus::Closed);
    assert!(!transport.is_open("COM3"));

    session.open().await.unwrap();
    assert!(transport.is_open("COM4"));
}
