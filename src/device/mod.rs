pub mod discovery;
pub mod models;
pub mod port_monitor;

pub use discovery::{
    find_target_port, retry, HardwareIdMatcher, PortMatcher, RetryOutcome,
    DEFAULT_DISCOVERY_STEP, DEFAULT_DISCOVERY_TIMEOUT,
};
pub use models::*;
pub use port_monitor::{diff_ports, PollingPortMonitor, PortEvent, PortMonitor};

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("Port monitor already started")]
    MonitorAlreadyStarted,

    #[error("Port monitor not started")]
    MonitorNotStarted,

    #[error("Port monitor task failed: {0}")]
    MonitorTaskFailed(String),

    #[error("Serial communication error: {0}")]
    SerialError(#[from] crate::serial::SerialError),
}

pub type Result<T> = std::result::Result<T, DeviceError>;
