pub mod device;
pub mod events;
pub mod serial;
pub mod stream;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use device::{find_target_port, HardwareIdMatcher, PortDescriptor, PortKind, RetryOutcome};
pub use events::{Event, EventHub, SessionEvent, SessionEventKind, SubscriptionId};
pub use serial::{
    MemoryTransport, NativeTransport, SerialError, SerialSession, SessionConfig, Transport,
};
pub use stream::{decode_sensor_frame, LineFramer, LineRecord, MonitorConfig, SerialMonitor};

// A panicking event handler must not wedge every later publish or session
// call, so poisoned locks are recovered.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
