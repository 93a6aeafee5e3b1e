//! Typed publish/subscribe plumbing shared by the transport, the serial
//! session and the line framer.

pub mod hub;
pub mod session;

pub use hub::{Event, EventHub, SubscriptionId};
pub use session::{SessionEvent, SessionEventKind};
