pub mod framer;
pub mod monitor;
pub mod packet;
pub mod parser;
pub mod types;

pub use framer::LineFramer;
pub use monitor::SerialMonitor;
pub use packet::{decode_sensor_frame, SENSOR_CHANNELS};
pub use parser::{classify_line, LineKind};
pub use types::*;
