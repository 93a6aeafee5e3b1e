use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::serial::SessionConfig;

pub const DEFAULT_MAX_LINES: usize = 500;
/// Bytes an unterminated line may reach before it is closed anyway.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 4096;

/// One scrollback entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRecord {
    pub text: String,
    /// When the line was first seen. Amendments keep the original time.
    pub timestamp: DateTime<Utc>,
}

impl LineRecord {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Settings for a [`SerialMonitor`](super::SerialMonitor), in the shape the
/// host application stores them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub session: SessionConfig,
    pub max_lines: usize,
    pub max_line_length: usize,
    pub chunk_size: usize,
    pub poll_interval_ms: u64,
    pub discovery_timeout_ms: u64,
    pub discovery_step_ms: u64,
    pub port_poll_interval_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            max_lines: DEFAULT_MAX_LINES,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            chunk_size: 512,
            poll_interval_ms: 10,
            discovery_timeout_ms: 1000,
            discovery_step_ms: 250,
            port_poll_interval_ms: 1000,
        }
    }
}

impl MonitorConfig {
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }

    pub fn discovery_step(&self) -> Duration {
        Duration::from_millis(self.discovery_step_ms)
    }

    pub fn port_poll_interval(&self) -> Duration {
        Duration::from_millis(self.port_poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{"max_lines": 100, "session": {"baud_rate": 9600}}"#;
        let config = MonitorConfig::from_json(json).unwrap();
        assert_eq!(config.max_lines, 100);
        assert_eq!(config.max_line_length, DEFAULT_MAX_LINE_LENGTH);
        assert_eq!(config.session.baud_rate, 9600);
        assert_eq!(config.chunk_size, 512);
        assert_eq!(config.discovery_step(), Duration::from_millis(250));
    }

    #[test]
    fn test_json_round_trip() {
        let config = MonitorConfig::default();
        let json = config.to_json().unwrap();
        assert_eq!(MonitorConfig::from_json(&json).unwrap(), config);
    }
}
