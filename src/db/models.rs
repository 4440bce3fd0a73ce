use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// DeviceStatus
// ---------------------------------------------------------------------------

/// Stored as TEXT in the `devices.status` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Online,
    Offline,
}

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceStatus::Online => "online",
            DeviceStatus::Offline => "offline",
        }
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// LogLevel
// ---------------------------------------------------------------------------

/// Severity of an audit-trail entry in `system_logs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
        }
    }
}

// ---------------------------------------------------------------------------
// Insert payloads
// ---------------------------------------------------------------------------

/// A validated sensor sample ready for persistence.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSensorReading {
    pub device_id: i32,
    pub temperature: f64,
    pub humidity: f64,
    pub ldr: f64,
    pub heater_state: i32,
    pub prediction_confidence: Option<f64>,
}

/// A control command as received on a control topic. `executed` is always
/// false at insert; a downstream actuation process flips it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewControlCommand {
    pub device_id: i32,
    pub command_type: String,
    pub command_value: i64,
    pub source: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_status_matches_column_encoding() {
        assert_eq!(DeviceStatus::Online.as_str(), "online");
        assert_eq!(DeviceStatus::Offline.as_str(), "offline");
        assert_eq!(
            serde_json::from_str::<DeviceStatus>("\"offline\"").unwrap(),
            DeviceStatus::Offline
        );
    }

    #[test]
    fn device_status_rejects_unknown() {
        assert!(serde_json::from_str::<DeviceStatus>("\"rebooting\"").is_err());
    }

    #[test]
    fn log_level_matches_column_encoding() {
        assert_eq!(LogLevel::Info.as_str(), "INFO");
        assert_eq!(LogLevel::Warning.as_str(), "WARNING");
        assert_eq!(LogLevel::Error.as_str(), "ERROR");
    }
}
