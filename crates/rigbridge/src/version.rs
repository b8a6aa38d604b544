//! Build and wiring details reported by `/health-check`.
//!
//! Operators reading the health output on the rig's tablet need to know which
//! serial device and baud rate this process was started against, not just the
//! build. Those come from the resolved config at startup.

use std::time::Duration;

use crate::config::SerialConfig;

/// rigbridge version from Cargo.toml
pub const RIGBRIDGE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, serde::Serialize)]
pub struct VersionInfo {
    pub rigbridge: &'static str,
    /// Serial device path, e.g. the udev symlink for the ClearCore.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub baud_rate: Option<u32>,
    /// Settle interval every exchange waits before draining replies.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settle_ms: Option<u64>,
}

impl Default for VersionInfo {
    fn default() -> Self {
        Self {
            rigbridge: RIGBRIDGE_VERSION,
            device: None,
            baud_rate: None,
            settle_ms: None,
        }
    }
}

impl VersionInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_serial(mut self, serial: &SerialConfig) -> Self {
        self.device = Some(serial.device.clone());
        self.baud_rate = Some(serial.baud_rate);
        self
    }

    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle_ms = Some(u64::try_from(settle.as_millis()).unwrap_or(u64::MAX));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build() -> VersionInfo {
        VersionInfo {
            rigbridge: "0.1.0",
            ..VersionInfo::default()
        }
    }

    #[test]
    fn version_info_has_crate_version() {
        let info = VersionInfo::new();
        assert_eq!(info.rigbridge, RIGBRIDGE_VERSION);
        assert!(info.device.is_none());
    }

    #[test]
    fn version_info_serializes_minimal() {
        insta::assert_json_snapshot!(build(), @r#"
        {
          "rigbridge": "0.1.0"
        }
        "#);
    }

    #[test]
    fn version_info_reports_serial_wiring() {
        let info = build()
            .with_serial(&SerialConfig::default())
            .with_settle(Duration::from_millis(100));
        insta::assert_json_snapshot!(info, @r#"
        {
          "rigbridge": "0.1.0",
          "device": "/dev/clearCore",
          "baud_rate": 9600,
          "settle_ms": 100
        }
        "#);
    }
}
