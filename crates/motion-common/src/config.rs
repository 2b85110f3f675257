//! Configuration structures for the motion master.
//!
//! Supports TOML deserialization with sensible defaults for bench work and
//! explicit values for commissioned cells.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level master configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MasterConfig {
    /// Network interface the bus is attached to (e.g. "enp3s0" or
    /// "\\Device\\NPF_{...}" on Windows builds of the transport).
    /// Must be explicitly configured for real hardware.
    pub interface: String,

    /// Process-data cycle time.
    #[serde(with = "humantime_serde")]
    pub cycle_time: Duration,

    /// Additional attempts of the full startup sequence after the first
    /// failure.
    pub startup_retries: u32,

    /// Attempts to reach OP, pumping one process-data round-trip each.
    pub op_retries: u32,

    /// Receive timeout for one process-data round-trip.
    #[serde(with = "humantime_serde")]
    pub receive_timeout: Duration,

    /// Mailbox timeout for SDO transfers.
    #[serde(with = "humantime_serde")]
    pub sdo_timeout: Duration,

    /// Timeout when waiting for a bus state change.
    #[serde(with = "humantime_serde")]
    pub state_timeout: Duration,

    /// Real-time scheduling for the cyclic thread.
    pub realtime: RealtimeConfig,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            interface: String::from("eth0"),
            cycle_time: Duration::from_micros(2000),
            startup_retries: 3,
            op_retries: 5,
            receive_timeout: Duration::from_micros(2000),
            sdo_timeout: Duration::from_millis(50),
            state_timeout: Duration::from_millis(500),
            realtime: RealtimeConfig::default(),
        }
    }
}

impl MasterConfig {
    /// Create a configuration for the given interface with default timing.
    pub fn for_interface(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            ..Self::default()
        }
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(ConfigError::Parse)
    }

    /// Serialize configuration to a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }
}

/// Real-time scheduling configuration for the cyclic thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// Enable real-time scheduling (requires privileges).
    pub enabled: bool,

    /// SCHED_FIFO priority (1-99).
    pub priority: u8,

    /// Lock all memory pages (mlockall).
    pub lock_memory: bool,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            priority: 80,
            lock_memory: true,
        }
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File I/O error.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// TOML parsing error.
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize TOML: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Serde helper module for `Duration` using humantime format.
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MasterConfig::default();
        assert_eq!(config.cycle_time, Duration::from_micros(2000));
        assert_eq!(config.startup_retries, 3);
        assert!(!config.realtime.enabled);
    }

    #[test]
    fn test_parse_toml() {
        let toml = r#"
            interface = "enp3s0"
            cycle_time = "1ms"
            op_retries = 10

            [realtime]
            enabled = true
            priority = 90
        "#;

        let config = MasterConfig::from_toml(toml).unwrap();
        assert_eq!(config.interface, "enp3s0");
        assert_eq!(config.cycle_time, Duration::from_millis(1));
        assert_eq!(config.op_retries, 10);
        assert!(config.realtime.enabled);
        assert_eq!(config.realtime.priority, 90);
        // Unset fields keep their defaults
        assert_eq!(config.sdo_timeout, Duration::from_millis(50));
    }

    #[test]
    fn test_roundtrip_toml() {
        let config = MasterConfig::for_interface("eth1");
        let toml = config.to_toml().unwrap();
        let parsed = MasterConfig::from_toml(&toml).unwrap();
        assert_eq!(parsed.interface, "eth1");
        assert_eq!(config.cycle_time, parsed.cycle_time);
        assert_eq!(config.state_timeout, parsed.state_timeout);
    }
}
