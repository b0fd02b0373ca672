//! Daemon configuration
//!
//! Loaded from a TOML file by `drishti-iod`; defaults describe a small
//! mock rig suitable for development.

use crate::error::Result;
use crate::protocol::DeviceLayout;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Top-level daemon configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Network configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NetworkConfig {
    /// Address the device server listens on
    pub listen: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8555".to_string(),
        }
    }
}

/// Device layout and sampling rate
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeviceConfig {
    pub num_trackers: u32,
    pub num_buttons: u32,
    pub num_valuators: u32,
    /// Sampling loop frequency in Hz
    pub update_rate_hz: f64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            num_trackers: 2,
            num_buttons: 6,
            num_valuators: 2,
            update_rate_hz: 100.0,
        }
    }
}

impl DeviceConfig {
    pub fn layout(&self) -> DeviceLayout {
        DeviceLayout {
            num_trackers: self.num_trackers,
            num_buttons: self.num_buttons,
            num_valuators: self.num_valuators,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: DaemonConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DaemonConfig::default();
        assert_eq!(config.network.listen, "0.0.0.0:8555");
        assert_eq!(config.device.num_trackers, 2);
        assert_eq!(config.device.update_rate_hz, 100.0);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = DaemonConfig::default();
        let toml_string = toml::to_string_pretty(&config).unwrap();
        assert!(toml_string.contains("[network]"));
        assert!(toml_string.contains("[device]"));

        let parsed: DaemonConfig = toml::from_str(&toml_string).unwrap();
        assert_eq!(parsed.device.num_buttons, config.device.num_buttons);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let toml_content = r#"
[device]
num_trackers = 4
num_buttons = 12
num_valuators = 3
update_rate_hz = 250.0
"#;
        let config: DaemonConfig = toml::from_str(toml_content).unwrap();
        assert_eq!(config.device.num_trackers, 4);
        assert_eq!(config.network.listen, "0.0.0.0:8555");
        let layout = config.device.layout();
        assert_eq!(layout.num_valuators, 3);
    }
}
