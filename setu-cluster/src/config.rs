//! Cluster node configuration
//!
//! Loaded from a TOML file; every node of a cluster runs from the same
//! file apart from the `[node]` section.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Top-level cluster configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClusterConfig {
    pub node: NodeConfig,
    #[serde(default)]
    pub pipe: PipeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Role and addressing of this node
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum NodeConfig {
    /// The single master: binds `listen` and waits for `num_slaves` peers
    Master { listen: String, num_slaves: usize },
    /// A slave: connects to the master's `listen` address
    Slave { master: String },
}

/// Multicast pipe tuning
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipeConfig {
    /// Bytes accumulated before a packet ships on its own
    pub packet_size: usize,
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            packet_size: crate::multicast::DEFAULT_PACKET_SIZE,
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

impl ClusterConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: ClusterConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Single-node master defaults, suitable for development
    pub fn standalone_defaults() -> Self {
        Self {
            node: NodeConfig::Master {
                listen: "0.0.0.0:6661".to_string(),
                num_slaves: 0,
            },
            pipe: PipeConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClusterConfig::standalone_defaults();
        assert!(matches!(
            config.node,
            NodeConfig::Master { num_slaves: 0, .. }
        ));
        assert_eq!(config.pipe.packet_size, crate::multicast::DEFAULT_PACKET_SIZE);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = ClusterConfig::standalone_defaults();
        let toml_string = toml::to_string_pretty(&config).unwrap();
        assert!(toml_string.contains("[node]"));
        assert!(toml_string.contains("role = \"master\""));

        let parsed: ClusterConfig = toml::from_str(&toml_string).unwrap();
        assert_eq!(parsed.pipe.packet_size, config.pipe.packet_size);
    }

    #[test]
    fn test_slave_deserialization() {
        let toml_content = r#"
[node]
role = "slave"
master = "10.0.0.1:6661"

[pipe]
packet_size = 4096

[logging]
level = "debug"
"#;
        let config: ClusterConfig = toml::from_str(toml_content).unwrap();
        match config.node {
            NodeConfig::Slave { master } => assert_eq!(master, "10.0.0.1:6661"),
            other => panic!("expected slave role, got {other:?}"),
        }
        assert_eq!(config.pipe.packet_size, 4096);
        assert_eq!(config.logging.level, "debug");
    }
}
