//! # Node Configuration
//!
//! JSON-backed configuration with development defaults. The network
//! settings block is part of the config so a deployment fully describes the
//! chain it joins.

use serde::{Deserialize, Serialize};
use shared_types::NetworkSettings;
use std::path::Path;

/// Mining section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MiningSection {
    pub enabled: bool,
    pub hashing_threads: usize,
}

impl Default for MiningSection {
    fn default() -> Self {
        Self {
            enabled: false,
            hashing_threads: 2,
        }
    }
}

/// P2P section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct P2pSection {
    pub listen_addr: String,
    pub bootstrap_peers: Vec<String>,
}

impl Default for P2pSection {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:30366".to_string(),
            bootstrap_peers: Vec::new(),
        }
    }
}

/// Top-level node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Database and key material live under this directory.
    pub data_dir: String,
    pub mining: MiningSection,
    pub p2p: P2pSection,
    pub network: NetworkSettings,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data".to_string(),
            mining: MiningSection::default(),
            p2p: P2pSection::default(),
            network: NetworkSettings::devnet([0u8; 20]),
        }
    }
}

impl NodeConfig {
    /// Load from a JSON file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Load from a JSON file if given, otherwise development defaults.
    pub fn load_or_default(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_usable() {
        let config = NodeConfig::default();
        assert!(!config.mining.enabled);
        assert_eq!(config.network.network_id, 1337);
    }

    #[test]
    fn json_roundtrip() {
        let config = NodeConfig::default();
        let json = serde_json::to_string_pretty(&config).unwrap();
        let parsed: NodeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.data_dir, config.data_dir);
        assert_eq!(parsed.network.network_id, config.network.network_id);
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.json");
        std::fs::write(
            &path,
            serde_json::to_string(&NodeConfig::default()).unwrap(),
        )
        .unwrap();

        let loaded = NodeConfig::load(&path).unwrap();
        assert_eq!(loaded.p2p.listen_addr, "0.0.0.0:30366");
    }
}
