//! Chain configuration structures and TOML loading

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{ConfigError, ConfigResult};

/// Size in bytes of one encoded base-field element (48-byte big-endian)
const FIELD_ELEMENT_LEN: usize = 48;

/// One node of the network, in node-list order.
///
/// The position of a node in [`ChainConfig::nodes`] is its *ordinal*; the
/// hash-agreement protocol indexes peer votes and interpolation points by
/// ordinal, so the list order must be identical on every node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Network-wide unique node id
    pub id: u64,
    /// IP address or hostname the node's RPC endpoint listens on
    pub ip: String,
    /// HTTP JSON-RPC port
    pub rpc_port: u16,
}

impl NodeInfo {
    /// HTTP endpoint URL for this node's RPC interface
    pub fn endpoint(&self) -> String {
        format!("http://{}:{}", self.ip, self.rpc_port)
    }
}

/// How a volume's content is folded into the snapshot hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeKind {
    /// Key-value store volume, hashed through the store's `hash_base()`
    #[default]
    Database,
    /// Plain file tree, hashed by the recursive content hasher
    FileStorage,
}

/// One independently snapshot-able storage unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeSpec {
    /// Volume directory name under the data dir
    pub name: String,
    /// Hashing strategy for this volume
    #[serde(default)]
    pub kind: VolumeKind,
}

impl VolumeSpec {
    /// Create a database volume spec
    pub fn database(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: VolumeKind::Database,
        }
    }

    /// Create a file-storage volume spec
    pub fn file_storage(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: VolumeKind::FileStorage,
        }
    }
}

/// Top-level configuration of the snapshot subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Data directory holding live volumes, `snapshots/` and `diffs/`
    pub data_dir: PathBuf,
    /// Ordered volume list; order is significant for hash folding
    pub volumes: Vec<VolumeSpec>,
    /// Ordered network node list; order is significant for voting
    pub nodes: Vec<NodeInfo>,
    /// Id of the node this process runs as
    pub own_node_id: u64,
    /// The network's common threshold public key, as four hex-encoded
    /// field elements (a G2 point: x.c0, x.c1, y.c0, y.c1)
    pub common_public_key: [String; 4],
}

impl ChainConfig {
    /// Load and validate a configuration from a TOML file.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.volumes.is_empty() {
            return Err(ConfigError::NoVolumes);
        }
        for (i, vol) in self.volumes.iter().enumerate() {
            if vol.name.is_empty() || vol.name.contains(['/', '\\']) {
                return Err(ConfigError::InvalidVolumeName(vol.name.clone()));
            }
            if self.volumes[..i].iter().any(|v| v.name == vol.name) {
                return Err(ConfigError::DuplicateVolume(vol.name.clone()));
            }
        }

        if self.nodes.is_empty() {
            return Err(ConfigError::NoNodes);
        }
        for (i, node) in self.nodes.iter().enumerate() {
            if node.ip.is_empty() {
                return Err(ConfigError::EmptyNodeIp(node.id));
            }
            if self.nodes[..i].iter().any(|n| n.id == node.id) {
                return Err(ConfigError::DuplicateNodeId(node.id));
            }
        }
        if self.own_index().is_none() {
            return Err(ConfigError::UnknownOwnNode(self.own_node_id));
        }

        for (index, component) in self.common_public_key.iter().enumerate() {
            let stripped = component.strip_prefix("0x").unwrap_or(component);
            let bytes = hex::decode(stripped).map_err(|e| {
                ConfigError::InvalidPublicKeyComponent {
                    index,
                    reason: e.to_string(),
                }
            })?;
            if bytes.len() != FIELD_ELEMENT_LEN {
                return Err(ConfigError::InvalidPublicKeyComponent {
                    index,
                    reason: format!("expected {} bytes, got {}", FIELD_ELEMENT_LEN, bytes.len()),
                });
            }
        }

        Ok(())
    }

    /// Total number of nodes in the network
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Ordinal of this node in the node list, if present
    pub fn own_index(&self) -> Option<usize> {
        self.nodes.iter().position(|n| n.id == self.own_node_id)
    }

    /// Whether the node at `ordinal` is this node itself
    pub fn is_self(&self, ordinal: usize) -> bool {
        self.nodes
            .get(ordinal)
            .is_some_and(|n| n.id == self.own_node_id)
    }

    /// Names of the configured volumes, in configured order
    pub fn volume_names(&self) -> Vec<String> {
        self.volumes.iter().map(|v| v.name.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pk_component() -> String {
        format!("0x{}", hex::encode([7u8; FIELD_ELEMENT_LEN]))
    }

    fn sample_config() -> ChainConfig {
        ChainConfig {
            data_dir: PathBuf::from("/var/lib/snapsync"),
            volumes: vec![
                VolumeSpec::database("state"),
                VolumeSpec::file_storage("filestorage"),
            ],
            nodes: vec![
                NodeInfo {
                    id: 1,
                    ip: "10.0.0.1".into(),
                    rpc_port: 1234,
                },
                NodeInfo {
                    id: 2,
                    ip: "10.0.0.2".into(),
                    rpc_port: 1234,
                },
            ],
            own_node_id: 1,
            common_public_key: [
                pk_component(),
                pk_component(),
                pk_component(),
                pk_component(),
            ],
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(sample_config().validate().is_ok());
    }

    #[test]
    fn endpoint_format() {
        let config = sample_config();
        assert_eq!(config.nodes[0].endpoint(), "http://10.0.0.1:1234");
    }

    #[test]
    fn own_index_resolves() {
        let mut config = sample_config();
        config.own_node_id = 2;
        assert_eq!(config.own_index(), Some(1));
        assert!(config.is_self(1));
        assert!(!config.is_self(0));
    }

    #[test]
    fn rejects_duplicate_node_id() {
        let mut config = sample_config();
        config.nodes[1].id = 1;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicateNodeId(1))
        ));
    }

    #[test]
    fn rejects_unknown_own_node() {
        let mut config = sample_config();
        config.own_node_id = 99;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnknownOwnNode(99))
        ));
    }

    #[test]
    fn rejects_short_public_key_component() {
        let mut config = sample_config();
        config.common_public_key[2] = "0xdead".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidPublicKeyComponent { index: 2, .. })
        ));
    }

    #[test]
    fn rejects_nested_volume_name() {
        let mut config = sample_config();
        config.volumes[0].name = "a/b".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidVolumeName(_))
        ));
    }
}
