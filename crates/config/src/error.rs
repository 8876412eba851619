//! Configuration error types

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during configuration loading and validation
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file
    #[error("failed to read config file at {path}: {source}")]
    FileRead {
        /// Path that could not be read
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse TOML configuration
    #[error("failed to parse TOML config: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// No storage volumes configured
    #[error("no storage volumes configured: at least one volume required")]
    NoVolumes,

    /// Duplicate volume name
    #[error("duplicate volume name: {0}")]
    DuplicateVolume(String),

    /// Volume name contains a path separator
    #[error("volume name {0:?} must be a single path component")]
    InvalidVolumeName(String),

    /// No network nodes configured
    #[error("no network nodes configured: at least one node required")]
    NoNodes,

    /// Duplicate node id in the node list
    #[error("duplicate node id: {0}")]
    DuplicateNodeId(u64),

    /// Own node id is not present in the node list
    #[error("own node id {0} is not in the node list")]
    UnknownOwnNode(u64),

    /// A node entry has an empty IP address
    #[error("node {0} has an empty ip address")]
    EmptyNodeIp(u64),

    /// A common public key component is not a valid field element
    #[error("common public key component {index} is not a valid field element: {reason}")]
    InvalidPublicKeyComponent {
        /// Which of the four components is malformed (0-based)
        index: usize,
        /// Why the component was rejected
        reason: String,
    },
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;
