//! # Snapsync Configuration
//!
//! This crate provides the configuration consumed by the snapshot
//! subsystem: the ordered network node list, this node's identity, the
//! storage volume layout, and the network's common threshold public key.
//!
//! Configuration is loaded from a single TOML file:
//!
//! ```toml
//! data_dir = "/var/lib/snapsync"
//! own_node_id = 2
//! common_public_key = ["0x…", "0x…", "0x…", "0x…"]
//!
//! [[volumes]]
//! name = "state"
//! kind = "database"
//!
//! [[volumes]]
//! name = "filestorage"
//! kind = "file_storage"
//!
//! [[nodes]]
//! id = 1
//! ip = "10.0.0.1"
//! rpc_port = 1234
//! ```
//!
//! All settings are validated up front by [`ChainConfig::validate`];
//! every rejected field maps to a dedicated [`ConfigError`] variant so
//! operators see exactly what is wrong.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

mod config;
mod error;

pub use config::{ChainConfig, NodeInfo, VolumeKind, VolumeSpec};
pub use error::{ConfigError, ConfigResult};
