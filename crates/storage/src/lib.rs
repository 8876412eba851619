//! # Snapsync Storage
//!
//! Copy-on-write volume management, snapshot lifecycle and snapshot
//! content hashing:
//!
//! - **[`CowBackend`]**: the narrow storage-level interface: atomic
//!   read-only clones, incremental byte streams (`send`/`receive`),
//!   volume deletion and the read-only toggle. Two implementations ship:
//!   [`BtrfsBackend`] (shells out to the `btrfs` tool) and
//!   [`ArchiveBackend`] (application-level copy-and-stream fallback used
//!   on non-COW filesystems and in tests).
//! - **[`SnapshotManager`]**: produces, restores, prunes, diffs and
//!   hashes snapshots identified by block number, entirely in terms of
//!   the backend interface.
//! - **Content hashing**: a recursive, sidecar-cached directory hasher
//!   ([`hasher`]) plus the volume store's [`BaseHasher`] contract for
//!   database volumes.
//!
//! ## On-disk layout
//!
//! Relative to the configured data directory:
//!
//! ```text
//! <volume>/                          live volumes
//! snapshots/<block>/<volume>/        per-block read-only clones
//! snapshots/<block>/snapshot_hash.txt
//! diffs/<block>                      assembled diff stream
//! diffs/<block>_<volume>             transient per-volume stream
//! <entry>._hash                      sidecar content-hash cache
//! ```
//!
//! All operations here are synchronous and blocking. The manager assumes
//! exclusive ownership of its volumes; concurrent manager calls on the
//! same volume set must be serialized by the caller.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod cow;
pub mod hashbase;
pub mod hasher;
mod manager;

pub use cow::{ArchiveBackend, BtrfsBackend, CowBackend};
pub use hashbase::{BaseHasher, FileBaseHasher};
pub use manager::SnapshotManager;

use std::path::PathBuf;
use thiserror::Error;

/// A 32-byte content digest
pub type Hash = snapsync_crypto::Hash;

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, SnapshotError>;

/// Name of the hash sidecar file inside each snapshot directory
pub const SNAPSHOT_HASH_FILE_NAME: &str = "snapshot_hash.txt";

/// Suffix of per-entry content-hash sidecar files
pub const HASH_SIDECAR_SUFFIX: &str = "._hash";

/// Directory of per-block snapshots under the data dir
pub const SNAPSHOTS_DIR_NAME: &str = "snapshots";

/// Directory of assembled diff streams under the data dir
pub const DIFFS_DIR_NAME: &str = "diffs";

/// Errors raised by snapshot storage operations
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// A required path does not exist or is not usable
    #[error("invalid path: {path}")]
    InvalidPath {
        /// The offending path
        path: PathBuf,
    },

    /// Reading a path failed
    #[error("cannot read {path}: {source}")]
    CannotRead {
        /// The offending path
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// Writing a path failed
    #[error("cannot write {path}: {source}")]
    CannotWrite {
        /// The offending path
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// Creating a file or directory failed
    #[error("cannot create {path}: {source}")]
    CannotCreate {
        /// The offending path
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// Deleting a file or directory failed
    #[error("cannot delete {path}: {source}")]
    CannotDelete {
        /// The offending path
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// A storage-backend primitive failed; the in-flight operation is
    /// fatal and filesystem state is unspecified
    #[error("volume operation failed: {command}: {message}")]
    VolumeOperation {
        /// The backend command that failed
        command: String,
        /// Backend error output
        message: String,
    },

    /// The snapshot for this block already exists (expected-state
    /// conflict, not a fault)
    #[error("snapshot for block {0} is already present")]
    SnapshotPresent(u64),

    /// The snapshot for this block does not exist (expected-state
    /// conflict, not a fault)
    #[error("snapshot for block {0} is absent")]
    SnapshotAbsent(u64),
}

impl SnapshotError {
    /// Whether this error is an expected-state conflict the caller is
    /// supposed to branch on, rather than a storage fault.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            SnapshotError::SnapshotPresent(_) | SnapshotError::SnapshotAbsent(_)
        )
    }
}
