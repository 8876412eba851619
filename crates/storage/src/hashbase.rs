//! The volume store's `hash_base()` contract
//!
//! Database volumes are hashed through the key-value store's own
//! deterministic, order-independent digest over all stored key/value
//! pairs. The store itself is an external collaborator; [`BaseHasher`]
//! is the seam it is injected through.

use std::fs;
use std::path::Path;
use walkdir::WalkDir;

use crate::{Hash, Result, SnapshotError, HASH_SIDECAR_SUFFIX};
use snapsync_crypto::{sha256, Sha256Accumulator};

/// Deterministic, order-independent digest over a database volume.
pub trait BaseHasher: Send + Sync {
    /// Digest the content of the database volume at `volume_dir`.
    ///
    /// The result must not depend on iteration order, so that two nodes
    /// holding the same logical content agree on the digest.
    fn hash_base(&self, volume_dir: &Path) -> Result<Hash>;
}

/// Default [`BaseHasher`] for deployments where the key-value engine is
/// not linked in: XOR-folds the digest of every regular file in the
/// volume. XOR is commutative, so the result is order-independent like
/// the engine's own `hash_base()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileBaseHasher;

impl FileBaseHasher {
    /// Create a file-level base hasher
    pub fn new() -> Self {
        Self
    }
}

impl BaseHasher for FileBaseHasher {
    fn hash_base(&self, volume_dir: &Path) -> Result<Hash> {
        if !volume_dir.is_dir() {
            return Err(SnapshotError::InvalidPath {
                path: volume_dir.to_path_buf(),
            });
        }

        let mut folded = [0u8; 32];
        for entry in WalkDir::new(volume_dir).min_depth(1) {
            let entry = entry.map_err(|e| SnapshotError::CannotRead {
                path: volume_dir.to_path_buf(),
                source: std::io::Error::other(e.to_string()),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            if entry.file_name().to_string_lossy().ends_with(HASH_SIDECAR_SUFFIX) {
                continue;
            }

            let rel = entry
                .path()
                .strip_prefix(volume_dir)
                .map_err(|e| SnapshotError::CannotRead {
                    path: entry.path().to_path_buf(),
                    source: std::io::Error::other(e.to_string()),
                })?;
            let rel: Vec<String> = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();

            let contents = fs::read(entry.path()).map_err(|source| SnapshotError::CannotRead {
                path: entry.path().to_path_buf(),
                source,
            })?;

            let mut acc = Sha256Accumulator::new();
            acc.write(&sha256(rel.join("/").as_bytes()));
            acc.write(&sha256(&contents));
            let digest = acc.finalize();

            for (folded_byte, digest_byte) in folded.iter_mut().zip(digest.iter()) {
                *folded_byte ^= digest_byte;
            }
        }
        Ok(folded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_file(dir: &Path, rel: &str, contents: &[u8]) {
        let path = dir.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn digest_is_order_independent() {
        let a = TempDir::new().unwrap();
        write_file(a.path(), "k1", b"v1");
        write_file(a.path(), "k2", b"v2");

        let b = TempDir::new().unwrap();
        write_file(b.path(), "k2", b"v2");
        write_file(b.path(), "k1", b"v1");

        let hasher = FileBaseHasher::new();
        assert_eq!(
            hasher.hash_base(a.path()).unwrap(),
            hasher.hash_base(b.path()).unwrap()
        );
    }

    #[test]
    fn digest_tracks_content() {
        let tmp = TempDir::new().unwrap();
        write_file(tmp.path(), "k1", b"v1");
        let hasher = FileBaseHasher::new();
        let before = hasher.hash_base(tmp.path()).unwrap();

        write_file(tmp.path(), "k1", b"changed");
        let after = hasher.hash_base(tmp.path()).unwrap();
        assert_ne!(before, after);
    }

    #[test]
    fn sidecars_are_excluded() {
        let tmp = TempDir::new().unwrap();
        write_file(tmp.path(), "k1", b"v1");
        let hasher = FileBaseHasher::new();
        let before = hasher.hash_base(tmp.path()).unwrap();

        write_file(tmp.path(), "k1._hash", b"cached");
        assert_eq!(before, hasher.hash_base(tmp.path()).unwrap());
    }

    #[test]
    fn missing_volume_is_invalid_path() {
        let hasher = FileBaseHasher::new();
        assert!(matches!(
            hasher.hash_base(Path::new("/nonexistent/volume")),
            Err(SnapshotError::InvalidPath { .. })
        ));
    }

    #[test]
    fn empty_volume_digest_is_zero() {
        let tmp = TempDir::new().unwrap();
        let hasher = FileBaseHasher::new();
        assert_eq!(hasher.hash_base(tmp.path()).unwrap(), [0u8; 32]);
    }
}
