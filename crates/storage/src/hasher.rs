//! Recursive, sidecar-cached directory content hashing
//!
//! Produces a deterministic digest over a file-storage volume, tolerant
//! of partially-downloaded content. Every tracked entry gets a sidecar
//! file (`<entry>._hash`) caching its digest:
//!
//! - **Build mode** (`checking == false`): a file without a sidecar is
//!   treated as not yet fully downloaded: its digest is computed and
//!   persisted for later passes but *not* folded into the running digest
//!   this pass. Files with a sidecar fold the cached digest without
//!   re-reading content.
//! - **Checking mode** (`checking == true`): every digest is recomputed
//!   from current content, stale sidecars are overwritten, and every
//!   entry is folded. This is the trust-nothing pass used to verify a snapshot
//!   received from an untrusted peer.
//!
//! Entries are folded in lexicographic order of their root-relative
//! path, and entry digests are computed over the relative path, so the
//! result reproduces across nodes regardless of filesystem iteration
//! order or data-directory location.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::trace;
use walkdir::WalkDir;

use crate::{Hash, Result, SnapshotError, HASH_SIDECAR_SUFFIX};
use snapsync_crypto::{hash_from_hex, hash_to_hex, sha256, Sha256Accumulator};

/// Sidecar file path for a tracked entry: the entry path with `._hash`
/// appended to its final component.
pub fn sidecar_path(entry: &Path) -> PathBuf {
    let mut name = entry
        .file_name()
        .map(OsString::from)
        .unwrap_or_default();
    name.push(HASH_SIDECAR_SUFFIX);
    entry.with_file_name(name)
}

fn relative_string(root: &Path, path: &Path) -> Result<String> {
    let rel = path
        .strip_prefix(root)
        .map_err(|e| SnapshotError::CannotRead {
            path: path.to_path_buf(),
            source: io::Error::other(e.to_string()),
        })?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Ok(parts.join("/"))
}

fn read_sidecar(path: &Path) -> Result<Hash> {
    let text = fs::read_to_string(path).map_err(|source| SnapshotError::CannotRead {
        path: path.to_path_buf(),
        source,
    })?;
    hash_from_hex(text.trim()).map_err(|e| SnapshotError::CannotRead {
        path: path.to_path_buf(),
        source: io::Error::new(io::ErrorKind::InvalidData, e.to_string()),
    })
}

fn write_sidecar(path: &Path, digest: &Hash) -> Result<()> {
    fs::write(path, hash_to_hex(digest)).map_err(|source| SnapshotError::CannotWrite {
        path: path.to_path_buf(),
        source,
    })
}

/// Digest of one file: `sha256(sha256(relpath) || sha256(contents))`.
fn file_digest(root: &Path, path: &Path) -> Result<Hash> {
    let rel = relative_string(root, path)?;
    let contents = fs::read(path).map_err(|source| SnapshotError::CannotRead {
        path: path.to_path_buf(),
        source,
    })?;
    let mut acc = Sha256Accumulator::new();
    acc.write(&sha256(rel.as_bytes()));
    acc.write(&sha256(&contents));
    Ok(acc.finalize())
}

/// Fold the content digest of the tree under `root` into `acc`.
///
/// `root` itself is not part of the digest; its entries are. See the
/// module docs for the build/checking mode semantics.
pub fn fold_tree(root: &Path, acc: &mut Sha256Accumulator, checking: bool) -> Result<()> {
    if !root.is_dir() {
        return Err(SnapshotError::InvalidPath {
            path: root.to_path_buf(),
        });
    }

    let walker = WalkDir::new(root)
        .min_depth(1)
        .sort_by(|a, b| a.file_name().cmp(b.file_name()));
    for entry in walker {
        let entry = entry.map_err(|e| SnapshotError::CannotRead {
            path: root.to_path_buf(),
            source: io::Error::other(e.to_string()),
        })?;
        let path = entry.path();
        let sidecar = sidecar_path(path);

        if entry.file_type().is_file() {
            if entry.file_name().to_string_lossy().ends_with(HASH_SIDECAR_SUFFIX) {
                continue;
            }
            if checking {
                let digest = file_digest(root, path)?;
                write_sidecar(&sidecar, &digest)?;
                acc.write(&digest);
            } else if sidecar.is_file() {
                acc.write(&read_sidecar(&sidecar)?);
            } else {
                // file has not been downloaded fully; cache its digest
                // for the next pass without folding it into this one
                let digest = file_digest(root, path)?;
                write_sidecar(&sidecar, &digest)?;
                trace!(path = %path.display(), "deferred unhashed file");
            }
        } else if entry.file_type().is_dir() {
            if checking {
                let digest = sha256(relative_string(root, path)?.as_bytes());
                write_sidecar(&sidecar, &digest)?;
                acc.write(&digest);
            } else if sidecar.is_file() {
                acc.write(&read_sidecar(&sidecar)?);
            } else {
                let digest = sha256(relative_string(root, path)?.as_bytes());
                write_sidecar(&sidecar, &digest)?;
                acc.write(&digest);
            }
        }
    }
    Ok(())
}

/// Convenience wrapper folding a single tree into a fresh digest.
pub fn tree_digest(root: &Path, checking: bool) -> Result<Hash> {
    let mut acc = Sha256Accumulator::new();
    fold_tree(root, &mut acc, checking)?;
    Ok(acc.finalize())
}
