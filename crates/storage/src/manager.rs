//! Snapshot lifecycle management
//!
//! [`SnapshotManager`] owns the per-block snapshot tree under the data
//! directory and orchestrates the COW backend plus the content hashers
//! to produce, restore, prune, diff and hash snapshots.

use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use snapsync_config::{VolumeKind, VolumeSpec};
use snapsync_crypto::{hash_from_hex, hash_to_hex, Sha256Accumulator};

use crate::cow::CowBackend;
use crate::hashbase::BaseHasher;
use crate::{
    hasher, Hash, Result, SnapshotError, DIFFS_DIR_NAME, SNAPSHOTS_DIR_NAME,
    SNAPSHOT_HASH_FILE_NAME,
};

/// Manages point-in-time snapshots of the configured volumes.
///
/// One snapshot per block number; block `0` is the permanent genesis
/// anchor and survives every pruning pass. The manager assumes exclusive
/// ownership of the live volumes; concurrent calls on the same volume
/// set must be serialized by the caller.
pub struct SnapshotManager<B: CowBackend, H: BaseHasher> {
    data_dir: PathBuf,
    volumes: Vec<VolumeSpec>,
    snapshots_dir: PathBuf,
    diffs_dir: PathBuf,
    backend: B,
    base_hasher: H,
    /// Serializes all snapshot-hash-file reads and writes
    hash_file_lock: Mutex<()>,
}

impl<B: CowBackend, H: BaseHasher> SnapshotManager<B, H> {
    /// Create a manager over `data_dir`.
    ///
    /// Validates that the data dir exists and sits on storage the
    /// backend can snapshot, creates `snapshots/`, recreates `diffs/`
    /// empty, and creates any configured volume that does not yet exist.
    pub fn new(
        data_dir: impl Into<PathBuf>,
        volumes: Vec<VolumeSpec>,
        backend: B,
        base_hasher: H,
    ) -> Result<Self> {
        let data_dir = data_dir.into();

        if volumes.is_empty() {
            return Err(SnapshotError::VolumeOperation {
                command: "construct".into(),
                message: "no volumes configured".into(),
            });
        }
        if !data_dir.is_dir() {
            return Err(SnapshotError::InvalidPath {
                path: data_dir.clone(),
            });
        }
        if !backend.is_cow_capable(&data_dir)? {
            return Err(SnapshotError::VolumeOperation {
                command: format!("{} capability check", backend.name()),
                message: format!("{} is not snapshot-capable", data_dir.display()),
            });
        }

        let snapshots_dir = data_dir.join(SNAPSHOTS_DIR_NAME);
        let diffs_dir = data_dir.join(DIFFS_DIR_NAME);

        fs::create_dir_all(&snapshots_dir).map_err(|source| SnapshotError::CannotCreate {
            path: snapshots_dir.clone(),
            source,
        })?;
        if diffs_dir.exists() {
            fs::remove_dir_all(&diffs_dir).map_err(|source| SnapshotError::CannotDelete {
                path: diffs_dir.clone(),
                source,
            })?;
        }
        fs::create_dir(&diffs_dir).map_err(|source| SnapshotError::CannotCreate {
            path: diffs_dir.clone(),
            source,
        })?;

        for vol in &volumes {
            let live = data_dir.join(&vol.name);
            if live.exists() {
                if !backend.is_volume(&live)? {
                    return Err(SnapshotError::VolumeOperation {
                        command: format!("{} volume check", backend.name()),
                        message: format!("{} exists but is not a volume", live.display()),
                    });
                }
            } else {
                backend.create_volume(&live)?;
                info!(volume = %vol.name, "created missing volume");
            }
        }

        Ok(Self {
            data_dir,
            volumes,
            snapshots_dir,
            diffs_dir,
            backend,
            base_hasher,
            hash_file_lock: Mutex::new(()),
        })
    }

    /// The managed data directory
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Directory of snapshot `block`
    pub fn snapshot_dir(&self, block: u64) -> PathBuf {
        self.snapshots_dir.join(block.to_string())
    }

    /// Path of the assembled diff stream for `block`
    pub fn diff_path(&self, block: u64) -> PathBuf {
        self.diffs_dir.join(block.to_string())
    }

    fn hash_file_path(&self, block: u64) -> PathBuf {
        self.snapshot_dir(block).join(SNAPSHOT_HASH_FILE_NAME)
    }

    /// Whether a snapshot for `block` exists
    pub fn has_snapshot(&self, block: u64) -> bool {
        self.snapshot_dir(block).is_dir()
    }

    /// Create snapshot `block` by cloning every configured volume.
    ///
    /// Not idempotent: fails with [`SnapshotError::SnapshotPresent`] when
    /// the snapshot already exists.
    pub fn do_snapshot(&self, block: u64) -> Result<()> {
        let dir = self.snapshot_dir(block);
        if dir.exists() {
            return Err(SnapshotError::SnapshotPresent(block));
        }
        fs::create_dir(&dir).map_err(|source| SnapshotError::CannotCreate {
            path: dir.clone(),
            source,
        })?;

        for vol in &self.volumes {
            self.backend
                .snapshot(&self.data_dir.join(&vol.name), &dir, false)?;
        }
        info!(block, "created snapshot");
        Ok(())
    }

    /// Replace every live volume with a fresh writable clone taken from
    /// snapshot `block`.
    ///
    /// Volumes are swapped one by one; a failure mid-way leaves some
    /// volumes restored and others not.
    pub fn restore_snapshot(&self, block: u64) -> Result<()> {
        let dir = self.snapshot_dir(block);
        if !dir.is_dir() {
            return Err(SnapshotError::SnapshotAbsent(block));
        }

        for vol in &self.volumes {
            let live = self.data_dir.join(&vol.name);
            self.backend.delete_volume(&live)?;
            self.backend
                .snapshot(&dir.join(&vol.name), &self.data_dir, true)?;
        }
        info!(block, "restored snapshot");
        Ok(())
    }

    /// Delete snapshot `block`: every volume clone, then the snapshot
    /// directory itself.
    pub fn remove_snapshot(&self, block: u64) -> Result<()> {
        let dir = self.snapshot_dir(block);
        if !dir.is_dir() {
            return Err(SnapshotError::SnapshotAbsent(block));
        }

        for vol in &self.volumes {
            let clone = dir.join(&vol.name);
            if clone.exists() {
                self.backend.delete_volume(&clone)?;
            }
        }
        fs::remove_dir_all(&dir).map_err(|source| SnapshotError::CannotDelete {
            path: dir.clone(),
            source,
        })?;
        info!(block, "removed snapshot");
        Ok(())
    }

    /// Block numbers of all existing snapshots, unsorted.
    fn snapshot_blocks(&self) -> Result<Vec<u64>> {
        let entries =
            fs::read_dir(&self.snapshots_dir).map_err(|source| SnapshotError::CannotRead {
                path: self.snapshots_dir.clone(),
                source,
            })?;

        let mut blocks = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| SnapshotError::CannotRead {
                path: self.snapshots_dir.clone(),
                source,
            })?;
            match entry.file_name().to_string_lossy().parse::<u64>() {
                Ok(block) => blocks.push(block),
                Err(_) => {
                    warn!(entry = %entry.file_name().to_string_lossy(),
                        "ignoring non-numeric entry in snapshots dir");
                }
            }
        }
        Ok(blocks)
    }

    /// Retain genesis (block `0`, unconditionally) plus the `n`
    /// snapshots with the highest block numbers; delete the rest.
    pub fn leave_n_last_snapshots(&self, n: usize) -> Result<()> {
        let mut blocks: Vec<u64> = self
            .snapshot_blocks()?
            .into_iter()
            .filter(|b| *b != 0)
            .collect();
        blocks.sort_unstable_by(|a, b| b.cmp(a));

        for block in blocks.into_iter().skip(n) {
            self.remove_snapshot(block)?;
        }
        Ok(())
    }

    /// The two highest non-genesis snapshot block numbers as
    /// `(current, previous)`; `0` stands in for whichever does not
    /// exist.
    pub fn latest_snapshots(&self) -> Result<(u64, u64)> {
        let mut blocks: Vec<u64> = self
            .snapshot_blocks()?
            .into_iter()
            .filter(|b| *b != 0)
            .collect();
        blocks.sort_unstable_by(|a, b| b.cmp(a));

        let current = blocks.first().copied().unwrap_or(0);
        let previous = blocks.get(1).copied().unwrap_or(0);
        Ok((current, previous))
    }

    /// Return the diff stream for snapshot `block`, building it when not
    /// already materialized.
    ///
    /// Idempotent: an existing diff file is returned as-is, never
    /// recomputed. On failure all partial output is removed before the
    /// error surfaces.
    pub fn make_or_get_diff(&self, block: u64) -> Result<PathBuf> {
        let path = self.diff_path(block);
        if path.is_file() {
            debug!(block, "diff already materialized");
            return Ok(path);
        }
        if !self.has_snapshot(block) {
            // a stale partial target must not shadow the error
            let _ = fs::remove_file(&path);
            return Err(SnapshotError::SnapshotAbsent(block));
        }

        let mut parts = Vec::new();
        match self.assemble_diff(block, &path, &mut parts) {
            Ok(()) => {
                for part in &parts {
                    fs::remove_file(part).map_err(|source| SnapshotError::CannotDelete {
                        path: part.clone(),
                        source,
                    })?;
                }
                info!(block, path = %path.display(), "assembled diff");
                Ok(path)
            }
            Err(err) => {
                for part in &parts {
                    if let Err(cleanup) = fs::remove_file(part) {
                        warn!(part = %part.display(), error = %cleanup,
                            "failed to clean up partial diff");
                    }
                }
                if path.exists() {
                    if let Err(cleanup) = fs::remove_file(&path) {
                        warn!(path = %path.display(), error = %cleanup,
                            "failed to clean up partial diff target");
                    }
                }
                Err(err)
            }
        }
    }

    fn assemble_diff(&self, block: u64, path: &Path, parts: &mut Vec<PathBuf>) -> Result<()> {
        let snapshot_dir = self.snapshot_dir(block);

        for vol in &self.volumes {
            let part = self.diffs_dir.join(format!("{}_{}", block, vol.name));
            let file = fs::File::create(&part).map_err(|source| SnapshotError::CannotCreate {
                path: part.clone(),
                source,
            })?;
            // the part file exists from here on, even if send fails
            parts.push(part.clone());

            let mut writer = BufWriter::new(file);
            self.backend
                .send(&snapshot_dir.join(&vol.name), None, &mut writer)?;
            writer.flush().map_err(|source| SnapshotError::CannotWrite {
                path: part.clone(),
                source,
            })?;
        }

        let target = fs::File::create(path).map_err(|source| SnapshotError::CannotCreate {
            path: path.to_path_buf(),
            source,
        })?;
        let mut writer = BufWriter::new(target);
        for part in parts.iter() {
            let mut reader =
                fs::File::open(part).map_err(|source| SnapshotError::CannotRead {
                    path: part.clone(),
                    source,
                })?;
            std::io::copy(&mut reader, &mut writer).map_err(|source| {
                SnapshotError::CannotWrite {
                    path: path.to_path_buf(),
                    source,
                }
            })?;
        }
        writer.flush().map_err(|source| SnapshotError::CannotWrite {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Materialize snapshot `block` from a previously obtained diff
    /// stream at the diff path.
    pub fn import_diff(&self, block: u64) -> Result<()> {
        let diff = self.diff_path(block);
        if !diff.is_file() {
            return Err(SnapshotError::InvalidPath { path: diff });
        }
        let dir = self.snapshot_dir(block);
        if dir.exists() {
            return Err(SnapshotError::SnapshotPresent(block));
        }

        fs::create_dir(&dir).map_err(|source| SnapshotError::CannotCreate {
            path: dir.clone(),
            source,
        })?;

        let file = fs::File::open(&diff).map_err(|source| SnapshotError::CannotRead {
            path: diff.clone(),
            source,
        })?;
        let mut reader = BufReader::new(file);

        match self.backend.receive(&mut reader, &dir) {
            Ok(()) => {
                info!(block, "imported snapshot from diff");
                Ok(())
            }
            Err(err) => {
                for vol in &self.volumes {
                    let clone = dir.join(&vol.name);
                    if clone.exists() {
                        if let Err(cleanup) = self.backend.delete_volume(&clone) {
                            warn!(clone = %clone.display(), error = %cleanup,
                                "failed to roll back partial volume");
                        }
                    }
                }
                if let Err(cleanup) = fs::remove_dir_all(&dir) {
                    warn!(dir = %dir.display(), error = %cleanup,
                        "failed to roll back partial snapshot dir");
                }
                Err(err)
            }
        }
    }

    /// Retain the `n` diffs with the highest block numbers; delete the
    /// rest. Diffs have no genesis anchor.
    pub fn leave_n_last_diffs(&self, n: usize) -> Result<()> {
        let entries =
            fs::read_dir(&self.diffs_dir).map_err(|source| SnapshotError::CannotRead {
                path: self.diffs_dir.clone(),
                source,
            })?;

        let mut diffs: Vec<(u64, PathBuf)> = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| SnapshotError::CannotRead {
                path: self.diffs_dir.clone(),
                source,
            })?;
            if let Ok(block) = entry.file_name().to_string_lossy().parse::<u64>() {
                diffs.push((block, entry.path()));
            }
        }
        diffs.sort_unstable_by(|a, b| b.0.cmp(&a.0));

        for (block, path) in diffs.into_iter().skip(n) {
            fs::remove_file(&path).map_err(|source| SnapshotError::CannotDelete {
                path: path.clone(),
                source,
            })?;
            debug!(block, "pruned diff");
        }
        Ok(())
    }

    /// Compute and persist the content hash of snapshot `block`.
    ///
    /// A no-op when the hash file already exists. `is_checking` forces a
    /// full recomputation of every entry digest instead of trusting
    /// cached sidecars, the mode used to verify a snapshot downloaded
    /// from an untrusted peer.
    pub fn compute_snapshot_hash(&self, block: u64, is_checking: bool) -> Result<()> {
        if self.is_snapshot_hash_present(block)? {
            debug!(block, "snapshot hash already present");
            return Ok(());
        }
        let dir = self.snapshot_dir(block);

        // sidecar writes need the clones briefly writable
        for vol in &self.volumes {
            self.backend.set_readonly(&dir.join(&vol.name), false)?;
        }

        let mut acc = Sha256Accumulator::new();
        let folded = self.fold_volumes(&dir, &mut acc, is_checking);

        for vol in &self.volumes {
            if let Err(err) = self.backend.set_readonly(&dir.join(&vol.name), true) {
                if folded.is_ok() {
                    return Err(err);
                }
                warn!(block, volume = %vol.name, error = %err,
                    "failed to restore read-only after hash failure");
            }
        }
        folded?;

        let hash = acc.finalize();
        let hash_file = self.hash_file_path(block);
        {
            let _guard = self.hash_file_lock.lock();
            fs::write(&hash_file, hash_to_hex(&hash)).map_err(|source| {
                SnapshotError::CannotCreate {
                    path: hash_file.clone(),
                    source,
                }
            })?;
        }
        info!(block, is_checking, hash = %hash_to_hex(&hash), "computed snapshot hash");
        Ok(())
    }

    fn fold_volumes(&self, dir: &Path, acc: &mut Sha256Accumulator, is_checking: bool) -> Result<()> {
        for vol in &self.volumes {
            let clone = dir.join(&vol.name);
            match vol.kind {
                VolumeKind::Database => {
                    acc.write(&self.base_hasher.hash_base(&clone)?);
                }
                VolumeKind::FileStorage => {
                    hasher::fold_tree(&clone, acc, is_checking)?;
                }
            }
        }
        Ok(())
    }

    /// Whether the hash file for snapshot `block` exists.
    pub fn is_snapshot_hash_present(&self, block: u64) -> Result<bool> {
        if !self.has_snapshot(block) {
            return Err(SnapshotError::SnapshotAbsent(block));
        }
        let _guard = self.hash_file_lock.lock();
        Ok(self.hash_file_path(block).is_file())
    }

    /// Read the persisted hash of snapshot `block`.
    pub fn snapshot_hash(&self, block: u64) -> Result<Hash> {
        let hash_file = self.hash_file_path(block);
        if !self.is_snapshot_hash_present(block)? {
            return Err(SnapshotError::CannotRead {
                path: hash_file,
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "snapshot hash has not been computed",
                ),
            });
        }

        let _guard = self.hash_file_lock.lock();
        let text =
            fs::read_to_string(&hash_file).map_err(|source| SnapshotError::CannotRead {
                path: hash_file.clone(),
                source,
            })?;
        hash_from_hex(text.trim()).map_err(|e| SnapshotError::CannotRead {
            path: hash_file,
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()),
        })
    }
}
