//! Copy-on-write storage backends
//!
//! [`CowBackend`] is the storage-level interface the snapshot manager is
//! written against: atomic clones, full/incremental byte streams and the
//! read-only toggle, with no higher-level policy. Operations either
//! fully succeed or fail with [`SnapshotError::VolumeOperation`]; a
//! failed operation leaves filesystem state unspecified and must not be
//! retried blindly.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::debug;
use walkdir::WalkDir;

use crate::{Result, SnapshotError};

/// Storage-level copy-on-write primitives.
///
/// All operations are synchronous and blocking.
pub trait CowBackend: Send + Sync {
    /// Short backend name used in error messages and logs
    fn name(&self) -> &'static str;

    /// Whether `dir` sits on storage this backend can snapshot
    fn is_cow_capable(&self, dir: &Path) -> Result<bool>;

    /// Whether `path` is a volume managed by this backend
    fn is_volume(&self, path: &Path) -> Result<bool>;

    /// Create a new empty volume at `path`
    fn create_volume(&self, path: &Path) -> Result<()>;

    /// Create a recursive clone of `source` inside `dest_dir`, named
    /// after the source volume. The clone is read-only unless `writable`
    /// is set.
    fn snapshot(&self, source: &Path, dest_dir: &Path, writable: bool) -> Result<()>;

    /// Remove a volume or clone at `path`
    fn delete_volume(&self, path: &Path) -> Result<()>;

    /// Stream the content of `clone` into `out`, incremental against
    /// `parent` when given, a full stream otherwise
    fn send(&self, clone: &Path, parent: Option<&Path>, out: &mut dyn Write) -> Result<()>;

    /// Reconstruct the volume(s) embedded in `input` under `dest_dir`.
    /// A concatenation of several `send` streams re-imports every
    /// embedded volume.
    fn receive(&self, input: &mut dyn Read, dest_dir: &Path) -> Result<()>;

    /// Toggle the read-only property of a volume
    fn set_readonly(&self, volume: &Path, readonly: bool) -> Result<()>;
}

// ============================================================================
// Btrfs backend
// ============================================================================

/// Backend shelling out to the `btrfs` tool on a btrfs filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct BtrfsBackend;

impl BtrfsBackend {
    /// Create a btrfs backend
    pub fn new() -> Self {
        Self
    }

    fn render(args: &[&str]) -> String {
        let mut command = String::from("btrfs");
        for arg in args {
            command.push(' ');
            command.push_str(arg);
        }
        command
    }

    fn op_error(args: &[&str], message: impl Into<String>) -> SnapshotError {
        SnapshotError::VolumeOperation {
            command: Self::render(args),
            message: message.into(),
        }
    }

    fn run(args: &[&str]) -> Result<()> {
        let output = Command::new("btrfs")
            .args(args)
            .output()
            .map_err(|e| Self::op_error(args, e.to_string()))?;
        if !output.status.success() {
            return Err(Self::op_error(
                args,
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(())
    }

    fn succeeds(args: &[&str]) -> Result<bool> {
        let output = Command::new("btrfs")
            .args(args)
            .output()
            .map_err(|e| Self::op_error(args, e.to_string()))?;
        Ok(output.status.success())
    }
}

impl CowBackend for BtrfsBackend {
    fn name(&self) -> &'static str {
        "btrfs"
    }

    fn is_cow_capable(&self, dir: &Path) -> Result<bool> {
        Self::succeeds(&["filesystem", "df", &dir.to_string_lossy()])
    }

    fn is_volume(&self, path: &Path) -> Result<bool> {
        Self::succeeds(&["subvolume", "show", &path.to_string_lossy()])
    }

    fn create_volume(&self, path: &Path) -> Result<()> {
        Self::run(&["subvolume", "create", &path.to_string_lossy()])
    }

    fn snapshot(&self, source: &Path, dest_dir: &Path, writable: bool) -> Result<()> {
        let source = source.to_string_lossy();
        let dest = dest_dir.to_string_lossy();
        if writable {
            Self::run(&["subvolume", "snapshot", &source, &dest])
        } else {
            Self::run(&["subvolume", "snapshot", "-r", &source, &dest])
        }
    }

    fn delete_volume(&self, path: &Path) -> Result<()> {
        Self::run(&["subvolume", "delete", &path.to_string_lossy()])
    }

    fn send(&self, clone: &Path, parent: Option<&Path>, out: &mut dyn Write) -> Result<()> {
        let clone_str = clone.to_string_lossy().into_owned();
        let mut args: Vec<String> = vec!["send".into()];
        if let Some(parent) = parent {
            args.push("-p".into());
            args.push(parent.to_string_lossy().into_owned());
        }
        args.push(clone_str);
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();

        let mut child = Command::new("btrfs")
            .args(&arg_refs)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Self::op_error(&arg_refs, e.to_string()))?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| Self::op_error(&arg_refs, "no stdout pipe"))?;
        io::copy(&mut stdout, out).map_err(|e| Self::op_error(&arg_refs, e.to_string()))?;

        let output = child
            .wait_with_output()
            .map_err(|e| Self::op_error(&arg_refs, e.to_string()))?;
        if !output.status.success() {
            return Err(Self::op_error(
                &arg_refs,
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(())
    }

    fn receive(&self, input: &mut dyn Read, dest_dir: &Path) -> Result<()> {
        let dest = dest_dir.to_string_lossy();
        let args = ["receive", dest.as_ref()];

        let mut child = Command::new("btrfs")
            .args(args)
            .stdin(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Self::op_error(&args, e.to_string()))?;

        {
            let mut stdin = child
                .stdin
                .take()
                .ok_or_else(|| Self::op_error(&args, "no stdin pipe"))?;
            io::copy(input, &mut stdin).map_err(|e| Self::op_error(&args, e.to_string()))?;
        }

        let output = child
            .wait_with_output()
            .map_err(|e| Self::op_error(&args, e.to_string()))?;
        if !output.status.success() {
            return Err(Self::op_error(
                &args,
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(())
    }

    fn set_readonly(&self, volume: &Path, readonly: bool) -> Result<()> {
        let value = if readonly { "true" } else { "false" };
        Self::run(&["property", "set", &volume.to_string_lossy(), "ro", value])
    }
}

// ============================================================================
// Archive backend
// ============================================================================

/// Version tag of the archive stream format
const ARCHIVE_VERSION: u32 = 1;

/// One volume embedded in an archive diff stream.
#[derive(Debug, Serialize, Deserialize)]
struct ArchiveVolume {
    version: u32,
    name: String,
    entries: Vec<ArchiveEntry>,
}

/// One directory entry of an archived volume. Paths are relative to the
/// volume root, `/`-separated.
#[derive(Debug, Serialize, Deserialize)]
enum ArchiveEntry {
    Dir { path: String },
    File { path: String, contents: Vec<u8> },
}

/// Application-level fallback backend for filesystems without COW
/// support: plain recursive copies for clones and bincode-framed volume
/// streams for `send`/`receive`. Also the backend integration tests run
/// against.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArchiveBackend;

impl ArchiveBackend {
    /// Create an archive backend
    pub fn new() -> Self {
        Self
    }

    fn op_error(command: &str, message: impl Into<String>) -> SnapshotError {
        SnapshotError::VolumeOperation {
            command: format!("archive {command}"),
            message: message.into(),
        }
    }

    /// Relative path of `path` under `root`, `/`-separated.
    fn relative(root: &Path, path: &Path) -> Result<String> {
        let rel = path
            .strip_prefix(root)
            .map_err(|e| Self::op_error("send", e.to_string()))?;
        let parts: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Ok(parts.join("/"))
    }

    /// Collect the volume's entries in sorted traversal order.
    fn collect_entries(root: &Path, parent: Option<&Path>) -> Result<Vec<ArchiveEntry>> {
        let mut entries = Vec::new();
        let walker = WalkDir::new(root)
            .min_depth(1)
            .sort_by(|a, b| a.file_name().cmp(b.file_name()));
        for entry in walker {
            let entry = entry.map_err(|e| Self::op_error("send", e.to_string()))?;
            let rel = Self::relative(root, entry.path())?;
            if entry.file_type().is_dir() {
                if let Some(parent_root) = parent {
                    if parent_root.join(&rel).is_dir() {
                        continue;
                    }
                }
                entries.push(ArchiveEntry::Dir { path: rel });
            } else if entry.file_type().is_file() {
                let contents = fs::read(entry.path()).map_err(|source| {
                    SnapshotError::CannotRead {
                        path: entry.path().to_path_buf(),
                        source,
                    }
                })?;
                if let Some(parent_root) = parent {
                    if let Ok(previous) = fs::read(parent_root.join(&rel)) {
                        if previous == contents {
                            continue;
                        }
                    }
                }
                entries.push(ArchiveEntry::File {
                    path: rel,
                    contents,
                });
            }
        }
        Ok(entries)
    }

    fn apply_volume(volume: ArchiveVolume, dest_dir: &Path) -> Result<()> {
        if volume.version != ARCHIVE_VERSION {
            return Err(Self::op_error(
                "receive",
                format!("unsupported archive version {}", volume.version),
            ));
        }
        if volume.name.is_empty() || volume.name.contains(['/', '\\']) {
            return Err(Self::op_error(
                "receive",
                format!("illegal volume name {:?} in stream", volume.name),
            ));
        }

        let vol_root = dest_dir.join(&volume.name);
        fs::create_dir_all(&vol_root).map_err(|source| SnapshotError::CannotCreate {
            path: vol_root.clone(),
            source,
        })?;

        for entry in volume.entries {
            match entry {
                ArchiveEntry::Dir { path } => {
                    let dir = vol_root.join(&path);
                    fs::create_dir_all(&dir).map_err(|source| SnapshotError::CannotCreate {
                        path: dir.clone(),
                        source,
                    })?;
                }
                ArchiveEntry::File { path, contents } => {
                    let file = vol_root.join(&path);
                    if let Some(dir) = file.parent() {
                        fs::create_dir_all(dir).map_err(|source| SnapshotError::CannotCreate {
                            path: dir.to_path_buf(),
                            source,
                        })?;
                    }
                    fs::write(&file, contents).map_err(|source| SnapshotError::CannotWrite {
                        path: file.clone(),
                        source,
                    })?;
                }
            }
        }

        // btrfs receive produces a read-only subvolume; mirror that
        set_entries_readonly(&vol_root, true)?;
        debug!(volume = %vol_root.display(), "received archive volume");
        Ok(())
    }

    fn copy_tree(source: &Path, dest: &Path) -> Result<()> {
        fs::create_dir(dest).map_err(|source_err| SnapshotError::CannotCreate {
            path: dest.to_path_buf(),
            source: source_err,
        })?;
        for entry in WalkDir::new(source).min_depth(1) {
            let entry = entry.map_err(|e| Self::op_error("snapshot", e.to_string()))?;
            let rel = entry
                .path()
                .strip_prefix(source)
                .map_err(|e| Self::op_error("snapshot", e.to_string()))?;
            let target = dest.join(rel);
            if entry.file_type().is_dir() {
                fs::create_dir_all(&target).map_err(|source_err| SnapshotError::CannotCreate {
                    path: target.clone(),
                    source: source_err,
                })?;
            } else if entry.file_type().is_file() {
                fs::copy(entry.path(), &target).map_err(|source_err| {
                    SnapshotError::CannotWrite {
                        path: target.clone(),
                        source: source_err,
                    }
                })?;
            }
        }
        Ok(())
    }
}

/// Toggle the read-only permission bit on every entry of a tree,
/// including the root. The closest emulation of the volume-level `ro`
/// property a plain filesystem offers.
fn set_entries_readonly(root: &Path, readonly: bool) -> Result<()> {
    for entry in WalkDir::new(root) {
        let entry = entry.map_err(|e| SnapshotError::VolumeOperation {
            command: "archive property set".into(),
            message: e.to_string(),
        })?;
        let metadata = entry
            .metadata()
            .map_err(|e| SnapshotError::VolumeOperation {
                command: "archive property set".into(),
                message: e.to_string(),
            })?;
        let mut permissions = metadata.permissions();
        permissions.set_readonly(readonly);
        fs::set_permissions(entry.path(), permissions).map_err(|source| {
            SnapshotError::CannotWrite {
                path: entry.path().to_path_buf(),
                source,
            }
        })?;
    }
    Ok(())
}

impl CowBackend for ArchiveBackend {
    fn name(&self) -> &'static str {
        "archive"
    }

    fn is_cow_capable(&self, _dir: &Path) -> Result<bool> {
        Ok(true)
    }

    fn is_volume(&self, path: &Path) -> Result<bool> {
        Ok(path.is_dir())
    }

    fn create_volume(&self, path: &Path) -> Result<()> {
        fs::create_dir(path).map_err(|source| SnapshotError::CannotCreate {
            path: path.to_path_buf(),
            source,
        })
    }

    fn snapshot(&self, source: &Path, dest_dir: &Path, writable: bool) -> Result<()> {
        let name = source
            .file_name()
            .ok_or_else(|| SnapshotError::InvalidPath {
                path: source.to_path_buf(),
            })?;
        if !source.is_dir() {
            return Err(Self::op_error(
                "snapshot",
                format!("source volume {} does not exist", source.display()),
            ));
        }
        let clone = dest_dir.join(name);
        if clone.exists() {
            return Err(Self::op_error(
                "snapshot",
                format!("target {} already exists", clone.display()),
            ));
        }
        Self::copy_tree(source, &clone)?;
        set_entries_readonly(&clone, !writable)?;
        debug!(source = %source.display(), clone = %clone.display(), writable, "cloned volume");
        Ok(())
    }

    fn delete_volume(&self, path: &Path) -> Result<()> {
        if !path.is_dir() {
            return Err(Self::op_error(
                "delete",
                format!("{} is not a volume", path.display()),
            ));
        }
        set_entries_readonly(path, false)?;
        fs::remove_dir_all(path).map_err(|source| SnapshotError::CannotDelete {
            path: path.to_path_buf(),
            source,
        })
    }

    fn send(&self, clone: &Path, parent: Option<&Path>, out: &mut dyn Write) -> Result<()> {
        let name = clone
            .file_name()
            .ok_or_else(|| SnapshotError::InvalidPath {
                path: clone.to_path_buf(),
            })?
            .to_string_lossy()
            .into_owned();
        if !clone.is_dir() {
            return Err(Self::op_error(
                "send",
                format!("clone {} does not exist", clone.display()),
            ));
        }
        let volume = ArchiveVolume {
            version: ARCHIVE_VERSION,
            name,
            entries: Self::collect_entries(clone, parent)?,
        };
        bincode::serialize_into(out, &volume).map_err(|e| Self::op_error("send", e.to_string()))
    }

    fn receive(&self, input: &mut dyn Read, dest_dir: &Path) -> Result<()> {
        let mut received = 0usize;
        loop {
            match bincode::deserialize_from::<_, ArchiveVolume>(&mut *input) {
                Ok(volume) => {
                    Self::apply_volume(volume, dest_dir)?;
                    received += 1;
                }
                Err(err) => match *err {
                    bincode::ErrorKind::Io(ref io_err)
                        if io_err.kind() == io::ErrorKind::UnexpectedEof && received > 0 =>
                    {
                        break;
                    }
                    _ => return Err(Self::op_error("receive", err.to_string())),
                },
            }
        }
        Ok(())
    }

    fn set_readonly(&self, volume: &Path, readonly: bool) -> Result<()> {
        if !volume.is_dir() {
            return Err(Self::op_error(
                "property set",
                format!("{} is not a volume", volume.display()),
            ));
        }
        set_entries_readonly(volume, readonly)
    }
}
