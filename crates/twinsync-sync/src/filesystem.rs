//! Local filesystem adapter (secondary/driven adapter)
//!
//! Implements [`ILocalSnapshotProvider`] and [`ILocalFileOps`] on top of
//! `tokio::fs`.
//!
//! ## Design Decisions
//!
//! - **Identity**: the inode number, so a rename or move keeps its identity.
//! - **Zero-byte files** are left out of snapshots.
//! - **Trash**: deletions driven by the remote side move the item into
//!   `<root>/.twinsync.trash.local` instead of unlinking it.
//! - **Downloads** are appended to `<target>.twinsync.part` and renamed into
//!   place once complete, with the remote mtime stamped through `filetime`.
//! - **Change tracking**: [`DirtyFlags`] set by the watcher let an untouched
//!   root skip rescanning.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use filetime::FileTime;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument, warn};

use twinsync_core::domain::relpath;
use twinsync_core::domain::{FileEntry, FolderEntry, Identity, ItemKind};
use twinsync_core::ports::{ILocalFileOps, ILocalSnapshotProvider, LocalScan, LocalStat, SkippedEntry};

use crate::watcher::DirtyFlags;

/// Folder collecting locally trashed items, directly under the sync root
pub const TRASH_DIR_NAME: &str = ".twinsync.trash.local";

/// Suffix of in-progress downloads
pub const PARTIAL_SUFFIX: &str = ".twinsync.part";

/// Name of the smoke-test probe file
const PROBE_NAME: &str = ".twinsync.probe";

// ============================================================================
// LocalFileSystemAdapter struct
// ============================================================================

/// Adapter that bridges the local ports to the real filesystem
///
/// Configuration (sync roots) lives at a higher layer; every call carries
/// its own absolute paths.
#[derive(Debug, Clone, Default)]
pub struct LocalFileSystemAdapter {
    dirty: Option<DirtyFlags>,
}

impl LocalFileSystemAdapter {
    /// Adapter without a watcher: every root is rescanned every cycle
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adapter sharing `dirty` with a [`LocalWatcher`](crate::watcher::LocalWatcher)
    #[must_use]
    pub fn with_dirty_flags(dirty: DirtyFlags) -> Self {
        Self { dirty: Some(dirty) }
    }

    pub fn dirty_flags(&self) -> Option<&DirtyFlags> {
        self.dirty.as_ref()
    }

    /// Partial file a download of `target` is written to
    pub fn partial_path(target: &Path) -> PathBuf {
        let mut p = target.as_os_str().to_owned();
        p.push(PARTIAL_SUFFIX);
        PathBuf::from(p)
    }
}

// ============================================================================
// Metadata helpers
// ============================================================================

#[cfg(unix)]
fn identity_of(metadata: &std::fs::Metadata, _path: &Path) -> Identity {
    use std::os::unix::fs::MetadataExt;
    Identity::inode(metadata.ino())
}

#[cfg(not(unix))]
fn identity_of(_metadata: &std::fs::Metadata, path: &Path) -> Identity {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    path.hash(&mut hasher);
    Identity::inode(hasher.finish())
}

fn mtime_millis(metadata: &std::fs::Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn stat_of(metadata: &std::fs::Metadata, path: &Path) -> LocalStat {
    let kind = if metadata.is_dir() {
        ItemKind::Folder
    } else {
        ItemKind::File
    };
    LocalStat {
        kind,
        size: if metadata.is_dir() { 0 } else { metadata.len() },
        last_modified: mtime_millis(metadata),
        identity: identity_of(metadata, path),
    }
}

fn file_time_from_millis(millis: i64) -> FileTime {
    let secs = millis.div_euclid(1000);
    let nanos = (millis.rem_euclid(1000) * 1_000_000) as u32;
    FileTime::from_unix_time(secs, nanos)
}

/// Entries the scanner never descends into or records
fn is_internal_name(name: &str) -> bool {
    name == TRASH_DIR_NAME || name == PROBE_NAME || name.ends_with(PARTIAL_SUFFIX)
}

// ============================================================================
// ILocalSnapshotProvider implementation
// ============================================================================

#[async_trait::async_trait]
impl ILocalSnapshotProvider for LocalFileSystemAdapter {
    #[instrument(skip(self), fields(root = %root.display()))]
    async fn get_local_tree(&self, root: &Path) -> anyhow::Result<LocalScan> {
        let mut scan = LocalScan::default();
        let mut pending: Vec<PathBuf> = vec![root.to_path_buf()];

        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if dir == root => return Err(e.into()),
                Err(e) => {
                    let path = relpath::from_fs(root, &dir).unwrap_or_default();
                    warn!(path = %path, error = %e, "Skipping unreadable directory");
                    scan.skipped.push(SkippedEntry {
                        path,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            while let Some(entry) = entries.next_entry().await? {
                let full = entry.path();
                let name = entry.file_name().to_string_lossy().into_owned();
                if is_internal_name(&name) {
                    continue;
                }
                let rel = match relpath::from_fs(root, &full) {
                    Ok(rel) => rel,
                    Err(e) => {
                        warn!(path = %full.display(), error = %e, "Skipping unrepresentable path");
                        continue;
                    }
                };
                let metadata = match tokio::fs::symlink_metadata(&full).await {
                    Ok(m) => m,
                    Err(e) => {
                        warn!(path = %rel, error = %e, "Skipping unreadable entry");
                        scan.skipped.push(SkippedEntry {
                            path: rel,
                            reason: e.to_string(),
                        });
                        continue;
                    }
                };

                if metadata.file_type().is_symlink() {
                    debug!(path = %rel, "Skipping symlink");
                } else if metadata.is_dir() {
                    scan.tree.insert_folder(
                        rel,
                        FolderEntry {
                            name,
                            identity: identity_of(&metadata, &full),
                            parent: None,
                        },
                    );
                    pending.push(full);
                } else if metadata.len() > 0 {
                    scan.tree.insert_file(
                        rel,
                        FileEntry {
                            name,
                            size: metadata.len(),
                            last_modified: mtime_millis(&metadata),
                            identity: identity_of(&metadata, &full),
                            remote: None,
                        },
                    );
                }
            }
        }

        debug!(
            files = scan.tree.files.len(),
            folders = scan.tree.folders.len(),
            skipped = scan.skipped.len(),
            "Local tree scanned"
        );
        Ok(scan)
    }

    fn take_dirty(&self, root: &Path) -> bool {
        self.dirty.as_ref().map_or(true, |flags| flags.take(root))
    }
}

// ============================================================================
// ILocalFileOps implementation
// ============================================================================

#[async_trait::async_trait]
impl ILocalFileOps for LocalFileSystemAdapter {
    #[instrument(skip(self), fields(path = %path.display()))]
    async fn stat(&self, path: &Path) -> anyhow::Result<Option<LocalStat>> {
        match tokio::fs::symlink_metadata(path).await {
            Ok(metadata) => Ok(Some(stat_of(&metadata, path))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self), fields(from = %from.display(), to = %to.display()))]
    async fn relocate(&self, from: &Path, to: &Path) -> anyhow::Result<()> {
        if let Some(parent) = to.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(from, to).await?;
        debug!("relocated");
        Ok(())
    }

    #[instrument(skip(self), fields(root = %root.display(), path = %path.display()))]
    async fn trash(&self, root: &Path, path: &Path) -> anyhow::Result<()> {
        let trash_dir = root.join(TRASH_DIR_NAME);
        tokio::fs::create_dir_all(&trash_dir).await?;

        let name = path
            .file_name()
            .ok_or_else(|| anyhow::anyhow!("cannot trash {}", path.display()))?;
        let mut destination = trash_dir.join(name);
        if tokio::fs::symlink_metadata(&destination).await.is_ok() {
            let mut unique = name.to_owned();
            unique.push(format!(".{}", chrono::Utc::now().timestamp_millis()));
            destination = trash_dir.join(unique);
        }

        tokio::fs::rename(path, &destination).await?;
        debug!(destination = %destination.display(), "moved to trash");
        Ok(())
    }

    #[instrument(skip(self), fields(path = %path.display()))]
    async fn delete_permanent(&self, path: &Path) -> anyhow::Result<()> {
        let metadata = tokio::fs::symlink_metadata(path).await?;
        if metadata.is_dir() {
            tokio::fs::remove_dir_all(path).await?;
        } else {
            tokio::fs::remove_file(path).await?;
        }
        debug!("deleted");
        Ok(())
    }

    #[instrument(skip(self), fields(path = %path.display()))]
    async fn create_dir(&self, path: &Path) -> anyhow::Result<LocalStat> {
        tokio::fs::create_dir_all(path).await?;
        let metadata = tokio::fs::symlink_metadata(path).await?;
        Ok(stat_of(&metadata, path))
    }

    #[instrument(skip(self, data), fields(partial = %partial.display(), bytes = data.len()))]
    async fn append_chunk(&self, partial: &Path, data: &[u8]) -> anyhow::Result<()> {
        if let Some(parent) = partial.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(partial)
            .await?;
        file.write_all(data).await?;
        file.flush().await?;
        Ok(())
    }

    #[instrument(skip(self), fields(partial = %partial.display(), target = %target.display()))]
    async fn finalize_file(
        &self,
        partial: &Path,
        target: &Path,
        last_modified: i64,
    ) -> anyhow::Result<LocalStat> {
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(partial, target).await?;

        let target_owned = target.to_path_buf();
        let mtime = file_time_from_millis(last_modified);
        tokio::task::spawn_blocking(move || filetime::set_file_mtime(&target_owned, mtime))
            .await??;

        let metadata = tokio::fs::symlink_metadata(target).await?;
        debug!(size = metadata.len(), "download finalized");
        Ok(stat_of(&metadata, target))
    }

    #[instrument(skip(self), fields(root = %root.display()))]
    async fn smoke_test(&self, root: &Path) -> anyhow::Result<()> {
        let probe = root.join(PROBE_NAME);
        let payload = format!("twinsync {}", std::process::id());
        tokio::fs::write(&probe, payload.as_bytes()).await?;
        let read_back = tokio::fs::read(&probe).await;
        tokio::fs::remove_file(&probe).await?;
        if read_back? != payload.as_bytes() {
            anyhow::bail!("probe content mismatch under {}", root.display());
        }
        Ok(())
    }
}

// ============================================================================
// Unit tests
// ============================================================================
