//! Local filesystem ports (driven/secondary ports)
//!
//! This module defines the two interfaces the sync pipeline consumes on the
//! local side: a snapshot provider that produces a [`TreeSnapshot`] of a sync
//! root, and a set of file operations used by the task executor.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because filesystem errors are adapter-specific.
//!   Adapters should keep the underlying `std::io::Error` in the chain so the
//!   executor can classify it (not found, permission denied, busy).
//! - All paths passed to [`ILocalFileOps`] are absolute.
//! - The snapshot provider exposes a dirty flag so an unchanged tree is not
//!   rescanned every cycle; a filesystem watcher sets it.

use std::path::Path;

use crate::domain::newtypes::Identity;
use crate::domain::snapshot::{ItemKind, TreeSnapshot};

// ============================================================================
// LocalStat / LocalScan
// ============================================================================

/// Metadata of a single local entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalStat {
    pub kind: ItemKind,
    /// Size in bytes (0 for directories)
    pub size: u64,
    /// Modification time in epoch milliseconds
    pub last_modified: i64,
    /// Stable identity (inode on unix)
    pub identity: Identity,
}

/// An entry that could not be read while scanning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedEntry {
    /// Path relative to the sync root
    pub path: String,
    pub reason: String,
}

/// Result of scanning a sync root
#[derive(Debug, Clone, Default)]
pub struct LocalScan {
    pub tree: TreeSnapshot,
    /// Entries left out of `tree` because they could not be read
    pub skipped: Vec<SkippedEntry>,
}

// ============================================================================
// ILocalSnapshotProvider trait
// ============================================================================

/// Port trait producing snapshots of a local sync root
///
/// ## Implementation Notes
///
/// - Zero-byte files are never included.
/// - Unreadable entries are reported in [`LocalScan::skipped`] instead of
///   failing the whole scan. Failing to read the root itself is an error.
#[async_trait::async_trait]
pub trait ILocalSnapshotProvider: Send + Sync {
    /// Scans `root` recursively
    ///
    /// # Arguments
    /// * `root` - Absolute path of the sync root
    async fn get_local_tree(&self, root: &Path) -> anyhow::Result<LocalScan>;

    /// Returns whether anything changed under `root` since the last call,
    /// and clears the flag
    ///
    /// Providers without change tracking always report `true`.
    fn take_dirty(&self, _root: &Path) -> bool {
        true
    }
}

// ============================================================================
// ILocalFileOps trait
// ============================================================================

/// Port trait for local file operations used by the task executor
///
/// ## Implementation Notes
///
/// - The executor probes presence with [`ILocalFileOps::stat`] before every
///   operation, so implementations need not be idempotent themselves.
/// - Downloads are written to a partial file with `append_chunk` and moved
///   into place with `finalize_file`.
#[async_trait::async_trait]
pub trait ILocalFileOps: Send + Sync {
    /// Reads metadata of `path`, returning `None` if it does not exist
    async fn stat(&self, path: &Path) -> anyhow::Result<Option<LocalStat>>;

    /// Renames or moves `from` to `to`, creating missing parents of `to`
    async fn relocate(&self, from: &Path, to: &Path) -> anyhow::Result<()>;

    /// Moves `path` into the trash directory of the sync root `root`
    async fn trash(&self, root: &Path, path: &Path) -> anyhow::Result<()>;

    /// Deletes `path` (recursively for directories) without keeping a copy
    async fn delete_permanent(&self, path: &Path) -> anyhow::Result<()>;

    /// Creates a directory and its parents, returning its metadata
    async fn create_dir(&self, path: &Path) -> anyhow::Result<LocalStat>;

    /// Appends `data` to the partial file at `partial`, creating it if needed
    async fn append_chunk(&self, partial: &Path, data: &[u8]) -> anyhow::Result<()>;

    /// Moves a completed partial file into place and stamps its mtime
    ///
    /// # Arguments
    /// * `partial` - Path the chunks were appended to
    /// * `target` - Final location of the file
    /// * `last_modified` - Modification time to set, in epoch milliseconds
    async fn finalize_file(
        &self,
        partial: &Path,
        target: &Path,
        last_modified: i64,
    ) -> anyhow::Result<LocalStat>;

    /// Read/write probe of the sync root
    async fn smoke_test(&self, root: &Path) -> anyhow::Result<()>;
}
