//! Remote storage ports (driven/secondary ports)
//!
//! This module defines the interfaces for the encrypted remote replica: a
//! snapshot provider listing a remote folder tree with decrypted metadata,
//! and the file operations the task executor drives.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result`; conditions the executor must tell apart are
//!   reported by returning a [`RemoteError`] inside the `anyhow::Error`.
//! - Chunked transport, encryption and the wire format of the remote API
//!   are entirely the adapter's concern.

use std::path::Path;

use thiserror::Error;

use crate::domain::newtypes::Identity;
use crate::domain::snapshot::{FileEntry, ItemKind, TreeSnapshot};

// ============================================================================
// RemoteError
// ============================================================================

/// Distinguishable remote failures
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// The object does not exist (deleted, trashed or never created)
    #[error("Remote object not found: {0}")]
    NotFound(String),

    /// The operation was already performed
    #[error("Remote object already exists: {0}")]
    AlreadyExists(String),

    /// The account has no storage left
    #[error("Remote storage quota exceeded")]
    QuotaExceeded,

    /// The service could not be reached
    #[error("Remote service unavailable: {0}")]
    Unavailable(String),
}

// ============================================================================
// IRemoteSnapshotProvider trait
// ============================================================================

/// Port trait producing snapshots of a remote folder tree
#[async_trait::async_trait]
pub trait IRemoteSnapshotProvider: Send + Sync {
    /// Lists the tree below the remote folder `root`
    ///
    /// Remote folder entries carry their parent identity. Zero-byte files
    /// are never included.
    async fn get_remote_tree(&self, root: &Identity) -> anyhow::Result<TreeSnapshot>;

    /// Cheap check whether anything below `root` changed since the last
    /// listing
    async fn has_changed(&self, _root: &Identity) -> anyhow::Result<bool> {
        Ok(true)
    }

    /// Whether the remote service is reachable
    async fn is_online(&self) -> bool {
        true
    }
}

// ============================================================================
// IRemoteFileOps trait
// ============================================================================

/// Port trait for remote file operations used by the task executor
///
/// ## Implementation Notes
///
/// - `create_folder` is idempotent: a name collision under the same parent
///   returns the existing folder's identity.
/// - Missing objects must be reported as [`RemoteError::NotFound`] and a full
///   account as [`RemoteError::QuotaExceeded`].
#[async_trait::async_trait]
pub trait IRemoteFileOps: Send + Sync {
    /// Whether the object still exists (not trashed)
    async fn exists(&self, identity: &Identity, kind: ItemKind) -> anyhow::Result<bool>;

    /// Creates a folder named `name` inside `parent`
    async fn create_folder(&self, name: &str, parent: &Identity) -> anyhow::Result<Identity>;

    /// Uploads the local file at `source` into `parent`
    ///
    /// # Arguments
    /// * `source` - Absolute local path to read
    /// * `name` - File name on the remote side
    /// * `parent` - Identity of the destination folder
    /// * `local` - Local entry being uploaded (size, modification time)
    ///
    /// # Returns
    /// The remote entry created, with its identity and storage payload
    async fn upload_file(
        &self,
        source: &Path,
        name: &str,
        parent: &Identity,
        local: &FileEntry,
    ) -> anyhow::Result<FileEntry>;

    /// Fetches chunk `index` of a remote file's decrypted content
    async fn download_chunk(&self, file: &FileEntry, index: u32) -> anyhow::Result<Vec<u8>>;

    /// Renames an object in place
    async fn rename(&self, identity: &Identity, kind: ItemKind, new_name: &str)
        -> anyhow::Result<()>;

    /// Moves an object under `new_parent`, keeping its name
    async fn move_item(
        &self,
        identity: &Identity,
        kind: ItemKind,
        new_parent: &Identity,
    ) -> anyhow::Result<()>;

    /// Moves an object to the remote trash
    async fn trash(&self, identity: &Identity, kind: ItemKind) -> anyhow::Result<()>;

    /// Read/write probe of the remote root
    ///
    /// Returns [`RemoteError::NotFound`] if the root itself is gone.
    async fn smoke_test(&self, root: &Identity) -> anyhow::Result<()>;

    /// Whether the account can store more data
    async fn has_storage_left(&self) -> anyhow::Result<bool>;
}
