//! Tree snapshots
//!
//! A [`TreeSnapshot`] is a point-in-time map of one side (local or remote)
//! of a sync location: files and folders keyed by relative path, plus an
//! index from stable identity to path.
//!
//! ## Invariant
//!
//! Every entry in `files` or `folders` has exactly one entry in
//! `identities`, and every identity points back at an existing entry.
//! All mutating methods preserve this; [`TreeSnapshot::check_invariant`]
//! verifies it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::errors::DomainError;
use super::newtypes::Identity;
use super::relpath;

/// Whether an entry is a file or a folder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    File,
    Folder,
}

impl std::fmt::Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ItemKind::File => write!(f, "file"),
            ItemKind::Folder => write!(f, "folder"),
        }
    }
}

/// Transport details of a remote file
///
/// Opaque to the pipeline: produced by the remote snapshot provider or an
/// upload, and handed back to the remote collaborator for downloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemotePayload {
    pub region: String,
    pub bucket: String,
    /// Number of storage chunks the content is split into
    pub chunks: u32,
    /// Key for the decrypted metadata record
    pub metadata_key: String,
}

/// A tracked file
///
/// Zero-byte files are never tracked; providers drop them before
/// building a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub name: String,
    /// Size in bytes
    pub size: u64,
    /// Modification time in epoch milliseconds
    pub last_modified: i64,
    pub identity: Identity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<RemotePayload>,
}

/// A tracked folder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderEntry {
    pub name: String,
    pub identity: Identity,
    /// Owning folder identity (remote snapshots only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<Identity>,
}

/// Where an identity currently lives in a snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub kind: ItemKind,
    pub path: String,
}

/// Point-in-time tree of one side of a sync location
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeSnapshot {
    pub files: BTreeMap<String, FileEntry>,
    pub folders: BTreeMap<String, FolderEntry>,
    #[serde(rename = "identityIndex")]
    pub identities: BTreeMap<Identity, IdentityRecord>,
}

impl TreeSnapshot {
    /// Creates an empty snapshot
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of files and folders
    pub fn len(&self) -> usize {
        self.files.len() + self.folders.len()
    }

    /// Returns true if the snapshot tracks nothing
    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.folders.is_empty()
    }

    /// Returns true if a file or folder exists at `path`
    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path) || self.folders.contains_key(path)
    }

    /// Kind of the entry at `path`, if any
    pub fn kind_at(&self, path: &str) -> Option<ItemKind> {
        if self.files.contains_key(path) {
            Some(ItemKind::File)
        } else if self.folders.contains_key(path) {
            Some(ItemKind::Folder)
        } else {
            None
        }
    }

    /// Looks up where an identity currently lives
    pub fn locate(&self, identity: &Identity) -> Option<&IdentityRecord> {
        self.identities.get(identity)
    }

    /// Identity of the folder containing `path`
    ///
    /// Root-level entries have no parent identity.
    pub fn parent_identity(&self, path: &str) -> Option<&Identity> {
        let parent = relpath::parent(path);
        if parent.is_empty() {
            return None;
        }
        self.folders.get(parent).map(|f| &f.identity)
    }

    /// Inserts or replaces a file, keeping the identity index consistent
    pub fn insert_file(&mut self, path: impl Into<String>, entry: FileEntry) {
        let path = path.into();
        self.evict_identity_elsewhere(&entry.identity, &path);
        self.remove_entry(&path);
        self.identities.insert(
            entry.identity.clone(),
            IdentityRecord {
                kind: ItemKind::File,
                path: path.clone(),
            },
        );
        self.files.insert(path, entry);
    }

    /// Inserts or replaces a folder, keeping the identity index consistent
    pub fn insert_folder(&mut self, path: impl Into<String>, entry: FolderEntry) {
        let path = path.into();
        self.evict_identity_elsewhere(&entry.identity, &path);
        self.remove_entry(&path);
        self.identities.insert(
            entry.identity.clone(),
            IdentityRecord {
                kind: ItemKind::Folder,
                path: path.clone(),
            },
        );
        self.folders.insert(path, entry);
    }

    /// Removes the single entry at `path` (no descendants)
    ///
    /// Returns true if something was removed.
    pub fn remove_entry(&mut self, path: &str) -> bool {
        if let Some(file) = self.files.remove(path) {
            self.identities.remove(&file.identity);
            return true;
        }
        if let Some(folder) = self.folders.remove(path) {
            self.identities.remove(&folder.identity);
            return true;
        }
        false
    }

    /// Removes `path` and every entry strictly below it
    ///
    /// Returns the number of entries removed.
    pub fn remove_subtree(&mut self, path: &str) -> usize {
        let mut removed = 0;
        for key in subtree_keys(&self.files, path) {
            if self.remove_entry(&key) {
                removed += 1;
            }
        }
        for key in subtree_keys(&self.folders, path) {
            if self.remove_entry(&key) {
                removed += 1;
            }
        }
        removed
    }

    /// Moves `from` and its whole subtree to `to`
    ///
    /// Every path equal to `from` or prefixed by `from + "/"` is rewritten
    /// with the `to` prefix across files, folders and the identity index.
    /// Entries already occupying a destination path are replaced. The entry
    /// at `from` itself takes the basename of `to` as its name.
    ///
    /// Returns the number of entries moved.
    pub fn relocate(&mut self, from: &str, to: &str) -> usize {
        if from == to {
            return 0;
        }

        let files: Vec<(String, FileEntry)> = subtree_keys(&self.files, from)
            .into_iter()
            .filter_map(|key| self.files.remove(&key).map(|entry| (key, entry)))
            .collect();
        let folders: Vec<(String, FolderEntry)> = subtree_keys(&self.folders, from)
            .into_iter()
            .filter_map(|key| self.folders.remove(&key).map(|entry| (key, entry)))
            .collect();

        let moved = files.len() + folders.len();

        for (old, mut entry) in files {
            let Some(new_path) = relpath::rebase(&old, from, to) else {
                continue;
            };
            if old == from {
                entry.name = relpath::basename(to).to_string();
            }
            self.identities.remove(&entry.identity);
            self.insert_file(new_path, entry);
        }
        for (old, mut entry) in folders {
            let Some(new_path) = relpath::rebase(&old, from, to) else {
                continue;
            };
            if old == from {
                entry.name = relpath::basename(to).to_string();
            }
            self.identities.remove(&entry.identity);
            self.insert_folder(new_path, entry);
        }

        moved
    }

    /// Verifies the identity index invariant
    ///
    /// # Errors
    /// Returns [`DomainError::ValidationFailed`] describing the first
    /// inconsistency found.
    pub fn check_invariant(&self) -> Result<(), DomainError> {
        if self.identities.len() != self.len() {
            return Err(DomainError::ValidationFailed(format!(
                "identity index has {} entries for {} items",
                self.identities.len(),
                self.len()
            )));
        }
        for (identity, record) in &self.identities {
            let matches = match record.kind {
                ItemKind::File => self
                    .files
                    .get(&record.path)
                    .is_some_and(|f| &f.identity == identity),
                ItemKind::Folder => self
                    .folders
                    .get(&record.path)
                    .is_some_and(|f| &f.identity == identity),
            };
            if !matches {
                return Err(DomainError::ValidationFailed(format!(
                    "identity {identity} points at {} which does not carry it",
                    record.path
                )));
            }
        }
        Ok(())
    }

    /// Drops a stale entry that still carries `identity` under another path
    fn evict_identity_elsewhere(&mut self, identity: &Identity, path: &str) {
        let stale = match self.identities.get(identity) {
            Some(record) if record.path != path => record.path.clone(),
            _ => return,
        };
        self.remove_entry(&stale);
    }
}

/// Keys equal to `root` or below it, in ascending order
fn subtree_keys<V>(map: &BTreeMap<String, V>, root: &str) -> Vec<String> {
    let mut keys = Vec::new();
    if map.contains_key(root) {
        keys.push(root.to_string());
    }
    // '0' sorts right after '/', so this range holds exactly the "root/" prefix.
    let start = format!("{root}/");
    let end = format!("{root}0");
    keys.extend(map.range(start..end).map(|(k, _)| k.clone()));
    keys
}
