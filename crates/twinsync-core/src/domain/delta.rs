//! Per-path change classification between two snapshots of one side

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// What happened to a path between the previous and current snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeltaKind {
    New,
    Unchanged,
    /// Modification time moved forward
    Newer,
    /// Modification time moved backward
    Older,
    Deleted,
    Renamed,
    Moved,
    RenamedMoved,
}

impl DeltaKind {
    /// Returns true for the three rename/move kinds
    pub fn is_relocation(self) -> bool {
        matches!(
            self,
            DeltaKind::Renamed | DeltaKind::Moved | DeltaKind::RenamedMoved
        )
    }

    /// Returns true for kinds that carry new content (`NEW`, `NEWER`)
    pub fn is_fresh(self) -> bool {
        matches!(self, DeltaKind::New | DeltaKind::Newer)
    }
}

impl std::fmt::Display for DeltaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DeltaKind::New => "NEW",
            DeltaKind::Unchanged => "UNCHANGED",
            DeltaKind::Newer => "NEWER",
            DeltaKind::Older => "OLDER",
            DeltaKind::Deleted => "DELETED",
            DeltaKind::Renamed => "RENAMED",
            DeltaKind::Moved => "MOVED",
            DeltaKind::RenamedMoved => "RENAMED_MOVED",
        };
        write!(f, "{s}")
    }
}

/// Classification of a single path
///
/// `from`/`to` are only set for rename/move kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaEntry {
    #[serde(rename = "type")]
    pub kind: DeltaKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
}

impl DeltaEntry {
    /// Entry without rename/move endpoints
    pub fn plain(kind: DeltaKind) -> Self {
        Self {
            kind,
            from: None,
            to: None,
        }
    }

    /// Rename/move entry with both endpoints
    pub fn relocation(kind: DeltaKind, from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            kind,
            from: Some(from.into()),
            to: Some(to.into()),
        }
    }

    /// Both endpoints, when this is a rename/move
    pub fn endpoints(&self) -> Option<(&str, &str)> {
        match (&self.from, &self.to) {
            (Some(from), Some(to)) if self.kind.is_relocation() => Some((from, to)),
            _ => None,
        }
    }
}

/// Side of a sync location
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Local,
    Remote,
}

impl Side {
    /// The opposite side
    pub fn other(self) -> Self {
        match self {
            Side::Local => Side::Remote,
            Side::Remote => Side::Local,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Local => write!(f, "local"),
            Side::Remote => write!(f, "remote"),
        }
    }
}

/// File and folder deltas for one side
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delta {
    pub files: BTreeMap<String, DeltaEntry>,
    pub folders: BTreeMap<String, DeltaEntry>,
}

impl Delta {
    /// Kind recorded for a file path
    pub fn file_kind(&self, path: &str) -> Option<DeltaKind> {
        self.files.get(path).map(|e| e.kind)
    }

    /// Kind recorded for a folder path
    pub fn folder_kind(&self, path: &str) -> Option<DeltaKind> {
        self.folders.get(path).map(|e| e.kind)
    }

    /// Number of entries that are not `UNCHANGED`
    pub fn changes(&self) -> usize {
        self.files
            .values()
            .chain(self.folders.values())
            .filter(|e| e.kind != DeltaKind::Unchanged)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_serializes_like_wire_names() {
        let json = serde_json::to_string(&DeltaKind::RenamedMoved).unwrap();
        assert_eq!(json, "\"RENAMED_MOVED\"");
        assert_eq!(DeltaKind::RenamedMoved.to_string(), "RENAMED_MOVED");
    }

    #[test]
    fn test_endpoints_only_for_relocations() {
        let entry = DeltaEntry::relocation(DeltaKind::Renamed, "a", "b");
        assert_eq!(entry.endpoints(), Some(("a", "b")));
        assert_eq!(DeltaEntry::plain(DeltaKind::New).endpoints(), None);
    }

    #[test]
    fn test_changes_skip_unchanged_entries() {
        let mut delta = Delta::default();
        delta
            .files
            .insert("a".into(), DeltaEntry::plain(DeltaKind::Unchanged));
        assert_eq!(delta.changes(), 0);
        delta
            .folders
            .insert("b".into(), DeltaEntry::plain(DeltaKind::New));
        delta
            .files
            .insert("b/c".into(), DeltaEntry::plain(DeltaKind::Newer));
        assert_eq!(delta.changes(), 2);
    }
}
