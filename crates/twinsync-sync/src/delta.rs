//! Delta Engine
//!
//! Compares the previous and current [`TreeSnapshot`] of one side and
//! classifies every path seen in either of them.
//!
//! ## Algorithm
//!
//! 1. Path pass: files are `NEW`, `UNCHANGED`, `NEWER`, `OLDER` or
//!    `DELETED` by presence and modification time; folders only by presence.
//! 2. Identity pass: an identity present in both snapshots, with the same
//!    kind but a different path, was renamed and/or moved. Both endpoints are
//!    overwritten with the relocation kind, unless the destination path was
//!    already occupied in the previous snapshot, in which case both ends are
//!    `UNCHANGED` and the relocation is dropped.
//! 3. Pruning: `UNCHANGED` entries below a relocated folder's source or
//!    destination are removed; they only moved along with their parent.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use tracing::debug;

use twinsync_core::domain::relpath;
use twinsync_core::domain::{
    Delta, DeltaEntry, DeltaKind, FileEntry, ItemKind, Side, TreeSnapshot,
};

/// Computes the delta between two snapshots of the same side
///
/// The result is a pure function of its inputs: calling it twice on the
/// same pair yields identical maps.
pub fn compute_delta(previous: &TreeSnapshot, current: &TreeSnapshot, side: Side) -> Delta {
    let mut delta = Delta {
        files: classify_files(&previous.files, &current.files),
        folders: classify_folders(previous, current),
    };

    let relocated_folders = reconcile_identities(previous, current, &mut delta);
    prune_relocated_descendants(&mut delta, &relocated_folders);

    debug!(
        %side,
        files = delta.files.len(),
        folders = delta.folders.len(),
        relocated_folders = relocated_folders.len(),
        "Delta computed"
    );
    delta
}

fn compare_mtime(previous: &FileEntry, current: &FileEntry) -> DeltaKind {
    match previous.last_modified.cmp(&current.last_modified) {
        Ordering::Equal => DeltaKind::Unchanged,
        Ordering::Less => DeltaKind::Newer,
        Ordering::Greater => DeltaKind::Older,
    }
}

fn classify_files(
    previous: &BTreeMap<String, FileEntry>,
    current: &BTreeMap<String, FileEntry>,
) -> BTreeMap<String, DeltaEntry> {
    let mut out = BTreeMap::new();
    for (path, entry) in current {
        let kind = match previous.get(path) {
            None => DeltaKind::New,
            Some(before) => compare_mtime(before, entry),
        };
        out.insert(path.clone(), DeltaEntry::plain(kind));
    }
    for path in previous.keys() {
        if !current.contains_key(path) {
            out.insert(path.clone(), DeltaEntry::plain(DeltaKind::Deleted));
        }
    }
    out
}

fn classify_folders(
    previous: &TreeSnapshot,
    current: &TreeSnapshot,
) -> BTreeMap<String, DeltaEntry> {
    let mut out = BTreeMap::new();
    for path in current.folders.keys() {
        let kind = if previous.folders.contains_key(path) {
            DeltaKind::Unchanged
        } else {
            DeltaKind::New
        };
        out.insert(path.clone(), DeltaEntry::plain(kind));
    }
    for path in previous.folders.keys() {
        if !current.folders.contains_key(path) {
            out.insert(path.clone(), DeltaEntry::plain(DeltaKind::Deleted));
        }
    }
    out
}

/// Rename/move kind from the two independent booleans
fn relocation_kind(renamed: bool, moved: bool) -> DeltaKind {
    match (renamed, moved) {
        (true, true) => DeltaKind::RenamedMoved,
        (false, true) => DeltaKind::Moved,
        (true, false) => DeltaKind::Renamed,
        (false, false) => DeltaKind::Unchanged,
    }
}

/// Runs the identity pass, returning `(from, to)` of every relocated folder
fn reconcile_identities(
    previous: &TreeSnapshot,
    current: &TreeSnapshot,
    delta: &mut Delta,
) -> Vec<(String, String)> {
    let mut relocated_folders = Vec::new();

    for (identity, now) in &current.identities {
        let Some(before) = previous.identities.get(identity) else {
            continue;
        };
        if before.kind != now.kind || before.path == now.path {
            continue;
        }
        let from = before.path.as_str();
        let to = now.path.as_str();

        let renamed = relpath::basename(from) != relpath::basename(to);
        let moved = previous.parent_identity(from) != current.parent_identity(to);
        let kind = relocation_kind(renamed, moved);

        let map = match now.kind {
            ItemKind::File => &mut delta.files,
            ItemKind::Folder => &mut delta.folders,
        };

        let destination_existed = match now.kind {
            ItemKind::File => previous.files.contains_key(to),
            ItemKind::Folder => previous.folders.contains_key(to),
        };
        if destination_existed {
            // The target path was reused, not vacated: keep what is there.
            debug!(from, to, "Relocation onto an existing path treated as unchanged");
            map.insert(from.to_string(), DeltaEntry::plain(DeltaKind::Unchanged));
            map.insert(to.to_string(), DeltaEntry::plain(DeltaKind::Unchanged));
            continue;
        }

        if kind.is_relocation() {
            let entry = DeltaEntry::relocation(kind, from, to);
            map.insert(from.to_string(), entry.clone());
            map.insert(to.to_string(), entry);
            if now.kind == ItemKind::Folder {
                relocated_folders.push((from.to_string(), to.to_string()));
            }
            continue;
        }

        // Same name and same parent identity: carried along by a relocated
        // ancestor. Content edits made at the new path still count.
        let to_kind = match now.kind {
            ItemKind::Folder => DeltaKind::Unchanged,
            ItemKind::File => match (previous.files.get(from), current.files.get(to)) {
                (Some(before), Some(after)) => compare_mtime(before, after),
                _ => DeltaKind::Unchanged,
            },
        };
        map.insert(from.to_string(), DeltaEntry::plain(DeltaKind::Unchanged));
        map.insert(to.to_string(), DeltaEntry::plain(to_kind));
    }

    relocated_folders
}

fn prune_relocated_descendants(delta: &mut Delta, relocated: &[(String, String)]) {
    if relocated.is_empty() {
        return;
    }
    let under_relocation = |path: &str| {
        relocated.iter().any(|(from, to)| {
            relpath::is_descendant(path, from) || relpath::is_descendant(path, to)
        })
    };
    delta
        .files
        .retain(|path, entry| entry.kind != DeltaKind::Unchanged || !under_relocation(path));
    delta
        .folders
        .retain(|path, entry| entry.kind != DeltaKind::Unchanged || !under_relocation(path));
}
