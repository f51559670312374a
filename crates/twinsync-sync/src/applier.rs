//! State Applier
//!
//! Folds completed tasks into a pair of snapshots so they can be saved as
//! the next cycle's baseline without rescanning.
//!
//! Each task is applied to both snapshots. The side the task changed is
//! updated through the item's identity (falling back to its path); the side
//! the change came from is updated through its own identity when the task
//! recorded one, and by path otherwise. Both updates are no-ops when the
//! snapshot already reflects the task, so the same code serves end-of-cycle
//! folding and crash replay.
//!
//! ## Ordering
//!
//! Remote renames, then remote moves (in journal order); local renames
//! innermost-first, then local moves outermost-first; then deletes, then
//! uploads and downloads.

use tracing::{debug, trace};

use twinsync_core::domain::relpath;
use twinsync_core::domain::{
    DoneTask, Identity, PathTask, RelocateTask, Side, Task, TaskItem, TreeSnapshot,
};

/// Applies `done` to `local` and `remote`
///
/// Returns the number of tasks applied.
pub fn apply_done_tasks(
    done: &[DoneTask],
    local: &mut TreeSnapshot,
    remote: &mut TreeSnapshot,
) -> usize {
    let mut ordered: Vec<&DoneTask> = done.iter().collect();
    // sort_by_key is stable: journal order survives within a group.
    ordered.sort_by_key(|d| apply_rank(&d.task));

    for entry in &ordered {
        let (target, source) = match entry.action().target() {
            Side::Local => (&mut *local, &mut *remote),
            Side::Remote => (&mut *remote, &mut *local),
        };
        match &entry.task {
            Task::RenameInRemote(t) | Task::RenameInLocal(t) => {
                apply_relocation(t, Relocation::Rename, target, source)
            }
            Task::MoveInRemote(t) | Task::MoveInLocal(t) => {
                apply_relocation(t, Relocation::Move, target, source)
            }
            Task::DeleteInRemote(t) | Task::DeleteInLocal(t) => apply_delete(t, target, source),
            Task::UploadToRemote(t) | Task::DownloadFromRemote(t) => {
                apply_transfer(t, entry.result.as_ref(), target, source)
            }
        }
    }

    debug!(applied = ordered.len(), "Done tasks folded into snapshots");
    ordered.len()
}

/// Sort key implementing the fold order
fn apply_rank(task: &Task) -> (u8, i64) {
    let depth = |t: &RelocateTask| relpath::depth(&t.from) as i64;
    match task {
        Task::RenameInRemote(_) => (0, 0),
        Task::MoveInRemote(_) => (1, 0),
        Task::RenameInLocal(t) => (2, -depth(t)),
        Task::MoveInLocal(t) => (3, depth(t)),
        Task::DeleteInRemote(_) | Task::DeleteInLocal(_) => (4, 0),
        Task::UploadToRemote(_) | Task::DownloadFromRemote(_) => (5, 0),
    }
}

#[derive(Debug, Clone, Copy)]
enum Relocation {
    Rename,
    Move,
}

impl Relocation {
    /// Where an item currently at `current` ends up
    fn destination(self, current: &str, task: &RelocateTask) -> String {
        match self {
            Relocation::Rename => {
                relpath::join(relpath::parent(current), relpath::basename(&task.to))
            }
            Relocation::Move => {
                relpath::join(relpath::parent(&task.to), relpath::basename(current))
            }
        }
    }
}

/// Current path of `identity`, or `fallback` if it is tracked there
fn resolve(tree: &TreeSnapshot, identity: Option<&Identity>, fallback: &str) -> Option<String> {
    if let Some(record) = identity.and_then(|id| tree.locate(id)) {
        return Some(record.path.clone());
    }
    tree.contains(fallback).then(|| fallback.to_string())
}

fn apply_relocation(
    task: &RelocateTask,
    kind: Relocation,
    target: &mut TreeSnapshot,
    source: &mut TreeSnapshot,
) {
    if let Some(current) = resolve(target, Some(task.item.identity()), &task.from) {
        let destination = kind.destination(&current, task);
        let moved = target.relocate(&current, &destination);
        trace!(from = %current, to = %destination, moved, "Relocation applied to target side");
    }
    if let Some(current) = resolve(source, task.origin.as_ref(), &task.from) {
        let destination = kind.destination(&current, task);
        source.relocate(&current, &destination);
    }
}

fn apply_delete(task: &PathTask, target: &mut TreeSnapshot, source: &mut TreeSnapshot) {
    match resolve(target, Some(task.item.identity()), &task.path) {
        Some(current) => {
            target.remove_subtree(&current);
        }
        None => trace!(path = %task.path, "Deleted item already absent from target side"),
    }
    source.remove_subtree(&task.path);
}

fn apply_transfer(
    task: &PathTask,
    result: Option<&TaskItem>,
    target: &mut TreeSnapshot,
    source: &mut TreeSnapshot,
) {
    if let Some(created) = result {
        insert_item(target, &task.path, created.clone());
    }
    // The source entry is refreshed too, or a replayed edit would still look
    // newer than the baseline on the next cycle.
    let at = source
        .locate(task.item.identity())
        .map(|record| record.path.clone())
        .unwrap_or_else(|| task.path.clone());
    insert_item(source, &at, task.item.clone());
}

fn insert_item(tree: &mut TreeSnapshot, path: &str, item: TaskItem) {
    match item {
        TaskItem::File(file) => tree.insert_file(path, file),
        TaskItem::Folder(folder) => tree.insert_folder(path, folder),
    }
}
