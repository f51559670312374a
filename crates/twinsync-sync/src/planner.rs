//! Task Planner
//!
//! Turns the local and remote deltas of one location into eight action
//! lists. Each side is planned independently against the other side's
//! current snapshot:
//!
//! - a rename/move on one side is mirrored on the other, unless the other
//!   side reports the same transition or no longer has the source
//! - a deletion is mirrored unless the other side deleted or modified it
//! - new or newer content is transferred when the other side has nothing
//!   there or an older version (last-modified wins, ties are no-ops)
//!
//! Tasks touching an ignored or selectively excluded path are dropped and
//! reported as ignored. Lists disallowed by the sync mode are emptied, and
//! every list is sorted parents-first.

use std::collections::{BTreeSet, HashSet};

use tracing::{debug, trace};

use twinsync_core::domain::relpath;
use twinsync_core::domain::{
    ActionKind, Delta, DeltaKind, ItemKind, PathTask, RelocateTask, Side, SyncMode, TaskItem,
    TaskLists, TreeSnapshot,
};

use crate::ignore::PathFilter;

/// Everything the planner reads
pub struct PlanInput<'a> {
    pub mode: SyncMode,
    pub local_delta: &'a Delta,
    pub remote_delta: &'a Delta,
    /// Current local snapshot
    pub local: &'a TreeSnapshot,
    /// Current remote snapshot
    pub remote: &'a TreeSnapshot,
    pub filter: &'a PathFilter,
}

/// Planner output
#[derive(Debug, Clone, Default)]
pub struct Plan {
    pub tasks: TaskLists,
    /// Paths whose tasks were dropped by the filter
    pub ignored: Vec<String>,
}

/// Plans the work for one location
pub fn plan(input: &PlanInput<'_>) -> Plan {
    let mut planner = Planner {
        input,
        tasks: TaskLists::default(),
        ignored: BTreeSet::new(),
        seen: HashSet::new(),
    };

    for side in [Side::Local, Side::Remote] {
        planner.plan_folders(side);
        planner.plan_files(side);
    }

    let mut tasks = planner.tasks;
    drop_redundant_deletes(&mut tasks.delete_in_remote);
    drop_redundant_deletes(&mut tasks.delete_in_local);
    gate_by_mode(&mut tasks, input.mode);
    tasks.sort_by_depth();

    debug!(
        mode = %input.mode,
        tasks = tasks.len(),
        ignored = planner.ignored.len(),
        "Plan ready"
    );

    Plan {
        tasks,
        ignored: planner.ignored.into_iter().collect(),
    }
}

/// Whether a sync mode allows an action kind
pub fn is_allowed(mode: SyncMode, action: ActionKind) -> bool {
    use ActionKind::*;
    match mode {
        SyncMode::TwoWay => true,
        SyncMode::LocalToCloud => matches!(
            action,
            UploadToRemote | RenameInRemote | MoveInRemote | DeleteInRemote
        ),
        SyncMode::CloudToLocal => matches!(
            action,
            DownloadFromRemote | RenameInLocal | MoveInLocal | DeleteInLocal
        ),
        SyncMode::LocalBackup => matches!(action, UploadToRemote | RenameInRemote | MoveInRemote),
        SyncMode::CloudBackup => matches!(action, DownloadFromRemote | RenameInLocal | MoveInLocal),
    }
}

fn gate_by_mode(tasks: &mut TaskLists, mode: SyncMode) {
    for action in ActionKind::EXECUTION_ORDER {
        if !is_allowed(mode, action) && tasks.count(action) > 0 {
            trace!(%mode, %action, dropped = tasks.count(action), "List disallowed by sync mode");
            tasks.clear(action);
        }
    }
}

/// Removes deletes already covered by the delete of an ancestor folder
fn drop_redundant_deletes(list: &mut Vec<PathTask>) {
    let folders: HashSet<String> = list
        .iter()
        .filter(|t| t.item.is_folder())
        .map(|t| t.path.clone())
        .collect();
    list.retain(|t| !relpath::ancestors(&t.path).any(|a| folders.contains(a)));
}

fn transfer_action(source: Side) -> ActionKind {
    match source {
        Side::Local => ActionKind::UploadToRemote,
        Side::Remote => ActionKind::DownloadFromRemote,
    }
}

fn rename_action(target: Side) -> ActionKind {
    match target {
        Side::Local => ActionKind::RenameInLocal,
        Side::Remote => ActionKind::RenameInRemote,
    }
}

fn move_action(target: Side) -> ActionKind {
    match target {
        Side::Local => ActionKind::MoveInLocal,
        Side::Remote => ActionKind::MoveInRemote,
    }
}

fn delete_action(target: Side) -> ActionKind {
    match target {
        Side::Local => ActionKind::DeleteInLocal,
        Side::Remote => ActionKind::DeleteInRemote,
    }
}

fn item_at(tree: &TreeSnapshot, kind: ItemKind, path: &str) -> Option<TaskItem> {
    match kind {
        ItemKind::File => tree.files.get(path).cloned().map(TaskItem::File),
        ItemKind::Folder => tree.folders.get(path).cloned().map(TaskItem::Folder),
    }
}

struct View<'a> {
    delta: &'a Delta,
    tree: &'a TreeSnapshot,
}

struct Planner<'a> {
    input: &'a PlanInput<'a>,
    tasks: TaskLists,
    ignored: BTreeSet<String>,
    /// `(action, from, to)` already pushed; `to` is empty for path tasks
    seen: HashSet<(ActionKind, String, String)>,
}

impl<'a> Planner<'a> {
    fn view(&self, side: Side) -> View<'a> {
        match side {
            Side::Local => View {
                delta: self.input.local_delta,
                tree: self.input.local,
            },
            Side::Remote => View {
                delta: self.input.remote_delta,
                tree: self.input.remote,
            },
        }
    }

    fn authoritative(&self, side: Side) -> bool {
        match side {
            Side::Local => self.input.mode.local_authoritative(),
            Side::Remote => self.input.mode.remote_authoritative(),
        }
    }

    fn excluded(&mut self, path: &str, is_dir: bool) -> bool {
        if self.input.filter.is_excluded(path, is_dir) {
            self.ignored.insert(path.to_string());
            return true;
        }
        false
    }

    // ------------------------------------------------------------------
    // Folders
    // ------------------------------------------------------------------

    fn plan_folders(&mut self, source: Side) {
        let s = self.view(source);
        let o = self.view(source.other());

        for (path, entry) in &s.delta.folders {
            match entry.kind {
                kind if kind.is_relocation() => {
                    if let Some((from, to)) = entry.endpoints() {
                        if path == from {
                            self.mirror_relocation(source, ItemKind::Folder, from, to, kind);
                        }
                    }
                }
                DeltaKind::Deleted => self.mirror_folder_delete(source, path),
                DeltaKind::New => {
                    if !o.tree.folders.contains_key(path) {
                        if let Some(item) = item_at(s.tree, ItemKind::Folder, path) {
                            self.push_transfer(source, path, item);
                        }
                    }
                }
                _ => {}
            }
        }
    }

    fn mirror_folder_delete(&mut self, source: Side, path: &str) {
        let o = self.view(source.other());
        if o.delta.folder_kind(path) == Some(DeltaKind::Deleted) {
            return;
        }
        let Some(item) = item_at(o.tree, ItemKind::Folder, path) else {
            return;
        };
        if has_fresh_content_within(o.delta, path) {
            debug!(path, "Folder deleted on one side but modified on the other, keeping it");
            return;
        }
        self.push_delete(source.other(), path, item);
    }

    // ------------------------------------------------------------------
    // Files
    // ------------------------------------------------------------------

    fn plan_files(&mut self, source: Side) {
        let s = self.view(source);

        for (path, entry) in &s.delta.files {
            match entry.kind {
                kind if kind.is_relocation() => {
                    if let Some((from, to)) = entry.endpoints() {
                        if path == from {
                            self.mirror_relocation(source, ItemKind::File, from, to, kind);
                        }
                    }
                }
                DeltaKind::Deleted => self.mirror_file_delete(source, path),
                DeltaKind::New | DeltaKind::Newer => self.content_change(source, path),
                DeltaKind::Older if self.authoritative(source) => {
                    self.content_change(source, path)
                }
                _ => {}
            }
        }
    }

    fn mirror_file_delete(&mut self, source: Side, path: &str) {
        let o = self.view(source.other());
        match o.delta.file_kind(path) {
            Some(DeltaKind::Deleted) => return,
            Some(kind) if kind.is_fresh() => {
                debug!(path, "File deleted on one side but modified on the other, keeping it");
                return;
            }
            _ => {}
        }
        if let Some(item) = item_at(o.tree, ItemKind::File, path) {
            self.push_delete(source.other(), path, item);
        }
    }

    /// Transfers a new/newer file if the other side lacks it or is older
    fn content_change(&mut self, source: Side, path: &str) {
        let s = self.view(source);
        let o = self.view(source.other());
        let Some(mine) = s.tree.files.get(path) else {
            return;
        };
        let transfer = match o.tree.files.get(path) {
            None => true,
            Some(theirs) => {
                let their_kind = o.delta.file_kind(path).unwrap_or(DeltaKind::Unchanged);
                let catch_up = self.authoritative(source)
                    && matches!(their_kind, DeltaKind::Unchanged | DeltaKind::Older);
                catch_up || mine.last_modified > theirs.last_modified
            }
        };
        if transfer {
            self.push_transfer(source, path, TaskItem::File(mine.clone()));
        }
    }

    // ------------------------------------------------------------------
    // Relocations
    // ------------------------------------------------------------------

    fn mirror_relocation(
        &mut self,
        source: Side,
        kind: ItemKind,
        from: &str,
        to: &str,
        delta_kind: DeltaKind,
    ) {
        let s = self.view(source);
        let o = self.view(source.other());
        let target = source.other();

        let their_entry = match kind {
            ItemKind::File => o.delta.files.get(from),
            ItemKind::Folder => o.delta.folders.get(from),
        };
        if their_entry.and_then(|e| e.endpoints()) == Some((from, to)) {
            trace!(from, to, "Both sides report the same relocation");
            return;
        }

        let Some(item) = item_at(o.tree, kind, from) else {
            // Nothing to relocate over there: send the destination instead.
            self.transfer_subtree(source, to);
            return;
        };
        let origin = item_at(s.tree, kind, to).map(|i| i.identity().clone());

        let relocation = |from: &str, to: &str| {
            let task = RelocateTask::new(from, to, item.clone());
            match &origin {
                Some(id) => task.with_origin(id.clone()),
                None => task,
            }
        };
        match delta_kind {
            DeltaKind::Renamed => {
                self.push_relocation(rename_action(target), relocation(from, to));
            }
            DeltaKind::Moved => {
                self.push_relocation(move_action(target), relocation(from, to));
            }
            DeltaKind::RenamedMoved => {
                let renamed = relpath::join(relpath::parent(from), relpath::basename(to));
                self.push_relocation(rename_action(target), relocation(from, &renamed));
                self.push_relocation(move_action(target), relocation(&renamed, to));
            }
            _ => return,
        }

        // Relocated and edited in the same cycle.
        if let (Some(mine), TaskItem::File(theirs)) = (s.tree.files.get(to), &item) {
            if mine.last_modified > theirs.last_modified {
                self.push_transfer(source, to, TaskItem::File(mine.clone()));
            }
        }
    }

    /// Transfers `root` and everything below it the other side lacks
    fn transfer_subtree(&mut self, source: Side, root: &str) {
        let s = self.view(source);
        let o = self.view(source.other());

        let start = format!("{root}/");
        let end = format!("{root}0");

        let mut folders: Vec<(String, TaskItem)> = Vec::new();
        if let Some(entry) = s.tree.folders.get(root) {
            folders.push((root.to_string(), TaskItem::Folder(entry.clone())));
        }
        folders.extend(
            s.tree
                .folders
                .range(start.clone()..end.clone())
                .map(|(p, e)| (p.clone(), TaskItem::Folder(e.clone()))),
        );
        for (path, item) in folders {
            if !o.tree.folders.contains_key(&path) {
                self.push_transfer(source, &path, item);
            }
        }

        let mut files: Vec<(String, TaskItem)> = Vec::new();
        if let Some(entry) = s.tree.files.get(root) {
            files.push((root.to_string(), TaskItem::File(entry.clone())));
        }
        files.extend(
            s.tree
                .files
                .range(start..end)
                .map(|(p, e)| (p.clone(), TaskItem::File(e.clone()))),
        );
        for (path, item) in files {
            let newer = match (&item, o.tree.files.get(&path)) {
                (_, None) => true,
                (TaskItem::File(mine), Some(theirs)) => mine.last_modified > theirs.last_modified,
                _ => false,
            };
            if newer {
                self.push_transfer(source, &path, item);
            }
        }
    }

    // ------------------------------------------------------------------
    // Emitters
    // ------------------------------------------------------------------

    /// Destination path on the target side, following folders the target
    /// side relocated this cycle
    fn target_path(&self, target: Side, path: &str) -> String {
        let t = self.view(target);
        let best = t
            .delta
            .folders
            .values()
            .filter_map(|e| e.endpoints())
            .filter(|(from, _)| relpath::is_descendant(path, from))
            .max_by_key(|(from, _)| from.len());
        match best.and_then(|(from, to)| relpath::rebase(path, from, to)) {
            Some(rebased) => rebased,
            None => path.to_string(),
        }
    }

    fn push_transfer(&mut self, source: Side, path: &str, item: TaskItem) {
        let action = transfer_action(source);
        let path = self.target_path(source.other(), path);
        if !self.seen.insert((action, path.clone(), String::new())) {
            return;
        }
        if self.excluded(&path, item.is_folder()) {
            return;
        }
        let task = PathTask::new(path, item);
        match action {
            ActionKind::UploadToRemote => self.tasks.upload_to_remote.push(task),
            _ => self.tasks.download_from_remote.push(task),
        }
    }

    fn push_delete(&mut self, target: Side, path: &str, item: TaskItem) {
        let action = delete_action(target);
        if !self.seen.insert((action, path.to_string(), String::new())) {
            return;
        }
        if self.excluded(path, item.is_folder()) {
            return;
        }
        let task = PathTask::new(path, item);
        match target {
            Side::Remote => self.tasks.delete_in_remote.push(task),
            Side::Local => self.tasks.delete_in_local.push(task),
        }
    }

    fn push_relocation(&mut self, action: ActionKind, task: RelocateTask) {
        if !self
            .seen
            .insert((action, task.from.clone(), task.to.clone()))
        {
            return;
        }
        let is_dir = task.item.is_folder();
        let from_excluded = self.excluded(&task.from, is_dir);
        let to_excluded = self.excluded(&task.to, is_dir);
        if from_excluded || to_excluded {
            return;
        }
        match action {
            ActionKind::RenameInRemote => self.tasks.rename_in_remote.push(task),
            ActionKind::RenameInLocal => self.tasks.rename_in_local.push(task),
            ActionKind::MoveInRemote => self.tasks.move_in_remote.push(task),
            _ => self.tasks.move_in_local.push(task),
        }
    }
}

/// Whether a side added or changed anything at or below `path`
fn has_fresh_content_within(delta: &Delta, path: &str) -> bool {
    let fresh = |p: &str, kind: DeltaKind, to: Option<&str>| {
        let landed_inside = kind.is_relocation() && to.is_some_and(|t| relpath::is_descendant(t, path));
        relpath::is_descendant(p, path) && (kind.is_fresh() || landed_inside)
    };
    delta
        .files
        .iter()
        .chain(delta.folders.iter())
        .any(|(p, e)| fresh(p, e.kind, e.to.as_deref()))
}
