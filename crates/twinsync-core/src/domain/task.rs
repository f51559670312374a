//! Planned and completed units of work
//!
//! The planner emits one [`Task`] per operation, grouped by action kind in
//! [`TaskLists`]. Each successfully executed task is recorded as a
//! [`DoneTask`] in the journal and later folded into the saved snapshots.
//!
//! The `item` carried by a task is always the entry the operation acts on:
//! the remote entry for remote renames/moves/deletes and downloads, the
//! local entry for local renames/moves/deletes and uploads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::delta::Side;
use super::newtypes::{Identity, LocationId, TaskId};
use super::relpath;
use super::snapshot::{FileEntry, FolderEntry, ItemKind};

/// The eight kinds of planned work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActionKind {
    UploadToRemote,
    DownloadFromRemote,
    RenameInRemote,
    RenameInLocal,
    MoveInRemote,
    MoveInLocal,
    DeleteInRemote,
    DeleteInLocal,
}

impl ActionKind {
    /// All kinds, in executor order
    pub const EXECUTION_ORDER: [ActionKind; 8] = [
        ActionKind::RenameInRemote,
        ActionKind::RenameInLocal,
        ActionKind::MoveInRemote,
        ActionKind::MoveInLocal,
        ActionKind::DeleteInRemote,
        ActionKind::DeleteInLocal,
        ActionKind::UploadToRemote,
        ActionKind::DownloadFromRemote,
    ];

    /// The side whose state this action changes
    pub fn target(self) -> Side {
        match self {
            ActionKind::UploadToRemote
            | ActionKind::RenameInRemote
            | ActionKind::MoveInRemote
            | ActionKind::DeleteInRemote => Side::Remote,
            ActionKind::DownloadFromRemote
            | ActionKind::RenameInLocal
            | ActionKind::MoveInLocal
            | ActionKind::DeleteInLocal => Side::Local,
        }
    }

    /// Returns true for rename and move actions
    pub fn is_relocation(self) -> bool {
        matches!(
            self,
            ActionKind::RenameInRemote
                | ActionKind::RenameInLocal
                | ActionKind::MoveInRemote
                | ActionKind::MoveInLocal
        )
    }

    /// Wire name used in events and logs
    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::UploadToRemote => "uploadToRemote",
            ActionKind::DownloadFromRemote => "downloadFromRemote",
            ActionKind::RenameInRemote => "renameInRemote",
            ActionKind::RenameInLocal => "renameInLocal",
            ActionKind::MoveInRemote => "moveInRemote",
            ActionKind::MoveInLocal => "moveInLocal",
            ActionKind::DeleteInRemote => "deleteInRemote",
            ActionKind::DeleteInLocal => "deleteInLocal",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The snapshot entry a task acts on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TaskItem {
    File(FileEntry),
    Folder(FolderEntry),
}

impl TaskItem {
    pub fn kind(&self) -> ItemKind {
        match self {
            TaskItem::File(_) => ItemKind::File,
            TaskItem::Folder(_) => ItemKind::Folder,
        }
    }

    pub fn identity(&self) -> &Identity {
        match self {
            TaskItem::File(f) => &f.identity,
            TaskItem::Folder(f) => &f.identity,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            TaskItem::File(f) => &f.name,
            TaskItem::Folder(f) => &f.name,
        }
    }

    pub fn is_folder(&self) -> bool {
        matches!(self, TaskItem::Folder(_))
    }
}

/// Work addressed by a single path (transfers and deletes)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathTask {
    #[serde(rename = "uuid")]
    pub id: TaskId,
    pub path: String,
    pub item: TaskItem,
}

impl PathTask {
    pub fn new(path: impl Into<String>, item: TaskItem) -> Self {
        Self {
            id: TaskId::new(),
            path: path.into(),
            item,
        }
    }
}

/// Work that moves an item from one path to another
///
/// A rename keeps the parent and takes the basename of `to`; a move keeps
/// the name and takes the parent of `to`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelocateTask {
    #[serde(rename = "uuid")]
    pub id: TaskId,
    pub from: String,
    pub to: String,
    pub item: TaskItem,
    /// Identity of the item on the side where the change was observed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<Identity>,
}

impl RelocateTask {
    pub fn new(from: impl Into<String>, to: impl Into<String>, item: TaskItem) -> Self {
        Self {
            id: TaskId::new(),
            from: from.into(),
            to: to.into(),
            item,
            origin: None,
        }
    }

    /// Records the identity on the side the change came from
    pub fn with_origin(mut self, origin: Identity) -> Self {
        self.origin = Some(origin);
        self
    }
}

/// One planned operation, tagged by action kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Task {
    UploadToRemote(PathTask),
    DownloadFromRemote(PathTask),
    RenameInRemote(RelocateTask),
    RenameInLocal(RelocateTask),
    MoveInRemote(RelocateTask),
    MoveInLocal(RelocateTask),
    DeleteInRemote(PathTask),
    DeleteInLocal(PathTask),
}

impl Task {
    pub fn action(&self) -> ActionKind {
        match self {
            Task::UploadToRemote(_) => ActionKind::UploadToRemote,
            Task::DownloadFromRemote(_) => ActionKind::DownloadFromRemote,
            Task::RenameInRemote(_) => ActionKind::RenameInRemote,
            Task::RenameInLocal(_) => ActionKind::RenameInLocal,
            Task::MoveInRemote(_) => ActionKind::MoveInRemote,
            Task::MoveInLocal(_) => ActionKind::MoveInLocal,
            Task::DeleteInRemote(_) => ActionKind::DeleteInRemote,
            Task::DeleteInLocal(_) => ActionKind::DeleteInLocal,
        }
    }

    pub fn id(&self) -> TaskId {
        match self {
            Task::UploadToRemote(t)
            | Task::DownloadFromRemote(t)
            | Task::DeleteInRemote(t)
            | Task::DeleteInLocal(t) => t.id,
            Task::RenameInRemote(t)
            | Task::RenameInLocal(t)
            | Task::MoveInRemote(t)
            | Task::MoveInLocal(t) => t.id,
        }
    }

    pub fn item(&self) -> &TaskItem {
        match self {
            Task::UploadToRemote(t)
            | Task::DownloadFromRemote(t)
            | Task::DeleteInRemote(t)
            | Task::DeleteInLocal(t) => &t.item,
            Task::RenameInRemote(t)
            | Task::RenameInLocal(t)
            | Task::MoveInRemote(t)
            | Task::MoveInLocal(t) => &t.item,
        }
    }

    /// Primary path: the destination for relocations
    pub fn path(&self) -> &str {
        match self {
            Task::UploadToRemote(t)
            | Task::DownloadFromRemote(t)
            | Task::DeleteInRemote(t)
            | Task::DeleteInLocal(t) => &t.path,
            Task::RenameInRemote(t)
            | Task::RenameInLocal(t)
            | Task::MoveInRemote(t)
            | Task::MoveInLocal(t) => &t.to,
        }
    }

    /// Rename/move endpoints, if this is a relocation
    pub fn relocation(&self) -> Option<&RelocateTask> {
        match self {
            Task::RenameInRemote(t)
            | Task::RenameInLocal(t)
            | Task::MoveInRemote(t)
            | Task::MoveInLocal(t) => Some(t),
            _ => None,
        }
    }
}

/// Planner output: one ordered list per action kind
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskLists {
    pub upload_to_remote: Vec<PathTask>,
    pub download_from_remote: Vec<PathTask>,
    pub rename_in_remote: Vec<RelocateTask>,
    pub rename_in_local: Vec<RelocateTask>,
    pub move_in_remote: Vec<RelocateTask>,
    pub move_in_local: Vec<RelocateTask>,
    pub delete_in_remote: Vec<PathTask>,
    pub delete_in_local: Vec<PathTask>,
}

impl TaskLists {
    /// Total number of planned tasks
    pub fn len(&self) -> usize {
        ActionKind::EXECUTION_ORDER
            .iter()
            .map(|a| self.count(*a))
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of tasks planned for one action kind
    pub fn count(&self, action: ActionKind) -> usize {
        match action {
            ActionKind::UploadToRemote => self.upload_to_remote.len(),
            ActionKind::DownloadFromRemote => self.download_from_remote.len(),
            ActionKind::RenameInRemote => self.rename_in_remote.len(),
            ActionKind::RenameInLocal => self.rename_in_local.len(),
            ActionKind::MoveInRemote => self.move_in_remote.len(),
            ActionKind::MoveInLocal => self.move_in_local.len(),
            ActionKind::DeleteInRemote => self.delete_in_remote.len(),
            ActionKind::DeleteInLocal => self.delete_in_local.len(),
        }
    }

    /// Empties the list for one action kind
    pub fn clear(&mut self, action: ActionKind) {
        match action {
            ActionKind::UploadToRemote => self.upload_to_remote.clear(),
            ActionKind::DownloadFromRemote => self.download_from_remote.clear(),
            ActionKind::RenameInRemote => self.rename_in_remote.clear(),
            ActionKind::RenameInLocal => self.rename_in_local.clear(),
            ActionKind::MoveInRemote => self.move_in_remote.clear(),
            ActionKind::MoveInLocal => self.move_in_local.clear(),
            ActionKind::DeleteInRemote => self.delete_in_remote.clear(),
            ActionKind::DeleteInLocal => self.delete_in_local.clear(),
        }
    }

    /// Tasks for one action kind, wrapped in [`Task`]
    pub fn tasks(&self, action: ActionKind) -> Vec<Task> {
        match action {
            ActionKind::UploadToRemote => wrap(&self.upload_to_remote, Task::UploadToRemote),
            ActionKind::DownloadFromRemote => {
                wrap(&self.download_from_remote, Task::DownloadFromRemote)
            }
            ActionKind::RenameInRemote => wrap(&self.rename_in_remote, Task::RenameInRemote),
            ActionKind::RenameInLocal => wrap(&self.rename_in_local, Task::RenameInLocal),
            ActionKind::MoveInRemote => wrap(&self.move_in_remote, Task::MoveInRemote),
            ActionKind::MoveInLocal => wrap(&self.move_in_local, Task::MoveInLocal),
            ActionKind::DeleteInRemote => wrap(&self.delete_in_remote, Task::DeleteInRemote),
            ActionKind::DeleteInLocal => wrap(&self.delete_in_local, Task::DeleteInLocal),
        }
    }

    /// Every task in executor order
    pub fn all_tasks(&self) -> Vec<Task> {
        ActionKind::EXECUTION_ORDER
            .iter()
            .flat_map(|a| self.tasks(*a))
            .collect()
    }

    /// Sorts every list by ascending path depth (parents first)
    ///
    /// Relocations sort by their source path. The sort is stable and ties
    /// are broken by path so the order is deterministic.
    pub fn sort_by_depth(&mut self) {
        for list in [
            &mut self.upload_to_remote,
            &mut self.download_from_remote,
            &mut self.delete_in_remote,
            &mut self.delete_in_local,
        ] {
            list.sort_by(|a, b| {
                relpath::depth(&a.path)
                    .cmp(&relpath::depth(&b.path))
                    .then_with(|| a.path.cmp(&b.path))
            });
        }
        for list in [
            &mut self.rename_in_remote,
            &mut self.rename_in_local,
            &mut self.move_in_remote,
            &mut self.move_in_local,
        ] {
            list.sort_by(|a, b| {
                relpath::depth(&a.from)
                    .cmp(&relpath::depth(&b.from))
                    .then_with(|| a.from.cmp(&b.from))
            });
        }
    }
}

fn wrap<T: Clone>(list: &[T], f: fn(T) -> Task) -> Vec<Task> {
    list.iter().cloned().map(f).collect()
}

/// Journal record of a successfully completed task
///
/// `result` holds the entry created on the target side by uploads and
/// downloads (assigned identity, storage location, timestamps).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DoneTask {
    pub location: LocationId,
    pub task: Task,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskItem>,
    pub completed_at: DateTime<Utc>,
}

impl DoneTask {
    pub fn new(location: LocationId, task: Task, result: Option<TaskItem>) -> Self {
        Self {
            location,
            task,
            result,
            completed_at: Utc::now(),
        }
    }

    pub fn action(&self) -> ActionKind {
        self.task.action()
    }
}
