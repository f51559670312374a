//! Task Executor
//!
//! Runs the planner's action lists against the local and remote file
//! operation ports.
//!
//! ## Execution order
//!
//! Renames and moves run one at a time in [`ActionKind::EXECUTION_ORDER`]:
//! remote renames, local renames, remote moves, local moves. Remote deletes
//! and then local deletes run concurrently. Uploads and downloads create
//! their folders first, one at a time in depth order, then transfer files
//! concurrently.
//!
//! ## Per-task protocol
//!
//! 1. Presence check. A delete whose target is already gone, or a local
//!    relocation whose destination already holds the item, counts as done.
//!    Any other absence abandons the task without retry.
//! 2. The operation runs under [`run_with_retry`].
//! 3. An upload refused for lack of storage closes the [`QuotaGate`], parks
//!    until space returns, and tries again. After as many refusals as the
//!    retry policy allows tries, it is abandoned with a conflict issue.
//! 4. Success is journaled immediately and folded into the run's working
//!    snapshots, so later tasks resolve paths and parents created or moved
//!    earlier in the same cycle.
//!
//! ## Concurrency
//!
//! Three semaphores bound in-flight uploads, downloads, and all dispatched
//! tasks. They live in the executor, so the ceilings hold across runs.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use twinsync_core::config::ConcurrencyConfig;
use twinsync_core::domain::relpath;
use twinsync_core::domain::{
    ActionKind, DoneTask, FileEntry, FolderEntry, Identity, PathTask, RelocateTask, Side,
    SyncIssue, SyncLocation, Task, TaskItem, TaskLists, TreeSnapshot,
};
use twinsync_core::ports::{IEventSink, ILocalFileOps, IRemoteFileOps, SyncEvent, TaskPhase};

use crate::applier::apply_done_tasks;
use crate::filesystem::LocalFileSystemAdapter;
use crate::journal::DoneTaskJournal;
use crate::quota::QuotaGate;
use crate::retry::{run_with_retry, RetryOutcome, RetryPolicy, Sleeper};
use crate::store::IssueLog;

// ============================================================================
// Public types
// ============================================================================

/// What a run produced
#[derive(Debug, Default)]
pub struct ExecutionOutcome {
    /// Completed tasks, in completion order
    pub done: Vec<DoneTask>,
    /// Current snapshots can no longer be trusted
    pub resync: bool,
    /// Tasks given up on
    pub abandoned: usize,
    /// Issues raised while running
    pub issues: usize,
}

impl ExecutionOutcome {
    /// Number of done tasks of one action kind
    pub fn done_count(&self, action: ActionKind) -> usize {
        self.done.iter().filter(|d| d.action() == action).count()
    }
}

/// Collaborators shared by every run
#[derive(Clone)]
pub struct ExecutorDeps {
    pub local_ops: Arc<dyn ILocalFileOps>,
    pub remote_ops: Arc<dyn IRemoteFileOps>,
    pub events: Arc<dyn IEventSink>,
    pub issues: IssueLog,
    pub quota: Arc<QuotaGate>,
    pub sleeper: Arc<dyn Sleeper>,
}

/// Bounded-concurrency task runner
#[derive(Clone)]
pub struct TaskExecutor {
    shared: Arc<Shared>,
}

struct Shared {
    deps: ExecutorDeps,
    policy: RetryPolicy,
    uploads: Semaphore,
    downloads: Semaphore,
    total: Semaphore,
}

/// State of one location's run
struct Run {
    location: SyncLocation,
    remote_root: Identity,
    journal: Arc<DoneTaskJournal>,
    local: Mutex<TreeSnapshot>,
    remote: Mutex<TreeSnapshot>,
    done: Mutex<Vec<DoneTask>>,
    parents: Mutex<()>,
    resync: AtomicBool,
    abandoned: AtomicUsize,
    issues: AtomicUsize,
}

/// Result of a presence check
enum Presence {
    Proceed,
    AlreadyDone,
    Missing(String),
}

/// Resolved local relocation
struct LocalMove {
    current: String,
    destination: String,
}

impl TaskExecutor {
    pub fn new(deps: ExecutorDeps, limits: &ConcurrencyConfig, policy: RetryPolicy) -> Self {
        let total = limits
            .max_tasks
            .max(limits.max_uploads)
            .max(limits.max_downloads)
            .max(1);
        Self {
            shared: Arc::new(Shared {
                deps,
                policy,
                uploads: Semaphore::new(limits.max_uploads.max(1)),
                downloads: Semaphore::new(limits.max_downloads.max(1)),
                total: Semaphore::new(total),
            }),
        }
    }

    /// Runs every task of `tasks` for `location`
    ///
    /// `local` and `remote` are the snapshots the tasks were planned from.
    /// The location must be bound to a remote root.
    #[instrument(skip_all, fields(location = %location.id, tasks = tasks.len()))]
    pub async fn execute(
        &self,
        location: &SyncLocation,
        tasks: &TaskLists,
        local: TreeSnapshot,
        remote: TreeSnapshot,
        journal: Arc<DoneTaskJournal>,
    ) -> ExecutionOutcome {
        let Some(root) = location.remote.as_ref() else {
            warn!("Location has no remote binding, nothing executed");
            return ExecutionOutcome {
                abandoned: tasks.len(),
                ..Default::default()
            };
        };

        let run = Arc::new(Run {
            location: location.clone(),
            remote_root: root.identity.clone(),
            journal,
            local: Mutex::new(local),
            remote: Mutex::new(remote),
            done: Mutex::new(Vec::new()),
            parents: Mutex::new(()),
            resync: AtomicBool::new(false),
            abandoned: AtomicUsize::new(0),
            issues: AtomicUsize::new(0),
        });

        for action in ActionKind::EXECUTION_ORDER {
            let list = tasks.tasks(action);
            if list.is_empty() {
                continue;
            }
            debug!(%action, count = list.len(), "Executing task list");
            match action {
                _ if action.is_relocation() => {
                    for task in list {
                        self.run_task(&run, task).await;
                    }
                }
                ActionKind::DeleteInRemote | ActionKind::DeleteInLocal => {
                    self.run_concurrently(&run, list).await;
                }
                _ => {
                    let (folders, files): (Vec<Task>, Vec<Task>) =
                        list.into_iter().partition(|t| t.item().is_folder());
                    for task in folders {
                        self.run_task(&run, task).await;
                    }
                    self.run_concurrently(&run, files).await;
                }
            }
        }

        let outcome = ExecutionOutcome {
            done: std::mem::take(&mut *run.done.lock().await),
            resync: run.resync.load(Ordering::SeqCst),
            abandoned: run.abandoned.load(Ordering::SeqCst),
            issues: run.issues.load(Ordering::SeqCst),
        };
        info!(
            done = outcome.done.len(),
            abandoned = outcome.abandoned,
            resync = outcome.resync,
            "Task execution finished"
        );
        outcome
    }

    async fn run_concurrently(&self, run: &Arc<Run>, tasks: Vec<Task>) {
        let mut set = JoinSet::new();
        for task in tasks {
            let executor = self.clone();
            let run = run.clone();
            set.spawn(async move {
                let shared = &executor.shared;
                let lane = match task.action() {
                    ActionKind::UploadToRemote => Some(&shared.uploads),
                    ActionKind::DownloadFromRemote => Some(&shared.downloads),
                    _ => None,
                };
                let _lane_permit = match lane {
                    Some(sem) => match sem.acquire().await {
                        Ok(permit) => Some(permit),
                        Err(_) => return,
                    },
                    None => None,
                };
                let Ok(_permit) = shared.total.acquire().await else {
                    return;
                };
                executor.run_task(&run, task).await;
            });
        }
        while let Some(joined) = set.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Task worker panicked");
                run.abandoned.fetch_add(1, Ordering::SeqCst);
                run.resync.store(true, Ordering::SeqCst);
            }
        }
    }

    // ------------------------------------------------------------------
    // Per-task protocol
    // ------------------------------------------------------------------

    async fn run_task(&self, run: &Run, task: Task) {
        self.emit(run, &task, TaskPhase::Start, None);

        match self.presence(run, &task).await {
            Ok(Presence::Proceed) => {}
            Ok(Presence::AlreadyDone) => {
                debug!(action = %task.action(), path = task.path(), "Already satisfied");
                self.record_done(run, task, None).await;
                return;
            }
            Ok(Presence::Missing(reason)) => {
                self.abandon(run, &task, reason);
                return;
            }
            Err(e) => {
                self.abandon(run, &task, format!("presence check failed: {e:#}"));
                return;
            }
        }

        self.emit(run, &task, TaskPhase::Started, None);

        let deps = &self.shared.deps;
        let operation = format!("{} {}", task.action(), task.path());
        let quota_limit = self.shared.policy.max_tries.max(1);
        let mut quota_tries = 0;
        loop {
            if task.action() == ActionKind::UploadToRemote && deps.quota.is_full() {
                deps.quota
                    .wait_for_space(deps.remote_ops.as_ref(), deps.sleeper.as_ref())
                    .await;
            }
            let outcome = run_with_retry(self.shared.policy, deps.sleeper.as_ref(), &operation, || {
                self.perform(run, &task)
            })
            .await;

            match outcome {
                RetryOutcome::Done(result) => self.record_done(run, task, result).await,
                RetryOutcome::AlreadySatisfied => self.record_done(run, task, None).await,
                RetryOutcome::Vanished(err) => {
                    run.resync.store(true, Ordering::SeqCst);
                    self.abandon(run, &task, format!("{err:#}"));
                }
                RetryOutcome::QuotaExceeded(_)
                    if task.action() == ActionKind::UploadToRemote
                        && quota_tries + 1 < quota_limit =>
                {
                    quota_tries += 1;
                    debug!(path = task.path(), quota_tries, "Upload parked on full storage");
                    deps.quota.mark_full();
                    continue;
                }
                RetryOutcome::QuotaExceeded(error) | RetryOutcome::Exhausted { error, .. } => {
                    let message = format!("{error:#}");
                    self.raise(
                        run,
                        SyncIssue::conflict(task.action().target(), task.path(), message.clone())
                            .with_info(task.action().as_str()),
                    )
                    .await;
                    self.abandon(run, &task, message);
                }
            }
            return;
        }
    }

    async fn presence(&self, run: &Run, task: &Task) -> anyhow::Result<Presence> {
        let deps = &self.shared.deps;
        let item = task.item();
        let remote_exists = || deps.remote_ops.exists(item.identity(), item.kind());

        Ok(match task {
            Task::RenameInRemote(_) | Task::MoveInRemote(_) | Task::DownloadFromRemote(_) => {
                if remote_exists().await? {
                    Presence::Proceed
                } else {
                    Presence::Missing("no longer exists remotely".into())
                }
            }
            Task::DeleteInRemote(_) => {
                if remote_exists().await? {
                    Presence::Proceed
                } else {
                    Presence::AlreadyDone
                }
            }
            Task::RenameInLocal(t) | Task::MoveInLocal(t) => {
                let plan = self.resolve_local_move(run, task, t).await;
                let source = deps.local_ops.stat(&self.abs(run, &plan.current)).await?;
                let dest = deps.local_ops.stat(&self.abs(run, &plan.destination)).await?;
                match (source, dest) {
                    (None, Some(_)) => Presence::AlreadyDone,
                    (None, None) => Presence::Missing("no longer exists locally".into()),
                    (Some(_), Some(_)) if plan.current != plan.destination => {
                        let message = format!("{} already exists locally", plan.destination);
                        self.raise(
                            run,
                            SyncIssue::conflict(Side::Local, plan.destination.clone(), message.clone()),
                        )
                        .await;
                        Presence::Missing(message)
                    }
                    (Some(_), _) => Presence::Proceed,
                }
            }
            Task::DeleteInLocal(t) => {
                let current = self.local_path_of(run, item.identity(), &t.path).await;
                match deps.local_ops.stat(&self.abs(run, &current)).await? {
                    Some(_) => Presence::Proceed,
                    None => Presence::AlreadyDone,
                }
            }
            Task::UploadToRemote(t) => {
                let current = self.local_path_of(run, item.identity(), &t.path).await;
                match deps.local_ops.stat(&self.abs(run, &current)).await? {
                    Some(_) => Presence::Proceed,
                    None => Presence::Missing("no longer exists locally".into()),
                }
            }
        })
    }

    /// Performs the operation of `task` once
    async fn perform(&self, run: &Run, task: &Task) -> anyhow::Result<Option<TaskItem>> {
        let deps = &self.shared.deps;
        match task {
            Task::RenameInRemote(t) => {
                let item = &t.item;
                deps.remote_ops
                    .rename(item.identity(), item.kind(), relpath::basename(&t.to))
                    .await?;
                Ok(None)
            }
            Task::MoveInRemote(t) => {
                let parent = self.ensure_remote_folder(run, relpath::parent(&t.to)).await?;
                let item = &t.item;
                deps.remote_ops
                    .move_item(item.identity(), item.kind(), &parent)
                    .await?;
                Ok(None)
            }
            Task::RenameInLocal(t) | Task::MoveInLocal(t) => {
                let plan = self.resolve_local_move(run, task, t).await;
                deps.local_ops
                    .relocate(&self.abs(run, &plan.current), &self.abs(run, &plan.destination))
                    .await?;
                Ok(None)
            }
            Task::DeleteInRemote(t) => {
                deps.remote_ops
                    .trash(t.item.identity(), t.item.kind())
                    .await?;
                Ok(None)
            }
            Task::DeleteInLocal(t) => {
                let current = self.local_path_of(run, t.item.identity(), &t.path).await;
                deps.local_ops
                    .trash(&run.location.local, &self.abs(run, &current))
                    .await?;
                Ok(None)
            }
            Task::UploadToRemote(t) => self.upload(run, t).await.map(Some),
            Task::DownloadFromRemote(t) => self.download(run, t).await.map(Some),
        }
    }

    async fn upload(&self, run: &Run, task: &PathTask) -> anyhow::Result<TaskItem> {
        let deps = &self.shared.deps;
        match &task.item {
            TaskItem::Folder(_) => {
                let parent = self.ensure_remote_folder(run, relpath::parent(&task.path)).await?;
                let name = relpath::basename(&task.path);
                let identity = deps.remote_ops.create_folder(name, &parent).await?;
                Ok(TaskItem::Folder(FolderEntry {
                    name: name.to_string(),
                    identity,
                    parent: Some(parent),
                }))
            }
            TaskItem::File(file) => {
                let parent = self.ensure_remote_folder(run, relpath::parent(&task.path)).await?;
                let current = self.local_path_of(run, &file.identity, &task.path).await;
                let created = deps
                    .remote_ops
                    .upload_file(
                        &self.abs(run, &current),
                        relpath::basename(&task.path),
                        &parent,
                        file,
                    )
                    .await?;
                Ok(TaskItem::File(created))
            }
        }
    }

    async fn download(&self, run: &Run, task: &PathTask) -> anyhow::Result<TaskItem> {
        let deps = &self.shared.deps;
        let target = self.abs(run, &task.path);
        match &task.item {
            TaskItem::Folder(_) => {
                let stat = deps.local_ops.create_dir(&target).await?;
                Ok(TaskItem::Folder(FolderEntry {
                    name: relpath::basename(&task.path).to_string(),
                    identity: stat.identity,
                    parent: None,
                }))
            }
            TaskItem::File(file) => {
                let partial = LocalFileSystemAdapter::partial_path(&target);
                if deps.local_ops.stat(&partial).await?.is_some() {
                    deps.local_ops.delete_permanent(&partial).await?;
                }
                let chunks = file.remote.as_ref().map_or(1, |p| p.chunks.max(1));
                for index in 0..chunks {
                    let data = deps.remote_ops.download_chunk(file, index).await?;
                    deps.local_ops.append_chunk(&partial, &data).await?;
                }
                let stat = deps
                    .local_ops
                    .finalize_file(&partial, &target, file.last_modified)
                    .await?;
                Ok(TaskItem::File(FileEntry {
                    name: relpath::basename(&task.path).to_string(),
                    size: stat.size,
                    last_modified: stat.last_modified,
                    identity: stat.identity,
                    remote: None,
                }))
            }
        }
    }

    // ------------------------------------------------------------------
    // Path resolution
    // ------------------------------------------------------------------

    fn abs(&self, run: &Run, rel: &str) -> PathBuf {
        run.location.local.join(rel)
    }

    /// Current local path of an item, following relocations done this run
    async fn local_path_of(&self, run: &Run, identity: &Identity, fallback: &str) -> String {
        let local = run.local.lock().await;
        match local.locate(identity) {
            Some(record) => record.path.clone(),
            None => fallback.to_string(),
        }
    }

    async fn resolve_local_move(&self, run: &Run, task: &Task, t: &RelocateTask) -> LocalMove {
        let current = self.local_path_of(run, t.item.identity(), &t.from).await;
        let destination = match task {
            Task::RenameInLocal(_) => {
                relpath::join(relpath::parent(&current), relpath::basename(&t.to))
            }
            _ => relpath::join(relpath::parent(&t.to), relpath::basename(&current)),
        };
        LocalMove {
            current,
            destination,
        }
    }

    /// Identity of the remote folder at `path`, creating it and any missing
    /// ancestors
    async fn ensure_remote_folder(&self, run: &Run, path: &str) -> anyhow::Result<Identity> {
        if path.is_empty() {
            return Ok(run.remote_root.clone());
        }
        let _guard = run.parents.lock().await;

        let mut missing: Vec<&str> = Vec::new();
        let mut parent = run.remote_root.clone();
        {
            let remote = run.remote.lock().await;
            let mut cursor = path;
            loop {
                if let Some(folder) = remote.folders.get(cursor) {
                    parent = folder.identity.clone();
                    break;
                }
                missing.push(cursor);
                cursor = relpath::parent(cursor);
                if cursor.is_empty() {
                    break;
                }
            }
        }

        for folder_path in missing.into_iter().rev() {
            let name = relpath::basename(folder_path);
            let identity = self
                .shared
                .deps
                .remote_ops
                .create_folder(name, &parent)
                .await?;
            debug!(path = folder_path, %identity, "Remote folder created");
            let created = FolderEntry {
                name: name.to_string(),
                identity: identity.clone(),
                parent: Some(parent.clone()),
            };
            let local_folder = run.local.lock().await.folders.get(folder_path).cloned();
            match local_folder {
                Some(local) => {
                    let done = DoneTask::new(
                        run.location.id,
                        Task::UploadToRemote(PathTask::new(folder_path, TaskItem::Folder(local))),
                        Some(TaskItem::Folder(created)),
                    );
                    self.persist_done(run, done).await;
                }
                None => run.remote.lock().await.insert_folder(folder_path, created),
            }
            parent = identity;
        }
        Ok(parent)
    }

    // ------------------------------------------------------------------
    // Bookkeeping
    // ------------------------------------------------------------------

    async fn record_done(&self, run: &Run, task: Task, result: Option<TaskItem>) {
        self.emit(run, &task, TaskPhase::Done, None);
        let done = DoneTask::new(run.location.id, task, result);
        self.persist_done(run, done).await;
    }

    /// Journals `done` and folds it into the working snapshots
    async fn persist_done(&self, run: &Run, done: DoneTask) {
        if let Err(e) = run.journal.append(&done).await {
            error!(error = %e, action = %done.action(), "Failed to journal done task");
        }
        {
            let mut local = run.local.lock().await;
            let mut remote = run.remote.lock().await;
            apply_done_tasks(std::slice::from_ref(&done), &mut local, &mut remote);
        }
        run.done.lock().await.push(done);
    }

    fn abandon(&self, run: &Run, task: &Task, reason: String) {
        warn!(action = %task.action(), path = task.path(), reason = %reason, "Task abandoned");
        run.abandoned.fetch_add(1, Ordering::SeqCst);
        self.emit(run, task, TaskPhase::Err, Some(reason));
    }

    async fn raise(&self, run: &Run, issue: SyncIssue) {
        let issue = issue.for_location(run.location.id);
        run.issues.fetch_add(1, Ordering::SeqCst);
        self.shared.deps.events.emit(SyncEvent::Issue(issue.clone()));
        if let Err(e) = self.shared.deps.issues.add(issue).await {
            error!(error = %e, "Failed to record sync issue");
        }
    }

    fn emit(&self, run: &Run, task: &Task, phase: TaskPhase, error: Option<String>) {
        self.shared.deps.events.emit(SyncEvent::Task {
            location: run.location.id,
            task: task.id(),
            action: task.action(),
            path: task.path().to_string(),
            phase,
            error,
        });
    }
}
