//! Sync loop orchestrator
//!
//! The [`SyncEngine`] drives one cycle over every configured location:
//!
//! ```text
//! run_cycle
//!   └─ for each location (sequentially)
//!        guards ─→ smoke tests ─→ watch
//!        replay journal into saved trees
//!        getTrees ─→ getDeltas ─→ consumeDeltas ─→ consumeTasks ─→ cleanup
//! ```
//!
//! ## Cycle exclusivity
//!
//! A single mutex guards the whole cycle. A trigger that finds it held gets
//! [`CycleOutcome::Busy`] back without touching any provider. The cadence
//! loop in [`SyncEngine::run`] re-arms its timer only after a cycle returns.
//!
//! ## Persistence
//!
//! The saved trees and the done-task journal of a location are written only
//! here, under the cycle mutex. Leftover journal records are folded into the
//! saved trees before they serve as the delta baseline. After execution the
//! new baseline is the current snapshot pair when every task succeeded, or
//! the saved pair otherwise, with every done task folded in.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use twinsync_core::config::Config;
use twinsync_core::domain::relpath;
use twinsync_core::domain::{
    ActionKind, LocationId, Side, SyncIssue, SyncLocation, TreeSnapshot,
};
use twinsync_core::ports::{
    CyclePhase, IConfigStore, IEventSink, ILocalFileOps, ILocalSnapshotProvider,
    IRemoteFileOps, IRemoteSnapshotProvider, RemoteError, SyncEvent,
};

use crate::applier::apply_done_tasks;
use crate::delta::compute_delta;
use crate::executor::{ExecutionOutcome, ExecutorDeps, TaskExecutor};
use crate::journal::DoneTaskJournal;
use crate::planner::{plan, PlanInput};
use crate::quota::QuotaGate;
use crate::retry::{RetryPolicy, Sleeper};
use crate::store::{IssueLog, SettingsStore};
use crate::tree_store::{SavedTrees, TreeStore};
use crate::watcher::LocalWatcher;
use crate::SyncError;

// ============================================================================
// Cycle results
// ============================================================================

/// Why a location was left alone this cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Paused,
    GloballyPaused,
    CriticalIssue,
    Unbound,
    Offline,
    SmokeTestFailed,
    RemoteRootGone,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SkipReason::Paused => "location paused",
            SkipReason::GloballyPaused => "sync paused",
            SkipReason::CriticalIssue => "critical issue outstanding",
            SkipReason::Unbound => "no remote binding",
            SkipReason::Offline => "offline",
            SkipReason::SmokeTestFailed => "smoke test failed",
            SkipReason::RemoteRootGone => "remote root gone",
        };
        write!(f, "{s}")
    }
}

/// Final state of one location in a cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocationStatus {
    Synced,
    Skipped(SkipReason),
    /// A pipeline phase failed; the message names the phase and the error
    Failed(String),
}

/// Summary of one location's pass through a cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub location: LocationId,
    pub status: LocationStatus,
    /// Done tasks per action kind, in execution order
    pub done: Vec<(ActionKind, usize)>,
    /// Paths the planner left alone because of ignore rules or selective sync
    pub ignored: usize,
    /// Issues raised while executing
    pub issues: usize,
    pub abandoned: usize,
    pub resync: bool,
}

impl CycleReport {
    fn new(location: LocationId, status: LocationStatus) -> Self {
        Self {
            location,
            status,
            done: Vec::new(),
            ignored: 0,
            issues: 0,
            abandoned: 0,
            resync: false,
        }
    }

    fn skipped(location: LocationId, reason: SkipReason) -> Self {
        Self::new(location, LocationStatus::Skipped(reason))
    }

    /// Done tasks of one action kind
    pub fn done_count(&self, action: ActionKind) -> usize {
        self.done
            .iter()
            .find(|(a, _)| *a == action)
            .map_or(0, |(_, n)| *n)
    }

    pub fn total_done(&self) -> usize {
        self.done.iter().map(|(_, n)| n).sum()
    }

    fn record(&mut self, outcome: &ExecutionOutcome) {
        self.done = ActionKind::EXECUTION_ORDER
            .into_iter()
            .map(|action| (action, outcome.done_count(action)))
            .filter(|(_, n)| *n > 0)
            .collect();
        self.issues = outcome.issues;
        self.abandoned = outcome.abandoned;
        self.resync = outcome.resync;
    }
}

/// Result of a cycle trigger
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Another cycle was running; nothing was done
    Busy,
    Completed(Vec<CycleReport>),
}

/// A pipeline phase that failed for one location
struct PhaseFailure {
    phase: CyclePhase,
    error: String,
}

impl PhaseFailure {
    fn new(phase: CyclePhase, error: impl std::fmt::Display) -> Self {
        Self {
            phase,
            error: error.to_string(),
        }
    }
}

// ============================================================================
// SyncEngine
// ============================================================================

/// Ports the engine drives
#[derive(Clone)]
pub struct EngineDeps {
    pub local_snapshots: Arc<dyn ILocalSnapshotProvider>,
    pub local_ops: Arc<dyn ILocalFileOps>,
    pub remote_snapshots: Arc<dyn IRemoteSnapshotProvider>,
    pub remote_ops: Arc<dyn IRemoteFileOps>,
    pub config_store: Arc<dyn IConfigStore>,
    pub events: Arc<dyn IEventSink>,
    pub sleeper: Arc<dyn Sleeper>,
}

/// Per-process sync orchestrator
pub struct SyncEngine {
    deps: EngineDeps,
    settings: SettingsStore,
    issues: IssueLog,
    executor: TaskExecutor,
    trees: TreeStore,
    data_dir: PathBuf,
    interval: Duration,
    cycle: Mutex<()>,
    watcher: Option<Mutex<LocalWatcher>>,
    local_cache: Mutex<BTreeMap<LocationId, TreeSnapshot>>,
    remote_cache: Mutex<BTreeMap<LocationId, TreeSnapshot>>,
    quota: Arc<QuotaGate>,
}

impl SyncEngine {
    pub fn new(config: &Config, deps: EngineDeps) -> Self {
        let settings = SettingsStore::new(deps.config_store.clone());
        let issues = IssueLog::new(deps.config_store.clone());
        let quota = Arc::new(QuotaGate::new(Duration::from_secs(
            config.sync.remote_poll_secs,
        )));
        let executor = TaskExecutor::new(
            ExecutorDeps {
                local_ops: deps.local_ops.clone(),
                remote_ops: deps.remote_ops.clone(),
                events: deps.events.clone(),
                issues: issues.clone(),
                quota: quota.clone(),
                sleeper: deps.sleeper.clone(),
            },
            &config.concurrency,
            RetryPolicy::from(&config.retry),
        );

        Self {
            deps,
            settings,
            issues,
            executor,
            trees: TreeStore::new(&config.sync.data_dir),
            data_dir: config.sync.data_dir.clone(),
            interval: Duration::from_secs(config.sync.interval_secs),
            cycle: Mutex::new(()),
            watcher: None,
            local_cache: Mutex::new(BTreeMap::new()),
            remote_cache: Mutex::new(BTreeMap::new()),
            quota,
        }
    }

    /// Watches every synced root with `watcher`
    pub fn with_watcher(mut self, watcher: LocalWatcher) -> Self {
        self.watcher = Some(Mutex::new(watcher));
        self
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    pub fn issues(&self) -> &IssueLog {
        &self.issues
    }

    pub fn quota(&self) -> &QuotaGate {
        &self.quota
    }

    /// Runs cycles on the configured cadence until `shutdown` fires
    ///
    /// The timer is armed after each cycle returns, so cycles never overlap.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(interval_secs = self.interval.as_secs(), "Sync loop started");
        while !shutdown.is_cancelled() {
            match self.run_cycle().await {
                Ok(CycleOutcome::Busy) => debug!("Cycle already running"),
                Ok(CycleOutcome::Completed(reports)) => {
                    debug!(locations = reports.len(), "Cycle completed")
                }
                Err(e) => error!(error = %e, "Sync cycle failed"),
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
        info!("Sync loop stopped");
    }

    /// Runs one cycle over every configured location
    ///
    /// Returns [`CycleOutcome::Busy`] at once if a cycle is already running.
    ///
    /// # Errors
    /// Returns an error only if the location list cannot be read; failures
    /// inside a location are reported in its [`CycleReport`].
    pub async fn run_cycle(&self) -> Result<CycleOutcome, SyncError> {
        let Ok(_guard) = self.cycle.try_lock() else {
            debug!("Sync trigger ignored, a cycle is running");
            return Ok(CycleOutcome::Busy);
        };

        let locations = self.settings.locations().await?;
        info!(locations = locations.len(), "Sync cycle started");

        let mut reports = Vec::with_capacity(locations.len());
        for location in &locations {
            let report = self.sync_location(location).await;
            match &report.status {
                LocationStatus::Synced => info!(
                    location = %report.location,
                    done = report.total_done(),
                    ignored = report.ignored,
                    abandoned = report.abandoned,
                    resync = report.resync,
                    "Location synced"
                ),
                LocationStatus::Skipped(reason) => {
                    info!(location = %report.location, %reason, "Location skipped")
                }
                LocationStatus::Failed(err) => {
                    warn!(location = %report.location, error = %err, "Location failed")
                }
            }
            reports.push(report);
        }

        Ok(CycleOutcome::Completed(reports))
    }

    // ------------------------------------------------------------------
    // Per-location pass
    // ------------------------------------------------------------------

    #[instrument(skip_all, fields(location = %location.id))]
    async fn sync_location(&self, location: &SyncLocation) -> CycleReport {
        self.emit_phase(location, CyclePhase::Init);

        if let Some(reason) = self.check_guards(location).await {
            return CycleReport::skipped(location.id, reason);
        }

        match self.pipeline(location).await {
            Ok(report) => report,
            Err(failure) => {
                let issue = SyncIssue::critical(
                    Side::Local,
                    location.local.display().to_string(),
                    &failure.error,
                )
                .for_location(location.id)
                .with_info(failure.phase.to_string());
                self.raise(issue).await;
                CycleReport::new(
                    location.id,
                    LocationStatus::Failed(format!("{}: {}", failure.phase, failure.error)),
                )
            }
        }
    }

    /// Checks every skip condition in order, smoke tests included
    async fn check_guards(&self, location: &SyncLocation) -> Option<SkipReason> {
        if location.paused {
            return Some(SkipReason::Paused);
        }
        match self.settings.is_paused().await {
            Ok(false) => {}
            Ok(true) => return Some(SkipReason::GloballyPaused),
            Err(e) => {
                warn!(error = %e, "Cannot read pause flag, skipping location");
                return Some(SkipReason::GloballyPaused);
            }
        }
        match self.issues.has_critical().await {
            Ok(false) => {}
            Ok(true) => return Some(SkipReason::CriticalIssue),
            Err(e) => {
                warn!(error = %e, "Cannot read issue list, skipping location");
                return Some(SkipReason::CriticalIssue);
            }
        }
        let Some(remote_root) = location.remote.as_ref() else {
            return Some(SkipReason::Unbound);
        };
        if !self.deps.remote_snapshots.is_online().await {
            return Some(SkipReason::Offline);
        }

        if let Err(e) = self.deps.local_ops.smoke_test(&location.local).await {
            let issue = SyncIssue::critical(
                Side::Local,
                location.local.display().to_string(),
                format!("{e:#}"),
            )
            .for_location(location.id)
            .with_info("smokeTest");
            self.raise(issue).await;
            return Some(SkipReason::SmokeTestFailed);
        }

        if let Err(e) = self.deps.remote_ops.smoke_test(&remote_root.identity).await {
            if let Some(RemoteError::NotFound(_)) = e.downcast_ref::<RemoteError>() {
                self.unbind(location).await;
                return Some(SkipReason::RemoteRootGone);
            }
            warn!(error = %format!("{e:#}"), "Remote smoke test failed");
            return Some(SkipReason::SmokeTestFailed);
        }

        if let Some(watcher) = &self.watcher {
            if let Err(e) = watcher.lock().await.watch(&location.local) {
                warn!(error = %format!("{e:#}"), "Cannot watch sync root, relying on rescans");
            }
        }
        None
    }

    /// Forgets everything tied to a location whose remote root vanished
    async fn unbind(&self, location: &SyncLocation) {
        if let Err(e) = self.settings.clear_remote_binding(&location.id).await {
            error!(error = %e, "Failed to clear remote binding");
        }
        if let Err(e) = self.trees.remove(&location.id).await {
            warn!(error = %e, "Failed to remove saved trees");
        }
        if let Err(e) = DoneTaskJournal::for_location(&self.data_dir, &location.id)
            .truncate()
            .await
        {
            warn!(error = %e, "Failed to remove journal");
        }
        self.invalidate(&location.id).await;
    }

    async fn pipeline(&self, location: &SyncLocation) -> Result<CycleReport, PhaseFailure> {
        let mut report = CycleReport::new(location.id, LocationStatus::Synced);
        let journal = Arc::new(DoneTaskJournal::for_location(&self.data_dir, &location.id));
        let saved = self.restore(location, &journal).await?;

        self.emit_phase(location, CyclePhase::GetTrees);
        let (local, remote) = self.current_trees(location).await?;

        self.emit_phase(location, CyclePhase::GetDeltas);
        let local_delta = compute_delta(&saved.local, &local, Side::Local);
        let remote_delta = compute_delta(&saved.remote, &remote, Side::Remote);
        debug!(
            local_changes = local_delta.changes(),
            remote_changes = remote_delta.changes(),
            "Deltas computed"
        );

        self.emit_phase(location, CyclePhase::ConsumeDeltas);
        let filter = self
            .settings
            .path_filter(&location.id)
            .await
            .map_err(|e| PhaseFailure::new(CyclePhase::ConsumeDeltas, e))?;
        let planned = plan(&PlanInput {
            mode: location.mode,
            local_delta: &local_delta,
            remote_delta: &remote_delta,
            local: &local,
            remote: &remote,
            filter: &filter,
        });
        report.ignored = planned.ignored.len();

        self.emit_phase(location, CyclePhase::ConsumeTasks);
        let outcome = if planned.tasks.is_empty() {
            debug!("Nothing to do");
            ExecutionOutcome::default()
        } else {
            self.executor
                .execute(
                    location,
                    &planned.tasks,
                    local.clone(),
                    remote.clone(),
                    journal.clone(),
                )
                .await
        };
        report.record(&outcome);

        self.emit_phase(location, CyclePhase::Cleanup);
        let clean = outcome.abandoned == 0 && !outcome.resync;
        let mut next = if clean {
            SavedTrees { local, remote }
        } else {
            saved.clone()
        };
        apply_done_tasks(&outcome.done, &mut next.local, &mut next.remote);
        for path in &planned.ignored {
            restore_subtree(&mut next.local, &saved.local, path);
            restore_subtree(&mut next.remote, &saved.remote, path);
        }
        self.persist(location, &next, &journal)
            .await
            .map_err(|e| PhaseFailure::new(CyclePhase::Cleanup, e))?;

        if outcome.resync || !outcome.done.is_empty() {
            self.invalidate(&location.id).await;
        }
        Ok(report)
    }

    /// Loads the saved trees and folds any leftover journal into them
    async fn restore(
        &self,
        location: &SyncLocation,
        journal: &DoneTaskJournal,
    ) -> Result<SavedTrees, PhaseFailure> {
        let mut saved = self
            .trees
            .load(&location.id, location.mode)
            .await
            .map_err(|e| PhaseFailure::new(CyclePhase::Init, e))?;
        let leftover = journal
            .load()
            .await
            .map_err(|e| PhaseFailure::new(CyclePhase::Init, e))?;
        if leftover.is_empty() {
            return Ok(saved);
        }

        info!(records = leftover.len(), "Replaying done-task journal");
        apply_done_tasks(&leftover, &mut saved.local, &mut saved.remote);
        self.persist(location, &saved, journal)
            .await
            .map_err(|e| PhaseFailure::new(CyclePhase::Init, e))?;
        Ok(saved)
    }

    /// Saves `trees` as the next baseline, then drops the journal
    async fn persist(
        &self,
        location: &SyncLocation,
        trees: &SavedTrees,
        journal: &DoneTaskJournal,
    ) -> Result<(), SyncError> {
        self.trees.save(&location.id, location.mode, trees).await?;
        journal.truncate().await
    }

    /// Current local and remote snapshots, rescanning only what changed
    async fn current_trees(
        &self,
        location: &SyncLocation,
    ) -> Result<(TreeSnapshot, TreeSnapshot), PhaseFailure> {
        let fail = |e: anyhow::Error| PhaseFailure::new(CyclePhase::GetTrees, format!("{e:#}"));

        let local_dirty = self.deps.local_snapshots.take_dirty(&location.local);
        let cached = self.local_cache.lock().await.get(&location.id).cloned();
        let local = match cached {
            Some(tree) if !local_dirty => {
                debug!("Local tree unchanged, using cached snapshot");
                tree
            }
            _ => {
                let scan = self
                    .deps
                    .local_snapshots
                    .get_local_tree(&location.local)
                    .await
                    .map_err(fail)?;
                for skipped in scan.skipped {
                    let issue = SyncIssue::warning(Side::Local, skipped.path, skipped.reason)
                        .for_location(location.id);
                    self.raise(issue).await;
                }
                self.local_cache
                    .lock()
                    .await
                    .insert(location.id, scan.tree.clone());
                scan.tree
            }
        };

        // Unbound locations never reach the pipeline.
        let Some(root) = location.remote.as_ref() else {
            return Err(PhaseFailure::new(CyclePhase::GetTrees, "no remote binding"));
        };
        let cached = self.remote_cache.lock().await.get(&location.id).cloned();
        let remote_changed = match cached {
            Some(_) => self
                .deps
                .remote_snapshots
                .has_changed(&root.identity)
                .await
                .map_err(fail)?,
            None => true,
        };
        let remote = match cached {
            Some(tree) if !remote_changed => {
                debug!("Remote tree unchanged, using cached snapshot");
                tree
            }
            _ => {
                let tree = self
                    .deps
                    .remote_snapshots
                    .get_remote_tree(&root.identity)
                    .await
                    .map_err(fail)?;
                self.remote_cache
                    .lock()
                    .await
                    .insert(location.id, tree.clone());
                tree
            }
        };

        debug!(local = local.len(), remote = remote.len(), "Trees ready");
        Ok((local, remote))
    }

    async fn invalidate(&self, id: &LocationId) {
        self.local_cache.lock().await.remove(id);
        self.remote_cache.lock().await.remove(id);
    }

    async fn raise(&self, issue: SyncIssue) {
        match self.issues.add(issue.clone()).await {
            Ok(true) => self.deps.events.emit(SyncEvent::Issue(issue)),
            Ok(false) => {}
            Err(e) => error!(error = %e, "Failed to record sync issue"),
        }
    }

    fn emit_phase(&self, location: &SyncLocation, phase: CyclePhase) {
        debug!(%phase, "Cycle phase");
        self.deps.events.emit(SyncEvent::Cycle {
            location: location.id,
            phase,
        });
    }
}

/// Replaces the `path` subtree of `tree` with the one in `baseline`
///
/// Ignored items keep their previous baseline so they surface as changes
/// once the rule that hid them is lifted.
fn restore_subtree(tree: &mut TreeSnapshot, baseline: &TreeSnapshot, path: &str) {
    tree.remove_subtree(path);
    for (p, folder) in baseline.folders.iter().filter(|(p, _)| relpath::is_within(p, path)) {
        tree.insert_folder(p.clone(), folder.clone());
    }
    for (p, file) in baseline.files.iter().filter(|(p, _)| relpath::is_within(p, path)) {
        tree.insert_file(p.clone(), file.clone());
    }
}
