//! Shared test helpers for sync pipeline integration tests
//!
//! Provides an in-memory remote implementing both remote ports, and a
//! harness wiring a [`SyncEngine`] to it, to the real local filesystem
//! adapter over a temp dir, and to an in-memory config store.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use filetime::FileTime;
use tokio::sync::Semaphore;

use twinsync_core::config::ConfigBuilder;
use twinsync_core::domain::relpath;
use twinsync_core::domain::{
    FileEntry, FolderEntry, Identity, ItemKind, LocationId, RemotePayload, RemoteRoot,
    SyncLocation, SyncMode, TreeSnapshot,
};
use twinsync_core::ports::{
    IEventSink, ILocalFileOps, IRemoteFileOps, IRemoteSnapshotProvider, InMemoryConfigStore,
    RemoteError, SyncEvent,
};
use twinsync_sync::engine::{CycleOutcome, CycleReport, EngineDeps, SyncEngine};
use twinsync_sync::filesystem::LocalFileSystemAdapter;
use twinsync_sync::retry::Sleeper;
use twinsync_sync::store::SettingsStore;

pub const REMOTE_ROOT: &str = "root";

// ============================================================================
// Small doubles
// ============================================================================

pub struct NoSleep;

#[async_trait]
impl Sleeper for NoSleep {
    async fn sleep(&self, _duration: Duration) {}
}

#[derive(Default)]
pub struct RecordingSink(Mutex<Vec<SyncEvent>>);

impl RecordingSink {
    pub fn events(&self) -> Vec<SyncEvent> {
        self.0.lock().unwrap().clone()
    }
}

impl IEventSink for RecordingSink {
    fn emit(&self, event: SyncEvent) {
        self.0.lock().unwrap().push(event);
    }
}

// ============================================================================
// FakeRemote
// ============================================================================

#[derive(Default)]
struct RemoteState {
    tree: TreeSnapshot,
    contents: BTreeMap<Identity, Vec<u8>>,
    next_id: u64,
}

impl RemoteState {
    fn fresh_identity(&mut self) -> Identity {
        self.next_id += 1;
        Identity::new(format!("r{}", self.next_id)).unwrap()
    }

    /// Relative path of a folder identity; the root maps to ""
    fn path_of(&self, identity: &Identity) -> anyhow::Result<String> {
        if identity.as_str() == REMOTE_ROOT {
            return Ok(String::new());
        }
        self.tree
            .locate(identity)
            .map(|r| r.path.clone())
            .ok_or_else(|| RemoteError::NotFound(identity.to_string()).into())
    }

    fn parent_of(&self, path: &str) -> Identity {
        self.tree
            .parent_identity(path)
            .cloned()
            .unwrap_or_else(|| Identity::new(REMOTE_ROOT).unwrap())
    }

    fn ensure_folders(&mut self, path: &str) {
        if path.is_empty() {
            return;
        }
        let chain: Vec<String> = std::iter::once(path)
            .chain(relpath::ancestors(path))
            .map(str::to_string)
            .collect();
        for folder in chain.into_iter().rev() {
            if self.tree.folders.contains_key(&folder) {
                continue;
            }
            let identity = self.fresh_identity();
            let parent = self.parent_of(&folder);
            self.tree.insert_folder(
                folder.clone(),
                FolderEntry {
                    name: relpath::basename(&folder).to_string(),
                    identity,
                    parent: Some(parent),
                },
            );
        }
    }
}

/// Current and peak number of calls in flight
#[derive(Default)]
pub struct Gauge {
    now: AtomicUsize,
    peak: AtomicUsize,
}

impl Gauge {
    fn enter(&self) {
        let now = self.now.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.now.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// In-memory remote storage keyed by relative path under [`REMOTE_ROOT`]
pub struct FakeRemote {
    state: Mutex<RemoteState>,
    online: AtomicBool,
    root_gone: AtomicBool,
    listings: AtomicUsize,
    hold_listings: AtomicBool,
    listing_gate: Semaphore,
    delay: Mutex<Duration>,
    locked_uploads: AtomicUsize,
    uploads: AtomicUsize,
    downloads: AtomicUsize,
    pub uploading: Gauge,
    pub downloading: Gauge,
    pub trashing: Gauge,
    /// Every upload, download and trash call
    pub busy: Gauge,
}

impl Default for FakeRemote {
    fn default() -> Self {
        Self {
            state: Mutex::default(),
            online: AtomicBool::new(true),
            root_gone: AtomicBool::new(false),
            listings: AtomicUsize::new(0),
            hold_listings: AtomicBool::new(false),
            listing_gate: Semaphore::new(0),
            delay: Mutex::new(Duration::ZERO),
            locked_uploads: AtomicUsize::new(0),
            uploads: AtomicUsize::new(0),
            downloads: AtomicUsize::new(0),
            uploading: Gauge::default(),
            downloading: Gauge::default(),
            trashing: Gauge::default(),
            busy: Gauge::default(),
        }
    }
}

impl FakeRemote {
    pub fn root_identity() -> Identity {
        Identity::new(REMOTE_ROOT).unwrap()
    }

    pub fn tree(&self) -> TreeSnapshot {
        self.state.lock().unwrap().tree.clone()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.state.lock().unwrap().tree.contains(path)
    }

    pub fn file(&self, path: &str) -> Option<FileEntry> {
        self.state.lock().unwrap().tree.files.get(path).cloned()
    }

    /// Stores a file as if another client uploaded it
    pub fn put_file(&self, path: &str, data: &[u8], last_modified: i64) -> FileEntry {
        let mut state = self.state.lock().unwrap();
        state.ensure_folders(relpath::parent(path));
        let identity = state.fresh_identity();
        let entry = FileEntry {
            name: relpath::basename(path).to_string(),
            size: data.len() as u64,
            last_modified,
            identity: identity.clone(),
            remote: Some(payload()),
        };
        state.contents.insert(identity, data.to_vec());
        state.tree.insert_file(path, entry.clone());
        entry
    }

    /// Changes a remote file's modification time and content
    pub fn edit_file(&self, path: &str, data: &[u8], last_modified: i64) {
        let mut state = self.state.lock().unwrap();
        let mut entry = state.tree.files.get(path).cloned().unwrap();
        entry.size = data.len() as u64;
        entry.last_modified = last_modified;
        state.contents.insert(entry.identity.clone(), data.to_vec());
        state.tree.insert_file(path, entry);
    }

    pub fn remove(&self, path: &str) {
        self.state.lock().unwrap().tree.remove_subtree(path);
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn set_root_gone(&self, gone: bool) {
        self.root_gone.store(gone, Ordering::SeqCst);
    }

    /// Makes every upload, download and trash take `delay`
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    /// Fails the next `count` uploads as if the source file were locked
    pub fn lock_uploads(&self, count: usize) {
        self.locked_uploads.store(count, Ordering::SeqCst);
    }

    /// Makes every listing wait until [`FakeRemote::release_listings`]
    pub fn hold_listings(&self) {
        self.hold_listings.store(true, Ordering::SeqCst);
    }

    pub fn release_listings(&self) {
        self.hold_listings.store(false, Ordering::SeqCst);
        self.listing_gate.add_permits(16);
    }

    pub fn listings(&self) -> usize {
        self.listings.load(Ordering::SeqCst)
    }

    pub fn uploads(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    pub fn downloads(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    /// Moves an item under the folder at `parent` as another client would
    pub fn move_to(&self, path: &str, parent: &str) {
        let mut state = self.state.lock().unwrap();
        let to = relpath::join(parent, relpath::basename(path));
        state.tree.relocate(path, &to);
    }

    async fn occupy(&self, lane: &Gauge) {
        lane.enter();
        self.busy.enter();
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.busy.leave();
        lane.leave();
    }

    fn check_root(&self) -> anyhow::Result<()> {
        if self.root_gone.load(Ordering::SeqCst) {
            return Err(RemoteError::NotFound(REMOTE_ROOT.into()).into());
        }
        Ok(())
    }
}

fn payload() -> RemotePayload {
    RemotePayload {
        region: "test-region".into(),
        bucket: "bucket".into(),
        chunks: 1,
        metadata_key: "key".into(),
    }
}

#[async_trait]
impl IRemoteSnapshotProvider for FakeRemote {
    async fn get_remote_tree(&self, _root: &Identity) -> anyhow::Result<TreeSnapshot> {
        self.listings.fetch_add(1, Ordering::SeqCst);
        if self.hold_listings.load(Ordering::SeqCst) {
            let _permit = self.listing_gate.acquire().await?;
        }
        self.check_root()?;
        Ok(self.tree())
    }

    async fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IRemoteFileOps for FakeRemote {
    async fn exists(&self, identity: &Identity, _kind: ItemKind) -> anyhow::Result<bool> {
        Ok(self.state.lock().unwrap().tree.locate(identity).is_some())
    }

    async fn create_folder(&self, name: &str, parent: &Identity) -> anyhow::Result<Identity> {
        let mut state = self.state.lock().unwrap();
        let path = relpath::join(&state.path_of(parent)?, name);
        if let Some(existing) = state.tree.folders.get(&path) {
            return Ok(existing.identity.clone());
        }
        let identity = state.fresh_identity();
        state.tree.insert_folder(
            path,
            FolderEntry {
                name: name.to_string(),
                identity: identity.clone(),
                parent: Some(parent.clone()),
            },
        );
        Ok(identity)
    }

    async fn upload_file(
        &self,
        source: &Path,
        name: &str,
        parent: &Identity,
        local: &FileEntry,
    ) -> anyhow::Result<FileEntry> {
        let locked = self
            .locked_uploads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if locked {
            return Err(std::io::Error::from(std::io::ErrorKind::PermissionDenied).into());
        }
        let data = tokio::fs::read(source).await?;
        self.occupy(&self.uploading).await;

        let mut state = self.state.lock().unwrap();
        let path = relpath::join(&state.path_of(parent)?, name);
        let identity = state.fresh_identity();
        let entry = FileEntry {
            name: name.to_string(),
            size: data.len() as u64,
            last_modified: local.last_modified,
            identity: identity.clone(),
            remote: Some(payload()),
        };
        state.contents.insert(identity, data);
        state.tree.insert_file(path, entry.clone());
        self.uploads.fetch_add(1, Ordering::SeqCst);
        Ok(entry)
    }

    async fn download_chunk(&self, file: &FileEntry, _index: u32) -> anyhow::Result<Vec<u8>> {
        self.occupy(&self.downloading).await;
        self.downloads.fetch_add(1, Ordering::SeqCst);
        self.state
            .lock()
            .unwrap()
            .contents
            .get(&file.identity)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(file.identity.to_string()).into())
    }

    async fn rename(
        &self,
        identity: &Identity,
        _kind: ItemKind,
        new_name: &str,
    ) -> anyhow::Result<()> {
        let mut state = self.state.lock().unwrap();
        let from = state.path_of(identity)?;
        let to = relpath::join(relpath::parent(&from), new_name);
        state.tree.relocate(&from, &to);
        Ok(())
    }

    async fn move_item(
        &self,
        identity: &Identity,
        _kind: ItemKind,
        new_parent: &Identity,
    ) -> anyhow::Result<()> {
        let mut state = self.state.lock().unwrap();
        let from = state.path_of(identity)?;
        let to = relpath::join(&state.path_of(new_parent)?, relpath::basename(&from));
        state.tree.relocate(&from, &to);
        Ok(())
    }

    async fn trash(&self, identity: &Identity, _kind: ItemKind) -> anyhow::Result<()> {
        self.occupy(&self.trashing).await;
        let mut state = self.state.lock().unwrap();
        let path = state.path_of(identity)?;
        state.tree.remove_subtree(&path);
        Ok(())
    }

    async fn smoke_test(&self, _root: &Identity) -> anyhow::Result<()> {
        self.check_root()
    }

    async fn has_storage_left(&self) -> anyhow::Result<bool> {
        Ok(true)
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub engine: SyncEngine,
    pub remote: Arc<FakeRemote>,
    pub events: Arc<RecordingSink>,
    pub settings: SettingsStore,
    pub location: SyncLocation,
    pub root: PathBuf,
    pub data_dir: PathBuf,
    _dir: tempfile::TempDir,
}

pub async fn harness(mode: SyncMode) -> Harness {
    harness_with(mode, ConfigBuilder::new()).await
}

/// Harness with one location bound to the fake remote root
pub async fn harness_with(mode: SyncMode, builder: ConfigBuilder) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("Sync");
    let data_dir = dir.path().join("data");
    std::fs::create_dir_all(&root).unwrap();

    let config = builder
        .sync_data_dir(&data_dir)
        .retry_max_tries(2)
        .retry_delay_ms(1)
        .build();

    let remote = Arc::new(FakeRemote::default());
    let events = Arc::new(RecordingSink::default());
    let store = Arc::new(InMemoryConfigStore::new());
    let local = Arc::new(LocalFileSystemAdapter::new());

    let location = SyncLocation::new(
        &root,
        RemoteRoot {
            identity: FakeRemote::root_identity(),
            name: "Sync".into(),
        },
    )
    .with_mode(mode);
    let settings = SettingsStore::new(store.clone());
    settings.upsert_location(location.clone()).await.unwrap();

    let engine = SyncEngine::new(
        &config,
        EngineDeps {
            local_snapshots: local.clone(),
            local_ops: local,
            remote_snapshots: remote.clone(),
            remote_ops: remote.clone(),
            config_store: store,
            events: events.clone(),
            sleeper: Arc::new(NoSleep),
        },
    );

    Harness {
        engine,
        remote,
        events,
        settings,
        location,
        root,
        data_dir,
        _dir: dir,
    }
}

impl Harness {
    pub fn id(&self) -> LocationId {
        self.location.id
    }

    /// Runs one cycle and returns the report of the harness location
    pub async fn cycle(&self) -> CycleReport {
        match self.engine.run_cycle().await.unwrap() {
            CycleOutcome::Completed(reports) => reports
                .into_iter()
                .find(|r| r.location == self.location.id)
                .unwrap(),
            CycleOutcome::Busy => panic!("cycle unexpectedly busy"),
        }
    }

    pub fn local_path(&self, rel: &str) -> PathBuf {
        self.root.join(rel)
    }

    /// Local file metadata as the snapshot provider would record it
    pub async fn local_entry(&self, rel: &str) -> FileEntry {
        let stat = LocalFileSystemAdapter::new()
            .stat(&self.local_path(rel))
            .await
            .unwrap()
            .unwrap();
        FileEntry {
            name: relpath::basename(rel).to_string(),
            size: stat.size,
            last_modified: stat.last_modified,
            identity: stat.identity,
            remote: None,
        }
    }

    /// Writes a local file with a fixed modification time in milliseconds
    pub fn write_local(&self, rel: &str, data: &[u8], last_modified: i64) {
        let path = self.local_path(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, data).unwrap();
        set_mtime(&path, last_modified);
    }
}

pub fn set_mtime(path: &Path, last_modified: i64) {
    let time = FileTime::from_unix_time(
        last_modified.div_euclid(1000),
        (last_modified.rem_euclid(1000) * 1_000_000) as u32,
    );
    filetime::set_file_mtime(path, time).unwrap();
}
