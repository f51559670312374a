//! Typed helpers over the configuration store
//!
//! [`SettingsStore`] reads and writes sync locations, the global pause flag,
//! ignore-pattern text and selective-sync sets. [`IssueLog`] keeps the issue
//! list. Both hold an `Arc<dyn IConfigStore>` and re-read the store on every
//! call; nothing is cached across cycles.
//!
//! [`JsonFileConfigStore`] is a file-backed [`IConfigStore`] keeping every
//! key in a single JSON object, rewritten atomically on each change.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use twinsync_core::domain::{LocationId, SyncIssue, SyncLocation};
use twinsync_core::ports::config_store::{
    ignore_patterns_key, selective_sync_key, IConfigStore, KEY_PAUSED, KEY_SYNC_ISSUES,
    KEY_SYNC_LOCATIONS,
};

use crate::ignore::{IgnoreMatcher, PathFilter, SelectiveSync};
use crate::SyncError;

async fn read_key<T: DeserializeOwned>(
    store: &dyn IConfigStore,
    key: &str,
) -> Result<Option<T>, SyncError> {
    match store.get(key).await.map_err(SyncError::Store)? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

async fn write_key<T: Serialize>(
    store: &dyn IConfigStore,
    key: &str,
    value: &T,
) -> Result<(), SyncError> {
    let value = serde_json::to_value(value)?;
    store.set(key, value).await.map_err(SyncError::Store)
}

// ============================================================================
// SettingsStore
// ============================================================================

/// Runtime settings of the sync pipeline
#[derive(Clone)]
pub struct SettingsStore {
    store: Arc<dyn IConfigStore>,
}

impl SettingsStore {
    pub fn new(store: Arc<dyn IConfigStore>) -> Self {
        Self { store }
    }

    /// Every configured location, in configuration order
    pub async fn locations(&self) -> Result<Vec<SyncLocation>, SyncError> {
        Ok(read_key(self.store.as_ref(), KEY_SYNC_LOCATIONS)
            .await?
            .unwrap_or_default())
    }

    pub async fn save_locations(&self, locations: &[SyncLocation]) -> Result<(), SyncError> {
        write_key(self.store.as_ref(), KEY_SYNC_LOCATIONS, &locations).await
    }

    /// Adds `location` or replaces the location with the same id
    pub async fn upsert_location(&self, location: SyncLocation) -> Result<(), SyncError> {
        let mut locations = self.locations().await?;
        match locations.iter_mut().find(|l| l.id == location.id) {
            Some(existing) => *existing = location,
            None => locations.push(location),
        }
        self.save_locations(&locations).await
    }

    /// Clears the remote binding of a location whose remote root vanished
    #[instrument(skip(self), fields(location = %id))]
    pub async fn clear_remote_binding(&self, id: &LocationId) -> Result<(), SyncError> {
        let mut locations = self.locations().await?;
        let Some(location) = locations.iter_mut().find(|l| &l.id == id) else {
            return Ok(());
        };
        location.remote = None;
        warn!(local = %location.local.display(), "Remote root gone, location needs reconfiguration");
        self.save_locations(&locations).await
    }

    /// Global pause flag
    pub async fn is_paused(&self) -> Result<bool, SyncError> {
        Ok(read_key(self.store.as_ref(), KEY_PAUSED)
            .await?
            .unwrap_or(false))
    }

    pub async fn set_paused(&self, paused: bool) -> Result<(), SyncError> {
        info!(paused, "Global pause flag changed");
        write_key(self.store.as_ref(), KEY_PAUSED, &paused).await
    }

    /// Ignore-pattern text of a location (empty when unset)
    pub async fn ignore_text(&self, id: &LocationId) -> Result<String, SyncError> {
        Ok(read_key(self.store.as_ref(), &ignore_patterns_key(id))
            .await?
            .unwrap_or_default())
    }

    pub async fn set_ignore_text(&self, id: &LocationId, text: &str) -> Result<(), SyncError> {
        write_key(self.store.as_ref(), &ignore_patterns_key(id), &text).await
    }

    /// Selective-sync exclusions of a location
    pub async fn selective_sync(&self, id: &LocationId) -> Result<SelectiveSync, SyncError> {
        let paths: Vec<String> = read_key(self.store.as_ref(), &selective_sync_key(id))
            .await?
            .unwrap_or_default();
        Ok(SelectiveSync::new(paths))
    }

    pub async fn set_selective_sync(
        &self,
        id: &LocationId,
        paths: &[String],
    ) -> Result<(), SyncError> {
        write_key(self.store.as_ref(), &selective_sync_key(id), &paths).await
    }

    /// Combined filter of a location, read fresh
    pub async fn path_filter(&self, id: &LocationId) -> Result<PathFilter, SyncError> {
        let ignore = IgnoreMatcher::new(&self.ignore_text(id).await?);
        let selective = self.selective_sync(id).await?;
        Ok(PathFilter::new(ignore, selective))
    }
}

// ============================================================================
// IssueLog
// ============================================================================

/// Queryable list of sync issues
#[derive(Clone)]
pub struct IssueLog {
    store: Arc<dyn IConfigStore>,
    write_lock: Arc<Mutex<()>>,
}

impl IssueLog {
    pub fn new(store: Arc<dyn IConfigStore>) -> Self {
        Self {
            store,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub async fn list(&self) -> Result<Vec<SyncIssue>, SyncError> {
        Ok(read_key(self.store.as_ref(), KEY_SYNC_ISSUES)
            .await?
            .unwrap_or_default())
    }

    /// Records an issue and logs it at a level matching its kind
    ///
    /// An issue identical to an outstanding one (same kind, side, location,
    /// path and error) is not recorded twice. Returns true if it was added.
    pub async fn add(&self, issue: SyncIssue) -> Result<bool, SyncError> {
        let _guard = self.write_lock.lock().await;
        let mut issues = self.list().await?;
        let duplicate = issues.iter().any(|i| {
            i.kind == issue.kind
                && i.side == issue.side
                && i.location == issue.location
                && i.path == issue.path
                && i.err == issue.err
        });
        if duplicate {
            debug!(path = %issue.path, "Issue already recorded");
            return Ok(false);
        }

        match issue.kind {
            twinsync_core::domain::IssueKind::Warning => {
                warn!(side = %issue.side, path = %issue.path, error = %issue.err, "Sync warning")
            }
            _ => tracing::error!(
                kind = %issue.kind,
                side = %issue.side,
                path = %issue.path,
                error = %issue.err,
                "Sync issue raised"
            ),
        }
        issues.push(issue);
        write_key(self.store.as_ref(), KEY_SYNC_ISSUES, &issues).await?;
        Ok(true)
    }

    /// Drops every issue
    pub async fn clear(&self) -> Result<(), SyncError> {
        let _guard = self.write_lock.lock().await;
        self.store
            .remove(KEY_SYNC_ISSUES)
            .await
            .map_err(SyncError::Store)
    }

    /// Drops the issues raised for one location
    pub async fn clear_by_location(&self, id: &LocationId) -> Result<usize, SyncError> {
        let _guard = self.write_lock.lock().await;
        let mut issues = self.list().await?;
        let before = issues.len();
        issues.retain(|i| i.location.as_ref() != Some(id));
        write_key(self.store.as_ref(), KEY_SYNC_ISSUES, &issues).await?;
        Ok(before - issues.len())
    }

    /// Returns true while any critical issue is outstanding
    pub async fn has_critical(&self) -> Result<bool, SyncError> {
        Ok(self.list().await?.iter().any(SyncIssue::is_critical))
    }
}

// ============================================================================
// JsonFileConfigStore
// ============================================================================

/// Configuration store persisted as one JSON object
#[derive(Debug)]
pub struct JsonFileConfigStore {
    path: PathBuf,
    values: Mutex<Option<BTreeMap<String, serde_json::Value>>>,
}

impl JsonFileConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            values: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_file(&self) -> anyhow::Result<BTreeMap<String, serde_json::Value>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(text) if text.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_file(&self, values: &BTreeMap<String, serde_json::Value>) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(values)?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), keys = values.len(), "Config store written");
        Ok(())
    }
}

#[async_trait::async_trait]
impl IConfigStore for JsonFileConfigStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
        let mut values = self.values.lock().await;
        if values.is_none() {
            *values = Some(self.read_file().await?);
        }
        Ok(values.as_ref().and_then(|v| v.get(key).cloned()))
    }

    async fn set(&self, key: &str, value: serde_json::Value) -> anyhow::Result<()> {
        let mut values = self.values.lock().await;
        let mut current = match values.take() {
            Some(current) => current,
            None => self.read_file().await?,
        };
        current.insert(key.to_string(), value);
        self.write_file(&current).await?;
        *values = Some(current);
        Ok(())
    }

    async fn remove(&self, key: &str) -> anyhow::Result<()> {
        let mut values = self.values.lock().await;
        let mut current = match values.take() {
            Some(current) => current,
            None => self.read_file().await?,
        };
        if current.remove(key).is_some() {
            self.write_file(&current).await?;
        }
        *values = Some(current);
        Ok(())
    }
}
