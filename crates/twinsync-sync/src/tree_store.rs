//! Saved "last tree" per location
//!
//! After every cycle the local and remote snapshots the next delta will be
//! computed against are written to `<data_dir>/state/<location>.json`. The
//! file records the sync mode it was produced under; a saved state from a
//! different mode is discarded so the location resyncs from scratch.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info, instrument};

use twinsync_core::domain::{LocationId, SyncMode, TreeSnapshot};

use crate::SyncError;

/// Snapshot pair persisted between cycles
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedTrees {
    pub local: TreeSnapshot,
    pub remote: TreeSnapshot,
}

#[derive(Debug, Serialize, Deserialize)]
struct SavedState {
    mode: SyncMode,
    local: TreeSnapshot,
    remote: TreeSnapshot,
}

/// File-backed store of saved trees
#[derive(Debug, Clone)]
pub struct TreeStore {
    dir: PathBuf,
}

impl TreeStore {
    /// Store rooted at `<data_dir>/state`
    pub fn new(data_dir: &Path) -> Self {
        Self {
            dir: data_dir.join("state"),
        }
    }

    fn path_for(&self, location: &LocationId) -> PathBuf {
        self.dir.join(format!("{location}.json"))
    }

    /// Loads the saved trees of `location`
    ///
    /// Returns empty trees when nothing was saved yet or when the saved state
    /// belongs to another sync mode.
    #[instrument(skip(self), fields(location = %location, mode = %mode))]
    pub async fn load(&self, location: &LocationId, mode: SyncMode) -> Result<SavedTrees, SyncError> {
        let text = match fs::read_to_string(self.path_for(location)).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No saved state, starting from empty trees");
                return Ok(SavedTrees::default());
            }
            Err(e) => return Err(e.into()),
        };
        let state: SavedState = serde_json::from_str(&text)?;
        if state.mode != mode {
            info!(saved = %state.mode, "Sync mode changed, discarding saved state");
            return Ok(SavedTrees::default());
        }
        Ok(SavedTrees {
            local: state.local,
            remote: state.remote,
        })
    }

    /// Writes the trees atomically (temp file + rename)
    #[instrument(skip(self, trees), fields(location = %location, local = trees.local.len(), remote = trees.remote.len()))]
    pub async fn save(
        &self,
        location: &LocationId,
        mode: SyncMode,
        trees: &SavedTrees,
    ) -> Result<(), SyncError> {
        let state = SavedState {
            mode,
            local: trees.local.clone(),
            remote: trees.remote.clone(),
        };
        let data = serde_json::to_vec(&state)?;

        fs::create_dir_all(&self.dir).await?;
        let target = self.path_for(location);
        let tmp = target.with_extension("json.tmp");
        fs::write(&tmp, data).await?;
        fs::rename(&tmp, &target).await?;
        debug!("Saved state written");
        Ok(())
    }

    /// Drops the saved state of `location`
    pub async fn remove(&self, location: &LocationId) -> Result<(), SyncError> {
        match fs::remove_file(self.path_for(location)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
