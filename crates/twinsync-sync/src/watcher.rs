//! Local change watching
//!
//! [`LocalWatcher`] wraps the `notify` crate and turns every relevant event
//! under a watched sync root into a dirty mark on that root. The local
//! snapshot provider consults the same [`DirtyFlags`] and skips rescanning a
//! root nothing touched since its last scan.
//!
//! ## Architecture
//!
//! ```text
//! inotify / kqueue
//!       │
//!       ▼
//!  LocalWatcher  ──→  DirtyFlags  ←──  LocalFileSystemAdapter::take_dirty
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, error, info, trace};

// ============================================================================
// DirtyFlags
// ============================================================================

/// Per-root "changed since last scan" flags, shared between the watcher
/// and the snapshot provider
///
/// A root that was never scanned reads as dirty.
#[derive(Debug, Clone, Default)]
pub struct DirtyFlags {
    inner: Arc<Mutex<BTreeMap<PathBuf, bool>>>,
}

impl DirtyFlags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `root` as changed
    pub fn mark(&self, root: &Path) {
        self.flags().insert(root.to_path_buf(), true);
    }

    /// Forgets every flag so each root rescans on next use
    pub fn mark_all(&self) {
        self.flags().clear();
    }

    /// Returns whether `root` changed since the last call and clears it
    pub fn take(&self, root: &Path) -> bool {
        self.flags().insert(root.to_path_buf(), false).unwrap_or(true)
    }

    // A panic elsewhere must not drop marks: the map stays usable.
    fn flags(&self) -> MutexGuard<'_, BTreeMap<PathBuf, bool>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ============================================================================
// LocalWatcher
// ============================================================================

/// Recursive watcher over every configured sync root
///
/// ## Usage
///
/// ```ignore
/// let flags = DirtyFlags::new();
/// let mut watcher = LocalWatcher::new(flags.clone())?;
/// watcher.watch(Path::new("/home/user/Sync"))?;
/// ```
pub struct LocalWatcher {
    watcher: RecommendedWatcher,
    roots: Arc<Mutex<BTreeSet<PathBuf>>>,
}

impl LocalWatcher {
    /// Creates a watcher that marks `flags` on every change
    ///
    /// # Errors
    /// Returns an error if the underlying OS watcher cannot be created
    pub fn new(flags: DirtyFlags) -> Result<Self> {
        let roots: Arc<Mutex<BTreeSet<PathBuf>>> = Arc::default();
        let watched = roots.clone();

        let watcher = RecommendedWatcher::new(
            move |res: std::result::Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    if !is_relevant(&event.kind) {
                        return;
                    }
                    let roots = watched.lock().unwrap_or_else(PoisonError::into_inner);
                    for path in &event.paths {
                        if let Some(root) = roots.iter().find(|root| path.starts_with(root)) {
                            trace!(root = %root.display(), path = %path.display(), "Local change");
                            flags.mark(root);
                        }
                    }
                }
                Err(err) => {
                    error!(error = %err, "File watcher error");
                    // Events may have been lost: rescan everything.
                    flags.mark_all();
                }
            },
            notify::Config::default(),
        )
        .context("Failed to create file watcher")?;

        Ok(Self { watcher, roots })
    }

    /// Starts watching `root` recursively; watching it twice is a no-op
    ///
    /// # Errors
    /// Returns an error if the path cannot be watched (missing, permission
    /// denied, or the inotify watch limit reached)
    pub fn watch(&mut self, root: &Path) -> Result<()> {
        if self.is_watching(root) {
            return Ok(());
        }
        info!(path = %root.display(), "Starting recursive watch");
        self.watcher
            .watch(root, RecursiveMode::Recursive)
            .with_context(|| format!("Failed to watch path: {}", root.display()))?;
        self.roots
            .lock()
            .map_err(|_| anyhow::anyhow!("watched roots lock poisoned"))?
            .insert(root.to_path_buf());
        Ok(())
    }

    /// Stops watching `root`
    pub fn unwatch(&mut self, root: &Path) -> Result<()> {
        let removed = self
            .roots
            .lock()
            .map_err(|_| anyhow::anyhow!("watched roots lock poisoned"))?
            .remove(root);
        if removed {
            debug!(path = %root.display(), "Stopping watch");
            self.watcher
                .unwatch(root)
                .with_context(|| format!("Failed to unwatch path: {}", root.display()))?;
        }
        Ok(())
    }

    pub fn is_watching(&self, root: &Path) -> bool {
        self.roots.lock().map(|r| r.contains(root)).unwrap_or(false)
    }
}

/// Access events never change a tree
fn is_relevant(kind: &EventKind) -> bool {
    !matches!(kind, EventKind::Access(_))
}
