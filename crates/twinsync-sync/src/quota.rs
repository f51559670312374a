//! Process-wide storage-full gate
//!
//! When an upload reports that the remote account is full, the gate closes.
//! Every upload checks the gate before starting and parks while it is
//! closed, polling the remote for free space on a fixed interval.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, info, warn};

use twinsync_core::ports::IRemoteFileOps;

use crate::retry::Sleeper;

/// Shared storage-full flag
#[derive(Debug)]
pub struct QuotaGate {
    full: AtomicBool,
    reopened: Notify,
    poll_interval: Duration,
}

impl QuotaGate {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            full: AtomicBool::new(false),
            reopened: Notify::new(),
            poll_interval,
        }
    }

    /// Returns true while uploads must wait
    pub fn is_full(&self) -> bool {
        self.full.load(Ordering::SeqCst)
    }

    /// Closes the gate
    pub fn mark_full(&self) {
        if !self.full.swap(true, Ordering::SeqCst) {
            warn!("Remote storage is full, parking uploads");
        }
    }

    /// Opens the gate and wakes every parked upload
    pub fn clear(&self) {
        if self.full.swap(false, Ordering::SeqCst) {
            info!("Remote storage available again, resuming uploads");
        }
        self.reopened.notify_waiters();
    }

    /// Parks until the gate is open
    ///
    /// While parked, waits one poll interval (or until another upload
    /// reopens the gate), then asks `remote` for free space and opens the
    /// gate as soon as it reports some.
    pub async fn wait_for_space(&self, remote: &dyn IRemoteFileOps, sleeper: &dyn Sleeper) {
        while self.is_full() {
            tokio::select! {
                _ = self.reopened.notified() => {}
                _ = sleeper.sleep(self.poll_interval) => {}
            }
            if !self.is_full() {
                return;
            }
            match remote.has_storage_left().await {
                Ok(true) => {
                    self.clear();
                    return;
                }
                Ok(false) => debug!("Still no remote storage left"),
                Err(err) => warn!(error = %err, "Failed to query remote storage"),
            }
        }
    }
}

impl Default for QuotaGate {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}
