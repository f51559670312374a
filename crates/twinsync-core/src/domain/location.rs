//! Sync locations
//!
//! A [`SyncLocation`] binds one local directory to one remote folder under
//! a directional [`SyncMode`]. Locations are created and edited outside the
//! pipeline and re-read at the start of every cycle.

use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::errors::DomainError;
use super::newtypes::{Identity, LocationId};

/// Allowed directionality of a sync location
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncMode {
    /// Merge changes from both sides
    TwoWay,
    /// Mirror local onto remote, deletions included
    LocalToCloud,
    /// Mirror remote onto local, deletions included
    CloudToLocal,
    /// Push local changes to remote, never delete remotely
    LocalBackup,
    /// Pull remote changes to local, never delete locally
    CloudBackup,
}

impl SyncMode {
    /// Local changes are the authoritative source
    pub fn local_authoritative(self) -> bool {
        matches!(self, SyncMode::LocalToCloud | SyncMode::LocalBackup)
    }

    /// Remote changes are the authoritative source
    pub fn remote_authoritative(self) -> bool {
        matches!(self, SyncMode::CloudToLocal | SyncMode::CloudBackup)
    }

    /// Wire name used in configuration
    pub fn as_str(self) -> &'static str {
        match self {
            SyncMode::TwoWay => "twoWay",
            SyncMode::LocalToCloud => "localToCloud",
            SyncMode::CloudToLocal => "cloudToLocal",
            SyncMode::LocalBackup => "localBackup",
            SyncMode::CloudBackup => "cloudBackup",
        }
    }
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncMode {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "twoWay" => Ok(SyncMode::TwoWay),
            "localToCloud" => Ok(SyncMode::LocalToCloud),
            "cloudToLocal" => Ok(SyncMode::CloudToLocal),
            "localBackup" => Ok(SyncMode::LocalBackup),
            "cloudBackup" => Ok(SyncMode::CloudBackup),
            other => Err(DomainError::InvalidSyncMode(other.to_string())),
        }
    }
}

/// Remote folder a location is bound to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRoot {
    pub identity: Identity,
    /// Display name of the remote folder
    pub name: String,
}

/// One local-directory / remote-folder pairing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncLocation {
    #[serde(rename = "uuid")]
    pub id: LocationId,
    /// Absolute path of the local sync root
    pub local: PathBuf,
    /// `None` until configured, or after the remote root vanished
    #[serde(default)]
    pub remote: Option<RemoteRoot>,
    #[serde(rename = "type")]
    pub mode: SyncMode,
    #[serde(default)]
    pub paused: bool,
}

impl SyncLocation {
    /// Creates an unpaused two-way location
    pub fn new(local: impl Into<PathBuf>, remote: RemoteRoot) -> Self {
        Self {
            id: LocationId::new(),
            local: local.into(),
            remote: Some(remote),
            mode: SyncMode::TwoWay,
            paused: false,
        }
    }

    /// Sets the sync mode
    pub fn with_mode(mut self, mode: SyncMode) -> Self {
        self.mode = mode;
        self
    }

    /// Returns true if the location has a remote binding
    pub fn is_bound(&self) -> bool {
        self.remote.is_some()
    }
}
