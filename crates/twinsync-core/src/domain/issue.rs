//! Sync issues surfaced to the user
//!
//! Issues are recorded whenever a cycle hits a problem it cannot resolve on
//! its own. A [`IssueKind::Critical`] issue halts processing of every
//! location until it is cleared externally.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::delta::Side;
use super::newtypes::{IssueId, LocationId};

/// Severity of a sync issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueKind {
    /// Non-fatal, e.g. an unreadable entry skipped while scanning
    Warning,
    /// A task abandoned after exhausting its retries
    Conflict,
    /// Pipeline-halting until cleared
    Critical,
}

impl std::fmt::Display for IssueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            IssueKind::Warning => "warning",
            IssueKind::Conflict => "conflict",
            IssueKind::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

/// A recorded problem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncIssue {
    #[serde(rename = "uuid")]
    pub id: IssueId,
    #[serde(rename = "type")]
    pub kind: IssueKind,
    #[serde(rename = "where")]
    pub side: Side,
    /// Location the issue belongs to, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<LocationId>,
    pub path: String,
    pub err: String,
    #[serde(default)]
    pub info: String,
    pub timestamp: DateTime<Utc>,
}

impl SyncIssue {
    /// Creates an issue stamped with the current time
    pub fn new(
        kind: IssueKind,
        side: Side,
        path: impl Into<String>,
        err: impl Into<String>,
    ) -> Self {
        Self {
            id: IssueId::new(),
            kind,
            side,
            location: None,
            path: path.into(),
            err: err.into(),
            info: String::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn warning(side: Side, path: impl Into<String>, err: impl Into<String>) -> Self {
        Self::new(IssueKind::Warning, side, path, err)
    }

    pub fn conflict(side: Side, path: impl Into<String>, err: impl Into<String>) -> Self {
        Self::new(IssueKind::Conflict, side, path, err)
    }

    pub fn critical(side: Side, path: impl Into<String>, err: impl Into<String>) -> Self {
        Self::new(IssueKind::Critical, side, path, err)
    }

    /// Ties the issue to a location
    pub fn for_location(mut self, location: LocationId) -> Self {
        self.location = Some(location);
        self
    }

    /// Attaches free-form context
    pub fn with_info(mut self, info: impl Into<String>) -> Self {
        self.info = info.into();
        self
    }

    pub fn is_critical(&self) -> bool {
        self.kind == IssueKind::Critical
    }
}
