//! Progress event port (driving a UI layer)
//!
//! The pipeline reports per-task progress and cycle phase changes through an
//! [`IEventSink`]. Events are fire-and-forget; a sink must never block the
//! pipeline.

use serde::{Deserialize, Serialize};

use crate::domain::issue::SyncIssue;
use crate::domain::newtypes::{LocationId, TaskId};
use crate::domain::task::ActionKind;

// ============================================================================
// TaskPhase / CyclePhase
// ============================================================================

/// Lifecycle of a single task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskPhase {
    /// Queued for dispatch
    Start,
    /// Presence check passed, operation in progress
    Started,
    Done,
    /// Abandoned
    Err,
}

/// Phase of a location's cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CyclePhase {
    Init,
    GetTrees,
    GetDeltas,
    ConsumeDeltas,
    ConsumeTasks,
    Cleanup,
}

impl std::fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CyclePhase::Init => "init",
            CyclePhase::GetTrees => "getTrees",
            CyclePhase::GetDeltas => "getDeltas",
            CyclePhase::ConsumeDeltas => "consumeDeltas",
            CyclePhase::ConsumeTasks => "consumeTasks",
            CyclePhase::Cleanup => "cleanup",
        };
        write!(f, "{s}")
    }
}

// ============================================================================
// SyncEvent
// ============================================================================

/// A progress notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum SyncEvent {
    /// A location entered a new phase
    Cycle {
        location: LocationId,
        phase: CyclePhase,
    },
    /// A task changed state
    Task {
        location: LocationId,
        task: TaskId,
        action: ActionKind,
        path: String,
        phase: TaskPhase,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// An issue was recorded
    Issue(SyncIssue),
}

// ============================================================================
// IEventSink trait
// ============================================================================

/// Port trait receiving progress events
pub trait IEventSink: Send + Sync {
    fn emit(&self, event: SyncEvent);
}

/// Sink that drops every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEventSink;

impl IEventSink for NullEventSink {
    fn emit(&self, _event: SyncEvent) {}
}
