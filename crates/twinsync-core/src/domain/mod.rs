//! Domain entities and business logic
//!
//! This module contains the core domain types for twinsync:
//! - Newtypes for type-safe identifiers
//! - Relative-path helpers for snapshot keys
//! - Tree snapshots and per-side deltas
//! - Planned tasks and the done-task journal record
//! - Sync locations, modes and sync issues
//! - Domain-specific error types

pub mod delta;
pub mod errors;
pub mod issue;
pub mod location;
pub mod newtypes;
pub mod relpath;
pub mod snapshot;
pub mod task;

// Re-export commonly used types
pub use delta::{Delta, DeltaEntry, DeltaKind, Side};
pub use errors::DomainError;
pub use issue::{IssueKind, SyncIssue};
pub use location::{RemoteRoot, SyncLocation, SyncMode};
pub use newtypes::*;
pub use snapshot::{
    FileEntry, FolderEntry, IdentityRecord, ItemKind, RemotePayload, TreeSnapshot,
};
pub use task::{ActionKind, DoneTask, PathTask, RelocateTask, Task, TaskItem, TaskLists};
