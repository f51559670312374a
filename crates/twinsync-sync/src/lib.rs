//! twinsync Sync - Reconciliation and execution pipeline
//!
//! Provides:
//! - Snapshot delta computation with rename/move detection by identity
//! - Task planning with ignore rules and sync-mode gating
//! - Bounded concurrent task execution with retry
//! - Crash-safe folding of completed work into saved snapshots
//!
//! ## Modules
//!
//! - [`delta`] - Delta Engine comparing two snapshots of one side
//! - [`ignore`] - gitignore-style matcher and selective-sync exclusions
//! - [`planner`] - Task Planner turning two deltas into action lists
//! - [`retry`] - Error classification and fixed-delay retry
//! - [`executor`] - Task Executor running action lists under concurrency limits
//! - [`quota`] - Process-wide storage-full gate for uploads
//! - [`applier`] - State Applier folding done tasks into snapshots
//! - [`journal`] - Append-only done-task journal
//! - [`tree_store`] - Saved "last tree" per location
//! - [`store`] - Typed helpers over the configuration store
//! - [`filesystem`] - Local filesystem adapter
//! - [`watcher`] - notify-based local change watcher
//! - [`engine`] - Sync loop orchestrator
//! - [`telemetry`] - tracing subscriber setup

pub mod applier;
pub mod delta;
pub mod engine;
pub mod executor;
pub mod filesystem;
pub mod ignore;
pub mod journal;
pub mod planner;
pub mod quota;
pub mod retry;
pub mod store;
pub mod telemetry;
pub mod tree_store;
pub mod watcher;

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during synchronization operations
#[derive(Debug, Error)]
pub enum SyncError {
    /// An I/O error occurred during file operations
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// A persisted record could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The done-task journal has an unreadable record before its end
    #[error("Journal corrupted at {path} line {line}: {reason}")]
    JournalCorrupted {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    /// The configuration store failed
    #[error("Config store error: {0}")]
    Store(#[source] anyhow::Error),

    /// A domain-level error propagated from twinsync-core
    #[error("Domain error: {0}")]
    DomainError(#[from] twinsync_core::domain::errors::DomainError),
}
