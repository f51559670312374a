//! Port definitions (hexagonal architecture interfaces)
//!
//! This module defines the port traits that form the boundaries of the
//! hexagonal architecture. Ports are interfaces that the sync pipeline
//! depends on, but whose implementations live in adapter modules.
//!
//! ## Ports Overview
//!
//! - [`ILocalSnapshotProvider`] - Scans a local sync root into a snapshot
//! - [`ILocalFileOps`] - Local file operations driven by the executor
//! - [`IRemoteSnapshotProvider`] - Lists a remote folder tree
//! - [`IRemoteFileOps`] - Remote file operations driven by the executor
//! - [`IConfigStore`] - Key-value runtime configuration
//! - [`IEventSink`] - Progress and phase notifications

pub mod config_store;
pub mod events;
pub mod local_filesystem;
pub mod remote_provider;

pub use config_store::{IConfigStore, InMemoryConfigStore};
pub use events::{CyclePhase, IEventSink, NullEventSink, SyncEvent, TaskPhase};
pub use local_filesystem::{ILocalFileOps, ILocalSnapshotProvider, LocalScan, LocalStat, SkippedEntry};
pub use remote_provider::{IRemoteFileOps, IRemoteSnapshotProvider, RemoteError};
