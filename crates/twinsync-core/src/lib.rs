//! twinsync Core - Domain types and port definitions
//!
//! This crate contains the hexagonal architecture core with:
//! - **Domain entities** - `TreeSnapshot`, `Delta`, `Task`, `DoneTask`, `SyncLocation`, `SyncIssue`
//! - **Port definitions** - Traits for adapters: `ILocalSnapshotProvider`, `ILocalFileOps`,
//!   `IRemoteSnapshotProvider`, `IRemoteFileOps`, `IConfigStore`, `IEventSink`
//! - **Configuration** - Typed YAML configuration with validation
//!
//! # Architecture
//!
//! This crate follows the hexagonal (ports & adapters) architecture pattern.
//! The domain module contains pure data types with no I/O.
//! Ports define trait interfaces that the sync pipeline consumes and adapter
//! crates implement.

pub mod config;
pub mod domain;
pub mod ports;
