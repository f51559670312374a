//! Configuration store port (driven/secondary port)
//!
//! A generic string-keyed store holding runtime settings: sync locations,
//! the global pause flag, ignore patterns, selective-sync exclusions and the
//! issue list. The pipeline re-reads it at the start of every cycle.
//!
//! ## Design Notes
//!
//! - Values are JSON documents so adapters need no knowledge of the types.
//! - `InMemoryConfigStore` is the reference adapter; a file-backed adapter
//!   lives in the sync crate.

use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::domain::newtypes::LocationId;

// ============================================================================
// Keys
// ============================================================================

/// Key holding the array of configured sync locations
pub const KEY_SYNC_LOCATIONS: &str = "syncLocations";

/// Key holding the global pause flag
pub const KEY_PAUSED: &str = "paused";

/// Key holding the issue list
pub const KEY_SYNC_ISSUES: &str = "syncIssues";

/// Key holding the ignore-pattern text of a location
pub fn ignore_patterns_key(location: &LocationId) -> String {
    format!("ignorePatterns:{location}")
}

/// Key holding the selective-sync exclusion set of a location
pub fn selective_sync_key(location: &LocationId) -> String {
    format!("selectiveSync:{location}")
}

// ============================================================================
// IConfigStore trait
// ============================================================================

/// Port trait for the key-value configuration store
#[async_trait::async_trait]
pub trait IConfigStore: Send + Sync {
    /// Reads a value, returning `None` for unknown keys
    async fn get(&self, key: &str) -> anyhow::Result<Option<serde_json::Value>>;

    /// Writes a value, replacing any previous one
    async fn set(&self, key: &str, value: serde_json::Value) -> anyhow::Result<()>;

    /// Removes a key; removing an unknown key is not an error
    async fn remove(&self, key: &str) -> anyhow::Result<()>;
}

// ============================================================================
// InMemoryConfigStore
// ============================================================================

/// Process-local store, lost on exit
#[derive(Debug, Default)]
pub struct InMemoryConfigStore {
    values: RwLock<BTreeMap<String, serde_json::Value>>,
}

impl InMemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl IConfigStore for InMemoryConfigStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
        let values = self
            .values
            .read()
            .map_err(|_| anyhow::anyhow!("config store lock poisoned"))?;
        Ok(values.get(key).cloned())
    }

    async fn set(&self, key: &str, value: serde_json::Value) -> anyhow::Result<()> {
        let mut values = self
            .values
            .write()
            .map_err(|_| anyhow::anyhow!("config store lock poisoned"))?;
        values.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> anyhow::Result<()> {
        let mut values = self
            .values
            .write()
            .map_err(|_| anyhow::anyhow!("config store lock poisoned"))?;
        values.remove(key);
        Ok(())
    }
}
