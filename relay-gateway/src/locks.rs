//! Per-key async locks.
//!
//! Operations on the same conversation id are serialized while distinct ids
//! proceed in parallel. Entries nobody holds or waits on are pruned as the
//! table grows.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedMutexGuard;

/// Held for as long as the key is locked.
pub type KeyGuard = OwnedMutexGuard<()>;

const PRUNE_THRESHOLD: usize = 64;

/// Table of async mutexes keyed by string.
#[derive(Default)]
pub struct KeyedLocks {
    table: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    pub async fn lock(&self, key: &str) -> KeyGuard {
        self.entry(key).lock_owned().await
    }

    /// Take `key` if nobody holds it.
    pub fn try_lock(&self, key: &str) -> Option<KeyGuard> {
        self.entry(key).try_lock_owned().ok()
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.table().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entry(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut table = self.table();
        if table.len() >= PRUNE_THRESHOLD {
            // The table's own reference is the only one left for idle keys.
            table.retain(|_, lock| Arc::strong_count(lock) > 1);
        }
        table.entry(key.to_string()).or_default().clone()
    }

    fn table(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<tokio::sync::Mutex<()>>>> {
        self.table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
