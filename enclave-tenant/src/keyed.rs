//! Per-key async mutual exclusion.
//!
//! The map itself is guarded by a short synchronous lock that is only held
//! to look up or prune a key; waiting happens on the per-key async mutex.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// A set of async mutexes created on demand, one per key.
#[derive(Debug, Default)]
pub struct KeyedLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl KeyedLocks {
    /// Create an empty lock set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    pub async fn lock(&self, key: &str) -> KeyedGuard<'_> {
        let lock = {
            let mut locks = self.locks.lock();
            locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        let guard = lock.clone().lock_owned().await;
        KeyedGuard {
            owner: self,
            key: key.to_string(),
            lock: Some(lock),
            guard: Some(guard),
        }
    }

    /// Number of keys currently locked or waited on.
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    /// Whether no key is locked or waited on.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Exclusive access to one key; released on drop.
#[derive(Debug)]
pub struct KeyedGuard<'a> {
    owner: &'a KeyedLocks,
    key: String,
    lock: Option<Arc<AsyncMutex<()>>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyedGuard<'_> {
    /// The locked key.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for KeyedGuard<'_> {
    fn drop(&mut self) {
        // The owned guard holds its own clone of the Arc; drop it first.
        self.guard.take();
        if let Some(lock) = self.lock.take() {
            let mut locks = self.owner.locks.lock();
            // Clones are only taken under the map lock, so a count of two
            // (the map and us) means nobody else is holding or waiting.
            if Arc::strong_count(&lock) == 2 {
                locks.remove(&self.key);
            }
        }
    }
}
