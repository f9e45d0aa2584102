//! Keyed async mutex for serializing bulk operations.
//!
//! Long-running idempotent operations (generator reset, full-store
//! re-embedding sweeps) are serialized per logical key so concurrent callers
//! await the in-flight operation instead of duplicating work. Ordinary embed
//! calls never take these locks.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Map of named async mutexes, created on first use.
#[derive(Debug, Default)]
pub struct KeyedLocks {
    inner: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl KeyedLocks {
    /// Creates an empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the lock for `key`, awaiting any in-flight holder.
    ///
    /// The guard is owned, so it can be held across await points for the
    /// duration of the bulk operation.
    pub async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            map.entry(key.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}
