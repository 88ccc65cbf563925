//! Keyed async lock
//!
//! Serializes operations against the same key: each `acquire` queues behind
//! the prior holder of that key (tokio mutexes hand off in FIFO order) while
//! operations on different keys proceed independently.
//!
//! # Scope of the guarantee
//!
//! This linearizes mutations **within one process only**. When a store lacks
//! transactions and multiple service instances share it, this lock is not
//! sufficient: deployments must use backend transactions, optimistic
//! CAS-with-retry, or a designated owner process per key. The boss store
//! adapter makes that choice explicit instead of falling back silently.

use hashbrown::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Map from key to a shared per-key mutex.
#[derive(Default)]
pub struct KeyedLock {
    entries: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

/// Held lock for one key; released on drop.
pub struct KeyedLockGuard {
    _guard: OwnedMutexGuard<()>,
}

impl KeyedLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `key`, waiting behind any current holder.
    pub async fn acquire(&self, key: &str) -> KeyedLockGuard {
        let entry = {
            let mut entries = self.entries.lock().expect("keyed lock registry poisoned");
            // Prune keys nobody holds or waits on (registry holds the only Arc)
            entries.retain(|_, lock| Arc::strong_count(lock) > 1);
            entries
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };

        KeyedLockGuard {
            _guard: entry.lock_owned().await,
        }
    }

    /// Number of live key entries (test helper).
    pub fn tracked_keys(&self) -> usize {
        self.entries
            .lock()
            .expect("keyed lock registry poisoned")
            .len()
    }
}
