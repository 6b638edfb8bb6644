//! Shared, mutex-serialized handle over the LRU store.

use std::sync::Mutex;

use anyhow::anyhow;
use tracing::error;

use crate::entry::CacheEntry;
use crate::lru::LruCache;
use crate::stats::CacheStats;

/// Process-wide cache handle.
///
/// Every operation runs as one critical section behind a plain mutex; no
/// I/O happens while it is held. A plain mutex rather than a reader lock
/// because lookups promote the entry and therefore mutate the list.
pub struct CacheStore {
    inner: Mutex<LruCache>,
}

impl CacheStore {
    pub fn new(max_bytes: usize, max_entry_bytes: usize) -> Self {
        Self {
            inner: Mutex::new(LruCache::new(max_bytes, max_entry_bytes)),
        }
    }

    /// Look up `url`. A hit clones the entry out of the lock so the caller
    /// holds stable bytes even if a later insertion evicts the slot.
    pub fn find(&self, url: &str) -> Option<CacheEntry> {
        match self.inner.lock() {
            Ok(mut inner) => inner.find(url).cloned(),
            Err(e) => {
                error!(
                    target: "caxy::cache",
                    error = %e,
                    "Cache lock poisoned; treating lookup as a miss"
                );
                None
            }
        }
    }

    /// Insert `data` under `url`.
    ///
    /// `Ok(false)` means the entry was refused at admission; that is not an
    /// error, the next request for the URL will simply miss again.
    pub fn add(&self, data: Vec<u8>, url: &str) -> anyhow::Result<bool> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|e| anyhow!("cache lock poisoned: {e}"))?;
        Ok(inner.add(data, url))
    }

    /// Drop every entry and reset the counters.
    pub fn clear(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.clear();
        }
    }

    /// Snapshot occupancy and counters.
    pub fn stats(&self) -> CacheStats {
        match self.inner.lock() {
            Ok(inner) => inner.stats(),
            Err(_) => CacheStats::default(),
        }
    }
}
