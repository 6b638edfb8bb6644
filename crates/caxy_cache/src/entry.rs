use std::time::Instant;

use chrono::{DateTime, Utc};

/// One cached origin response body.
///
/// Entries are created inside the store on insertion and never mutated
/// afterwards, apart from `last_access` and their list links.
#[derive(Clone, Debug)]
pub struct CacheEntry {
    /// Canonical target URL; also the index key.
    pub url: String,
    /// Response body exactly as received from the origin.
    pub data: Vec<u8>,
    /// Wall-clock insertion time, emitted to clients as `X-Cache-Date`.
    pub inserted_at: DateTime<Utc>,
    /// Monotonic timestamp of the last successful lookup.
    pub last_access: Instant,
}

impl CacheEntry {
    pub(crate) fn new(url: String, data: Vec<u8>) -> Self {
        Self {
            url,
            data,
            inserted_at: Utc::now(),
            last_access: Instant::now(),
        }
    }

    /// Size charged against the cache capacity: body bytes plus key bytes.
    pub fn accounted_size(&self) -> usize {
        self.data.len() + self.url.len()
    }
}
