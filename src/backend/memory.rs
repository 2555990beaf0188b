use async_trait::async_trait;
use moka::future::Cache;
use std::time::{Duration, SystemTime};

use super::{CacheBackend, CacheEntry};
use crate::error::CacheError;

/// An in-memory [`CacheBackend`] implementation backed by [`moka`].
///
/// The backend is cheap to clone and shares a single underlying cache.
/// Entries past their TTL are dropped on the next read; a zero TTL stores
/// nothing.
#[derive(Clone)]
pub struct InMemoryBackend {
    cache: Cache<String, StoredEntry>,
}

#[derive(Clone)]
struct StoredEntry {
    entry: CacheEntry,
    expires_at: SystemTime,
}

impl InMemoryBackend {
    /// Creates a new in-memory cache with the provided `max_capacity`.
    ///
    /// The capacity is expressed in number of cached entries, not bytes.
    pub fn new(max_capacity: u64) -> Self {
        let cache = Cache::builder().max_capacity(max_capacity).build();
        Self { cache }
    }

    /// Number of entries currently held, including ones not yet evicted.
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

#[async_trait]
impl CacheBackend for InMemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let Some(stored) = self.cache.get(key).await else {
            return Ok(None);
        };

        if SystemTime::now() >= stored.expires_at {
            self.cache.invalidate(key).await;
            return Ok(None);
        }

        Ok(Some(stored.entry))
    }

    async fn set(&self, key: String, entry: CacheEntry, ttl: Duration) -> Result<(), CacheError> {
        if ttl.is_zero() {
            return Ok(());
        }

        let stored = StoredEntry {
            entry,
            expires_at: SystemTime::now() + ttl,
        };
        self.cache.insert(key, stored).await;
        Ok(())
    }
}
