//! Dedup cache of recently-saved hashes
//!
//! A bounded LRU probed before any store hit, so the common case of a hash
//! rediscovered shortly after it was saved never touches the database.

use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;

use fastsync_storage::Hash;

use crate::DEFAULT_DEDUP_CACHE_SIZE;

/// Set-semantics LRU over saved hashes.
pub struct DedupCache {
    inner: Mutex<LruCache<Hash, ()>>,
}

impl DedupCache {
    /// Create a cache with the given capacity (clamped to at least 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1))
            .unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Whether the hash was recently saved; a hit refreshes its recency.
    pub fn contains(&self, hash: &Hash) -> bool {
        self.inner.lock().get(hash).is_some()
    }

    /// Record a saved hash, evicting the least recently used on overflow.
    pub fn insert(&self, hash: Hash) {
        self.inner.lock().put(hash, ());
    }

    /// Number of cached hashes.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl Default for DedupCache {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_CACHE_SIZE)
    }
}
