//! Snapshotable key-value stores
//!
//! The downloader persists trie nodes and contract code through a store with
//! two-phase write semantics: `set`/`put_indexed` buffer into a pending
//! overlay, reads observe the overlay before committed data, and `commit`
//! publishes the overlay atomically. A store dropped before `commit` loses
//! its uncommitted writes, which is exactly what crash recovery relies on.

use std::collections::HashMap;

use crate::{Hash, Result};

/// A key-value store with a pending overlay and atomic commit.
///
/// Hash-keyed entries (`get`/`set`/`key_exists`) hold content-addressed
/// payloads: trie nodes or code blobs whose key is the Keccak256 digest of
/// the value. Raw-keyed entries (`get_indexed`/`put_indexed`) hold bookkeeping
/// records such as the sync progress journal.
///
/// Implementations are not required to be internally synchronized; callers
/// that share a store across tasks wrap it in their own exclusive lock.
pub trait SnapshotableStore: Send {
    /// Get a value by its content hash, observing pending writes first.
    fn get(&self, key: &Hash) -> Result<Option<Vec<u8>>>;

    /// Buffer a hash-keyed write into the pending overlay.
    fn set(&mut self, key: Hash, value: Vec<u8>);

    /// Check whether a hash is present (pending or committed).
    fn key_exists(&self, key: &Hash) -> Result<bool>;

    /// Get a raw-keyed value, observing pending writes first.
    fn get_indexed(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Buffer a raw-keyed write into the pending overlay.
    fn put_indexed(&mut self, key: &[u8], value: Vec<u8>);

    /// Publish all pending writes atomically.
    fn commit(&mut self) -> Result<()>;

    /// Number of pending (uncommitted) writes.
    fn pending_len(&self) -> usize;
}

/// In-memory store used for tests and light deployments.
#[derive(Debug, Default)]
pub struct MemoryStore {
    committed: HashMap<Vec<u8>, Vec<u8>>,
    pending: HashMap<Vec<u8>, Vec<u8>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed entries.
    pub fn committed_len(&self) -> usize {
        self.committed.len()
    }

    /// Discard all pending writes without committing them.
    pub fn discard_pending(&mut self) {
        self.pending.clear();
    }

    fn lookup(&self, key: &[u8]) -> Option<&Vec<u8>> {
        self.pending.get(key).or_else(|| self.committed.get(key))
    }
}

impl SnapshotableStore for MemoryStore {
    fn get(&self, key: &Hash) -> Result<Option<Vec<u8>>> {
        Ok(self.lookup(key.as_slice()).cloned())
    }

    fn set(&mut self, key: Hash, value: Vec<u8>) {
        self.pending.insert(key.to_vec(), value);
    }

    fn key_exists(&self, key: &Hash) -> Result<bool> {
        Ok(self.lookup(key.as_slice()).is_some())
    }

    fn get_indexed(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.lookup(key).cloned())
    }

    fn put_indexed(&mut self, key: &[u8], value: Vec<u8>) {
        self.pending.insert(key.to_vec(), value);
    }

    fn commit(&mut self) -> Result<()> {
        for (key, value) in self.pending.drain() {
            self.committed.insert(key, value);
        }
        Ok(())
    }

    fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
