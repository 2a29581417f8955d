//! Parent/child save-dependency tracking
//!
//! A branch, extension or account leaf must not be persisted until every
//! child it references is persisted. The tracker holds each waiting parent
//! in an arena keyed by the parent's own hash, and maps every awaited child
//! hash to the set of parent hashes blocked on it. Keying parents by hash
//! gives the required identity semantics for free: a parent registered
//! twice coalesces into one entry, and one decrement per arriving child
//! converges its counter.
//!
//! Cycles cannot occur: children are referenced by content hash, so the
//! dependency graph is a DAG rooted at the sync root.

use std::collections::{HashMap, HashSet};

use fastsync_storage::Hash;

use crate::item::SyncItem;

/// A fetched parent node waiting for its children to be persisted.
#[derive(Debug, Clone)]
pub struct DependentNode {
    /// The parent's own work item
    pub item: SyncItem,
    /// The parent's payload, written once the counter reaches zero
    pub payload: Vec<u8>,
    /// Number of children not yet persisted
    pub missing_children: u32,
    /// Whether this parent is an account leaf (for progress accounting)
    pub is_account: bool,
}

/// Dependency map between unsaved children and their waiting parents.
#[derive(Debug, Default)]
pub struct DependencyTracker {
    /// child hash -> hashes of parents blocked on it
    waiting: HashMap<Hash, HashSet<Hash>>,
    /// parent hash -> the parent entry, while its counter is positive
    parents: HashMap<Hash, DependentNode>,
}

impl DependencyTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `parent` is blocked on `child`.
    ///
    /// The edge may be recorded before the parent entry itself is
    /// registered; the handler registers the parent once its final counter
    /// is known.
    pub fn add_edge(&mut self, child: Hash, parent: Hash) {
        self.waiting.entry(child).or_default().insert(parent);
    }

    /// Register a waiting parent. Must only be called with a positive
    /// counter; completed parents are saved instead of registered.
    pub fn register_parent(&mut self, node: DependentNode) {
        debug_assert!(node.missing_children > 0);
        self.parents.insert(node.item.hash, node);
    }

    /// Whether any parent is currently awaiting `child`.
    pub fn awaits(&self, child: &Hash) -> bool {
        self.waiting.contains_key(child)
    }

    /// A child was persisted: decrement every parent blocked on it and
    /// return the parents whose counter reached zero, removed from the
    /// arena. The await entry for the child is removed as part of the
    /// cascade.
    pub fn mark_saved(&mut self, child: &Hash) -> Vec<DependentNode> {
        let Some(parent_hashes) = self.waiting.remove(child) else {
            return Vec::new();
        };

        let mut completed = Vec::new();
        for parent_hash in parent_hashes {
            let Some(mut entry) = self.parents.remove(&parent_hash) else {
                continue;
            };
            entry.missing_children = entry.missing_children.saturating_sub(1);
            if entry.missing_children == 0 {
                completed.push(entry);
            } else {
                self.parents.insert(parent_hash, entry);
            }
        }
        completed
    }

    /// Whether no child is awaited and no parent is registered.
    pub fn is_empty(&self) -> bool {
        self.waiting.is_empty() && self.parents.is_empty()
    }

    /// Number of awaited child hashes.
    pub fn len(&self) -> usize {
        self.waiting.len()
    }

    /// Drop all tracked state.
    pub fn clear(&mut self) {
        self.waiting.clear();
        self.parents.clear();
    }
}
