//! Sync work items and request batches
//!
//! The unit of work is a [`SyncItem`]: one node-data hash to fetch, tagged
//! with the keyspace it belongs to and the scheduling metadata the planner
//! uses. Items travel to the executor grouped into a [`NodeDataBatch`],
//! whose responses are positionally aligned with the requests.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use fastsync_storage::Hash;

/// Which keyspace a node-data hash belongs to.
///
/// The kind determines the destination store and how the payload is
/// expanded: state and storage nodes are decoded for children, code blobs
/// are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    /// Node of the top-level state trie
    State,
    /// Node of a per-account storage trie
    Storage,
    /// Contract code blob
    Code,
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::State => write!(f, "state"),
            Self::Storage => write!(f, "storage"),
            Self::Code => write!(f, "code"),
        }
    }
}

/// One node-data hash awaiting download.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncItem {
    /// Expected Keccak256 digest of the payload
    pub hash: Hash,
    /// Keyspace the hash belongs to
    pub kind: NodeKind,
    /// Depth below the root of the owning trie (a storage root resets to 0)
    pub level: u32,
    /// Dispatch priority; lower is dispatched first
    pub priority: f32,
    /// Marks the overall root; its save is the terminal event of a sync
    pub is_root: bool,
}

impl SyncItem {
    /// Create a work item.
    pub fn new(hash: Hash, kind: NodeKind, level: u32, priority: f32) -> Self {
        Self {
            hash,
            kind,
            level,
            priority,
            is_root: false,
        }
    }

    /// Create the root work item that seeds a sync.
    pub fn root(hash: Hash) -> Self {
        Self {
            hash,
            kind: NodeKind::State,
            level: 0,
            priority: 1.0,
            is_root: true,
        }
    }
}

/// Outcome of admitting a hash through the dedup gate.
///
/// The three values drive three distinct control paths in the response
/// handler: only `Added` and `AlreadyRequested` leave a parent waiting on
/// the child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddNodeResult {
    /// The hash was pushed to the pending queue
    Added,
    /// The hash is already queued or in flight; the new parent was linked
    AlreadyRequested,
    /// The hash is already present in a store or the dedup cache
    AlreadySaved,
}

/// A batch of node-data requests with their (optional) responses.
///
/// Responses are positionally aligned with `requested`; a `None` slot means
/// the peer did not return that item. The responses vector may be shorter
/// than the request vector, in which case the tail counts as missing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDataBatch {
    /// Items requested from the peer
    pub requested: Vec<SyncItem>,
    /// Payloads returned by the peer, aligned with `requested`
    pub responses: Option<Vec<Option<Bytes>>>,
}

impl NodeDataBatch {
    /// Create an unanswered request batch.
    pub fn new(requested: Vec<SyncItem>) -> Self {
        Self {
            requested,
            responses: None,
        }
    }

    /// Number of requested items.
    pub fn len(&self) -> usize {
        self.requested.len()
    }

    /// Whether the batch carries no requests.
    pub fn is_empty(&self) -> bool {
        self.requested.is_empty()
    }

    /// Response slot for request index `i`, flattened across the
    /// absent-vector, short-vector and empty-slot cases.
    pub fn response(&self, i: usize) -> Option<&Bytes> {
        self.responses.as_ref()?.get(i)?.as_ref()
    }
}
