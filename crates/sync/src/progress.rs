//! Persisted sync progress journal
//!
//! Ten monotonically non-decreasing counters serialized as a fixed sequence
//! of little-endian u64 values and stored in the code store under a
//! well-known key. The record is written inside every batch commit and only
//! becomes durable with the batch itself, so the journal never overstates
//! what the state store actually holds.

use serde::{Deserialize, Serialize};
use tracing::warn;

use fastsync_storage::{keccak256, Hash, SnapshotableStore};

/// Raw key the progress record is stored under in the code store.
pub fn progress_key() -> Hash {
    keccak256(b"fast_sync_progress")
}

/// Counters describing everything a sync session has done so far.
///
/// Field order is the wire order of the persisted record; do not reorder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncProgress {
    /// Response items accepted (digest verified)
    pub consumed: u64,
    /// Storage-trie nodes persisted
    pub saved_storage: u64,
    /// State-trie nodes persisted
    pub saved_state: u64,
    /// Nodes persisted across all kinds
    pub saved_nodes: u64,
    /// Account leaves fully resolved (code and storage present)
    pub saved_accounts: u64,
    /// Code blobs persisted
    pub saved_code: u64,
    /// Items handed to the executor
    pub requested: u64,
    /// Store existence probes performed
    pub db_checks: u64,
    /// Probes that found the key already present
    pub state_was_there: u64,
    /// Probes that found the key absent
    pub state_was_not_there: u64,
}

impl SyncProgress {
    /// Encode the record for persistence.
    pub fn encode(&self) -> Vec<u8> {
        bincode::serialize(self).unwrap_or_default()
    }

    /// Decode a persisted record.
    pub fn decode(data: &[u8]) -> Option<Self> {
        bincode::deserialize(data).ok()
    }

    /// Load the record from a code store, tolerating absent or corrupt
    /// data (a fresh default is returned and the corruption logged).
    pub fn load<S: SnapshotableStore>(code_store: &S) -> Self {
        let key = progress_key();
        match code_store.get_indexed(&key) {
            Ok(Some(bytes)) => Self::decode(&bytes).unwrap_or_else(|| {
                warn!("Corrupt sync progress record, starting from zero");
                Self::default()
            }),
            Ok(None) => Self::default(),
            Err(e) => {
                warn!("Failed to read sync progress record: {e}");
                Self::default()
            }
        }
    }

    /// Buffer the record into a code store's pending overlay.
    pub fn store<S: SnapshotableStore>(&self, code_store: &mut S) {
        code_store.put_indexed(&progress_key(), self.encode());
    }
}

impl std::fmt::Display for SyncProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "consumed {}, saved {} nodes ({} state / {} storage / {} code, {} accounts), \
             requested {}, db checks {} ({} hits / {} misses)",
            self.consumed,
            self.saved_nodes,
            self.saved_state,
            self.saved_storage,
            self.saved_code,
            self.saved_accounts,
            self.requested,
            self.db_checks,
            self.state_was_there,
            self.state_was_not_there,
        )
    }
}
