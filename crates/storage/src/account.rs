//! Account codec
//!
//! A state-trie leaf carries an encoded [`Account`]. The downloader decodes
//! it only to discover the two outgoing references: the contract code hash
//! and the storage-trie root.

use serde::{Deserialize, Serialize};

use crate::{Hash, Result, StorageError, EMPTY_HASH, EMPTY_ROOT};

/// Account state as stored in state-trie leaves
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Transaction nonce
    pub nonce: u64,
    /// Account balance
    pub balance: u128,
    /// Hash of the account's contract code (`EMPTY_HASH` if no code)
    pub code_hash: Hash,
    /// Root hash of the account's storage trie (`EMPTY_ROOT` if none)
    pub storage_root: Hash,
}

impl Account {
    /// Create a new empty account
    pub fn new() -> Self {
        Self {
            nonce: 0,
            balance: 0,
            code_hash: EMPTY_HASH,
            storage_root: EMPTY_ROOT,
        }
    }

    /// Check if this account references contract code
    pub fn is_contract(&self) -> bool {
        self.code_hash != EMPTY_HASH
    }

    /// Check if this account references a storage trie
    pub fn has_storage(&self) -> bool {
        self.storage_root != EMPTY_ROOT
    }

    /// Encode the account for storage in a leaf value
    pub fn encode(&self) -> Vec<u8> {
        bincode::serialize(self).unwrap_or_default()
    }

    /// Decode an account from leaf-value bytes
    pub fn decode(data: &[u8]) -> Result<Self> {
        bincode::deserialize(data).map_err(|e| StorageError::Serialization(e.to_string()))
    }
}
