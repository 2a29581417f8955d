//! Fastsync Storage Layer
//!
//! This crate provides the storage infrastructure for the fastsync downloader:
//!
//! - **SnapshotableStore**: a key-value store abstraction with a pending
//!   overlay and atomic commit, so a batch of node writes either becomes
//!   durable as a unit or is discarded
//! - **MemoryStore / RocksStore**: in-memory and RocksDB-backed
//!   implementations of the store abstraction
//! - **Trie-node codec**: branch/extension/leaf node encoding and decoding,
//!   plus a minimal Merkle Patricia Trie builder for the serving side
//! - **Account codec**: account payloads carried by state-trie leaves
//!   (code hash and storage root references)

#![deny(missing_docs)]
#![deny(unsafe_code)]

pub mod account;
pub mod db;
pub mod store;
pub mod trie;

// Re-exports for convenience
pub use account::Account;
pub use db::{Database, DatabaseConfig, RocksStore};
pub use store::{MemoryStore, SnapshotableStore};
pub use trie::{MerkleTrie, TrieNode};

use sha3::{Digest, Keccak256};
use thiserror::Error;

/// A 32-byte hash type used throughout the storage layer
pub type Hash = [u8; 32];

/// A 20-byte address type
pub type Address = [u8; 20];

/// Empty hash constant (Keccak256 of empty string)
pub const EMPTY_HASH: Hash = [
    0xc5, 0xd2, 0x46, 0x01, 0x86, 0xf7, 0x23, 0x3c, 0x92, 0x7e, 0x7d, 0xb2, 0xdc, 0xc7, 0x03, 0xc0,
    0xe5, 0x00, 0xb6, 0x53, 0xca, 0x82, 0x27, 0x3b, 0x7b, 0xfa, 0xd8, 0x04, 0x5d, 0x85, 0xa4, 0x70,
];

/// Empty trie root (the well-known digest of the empty trie)
pub const EMPTY_ROOT: Hash = [
    0x56, 0xe8, 0x1f, 0x17, 0x1b, 0xcc, 0x55, 0xa6, 0xff, 0x83, 0x45, 0xe6, 0x92, 0xc0, 0xf8, 0x6e,
    0x5b, 0x48, 0xe0, 0x1b, 0x99, 0x6c, 0xad, 0xc0, 0x01, 0x62, 0x2f, 0xb5, 0xe3, 0x63, 0xb4, 0x21,
];

/// Zero hash constant
pub const ZERO_HASH: Hash = [0u8; 32];

/// Storage error types
#[derive(Error, Debug)]
pub enum StorageError {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Key not found
    #[error("Key not found: {0}")]
    NotFound(String),

    /// Column family not found
    #[error("Column family not found: {0}")]
    ColumnFamilyNotFound(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;

/// Compute Keccak256 hash of data
#[inline]
pub fn keccak256(data: &[u8]) -> Hash {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

/// Compute Keccak256 hash of multiple data slices
#[inline]
pub fn keccak256_concat(data: &[&[u8]]) -> Hash {
    let mut hasher = Keccak256::new();
    for d in data {
        hasher.update(d);
    }
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}
