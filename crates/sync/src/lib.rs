//! # Fastsync Downloader
//!
//! This crate implements a pipelined fast-sync downloader for a
//! Merkle-Patricia-trie-backed blockchain state store. Given the hash of a
//! state-trie root, it retrieves every trie node, contract code blob and
//! storage-trie node reachable from that root and persists them, keyed by
//! content hash, into two local stores.
//!
//! ## Key Components
//!
//! - **[`StateDownloader`]**: drives the sync — plans request batches,
//!   validates responses, expands trie children and persists nodes.
//!
//! - **[`PendingQueue`]**: priority-stratified LIFO of work items awaiting
//!   dispatch; the LIFO bias keeps the walk depth-first.
//!
//! - **[`DependencyTracker`]**: guarantees children are persisted before
//!   the parents that reference them, propagating completion root-ward.
//!
//! - **[`DedupCache`]**: bounded LRU of recently-saved hashes that spares
//!   the stores the common rediscovery probes.
//!
//! - **[`SyncProgress`]**: crash-safe counter journal persisted with every
//!   batch commit.
//!
//! - **[`NodeDataProvider`]**: the serving half — answers node-data
//!   requests from the local stores.
//!
//! ## Sync Flow
//!
//! 1. Seed: the root hash enters the pending queue.
//! 2. Plan: the queue drains into batches of at most
//!    [`MAX_REQUEST_SIZE`] items, one batch in flight at a time.
//! 3. Execute: a [`RequestExecutor`] dispatches the batch to a peer.
//! 4. Validate: every response is hashed and checked against its request.
//! 5. Expand: decoded nodes enqueue their children; parents with
//!    outstanding children wait in the dependency tracker.
//! 6. Persist: completed nodes are written children-first; the progress
//!    journal commits with the batch.
//!
//! The loop ends when the queue is empty and nothing is in flight, at
//! which point the root itself has been saved and the walk is complete.
//!
//! ## Example
//!
//! ```rust,ignore
//! use fastsync_storage::MemoryStore;
//! use fastsync_sync::{StateDownloader, SyncConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! async fn sync_state(root: [u8; 32]) -> Result<u64, fastsync_sync::SyncError> {
//!     let downloader =
//!         StateDownloader::new(SyncConfig::default(), MemoryStore::new(), MemoryStore::new());
//!     downloader.set_executor(my_executor());
//!
//!     let consumed = downloader.sync(CancellationToken::new(), root).await?;
//!     assert!(downloader.is_fully_synced(&root)?);
//!     Ok(consumed)
//! }
//! ```
//!
//! ## Restartability
//!
//! Saved nodes are skipped on re-entry via store probes and the dedup
//! cache, so an interrupted sync resumes by re-walking only the unsaved
//! frontier. The progress journal is committed strictly after the nodes it
//! accounts for, so it never overstates what the state store holds.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod cache;
pub mod deps;
pub mod item;
pub mod progress;
pub mod provider;
pub mod queue;
pub mod sync;

// Re-export main types at crate root
pub use cache::DedupCache;
pub use deps::{DependencyTracker, DependentNode};
pub use item::{AddNodeResult, NodeDataBatch, NodeKind, SyncItem};
pub use progress::{progress_key, SyncProgress};
pub use provider::{LoopbackExecutor, NodeDataProvider};
pub use queue::PendingQueue;
pub use sync::{RequestExecutor, Result, StateDownloader, SyncConfig, SyncError};

/// Maximum number of items in one request batch
pub const MAX_REQUEST_SIZE: usize = 384;

/// Maximum number of request batches in flight
pub const MAX_PENDING_REQUESTS: usize = 1;

/// Default capacity of the dedup cache of recently-saved hashes
pub const DEFAULT_DEDUP_CACHE_SIZE: usize = 65_536;
