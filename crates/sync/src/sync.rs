//! State downloader core
//!
//! This module provides the main orchestration logic for fast state sync:
//! - Seeding the walk from a state root and driving it until quiescent
//! - Planning bounded request batches with an in-flight cap
//! - Validating responses cryptographically and expanding trie children
//! - Gating every discovered hash through the dedup/admission pipeline
//! - Persisting nodes children-first through the dependency tracker
//! - Journaling progress crash-safely alongside the batch commit
//!
//! ## Drive loop
//!
//! A single cooperative task drives one sync. The only suspension point is
//! the await on the executor; planning, validation, expansion, saving and
//! dependency resolution all run synchronously between suspensions. With
//! the default in-flight cap of one, the progress journal is only ever
//! committed while no request is outstanding, which is what makes the
//! on-disk record trustworthy after a crash.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use fastsync_storage::{
    keccak256, Account, Hash, SnapshotableStore, StorageError, TrieNode, EMPTY_HASH, EMPTY_ROOT,
};

use crate::cache::DedupCache;
use crate::deps::{DependencyTracker, DependentNode};
use crate::item::{AddNodeResult, NodeDataBatch, NodeKind, SyncItem};
use crate::progress::SyncProgress;
use crate::queue::PendingQueue;
use crate::{DEFAULT_DEDUP_CACHE_SIZE, MAX_PENDING_REQUESTS, MAX_REQUEST_SIZE};

/// Configuration for the state downloader
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Maximum number of items per request batch
    pub max_request_size: usize,

    /// Maximum number of batches in flight.
    ///
    /// The progress journal is only committed while no request is
    /// outstanding; raising this above one requires an implementation that
    /// preserves that gating.
    pub max_pending_requests: usize,

    /// Capacity of the dedup cache of recently-saved hashes
    pub dedup_cache_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_request_size: MAX_REQUEST_SIZE,
            max_pending_requests: MAX_PENDING_REQUESTS,
            dedup_cache_size: DEFAULT_DEDUP_CACHE_SIZE,
        }
    }
}

/// Errors surfaced by the state downloader
#[derive(Debug, Error)]
pub enum SyncError {
    /// The cancellation token fired; nothing was committed for the
    /// in-flight batch
    #[error("sync cancelled")]
    Cancelled,

    /// The peer returned no responses, or none of its responses were
    /// usable; the batch's items have been re-queued
    #[error("peer returned no usable data")]
    PeerReturnedNothing,

    /// A response digest did not match the requested hash; fatal for this
    /// executor binding, the batch replays against the next one
    #[error("peer returned data that does not match the requested hash")]
    InvalidPeerData,

    /// A node payload did not decode as any known trie-node variant
    #[error("unknown trie node encoding")]
    UnknownNode,

    /// A structural invariant did not hold; indicates a logic bug
    #[error("sync invariant broken: {0}")]
    InvariantBroken(String),

    /// No executor was configured before calling `sync`
    #[error("no request executor configured")]
    NoExecutor,

    /// Storage backend failure
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Result type for sync operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// Dispatches a node-data request batch to a remote peer.
///
/// Implementations own peer selection, wire encoding and timeouts. The
/// returned batch must carry the same `requested` items with `responses`
/// positionally aligned; `None` slots mean the peer did not return that
/// item. An implementation observing the cancellation token completes with
/// [`SyncError::Cancelled`].
#[async_trait]
pub trait RequestExecutor: Send + Sync {
    /// Execute one request batch against a peer.
    async fn execute_request(
        &self,
        cancel: CancellationToken,
        batch: NodeDataBatch,
    ) -> Result<NodeDataBatch>;
}

/// Pipelined downloader for a Merkle-Patricia-trie-backed state store.
///
/// Given a state root, walks the remote trie by hash, requesting nodes in
/// bounded batches and persisting them children-first into the state and
/// code stores. Restartable: saved nodes are skipped via store probes and a
/// dedup cache, and the progress journal survives across sessions.
pub struct StateDownloader<E, S> {
    config: SyncConfig,
    state_store: Arc<Mutex<S>>,
    code_store: Arc<Mutex<S>>,
    executor: RwLock<Option<Arc<E>>>,

    queue: PendingQueue,
    deps: Mutex<DependencyTracker>,
    dedup: DedupCache,
    /// Hashes whose code blob is bit-identical to a trie node; drained by
    /// the save path so the payload lands in both stores
    codes_same_as_nodes: Mutex<HashSet<Hash>>,

    /// The most recently planned batch, cleared when its commit completes
    last_request: Mutex<Option<NodeDataBatch>>,
    pending_requests: AtomicUsize,
    /// High-water mark of observed state-trie depths, for prioritization
    max_state_level: AtomicU32,
    last_root: Mutex<Option<Hash>>,

    progress: Mutex<SyncProgress>,
}

impl<E: RequestExecutor, S: SnapshotableStore> StateDownloader<E, S> {
    /// Create a downloader over the given stores, reloading any persisted
    /// progress journal from the code store.
    pub fn new(config: SyncConfig, state_store: S, code_store: S) -> Self {
        let progress = SyncProgress::load(&code_store);
        let dedup = DedupCache::new(config.dedup_cache_size);
        Self {
            config,
            state_store: Arc::new(Mutex::new(state_store)),
            code_store: Arc::new(Mutex::new(code_store)),
            executor: RwLock::new(None),
            queue: PendingQueue::new(),
            deps: Mutex::new(DependencyTracker::new()),
            dedup,
            codes_same_as_nodes: Mutex::new(HashSet::new()),
            last_request: Mutex::new(None),
            pending_requests: AtomicUsize::new(0),
            max_state_level: AtomicU32::new(0),
            last_root: Mutex::new(None),
            progress: Mutex::new(progress),
        }
    }

    /// Configure the request executor. Call once before the first sync;
    /// replacing it mid-sync is undefined.
    pub fn set_executor(&self, executor: Arc<E>) {
        *self.executor.write() = Some(executor);
    }

    /// Snapshot of the progress counters.
    pub fn progress(&self) -> SyncProgress {
        *self.progress.lock()
    }

    /// Shared handle to the state store.
    pub fn state_store(&self) -> Arc<Mutex<S>> {
        Arc::clone(&self.state_store)
    }

    /// Shared handle to the code store.
    pub fn code_store(&self) -> Arc<Mutex<S>> {
        Arc::clone(&self.code_store)
    }

    /// Whether the state store holds the given root.
    pub fn is_fully_synced(&self, root_hash: &Hash) -> Result<bool> {
        Ok(self.state_store.lock().key_exists(root_hash)?)
    }

    /// Download every node reachable from `root_hash` and return the
    /// cumulative consumed-nodes counter.
    ///
    /// Returns immediately for the empty-trie root. If the root differs
    /// from the previous session's, or the previous session left a request
    /// in flight, all in-memory scheduling state is rebuilt first (progress
    /// counters persist).
    pub async fn sync(&self, cancel: CancellationToken, root_hash: Hash) -> Result<u64> {
        if root_hash == EMPTY_ROOT {
            debug!("Empty state root, nothing to sync");
            return Ok(self.progress.lock().consumed);
        }

        self.reset_if_needed(root_hash);

        if self.queue.is_empty() {
            let admitted = self.add_node(SyncItem::root(root_hash), None, "initial", false)?;
            if admitted == AddNodeResult::AlreadySaved {
                debug!("State root {} already persisted", hex::encode(root_hash));
                return Ok(self.progress.lock().consumed);
            }
        }

        loop {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            let batches = self.prepare_requests()?;
            if batches.is_empty() {
                break;
            }

            let executor = self.executor.read().clone().ok_or(SyncError::NoExecutor)?;
            for batch in batches {
                let filled = executor.execute_request(cancel.clone(), batch).await?;
                self.handle_response(filled)?;
            }
        }

        let progress = self.progress.lock();
        info!("Sync pass finished: {}", *progress);
        Ok(progress.consumed)
    }

    /// Rebuild in-memory scheduling state when the root changed or the
    /// previous session ended with a request in flight.
    fn reset_if_needed(&self, root_hash: Hash) {
        let mut last_root = self.last_root.lock();
        let pending = self.pending_requests.load(Ordering::SeqCst);
        let root_changed = *last_root != Some(root_hash);
        if !root_changed && pending == 0 {
            return;
        }

        if root_changed {
            info!("Starting state sync for root {}", hex::encode(root_hash));
            // The depth high-water mark is monotonic within one trie; it
            // only restarts when the trie itself changes.
            self.max_state_level.store(0, Ordering::Relaxed);
        } else {
            warn!("Previous session left {pending} request(s) in flight, rebuilding sync state");
        }

        self.deps.lock().clear();
        self.queue.clear();
        *self.last_request.lock() = None;
        self.codes_same_as_nodes.lock().clear();
        self.pending_requests.store(0, Ordering::SeqCst);
        *last_root = Some(root_hash);
    }

    /// Drain the pending queue into request batches.
    ///
    /// Replays the last unacknowledged batch first, then builds batches of
    /// up to `max_request_size` items while the in-flight cap allows. The
    /// most recent batch occupies the last-request slot until its commit
    /// clears it.
    pub fn prepare_requests(&self) -> Result<Vec<NodeDataBatch>> {
        if let Some(last) = self.last_request.lock().take() {
            debug!(
                "Re-queueing {} items from the unacknowledged previous batch",
                last.len()
            );
            for item in last.requested {
                self.add_node(item, None, "last request", true)?;
            }
        }

        let mut batches = Vec::new();
        while !self.queue.is_empty()
            && self.pending_requests.load(Ordering::SeqCst) + batches.len()
                < self.config.max_pending_requests
        {
            let mut requested = Vec::with_capacity(self.config.max_request_size);
            while requested.len() < self.config.max_request_size {
                match self.queue.pop() {
                    Some(item) => requested.push(item),
                    None => break,
                }
            }
            if requested.is_empty() {
                break;
            }

            trace!("Planned a batch of {} items", requested.len());
            self.progress.lock().requested += requested.len() as u64;
            batches.push(NodeDataBatch::new(requested));
        }

        if let Some(last) = batches.last() {
            *self.last_request.lock() = Some(last.clone());
        }
        self.pending_requests
            .fetch_add(batches.len(), Ordering::SeqCst);
        Ok(batches)
    }

    /// Validate and apply one answered batch.
    ///
    /// Every present response digest is verified before anything is
    /// expanded, so a rejected batch performs no mutations and replays
    /// whole from the last-request slot. Accepted items are processed in
    /// request order; missing items are re-queued. The batch ends with the
    /// progress-gated two-store commit.
    pub fn handle_response(&self, batch: NodeDataBatch) -> Result<usize> {
        if batch.responses.is_none() {
            warn!("Peer returned no responses for a batch of {}", batch.len());
            return Err(SyncError::PeerReturnedNothing);
        }

        for (i, item) in batch.requested.iter().enumerate() {
            let Some(blob) = batch.response(i) else {
                continue;
            };
            let digest = keccak256(blob);
            if digest != item.hash {
                match batch.requested.iter().position(|r| r.hash == digest) {
                    Some(j) => warn!(
                        "Response {} hashes to the item requested at {} (expected {}); rejecting batch",
                        i,
                        j,
                        hex::encode(item.hash)
                    ),
                    None => warn!(
                        "Response {} hashes to {} instead of {}; rejecting batch",
                        i,
                        hex::encode(digest),
                        hex::encode(item.hash)
                    ),
                }
                return Err(SyncError::InvalidPeerData);
            }
        }

        let mut added = 0usize;
        for (i, item) in batch.requested.iter().enumerate() {
            match batch.response(i) {
                None => {
                    trace!("Response missing for {}", hex::encode(item.hash));
                    self.add_node(item.clone(), None, "missing", true)?;
                }
                Some(blob) => {
                    added += 1;
                    self.progress.lock().consumed += 1;
                    self.handle_node(item, blob)?;
                }
            }
        }

        self.commit_batch()?;
        *self.last_request.lock() = None;

        if added == 0 {
            warn!("Peer answered none of {} requested items", batch.len());
            return Err(SyncError::PeerReturnedNothing);
        }
        self.pending_requests.fetch_sub(1, Ordering::SeqCst);
        debug!("Handled a batch: {} items accepted", added);
        Ok(added)
    }

    /// Persist the progress journal and publish both stores.
    ///
    /// Lock and commit order is fixed: state store outer, code store
    /// inner; journal into the code store, commit code, commit state. A
    /// crash between the two commits leaves the code store ahead, which
    /// the state-store probe catches on restart.
    fn commit_batch(&self) -> Result<()> {
        let mut state = self.state_store.lock();
        let mut code = self.code_store.lock();
        let progress = *self.progress.lock();
        progress.store(&mut *code);
        code.commit()?;
        state.commit()?;
        Ok(())
    }

    /// Expand one accepted payload according to its kind.
    fn handle_node(&self, item: &SyncItem, payload: &[u8]) -> Result<()> {
        match item.kind {
            NodeKind::Code => self.save_node(item, payload.to_vec()),
            NodeKind::State | NodeKind::Storage => {
                let node = TrieNode::decode(payload).map_err(|_| SyncError::UnknownNode)?;
                match node {
                    TrieNode::Branch { children, .. } => {
                        self.handle_branch(item, payload, &children)
                    }
                    TrieNode::Extension { child, .. } => {
                        self.handle_extension(item, payload, child)
                    }
                    TrieNode::Leaf { value, .. } => self.handle_leaf(item, payload, &value),
                }
            }
        }
    }

    /// Enqueue a branch node's distinct children and register the branch
    /// as a waiting parent, or save it if every child is already present.
    fn handle_branch(
        &self,
        item: &SyncItem,
        payload: &[u8],
        children: &[Option<Hash>; 16],
    ) -> Result<()> {
        let priority = self.child_priority(item);
        let mut counter = 0u32;
        let mut seen = HashSet::new();

        for child in children.iter().flatten() {
            if !seen.insert(*child) {
                continue;
            }
            let child_item = SyncItem::new(*child, item.kind, item.level + 1, priority);
            if self.add_node(child_item, Some(item.hash), "branch child", false)?
                != AddNodeResult::AlreadySaved
            {
                counter += 1;
            }
        }

        self.finish_parent(item, payload, counter, false)
    }

    /// Enqueue an extension node's single child, or save the extension if
    /// the child is already present.
    fn handle_extension(&self, item: &SyncItem, payload: &[u8], child: Hash) -> Result<()> {
        let child_item = SyncItem::new(child, item.kind, item.level + 1, self.child_priority(item));
        let counter = match self.add_node(child_item, Some(item.hash), "extension child", false)? {
            AddNodeResult::AlreadySaved => 0,
            _ => 1,
        };
        self.finish_parent(item, payload, counter, false)
    }

    /// Expand a leaf. A state-trie leaf is an account whose code hash and
    /// storage root become children of their own; a storage-trie leaf is
    /// terminal and saves directly.
    fn handle_leaf(&self, item: &SyncItem, payload: &[u8], value: &[u8]) -> Result<()> {
        if item.kind != NodeKind::State {
            return self.save_node(item, payload.to_vec());
        }

        let account = Account::decode(value)?;
        let mut counter = 0u32;

        if account.code_hash != EMPTY_HASH {
            if account.code_hash == account.storage_root {
                // The code blob is bit-identical to the storage root node:
                // one download, written to both stores on arrival.
                self.codes_same_as_nodes.lock().insert(account.code_hash);
            } else {
                let code_item = SyncItem::new(account.code_hash, NodeKind::Code, 0, 0.0);
                if self.add_node(code_item, Some(item.hash), "account code", false)?
                    != AddNodeResult::AlreadySaved
                {
                    counter += 1;
                }
            }
        }

        if account.storage_root != EMPTY_ROOT {
            let storage_item = SyncItem::new(account.storage_root, NodeKind::Storage, 0, 0.0);
            if self.add_node(storage_item, Some(item.hash), "account storage", false)?
                != AddNodeResult::AlreadySaved
            {
                counter += 1;
            }
        }

        self.finish_parent(item, payload, counter, true)
    }

    /// Save a parent whose children are all present, or register it with
    /// the dependency tracker to wait for the outstanding ones.
    fn finish_parent(
        &self,
        item: &SyncItem,
        payload: &[u8],
        counter: u32,
        is_account: bool,
    ) -> Result<()> {
        if counter == 0 {
            if is_account {
                self.progress.lock().saved_accounts += 1;
            }
            return self.save_node(item, payload.to_vec());
        }

        self.deps.lock().register_parent(DependentNode {
            item: item.clone(),
            payload: payload.to_vec(),
            missing_children: counter,
            is_account,
        });
        Ok(())
    }

    /// Priority for children of `parent`.
    ///
    /// Children of non-state parents dispatch first. For state parents the
    /// formula biases deeper items while letting shallow work cycle back in
    /// before the queue starves. With no state depth observed yet the root
    /// seed priority is used.
    fn child_priority(&self, parent: &SyncItem) -> f32 {
        if parent.kind != NodeKind::State {
            return 0.0;
        }
        let max_level = self.max_state_level.load(Ordering::Relaxed);
        if max_level == 0 {
            return 1.0;
        }
        let ratio = parent.level as f32 / max_level as f32;
        f32::max(1.0 - ratio, parent.priority - ratio)
    }

    /// Admission gate for every discovered hash.
    ///
    /// `missing` re-queues bypass all deduplication: the item was already
    /// admitted once and its request went unanswered. Otherwise the gate
    /// consults the dedup cache, probes the destination store, links the
    /// parent dependency, and only then decides between already-requested
    /// and a fresh queue push. The dependency edge is recorded before the
    /// already-requested decision so a waiter behind an in-flight request
    /// is still resolved when that request finally lands.
    pub fn add_node(
        &self,
        item: SyncItem,
        parent: Option<Hash>,
        reason: &str,
        missing: bool,
    ) -> Result<AddNodeResult> {
        if !missing {
            if self.dedup.contains(&item.hash) {
                return Ok(AddNodeResult::AlreadySaved);
            }

            let exists = {
                let store = match item.kind {
                    NodeKind::Code => &self.code_store,
                    NodeKind::State | NodeKind::Storage => &self.state_store,
                };
                let guard = store.lock();
                guard.key_exists(&item.hash)?
            };
            {
                let mut progress = self.progress.lock();
                progress.db_checks += 1;
                if exists {
                    progress.state_was_there += 1;
                } else {
                    progress.state_was_not_there += 1;
                }
            }
            if exists {
                self.dedup.insert(item.hash);
                return Ok(AddNodeResult::AlreadySaved);
            }

            let mut deps = self.deps.lock();
            let already_requested = deps.awaits(&item.hash);
            if let Some(parent_hash) = parent {
                deps.add_edge(item.hash, parent_hash);
            }
            if already_requested {
                trace!(
                    "Not queueing {} ({reason}): already requested",
                    hex::encode(item.hash)
                );
                return Ok(AddNodeResult::AlreadyRequested);
            }
        }

        if item.kind == NodeKind::State {
            self.max_state_level
                .fetch_max(item.level, Ordering::Relaxed);
        }
        self.queue.push(item);
        Ok(AddNodeResult::Added)
    }

    /// Persist a node into its destination store and cascade completion to
    /// any parents that were waiting on it.
    fn save_node(&self, item: &SyncItem, payload: Vec<u8>) -> Result<()> {
        trace!("Saving {} node {}", item.kind, hex::encode(item.hash));

        {
            let mut progress = self.progress.lock();
            progress.saved_nodes += 1;
            match item.kind {
                NodeKind::State => progress.saved_state += 1,
                NodeKind::Storage => progress.saved_storage += 1,
                NodeKind::Code => progress.saved_code += 1,
            }
        }

        match item.kind {
            NodeKind::State => {
                self.state_store.lock().set(item.hash, payload);
            }
            NodeKind::Storage => {
                if self.codes_same_as_nodes.lock().remove(&item.hash) {
                    debug!(
                        "Hash {} doubles as contract code, writing both stores",
                        hex::encode(item.hash)
                    );
                    let mut state = self.state_store.lock();
                    let mut code = self.code_store.lock();
                    code.set(item.hash, payload.clone());
                    state.set(item.hash, payload);
                } else {
                    self.state_store.lock().set(item.hash, payload);
                }
            }
            NodeKind::Code => {
                self.code_store.lock().set(item.hash, payload);
            }
        }
        self.dedup.insert(item.hash);

        if item.is_root {
            let deps_empty = self.deps.lock().is_empty();
            let queue_len = self.queue.len();
            if !deps_empty || queue_len != 0 {
                return Err(SyncError::InvariantBroken(format!(
                    "root saved with dependencies outstanding (queue holds {queue_len} items)"
                )));
            }
            info!("State sync completed for root {}", hex::encode(item.hash));
        }

        let completed = self.deps.lock().mark_saved(&item.hash);
        for parent in completed {
            if parent.is_account {
                self.progress.lock().saved_accounts += 1;
            }
            self.save_node(&parent.item, parent.payload)?;
        }
        Ok(())
    }
}
