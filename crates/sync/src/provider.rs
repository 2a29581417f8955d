//! Node-data serving
//!
//! The serving half of the protocol: answer node-data requests from the
//! local stores so that peers (or a loopback test harness) can sync from
//! this node. Responses are positionally aligned with the request; unknown
//! hashes answer with an empty slot rather than failing the batch.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use fastsync_storage::{Hash, SnapshotableStore};

use crate::item::NodeDataBatch;
use crate::sync::{RequestExecutor, Result, SyncError};

/// Serves node-data lookups from the local state and code stores.
///
/// The state store is probed first; code blobs are only consulted when the
/// hash is not a trie node. This matches how the downloader partitions its
/// writes, so a fully-synced node can serve every hash it ever requested.
pub struct NodeDataProvider<S> {
    state_store: Arc<Mutex<S>>,
    code_store: Arc<Mutex<S>>,
}

impl<S: SnapshotableStore> NodeDataProvider<S> {
    /// Create a provider over shared store handles.
    pub fn new(state_store: Arc<Mutex<S>>, code_store: Arc<Mutex<S>>) -> Self {
        Self {
            state_store,
            code_store,
        }
    }

    /// Look up one hash across both stores.
    pub fn get_node_data(&self, hash: &Hash) -> Result<Option<Vec<u8>>> {
        if let Some(node) = self.state_store.lock().get(hash)? {
            return Ok(Some(node));
        }
        Ok(self.code_store.lock().get(hash)?)
    }

    /// Answer a batch of hashes, positionally aligned with the request.
    pub fn serve(&self, hashes: &[Hash]) -> Result<Vec<Option<Vec<u8>>>> {
        let mut responses = Vec::with_capacity(hashes.len());
        for hash in hashes {
            let found = self.get_node_data(hash)?;
            if found.is_none() {
                trace!("No node data for {}", hex::encode(hash));
            }
            responses.push(found);
        }
        Ok(responses)
    }
}

/// A [`RequestExecutor`] that answers requests from a local provider.
///
/// Useful for loopback deployments and tests; a real deployment dispatches
/// batches to remote peers instead.
pub struct LoopbackExecutor<S> {
    provider: NodeDataProvider<S>,
}

impl<S: SnapshotableStore> LoopbackExecutor<S> {
    /// Create a loopback executor over a provider.
    pub fn new(provider: NodeDataProvider<S>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<S: SnapshotableStore> RequestExecutor for LoopbackExecutor<S> {
    async fn execute_request(
        &self,
        cancel: CancellationToken,
        mut batch: NodeDataBatch,
    ) -> Result<NodeDataBatch> {
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        let hashes: Vec<Hash> = batch.requested.iter().map(|item| item.hash).collect();
        let responses = self.provider.serve(&hashes)?;
        batch.responses = Some(responses.into_iter().map(|r| r.map(Bytes::from)).collect());
        Ok(batch)
    }
}
