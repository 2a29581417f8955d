//! Tests for node-data serving

use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use fastsync_storage::{
    keccak256, Account, MemoryStore, MerkleTrie, SnapshotableStore, EMPTY_ROOT,
};
use fastsync_sync::{
    LoopbackExecutor, NodeDataProvider, StateDownloader, SyncConfig,
};

fn seeded_stores() -> (Arc<Mutex<MemoryStore>>, Arc<Mutex<MemoryStore>>, [u8; 32]) {
    let trie = MerkleTrie::new();
    let code = b"contract bytecode".to_vec();
    let code_hash = keccak256(&code);
    let account = Account {
        nonce: 0,
        balance: 10,
        code_hash,
        storage_root: EMPTY_ROOT,
    };
    trie.insert(&[0x42; 32], &account.encode()).unwrap();

    let mut state_store = MemoryStore::new();
    for (hash, node) in trie.nodes() {
        state_store.set(hash, node.encode());
    }
    state_store.commit().unwrap();

    let mut code_store = MemoryStore::new();
    code_store.set(code_hash, code);
    code_store.commit().unwrap();

    (
        Arc::new(Mutex::new(state_store)),
        Arc::new(Mutex::new(code_store)),
        trie.root(),
    )
}

#[test]
fn test_provider_probes_state_then_code() {
    let (state, code, root) = seeded_stores();
    let provider = NodeDataProvider::new(state, code);

    // Trie node comes from the state store.
    assert!(provider.get_node_data(&root).unwrap().is_some());

    // Unknown hash answers None without failing.
    assert!(provider.get_node_data(&[0xde; 32]).unwrap().is_none());
}

#[test]
fn test_provider_serves_positionally() {
    let (state, code, root) = seeded_stores();
    let provider = NodeDataProvider::new(state, code);

    let unknown = [0x99; 32];
    let responses = provider.serve(&[root, unknown, root]).unwrap();
    assert_eq!(responses.len(), 3);
    assert!(responses[0].is_some());
    assert!(responses[1].is_none());
    assert_eq!(responses[0], responses[2]);
}

#[tokio::test]
async fn test_sync_from_loopback_provider() {
    let (state, code, root) = seeded_stores();
    let provider = NodeDataProvider::new(state, code);
    let executor = Arc::new(LoopbackExecutor::new(provider));

    let downloader =
        StateDownloader::new(SyncConfig::default(), MemoryStore::new(), MemoryStore::new());
    downloader.set_executor(executor);

    downloader
        .sync(CancellationToken::new(), root)
        .await
        .unwrap();

    assert!(downloader.is_fully_synced(&root).unwrap());
    let progress = downloader.progress();
    assert_eq!(progress.saved_state, 1);
    assert_eq!(progress.saved_code, 1);
    assert_eq!(progress.saved_accounts, 1);
}

#[tokio::test]
async fn test_loopback_observes_cancellation() {
    let (state, code, root) = seeded_stores();
    let provider = NodeDataProvider::new(state, code);
    let executor = Arc::new(LoopbackExecutor::new(provider));

    let downloader =
        StateDownloader::new(SyncConfig::default(), MemoryStore::new(), MemoryStore::new());
    downloader.set_executor(executor);

    let cancel = CancellationToken::new();
    cancel.cancel();
    assert!(downloader.sync(cancel, root).await.is_err());
    assert!(!downloader.is_fully_synced(&root).unwrap());
}
