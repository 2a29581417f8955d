//! Tests for the trie-node codec and the trie builder

use fastsync_storage::{keccak256, MerkleTrie, TrieNode, EMPTY_ROOT};

#[test]
fn test_node_codec_round_trip() {
    let leaf = TrieNode::Leaf {
        path: vec![0x20],
        value: b"value".to_vec(),
    };
    let decoded = TrieNode::decode(&leaf.encode()).expect("leaf decodes");
    assert_eq!(decoded, leaf);

    let mut children: [Option<[u8; 32]>; 16] = Default::default();
    children[3] = Some([7u8; 32]);
    children[9] = Some([9u8; 32]);
    let branch = TrieNode::Branch {
        children,
        value: None,
    };
    let decoded = TrieNode::decode(&branch.encode()).expect("branch decodes");
    assert_eq!(decoded, branch);

    let extension = TrieNode::Extension {
        path: vec![0x00, 0x12],
        child: [1u8; 32],
    };
    let decoded = TrieNode::decode(&extension.encode()).expect("extension decodes");
    assert_eq!(decoded, extension);
}

#[test]
fn test_garbage_does_not_decode() {
    assert!(TrieNode::decode(&[0xff, 0xfe, 0xfd]).is_err());
    assert!(TrieNode::decode(&[]).is_err());
}

#[test]
fn test_node_hash_matches_encoding() {
    let leaf = TrieNode::Leaf {
        path: vec![0x31],
        value: b"x".to_vec(),
    };
    assert_eq!(leaf.hash(), keccak256(&leaf.encode()));
}

#[test]
fn test_child_hashes() {
    let leaf = TrieNode::Leaf {
        path: vec![0x20],
        value: vec![],
    };
    assert!(leaf.child_hashes().is_empty());

    let extension = TrieNode::Extension {
        path: vec![0x11],
        child: [5u8; 32],
    };
    assert_eq!(extension.child_hashes(), vec![[5u8; 32]]);

    let mut children: [Option<[u8; 32]>; 16] = Default::default();
    children[0] = Some([1u8; 32]);
    children[5] = Some([2u8; 32]);
    children[7] = Some([1u8; 32]);
    let branch = TrieNode::Branch {
        children,
        value: None,
    };
    // Slot order, duplicates preserved.
    assert_eq!(
        branch.child_hashes(),
        vec![[1u8; 32], [2u8; 32], [1u8; 32]]
    );
}

#[test]
fn test_empty_trie() {
    let trie = MerkleTrie::new();
    assert!(trie.is_empty());
    assert_eq!(trie.root(), EMPTY_ROOT);
    assert_eq!(trie.get(b"anything").unwrap(), None);
}

#[test]
fn test_insert_and_get() {
    let trie = MerkleTrie::new();
    trie.insert(b"key1", b"value1").unwrap();
    trie.insert(b"key2", b"value2").unwrap();
    trie.insert(b"other", b"value3").unwrap();

    assert_eq!(trie.get(b"key1").unwrap(), Some(b"value1".to_vec()));
    assert_eq!(trie.get(b"key2").unwrap(), Some(b"value2".to_vec()));
    assert_eq!(trie.get(b"other").unwrap(), Some(b"value3".to_vec()));
    assert_eq!(trie.get(b"missing").unwrap(), None);
}

#[test]
fn test_update_existing_key() {
    let trie = MerkleTrie::new();
    trie.insert(b"key", b"before").unwrap();
    let old_root = trie.root();
    trie.insert(b"key", b"after").unwrap();

    assert_ne!(trie.root(), old_root);
    assert_eq!(trie.get(b"key").unwrap(), Some(b"after".to_vec()));
}

#[test]
fn test_root_changes_with_content() {
    let a = MerkleTrie::new();
    a.insert(b"k", b"v").unwrap();

    let b = MerkleTrie::new();
    b.insert(b"k", b"v").unwrap();
    assert_eq!(a.root(), b.root());

    b.insert(b"k2", b"v2").unwrap();
    assert_ne!(a.root(), b.root());
}

#[test]
fn test_nodes_are_keyed_by_hash() {
    let trie = MerkleTrie::new();
    for i in 0u8..32 {
        trie.insert(&[i; 8], &[i; 4]).unwrap();
    }

    let nodes = trie.nodes();
    assert!(nodes.contains_key(&trie.root()));
    for (hash, node) in &nodes {
        assert_eq!(*hash, keccak256(&node.encode()));
    }
}

#[test]
fn test_divergent_keys_produce_branch_and_extension() {
    let trie = MerkleTrie::new();
    // Shared 3-nibble prefix, divergence afterwards.
    trie.insert(&[0x12, 0x34], b"a").unwrap();
    trie.insert(&[0x12, 0x35], b"b").unwrap();

    let nodes = trie.nodes();
    let root = nodes.get(&trie.root()).expect("root stored");
    assert!(matches!(root, TrieNode::Extension { .. }));

    assert_eq!(trie.get(&[0x12, 0x34]).unwrap(), Some(b"a".to_vec()));
    assert_eq!(trie.get(&[0x12, 0x35]).unwrap(), Some(b"b".to_vec()));
}

#[test]
fn test_key_prefix_of_another_key() {
    let trie = MerkleTrie::new();
    trie.insert(&[0x12], b"short").unwrap();
    trie.insert(&[0x12, 0x30], b"long").unwrap();

    assert_eq!(trie.get(&[0x12]).unwrap(), Some(b"short".to_vec()));
    assert_eq!(trie.get(&[0x12, 0x30]).unwrap(), Some(b"long".to_vec()));
    assert_eq!(trie.get(&[0x12, 0x31]).unwrap(), None);
}

#[test]
fn test_many_keys_random_order() {
    use rand::seq::SliceRandom;

    let mut keys: Vec<[u8; 8]> = (0u64..200).map(|i| i.to_be_bytes()).collect();
    keys.shuffle(&mut rand::thread_rng());

    let trie = MerkleTrie::new();
    for key in &keys {
        trie.insert(key, key).unwrap();
    }
    for key in &keys {
        assert_eq!(trie.get(key).unwrap(), Some(key.to_vec()));
    }
}
