//! Trie-node codec and Merkle Patricia Trie builder
//!
//! The downloader never walks a trie structurally; it downloads nodes by
//! hash and only needs to decode each payload far enough to discover child
//! references. This module provides that codec ([`TrieNode`]) plus a small
//! in-memory trie builder ([`MerkleTrie`]) used by the serving side and by
//! tests to construct realistic node sets.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::{keccak256, Hash, Result, StorageError, EMPTY_ROOT};

/// Nibble representation for trie paths
#[derive(Debug, Clone, PartialEq, Eq)]
struct Nibbles(Vec<u8>);

impl Nibbles {
    fn from_bytes(bytes: &[u8]) -> Self {
        let mut nibbles = Vec::with_capacity(bytes.len() * 2);
        for byte in bytes {
            nibbles.push(byte >> 4);
            nibbles.push(byte & 0x0f);
        }
        Nibbles(nibbles)
    }

    fn len(&self) -> usize {
        self.0.len()
    }

    fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn slice(&self, start: usize) -> Nibbles {
        Nibbles(self.0[start..].to_vec())
    }

    fn common_prefix_len(&self, other: &Nibbles) -> usize {
        self.0
            .iter()
            .zip(other.0.iter())
            .take_while(|(a, b)| a == b)
            .count()
    }

    /// Compact path encoding: high nibble of the first byte carries the
    /// leaf flag (bit 1) and the odd-length flag (bit 0).
    fn encode_compact(&self, is_leaf: bool) -> Vec<u8> {
        let odd = self.0.len() % 2 == 1;
        let prefix: u8 = match (is_leaf, odd) {
            (false, false) => 0x00,
            (false, true) => 0x01,
            (true, false) => 0x02,
            (true, true) => 0x03,
        };

        let mut out = Vec::with_capacity(self.0.len() / 2 + 1);
        let rest = if odd {
            out.push((prefix << 4) | self.0[0]);
            &self.0[1..]
        } else {
            out.push(prefix << 4);
            &self.0[..]
        };
        for pair in rest.chunks_exact(2) {
            out.push((pair[0] << 4) | pair[1]);
        }
        out
    }

    fn decode_compact(data: &[u8]) -> (Nibbles, bool) {
        if data.is_empty() {
            return (Nibbles(vec![]), false);
        }

        let prefix = data[0] >> 4;
        let is_leaf = prefix >= 2;
        let odd = prefix % 2 == 1;

        let mut nibbles = Vec::new();
        if odd {
            nibbles.push(data[0] & 0x0f);
        }
        for &byte in &data[1..] {
            nibbles.push(byte >> 4);
            nibbles.push(byte & 0x0f);
        }

        (Nibbles(nibbles), is_leaf)
    }
}

/// Trie node variants as carried on the wire and in the state store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrieNode {
    /// Leaf node with path suffix and value
    Leaf {
        /// Path suffix (compact encoded)
        path: Vec<u8>,
        /// Value stored at this leaf
        value: Vec<u8>,
    },
    /// Extension node compressing a single-child chain
    Extension {
        /// Shared path prefix (compact encoded)
        path: Vec<u8>,
        /// Hash of the child node
        child: Hash,
    },
    /// Branch node with 16 child slots and an optional value
    Branch {
        /// Children (16 slots, one per nibble)
        children: [Option<Hash>; 16],
        /// Value if a key terminates at this node
        value: Option<Vec<u8>>,
    },
}

impl TrieNode {
    /// Compute the content hash of this node's encoding
    pub fn hash(&self) -> Hash {
        keccak256(&self.encode())
    }

    /// Encode the node for storage and transfer
    pub fn encode(&self) -> Vec<u8> {
        bincode::serialize(self).unwrap_or_default()
    }

    /// Decode a node from bytes.
    ///
    /// A payload that does not parse as one of the three variants is the
    /// unknown-node case and is fatal for the batch that carried it.
    pub fn decode(data: &[u8]) -> Result<Self> {
        bincode::deserialize(data).map_err(|e| StorageError::Serialization(e.to_string()))
    }

    /// Hashes of all referenced children, in slot order.
    ///
    /// Branch slots may repeat a hash; callers that need distinct children
    /// deduplicate on their side.
    pub fn child_hashes(&self) -> Vec<Hash> {
        match self {
            TrieNode::Leaf { .. } => Vec::new(),
            TrieNode::Extension { child, .. } => vec![*child],
            TrieNode::Branch { children, .. } => children.iter().flatten().copied().collect(),
        }
    }
}

/// In-memory Merkle Patricia Trie builder.
///
/// Insert-only: every mutation stores the rewritten node spine into the node
/// map and moves the root. The map retains superseded nodes; callers that
/// serve node data export [`nodes`](MerkleTrie::nodes) and look payloads up
/// by hash, which is insensitive to garbage entries.
pub struct MerkleTrie {
    nodes: Arc<RwLock<HashMap<Hash, TrieNode>>>,
    root: RwLock<Hash>,
}

impl MerkleTrie {
    /// Create a new empty trie
    pub fn new() -> Self {
        Self {
            nodes: Arc::new(RwLock::new(HashMap::new())),
            root: RwLock::new(EMPTY_ROOT),
        }
    }

    /// Get the current root hash
    pub fn root(&self) -> Hash {
        *self.root.read()
    }

    /// Check if the trie is empty
    pub fn is_empty(&self) -> bool {
        *self.root.read() == EMPTY_ROOT
    }

    /// Insert a key-value pair
    pub fn insert(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let path = Nibbles::from_bytes(key);
        let current_root = *self.root.read();
        let new_root = self.insert_at(current_root, path, value)?;
        *self.root.write() = new_root;
        Ok(())
    }

    /// Get a value by key
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let path = Nibbles::from_bytes(key);
        let root = *self.root.read();
        self.get_at(root, path)
    }

    /// All stored nodes keyed by hash (for serving node-data requests)
    pub fn nodes(&self) -> HashMap<Hash, TrieNode> {
        self.nodes.read().clone()
    }

    fn insert_at(&self, node_hash: Hash, path: Nibbles, value: &[u8]) -> Result<Hash> {
        if node_hash == EMPTY_ROOT {
            return self.store_node(TrieNode::Leaf {
                path: path.encode_compact(true),
                value: value.to_vec(),
            });
        }

        match self.get_node(&node_hash)? {
            TrieNode::Leaf {
                path: leaf_path,
                value: leaf_value,
            } => {
                let (leaf_nibbles, _) = Nibbles::decode_compact(&leaf_path);
                if leaf_nibbles == path {
                    return self.store_node(TrieNode::Leaf {
                        path: leaf_path,
                        value: value.to_vec(),
                    });
                }

                let common = leaf_nibbles.common_prefix_len(&path);
                let branch = self.branch_over(
                    &[(leaf_nibbles.slice(common), leaf_value), (path.slice(common), value.to_vec())],
                )?;
                self.wrap_prefix(&path, common, branch)
            }
            TrieNode::Extension {
                path: ext_path,
                child,
            } => {
                let (ext_nibbles, _) = Nibbles::decode_compact(&ext_path);
                let common = ext_nibbles.common_prefix_len(&path);

                if common == ext_nibbles.len() {
                    let new_child = self.insert_at(child, path.slice(common), value)?;
                    return self.store_node(TrieNode::Extension {
                        path: ext_path,
                        child: new_child,
                    });
                }

                // Split the extension at the divergence point.
                let mut children: [Option<Hash>; 16] = Default::default();
                let mut branch_value = None;

                let ext_slot = ext_nibbles.0[common] as usize;
                let ext_rest = ext_nibbles.slice(common + 1);
                children[ext_slot] = Some(if ext_rest.is_empty() {
                    child
                } else {
                    self.store_node(TrieNode::Extension {
                        path: ext_rest.encode_compact(false),
                        child,
                    })?
                });

                if common < path.len() {
                    let slot = path.0[common] as usize;
                    let rest = path.slice(common + 1);
                    children[slot] = Some(self.store_node(TrieNode::Leaf {
                        path: rest.encode_compact(true),
                        value: value.to_vec(),
                    })?);
                } else {
                    branch_value = Some(value.to_vec());
                }

                let branch = self.store_node(TrieNode::Branch {
                    children,
                    value: branch_value,
                })?;
                self.wrap_prefix(&path, common, branch)
            }
            TrieNode::Branch {
                mut children,
                value: branch_value,
            } => {
                if path.is_empty() {
                    return self.store_node(TrieNode::Branch {
                        children,
                        value: Some(value.to_vec()),
                    });
                }
                let slot = path.0[0] as usize;
                let child_hash = children[slot].unwrap_or(EMPTY_ROOT);
                children[slot] = Some(self.insert_at(child_hash, path.slice(1), value)?);
                self.store_node(TrieNode::Branch {
                    children,
                    value: branch_value,
                })
            }
        }
    }

    /// Build a branch over entries that diverge after a shared prefix.
    /// Each entry's nibbles start at the divergence point.
    fn branch_over(&self, entries: &[(Nibbles, Vec<u8>)]) -> Result<Hash> {
        let mut children: [Option<Hash>; 16] = Default::default();
        let mut value = None;

        for (nibbles, payload) in entries {
            if nibbles.is_empty() {
                value = Some(payload.clone());
            } else {
                let slot = nibbles.0[0] as usize;
                children[slot] = Some(self.store_node(TrieNode::Leaf {
                    path: nibbles.slice(1).encode_compact(true),
                    value: payload.clone(),
                })?);
            }
        }

        self.store_node(TrieNode::Branch { children, value })
    }

    /// Wrap a node in an extension carrying the shared prefix, if any.
    fn wrap_prefix(&self, path: &Nibbles, common: usize, node_hash: Hash) -> Result<Hash> {
        if common == 0 {
            return Ok(node_hash);
        }
        self.store_node(TrieNode::Extension {
            path: Nibbles(path.0[..common].to_vec()).encode_compact(false),
            child: node_hash,
        })
    }

    fn get_at(&self, node_hash: Hash, path: Nibbles) -> Result<Option<Vec<u8>>> {
        if node_hash == EMPTY_ROOT {
            return Ok(None);
        }

        match self.get_node(&node_hash)? {
            TrieNode::Leaf {
                path: leaf_path,
                value,
            } => {
                let (leaf_nibbles, _) = Nibbles::decode_compact(&leaf_path);
                Ok((leaf_nibbles == path).then_some(value))
            }
            TrieNode::Extension {
                path: ext_path,
                child,
            } => {
                let (ext_nibbles, _) = Nibbles::decode_compact(&ext_path);
                if path.len() >= ext_nibbles.len()
                    && path.0[..ext_nibbles.len()] == ext_nibbles.0
                {
                    self.get_at(child, path.slice(ext_nibbles.len()))
                } else {
                    Ok(None)
                }
            }
            TrieNode::Branch { children, value } => {
                if path.is_empty() {
                    return Ok(value);
                }
                match children[path.0[0] as usize] {
                    Some(child) => self.get_at(child, path.slice(1)),
                    None => Ok(None),
                }
            }
        }
    }

    fn store_node(&self, node: TrieNode) -> Result<Hash> {
        let hash = node.hash();
        self.nodes.write().insert(hash, node);
        Ok(hash)
    }

    fn get_node(&self, hash: &Hash) -> Result<TrieNode> {
        self.nodes
            .read()
            .get(hash)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("Node not found: {}", hex::encode(hash))))
    }
}

impl Default for MerkleTrie {
    fn default() -> Self {
        Self::new()
    }
}
