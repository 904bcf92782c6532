//! # Merkle-Patricia Trie
//!
//! Incremental trie over a content-addressed node store. Every mutation
//! produces new nodes along the changed path; unchanged subtrees are shared
//! by hash. The working copy lives in memory until `commit`.

use crate::errors::TrieError;
use crate::nibbles::{bytes_to_nibbles, common_prefix_len};
use crate::node::{TrieNode, EMPTY_TRIE_NODE_HASH};
use crate::storage::NodeStorage;
use shared_crypto::keccak256;
use shared_types::Hash;
use std::collections::HashMap;

/// A persistent radix trie working copy rooted at one node hash.
pub struct Trie {
    root: Hash,
    /// Resolved and freshly created nodes, by hash.
    cache: HashMap<Hash, TrieNode>,
    /// Encodings of nodes created since the last commit.
    dirty: HashMap<Hash, Vec<u8>>,
}

impl Trie {
    /// Open a working copy over an existing root (or the empty root).
    pub fn new(root: Hash) -> Self {
        Self {
            root,
            cache: HashMap::new(),
            dirty: HashMap::new(),
        }
    }

    pub fn empty() -> Self {
        Self::new(EMPTY_TRIE_NODE_HASH)
    }

    /// Current working-copy root. Stable across reads.
    pub fn root_hash(&self) -> Hash {
        self.root
    }

    pub fn is_empty(&self) -> bool {
        self.root == EMPTY_TRIE_NODE_HASH
    }

    /// Look up a key.
    pub fn get(&mut self, storage: &NodeStorage, key: &[u8]) -> Result<Option<Vec<u8>>, TrieError> {
        let path = bytes_to_nibbles(key);
        let mut current = self.root;
        let mut offset = 0usize;

        loop {
            if current == EMPTY_TRIE_NODE_HASH {
                return Ok(None);
            }
            match self.resolve(storage, &current)? {
                TrieNode::Leaf { path: leaf_path, value } => {
                    return Ok(if leaf_path == path[offset..] {
                        Some(value)
                    } else {
                        None
                    });
                }
                TrieNode::Extension { path: ext_path, child } => {
                    if path[offset..].starts_with(&ext_path) {
                        offset += ext_path.len();
                        current = child;
                    } else {
                        return Ok(None);
                    }
                }
                TrieNode::Branch { children, value } => {
                    if offset == path.len() {
                        return Ok(value);
                    }
                    match children[path[offset] as usize] {
                        Some(child) => {
                            offset += 1;
                            current = child;
                        }
                        None => return Ok(None),
                    }
                }
            }
        }
    }

    /// Insert or replace a value. In-memory only until `commit`.
    pub fn put(
        &mut self,
        storage: &NodeStorage,
        key: &[u8],
        value: Vec<u8>,
    ) -> Result<(), TrieError> {
        let path = bytes_to_nibbles(key);
        self.root = self.insert_node(storage, self.root, &path, value)?;
        Ok(())
    }

    /// Remove a key if present. In-memory only until `commit`.
    pub fn remove(&mut self, storage: &NodeStorage, key: &[u8]) -> Result<(), TrieError> {
        let path = bytes_to_nibbles(key);
        self.root = self
            .remove_node(storage, self.root, &path)?
            .unwrap_or(EMPTY_TRIE_NODE_HASH);
        Ok(())
    }

    /// Emit every node created since the last commit into the storage
    /// buffer. Re-committing without intervening mutations is a no-op.
    pub fn commit(&mut self, storage: &mut NodeStorage) {
        for (hash, bytes) in self.dirty.drain() {
            storage.put(hash, bytes);
        }
    }

    /// Abandon uncommitted mutations and point the working copy at `root`.
    /// Resolved nodes stay memoized; they are content-addressed, so stale
    /// entries can never alias.
    pub fn reset(&mut self, root: Hash) {
        self.root = root;
        self.dirty.clear();
    }

    /// Drop the memoized node cache as well.
    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    // =========================================================================
    // INTERNALS
    // =========================================================================

    fn resolve(&mut self, storage: &NodeStorage, hash: &Hash) -> Result<TrieNode, TrieError> {
        if let Some(node) = self.cache.get(hash) {
            return Ok(node.clone());
        }
        let bytes = storage
            .get(hash)?
            .ok_or(TrieError::MissingNode(*hash))?;
        let node = TrieNode::decode(*hash, &bytes)?;
        self.cache.insert(*hash, node.clone());
        Ok(node)
    }

    fn add_node(&mut self, node: TrieNode) -> Hash {
        let encoded = node.encode();
        let hash = keccak256(&encoded);
        self.cache.insert(hash, node);
        self.dirty.insert(hash, encoded);
        hash
    }

    fn insert_node(
        &mut self,
        storage: &NodeStorage,
        node_hash: Hash,
        path: &[u8],
        value: Vec<u8>,
    ) -> Result<Hash, TrieError> {
        if node_hash == EMPTY_TRIE_NODE_HASH {
            return Ok(self.add_node(TrieNode::Leaf {
                path: path.to_vec(),
                value,
            }));
        }

        match self.resolve(storage, &node_hash)? {
            TrieNode::Leaf {
                path: leaf_path,
                value: leaf_value,
            } => {
                if leaf_path == path {
                    return Ok(self.add_node(TrieNode::Leaf {
                        path: leaf_path,
                        value,
                    }));
                }

                let common = common_prefix_len(&leaf_path, path);
                let mut children: [Option<Hash>; 16] = [None; 16];
                let mut branch_value = None;

                if leaf_path.len() == common {
                    branch_value = Some(leaf_value);
                } else {
                    let index = leaf_path[common] as usize;
                    children[index] = Some(self.add_node(TrieNode::Leaf {
                        path: leaf_path[common + 1..].to_vec(),
                        value: leaf_value,
                    }));
                }

                if path.len() == common {
                    branch_value = Some(value);
                } else {
                    let index = path[common] as usize;
                    children[index] = Some(self.add_node(TrieNode::Leaf {
                        path: path[common + 1..].to_vec(),
                        value,
                    }));
                }

                let branch = self.add_node(TrieNode::Branch {
                    children: Box::new(children),
                    value: branch_value,
                });

                if common > 0 {
                    Ok(self.add_node(TrieNode::Extension {
                        path: path[..common].to_vec(),
                        child: branch,
                    }))
                } else {
                    Ok(branch)
                }
            }

            TrieNode::Extension {
                path: ext_path,
                child,
            } => {
                let common = common_prefix_len(&ext_path, path);

                if common == ext_path.len() {
                    let new_child = self.insert_node(storage, child, &path[common..], value)?;
                    return Ok(self.add_node(TrieNode::Extension {
                        path: ext_path,
                        child: new_child,
                    }));
                }

                // Split the extension at the divergence point.
                let mut children: [Option<Hash>; 16] = [None; 16];
                let mut branch_value = None;

                let ext_index = ext_path[common] as usize;
                let ext_rest = &ext_path[common + 1..];
                children[ext_index] = Some(if ext_rest.is_empty() {
                    child
                } else {
                    self.add_node(TrieNode::Extension {
                        path: ext_rest.to_vec(),
                        child,
                    })
                });

                if path.len() == common {
                    branch_value = Some(value);
                } else {
                    let index = path[common] as usize;
                    children[index] = Some(self.add_node(TrieNode::Leaf {
                        path: path[common + 1..].to_vec(),
                        value,
                    }));
                }

                let branch = self.add_node(TrieNode::Branch {
                    children: Box::new(children),
                    value: branch_value,
                });

                if common > 0 {
                    Ok(self.add_node(TrieNode::Extension {
                        path: path[..common].to_vec(),
                        child: branch,
                    }))
                } else {
                    Ok(branch)
                }
            }

            TrieNode::Branch {
                mut children,
                value: branch_value,
            } => {
                if path.is_empty() {
                    return Ok(self.add_node(TrieNode::Branch {
                        children,
                        value: Some(value),
                    }));
                }

                let index = path[0] as usize;
                let new_child = match children[index] {
                    Some(child) => self.insert_node(storage, child, &path[1..], value)?,
                    None => self.add_node(TrieNode::Leaf {
                        path: path[1..].to_vec(),
                        value,
                    }),
                };
                children[index] = Some(new_child);

                Ok(self.add_node(TrieNode::Branch {
                    children,
                    value: branch_value,
                }))
            }
        }
    }

    /// Remove `path` under `node_hash`. `Ok(None)` means the subtree became
    /// empty; otherwise the returned hash is the (possibly unchanged)
    /// replacement subtree root.
    fn remove_node(
        &mut self,
        storage: &NodeStorage,
        node_hash: Hash,
        path: &[u8],
    ) -> Result<Option<Hash>, TrieError> {
        if node_hash == EMPTY_TRIE_NODE_HASH {
            return Ok(None);
        }

        match self.resolve(storage, &node_hash)? {
            TrieNode::Leaf { path: leaf_path, .. } => {
                if leaf_path == path {
                    Ok(None)
                } else {
                    Ok(Some(node_hash))
                }
            }

            TrieNode::Extension {
                path: ext_path,
                child,
            } => {
                if !path.starts_with(&ext_path) {
                    return Ok(Some(node_hash));
                }
                match self.remove_node(storage, child, &path[ext_path.len()..])? {
                    None => Ok(None),
                    Some(new_child) if new_child == child => Ok(Some(node_hash)),
                    Some(new_child) => Ok(Some(self.graft(storage, ext_path, new_child)?)),
                }
            }

            TrieNode::Branch {
                mut children,
                value: branch_value,
            } => {
                if path.is_empty() {
                    if branch_value.is_none() {
                        return Ok(Some(node_hash));
                    }
                    return self.normalize_branch(storage, children, None);
                }

                let index = path[0] as usize;
                let Some(child) = children[index] else {
                    return Ok(Some(node_hash));
                };
                let new_child = self.remove_node(storage, child, &path[1..])?;
                if new_child == Some(child) {
                    return Ok(Some(node_hash));
                }
                children[index] = new_child;
                self.normalize_branch(storage, children, branch_value)
            }
        }
    }

    /// Rebuild a branch after a child changed, collapsing it when it no
    /// longer justifies a 16-way node.
    fn normalize_branch(
        &mut self,
        storage: &NodeStorage,
        children: Box<[Option<Hash>; 16]>,
        value: Option<Vec<u8>>,
    ) -> Result<Option<Hash>, TrieError> {
        let occupied: Vec<usize> = children
            .iter()
            .enumerate()
            .filter_map(|(i, c)| c.map(|_| i))
            .collect();

        match occupied.len() {
            0 => match value {
                None => Ok(None),
                Some(v) => Ok(Some(self.add_node(TrieNode::Leaf {
                    path: Vec::new(),
                    value: v,
                }))),
            },
            1 if value.is_none() => {
                let index = occupied[0];
                let child = children[index].unwrap();
                Ok(Some(self.graft(storage, vec![index as u8], child)?))
            }
            _ => Ok(Some(self.add_node(TrieNode::Branch { children, value }))),
        }
    }

    /// Prepend `prefix` to the subtree at `child`, merging into the child
    /// node where its shape allows.
    fn graft(
        &mut self,
        storage: &NodeStorage,
        prefix: Vec<u8>,
        child: Hash,
    ) -> Result<Hash, TrieError> {
        if prefix.is_empty() {
            return Ok(child);
        }
        let merged = match self.resolve(storage, &child)? {
            TrieNode::Leaf { path, value } => TrieNode::Leaf {
                path: concat_paths(&prefix, &path),
                value,
            },
            TrieNode::Extension { path, child } => TrieNode::Extension {
                path: concat_paths(&prefix, &path),
                child,
            },
            TrieNode::Branch { .. } => TrieNode::Extension {
                path: prefix,
                child,
            },
        };
        Ok(self.add_node(merged))
    }
}

fn concat_paths(prefix: &[u8], rest: &[u8]) -> Vec<u8> {
    let mut path = Vec::with_capacity(prefix.len() + rest.len());
    path.extend_from_slice(prefix);
    path.extend_from_slice(rest);
    path
}
