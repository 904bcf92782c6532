//! # Trie Nodes
//!
//! The three stored node shapes and their canonical encoding. The node hash
//! is keccak-256 over the encoding and doubles as the storage key, so the
//! encoding is consensus-critical.
//!
//! Encodings (recursive-list items):
//! - Leaf:      `[hex_prefix(path, leaf), value]`
//! - Extension: `[hex_prefix(path, ext), child_hash]`
//! - Branch:    `[child_0 … child_15, value]` where an absent child or value
//!   is an empty byte item (state values always start with a version byte,
//!   so a genuinely empty value cannot occur)

use crate::errors::TrieError;
use crate::nibbles::{decode_hex_prefix, encode_hex_prefix};
use shared_crypto::keccak256;
use shared_types::rlp::{RlpList, RlpReader};
use shared_types::{Hash, RlpError};

/// Root hash of the empty trie: `keccak256(rlp(""))`.
pub const EMPTY_TRIE_NODE_HASH: Hash = [
    0x56, 0xe8, 0x1f, 0x17, 0x1b, 0xcc, 0x55, 0xa6, 0xff, 0x83, 0x45, 0xe6, 0x92, 0xc0, 0xf8,
    0x6e, 0x5b, 0x48, 0xe0, 0x1b, 0x99, 0x6c, 0xad, 0xc0, 0x01, 0x62, 0x2f, 0xb5, 0xe3, 0x63,
    0xb4, 0x21,
];

/// A stored trie node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TrieNode {
    Leaf {
        path: Vec<u8>,
        value: Vec<u8>,
    },
    Extension {
        path: Vec<u8>,
        child: Hash,
    },
    Branch {
        children: Box<[Option<Hash>; 16]>,
        value: Option<Vec<u8>>,
    },
}

impl TrieNode {
    pub fn encode(&self) -> Vec<u8> {
        let mut list = RlpList::new();
        match self {
            TrieNode::Leaf { path, value } => {
                list.push_bytes(&encode_hex_prefix(path, true));
                list.push_bytes(value);
            }
            TrieNode::Extension { path, child } => {
                list.push_bytes(&encode_hex_prefix(path, false));
                list.push_bytes(child);
            }
            TrieNode::Branch { children, value } => {
                for child in children.iter() {
                    match child {
                        Some(hash) => list.push_bytes(hash),
                        None => list.push_bytes(&[]),
                    };
                }
                match value {
                    Some(v) => list.push_bytes(v),
                    None => list.push_bytes(&[]),
                };
            }
        }
        list.finish()
    }

    pub fn decode(hash: Hash, bytes: &[u8]) -> Result<Self, TrieError> {
        Self::decode_inner(bytes).map_err(|source| TrieError::CorruptNode { hash, source })
    }

    fn decode_inner(bytes: &[u8]) -> Result<Self, RlpError> {
        let mut reader = RlpReader::from_list(bytes)?;
        let first = reader.take_bytes()?;

        if !reader.has_more() {
            return Err(RlpError::UnexpectedEof);
        }

        // A two-item node is a leaf or extension; seventeen items a branch.
        // Disambiguate by parsing: a branch's first item is a child slot
        // (empty or 32 bytes), which is never a valid hex-prefix of the
        // required parity, and a path item is never followed by 16 more.
        let second = reader.take_bytes()?;

        if !reader.has_more() {
            let (path, is_leaf) = decode_hex_prefix(first).ok_or(RlpError::NonCanonical)?;
            if is_leaf {
                return Ok(TrieNode::Leaf {
                    path,
                    value: second.to_vec(),
                });
            }
            let child: Hash = second.try_into().map_err(|_| RlpError::WrongLength {
                expected: 32,
                found: second.len(),
            })?;
            return Ok(TrieNode::Extension { path, child });
        }

        let mut children: [Option<Hash>; 16] = [None; 16];
        children[0] = child_slot(first)?;
        children[1] = child_slot(second)?;
        for slot in children.iter_mut().skip(2) {
            *slot = child_slot(reader.take_bytes()?)?;
        }
        let value_bytes = reader.take_bytes()?;
        reader.expect_end()?;

        Ok(TrieNode::Branch {
            children: Box::new(children),
            value: if value_bytes.is_empty() {
                None
            } else {
                Some(value_bytes.to_vec())
            },
        })
    }

    pub fn hash(&self) -> Hash {
        keccak256(&self.encode())
    }
}

fn child_slot(bytes: &[u8]) -> Result<Option<Hash>, RlpError> {
    if bytes.is_empty() {
        return Ok(None);
    }
    let hash: Hash = bytes.try_into().map_err(|_| RlpError::WrongLength {
        expected: 32,
        found: bytes.len(),
    })?;
    Ok(Some(hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::rlp::append_bytes;

    #[test]
    fn empty_root_constant_is_keccak_of_empty_item() {
        let mut encoded = Vec::new();
        append_bytes(&mut encoded, &[]);
        assert_eq!(keccak256(&encoded), EMPTY_TRIE_NODE_HASH);
    }

    #[test]
    fn leaf_roundtrip() {
        let node = TrieNode::Leaf {
            path: vec![1, 2, 3],
            value: vec![0x01, 0xFF],
        };
        let encoded = node.encode();
        assert_eq!(TrieNode::decode(node.hash(), &encoded).unwrap(), node);
    }

    #[test]
    fn extension_roundtrip() {
        let node = TrieNode::Extension {
            path: vec![0xA],
            child: [7u8; 32],
        };
        let encoded = node.encode();
        assert_eq!(TrieNode::decode(node.hash(), &encoded).unwrap(), node);
    }

    #[test]
    fn branch_roundtrip() {
        let mut children: [Option<Hash>; 16] = [None; 16];
        children[3] = Some([1u8; 32]);
        children[15] = Some([2u8; 32]);
        let node = TrieNode::Branch {
            children: Box::new(children),
            value: Some(vec![0x01, 0x02]),
        };
        let encoded = node.encode();
        assert_eq!(TrieNode::decode(node.hash(), &encoded).unwrap(), node);
    }

    #[test]
    fn branch_without_value_roundtrip() {
        let mut children: [Option<Hash>; 16] = [None; 16];
        children[0] = Some([9u8; 32]);
        let node = TrieNode::Branch {
            children: Box::new(children),
            value: None,
        };
        let encoded = node.encode();
        assert_eq!(TrieNode::decode(node.hash(), &encoded).unwrap(), node);
    }

    #[test]
    fn hash_changes_with_content() {
        let a = TrieNode::Leaf {
            path: vec![1],
            value: vec![0x01],
        };
        let b = TrieNode::Leaf {
            path: vec![1],
            value: vec![0x02],
        };
        assert_ne!(a.hash(), b.hash());
    }
}
