//! Trie error types.

use shared_types::{Hash, RlpError, StoreError};
use thiserror::Error;

/// Errors from trie traversal and persistence.
#[derive(Debug, Error)]
pub enum TrieError {
    /// A referenced node is absent from cache and storage. Either the root
    /// is unknown or the backing store lost data.
    #[error("missing trie node {}", hex_prefix(.0))]
    MissingNode(Hash),

    #[error("corrupt trie node {}: {source}", hex_prefix(.hash))]
    CorruptNode {
        hash: Hash,
        #[source]
        source: RlpError,
    },

    #[error("trie storage: {0}")]
    Store(#[from] StoreError),
}

fn hex_prefix(hash: &Hash) -> String {
    shared_types::short_hex(hash)
}
