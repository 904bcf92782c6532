//! World-state error types.

use au_01_state_trie::TrieError;
use shared_types::{CodecError, Wei};
use thiserror::Error;

/// Errors from world-state reads, writes and lifecycle operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error(transparent)]
    Trie(#[from] TrieError),

    #[error("state value codec: {0}")]
    Codec(#[from] CodecError),

    #[error("insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: Wei, available: Wei },

    #[error("network params missing from state")]
    MissingParams,

    #[error("snapshots are not supported in validation mode")]
    SnapshotUnsupported,

    #[error("snapshot token does not match the journal")]
    InvalidSnapshot,
}
