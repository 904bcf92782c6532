//! Chain error types.

use au_02_world_state::StateError;
use au_03_execution::ProcessorError;
use shared_crypto::CryptoError;
use shared_types::{short_hex, Hash, StoreError};
use thiserror::Error;

/// Errors from ingestion, storage and chain queries.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("chain storage: {0}")]
    Store(#[from] StoreError),

    #[error("stored block {} failed its checksum", short_hex(.0))]
    CorruptedBlock(Hash),

    #[error("stored block decode: {0}")]
    BlockDecode(String),

    #[error("unknown block {}", short_hex(.0))]
    UnknownBlock(Hash),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Execution(#[from] ProcessorError),

    #[error("wrong height: expected {expected}, got {got}")]
    WrongHeight { expected: u64, got: u64 },

    #[error("timestamp {got} not after parent timestamp {parent}")]
    TimestampNotMonotonic { parent: u64, got: u64 },

    #[error("timestamp {got} too far in the future (limit {limit})")]
    TimestampTooFarInFuture { got: u64, limit: u64 },

    #[error("difficulty mismatch: expected {expected}, got {got}")]
    WrongDifficulty {
        expected: primitive_types::U256,
        got: primitive_types::U256,
    },

    #[error("transaction root mismatch")]
    TxRootMismatch,

    #[error("state root mismatch: expected {}, computed {}", short_hex(.expected), short_hex(.computed))]
    StateRootMismatch { expected: Hash, computed: Hash },

    #[error("proof of work does not meet the target")]
    BadPow,

    #[error("coinbase signature invalid")]
    BadCoinbaseSignature,

    #[error("signature recovery: {0}")]
    Crypto(#[from] CryptoError),

    #[error("transaction {} is for another network", short_hex(.0))]
    WrongNetwork(Hash),

    #[error("block exceeds the size limit: {size} > {limit}")]
    BlockTooLarge { size: u64, limit: u64 },

    #[error("no common ancestor found for fork chain")]
    MissingCommonAncestor,

    #[error("difficulty anchor at height {0} is missing")]
    MissingAnchor(u64),
}
