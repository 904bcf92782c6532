//! Mempool error types.

use shared_types::{short_hex, Hash, RlpError, Wei};
use thiserror::Error;

/// Why a transaction was refused admission.
#[derive(Debug, Error)]
pub enum MempoolError {
    #[error("transaction {} is already pooled", short_hex(.0))]
    Duplicate(Hash),

    #[error("transaction decode: {0}")]
    Decode(#[from] RlpError),

    #[error("signature does not recover to a sender")]
    BadSignature,

    #[error("transaction targets another network")]
    WrongNetwork,

    #[error("fee below floor: required {required}, got {got}")]
    FeeTooLow { required: Wei, got: Wei },

    #[error("nonce out of order: expected {expected}, got {got}")]
    NonceMismatch { expected: u64, got: u64 },

    #[error("sender has too many pending transactions (limit {0})")]
    SenderLimit(usize),

    #[error("pool is full and the fee does not beat the cheapest entry")]
    PoolFull,
}
