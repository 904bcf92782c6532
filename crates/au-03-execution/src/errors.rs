//! Execution error types.

use au_02_world_state::StateError;
use shared_types::{short_hex, Address, Hash, Wei};
use thiserror::Error;

/// Why a single transaction failed to execute.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error(transparent)]
    State(#[from] StateError),

    #[error("invalid nonce: expected {expected}, got {got}")]
    InvalidNonce { expected: i64, got: u64 },

    #[error("fee below floor: required {required}, got {got}")]
    FeeTooLow { required: Wei, got: Wei },

    #[error("sender {} is not an authority", short_hex(.0))]
    NotAuthority(Address),

    #[error("a proposal with hash {} already exists", short_hex(.0))]
    BipAlreadyExists(Hash),

    #[error("unknown proposal {}", short_hex(.0))]
    UnknownBip(Hash),

    #[error("proposal {} is no longer pending", short_hex(.0))]
    BipNotPending(Hash),

    #[error("proposal {} has expired", short_hex(.0))]
    BipExpired(Hash),

    #[error("{} already voted on proposal {}", short_hex(.voter), short_hex(.bip_hash))]
    AlreadyVoted { bip_hash: Hash, voter: Address },

    #[error("authority set is empty")]
    NoAuthorities,

    #[error("token {} already exists", short_hex(.0))]
    TokenAlreadyExists(Address),

    #[error("unknown token {}", short_hex(.0))]
    UnknownToken(Address),

    #[error("token {} is not user-burnable", short_hex(.0))]
    TokenNotBurnable(Address),

    #[error("mint of {amount} would exceed max supply {max_supply}")]
    MaxSupplyExceeded { amount: Wei, max_supply: Wei },

    #[error("token {} was already created or updated in this block", short_hex(.0))]
    TokenTouchedTwice(Address),

    #[error("network params were already changed in this block")]
    ParamsAlreadyChanged,

    #[error("alias {0:?} is already taken")]
    AliasTaken(String),

    #[error("unknown alias {0:?}")]
    UnknownAlias(String),

    #[error("{} is already an authority", short_hex(.0))]
    AuthorityAlreadyExists(Address),

    #[error("{} is not an authority", short_hex(.0))]
    UnknownAuthority(Address),

    #[error("cannot remove the last authority")]
    LastAuthority,

    #[error("transaction carries no payload for its type")]
    MissingPayload,

    #[error("payload does not match the transaction type")]
    WrongPayload,
}

/// Why a whole batch failed.
#[derive(Debug, Error)]
pub enum ProcessorError {
    /// Strict mode: a transaction failed, which invalidates the block.
    #[error("transaction {} failed validation: {reason}", short_hex(.tx_hash))]
    TxValidationFailed {
        tx_hash: Hash,
        #[source]
        reason: ExecError,
    },

    /// The reward pool must never be the block's coinbase.
    #[error("block reward pool equals the coinbase")]
    PoolIsCoinbase,

    /// The native token record disappeared from state.
    #[error("native token record missing from state")]
    MissingNativeToken,

    /// Infrastructure failure under the batch (trie, storage, codec).
    #[error(transparent)]
    State(#[from] StateError),
}
