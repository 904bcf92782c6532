//! Mining error types.

use au_02_world_state::StateError;
use au_03_execution::ProcessorError;
use au_04_chain::ChainError;
use shared_crypto::CryptoError;
use thiserror::Error;

/// Errors from template assembly and block finalization.
#[derive(Debug, Error)]
pub enum MiningError {
    #[error("chain has no head to mine on")]
    NoHead,

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Execution(#[from] ProcessorError),

    #[error("block signing: {0}")]
    Signing(#[from] CryptoError),
}
