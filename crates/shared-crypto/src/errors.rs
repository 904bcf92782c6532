//! Crypto error types.

use thiserror::Error;

/// Errors produced by cryptographic operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid private key")]
    InvalidPrivateKey,

    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("invalid signature encoding")]
    InvalidSignature,

    #[error("invalid recovery id {0}")]
    InvalidRecoveryId(u8),

    #[error("signature recovery failed")]
    RecoveryFailed,

    #[error("signing failed")]
    SigningFailed,
}
