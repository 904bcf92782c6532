//! # Shared Crypto
//!
//! Cryptographic primitives shared by all subsystems:
//!
//! - **Hashing**: keccak-256, the only content hash in consensus
//! - **ECDSA**: recoverable secp256k1 signatures (transaction senders are
//!   derived from the signature, never carried on the wire)
//! - **PoW**: the pluggable proof-of-work hash and target arithmetic
//! - **Merkle**: transaction-root computation

pub mod ecdsa;
pub mod errors;
pub mod hashing;
pub mod merkle;
pub mod pow;

pub use ecdsa::{recover_address, KeyPair};
pub use errors::CryptoError;
pub use hashing::{keccak256, keccak256_concat};
pub use merkle::merkle_root;
pub use pow::{hash_meets_target, target_from_difficulty, DatasetPowHasher, PowHasher};
