//! # Shared Types
//!
//! Domain entities and consensus encodings shared by every subsystem.
//!
//! ## Clusters
//!
//! - **Primitives**: `Hash`, `Address`, `Wei`, sentinels and key derivation
//! - **Chain**: `Tx`, `Block`, `BlockHeader`, `StoredBlock`, `BlockEvent`
//! - **State**: account/token/governance entities and their versioned codecs
//! - **Encodings**: canonical recursive-list encoding (`rlp`) feeding every
//!   content hash, and the length-prefixed state-value codec (`codec`)
//!   feeding the state root
//! - **Storage port**: column-family key-value store abstraction
//!
//! The two encodings are hand-rolled and bit-exact on purpose: both feed
//! consensus-critical hashes, so no general-purpose serializer is allowed
//! anywhere near them.

pub mod codec;
pub mod entities;
pub mod errors;
pub mod primitives;
pub mod rlp;
pub mod settings;
pub mod storage;

pub use entities::*;
pub use errors::{CodecError, RlpError, StoreError};
pub use primitives::*;
pub use settings::NetworkSettings;
