//! # Mempool
//!
//! Pending-transaction pool with three indices:
//!
//! - `by_hash`: O(1) lookup by transaction hash
//! - `by_price`: fee-per-byte ordering for block template selection
//! - `by_sender`: nonce-ordered transactions per account
//!
//! Admission checks signature, fee floor and nonce continuity against the
//! head state (through [`MempoolStateView`], so the pool itself stays
//! storage-agnostic). Connected blocks evict included and stale
//! transactions.

pub mod errors;
pub mod pool;

pub use errors::MempoolError;
pub use pool::{Mempool, MempoolConfig, MempoolStateView};
