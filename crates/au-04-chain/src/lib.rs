//! # Chain
//!
//! The canonical chain: stored-block persistence and indices, block
//! ingestion with orphan buffering, atomic reorg swaps, read-side chain
//! queries, genesis bootstrap and ASERT difficulty retargeting.
//!
//! A single master mutex serializes every chain-modifying operation
//! (connect, reorg, head read for template assembly). `BlockConnected`
//! events are published strictly after the backing batch commits, while the
//! master lock is still held, so listeners observe the canonical chain
//! monotonically.

pub mod difficulty;
pub mod errors;
pub mod genesis;
pub mod ingest;
pub mod orphans;
pub mod query;
pub mod store;
pub mod validate;

pub use difficulty::AnchorInfo;
pub use errors::ChainError;
pub use ingest::{ChainController, IngestOutcome};
pub use store::BlockStore;
