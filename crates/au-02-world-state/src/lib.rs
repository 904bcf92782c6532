//! # World State
//!
//! Typed view over the state tries for the duration of exactly one block.
//! A `WorldState` is built from a parent block's state root, mutated by the
//! state processor, asked for its new root, and then either persisted into
//! the block's atomic batch or discarded.
//!
//! ## Modes
//!
//! - **Validation**: fail-fast, no per-transaction rollback journal, records
//!   the pre-block value of every touched entity so a diff can be handed to
//!   downstream listeners.
//! - **Mining**: every mutation is journaled with an undo record so a failed
//!   transaction can be reverted in place while the rest of the template
//!   keeps going. No diff is produced.

pub mod errors;
pub mod journal;
pub mod world_state;

pub use errors::StateError;
pub use journal::SnapshotToken;
pub use world_state::{StateMode, WorldState};
