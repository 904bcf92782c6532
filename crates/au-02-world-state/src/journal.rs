//! # Rollback Journal
//!
//! Undo records for mining mode. Each record snapshots the previous overlay
//! entry of exactly one collection slot, identified by its key plus the
//! variant discriminator; no record holds a pointer into the owning
//! collection. Reverting replays records in reverse until the journal is
//! back at the snapshot length.

use shared_types::{
    Address, AddressAliasState, AuthorityState, BalanceState, BipState, Hash, NetworkParamsState,
    NonceState, TokenState,
};

/// Opaque position in the journal returned by `create_snapshot`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotToken(pub(crate) usize);

/// One undoable overlay mutation.
#[derive(Debug, Clone)]
pub(crate) enum UndoRecord {
    Balance {
        address: Address,
        token_address: Address,
        prev: Option<BalanceState>,
    },
    Nonce {
        address: Address,
        prev: Option<NonceState>,
    },
    Authority {
        address: Address,
        prev_entry: Option<AuthorityState>,
        prev_removed: bool,
    },
    Alias {
        name: String,
        prev_entry: Option<AddressAliasState>,
        prev_removed: bool,
    },
    Token {
        address: Address,
        prev: Option<TokenState>,
    },
    TokenTouched {
        address: Address,
    },
    Bip {
        bip_hash: Hash,
        prev: Option<BipState>,
    },
    Params {
        prev: Option<NetworkParamsState>,
        prev_changed: bool,
    },
}
