//! Mempool's view of the head state, backed by the chain controller.

use au_02_world_state::{StateMode, WorldState};
use au_04_chain::ChainController;
use au_05_mempool::MempoolStateView;
use shared_types::{Address, Wei};
use std::sync::Arc;

/// Opens a fresh world-state view at the current head per query. Queries
/// are rare (admission-time only) and the trie node cache in storage keeps
/// them cheap.
pub struct HeadStateView {
    chain: Arc<ChainController>,
}

impl HeadStateView {
    pub fn new(chain: Arc<ChainController>) -> Self {
        Self { chain }
    }

    fn with_head_state<T>(&self, f: impl FnOnce(&mut WorldState) -> T, fallback: T) -> T {
        let Some(head) = self.chain.head() else {
            return fallback;
        };
        match WorldState::open(
            self.chain.block_store().column_store(),
            Some(head.block.header.state_root_hash),
            StateMode::Validation,
        ) {
            Ok(mut ws) => f(&mut ws),
            Err(_) => fallback,
        }
    }
}

impl MempoolStateView for HeadStateView {
    fn account_nonce(&self, address: &Address) -> i64 {
        self.with_head_state(
            |ws| ws.get_nonce(address).map(|n| n.nonce).unwrap_or(-1),
            -1,
        )
    }

    fn required_fee(&self, size: usize) -> Wei {
        self.with_head_state(
            |ws| {
                ws.get_params()
                    .map(|params| params.required_fee(size))
                    .unwrap_or_default()
            },
            Wei::zero(),
        )
    }
}
