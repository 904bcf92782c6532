//! # Genesis Bootstrap
//!
//! Builds the genesis block from the network settings: the native token,
//! the initial mint, the authority set and the initial parameters. The
//! initial mint is credited exactly once even when the reward pool address
//! equals the first authority.

use crate::errors::ChainError;
use au_02_world_state::WorldState;
use shared_types::storage::ColumnStore;
use shared_types::{
    Block, BlockEvent, BlockHeader, NetworkSettings, TokenState, NATIVE_TOKEN_ADDRESS,
    ZERO_ADDRESS, ZERO_HASH, ZERO_SIGNATURE,
};
use std::sync::Arc;
use au_02_world_state::StateMode;

/// Apply the genesis state to a fresh world state; returns the events the
/// genesis block carries.
pub fn apply_genesis_state(
    ws: &mut WorldState,
    settings: &NetworkSettings,
) -> Result<Vec<BlockEvent>, ChainError> {
    ws.set_block_context(0, settings.genesis_timestamp_ms);
    let mut events = Vec::new();

    ws.set_token(
        &NATIVE_TOKEN_ADDRESS,
        TokenState {
            name: settings.native_token_name.clone(),
            ticker: settings.native_token_ticker.clone(),
            decimals: settings.native_token_decimals,
            website_url: None,
            logo_url: None,
            max_supply: None,
            total_supply: settings.initial_mint,
            user_burnable: false,
            origin_tx_hash: ZERO_HASH,
            updated_at_height: 0,
            updated_at_ms: 0,
        },
    )?;
    events.push(BlockEvent::TokenCreated {
        token_address: NATIVE_TOKEN_ADDRESS,
    });
    events.push(BlockEvent::TokenSupplyUpdated {
        token_address: NATIVE_TOKEN_ADDRESS,
        total_supply: settings.initial_mint,
    });

    // One credit, regardless of whether the pool address doubles as the
    // first authority.
    if !settings.initial_mint.is_zero() {
        let recipient = settings.initial_mint_recipient();
        ws.set_balance(&recipient, &NATIVE_TOKEN_ADDRESS, settings.initial_mint)?;
    }

    for authority in &settings.genesis_authorities {
        ws.add_authority(authority, ZERO_HASH)?;
        events.push(BlockEvent::AuthorityAdded {
            address: *authority,
        });
    }

    ws.set_params(settings.initial_params())?;
    events.push(BlockEvent::NetworkParamsChanged);

    Ok(events)
}

/// Build the (unmined, unsigned) genesis block whose state root commits to
/// the genesis state.
pub fn build_genesis_block(
    store: Arc<dyn ColumnStore>,
    settings: &NetworkSettings,
) -> Result<Block, ChainError> {
    let mut ws = WorldState::open(store, None, StateMode::Validation)?;
    apply_genesis_state(&mut ws, settings)?;
    let state_root = ws.calculate_root_hash()?;

    Ok(Block {
        header: BlockHeader {
            version: 1,
            height: 0,
            timestamp_ms: settings.genesis_timestamp_ms,
            previous_hash: ZERO_HASH,
            difficulty: settings.min_difficulty,
            tx_root_hash: ZERO_HASH,
            state_root_hash: state_root,
            coinbase: ZERO_ADDRESS,
            nonce: 0,
            signature: ZERO_SIGNATURE,
        },
        txs: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::storage::MemoryColumnStore;
    use shared_types::Wei;

    #[test]
    fn genesis_block_is_deterministic() {
        let settings = NetworkSettings::devnet([7u8; 20]);
        let a = build_genesis_block(Arc::new(MemoryColumnStore::new()), &settings).unwrap();
        let b = build_genesis_block(Arc::new(MemoryColumnStore::new()), &settings).unwrap();
        assert_eq!(a.header.hash(), b.header.hash());
        assert_eq!(a.header.height, 0);
    }

    #[test]
    fn initial_mint_is_credited_once_when_pool_is_first_authority() {
        let authority = [7u8; 20];
        let settings = NetworkSettings::devnet(authority);
        assert_eq!(settings.block_reward_pool_address, authority);

        let store = Arc::new(MemoryColumnStore::new());
        let mut ws = WorldState::open(store, None, StateMode::Validation).unwrap();
        apply_genesis_state(&mut ws, &settings).unwrap();

        assert_eq!(
            ws.get_balance(&authority, &NATIVE_TOKEN_ADDRESS).unwrap(),
            settings.initial_mint
        );
        let native = ws.get_token(&NATIVE_TOKEN_ADDRESS).unwrap().unwrap();
        assert_eq!(native.total_supply, settings.initial_mint);
        assert!(ws.is_authority(&authority).unwrap());
        assert_eq!(ws.get_params().unwrap().authority_count, 1);
    }

    #[test]
    fn zero_mint_creates_no_balance() {
        let mut settings = NetworkSettings::devnet([7u8; 20]);
        settings.initial_mint = Wei::zero();

        let store = Arc::new(MemoryColumnStore::new());
        let mut ws = WorldState::open(store, None, StateMode::Validation).unwrap();
        apply_genesis_state(&mut ws, &settings).unwrap();

        assert_eq!(
            ws.get_balance(&[7u8; 20], &NATIVE_TOKEN_ADDRESS).unwrap(),
            Wei::zero()
        );
    }
}
