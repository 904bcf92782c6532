//! # Network Settings
//!
//! Load-once constants describing a network: genesis composition, initial
//! parameters and governance rules. Shared as an `Arc` handle, immutable
//! after initialization.

use crate::entities::{GovernanceRules, NetworkParamsState};
use crate::primitives::{Address, Wei, ZERO_ADDRESS};
use primitive_types::U256;
use serde::{Deserialize, Serialize};

/// Constants of one chain deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSettings {
    /// Network identifier carried by every transaction and handshake.
    pub network_id: u32,
    /// Genesis block timestamp, milliseconds.
    pub genesis_timestamp_ms: u64,
    /// Authorities enrolled at genesis. Must not be empty.
    pub genesis_authorities: Vec<Address>,
    /// Native amount minted at genesis into the reward pool (or, when the
    /// pool is the zero address, into the first authority).
    pub initial_mint: Wei,
    /// Reward pool address. Zero means inflationary rewards.
    pub block_reward_pool_address: Address,
    /// Native token display metadata.
    pub native_token_name: String,
    pub native_token_ticker: String,
    pub native_token_decimals: u8,
    /// Initial governed parameters.
    pub block_reward: Wei,
    pub target_mining_time_ms: u64,
    pub asert_half_life_blocks: u64,
    pub min_difficulty: U256,
    pub min_tx_base_fee: Wei,
    pub min_tx_byte_fee: Wei,
    /// Governance constants.
    pub governance: GovernanceRules,
    /// Hard cap on the encoded size of a block.
    pub max_block_size: u64,
}

impl NetworkSettings {
    /// The network-parameter record as of genesis.
    pub fn initial_params(&self) -> NetworkParamsState {
        NetworkParamsState {
            block_reward: self.block_reward,
            block_reward_pool_address: self.block_reward_pool_address,
            target_mining_time_ms: self.target_mining_time_ms,
            asert_half_life_blocks: self.asert_half_life_blocks,
            asert_anchor_height: 0,
            min_difficulty: self.min_difficulty,
            min_tx_base_fee: self.min_tx_base_fee,
            min_tx_byte_fee: self.min_tx_byte_fee,
            authority_count: self.genesis_authorities.len() as u32,
            updated_at_height: 0,
            updated_at_ms: self.genesis_timestamp_ms,
        }
    }

    /// The address credited with the initial mint.
    pub fn initial_mint_recipient(&self) -> Address {
        if self.block_reward_pool_address != ZERO_ADDRESS {
            self.block_reward_pool_address
        } else {
            self.genesis_authorities[0]
        }
    }

    /// Settings for a local development network: one authority, low
    /// difficulty, fast blocks.
    pub fn devnet(authority: Address) -> Self {
        Self {
            network_id: 1337,
            genesis_timestamp_ms: 1_700_000_000_000,
            genesis_authorities: vec![authority],
            initial_mint: Wei::from(1_000_000u64),
            block_reward_pool_address: authority,
            native_token_name: "Aurum".to_string(),
            native_token_ticker: "AUR".to_string(),
            native_token_decimals: 18,
            block_reward: Wei::from(50u64),
            target_mining_time_ms: 10_000,
            asert_half_life_blocks: 288,
            min_difficulty: U256::from(1_000u64),
            min_tx_base_fee: Wei::one(),
            min_tx_byte_fee: Wei::zero(),
            governance: GovernanceRules {
                approval_threshold_bps: 6_667,
                bip_expiration_period_ms: 7 * 24 * 60 * 60 * 1000,
            },
            max_block_size: 1_000_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn devnet_mints_to_pool() {
        let authority = [1u8; 20];
        let settings = NetworkSettings::devnet(authority);
        assert_eq!(settings.initial_mint_recipient(), authority);
        assert_eq!(settings.initial_params().authority_count, 1);
    }

    #[test]
    fn zero_pool_mints_to_first_authority() {
        let mut settings = NetworkSettings::devnet([1u8; 20]);
        settings.block_reward_pool_address = ZERO_ADDRESS;
        assert_eq!(settings.initial_mint_recipient(), [1u8; 20]);
    }
}
