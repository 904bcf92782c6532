//! # State Processor
//!
//! Runs a batch of transactions under one block: nonce and fee validation,
//! handler dispatch, per-transaction snapshot/revert, and the closing reward
//! distribution.
//!
//! Fee accounting follows two regimes: a user-paid transaction (transfers)
//! has its fee debited from the sender, while system transaction fees are
//! minted. Either way the coinbase collects every fee of the block on top
//! of the block reward.

use crate::errors::{ExecError, ProcessorError};
use crate::handlers::{HandlerContext, HandlerRegistry};
use au_02_world_state::WorldState;
use shared_types::{
    BlockEvent, BurnOutcome, GovernanceRules, Hash, NetworkParamsState, SimpleBlock, Tx, Wei,
    NATIVE_TOKEN_ADDRESS, ZERO_ADDRESS,
};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Failure policy for a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    /// Block validation: the first failing transaction is fatal.
    Strict,
    /// Template assembly: failing transactions are dropped and reported.
    Mining,
}

/// Outcome of executing a batch.
#[derive(Debug, Default)]
pub struct ExecutionResult {
    pub valid_txs: Vec<Tx>,
    pub invalid_txs: Vec<(Tx, ExecError)>,
    pub total_fees: Wei,
    pub total_supply_increase: Wei,
    pub miner_reward_paid: Wei,
    pub burn_outcomes: BTreeMap<Hash, BurnOutcome>,
    pub events: Vec<BlockEvent>,
}

/// Deterministic batch executor.
pub struct StateProcessor {
    registry: HandlerRegistry,
    rules: GovernanceRules,
}

impl StateProcessor {
    pub fn new(rules: GovernanceRules) -> Self {
        Self {
            registry: HandlerRegistry::standard(),
            rules,
        }
    }

    /// Execute `txs` against `ws` under `block`, then distribute rewards.
    ///
    /// `params` is the parameter record as of the parent block; fee floors
    /// and the reward come from it even if a governance action changes the
    /// live record mid-block.
    pub fn execute_batch(
        &self,
        ws: &mut WorldState,
        block: SimpleBlock,
        txs: &[Tx],
        params: &NetworkParamsState,
        mode: ExecMode,
    ) -> Result<ExecutionResult, ProcessorError> {
        ws.set_block_context(block.height, block.timestamp_ms);

        let mut result = ExecutionResult::default();
        let mut to_mint = Wei::zero();

        for tx in txs {
            let snapshot = ws.create_snapshot();
            let mut tx_events = Vec::new();
            let mut tx_burns = BTreeMap::new();

            let outcome = (|| -> Result<(), ExecError> {
                self.validate_and_deduct_fee(ws, tx, params)?;
                let handler = self
                    .registry
                    .get(tx.tx_type)
                    .ok_or(ExecError::WrongPayload)?;
                let mut ctx = HandlerContext {
                    ws: &mut *ws,
                    tx,
                    block,
                    params,
                    rules: &self.rules,
                    burn_outcomes: &mut tx_burns,
                    events: &mut tx_events,
                };
                handler.execute(&mut ctx)
            })();

            match outcome {
                Ok(()) => {
                    result.total_fees = result.total_fees.saturating_add(tx.fee);
                    if !tx.tx_type.is_user_paid() {
                        // System transaction fees enter circulation freshly.
                        to_mint = to_mint.saturating_add(tx.fee);
                    }
                    result.events.append(&mut tx_events);
                    result.burn_outcomes.append(&mut tx_burns);
                    result.valid_txs.push(tx.clone());
                }
                Err(reason) => match mode {
                    ExecMode::Strict => {
                        return Err(ProcessorError::TxValidationFailed {
                            tx_hash: tx.hash(),
                            reason,
                        });
                    }
                    ExecMode::Mining => {
                        warn!(tx = %shared_types::short_hex(&tx.hash()), %reason, "dropping invalid transaction from template");
                        ws.revert_to_snapshot(snapshot)?;
                        result.invalid_txs.push((tx.clone(), reason));
                    }
                },
            }
        }

        if block.height > 0 {
            self.distribute_rewards(ws, &block, params, &mut result, to_mint)?;
        }

        Ok(result)
    }

    /// Nonce continuity, fee floor, and the fee debit for user-paid types.
    fn validate_and_deduct_fee(
        &self,
        ws: &mut WorldState,
        tx: &Tx,
        params: &NetworkParamsState,
    ) -> Result<(), ExecError> {
        let state_nonce = ws.get_nonce(&tx.sender)?.nonce;
        let expected = state_nonce + 1;
        if i64::try_from(tx.nonce) != Ok(expected) {
            return Err(ExecError::InvalidNonce {
                expected,
                got: tx.nonce,
            });
        }
        ws.set_nonce(&tx.sender, expected)?;

        let required = params.required_fee(tx.encoded_size());
        if tx.fee < required {
            return Err(ExecError::FeeTooLow {
                required,
                got: tx.fee,
            });
        }

        if tx.tx_type.is_user_paid() {
            ws.debit_balance(&tx.sender, &NATIVE_TOKEN_ADDRESS, tx.fee)?;
        }
        Ok(())
    }

    /// Pay the coinbase: block reward (from the pool or freshly minted) plus
    /// every collected fee; mint whatever entered circulation.
    fn distribute_rewards(
        &self,
        ws: &mut WorldState,
        block: &SimpleBlock,
        params: &NetworkParamsState,
        result: &mut ExecutionResult,
        mut to_mint: Wei,
    ) -> Result<(), ProcessorError> {
        let pool = params.block_reward_pool_address;
        if pool == block.coinbase {
            return Err(ProcessorError::PoolIsCoinbase);
        }

        let actual_reward = if pool == ZERO_ADDRESS {
            // Inflationary regime: the reward is minted.
            to_mint = to_mint.saturating_add(params.block_reward);
            params.block_reward
        } else {
            // Pool-funded regime: pay out what the pool can cover.
            let pool_balance = ws.get_balance(&pool, &NATIVE_TOKEN_ADDRESS)?;
            let actual = pool_balance.min(params.block_reward);
            if !actual.is_zero() {
                ws.debit_balance(&pool, &NATIVE_TOKEN_ADDRESS, actual)?;
            }
            actual
        };

        let payout = actual_reward.saturating_add(result.total_fees);
        if !payout.is_zero() {
            ws.credit_balance(&block.coinbase, &NATIVE_TOKEN_ADDRESS, payout)?;
        }

        if !to_mint.is_zero() {
            let mut native = ws
                .get_token(&NATIVE_TOKEN_ADDRESS)?
                .ok_or(ProcessorError::MissingNativeToken)?;
            native.total_supply = native.total_supply.saturating_add(to_mint);
            let total_supply = native.total_supply;
            ws.set_token(&NATIVE_TOKEN_ADDRESS, native)?;
            result.events.push(BlockEvent::TokenSupplyUpdated {
                token_address: NATIVE_TOKEN_ADDRESS,
                total_supply,
            });
        }

        result.events.push(BlockEvent::BlockReward {
            coinbase: block.coinbase,
            amount: actual_reward,
        });
        if !result.total_fees.is_zero() {
            result.events.push(BlockEvent::FeesCollected {
                coinbase: block.coinbase,
                amount: result.total_fees,
            });
        }

        result.total_supply_increase = to_mint;
        result.miner_reward_paid = payout;
        debug!(
            height = block.height,
            reward = %actual_reward,
            fees = %result.total_fees,
            minted = %to_mint,
            "rewards distributed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use au_02_world_state::{StateMode, WorldState};
    use shared_types::storage::MemoryColumnStore;
    use shared_types::{
        derive_token_address, Address, BipPayload, BipStatus, TokenState, TxPayload, TxType,
        VoteType, ZERO_HASH, ZERO_SIGNATURE,
    };
    use std::sync::Arc;

    const ALICE: Address = [0xA1; 20];
    const BOB: Address = [0xB2; 20];
    const CAROL: Address = [0xC3; 20];
    const MINER: Address = [0xD4; 20];

    fn rules() -> GovernanceRules {
        GovernanceRules {
            approval_threshold_bps: 6_667,
            bip_expiration_period_ms: 1_000_000,
        }
    }

    fn params(pool: Address, authority_count: u32) -> NetworkParamsState {
        NetworkParamsState {
            block_reward: Wei::from(50u64),
            block_reward_pool_address: pool,
            target_mining_time_ms: 10_000,
            asert_half_life_blocks: 288,
            asert_anchor_height: 0,
            min_difficulty: Wei::from(1_000u64),
            min_tx_base_fee: Wei::one(),
            min_tx_byte_fee: Wei::zero(),
            authority_count,
            updated_at_height: 0,
            updated_at_ms: 0,
        }
    }

    /// World state seeded the way genesis would: native token, authorities,
    /// params, and the initial mint on the pool.
    fn seed(
        mode: StateMode,
        authorities: &[Address],
        p: &NetworkParamsState,
        initial_mint: Wei,
        mint_to: Address,
    ) -> WorldState {
        let store = Arc::new(MemoryColumnStore::new());
        let mut ws = WorldState::open(store, None, mode).unwrap();
        ws.set_block_context(0, 1_000);

        ws.set_token(
            &NATIVE_TOKEN_ADDRESS,
            TokenState {
                name: "Aurum".into(),
                ticker: "AUR".into(),
                decimals: 18,
                website_url: None,
                logo_url: None,
                max_supply: None,
                total_supply: initial_mint,
                user_burnable: false,
                origin_tx_hash: ZERO_HASH,
                updated_at_height: 0,
                updated_at_ms: 0,
            },
        )
        .unwrap();
        if !initial_mint.is_zero() {
            ws.set_balance(&mint_to, &NATIVE_TOKEN_ADDRESS, initial_mint)
                .unwrap();
        }
        for authority in authorities {
            ws.add_authority(authority, ZERO_HASH).unwrap();
        }
        ws.set_params(p.clone()).unwrap();
        ws
    }

    fn transfer(sender: Address, nonce: u64, recipient: Address, amount: u64, fee: u64) -> Tx {
        let mut tx = Tx::transfer_template(
            1,
            nonce,
            recipient,
            NATIVE_TOKEN_ADDRESS,
            Wei::from(amount),
            Wei::from(fee),
        );
        tx.sender = sender;
        tx
    }

    fn governance_tx(
        sender: Address,
        nonce: u64,
        tx_type: TxType,
        payload: TxPayload,
        reference_hash: Hash,
    ) -> Tx {
        Tx {
            version: 1,
            tx_type,
            network: 1,
            timestamp_ms: 0,
            nonce,
            recipient: ZERO_ADDRESS,
            token_address: ZERO_ADDRESS,
            amount: Wei::zero(),
            fee: Wei::one(),
            message: String::new(),
            payload: Some(payload),
            reference_hash,
            signature: ZERO_SIGNATURE,
            sender,
        }
    }

    fn block(height: u64, coinbase: Address) -> SimpleBlock {
        SimpleBlock {
            height,
            timestamp_ms: 1_000 + height * 10_000,
            coinbase,
        }
    }

    fn native_balance(ws: &mut WorldState, address: &Address) -> u64 {
        ws.get_balance(address, &NATIVE_TOKEN_ADDRESS)
            .unwrap()
            .as_u64()
    }

    // =========================================================================
    // SCENARIOS
    // =========================================================================

    #[test]
    fn genesis_and_first_transfer() {
        let p = params(ALICE, 1);
        let mut ws = seed(
            StateMode::Validation,
            &[ALICE],
            &p,
            Wei::from(1_000_000u64),
            ALICE,
        );

        let processor = StateProcessor::new(rules());
        let result = processor
            .execute_batch(
                &mut ws,
                block(1, MINER),
                &[transfer(ALICE, 0, BOB, 100, 1)],
                &p,
                ExecMode::Strict,
            )
            .unwrap();

        assert_eq!(result.valid_txs.len(), 1);
        assert_eq!(native_balance(&mut ws, &ALICE), 1_000_000 - 100 - 1 - 50);
        assert_eq!(native_balance(&mut ws, &BOB), 100);
        assert_eq!(native_balance(&mut ws, &MINER), 51);
        assert_eq!(ws.get_nonce(&ALICE).unwrap().nonce, 0);
        assert_eq!(result.miner_reward_paid, Wei::from(51u64));
        // User-paid fee + pool-funded reward: nothing was minted.
        assert_eq!(result.total_supply_increase, Wei::zero());
        let native = ws.get_token(&NATIVE_TOKEN_ADDRESS).unwrap().unwrap();
        assert_eq!(native.total_supply, Wei::from(1_000_000u64));

        // Conservation: every native wei is accounted for.
        let sum = native_balance(&mut ws, &ALICE)
            + native_balance(&mut ws, &BOB)
            + native_balance(&mut ws, &MINER);
        assert_eq!(Wei::from(sum), native.total_supply);
    }

    #[test]
    fn bip_token_create_approve_and_mint() {
        let p = params(ZERO_ADDRESS, 2);
        let mut ws = seed(StateMode::Validation, &[ALICE, BOB], &p, Wei::zero(), ALICE);
        // Inflationary pool needs the native token record only.
        let processor = StateProcessor::new(rules());

        let create = governance_tx(
            ALICE,
            0,
            TxType::BipCreate,
            TxPayload::BipCreate(BipPayload::TokenCreate {
                name: "X".into(),
                ticker: "X".into(),
                decimals: 0,
                website_url: None,
                logo_url: None,
                max_supply: Some(Wei::from(1_000u64)),
                user_burnable: true,
            }),
            ZERO_HASH,
        );
        let bip_hash = create.hash();
        let derived = derive_token_address(&ALICE, 0);

        processor
            .execute_batch(&mut ws, block(5, MINER), &[create], &p, ExecMode::Strict)
            .unwrap();
        assert_eq!(
            ws.get_bip(&bip_hash).unwrap().unwrap().status,
            BipStatus::Pending
        );

        // First approval: 1 of 2 required, still pending.
        let vote_a = governance_tx(
            ALICE,
            1,
            TxType::BipVote,
            TxPayload::BipVote {
                vote: VoteType::Approval,
            },
            bip_hash,
        );
        processor
            .execute_batch(&mut ws, block(6, MINER), &[vote_a], &p, ExecMode::Strict)
            .unwrap();
        assert_eq!(
            ws.get_bip(&bip_hash).unwrap().unwrap().status,
            BipStatus::Pending
        );
        assert!(ws.get_token(&derived).unwrap().is_none());

        // Second approval crosses the threshold and executes the action.
        let vote_b = governance_tx(
            BOB,
            0,
            TxType::BipVote,
            TxPayload::BipVote {
                vote: VoteType::Approval,
            },
            bip_hash,
        );
        processor
            .execute_batch(&mut ws, block(7, MINER), &[vote_b], &p, ExecMode::Strict)
            .unwrap();

        let bip = ws.get_bip(&bip_hash).unwrap().unwrap();
        assert_eq!(bip.status, BipStatus::Approved);
        assert!(bip.action_executed);
        let token = ws.get_token(&derived).unwrap().unwrap();
        assert_eq!(token.total_supply, Wei::zero());

        // Mint through a second proposal.
        let mint = governance_tx(
            ALICE,
            2,
            TxType::BipCreate,
            TxPayload::BipCreate(BipPayload::TokenMint {
                token_address: derived,
                recipient: CAROL,
                amount: Wei::from(500u64),
            }),
            ZERO_HASH,
        );
        let mint_hash = mint.hash();
        processor
            .execute_batch(&mut ws, block(8, MINER), &[mint], &p, ExecMode::Strict)
            .unwrap();
        for (voter, nonce) in [(ALICE, 3), (BOB, 1)] {
            let vote = governance_tx(
                voter,
                nonce,
                TxType::BipVote,
                TxPayload::BipVote {
                    vote: VoteType::Approval,
                },
                mint_hash,
            );
            processor
                .execute_batch(&mut ws, block(9, MINER), &[vote], &p, ExecMode::Strict)
                .unwrap();
        }

        assert_eq!(
            ws.get_balance(&CAROL, &derived).unwrap(),
            Wei::from(500u64)
        );
        assert_eq!(
            ws.get_token(&derived).unwrap().unwrap().total_supply,
            Wei::from(500u64)
        );
    }

    #[test]
    fn burn_is_capped_at_owner_balance() {
        let p = params(ZERO_ADDRESS, 1);
        let mut ws = seed(StateMode::Validation, &[ALICE], &p, Wei::zero(), ALICE);

        let token_address = [0x77u8; 20];
        ws.set_token(
            &token_address,
            TokenState {
                name: "Burnable".into(),
                ticker: "BRN".into(),
                decimals: 0,
                website_url: None,
                logo_url: None,
                max_supply: None,
                total_supply: Wei::from(1_000u64),
                user_burnable: true,
                origin_tx_hash: ZERO_HASH,
                updated_at_height: 0,
                updated_at_ms: 0,
            },
        )
        .unwrap();
        ws.set_balance(&CAROL, &token_address, Wei::from(600u64))
            .unwrap();

        let processor = StateProcessor::new(rules());
        let burn = governance_tx(
            ALICE,
            0,
            TxType::BipCreate,
            TxPayload::BipCreate(BipPayload::TokenBurn {
                token_address,
                owner: CAROL,
                amount: Wei::from(1_000u64),
            }),
            ZERO_HASH,
        );
        let bip_hash = burn.hash();
        processor
            .execute_batch(&mut ws, block(1, MINER), &[burn], &p, ExecMode::Strict)
            .unwrap();

        // One authority, threshold 6667 bps: a single approval executes.
        let vote = governance_tx(
            ALICE,
            1,
            TxType::BipVote,
            TxPayload::BipVote {
                vote: VoteType::Approval,
            },
            bip_hash,
        );
        let result = processor
            .execute_batch(&mut ws, block(2, MINER), &[vote], &p, ExecMode::Strict)
            .unwrap();

        assert_eq!(ws.get_balance(&CAROL, &token_address).unwrap(), Wei::zero());
        assert_eq!(
            ws.get_token(&token_address).unwrap().unwrap().total_supply,
            Wei::from(400u64)
        );
        let outcome = result.burn_outcomes.get(&bip_hash).unwrap();
        assert_eq!(outcome.requested, Wei::from(1_000u64));
        assert_eq!(outcome.actual, Wei::from(600u64));
        assert!(result.events.iter().any(|e| matches!(
            e,
            BlockEvent::TokenBurned { requested, actual, .. }
                if *requested == Wei::from(1_000u64) && *actual == Wei::from(600u64)
        )));
    }

    #[test]
    fn short_pool_pays_partial_reward() {
        let pool = [0xE5u8; 20];
        let p = params(pool, 1);
        let mut ws = seed(StateMode::Validation, &[ALICE], &p, Wei::from(30u64), pool);

        let processor = StateProcessor::new(rules());
        let result = processor
            .execute_batch(&mut ws, block(1, MINER), &[], &p, ExecMode::Strict)
            .unwrap();

        assert_eq!(native_balance(&mut ws, &MINER), 30);
        assert_eq!(native_balance(&mut ws, &pool), 0);
        assert_eq!(result.miner_reward_paid, Wei::from(30u64));
        assert_eq!(result.total_supply_increase, Wei::zero());
        assert_eq!(
            ws.get_token(&NATIVE_TOKEN_ADDRESS)
                .unwrap()
                .unwrap()
                .total_supply,
            Wei::from(30u64)
        );
    }

    #[test]
    fn nonce_gap_is_rejected() {
        let p = params(ZERO_ADDRESS, 1);
        let mut ws = seed(
            StateMode::Validation,
            &[ALICE],
            &p,
            Wei::from(1_000u64),
            ALICE,
        );
        ws.set_nonce(&ALICE, 4).unwrap();

        let processor = StateProcessor::new(rules());
        let err = processor
            .execute_batch(
                &mut ws,
                block(1, MINER),
                &[transfer(ALICE, 6, BOB, 10, 1)],
                &p,
                ExecMode::Strict,
            )
            .unwrap_err();

        match err {
            ProcessorError::TxValidationFailed { reason, .. } => match reason {
                ExecError::InvalidNonce { expected, got } => {
                    assert_eq!(expected, 5);
                    assert_eq!(got, 6);
                }
                other => panic!("unexpected reason: {other}"),
            },
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(native_balance(&mut ws, &BOB), 0);
    }

    #[test]
    fn mining_mode_drops_invalid_and_keeps_going() {
        let p = params(ZERO_ADDRESS, 1);
        let mut ws = seed(
            StateMode::Mining,
            &[ALICE],
            &p,
            Wei::from(1_000u64),
            ALICE,
        );

        let txs = vec![
            transfer(ALICE, 0, BOB, 100, 1),
            // Nonce gap: dropped, not fatal.
            transfer(ALICE, 3, BOB, 100, 1),
            transfer(ALICE, 1, CAROL, 50, 1),
        ];

        let processor = StateProcessor::new(rules());
        let result = processor
            .execute_batch(&mut ws, block(1, MINER), &txs, &p, ExecMode::Mining)
            .unwrap();

        assert_eq!(result.valid_txs.len(), 2);
        assert_eq!(result.invalid_txs.len(), 1);
        assert_eq!(native_balance(&mut ws, &BOB), 100);
        assert_eq!(native_balance(&mut ws, &CAROL), 50);
    }

    #[test]
    fn fee_below_floor_is_dropped() {
        let mut p = params(ZERO_ADDRESS, 1);
        p.min_tx_base_fee = Wei::from(10u64);
        let mut ws = seed(
            StateMode::Mining,
            &[ALICE],
            &p,
            Wei::from(1_000u64),
            ALICE,
        );

        let processor = StateProcessor::new(rules());
        let result = processor
            .execute_batch(
                &mut ws,
                block(1, MINER),
                &[transfer(ALICE, 0, BOB, 5, 2)],
                &p,
                ExecMode::Mining,
            )
            .unwrap();

        assert!(result.valid_txs.is_empty());
        assert!(matches!(
            result.invalid_txs[0].1,
            ExecError::FeeTooLow { .. }
        ));
        // The nonce bump was reverted with the snapshot.
        assert_eq!(ws.get_nonce(&ALICE).unwrap().nonce, -1);
    }

    #[test]
    fn pool_equal_to_coinbase_is_fatal() {
        let p = params(MINER, 1);
        let mut ws = seed(
            StateMode::Validation,
            &[ALICE],
            &p,
            Wei::from(100u64),
            MINER,
        );

        let processor = StateProcessor::new(rules());
        let err = processor
            .execute_batch(&mut ws, block(1, MINER), &[], &p, ExecMode::Strict)
            .unwrap_err();
        assert!(matches!(err, ProcessorError::PoolIsCoinbase));
    }

    #[test]
    fn unreachable_approval_disapproves() {
        let authorities = [ALICE, BOB, CAROL];
        let p = params(ZERO_ADDRESS, 3);
        let mut ws = seed(StateMode::Validation, &authorities, &p, Wei::zero(), ALICE);

        let processor = StateProcessor::new(rules());
        // Three authorities at 6667 bps: all three must approve.
        let create = governance_tx(
            ALICE,
            0,
            TxType::BipCreate,
            TxPayload::BipCreate(BipPayload::AuthorityAdd { address: [9u8; 20] }),
            ZERO_HASH,
        );
        let bip_hash = create.hash();
        processor
            .execute_batch(&mut ws, block(1, MINER), &[create], &p, ExecMode::Strict)
            .unwrap();

        let disapprove = governance_tx(
            BOB,
            0,
            TxType::BipVote,
            TxPayload::BipVote {
                vote: VoteType::Disapproval,
            },
            bip_hash,
        );
        processor
            .execute_batch(&mut ws, block(2, MINER), &[disapprove], &p, ExecMode::Strict)
            .unwrap();

        // One disapproval leaves only 2 possible approvers of 3 required.
        let bip = ws.get_bip(&bip_hash).unwrap().unwrap();
        assert_eq!(bip.status, BipStatus::Disapproved);
        assert!(!bip.action_executed);
        assert!(!ws.is_authority(&[9u8; 20]).unwrap());
    }

    #[test]
    fn params_change_twice_in_block_fails() {
        let p = params(ZERO_ADDRESS, 1);
        let mut ws = seed(StateMode::Mining, &[ALICE], &p, Wei::zero(), ALICE);

        let processor = StateProcessor::new(rules());
        let make_params_bip = |nonce: u64| {
            governance_tx(
                ALICE,
                nonce,
                TxType::BipCreate,
                TxPayload::BipCreate(BipPayload::NetworkParamsSet(
                    shared_types::NetworkParamsUpdate {
                        block_reward: Some(Wei::from(nonce + 10)),
                        ..Default::default()
                    },
                )),
                ZERO_HASH,
            )
        };

        let first = make_params_bip(0);
        let second = make_params_bip(1);
        let first_hash = first.hash();
        let second_hash = second.hash();
        let vote = |nonce: u64, target: Hash| {
            governance_tx(
                ALICE,
                nonce,
                TxType::BipVote,
                TxPayload::BipVote {
                    vote: VoteType::Approval,
                },
                target,
            )
        };

        // Both proposals and both approving votes land in one block; the
        // second action must fail and only its transaction is dropped.
        let txs = vec![first, second, vote(2, first_hash), vote(3, second_hash)];
        let result = processor
            .execute_batch(&mut ws, block(1, MINER), &txs, &p, ExecMode::Mining)
            .unwrap();

        assert_eq!(result.valid_txs.len(), 3);
        assert_eq!(result.invalid_txs.len(), 1);
        assert!(matches!(
            result.invalid_txs[0].1,
            ExecError::ParamsAlreadyChanged
        ));
        assert_eq!(ws.get_params().unwrap().block_reward, Wei::from(10u64));
    }
}
