//! Proposal voting and, on approval, execution of the proposed action.
//!
//! The tally after each recorded vote, with `A` approvers, `D`
//! disapprovers, `T` current authorities and `R` required votes:
//!
//! - `A >= R` approves the proposal
//! - `T - D < R` disapproves it (approval became unreachable)
//! - otherwise it stays pending
//!
//! A proposal whose status reaches `Approved` executes its action exactly
//! once, inside the approving vote's transaction. Action failures are
//! checked-argument errors that fail that transaction as a whole.

use super::{HandlerContext, TxHandler};
use crate::errors::ExecError;
use shared_types::{
    BipPayload, BipStatus, BlockEvent, BurnOutcome, Hash, TokenState, TxPayload, TxType, VoteType,
    Wei,
};
use tracing::debug;

pub struct BipVoteHandler;

impl TxHandler for BipVoteHandler {
    fn supported_type(&self) -> TxType {
        TxType::BipVote
    }

    fn execute(&self, ctx: &mut HandlerContext<'_>) -> Result<(), ExecError> {
        let tx = ctx.tx;

        if !ctx.ws.is_authority(&tx.sender)? {
            return Err(ExecError::NotAuthority(tx.sender));
        }

        let vote = match &tx.payload {
            Some(TxPayload::BipVote { vote }) => *vote,
            Some(_) => return Err(ExecError::WrongPayload),
            None => return Err(ExecError::MissingPayload),
        };

        // The vote targets the proposal created by `reference_hash`.
        let bip_hash = tx.reference_hash;
        let mut bip = ctx
            .ws
            .get_bip(&bip_hash)?
            .ok_or(ExecError::UnknownBip(bip_hash))?;

        if bip.status != BipStatus::Pending {
            return Err(ExecError::BipNotPending(bip_hash));
        }
        if ctx.block.timestamp_ms >= bip.expiration_ms {
            return Err(ExecError::BipExpired(bip_hash));
        }
        if bip.approvers.contains_key(&tx.sender) || bip.disapprovers.contains_key(&tx.sender) {
            return Err(ExecError::AlreadyVoted {
                bip_hash,
                voter: tx.sender,
            });
        }

        match vote {
            VoteType::Approval => bip.approvers.insert(tx.sender, tx.hash()),
            VoteType::Disapproval => bip.disapprovers.insert(tx.sender, tx.hash()),
        };

        let approvals = bip.approvers.len() as u32;
        let disapprovals = bip.disapprovers.len() as u32;
        let authority_count = ctx.ws.get_params()?.authority_count;
        let required = bip.required_votes;
        let max_possible = authority_count.saturating_sub(disapprovals);

        if approvals >= required {
            bip.status = BipStatus::Approved;
        } else if max_possible < required {
            bip.status = BipStatus::Disapproved;
        }

        let execute_action = bip.status == BipStatus::Approved && !bip.action_executed;
        if execute_action {
            bip.action_executed = true;
            bip.executed_at_height = Some(ctx.block.height);
        }

        let status = bip.status;
        let payload = bip.payload.clone();
        let derived_token_address = bip.derived_token_address;
        ctx.ws.set_bip(&bip_hash, bip)?;
        ctx.events.push(BlockEvent::BipStateUpdated { bip_hash, status });

        if execute_action {
            debug!(bip = %shared_types::short_hex(&bip_hash), "proposal approved, applying action");
            apply_action(ctx, bip_hash, &payload, derived_token_address)?;
        }

        Ok(())
    }
}

/// Apply an approved proposal's action. All failures are checked-argument
/// errors that abort the voting transaction.
fn apply_action(
    ctx: &mut HandlerContext<'_>,
    bip_hash: Hash,
    payload: &BipPayload,
    derived_token_address: Option<shared_types::Address>,
) -> Result<(), ExecError> {
    match payload {
        BipPayload::TokenCreate {
            name,
            ticker,
            decimals,
            website_url,
            logo_url,
            max_supply,
            user_burnable,
        } => {
            let token_address = derived_token_address.ok_or(ExecError::WrongPayload)?;
            if !ctx.ws.check_and_mark_token_as_updated(&token_address) {
                return Err(ExecError::TokenTouchedTwice(token_address));
            }
            if ctx.ws.get_token(&token_address)?.is_some() {
                return Err(ExecError::TokenAlreadyExists(token_address));
            }

            ctx.ws.set_token(
                &token_address,
                TokenState {
                    name: name.clone(),
                    ticker: ticker.clone(),
                    decimals: *decimals,
                    website_url: website_url.clone(),
                    logo_url: logo_url.clone(),
                    max_supply: *max_supply,
                    total_supply: Wei::zero(),
                    user_burnable: *user_burnable,
                    origin_tx_hash: bip_hash,
                    updated_at_height: 0,
                    updated_at_ms: 0,
                },
            )?;
            ctx.events.push(BlockEvent::TokenCreated { token_address });
        }

        BipPayload::TokenUpdate {
            token_address,
            name,
            ticker,
            website_url,
            logo_url,
        } => {
            let mut token = ctx
                .ws
                .get_token(token_address)?
                .ok_or(ExecError::UnknownToken(*token_address))?;
            if let Some(name) = name {
                token.name = name.clone();
            }
            if let Some(ticker) = ticker {
                token.ticker = ticker.clone();
            }
            if let Some(url) = website_url {
                token.website_url = Some(url.clone());
            }
            if let Some(url) = logo_url {
                token.logo_url = Some(url.clone());
            }
            ctx.ws.set_token(token_address, token)?;
            ctx.events.push(BlockEvent::TokenUpdated {
                token_address: *token_address,
            });
        }

        BipPayload::TokenMint {
            token_address,
            recipient,
            amount,
        } => {
            let mut token = ctx
                .ws
                .get_token(token_address)?
                .ok_or(ExecError::UnknownToken(*token_address))?;
            if let Some(max_supply) = token.max_supply {
                if token.total_supply.saturating_add(*amount) > max_supply {
                    return Err(ExecError::MaxSupplyExceeded {
                        amount: *amount,
                        max_supply,
                    });
                }
            }
            token.total_supply = token.total_supply.saturating_add(*amount);
            let total_supply = token.total_supply;
            ctx.ws.set_token(token_address, token)?;
            ctx.ws.credit_balance(recipient, token_address, *amount)?;

            ctx.events.push(BlockEvent::TokenMinted {
                token_address: *token_address,
                recipient: *recipient,
                amount: *amount,
            });
            ctx.events.push(BlockEvent::TokenSupplyUpdated {
                token_address: *token_address,
                total_supply,
            });
        }

        BipPayload::TokenBurn {
            token_address,
            owner,
            amount,
        } => {
            let mut token = ctx
                .ws
                .get_token(token_address)?
                .ok_or(ExecError::UnknownToken(*token_address))?;

            // The burn is capped at whatever the owner actually holds.
            let available = ctx.ws.get_balance(owner, token_address)?;
            let actual = (*amount).min(available);

            ctx.ws.debit_balance(owner, token_address, actual)?;
            token.total_supply = token.total_supply.saturating_sub(actual);
            let total_supply = token.total_supply;
            ctx.ws.set_token(token_address, token)?;

            ctx.burn_outcomes.insert(
                bip_hash,
                BurnOutcome {
                    requested: *amount,
                    actual,
                },
            );
            ctx.events.push(BlockEvent::TokenBurned {
                token_address: *token_address,
                owner: *owner,
                requested: *amount,
                actual,
            });
            ctx.events.push(BlockEvent::TokenSupplyUpdated {
                token_address: *token_address,
                total_supply,
            });
        }

        BipPayload::AuthorityAdd { address } => {
            if ctx.ws.is_authority(address)? {
                return Err(ExecError::AuthorityAlreadyExists(*address));
            }
            ctx.ws.add_authority(address, bip_hash)?;

            let mut params = ctx.ws.get_params()?;
            params.authority_count += 1;
            ctx.ws.set_params(params)?;

            ctx.events.push(BlockEvent::AuthorityAdded { address: *address });
        }

        BipPayload::AuthorityRemove { address } => {
            if !ctx.ws.is_authority(address)? {
                return Err(ExecError::UnknownAuthority(*address));
            }
            let mut params = ctx.ws.get_params()?;
            if params.authority_count <= 1 {
                return Err(ExecError::LastAuthority);
            }
            ctx.ws.remove_authority(address)?;
            params.authority_count -= 1;
            ctx.ws.set_params(params)?;

            ctx.events
                .push(BlockEvent::AuthorityRemoved { address: *address });
        }

        BipPayload::NetworkParamsSet(update) => {
            if ctx.ws.is_params_changed_this_block() {
                return Err(ExecError::ParamsAlreadyChanged);
            }
            let mut params = ctx.ws.get_params()?;

            if let Some(reward) = update.block_reward {
                params.block_reward = reward;
            }
            if let Some(pool) = update.block_reward_pool_address {
                params.block_reward_pool_address = pool;
            }
            if let Some(target) = update.target_mining_time_ms {
                params.target_mining_time_ms = target;
            }
            if let Some(half_life) = update.asert_half_life_blocks {
                params.asert_half_life_blocks = half_life;
            }
            if let Some(min_difficulty) = update.min_difficulty {
                params.min_difficulty = min_difficulty;
            }
            if let Some(base) = update.min_tx_base_fee {
                params.min_tx_base_fee = base;
            }
            if let Some(byte) = update.min_tx_byte_fee {
                params.min_tx_byte_fee = byte;
            }
            // Changing the schedule re-anchors difficulty at this height.
            if update.resets_asert_anchor() {
                params.asert_anchor_height = ctx.block.height;
            }

            ctx.ws.set_params(params)?;
            ctx.ws.mark_params_changed();
            ctx.events.push(BlockEvent::NetworkParamsChanged);
        }

        BipPayload::AddressAliasAdd { alias, address } => {
            if ctx.ws.get_alias(alias)?.is_some() {
                return Err(ExecError::AliasTaken(alias.clone()));
            }
            ctx.ws.add_alias(alias, *address, bip_hash)?;
            ctx.events.push(BlockEvent::AddressAliasAdded {
                alias: alias.clone(),
                address: *address,
            });
        }

        BipPayload::AddressAliasRemove { alias } => {
            if ctx.ws.get_alias(alias)?.is_none() {
                return Err(ExecError::UnknownAlias(alias.clone()));
            }
            ctx.ws.remove_alias(alias)?;
            ctx.events.push(BlockEvent::AddressAliasRemoved {
                alias: alias.clone(),
            });
        }
    }

    Ok(())
}
