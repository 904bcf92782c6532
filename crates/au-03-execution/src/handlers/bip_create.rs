//! Proposal creation: an authority submits a governance action for voting.

use super::{HandlerContext, TxHandler};
use crate::errors::ExecError;
use shared_types::{
    derive_token_address, BipPayloadKind, BipState, BipStatus, BlockEvent, TxPayload, TxType,
};
use std::collections::BTreeMap;

pub struct BipCreateHandler;

impl TxHandler for BipCreateHandler {
    fn supported_type(&self) -> TxType {
        TxType::BipCreate
    }

    fn execute(&self, ctx: &mut HandlerContext<'_>) -> Result<(), ExecError> {
        let tx = ctx.tx;

        if !ctx.ws.is_authority(&tx.sender)? {
            return Err(ExecError::NotAuthority(tx.sender));
        }

        let payload = match &tx.payload {
            Some(TxPayload::BipCreate(payload)) => payload.clone(),
            Some(_) => return Err(ExecError::WrongPayload),
            None => return Err(ExecError::MissingPayload),
        };

        // The proposal is keyed by the hash of the transaction creating it.
        let bip_hash = tx.hash();
        if ctx.ws.get_bip(&bip_hash)?.is_some() {
            return Err(ExecError::BipAlreadyExists(bip_hash));
        }

        let authority_count = ctx.ws.get_params()?.authority_count;
        if authority_count == 0 {
            return Err(ExecError::NoAuthorities);
        }
        let required_votes = ctx.rules.required_votes(authority_count);

        // A token-create proposal fixes its token address at creation time,
        // derived from the proposer and their nonce.
        let derived_token_address = match payload.kind() {
            BipPayloadKind::TokenCreate => Some(derive_token_address(&tx.sender, tx.nonce)),
            _ => None,
        };

        let bip = BipState {
            status: BipStatus::Pending,
            action_executed: false,
            required_votes,
            approvers: BTreeMap::new(),
            disapprovers: BTreeMap::new(),
            expiration_ms: ctx.block.timestamp_ms + ctx.rules.bip_expiration_period_ms,
            tx_version: tx.version,
            payload,
            derived_token_address,
            executed_at_height: None,
            updated_at_height: 0,
            updated_at_ms: 0,
        };
        ctx.ws.set_bip(&bip_hash, bip)?;

        ctx.events.push(BlockEvent::BipStateCreated { bip_hash });
        Ok(())
    }
}
