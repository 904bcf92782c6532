//! Transfer handler: move an amount of some token between accounts, or burn
//! it by sending to the zero address.

use super::{HandlerContext, TxHandler};
use crate::errors::ExecError;
use shared_types::{BlockEvent, TxType, ZERO_ADDRESS};

pub struct TransferHandler;

impl TxHandler for TransferHandler {
    fn supported_type(&self) -> TxType {
        TxType::Transfer
    }

    fn execute(&self, ctx: &mut HandlerContext<'_>) -> Result<(), ExecError> {
        let tx = ctx.tx;

        // Self-transfer moves nothing; the fee was already charged upstream.
        if tx.sender == tx.recipient {
            return Ok(());
        }

        ctx.ws
            .debit_balance(&tx.sender, &tx.token_address, tx.amount)?;

        if tx.recipient == ZERO_ADDRESS {
            // Burn path: the token must exist and allow user burns.
            let mut token = ctx
                .ws
                .get_token(&tx.token_address)?
                .ok_or(ExecError::UnknownToken(tx.token_address))?;
            if !token.user_burnable {
                return Err(ExecError::TokenNotBurnable(tx.token_address));
            }

            token.total_supply = token.total_supply.saturating_sub(tx.amount);
            let total_supply = token.total_supply;
            ctx.ws.set_token(&tx.token_address, token)?;

            ctx.events.push(BlockEvent::TokenBurned {
                token_address: tx.token_address,
                owner: tx.sender,
                requested: tx.amount,
                actual: tx.amount,
            });
            ctx.events.push(BlockEvent::TokenSupplyUpdated {
                token_address: tx.token_address,
                total_supply,
            });
        } else {
            ctx.ws
                .credit_balance(&tx.recipient, &tx.token_address, tx.amount)?;
        }

        Ok(())
    }
}
