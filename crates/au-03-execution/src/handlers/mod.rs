//! # Transaction Handlers
//!
//! One handler per transaction type, dispatched through a registry keyed by
//! [`TxType`]. The context bundles everything a handler may touch; handlers
//! return `Err` to reject, and never partially apply (the processor reverts
//! the snapshot on failure).

mod bip_create;
mod bip_vote;
mod transfer;

pub use bip_create::BipCreateHandler;
pub use bip_vote::BipVoteHandler;
pub use transfer::TransferHandler;

use crate::errors::ExecError;
use au_02_world_state::WorldState;
use shared_types::{
    BlockEvent, BurnOutcome, GovernanceRules, Hash, NetworkParamsState, SimpleBlock, Tx, TxType,
};
use std::collections::{BTreeMap, HashMap};

/// Everything a handler sees while executing one transaction.
pub struct HandlerContext<'a> {
    pub ws: &'a mut WorldState,
    pub tx: &'a Tx,
    pub block: SimpleBlock,
    /// Params as of the start of the batch; fee floors use these.
    pub params: &'a NetworkParamsState,
    pub rules: &'a GovernanceRules,
    /// Capped burn amounts recorded by governance burns, keyed by BIP hash.
    pub burn_outcomes: &'a mut BTreeMap<Hash, BurnOutcome>,
    /// Block events produced by this transaction.
    pub events: &'a mut Vec<BlockEvent>,
}

/// A typed transaction executor.
pub trait TxHandler: Send + Sync {
    fn supported_type(&self) -> TxType;

    fn execute(&self, ctx: &mut HandlerContext<'_>) -> Result<(), ExecError>;
}

/// Dispatch table over the registered handlers.
pub struct HandlerRegistry {
    handlers: HashMap<TxType, Box<dyn TxHandler>>,
}

impl HandlerRegistry {
    /// Registry with the three standard handlers.
    pub fn standard() -> Self {
        let mut registry = Self {
            handlers: HashMap::new(),
        };
        registry.register(Box::new(TransferHandler));
        registry.register(Box::new(BipCreateHandler));
        registry.register(Box::new(BipVoteHandler));
        registry
    }

    pub fn register(&mut self, handler: Box<dyn TxHandler>) {
        self.handlers.insert(handler.supported_type(), handler);
    }

    pub fn get(&self, tx_type: TxType) -> Option<&dyn TxHandler> {
        self.handlers.get(&tx_type).map(|h| h.as_ref())
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::standard()
    }
}
