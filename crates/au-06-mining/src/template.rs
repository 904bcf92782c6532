//! # Template Assembly
//!
//! Build an unmined block over the current head: pick mempool transactions
//! in fee order under the size budget, execute them in mining mode
//! (dropping invalid ones), and commit to the resulting roots.

use crate::errors::MiningError;
use au_02_world_state::{StateMode, WorldState};
use au_03_execution::{ExecMode, StateProcessor};
use au_04_chain::ChainController;
use au_05_mempool::Mempool;
use shared_crypto::merkle_root;
use shared_types::{
    Address, BlockHeader, Hash, SimpleBlock, Tx, ZERO_SIGNATURE,
};

/// Bytes reserved under the block size limit for the header and framing.
const SIZE_SAFETY_MARGIN: u64 = 4_096;

/// An assembled, not yet mined block.
#[derive(Debug, Clone)]
pub struct BlockTemplate {
    /// Header with `nonce = 0` and a zero signature.
    pub header: BlockHeader,
    pub txs: Vec<Tx>,
    pub parent_hash: Hash,
    /// Mempool entries the assembler found invalid; evict them.
    pub invalid_tx_hashes: Vec<Hash>,
}

/// Assemble a template on the current head for `coinbase`.
pub fn assemble_template(
    chain: &ChainController,
    mempool: &Mempool,
    coinbase: Address,
    now_ms: u64,
) -> Result<BlockTemplate, MiningError> {
    let head = chain.head().ok_or(MiningError::NoHead)?;

    let mut ws = WorldState::open(
        chain.block_store().column_store(),
        Some(head.block.header.state_root_hash),
        StateMode::Mining,
    )?;
    let params = ws.get_params()?;

    let budget = chain
        .settings()
        .max_block_size
        .saturating_sub(SIZE_SAFETY_MARGIN);
    let candidates = mempool.txs_for_block(budget);

    let height = head.height() + 1;
    // Strictly after the parent even if the local clock lags.
    let timestamp_ms = now_ms.max(head.block.header.timestamp_ms + 1);

    let simple = SimpleBlock {
        height,
        timestamp_ms,
        coinbase,
    };
    let processor = StateProcessor::new(chain.settings().governance);
    let result = processor.execute_batch(&mut ws, simple, &candidates, &params, ExecMode::Mining)?;

    let state_root_hash = ws.calculate_root_hash()?;
    let leaves: Vec<[u8; 32]> = result.valid_txs.iter().map(|tx| tx.hash()).collect();
    let difficulty = chain.required_difficulty(&head)?;

    let header = BlockHeader {
        version: 1,
        height,
        timestamp_ms,
        previous_hash: head.hash,
        difficulty,
        tx_root_hash: merkle_root(&leaves),
        state_root_hash,
        coinbase,
        nonce: 0,
        signature: ZERO_SIGNATURE,
    };

    Ok(BlockTemplate {
        header,
        txs: result.valid_txs,
        parent_hash: head.hash,
        invalid_tx_hashes: result.invalid_txs.iter().map(|(tx, _)| tx.hash()).collect(),
    })
}
