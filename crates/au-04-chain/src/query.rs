//! # Chain Queries
//!
//! Read-only surface consumed by the API layer, the sync driver and the
//! miner: head lookup, canonical-chain reads, locator hashes, common
//! ancestors, transaction lookups and reorg reconciliation.

use crate::errors::ChainError;
use crate::ingest::ChainController;
use shared_types::{BlockHeader, Hash, StoredBlock, Tx};
use std::collections::HashSet;
use std::sync::Arc;

/// Maximum blocks returned by a range query.
const MAX_RANGE: u64 = 100;

impl ChainController {
    pub fn block_by_hash(&self, hash: &Hash) -> Result<Option<StoredBlock>, ChainError> {
        self.block_store().get_block(hash)
    }

    /// The canonical block at a height, if the chain reaches it.
    pub fn canonical_block_by_height(&self, height: u64) -> Result<Option<StoredBlock>, ChainError> {
        self.block_store().canonical_block_at(height)
    }

    /// A block by hash, only if it is on the canonical chain.
    pub fn canonical_block_by_hash(&self, hash: &Hash) -> Result<Option<StoredBlock>, ChainError> {
        let Some(block) = self.block_store().get_block(hash)? else {
            return Ok(None);
        };
        if self.block_store().is_canonical(&block)? {
            Ok(Some(block))
        } else {
            Ok(None)
        }
    }

    /// Canonical blocks from `start_height`, at most `limit` (capped).
    pub fn blocks_in_range(
        &self,
        start_height: u64,
        limit: u64,
    ) -> Result<Vec<StoredBlock>, ChainError> {
        let limit = limit.min(MAX_RANGE);
        let mut blocks = Vec::with_capacity(limit as usize);
        for height in start_height..start_height.saturating_add(limit) {
            match self.canonical_block_by_height(height)? {
                Some(block) => blocks.push(block),
                None => break,
            }
        }
        Ok(blocks)
    }

    /// Canonical headers after a height, for serving header sync.
    pub fn headers_after(
        &self,
        ancestor_height: u64,
        batch_size: usize,
    ) -> Result<Vec<BlockHeader>, ChainError> {
        let mut headers = Vec::with_capacity(batch_size);
        let mut height = ancestor_height + 1;
        while headers.len() < batch_size {
            match self.canonical_block_by_height(height)? {
                Some(block) => headers.push(block.block.header.clone()),
                None => break,
            }
            height += 1;
        }
        Ok(headers)
    }

    /// Exponentially spaced canonical hashes walking back from the head:
    /// dense for the last ten heights, step doubling beyond, height 0
    /// always included.
    pub fn locator_hashes(&self) -> Result<Vec<Hash>, ChainError> {
        let Some(head) = self.head() else {
            return Ok(Vec::new());
        };

        let mut locators = Vec::new();
        let mut height = head.height();
        let mut step = 1u64;
        loop {
            if let Some(hash) = self.block_store().canonical_hash_at(height)? {
                locators.push(hash);
            }
            if height == 0 {
                break;
            }
            if locators.len() >= 10 {
                step = step.saturating_mul(2);
            }
            height = height.saturating_sub(step);
        }
        Ok(locators)
    }

    /// The first locator that is canonical locally, with its height.
    pub fn find_common_ancestor(
        &self,
        locators: &[Hash],
    ) -> Result<Option<(Hash, u64)>, ChainError> {
        for locator in locators {
            let Some(block) = self.block_store().get_block(locator)? else {
                continue;
            };
            if self.block_store().is_canonical(&block)? {
                return Ok(Some((block.hash, block.height())));
            }
        }
        Ok(None)
    }

    /// The block containing a transaction, with the transaction's index.
    /// Follows the tx index, which may be stale right after a reorg.
    pub fn tx_lookup(&self, tx_hash: &Hash) -> Result<Option<(StoredBlock, u32)>, ChainError> {
        let Some(block_hash) = self.block_store().tx_block_hash(tx_hash)? else {
            return Ok(None);
        };
        let Some(block) = self.block_store().get_block(&block_hash)? else {
            return Ok(None);
        };
        match block.tx_index_by_hash.get(tx_hash).copied() {
            Some(index) => Ok(Some((block, index))),
            None => Ok(None),
        }
    }

    /// Confirmation count of a transaction on the canonical chain; zero for
    /// unknown or reorged-out transactions.
    pub fn tx_confirmations(&self, tx_hash: &Hash) -> Result<u64, ChainError> {
        let Some((block, _)) = self.tx_lookup(tx_hash)? else {
            return Ok(0);
        };
        if !self.block_store().is_canonical(&block)? {
            return Ok(0);
        }
        let head_height = self.head().map(|h| h.height()).unwrap_or(0);
        Ok(head_height.saturating_sub(block.height()) + 1)
    }

    /// Transactions present in the abandoned branch but absent from the new
    /// one after a reorg; the caller returns them to the mempool.
    pub fn txs_abandoned_by_reorg(
        &self,
        old_tip: &Hash,
        new_tip: &Hash,
    ) -> Result<Vec<Tx>, ChainError> {
        let old_branch = self.branch_to_common_ancestor(old_tip, new_tip)?;
        let new_branch = self.branch_to_common_ancestor(new_tip, old_tip)?;

        let kept: HashSet<Hash> = new_branch
            .iter()
            .flat_map(|b| b.tx_hashes.iter().copied())
            .collect();

        let mut returned = Vec::new();
        for block in &old_branch {
            for (index, tx_hash) in block.tx_hashes.iter().enumerate() {
                if !kept.contains(tx_hash) {
                    returned.push(block.block.txs[index].clone());
                }
            }
        }
        Ok(returned)
    }

    /// Blocks from `tip` (inclusive) down to, excluding, the common
    /// ancestor with `other`.
    fn branch_to_common_ancestor(
        &self,
        tip: &Hash,
        other: &Hash,
    ) -> Result<Vec<Arc<StoredBlock>>, ChainError> {
        let mut a = self
            .block_store()
            .get_block(tip)?
            .ok_or(ChainError::UnknownBlock(*tip))?;
        let mut b = self
            .block_store()
            .get_block(other)?
            .ok_or(ChainError::UnknownBlock(*other))?;

        let mut branch = Vec::new();

        while a.height() > b.height() {
            let previous = *a.previous_hash();
            branch.push(Arc::new(a));
            a = self
                .block_store()
                .get_block(&previous)?
                .ok_or(ChainError::MissingCommonAncestor)?;
        }
        while b.height() > a.height() {
            b = self
                .block_store()
                .get_block(b.previous_hash())?
                .ok_or(ChainError::MissingCommonAncestor)?;
        }
        while a.hash != b.hash {
            if a.height() == 0 {
                return Err(ChainError::MissingCommonAncestor);
            }
            let previous = *a.previous_hash();
            branch.push(Arc::new(a));
            a = self
                .block_store()
                .get_block(&previous)?
                .ok_or(ChainError::MissingCommonAncestor)?;
            b = self
                .block_store()
                .get_block(b.previous_hash())?
                .ok_or(ChainError::MissingCommonAncestor)?;
        }

        Ok(branch)
    }
}
