//! # Block Store
//!
//! Stored-block persistence and the canonical indices.
//!
//! Keyspaces (see the column layout in `shared-types`):
//! - `blocks`: block hash -> crc32-framed `StoredBlock`; holds forks too
//! - `hash_by_height`: big-endian height -> hash; presence means canonical
//! - `tx_index`: tx hash -> containing block hash (stale during a reorg
//!   until the swap re-emits the entries)
//! - `metadata`: the latest-block pointer
//!
//! The latest pointer and the height index only ever change inside the same
//! atomic batch that writes the state trie, so a crash leaves either the
//! whole block or none of it.

use crate::errors::ChainError;
use shared_types::storage::{Column, ColumnStore, WriteBatch, LATEST_BLOCK_HASH_KEY};
use shared_types::{Hash, StoredBlock};
use std::sync::Arc;

/// Read/stage layer over the chain columns.
pub struct BlockStore {
    store: Arc<dyn ColumnStore>,
}

impl BlockStore {
    pub fn new(store: Arc<dyn ColumnStore>) -> Self {
        Self { store }
    }

    fn height_key(height: u64) -> [u8; 8] {
        height.to_be_bytes()
    }

    // =========================================================================
    // READS
    // =========================================================================

    pub fn get_block(&self, hash: &Hash) -> Result<Option<StoredBlock>, ChainError> {
        let Some(framed) = self.store.get(Column::Blocks, hash)? else {
            return Ok(None);
        };
        if framed.len() < 4 {
            return Err(ChainError::CorruptedBlock(*hash));
        }

        let (checksum_bytes, payload) = framed.split_at(4);
        let expected = u32::from_be_bytes(checksum_bytes.try_into().unwrap());
        if crc32fast::hash(payload) != expected {
            return Err(ChainError::CorruptedBlock(*hash));
        }

        let block: StoredBlock =
            bincode::deserialize(payload).map_err(|e| ChainError::BlockDecode(e.to_string()))?;
        Ok(Some(block))
    }

    pub fn has_block(&self, hash: &Hash) -> Result<bool, ChainError> {
        Ok(self.store.get(Column::Blocks, hash)?.is_some())
    }

    pub fn canonical_hash_at(&self, height: u64) -> Result<Option<Hash>, ChainError> {
        let Some(bytes) = self
            .store
            .get(Column::HashByHeight, &Self::height_key(height))?
        else {
            return Ok(None);
        };
        let hash: Hash = bytes
            .as_slice()
            .try_into()
            .map_err(|_| ChainError::BlockDecode("height index entry".into()))?;
        Ok(Some(hash))
    }

    /// Canonical block at a height, if any.
    pub fn canonical_block_at(&self, height: u64) -> Result<Option<StoredBlock>, ChainError> {
        match self.canonical_hash_at(height)? {
            Some(hash) => self.get_block(&hash),
            None => Ok(None),
        }
    }

    /// A block is canonical iff the height index points at its hash.
    pub fn is_canonical(&self, block: &StoredBlock) -> Result<bool, ChainError> {
        Ok(self.canonical_hash_at(block.height())? == Some(block.hash))
    }

    pub fn is_canonical_hash(&self, hash: &Hash, height: u64) -> Result<bool, ChainError> {
        Ok(self.canonical_hash_at(height)? == Some(*hash))
    }

    pub fn latest_hash(&self) -> Result<Option<Hash>, ChainError> {
        let Some(bytes) = self.store.get(Column::Metadata, LATEST_BLOCK_HASH_KEY)? else {
            return Ok(None);
        };
        let hash: Hash = bytes
            .as_slice()
            .try_into()
            .map_err(|_| ChainError::BlockDecode("latest-hash entry".into()))?;
        Ok(Some(hash))
    }

    pub fn latest_block(&self) -> Result<Option<StoredBlock>, ChainError> {
        match self.latest_hash()? {
            Some(hash) => self.get_block(&hash),
            None => Ok(None),
        }
    }

    /// Hash of the block containing a transaction, if indexed.
    pub fn tx_block_hash(&self, tx_hash: &Hash) -> Result<Option<Hash>, ChainError> {
        let Some(bytes) = self.store.get(Column::TxIndex, tx_hash)? else {
            return Ok(None);
        };
        let hash: Hash = bytes
            .as_slice()
            .try_into()
            .map_err(|_| ChainError::BlockDecode("tx index entry".into()))?;
        Ok(Some(hash))
    }

    // =========================================================================
    // STAGING
    // =========================================================================

    /// Frame and stage a stored block: crc32 of the payload, then the
    /// payload.
    pub fn stage_block(&self, batch: &mut WriteBatch, block: &StoredBlock) -> Result<(), ChainError> {
        let payload =
            bincode::serialize(block).map_err(|e| ChainError::BlockDecode(e.to_string()))?;
        let mut framed = Vec::with_capacity(payload.len() + 4);
        framed.extend_from_slice(&crc32fast::hash(&payload).to_be_bytes());
        framed.extend_from_slice(&payload);
        batch.put(Column::Blocks, block.hash.to_vec(), framed);
        Ok(())
    }

    pub fn stage_canonical_hash(&self, batch: &mut WriteBatch, height: u64, hash: &Hash) {
        batch.put(
            Column::HashByHeight,
            Self::height_key(height).to_vec(),
            hash.to_vec(),
        );
    }

    pub fn stage_remove_canonical(&self, batch: &mut WriteBatch, height: u64) {
        batch.delete(Column::HashByHeight, Self::height_key(height).to_vec());
    }

    pub fn stage_latest_hash(&self, batch: &mut WriteBatch, hash: &Hash) {
        batch.put(
            Column::Metadata,
            LATEST_BLOCK_HASH_KEY.to_vec(),
            hash.to_vec(),
        );
    }

    pub fn stage_tx_indices(&self, batch: &mut WriteBatch, block: &StoredBlock) {
        for tx_hash in &block.tx_hashes {
            batch.put(Column::TxIndex, tx_hash.to_vec(), block.hash.to_vec());
        }
    }

    pub fn write(&self, batch: WriteBatch) -> Result<(), ChainError> {
        Ok(self.store.write(batch)?)
    }

    pub fn column_store(&self) -> Arc<dyn ColumnStore> {
        self.store.clone()
    }
}
