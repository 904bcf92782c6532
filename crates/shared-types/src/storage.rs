//! # Column-Store Port
//!
//! The keyspace layout of the node and the storage trait adapters implement.
//! The production adapter is RocksDB with one column family per column; the
//! in-memory adapter below backs tests.
//!
//! All chain mutations flow through [`WriteBatch`]: a block connect stages
//! its trie nodes, stored block, indices and head pointer into one batch,
//! and the adapter must apply a batch atomically.

use crate::errors::StoreError;
use parking_lot::RwLock;
use std::collections::HashMap;

/// The node's keyspaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    /// Block hash -> encoded `StoredBlock`.
    Blocks,
    /// Trie node hash -> trie node bytes.
    StateTrie,
    /// Tx hash -> containing block hash.
    TxIndex,
    /// Big-endian height -> canonical block hash.
    HashByHeight,
    /// Fixed keys, e.g. the latest-block pointer.
    Metadata,
}

impl Column {
    pub const ALL: [Column; 5] = [
        Column::Blocks,
        Column::StateTrie,
        Column::TxIndex,
        Column::HashByHeight,
        Column::Metadata,
    ];

    /// Column-family name in the backing store.
    pub fn name(self) -> &'static str {
        match self {
            Column::Blocks => "blocks",
            Column::StateTrie => "state_trie",
            Column::TxIndex => "tx_index",
            Column::HashByHeight => "hash_by_height",
            Column::Metadata => "metadata",
        }
    }
}

/// Key of the canonical head pointer in [`Column::Metadata`].
pub const LATEST_BLOCK_HASH_KEY: &[u8] = b"LATEST_BLOCK_HASH";

/// A single staged operation.
#[derive(Debug, Clone)]
pub enum BatchOp {
    Put {
        column: Column,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    Delete {
        column: Column,
        key: Vec<u8>,
    },
}

/// An ordered set of operations applied atomically.
#[derive(Debug, Default)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, column: Column, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Put {
            column,
            key: key.into(),
            value: value.into(),
        });
    }

    pub fn delete(&mut self, column: Column, key: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Delete {
            column,
            key: key.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }
}

/// Column-family key-value store with atomic multi-column batches.
pub trait ColumnStore: Send + Sync {
    fn get(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    /// Apply every operation of the batch atomically, in order.
    fn write(&self, batch: WriteBatch) -> Result<(), StoreError>;
}

/// In-memory store for tests: a map per column behind one lock, so batch
/// application is trivially atomic.
#[derive(Default)]
pub struct MemoryColumnStore {
    columns: RwLock<HashMap<Column, HashMap<Vec<u8>, Vec<u8>>>>,
}

impl MemoryColumnStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries in one column, for test assertions.
    pub fn count(&self, column: Column) -> usize {
        self.columns
            .read()
            .get(&column)
            .map(|m| m.len())
            .unwrap_or(0)
    }
}

impl ColumnStore for MemoryColumnStore {
    fn get(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self
            .columns
            .read()
            .get(&column)
            .and_then(|m| m.get(key).cloned()))
    }

    fn write(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let mut columns = self.columns.write();
        for op in batch.into_ops() {
            match op {
                BatchOp::Put { column, key, value } => {
                    columns.entry(column).or_default().insert(key, value);
                }
                BatchOp::Delete { column, key } => {
                    if let Some(map) = columns.get_mut(&column) {
                        map.remove(&key);
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_applies_in_order() {
        let store = MemoryColumnStore::new();

        let mut batch = WriteBatch::new();
        batch.put(Column::Metadata, b"k".to_vec(), b"v1".to_vec());
        batch.put(Column::Metadata, b"k".to_vec(), b"v2".to_vec());
        store.write(batch).unwrap();

        assert_eq!(
            store.get(Column::Metadata, b"k").unwrap(),
            Some(b"v2".to_vec())
        );
    }

    #[test]
    fn delete_in_batch() {
        let store = MemoryColumnStore::new();

        let mut batch = WriteBatch::new();
        batch.put(Column::Blocks, b"a".to_vec(), b"1".to_vec());
        store.write(batch).unwrap();

        let mut batch = WriteBatch::new();
        batch.delete(Column::Blocks, b"a".to_vec());
        store.write(batch).unwrap();

        assert_eq!(store.get(Column::Blocks, b"a").unwrap(), None);
        assert_eq!(store.count(Column::Blocks), 0);
    }

    #[test]
    fn columns_are_isolated() {
        let store = MemoryColumnStore::new();

        let mut batch = WriteBatch::new();
        batch.put(Column::Blocks, b"k".to_vec(), b"blocks".to_vec());
        batch.put(Column::TxIndex, b"k".to_vec(), b"txs".to_vec());
        store.write(batch).unwrap();

        assert_eq!(
            store.get(Column::Blocks, b"k").unwrap(),
            Some(b"blocks".to_vec())
        );
        assert_eq!(
            store.get(Column::TxIndex, b"k").unwrap(),
            Some(b"txs".to_vec())
        );
    }
}
