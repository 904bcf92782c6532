//! # Node Storage
//!
//! Buffered writer over the `state_trie` column. Committed trie nodes are
//! held in memory until the surrounding block connect stages them into its
//! atomic batch; `rollback` discards them when the block fails.
//!
//! Reads retry a bounded number of times with linear backoff to ride out
//! transient contention in the backing store.

use crate::errors::TrieError;
use shared_types::storage::{Column, ColumnStore, WriteBatch};
use shared_types::{Hash, StoreError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

const READ_ATTEMPTS: u32 = 5;
const BACKOFF_STEP: Duration = Duration::from_millis(25);

/// Buffered trie-node storage over a column store.
pub struct NodeStorage {
    store: Arc<dyn ColumnStore>,
    pending: HashMap<Hash, Vec<u8>>,
}

impl NodeStorage {
    pub fn new(store: Arc<dyn ColumnStore>) -> Self {
        Self {
            store,
            pending: HashMap::new(),
        }
    }

    /// Fetch node bytes, preferring the uncommitted buffer.
    pub fn get(&self, hash: &Hash) -> Result<Option<Vec<u8>>, TrieError> {
        if let Some(bytes) = self.pending.get(hash) {
            return Ok(Some(bytes.clone()));
        }

        let mut last_err: Option<StoreError> = None;
        for attempt in 0..READ_ATTEMPTS {
            if attempt > 0 {
                std::thread::sleep(BACKOFF_STEP * attempt);
            }
            match self.store.get(Column::StateTrie, hash) {
                Ok(found) => return Ok(found),
                Err(err) => {
                    warn!(attempt, error = %err, "trie node read failed, retrying");
                    last_err = Some(err);
                }
            }
        }
        Err(TrieError::Store(last_err.unwrap_or(StoreError::Closed)))
    }

    /// Buffer a node write. No I/O happens here.
    pub fn put(&mut self, hash: Hash, bytes: Vec<u8>) {
        self.pending.insert(hash, bytes);
    }

    /// Move every buffered node into an outer atomic batch.
    pub fn stage_to_batch(&mut self, batch: &mut WriteBatch) {
        for (hash, bytes) in self.pending.drain() {
            batch.put(Column::StateTrie, hash.to_vec(), bytes);
        }
    }

    /// Discard buffered writes.
    pub fn rollback(&mut self) {
        self.pending.clear();
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
