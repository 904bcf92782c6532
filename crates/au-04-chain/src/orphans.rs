//! # Orphan Buffer
//!
//! Blocks whose parent has not arrived yet, keyed by the missing parent
//! hash. Bounded; when full, the oldest entry is evicted (sync will fetch
//! it again if it mattered).

use shared_types::{Address, Block, ConnectedSource, Hash};
use std::collections::{HashMap, VecDeque};

/// Default capacity of the buffer.
pub const DEFAULT_ORPHAN_CAPACITY: usize = 256;

/// A buffered block waiting for its parent.
#[derive(Debug, Clone)]
pub struct OrphanBlock {
    pub block: Block,
    pub source: ConnectedSource,
    pub received_from: Option<Address>,
    pub received_at_ms: u64,
}

/// Bounded parent-keyed buffer.
pub struct OrphanBuffer {
    by_parent: HashMap<Hash, Vec<OrphanBlock>>,
    /// Insertion order as (parent, block hash), oldest first.
    order: VecDeque<(Hash, Hash)>,
    capacity: usize,
}

impl OrphanBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            by_parent: HashMap::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, block_hash: &Hash) -> bool {
        self.order.iter().any(|(_, h)| h == block_hash)
    }

    /// Buffer a block under its missing parent, evicting the oldest entry
    /// when full. Duplicate block hashes are ignored.
    pub fn insert(&mut self, orphan: OrphanBlock) {
        let block_hash = orphan.block.header.hash();
        if self.contains(&block_hash) {
            return;
        }

        while self.order.len() >= self.capacity {
            self.evict_oldest();
        }

        let parent = orphan.block.header.previous_hash;
        self.by_parent.entry(parent).or_default().push(orphan);
        self.order.push_back((parent, block_hash));
    }

    /// Remove and return every buffered child of `parent`.
    pub fn take_children(&mut self, parent: &Hash) -> Vec<OrphanBlock> {
        let children = self.by_parent.remove(parent).unwrap_or_default();
        if !children.is_empty() {
            self.order.retain(|(p, _)| p != parent);
        }
        children
    }

    fn evict_oldest(&mut self) {
        let Some((parent, block_hash)) = self.order.pop_front() else {
            return;
        };
        if let Some(children) = self.by_parent.get_mut(&parent) {
            children.retain(|c| c.block.header.hash() != block_hash);
            if children.is_empty() {
                self.by_parent.remove(&parent);
            }
        }
    }
}

impl Default for OrphanBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_ORPHAN_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use primitive_types::U256;
    use shared_types::{BlockHeader, ZERO_HASH, ZERO_SIGNATURE};

    fn orphan(parent: Hash, height: u64) -> OrphanBlock {
        OrphanBlock {
            block: Block {
                header: BlockHeader {
                    version: 1,
                    height,
                    timestamp_ms: height,
                    previous_hash: parent,
                    difficulty: U256::one(),
                    tx_root_hash: ZERO_HASH,
                    state_root_hash: ZERO_HASH,
                    coinbase: [0u8; 20],
                    nonce: 0,
                    signature: ZERO_SIGNATURE,
                },
                txs: Vec::new(),
            },
            source: ConnectedSource::Propagated,
            received_from: None,
            received_at_ms: 0,
        }
    }

    #[test]
    fn children_are_grouped_by_parent() {
        let mut buffer = OrphanBuffer::default();
        let parent = [1u8; 32];

        buffer.insert(orphan(parent, 5));
        buffer.insert(orphan(parent, 6));
        buffer.insert(orphan([2u8; 32], 9));

        assert_eq!(buffer.len(), 3);
        let children = buffer.take_children(&parent);
        assert_eq!(children.len(), 2);
        assert_eq!(buffer.len(), 1);
        assert!(buffer.take_children(&parent).is_empty());
    }

    #[test]
    fn duplicates_are_ignored() {
        let mut buffer = OrphanBuffer::default();
        buffer.insert(orphan([1u8; 32], 5));
        buffer.insert(orphan([1u8; 32], 5));
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn capacity_evicts_oldest() {
        let mut buffer = OrphanBuffer::new(2);
        buffer.insert(orphan([1u8; 32], 1));
        buffer.insert(orphan([2u8; 32], 2));
        buffer.insert(orphan([3u8; 32], 3));

        assert_eq!(buffer.len(), 2);
        assert!(buffer.take_children(&[1u8; 32]).is_empty());
        assert_eq!(buffer.take_children(&[2u8; 32]).len(), 1);
        assert_eq!(buffer.take_children(&[3u8; 32]).len(), 1);
    }
}
