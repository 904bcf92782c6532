//! # Node Events
//!
//! Event types that flow through the shared bus.

use primitive_types::U256;
use shared_types::{
    Address, Block, BurnOutcome, ConnectedSource, Hash, StateDiff, StoredBlock, Wei,
};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Published after a block becomes the canonical head.
///
/// Listeners observe state monotonically along the canonical chain: the
/// publish happens after the database batch commits and while the master
/// chain lock is still held. On a reorg, exactly one event is published for
/// the new tip; listeners reconcile from `diff`.
#[derive(Debug, Clone)]
pub struct BlockConnectedEvent {
    pub source: ConnectedSource,
    pub block: Arc<StoredBlock>,
    pub diff: StateDiff,
    pub total_fees: Wei,
    pub actual_reward_paid: Wei,
    pub cumulative_difficulty: U256,
    pub burn_outcomes: BTreeMap<Hash, BurnOutcome>,
    pub received_from: Option<Address>,
    pub received_at_ms: u64,
}

/// All events that can be published to the bus.
#[derive(Debug, Clone)]
pub enum NodeEvent {
    /// A block was connected to the canonical chain.
    BlockConnected(Arc<BlockConnectedEvent>),

    /// The local miner solved a block; the runtime routes it into ingestion
    /// like any other block.
    BlockMined(Arc<Block>),
}

impl NodeEvent {
    pub fn topic(&self) -> EventTopic {
        match self {
            NodeEvent::BlockConnected(_) => EventTopic::Chain,
            NodeEvent::BlockMined(_) => EventTopic::Mining,
        }
    }
}

/// Coarse event grouping used by subscription filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventTopic {
    Chain,
    Mining,
}

/// Which events a subscription receives.
#[derive(Debug, Clone)]
pub struct EventFilter {
    topics: Option<Vec<EventTopic>>,
}

impl EventFilter {
    /// Receive everything.
    pub fn all() -> Self {
        Self { topics: None }
    }

    /// Receive only the listed topics.
    pub fn topics(topics: Vec<EventTopic>) -> Self {
        Self {
            topics: Some(topics),
        }
    }

    pub fn matches(&self, event: &NodeEvent) -> bool {
        match &self.topics {
            None => true,
            Some(topics) => topics.contains(&event.topic()),
        }
    }
}
