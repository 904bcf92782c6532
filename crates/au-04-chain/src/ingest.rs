//! # Block Ingestion
//!
//! Admits blocks from mining, propagation and sync. All chain-modifying
//! work runs under the master mutex; the head is additionally cached in a
//! read-write slot so template assembly and queries can read it without
//! queueing behind a connect.
//!
//! Connecting a block is atomic: its trie nodes, stored record, indices and
//! the head pointer land in one batch or not at all. A deeper fork winning
//! on cumulative difficulty triggers the reorg swap, which flips the
//! canonical index in that same batch.

use crate::difficulty::{next_difficulty, AnchorInfo};
use crate::errors::ChainError;
use crate::genesis::{apply_genesis_state, build_genesis_block};
use crate::orphans::{OrphanBlock, OrphanBuffer};
use crate::store::BlockStore;
use crate::validate::{
    recover_senders, validate_coinbase_signature, validate_header_context, validate_pow,
    validate_tx_root,
};
use au_02_world_state::{StateMode, WorldState};
use au_03_execution::{ExecMode, ExecutionResult, StateProcessor};
use parking_lot::{Mutex, RwLock};
use shared_bus::{BlockConnectedEvent, EventPublisher, InMemoryEventBus, NodeEvent};
use shared_crypto::PowHasher;
use shared_types::storage::{ColumnStore, WriteBatch};
use shared_types::{
    Address, Block, ConnectedSource, Hash, NetworkSettings, SimpleBlock, StateDiff, StoredBlock,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What happened to an ingested block.
#[derive(Debug, Clone)]
pub enum IngestOutcome {
    /// Validated and written; canonical if it won the head.
    Connected(Arc<StoredBlock>),
    /// The block is already in the store.
    AlreadyKnown,
    /// Parent unknown but within reach; buffered until the parent arrives.
    OrphanBuffered,
    /// Parent unknown and the height is far ahead; the caller should start
    /// header sync.
    GapDetected,
}

struct MasterState {
    orphans: OrphanBuffer,
}

/// Serialized chain mutator plus read-side head cache.
pub struct ChainController {
    blocks: BlockStore,
    settings: Arc<NetworkSettings>,
    processor: StateProcessor,
    bus: Arc<InMemoryEventBus>,
    pow: Mutex<Box<dyn PowHasher>>,
    master: Mutex<MasterState>,
    head: RwLock<Option<Arc<StoredBlock>>>,
}

impl ChainController {
    pub fn new(
        store: Arc<dyn ColumnStore>,
        settings: Arc<NetworkSettings>,
        bus: Arc<InMemoryEventBus>,
        pow: Box<dyn PowHasher>,
    ) -> Result<Self, ChainError> {
        let blocks = BlockStore::new(store);
        let head = blocks.latest_block()?.map(Arc::new);
        if let Some(head) = &head {
            info!(
                height = head.height(),
                hash = %shared_types::short_hex(&head.hash),
                "resuming chain from stored head"
            );
        }

        Ok(Self {
            processor: StateProcessor::new(settings.governance),
            blocks,
            settings,
            bus,
            pow: Mutex::new(pow),
            master: Mutex::new(MasterState {
                orphans: OrphanBuffer::default(),
            }),
            head: RwLock::new(head),
        })
    }

    pub fn settings(&self) -> &Arc<NetworkSettings> {
        &self.settings
    }

    pub fn block_store(&self) -> &BlockStore {
        &self.blocks
    }

    /// Current canonical head, if the chain is initialized.
    pub fn head(&self) -> Option<Arc<StoredBlock>> {
        self.head.read().clone()
    }

    /// Connect the genesis block if the store is empty.
    pub fn ensure_genesis(&self) -> Result<Arc<StoredBlock>, ChainError> {
        let _master = self.master.lock();
        if let Some(head) = self.head() {
            return Ok(head);
        }
        let genesis = build_genesis_block(self.blocks.column_store(), &self.settings)?;
        self.connect_genesis(genesis)
    }

    /// The difficulty required of a child of `parent`, per the retarget
    /// schedule anchored in the parent's parameter record.
    pub fn required_difficulty(
        &self,
        parent: &StoredBlock,
    ) -> Result<primitive_types::U256, ChainError> {
        let mut ws = WorldState::open(
            self.blocks.column_store(),
            Some(parent.block.header.state_root_hash),
            StateMode::Validation,
        )?;
        let params = ws.get_params()?;
        let anchor = self.anchor_for(parent, params.asert_anchor_height)?;
        next_difficulty(
            parent.height(),
            parent.block.header.timestamp_ms,
            &anchor,
            &params,
        )
    }

    // =========================================================================
    // INGEST
    // =========================================================================

    pub fn ingest(
        &self,
        block: Block,
        source: ConnectedSource,
        received_from: Option<Address>,
        received_at_ms: u64,
    ) -> Result<IngestOutcome, ChainError> {
        let mut master = self.master.lock();

        let hash = block.header.hash();
        if self.blocks.has_block(&hash)? {
            return Ok(IngestOutcome::AlreadyKnown);
        }

        if source == ConnectedSource::Genesis {
            let stored = self.connect_genesis(block)?;
            self.drain_orphans(&mut master, stored.hash);
            return Ok(IngestOutcome::Connected(stored));
        }

        let Some(parent) = self.blocks.get_block(&block.header.previous_hash)? else {
            let head_height = self.head().map(|h| h.height());
            return Ok(match head_height {
                Some(h) if block.header.height <= h + 1 => {
                    debug!(
                        height = block.header.height,
                        hash = %shared_types::short_hex(&hash),
                        "parent unknown, buffering orphan"
                    );
                    master.orphans.insert(OrphanBlock {
                        block,
                        source,
                        received_from,
                        received_at_ms,
                    });
                    IngestOutcome::OrphanBuffered
                }
                _ => IngestOutcome::GapDetected,
            });
        };

        let stored = self.connect(block, &parent, source, received_from, received_at_ms)?;
        self.drain_orphans(&mut master, stored.hash);
        Ok(IngestOutcome::Connected(stored))
    }

    /// Connect buffered children of freshly connected blocks, recursively.
    fn drain_orphans(&self, master: &mut MasterState, connected: Hash) {
        let mut queue = vec![connected];
        while let Some(parent_hash) = queue.pop() {
            for orphan in master.orphans.take_children(&parent_hash) {
                let parent = match self.blocks.get_block(&parent_hash) {
                    Ok(Some(parent)) => parent,
                    _ => continue,
                };
                match self.connect(
                    orphan.block,
                    &parent,
                    orphan.source,
                    orphan.received_from,
                    orphan.received_at_ms,
                ) {
                    Ok(stored) => queue.push(stored.hash),
                    Err(err) => {
                        warn!(error = %err, "buffered orphan failed to connect, dropping");
                    }
                }
            }
        }
    }

    // =========================================================================
    // CONNECT
    // =========================================================================

    fn connect(
        &self,
        block: Block,
        parent: &StoredBlock,
        source: ConnectedSource,
        received_from: Option<Address>,
        received_at_ms: u64,
    ) -> Result<Arc<StoredBlock>, ChainError> {
        validate_header_context(&block.header, parent, received_at_ms)?;

        let size = block.encoded_size() as u64;
        if size > self.settings.max_block_size {
            return Err(ChainError::BlockTooLarge {
                size,
                limit: self.settings.max_block_size,
            });
        }

        let mut ws = WorldState::open(
            self.blocks.column_store(),
            Some(parent.block.header.state_root_hash),
            StateMode::Validation,
        )?;
        let params = ws.get_params()?;

        let anchor = self.anchor_for(parent, params.asert_anchor_height)?;
        let expected_difficulty = next_difficulty(
            parent.height(),
            parent.block.header.timestamp_ms,
            &anchor,
            &params,
        )?;
        if block.header.difficulty != expected_difficulty {
            return Err(ChainError::WrongDifficulty {
                expected: expected_difficulty,
                got: block.header.difficulty,
            });
        }

        let block = recover_senders(block, &self.settings)?;
        validate_tx_root(&block)?;
        validate_coinbase_signature(&block.header)?;
        {
            let mut pow = self.pow.lock();
            validate_pow(&block.header, pow.as_mut())?;
        }

        let simple = SimpleBlock::from_header(&block.header);
        let result = self.processor.execute_batch(
            &mut ws,
            simple,
            &block.txs,
            &params,
            ExecMode::Strict,
        )?;

        let computed = ws.calculate_root_hash()?;
        if computed != block.header.state_root_hash {
            return Err(ChainError::StateRootMismatch {
                expected: block.header.state_root_hash,
                computed,
            });
        }

        let mut batch = WriteBatch::new();
        ws.persist_to_batch(&mut batch)?;
        let diff = ws.build_diff();

        let cumulative = parent.cumulative_difficulty + block.header.difficulty;
        let mut stored = StoredBlock::new(
            block,
            cumulative,
            source,
            received_from,
            received_at_ms,
            result.events.clone(),
        );

        let head = self.head();
        let is_new_head = head.is_none()
            || cumulative
                > head
                    .as_ref()
                    .map(|h| h.cumulative_difficulty)
                    .unwrap_or_default();

        let extends_head = head
            .as_ref()
            .map(|h| h.hash == *stored.previous_hash())
            .unwrap_or(true);

        if is_new_head && !extends_head {
            let old_head = head.expect("reorg requires an existing head");
            stored.source = ConnectedSource::Reorg;
            return self.execute_atomic_reorg_swap(batch, stored, diff, result, &old_head);
        }

        self.blocks.stage_block(&mut batch, &stored)?;
        self.blocks.stage_tx_indices(&mut batch, &stored);
        if is_new_head {
            self.blocks
                .stage_canonical_hash(&mut batch, stored.height(), &stored.hash);
            self.blocks.stage_latest_hash(&mut batch, &stored.hash);
        }
        self.blocks.write(batch)?;

        let stored = Arc::new(stored);
        if is_new_head {
            *self.head.write() = Some(stored.clone());
            info!(
                height = stored.height(),
                hash = %shared_types::short_hex(&stored.hash),
                txs = stored.block.txs.len(),
                ?source,
                "block connected"
            );
            self.publish_connected(source, &stored, diff, result);
        } else {
            debug!(
                height = stored.height(),
                hash = %shared_types::short_hex(&stored.hash),
                "side-fork block stored"
            );
        }

        Ok(stored)
    }

    fn connect_genesis(&self, block: Block) -> Result<Arc<StoredBlock>, ChainError> {
        let mut ws = WorldState::open(self.blocks.column_store(), None, StateMode::Validation)?;
        let events = apply_genesis_state(&mut ws, &self.settings)?;

        let computed = ws.calculate_root_hash()?;
        if computed != block.header.state_root_hash {
            return Err(ChainError::StateRootMismatch {
                expected: block.header.state_root_hash,
                computed,
            });
        }

        let mut batch = WriteBatch::new();
        ws.persist_to_batch(&mut batch)?;
        let diff = ws.build_diff();

        // Cumulative difficulty starts at the genesis difficulty.
        let genesis_difficulty = block.header.difficulty;
        let stored = StoredBlock::new(
            block,
            genesis_difficulty,
            ConnectedSource::Genesis,
            None,
            self.settings.genesis_timestamp_ms,
            events,
        );

        self.blocks.stage_block(&mut batch, &stored)?;
        self.blocks.stage_canonical_hash(&mut batch, 0, &stored.hash);
        self.blocks.stage_latest_hash(&mut batch, &stored.hash);
        self.blocks.write(batch)?;

        let stored = Arc::new(stored);
        *self.head.write() = Some(stored.clone());
        info!(hash = %shared_types::short_hex(&stored.hash), "genesis connected");
        self.publish_connected(
            ConnectedSource::Genesis,
            &stored,
            diff,
            ExecutionResult::default(),
        );
        Ok(stored)
    }

    // =========================================================================
    // REORG
    // =========================================================================

    /// Swap the canonical chain onto the fork ending in `tip`.
    ///
    /// `batch` already contains the tip's trie nodes. In the same batch:
    /// remove the old canonical index entries above the common ancestor,
    /// re-execute the fork blocks to rebuild and re-verify their state,
    /// write the new index entries, re-emit transaction indices, and move
    /// the head pointer. Exactly one event is published, for the tip.
    fn execute_atomic_reorg_swap(
        &self,
        mut batch: WriteBatch,
        tip: StoredBlock,
        tip_diff: StateDiff,
        tip_result: ExecutionResult,
        old_head: &StoredBlock,
    ) -> Result<Arc<StoredBlock>, ChainError> {
        // Walk back from the tip's parent to the common ancestor.
        let mut fork: Vec<StoredBlock> = Vec::new();
        let mut cursor = *tip.previous_hash();
        let ancestor = loop {
            let block = self
                .blocks
                .get_block(&cursor)?
                .ok_or(ChainError::MissingCommonAncestor)?;
            if self.blocks.is_canonical(&block)? {
                break block;
            }
            if block.height() == 0 {
                return Err(ChainError::MissingCommonAncestor);
            }
            cursor = *block.previous_hash();
            fork.push(block);
        };
        fork.reverse();

        info!(
            ancestor_height = ancestor.height(),
            fork_len = fork.len() + 1,
            old_head = %shared_types::short_hex(&old_head.hash),
            new_head = %shared_types::short_hex(&tip.hash),
            "reorganizing canonical chain"
        );

        for height in ancestor.height() + 1..=old_head.height() {
            self.blocks.stage_remove_canonical(&mut batch, height);
        }

        // Rebuild state along the fork; every root must match its header.
        let mut prev_root = ancestor.block.header.state_root_hash;
        for fork_block in &fork {
            let mut ws = WorldState::open(
                self.blocks.column_store(),
                Some(prev_root),
                StateMode::Validation,
            )?;
            let params = ws.get_params()?;
            let simple = SimpleBlock::from_header(&fork_block.block.header);
            self.processor.execute_batch(
                &mut ws,
                simple,
                &fork_block.block.txs,
                &params,
                ExecMode::Strict,
            )?;
            let root = ws.calculate_root_hash()?;
            if root != fork_block.block.header.state_root_hash {
                return Err(ChainError::StateRootMismatch {
                    expected: fork_block.block.header.state_root_hash,
                    computed: root,
                });
            }
            ws.persist_to_batch(&mut batch)?;
            prev_root = root;

            self.blocks
                .stage_canonical_hash(&mut batch, fork_block.height(), &fork_block.hash);
            self.blocks.stage_tx_indices(&mut batch, fork_block);
        }

        self.blocks.stage_block(&mut batch, &tip)?;
        self.blocks
            .stage_canonical_hash(&mut batch, tip.height(), &tip.hash);
        self.blocks.stage_tx_indices(&mut batch, &tip);
        self.blocks.stage_latest_hash(&mut batch, &tip.hash);
        self.blocks.write(batch)?;

        let stored = Arc::new(tip);
        *self.head.write() = Some(stored.clone());
        self.publish_connected(ConnectedSource::Reorg, &stored, tip_diff, tip_result);
        Ok(stored)
    }

    // =========================================================================
    // HELPERS
    // =========================================================================

    /// Resolve the retarget anchor as seen from `parent`'s chain: walk the
    /// fork until it rejoins the canonical index, then jump by height.
    fn anchor_for(&self, parent: &StoredBlock, anchor_height: u64) -> Result<AnchorInfo, ChainError> {
        let mut current = parent.clone();
        loop {
            if current.height() == anchor_height {
                return Ok(AnchorInfo {
                    height: anchor_height,
                    timestamp_ms: current.block.header.timestamp_ms,
                    difficulty: current.block.header.difficulty,
                });
            }
            if current.height() < anchor_height {
                return Err(ChainError::MissingAnchor(anchor_height));
            }
            if self.blocks.is_canonical(&current)? {
                let anchor = self
                    .blocks
                    .canonical_block_at(anchor_height)?
                    .ok_or(ChainError::MissingAnchor(anchor_height))?;
                return Ok(AnchorInfo {
                    height: anchor_height,
                    timestamp_ms: anchor.block.header.timestamp_ms,
                    difficulty: anchor.block.header.difficulty,
                });
            }
            current = self
                .blocks
                .get_block(current.previous_hash())?
                .ok_or(ChainError::MissingAnchor(anchor_height))?;
        }
    }

    fn publish_connected(
        &self,
        source: ConnectedSource,
        stored: &Arc<StoredBlock>,
        diff: StateDiff,
        result: ExecutionResult,
    ) {
        self.bus.publish(NodeEvent::BlockConnected(Arc::new(
            BlockConnectedEvent {
                source,
                block: stored.clone(),
                diff,
                total_fees: result.total_fees,
                actual_reward_paid: result.miner_reward_paid,
                cumulative_difficulty: stored.cumulative_difficulty,
                burn_outcomes: result.burn_outcomes,
                received_from: stored.received_from,
                received_at_ms: stored.received_at_ms,
            },
        )));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use primitive_types::U256;
    use shared_bus::{EventFilter, EventTopic, Subscription};
    use shared_crypto::{merkle_root, DatasetPowHasher, KeyPair};
    use shared_types::storage::MemoryColumnStore;
    use shared_types::{BlockHeader, Tx, Wei, NATIVE_TOKEN_ADDRESS, ZERO_SIGNATURE};

    struct Fixture {
        chain: Arc<ChainController>,
        bus: Arc<InMemoryEventBus>,
        settings: Arc<NetworkSettings>,
        /// Holds the genesis mint (it is both authority and reward pool).
        authority: KeyPair,
        miner: KeyPair,
        network: u32,
    }

    fn fixture() -> Fixture {
        let authority = KeyPair::generate();
        let miner = KeyPair::generate();
        let mut settings = NetworkSettings::devnet(authority.address());
        // Unit difficulty keeps every nonce valid in tests.
        settings.min_difficulty = U256::one();
        let network = settings.network_id;
        let settings = Arc::new(settings);

        let bus = Arc::new(InMemoryEventBus::new());
        let chain = Arc::new(
            ChainController::new(
                Arc::new(MemoryColumnStore::new()),
                settings.clone(),
                bus.clone(),
                Box::new(DatasetPowHasher::new(&[1u8; 32])),
            )
            .unwrap(),
        );

        Fixture {
            chain,
            bus,
            settings,
            authority,
            miner,
            network,
        }
    }

    /// A scratch controller over the same settings; the chain is
    /// deterministic, so blocks built here connect on the main one too.
    fn builder(fx: &Fixture) -> ChainController {
        ChainController::new(
            Arc::new(MemoryColumnStore::new()),
            fx.settings.clone(),
            Arc::new(InMemoryEventBus::new()),
            Box::new(DatasetPowHasher::new(&[1u8; 32])),
        )
        .unwrap()
    }

    fn chain_events(bus: &InMemoryEventBus) -> Subscription {
        bus.subscribe(EventFilter::topics(vec![EventTopic::Chain]))
    }

    fn drain_sources(sub: &mut Subscription) -> Vec<ConnectedSource> {
        let mut sources = Vec::new();
        while let Some(event) = sub.try_recv() {
            if let NodeEvent::BlockConnected(connected) = event {
                sources.push(connected.source);
            }
        }
        sources
    }

    fn signed_transfer(
        keypair: &KeyPair,
        network: u32,
        nonce: u64,
        recipient: Address,
        amount: u64,
        fee: u64,
    ) -> Tx {
        let mut tx = Tx::transfer_template(
            network,
            nonce,
            recipient,
            NATIVE_TOKEN_ADDRESS,
            Wei::from(amount),
            Wei::from(fee),
        );
        tx.timestamp_ms = 1_700_000_000_500;
        tx.signature = keypair.sign_recoverable(&tx.signing_hash()).unwrap();
        tx.sender = keypair.address();
        tx
    }

    /// Assemble a valid child of `parent` the way a miner would. The parent
    /// state must be persisted in `chain`'s store.
    fn build_child(
        chain: &ChainController,
        miner: &KeyPair,
        parent: &StoredBlock,
        txs: Vec<Tx>,
        timestamp_ms: u64,
    ) -> Block {
        let mut ws = WorldState::open(
            chain.block_store().column_store(),
            Some(parent.block.header.state_root_hash),
            StateMode::Mining,
        )
        .unwrap();
        let params = ws.get_params().unwrap();
        let difficulty = chain.required_difficulty(parent).unwrap();

        let height = parent.height() + 1;
        let simple = SimpleBlock {
            height,
            timestamp_ms,
            coinbase: miner.address(),
        };
        let processor = StateProcessor::new(chain.settings().governance);
        let result = processor
            .execute_batch(&mut ws, simple, &txs, &params, ExecMode::Mining)
            .unwrap();
        assert!(result.invalid_txs.is_empty(), "test txs must be valid");

        let state_root = ws.calculate_root_hash().unwrap();
        let leaves: Vec<[u8; 32]> = result.valid_txs.iter().map(|t| t.hash()).collect();

        let mut header = BlockHeader {
            version: 1,
            height,
            timestamp_ms,
            previous_hash: parent.hash,
            difficulty,
            tx_root_hash: merkle_root(&leaves),
            state_root_hash: state_root,
            coinbase: miner.address(),
            nonce: 0,
            signature: ZERO_SIGNATURE,
        };
        header.signature = miner.sign_recoverable(&header.hash()).unwrap();

        Block {
            header,
            txs: result.valid_txs,
        }
    }

    /// Build and connect a child on `chain`, returning block and stored form.
    fn grow(
        chain: &ChainController,
        miner: &KeyPair,
        parent: &StoredBlock,
        txs: Vec<Tx>,
        timestamp_ms: u64,
    ) -> (Block, Arc<StoredBlock>) {
        let block = build_child(chain, miner, parent, txs, timestamp_ms);
        let stored = match chain
            .ingest(block.clone(), ConnectedSource::Sync, None, timestamp_ms)
            .unwrap()
        {
            IngestOutcome::Connected(stored) => stored,
            other => panic!("expected connect, got {other:?}"),
        };
        (block, stored)
    }

    fn ts_at(height: u64) -> u64 {
        1_700_000_000_000 + height * 10_000
    }

    #[test]
    fn genesis_connects_once_and_publishes() {
        let fx = fixture();
        let mut sub = chain_events(&fx.bus);

        let first = fx.chain.ensure_genesis().unwrap();
        let again = fx.chain.ensure_genesis().unwrap();
        assert_eq!(first.hash, again.hash);
        assert_eq!(fx.chain.head().unwrap().height(), 0);
        assert_eq!(drain_sources(&mut sub), vec![ConnectedSource::Genesis]);
    }

    #[test]
    fn transfer_block_connects_and_indexes() {
        let fx = fixture();
        let genesis = fx.chain.ensure_genesis().unwrap();

        let tx = signed_transfer(&fx.authority, fx.network, 0, [0xB0; 20], 100, 1);
        let tx_hash = tx.hash();
        let block = build_child(&fx.chain, &fx.miner, &genesis, vec![tx], ts_at(1));

        let outcome = fx
            .chain
            .ingest(block, ConnectedSource::Propagated, None, ts_at(1))
            .unwrap();
        let stored = match outcome {
            IngestOutcome::Connected(stored) => stored,
            other => panic!("expected connect, got {other:?}"),
        };

        assert_eq!(fx.chain.head().unwrap().hash, stored.hash);
        assert_eq!(stored.tx_senders, vec![fx.authority.address()]);
        assert_eq!(fx.chain.tx_confirmations(&tx_hash).unwrap(), 1);
        let (in_block, index) = fx.chain.tx_lookup(&tx_hash).unwrap().unwrap();
        assert_eq!(in_block.hash, stored.hash);
        assert_eq!(index, 0);

        // Balances as of the new root.
        let mut ws = WorldState::open(
            fx.chain.block_store().column_store(),
            Some(stored.block.header.state_root_hash),
            StateMode::Validation,
        )
        .unwrap();
        assert_eq!(
            ws.get_balance(&[0xB0; 20], &NATIVE_TOKEN_ADDRESS).unwrap(),
            Wei::from(100u64)
        );
        assert_eq!(
            ws.get_balance(&fx.miner.address(), &NATIVE_TOKEN_ADDRESS)
                .unwrap(),
            Wei::from(51u64)
        );
    }

    #[test]
    fn duplicate_ingest_is_already_known() {
        let fx = fixture();
        let genesis = fx.chain.ensure_genesis().unwrap();
        let block = build_child(&fx.chain, &fx.miner, &genesis, Vec::new(), ts_at(1));

        fx.chain
            .ingest(block.clone(), ConnectedSource::Sync, None, ts_at(1))
            .unwrap();
        let outcome = fx
            .chain
            .ingest(block, ConnectedSource::Sync, None, ts_at(1))
            .unwrap();
        assert!(matches!(outcome, IngestOutcome::AlreadyKnown));
    }

    #[test]
    fn far_ahead_block_reports_a_gap() {
        let fx = fixture();
        fx.chain.ensure_genesis().unwrap();

        // Grow a three-block chain on a scratch controller.
        let side = builder(&fx);
        let genesis = side.ensure_genesis().unwrap();
        let (b1, s1) = grow(&side, &fx.miner, &genesis, Vec::new(), ts_at(1));
        let (b2, s2) = grow(&side, &fx.miner, &s1, Vec::new(), ts_at(2));
        let (b3, _) = grow(&side, &fx.miner, &s2, Vec::new(), ts_at(3));

        // b3 arrives first: two heights past the head is a gap.
        let outcome = fx
            .chain
            .ingest(b3.clone(), ConnectedSource::Propagated, None, ts_at(3))
            .unwrap();
        assert!(matches!(outcome, IngestOutcome::GapDetected));

        // In order, everything connects.
        for (block, ts) in [(b1, ts_at(1)), (b2, ts_at(2)), (b3, ts_at(3))] {
            let outcome = fx
                .chain
                .ingest(block, ConnectedSource::Sync, None, ts)
                .unwrap();
            assert!(matches!(outcome, IngestOutcome::Connected(_)));
        }
        assert_eq!(fx.chain.head().unwrap().height(), 3);
    }

    #[test]
    fn orphan_at_head_height_buffers_and_drains_into_reorg() {
        let fx = fixture();
        let genesis = fx.chain.ensure_genesis().unwrap();

        // Canonical: genesis -> a1.
        let (_, a1_stored) = grow(&fx.chain, &fx.miner, &genesis, Vec::new(), ts_at(1));

        // Competing branch genesis -> f1 -> f2, built on a scratch
        // controller and delivered out of order.
        let side = builder(&fx);
        let side_genesis = side.ensure_genesis().unwrap();
        let (f1, f1_stored) = grow(&side, &fx.miner, &side_genesis, Vec::new(), ts_at(1) + 1_000);
        let (f2, _) = grow(&side, &fx.miner, &f1_stored, Vec::new(), ts_at(2) + 1_000);

        // f2 first: its height equals head+1, so it is buffered.
        let outcome = fx
            .chain
            .ingest(f2, ConnectedSource::Propagated, None, ts_at(2))
            .unwrap();
        assert!(matches!(outcome, IngestOutcome::OrphanBuffered));

        let mut sub = chain_events(&fx.bus);

        // f1 arrives: connects as a side fork, the drain connects f2, and
        // the higher cumulative difficulty forces a reorg onto f2.
        let outcome = fx
            .chain
            .ingest(f1, ConnectedSource::Propagated, None, ts_at(1))
            .unwrap();
        assert!(matches!(outcome, IngestOutcome::Connected(_)));

        let head = fx.chain.head().unwrap();
        assert_eq!(head.height(), 2);
        assert_eq!(head.source, ConnectedSource::Reorg);
        assert!(!fx.chain.block_store().is_canonical(&a1_stored).unwrap());

        // Side-fork connect publishes nothing; the reorg publishes exactly
        // one event for the new tip.
        assert_eq!(drain_sources(&mut sub), vec![ConnectedSource::Reorg]);
    }

    #[test]
    fn heavier_fork_wins_and_flips_canonical_indices() {
        let fx = fixture();
        let genesis = fx.chain.ensure_genesis().unwrap();

        let (_, a1_stored) = grow(&fx.chain, &fx.miner, &genesis, Vec::new(), ts_at(1));

        // Canonical branch: a1 -> x2 carrying a transfer.
        let abandoned_tx = signed_transfer(&fx.authority, fx.network, 0, [0xB0; 20], 42, 1);
        let abandoned_hash = abandoned_tx.hash();
        let x2 = build_child(&fx.chain, &fx.miner, &a1_stored, vec![abandoned_tx], ts_at(2));
        let x2_stored = match fx
            .chain
            .ingest(x2, ConnectedSource::Propagated, None, ts_at(2))
            .unwrap()
        {
            IngestOutcome::Connected(s) => s,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(fx.chain.head().unwrap().hash, x2_stored.hash);

        // Competing branch: a1 -> y2 -> y3 (empty blocks).
        let y2 = build_child(&fx.chain, &fx.miner, &a1_stored, Vec::new(), ts_at(2) + 1_000);
        let y2_stored = match fx
            .chain
            .ingest(y2, ConnectedSource::Propagated, None, ts_at(2))
            .unwrap()
        {
            IngestOutcome::Connected(s) => s,
            other => panic!("unexpected {other:?}"),
        };
        // Equal cumulative difficulty: first seen stays canonical.
        assert_eq!(fx.chain.head().unwrap().hash, x2_stored.hash);

        let y3 = build_child(&fx.chain, &fx.miner, &y2_stored, Vec::new(), ts_at(3) + 1_000);
        let y3_hash = y3.header.hash();
        let outcome = fx
            .chain
            .ingest(y3, ConnectedSource::Propagated, None, ts_at(3))
            .unwrap();
        assert!(matches!(outcome, IngestOutcome::Connected(_)));

        // The y branch is canonical at every height above the ancestor.
        let head = fx.chain.head().unwrap();
        assert_eq!(head.hash, y3_hash);
        assert_eq!(
            fx.chain.block_store().canonical_hash_at(2).unwrap(),
            Some(y2_stored.hash)
        );
        assert_eq!(
            fx.chain.block_store().canonical_hash_at(3).unwrap(),
            Some(y3_hash)
        );

        // The abandoned block is still stored, just not canonical.
        let x2_loaded = fx.chain.block_by_hash(&x2_stored.hash).unwrap().unwrap();
        assert!(!fx.chain.block_store().is_canonical(&x2_loaded).unwrap());

        // Its transfer is up for re-inclusion.
        let returned = fx
            .chain
            .txs_abandoned_by_reorg(&x2_stored.hash, &y3_hash)
            .unwrap();
        assert_eq!(returned.len(), 1);
        assert_eq!(returned[0].hash(), abandoned_hash);
        assert_eq!(fx.chain.tx_confirmations(&abandoned_hash).unwrap(), 0);
    }

    #[test]
    fn tampered_difficulty_is_rejected() {
        let fx = fixture();
        let genesis = fx.chain.ensure_genesis().unwrap();

        let mut block = build_child(&fx.chain, &fx.miner, &genesis, Vec::new(), ts_at(1));
        block.header.difficulty = block.header.difficulty + U256::one();
        block.header.signature = fx.miner.sign_recoverable(&block.header.hash()).unwrap();

        let err = fx
            .chain
            .ingest(block, ConnectedSource::Propagated, None, ts_at(1))
            .unwrap_err();
        assert!(matches!(err, ChainError::WrongDifficulty { .. }));
    }

    #[test]
    fn tampered_state_root_is_rejected() {
        let fx = fixture();
        let genesis = fx.chain.ensure_genesis().unwrap();

        let mut block = build_child(&fx.chain, &fx.miner, &genesis, Vec::new(), ts_at(1));
        block.header.state_root_hash = [0xEE; 32];
        block.header.signature = fx.miner.sign_recoverable(&block.header.hash()).unwrap();

        let err = fx
            .chain
            .ingest(block, ConnectedSource::Propagated, None, ts_at(1))
            .unwrap_err();
        assert!(matches!(err, ChainError::StateRootMismatch { .. }));
    }

    #[test]
    fn locators_are_dense_then_sparse_and_reach_genesis() {
        let fx = fixture();
        let mut parent = fx.chain.ensure_genesis().unwrap();
        for height in 1..=30u64 {
            let (_, stored) = grow(&fx.chain, &fx.miner, &parent, Vec::new(), ts_at(height));
            parent = stored;
        }

        let locators = fx.chain.locator_hashes().unwrap();
        let genesis_hash = fx.chain.canonical_block_by_height(0).unwrap().unwrap().hash;
        assert_eq!(locators.first(), Some(&parent.hash));
        assert_eq!(locators.last(), Some(&genesis_hash));
        // Heights: 30..21 dense, then 19, 15, 7, 0.
        assert_eq!(locators.len(), 14);

        let ancestor = fx.chain.find_common_ancestor(&locators).unwrap().unwrap();
        assert_eq!(ancestor.1, 30);
    }
}
