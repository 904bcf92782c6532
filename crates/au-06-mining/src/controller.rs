//! # Mining Controller
//!
//! One long-lived driver: take the head, assemble a template, run the
//! nonce search on the worker pool, and publish the solved block as a
//! `BlockMined` event for ingestion. A `BlockConnected` event cancels the
//! running search and the loop starts over on the new head; `pause` holds
//! the loop while sync is catching up.

use crate::errors::MiningError;
use crate::search::NonceSearcher;
use crate::template::{assemble_template, BlockTemplate};
use au_04_chain::ChainController;
use au_05_mempool::Mempool;
use shared_bus::{EventFilter, EventPublisher, EventTopic, InMemoryEventBus, NodeEvent};
use shared_crypto::{target_from_difficulty, KeyPair};
use shared_types::Block;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Mining configuration.
#[derive(Debug, Clone)]
pub struct MiningConfig {
    pub enabled: bool,
    pub hashing_threads: usize,
}

impl Default for MiningConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            hashing_threads: 2,
        }
    }
}

/// The long-lived mining driver.
pub struct MiningController {
    chain: Arc<ChainController>,
    mempool: Arc<Mempool>,
    bus: Arc<InMemoryEventBus>,
    identity: Arc<KeyPair>,
    config: MiningConfig,
    searcher: parking_lot::Mutex<NonceSearcher>,
    paused: AtomicBool,
    stopped: AtomicBool,
}

impl MiningController {
    pub fn new(
        chain: Arc<ChainController>,
        mempool: Arc<Mempool>,
        bus: Arc<InMemoryEventBus>,
        identity: Arc<KeyPair>,
        pow_seed: &[u8; 32],
        config: MiningConfig,
    ) -> Self {
        let searcher = NonceSearcher::new(pow_seed, config.hashing_threads);
        Self {
            chain,
            mempool,
            bus,
            identity,
            config,
            searcher: parking_lot::Mutex::new(searcher),
            paused: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    /// Spawn the mining task; a no-op handle when mining is disabled.
    pub fn start(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        if !self.config.enabled {
            info!("mining disabled");
            return tokio::spawn(async {});
        }
        let controller = self.clone();
        tokio::spawn(async move { controller.run().await })
    }

    /// Hold the loop (used around sync).
    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
    }

    /// Stop the loop permanently.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    pub async fn run(self: Arc<Self>) {
        info!(threads = self.config.hashing_threads, "mining loop started");
        let mut events = self
            .bus
            .subscribe(EventFilter::topics(vec![EventTopic::Chain]));

        while !self.stopped.load(Ordering::Acquire) {
            if self.paused.load(Ordering::Acquire) {
                tokio::time::sleep(Duration::from_millis(200)).await;
                continue;
            }

            let template = match assemble_template(
                &self.chain,
                &self.mempool,
                self.identity.address(),
                now_ms(),
            ) {
                Ok(template) => template,
                Err(err) => {
                    warn!(error = %err, "template assembly failed, retrying");
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    continue;
                }
            };
            self.mempool.remove_all(&template.invalid_tx_hashes);

            let cancel = Arc::new(AtomicBool::new(false));
            let search = {
                let controller = self.clone();
                let cancel = cancel.clone();
                let pow_input = template.header.pow_input();
                let target = target_from_difficulty(template.header.difficulty);
                tokio::task::spawn_blocking(move || {
                    let mut searcher = controller.searcher.lock();
                    searcher.search(&pow_input, target, &cancel)
                })
            };
            tokio::pin!(search);

            let solved = loop {
                tokio::select! {
                    event = events.recv() => {
                        match event {
                            Some(NodeEvent::BlockConnected(_)) => {
                                // The chain moved; this template is stale.
                                debug!("head changed, preempting nonce search");
                                cancel.store(true, Ordering::Release);
                            }
                            Some(_) => continue,
                            None => {
                                cancel.store(true, Ordering::Release);
                                self.stop();
                            }
                        }
                    }
                    result = &mut search => {
                        break result.unwrap_or(None);
                    }
                }
            };

            let Some(nonce) = solved else {
                continue;
            };
            if let Err(err) = self.finalize(template, nonce) {
                warn!(error = %err, "failed to finalize mined block");
            }
        }
        info!("mining loop stopped");
    }

    /// Sign and publish a solved template, unless the head moved away.
    fn finalize(&self, template: BlockTemplate, nonce: u64) -> Result<(), MiningError> {
        let head = self.chain.head().ok_or(MiningError::NoHead)?;
        if head.hash != template.parent_hash {
            info!(
                height = template.header.height,
                "STALE: solved block's parent is no longer the head, discarding"
            );
            return Ok(());
        }

        let mut header = template.header;
        header.nonce = nonce;
        header.signature = self.identity.sign_recoverable(&header.hash())?;

        let block = Block {
            header,
            txs: template.txs,
        };
        info!(
            height = block.header.height,
            hash = %shared_types::short_hex(&block.header.hash()),
            txs = block.txs.len(),
            "block mined"
        );
        self.bus.publish(NodeEvent::BlockMined(Arc::new(block)));
        Ok(())
    }
}

fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use au_05_mempool::{MempoolConfig, MempoolStateView};
    use primitive_types::U256;
    use shared_types::storage::MemoryColumnStore;
    use shared_types::{Address, ConnectedSource, NetworkSettings, Wei};

    struct FlatState;

    impl MempoolStateView for FlatState {
        fn account_nonce(&self, _address: &Address) -> i64 {
            -1
        }
        fn required_fee(&self, _size: usize) -> Wei {
            Wei::one()
        }
    }

    struct Rig {
        chain: Arc<ChainController>,
        mempool: Arc<Mempool>,
        bus: Arc<InMemoryEventBus>,
        identity: Arc<KeyPair>,
    }

    fn rig() -> Rig {
        let identity = Arc::new(KeyPair::generate());
        let authority = KeyPair::generate();
        let mut settings = NetworkSettings::devnet(authority.address());
        settings.min_difficulty = U256::one();
        let settings = Arc::new(settings);

        let bus = Arc::new(InMemoryEventBus::new());
        let chain = Arc::new(
            ChainController::new(
                Arc::new(MemoryColumnStore::new()),
                settings.clone(),
                bus.clone(),
                Box::new(shared_crypto::DatasetPowHasher::new(&[9u8; 32])),
            )
            .unwrap(),
        );
        chain.ensure_genesis().unwrap();

        let mempool = Arc::new(Mempool::new(
            Arc::new(FlatState),
            MempoolConfig::default(),
            settings.network_id,
        ));

        Rig {
            chain,
            mempool,
            bus,
            identity,
        }
    }

    #[test]
    fn template_commits_to_head_and_difficulty() {
        let rig = rig();
        let head = rig.chain.head().unwrap();

        let template = assemble_template(
            &rig.chain,
            &rig.mempool,
            rig.identity.address(),
            head.block.header.timestamp_ms + 10_000,
        )
        .unwrap();

        assert_eq!(template.parent_hash, head.hash);
        assert_eq!(template.header.height, 1);
        assert_eq!(template.header.nonce, 0);
        assert_eq!(template.header.difficulty, U256::one());
        assert!(template.txs.is_empty());
        assert!(template.invalid_tx_hashes.is_empty());
    }

    #[test]
    fn solved_template_connects_as_mined_block() {
        let rig = rig();
        let head = rig.chain.head().unwrap();
        let now = head.block.header.timestamp_ms + 10_000;

        let template =
            assemble_template(&rig.chain, &rig.mempool, rig.identity.address(), now).unwrap();

        let mut searcher = NonceSearcher::new(&[9u8; 32], 2);
        let cancel = AtomicBool::new(false);
        let nonce = searcher
            .search(
                &template.header.pow_input(),
                target_from_difficulty(template.header.difficulty),
                &cancel,
            )
            .unwrap();

        let mut header = template.header;
        header.nonce = nonce;
        header.signature = rig.identity.sign_recoverable(&header.hash()).unwrap();
        let block = Block {
            header,
            txs: template.txs,
        };

        let outcome = rig
            .chain
            .ingest(block, ConnectedSource::Mined, None, now)
            .unwrap();
        assert!(matches!(outcome, au_04_chain::IngestOutcome::Connected(_)));
        assert_eq!(rig.chain.head().unwrap().height(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn controller_mines_and_publishes() {
        let rig = rig();
        let mut mined = rig
            .bus
            .subscribe(EventFilter::topics(vec![EventTopic::Mining]));

        let controller = Arc::new(MiningController::new(
            rig.chain.clone(),
            rig.mempool.clone(),
            rig.bus.clone(),
            rig.identity.clone(),
            &[9u8; 32],
            MiningConfig {
                enabled: true,
                hashing_threads: 1,
            },
        ));
        let handle = controller.start();

        let event = tokio::time::timeout(Duration::from_secs(30), mined.recv())
            .await
            .expect("mining should solve a unit-difficulty block quickly")
            .expect("bus open");
        let NodeEvent::BlockMined(block) = event else {
            panic!("expected a mined block");
        };
        assert_eq!(block.header.height, 1);
        assert_eq!(block.header.coinbase, rig.identity.address());

        controller.stop();
        controller.pause();
        handle.abort();
    }
}
