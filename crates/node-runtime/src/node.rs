//! # Node Wiring
//!
//! Builds every subsystem and connects them over the shared bus:
//!
//! - mined blocks flow back into ingestion
//! - connected blocks evict mempool entries; a reorg returns the abandoned
//!   branch's transactions to the pool
//! - gap detections wake the sync driver, which pauses mining while it
//!   catches up
//! - connected blocks from mining/propagation are announced to peers

use crate::adapters::{RocksDbConfig, RocksDbStore};
use crate::config::NodeConfig;
use crate::identity::IdentityService;
use crate::state_view::HeadStateView;
use au_04_chain::ChainController;
use au_05_mempool::{Mempool, MempoolConfig};
use au_06_mining::{MiningConfig, MiningController};
use au_07_p2p::{propagation, P2pConfig, P2pContext, P2pService, SyncDriver};
use shared_bus::{EventFilter, EventTopic, InMemoryEventBus, NodeEvent};
use shared_crypto::keccak256_concat;
use shared_crypto::DatasetPowHasher;
use shared_types::{ConnectedSource, Hash, NetworkSettings};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// A running node.
pub struct Node {
    pub chain: Arc<ChainController>,
    pub mempool: Arc<Mempool>,
    pub bus: Arc<InMemoryEventBus>,
    pub miner: Arc<MiningController>,
    pub p2p: Arc<P2pContext>,
}

/// Seed of the PoW hash dataset; fixed per network.
fn pow_seed(settings: &NetworkSettings) -> [u8; 32] {
    keccak256_concat(&[b"aurum-pow-v1", &settings.network_id.to_be_bytes()])
}

impl Node {
    /// Build and start every subsystem.
    pub async fn start(config: NodeConfig) -> anyhow::Result<Self> {
        let data_dir = Path::new(&config.data_dir);
        std::fs::create_dir_all(data_dir)?;

        let identity = IdentityService::load_or_generate(data_dir)?;
        let settings = Arc::new(config.network.clone());

        let store = Arc::new(RocksDbStore::open(RocksDbConfig::new(
            data_dir.join("rocksdb"),
        ))?);
        let bus = Arc::new(InMemoryEventBus::new());

        let seed = pow_seed(&settings);
        let chain = Arc::new(ChainController::new(
            store,
            settings.clone(),
            bus.clone(),
            Box::new(DatasetPowHasher::new(&seed)),
        )?);
        let genesis = chain.ensure_genesis()?;
        info!(
            genesis = %shared_types::short_hex(&genesis.hash),
            head_height = chain.head().map(|h| h.height()).unwrap_or(0),
            "chain ready"
        );

        let mempool = Arc::new(Mempool::new(
            Arc::new(HeadStateView::new(chain.clone())),
            MempoolConfig::default(),
            settings.network_id,
        ));

        let p2p = P2pContext::new(
            chain.clone(),
            mempool.clone(),
            settings.clone(),
            identity.address(),
        );
        let p2p_service = P2pService::new(
            p2p.clone(),
            P2pConfig {
                listen_addr: config.p2p.listen_addr.clone(),
                ..Default::default()
            },
        );
        p2p_service.listen().await?;
        for peer in &config.p2p.bootstrap_peers {
            if let Err(err) = p2p_service.connect(peer).await {
                warn!(peer, error = %err, "bootstrap dial failed");
            }
        }

        let miner = Arc::new(MiningController::new(
            chain.clone(),
            mempool.clone(),
            bus.clone(),
            identity.keypair(),
            &seed,
            MiningConfig {
                enabled: config.mining.enabled,
                hashing_threads: config.mining.hashing_threads,
            },
        ));
        miner.start();

        let node = Self {
            chain,
            mempool,
            bus,
            miner,
            p2p,
        };
        node.spawn_event_tasks();
        Ok(node)
    }

    fn spawn_event_tasks(&self) {
        // Mined blocks route back into ingestion.
        {
            let chain = self.chain.clone();
            let mut mined = self
                .bus
                .subscribe(EventFilter::topics(vec![EventTopic::Mining]));
            tokio::spawn(async move {
                while let Some(event) = mined.recv().await {
                    let NodeEvent::BlockMined(block) = event else {
                        continue;
                    };
                    let chain = chain.clone();
                    let result = tokio::task::spawn_blocking(move || {
                        chain.ingest(
                            (*block).clone(),
                            ConnectedSource::Mined,
                            None,
                            now_ms(),
                        )
                    })
                    .await;
                    match result {
                        Ok(Ok(outcome)) => {
                            tracing::debug!(?outcome, "mined block ingested");
                        }
                        Ok(Err(err)) => warn!(error = %err, "own mined block rejected"),
                        Err(err) => warn!(error = %err, "ingest task failed"),
                    }
                }
            });
        }

        // Mempool eviction and reorg reconciliation.
        {
            let chain = self.chain.clone();
            let mempool = self.mempool.clone();
            let mut connected = self
                .bus
                .subscribe(EventFilter::topics(vec![EventTopic::Chain]));
            tokio::spawn(async move {
                let mut last_head: Option<Hash> = None;
                while let Some(event) = connected.recv().await {
                    let NodeEvent::BlockConnected(event) = event else {
                        continue;
                    };

                    // Returning abandoned fork transactions is ours to do.
                    if event.source == ConnectedSource::Reorg {
                        if let Some(old_tip) = last_head {
                            match chain.txs_abandoned_by_reorg(&old_tip, &event.block.hash) {
                                Ok(returned) => {
                                    for tx in returned {
                                        let _ = mempool.add(tx, now_ms());
                                    }
                                }
                                Err(err) => {
                                    warn!(error = %err, "reorg reconciliation failed")
                                }
                            }
                        }
                    }

                    mempool.on_block_connected(&event);
                    last_head = Some(event.block.hash);
                }
            });
        }

        // Announce fresh blocks to peers.
        {
            let p2p = self.p2p.clone();
            let events = self
                .bus
                .subscribe(EventFilter::topics(vec![EventTopic::Chain]));
            tokio::spawn(propagation::run_propagation(p2p, events));
        }

        // Sync on demand, holding mining while catching up.
        {
            let p2p = self.p2p.clone();
            let miner = self.miner.clone();
            tokio::spawn(async move {
                let driver = SyncDriver::new(p2p.clone());
                loop {
                    p2p.sync_notify.notified().await;
                    miner.pause();
                    match driver.sync_once().await {
                        Ok(blocks) if blocks > 0 => info!(blocks, "caught up"),
                        Ok(_) => {}
                        Err(err) => warn!(error = %err, "sync attempt failed"),
                    }
                    miner.resume();
                }
            });
        }
    }
}

fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
