//! # Sync Driver
//!
//! Catch-up machinery: pick the best peer ahead of us, negotiate a common
//! ancestor through locator hashes, then pull header windows and their
//! bodies. The next header window is requested while the current window's
//! bodies are still in flight.

use crate::connection::REQUEST_TIMEOUT;
use crate::errors::P2pError;
use crate::peers::PeerHandle;
use crate::reputation::{
    PENALTY_INVALID_BLOCK, PENALTY_PROTOCOL_VIOLATION, PENALTY_TIMEOUT, REWARD_GOOD_SYNC,
};
use crate::server::P2pContext;
use crate::wire::Message;
use shared_types::{Block, ConnectedSource, Hash};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Headers per sync window.
const HEADER_BATCH: u32 = 128;

/// Drives catch-up sync against the registry's best candidate.
pub struct SyncDriver {
    ctx: Arc<P2pContext>,
}

impl SyncDriver {
    pub fn new(ctx: Arc<P2pContext>) -> Self {
        Self { ctx }
    }

    /// Long-running loop: wake on gap notifications and try to catch up.
    pub async fn run(self) {
        loop {
            self.ctx.sync_notify.notified().await;
            match self.sync_once().await {
                Ok(0) => {}
                Ok(blocks) => info!(blocks, "sync round complete"),
                Err(P2pError::NoSyncCandidate) => debug!("no peer ahead of us"),
                Err(err) => warn!(error = %err, "sync round failed"),
            }
        }
    }

    /// One sync round; returns the number of blocks connected.
    pub async fn sync_once(&self) -> Result<u64, P2pError> {
        let local_height = self.ctx.chain.head().map(|h| h.height()).unwrap_or(0);
        let peer = self
            .ctx
            .registry
            .sync_candidate(local_height)
            .ok_or(P2pError::NoSyncCandidate)?;

        info!(
            peer = %shared_types::short_hex(&peer.identity),
            peer_height = peer.status().head_height,
            local_height,
            "starting sync"
        );

        match self.sync_with(&peer).await {
            Ok(blocks) => {
                self.ctx
                    .registry
                    .reputation()
                    .adjust(&peer.identity, REWARD_GOOD_SYNC, "completed sync");
                Ok(blocks)
            }
            Err(err) => {
                let penalty = match err {
                    P2pError::Timeout => PENALTY_TIMEOUT,
                    _ => PENALTY_PROTOCOL_VIOLATION,
                };
                let banned =
                    self.ctx
                        .registry
                        .reputation()
                        .adjust(&peer.identity, penalty, "sync failure");
                if banned {
                    let _ = peer
                        .connection
                        .send(Message::Disconnect {
                            reason: Some("banned".into()),
                        })
                        .await;
                    self.ctx.registry.remove(peer.channel_id);
                }
                Err(err)
            }
        }
    }

    async fn sync_with(&self, peer: &Arc<PeerHandle>) -> Result<u64, P2pError> {
        let connection = &peer.connection;
        let mut connected = 0u64;

        let mut headers = request_headers(
            connection,
            self.ctx.chain.locator_hashes()?,
        )
        .await?;

        while !headers.is_empty() {
            let hashes: Vec<Hash> = headers.iter().map(|h| h.hash()).collect();
            let last_hash = *hashes.last().expect("non-empty window");

            // Pipeline: fetch this window's bodies and the next header
            // window concurrently.
            let bodies_request = connection.request(
                Message::GetBlockBodies { hashes },
                REQUEST_TIMEOUT,
            );
            let next_request = connection.request(
                Message::GetBlockHeaders {
                    locators: vec![last_hash],
                    stop_hash: None,
                    batch_size: HEADER_BATCH,
                },
                REQUEST_TIMEOUT,
            );
            let (bodies_response, next_response) = tokio::join!(bodies_request, next_request);

            let Message::BlockBodies { bodies } = bodies_response? else {
                return Err(P2pError::UnexpectedResponse);
            };
            if bodies.len() != headers.len() {
                return Err(P2pError::UnexpectedResponse);
            }

            for (header, txs) in headers.into_iter().zip(bodies) {
                let block = Block { header, txs };
                match self.ctx.chain.ingest(
                    block,
                    ConnectedSource::Sync,
                    Some(peer.identity),
                    crate::handler::now_ms(),
                ) {
                    Ok(au_04_chain::IngestOutcome::Connected(_)) => connected += 1,
                    Ok(au_04_chain::IngestOutcome::AlreadyKnown) => {}
                    Ok(outcome) => {
                        debug!(?outcome, "unexpected outcome during sync");
                    }
                    Err(err) => {
                        warn!(error = %err, "synced block failed validation");
                        self.ctx.registry.reputation().adjust(
                            &peer.identity,
                            PENALTY_INVALID_BLOCK,
                            "invalid synced block",
                        );
                        return Err(P2pError::Chain(err));
                    }
                }
            }

            let Message::BlockHeaders { headers: next } = next_response? else {
                return Err(P2pError::UnexpectedResponse);
            };
            headers = next;
        }

        Ok(connected)
    }
}

async fn request_headers(
    connection: &Arc<crate::connection::Connection>,
    locators: Vec<Hash>,
) -> Result<Vec<shared_types::BlockHeader>, P2pError> {
    let response = connection
        .request(
            Message::GetBlockHeaders {
                locators,
                stop_hash: None,
                batch_size: HEADER_BATCH,
            },
            REQUEST_TIMEOUT,
        )
        .await?;
    match response {
        Message::BlockHeaders { headers } => Ok(headers),
        _ => Err(P2pError::UnexpectedResponse),
    }
}
