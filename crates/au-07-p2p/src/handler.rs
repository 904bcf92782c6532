//! # Inbound Message Handling
//!
//! Dispatch for peer-initiated messages. Request/response messages are
//! answered synchronously from the chain and mempool; a `NewBlock`
//! announcement spawns its own fetch-and-ingest task so the connection's
//! read loop never waits on a request through the same socket.

use crate::connection::{Connection, REQUEST_TIMEOUT};
use crate::errors::P2pError;
use crate::peers::PeerHandle;
use crate::reputation::{
    PENALTY_INVALID_BLOCK, PENALTY_PROTOCOL_VIOLATION, PENALTY_TIMEOUT, REWARD_USEFUL_BLOCK,
};
use crate::server::P2pContext;
use crate::wire::Message;
use au_04_chain::IngestOutcome;
use shared_types::{Block, BlockHeader, ConnectedSource};
use std::sync::Arc;
use tracing::{debug, warn};

/// Cap on served header batches.
const MAX_HEADER_BATCH: usize = 512;

/// Handle one peer-initiated message; the returned message (if any) is the
/// response, sent under the inbound request id.
pub async fn handle_message(
    ctx: &Arc<P2pContext>,
    connection: &Arc<Connection>,
    peer: &Arc<PeerHandle>,
    message: Message,
) -> Result<Option<Message>, P2pError> {
    match message {
        Message::Ping => Ok(Some(Message::Pong)),

        Message::Pong => {
            peer.touch_pong(now_ms());
            Ok(None)
        }

        Message::Status(status) => {
            // Mid-session status refresh: adopt the peer's new head.
            peer.update_head(status.head_hash, status.head_height, status.total_difficulty);
            Ok(None)
        }

        Message::Disconnect { reason } => {
            debug!(?reason, "peer requested disconnect");
            Err(P2pError::Disconnected)
        }

        Message::NewBlock { header } => {
            peer.note_announced_block(header.hash(), header.height);
            if ctx.chain.block_by_hash(&header.hash())?.is_none() {
                tokio::spawn(fetch_and_ingest(
                    ctx.clone(),
                    connection.clone(),
                    peer.clone(),
                    header,
                ));
            }
            Ok(None)
        }

        Message::GetBlockHeaders {
            locators,
            stop_hash,
            batch_size,
        } => {
            let batch = (batch_size as usize).clamp(1, MAX_HEADER_BATCH);
            let headers = match ctx.chain.find_common_ancestor(&locators)? {
                Some((_, ancestor_height)) => {
                    let mut headers = ctx.chain.headers_after(ancestor_height, batch)?;
                    if let Some(stop) = stop_hash {
                        if let Some(position) =
                            headers.iter().position(|h| h.hash() == stop)
                        {
                            headers.truncate(position + 1);
                        }
                    }
                    headers
                }
                None => Vec::new(),
            };
            Ok(Some(Message::BlockHeaders { headers }))
        }

        Message::GetBlockBodies { hashes } => {
            let mut bodies = Vec::with_capacity(hashes.len());
            for hash in &hashes {
                let txs = ctx
                    .chain
                    .block_by_hash(hash)?
                    .map(|stored| stored.block.txs)
                    .unwrap_or_default();
                bodies.push(txs);
            }
            Ok(Some(Message::BlockBodies { bodies }))
        }

        Message::NewMempoolTx { tx } => {
            match ctx.mempool.submit(&tx.rlp_encode(), now_ms()) {
                Ok(_) => {}
                Err(err) => debug!(error = %err, "gossiped transaction refused"),
            }
            Ok(None)
        }

        Message::GetMempoolHashes => Ok(Some(Message::MempoolHashes {
            hashes: ctx.mempool.hashes(),
        })),

        Message::GetMempoolTransactions { hashes } => Ok(Some(Message::MempoolTransactions {
            txs: ctx.mempool.get_many(&hashes),
        })),

        // These only arrive as responses; unsolicited copies are noise from
        // a misbehaving peer.
        Message::BlockHeaders { .. }
        | Message::BlockBodies { .. }
        | Message::MempoolHashes { .. }
        | Message::MempoolTransactions { .. } => {
            ctx.registry.reputation().adjust(
                &peer.identity,
                PENALTY_PROTOCOL_VIOLATION,
                "unsolicited response",
            );
            Ok(None)
        }
    }
}

/// Fetch an announced block's body from its announcer and ingest it.
async fn fetch_and_ingest(
    ctx: Arc<P2pContext>,
    connection: Arc<Connection>,
    peer: Arc<PeerHandle>,
    header: BlockHeader,
) {
    let block_hash = header.hash();
    let response = connection
        .request(
            Message::GetBlockBodies {
                hashes: vec![block_hash],
            },
            REQUEST_TIMEOUT,
        )
        .await;

    let txs = match response {
        Ok(Message::BlockBodies { mut bodies }) if !bodies.is_empty() => bodies.remove(0),
        Ok(_) => {
            ctx.registry.reputation().adjust(
                &peer.identity,
                PENALTY_PROTOCOL_VIOLATION,
                "wrong body response",
            );
            return;
        }
        Err(P2pError::Timeout) => {
            ctx.registry
                .reputation()
                .adjust(&peer.identity, PENALTY_TIMEOUT, "body fetch timeout");
            return;
        }
        Err(_) => return,
    };

    let block = Block { header, txs };
    match ctx.chain.ingest(
        block,
        ConnectedSource::Propagated,
        Some(peer.identity),
        now_ms(),
    ) {
        Ok(IngestOutcome::Connected(_)) => {
            ctx.registry
                .reputation()
                .adjust(&peer.identity, REWARD_USEFUL_BLOCK, "useful block");
        }
        Ok(IngestOutcome::GapDetected) => {
            debug!("announced block is far ahead, requesting sync");
            ctx.sync_notify.notify_one();
        }
        Ok(_) => {}
        Err(err) => {
            warn!(error = %err, block = %shared_types::short_hex(&block_hash), "announced block rejected");
            ctx.registry
                .reputation()
                .adjust(&peer.identity, PENALTY_INVALID_BLOCK, "invalid block");
        }
    }
}

pub(crate) fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
