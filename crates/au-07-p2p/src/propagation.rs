//! # Block & Transaction Propagation
//!
//! Announces newly connected blocks (header only; peers fetch bodies on
//! demand) to the best peers, skipping whoever sent us the block. Locally
//! submitted transactions gossip the same way.

use crate::server::P2pContext;
use crate::wire::Message;
use shared_bus::{NodeEvent, Subscription};
use shared_types::{ConnectedSource, Tx};
use std::sync::Arc;
use tracing::debug;

/// Fan-out limit for block announcements.
const MAX_ANNOUNCE_PEERS: usize = 16;

/// Long-running announcer over connected-block events.
pub async fn run_propagation(ctx: Arc<P2pContext>, mut events: Subscription) {
    while let Some(event) = events.recv().await {
        let NodeEvent::BlockConnected(connected) = event else {
            continue;
        };
        // Synced and reorged blocks are history, not news.
        if !matches!(
            connected.source,
            ConnectedSource::Mined | ConnectedSource::Propagated
        ) {
            continue;
        }

        let header = connected.block.block.header.clone();
        let peers = ctx
            .registry
            .best_peers(MAX_ANNOUNCE_PEERS, connected.received_from.as_ref());
        debug!(
            height = header.height,
            peers = peers.len(),
            "announcing block"
        );
        for peer in peers {
            let _ = peer
                .connection
                .send(Message::NewBlock {
                    header: header.clone(),
                })
                .await;
        }
    }
}

/// Gossip one locally admitted transaction.
pub async fn broadcast_tx(ctx: &Arc<P2pContext>, tx: &Tx) {
    for peer in ctx.registry.best_peers(MAX_ANNOUNCE_PEERS, None) {
        let _ = peer
            .connection
            .send(Message::NewMempoolTx { tx: tx.clone() })
            .await;
    }
}
