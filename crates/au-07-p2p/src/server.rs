//! # P2P Service
//!
//! Socket lifecycle: listening, dialing, the handshake, and the
//! per-connection read loop with liveness pings. Each connection runs a
//! reader task (frames into a channel, so a slow handler never corrupts a
//! partially read frame) and a writer task draining the outbound queue.

use crate::connection::{run_writer, Connection};
use crate::errors::P2pError;
use crate::handler::{handle_message, now_ms};
use crate::peers::PeerRegistry;
use crate::reputation::PENALTY_PROTOCOL_VIOLATION;
use crate::wire::{read_frame, Frame, Message, StatusPayload};
use au_04_chain::ChainController;
use au_05_mempool::Mempool;
use shared_types::{Address, NetworkSettings, ZERO_HASH};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, warn};

/// Protocol version spoken by this node.
pub const PROTOCOL_VERSION: u16 = 1;

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

/// Shared dependencies of every p2p task.
pub struct P2pContext {
    pub chain: Arc<ChainController>,
    pub mempool: Arc<Mempool>,
    pub registry: Arc<PeerRegistry>,
    pub settings: Arc<NetworkSettings>,
    pub identity: Address,
    /// Poked when a gap is detected; the sync driver listens.
    pub sync_notify: Notify,
}

impl P2pContext {
    pub fn new(
        chain: Arc<ChainController>,
        mempool: Arc<Mempool>,
        settings: Arc<NetworkSettings>,
        identity: Address,
    ) -> Arc<Self> {
        Arc::new(Self {
            chain,
            mempool,
            registry: Arc::new(PeerRegistry::new()),
            settings,
            identity,
            sync_notify: Notify::new(),
        })
    }
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct P2pConfig {
    pub listen_addr: String,
    pub ping_interval: Duration,
    pub pong_timeout: Duration,
    pub handshake_timeout: Duration,
}

impl Default for P2pConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:30366".to_string(),
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(90),
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

/// Accepts and dials connections.
pub struct P2pService {
    ctx: Arc<P2pContext>,
    config: P2pConfig,
}

impl P2pService {
    pub fn new(ctx: Arc<P2pContext>, config: P2pConfig) -> Self {
        Self { ctx, config }
    }

    /// Bind the listener; returns the bound address and the accept task.
    pub async fn listen(&self) -> Result<(SocketAddr, tokio::task::JoinHandle<()>), P2pError> {
        let listener = TcpListener::bind(&self.config.listen_addr).await?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "p2p listening");

        let ctx = self.ctx.clone();
        let config = self.config.clone();
        let handle = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, remote)) => {
                        debug!(%remote, "inbound connection");
                        let ctx = ctx.clone();
                        let config = config.clone();
                        tokio::spawn(async move {
                            if let Err(err) = run_connection(ctx, config, stream).await {
                                debug!(%remote, error = %err, "connection ended");
                            }
                        });
                    }
                    Err(err) => {
                        warn!(error = %err, "accept failed");
                    }
                }
            }
        });
        Ok((local_addr, handle))
    }

    /// Dial a bootstrap peer.
    pub async fn connect(&self, addr: &str) -> Result<(), P2pError> {
        let stream = TcpStream::connect(addr).await?;
        let ctx = self.ctx.clone();
        let config = self.config.clone();
        let addr = addr.to_string();
        tokio::spawn(async move {
            if let Err(err) = run_connection(ctx, config, stream).await {
                debug!(%addr, error = %err, "outbound connection ended");
            }
        });
        Ok(())
    }
}

fn local_status(ctx: &Arc<P2pContext>) -> Result<StatusPayload, P2pError> {
    let head = ctx.chain.head();
    let genesis_hash = ctx
        .chain
        .canonical_block_by_height(0)?
        .map(|b| b.hash)
        .unwrap_or(ZERO_HASH);

    Ok(StatusPayload {
        protocol_version: PROTOCOL_VERSION,
        network: ctx.settings.network_id,
        head_hash: head.as_ref().map(|h| h.hash).unwrap_or(ZERO_HASH),
        head_height: head.as_ref().map(|h| h.height()).unwrap_or(0),
        total_difficulty: head
            .as_ref()
            .map(|h| h.cumulative_difficulty)
            .unwrap_or_default(),
        genesis_hash,
        identity: ctx.identity,
    })
}

/// Handshake, then serve the connection until it drops.
async fn run_connection(
    ctx: Arc<P2pContext>,
    config: P2pConfig,
    stream: TcpStream,
) -> Result<(), P2pError> {
    let channel_id = NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed);
    let (mut read_half, write_half) = stream.into_split();

    let (outbound_tx, outbound_rx) = mpsc::channel::<Frame>(64);
    tokio::spawn(run_writer(write_half, outbound_rx));
    let connection = Arc::new(Connection::new(channel_id, outbound_tx));

    // Both sides open with STATUS.
    connection
        .send(Message::Status(local_status(&ctx)?))
        .await?;
    let first = tokio::time::timeout(config.handshake_timeout, read_frame(&mut read_half))
        .await
        .map_err(|_| P2pError::Timeout)??;
    let Message::Status(status) = first.message else {
        return Err(P2pError::HandshakeRejected("first frame not STATUS".into()));
    };

    if status.network != ctx.settings.network_id {
        return Err(P2pError::HandshakeRejected(format!(
            "wrong network {}",
            status.network
        )));
    }
    let our_genesis = ctx
        .chain
        .canonical_block_by_height(0)?
        .map(|b| b.hash)
        .unwrap_or(ZERO_HASH);
    if status.genesis_hash != our_genesis {
        return Err(P2pError::HandshakeRejected("genesis mismatch".into()));
    }

    let Some(peer) = ctx
        .registry
        .register(channel_id, connection.clone(), &status, now_ms())
    else {
        let _ = connection
            .send(Message::Disconnect {
                reason: Some("banned".into()),
            })
            .await;
        return Err(P2pError::PeerBanned);
    };
    info!(
        peer = %shared_types::short_hex(&status.identity),
        height = status.head_height,
        "peer connected"
    );

    // If the peer is ahead, let the sync driver know right away.
    let local_height = ctx.chain.head().map(|h| h.height()).unwrap_or(0);
    if status.head_height > local_height {
        ctx.sync_notify.notify_one();
    }

    // Dedicated reader task: frames come through a channel so a slow
    // handler can never interleave with a half-read frame.
    let (frame_tx, mut frame_rx) = mpsc::channel::<Frame>(64);
    tokio::spawn(async move {
        loop {
            match read_frame(&mut read_half).await {
                Ok(frame) => {
                    if frame_tx.send(frame).await.is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });

    let mut ping = tokio::time::interval(config.ping_interval);
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ping.tick().await; // the first tick fires immediately

    let result = loop {
        tokio::select! {
            maybe_frame = frame_rx.recv() => {
                let Some(frame) = maybe_frame else {
                    break Ok(());
                };
                if connection.fulfill(frame.request_id, &frame.message) {
                    continue;
                }
                match handle_message(&ctx, &connection, &peer, frame.message).await {
                    Ok(Some(response)) => {
                        if connection.respond(frame.request_id, response).await.is_err() {
                            break Ok(());
                        }
                    }
                    Ok(None) => {}
                    Err(P2pError::Disconnected) => break Ok(()),
                    Err(err) => {
                        ctx.registry.reputation().adjust(
                            &peer.identity,
                            PENALTY_PROTOCOL_VIOLATION,
                            "malformed message",
                        );
                        break Err(err);
                    }
                }
            }
            _ = ping.tick() => {
                let last_pong = peer.status().last_pong_ms;
                if now_ms().saturating_sub(last_pong) > config.pong_timeout.as_millis() as u64 {
                    debug!("peer unresponsive, dropping");
                    break Ok(());
                }
                if connection.send(Message::Ping).await.is_err() {
                    break Ok(());
                }
            }
        }
    };

    ctx.registry.remove(channel_id);
    connection.abort_pending();
    info!(peer = %shared_types::short_hex(&status.identity), "peer disconnected");
    result
}
