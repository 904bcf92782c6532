//! # Peer Registry
//!
//! Maps connection channels and peer identities to live connections, tracks
//! per-peer chain status and liveness, and ranks peers for propagation and
//! sync using the reputation scores.

use crate::connection::Connection;
use crate::reputation::ReputationService;
use crate::wire::StatusPayload;
use parking_lot::RwLock;
use primitive_types::U256;
use shared_types::{Address, Hash};
use std::collections::HashMap;
use std::sync::Arc;

/// Mutable per-peer status.
#[derive(Debug, Clone)]
pub struct PeerStatus {
    pub head_hash: Hash,
    pub head_height: u64,
    pub total_difficulty: U256,
    pub last_pong_ms: u64,
    pub connected_at_ms: u64,
}

/// One connected peer.
pub struct PeerHandle {
    pub channel_id: u64,
    pub identity: Address,
    pub connection: Arc<Connection>,
    status: RwLock<PeerStatus>,
}

impl PeerHandle {
    pub fn status(&self) -> PeerStatus {
        self.status.read().clone()
    }

    pub fn update_head(&self, head_hash: Hash, head_height: u64, total_difficulty: U256) {
        let mut status = self.status.write();
        status.head_hash = head_hash;
        status.head_height = head_height;
        status.total_difficulty = total_difficulty;
    }

    /// A block announcement proves the peer's chain reaches at least this
    /// height; the advertised difficulty is kept as-is.
    pub fn note_announced_block(&self, head_hash: Hash, head_height: u64) {
        let mut status = self.status.write();
        if head_height > status.head_height {
            status.head_hash = head_hash;
            status.head_height = head_height;
        }
    }

    pub fn touch_pong(&self, now_ms: u64) {
        self.status.write().last_pong_ms = now_ms;
    }
}

/// Registry of live peers.
pub struct PeerRegistry {
    by_channel: RwLock<HashMap<u64, Arc<PeerHandle>>>,
    by_identity: RwLock<HashMap<Address, u64>>,
    reputation: ReputationService,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self {
            by_channel: RwLock::new(HashMap::new()),
            by_identity: RwLock::new(HashMap::new()),
            reputation: ReputationService::new(),
        }
    }

    pub fn reputation(&self) -> &ReputationService {
        &self.reputation
    }

    pub fn len(&self) -> usize {
        self.by_channel.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_channel.read().is_empty()
    }

    /// Register a handshaken peer. Rejects banned identities.
    pub fn register(
        &self,
        channel_id: u64,
        connection: Arc<Connection>,
        status: &StatusPayload,
        now_ms: u64,
    ) -> Option<Arc<PeerHandle>> {
        if self.reputation.is_banned(&status.identity) {
            return None;
        }

        let handle = Arc::new(PeerHandle {
            channel_id,
            identity: status.identity,
            connection,
            status: RwLock::new(PeerStatus {
                head_hash: status.head_hash,
                head_height: status.head_height,
                total_difficulty: status.total_difficulty,
                last_pong_ms: now_ms,
                connected_at_ms: now_ms,
            }),
        });

        self.by_channel.write().insert(channel_id, handle.clone());
        self.by_identity.write().insert(status.identity, channel_id);
        Some(handle)
    }

    pub fn remove(&self, channel_id: u64) {
        if let Some(handle) = self.by_channel.write().remove(&channel_id) {
            let mut by_identity = self.by_identity.write();
            if by_identity.get(&handle.identity) == Some(&channel_id) {
                by_identity.remove(&handle.identity);
            }
        }
    }

    pub fn get(&self, channel_id: u64) -> Option<Arc<PeerHandle>> {
        self.by_channel.read().get(&channel_id).cloned()
    }

    pub fn get_by_identity(&self, identity: &Address) -> Option<Arc<PeerHandle>> {
        let channel_id = *self.by_identity.read().get(identity)?;
        self.get(channel_id)
    }

    pub fn all(&self) -> Vec<Arc<PeerHandle>> {
        self.by_channel.read().values().cloned().collect()
    }

    /// Up to `n` best peers by (score, head height), excluding banned
    /// identities and `exclude`.
    pub fn best_peers(&self, n: usize, exclude: Option<&Address>) -> Vec<Arc<PeerHandle>> {
        let mut peers: Vec<Arc<PeerHandle>> = self
            .all()
            .into_iter()
            .filter(|p| !self.reputation.is_banned(&p.identity))
            .filter(|p| Some(&p.identity) != exclude)
            .collect();
        peers.sort_by_key(|p| {
            (
                std::cmp::Reverse(self.reputation.score(&p.identity)),
                std::cmp::Reverse(p.status().head_height),
            )
        });
        peers.truncate(n);
        peers
    }

    /// The most reputable peer strictly ahead of our chain.
    pub fn sync_candidate(&self, local_height: u64) -> Option<Arc<PeerHandle>> {
        self.all()
            .into_iter()
            .filter(|p| !self.reputation.is_banned(&p.identity))
            .filter(|p| p.status().head_height > local_height)
            .max_by_key(|p| {
                (
                    self.reputation.score(&p.identity),
                    p.status().total_difficulty,
                )
            })
    }

    /// The lowest-scored peer, for connection-slot eviction.
    pub fn worst_peer(&self) -> Option<Arc<PeerHandle>> {
        self.all()
            .into_iter()
            .min_by_key(|p| self.reputation.score(&p.identity))
    }
}

impl Default for PeerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
