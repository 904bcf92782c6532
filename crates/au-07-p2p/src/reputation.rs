//! # Peer Reputation
//!
//! Integer score per peer identity with a ban threshold. Scores decay
//! nowhere; a banned identity stays banned for the process lifetime.

use parking_lot::RwLock;
use shared_types::Address;
use std::collections::{HashMap, HashSet};
use tracing::{info, warn};

/// Score below which an identity is banned.
pub const BAN_THRESHOLD: i32 = -100;

/// Standard adjustments.
pub const PENALTY_PROTOCOL_VIOLATION: i32 = -25;
pub const PENALTY_INVALID_BLOCK: i32 = -40;
pub const PENALTY_TIMEOUT: i32 = -5;
pub const REWARD_USEFUL_BLOCK: i32 = 2;
pub const REWARD_GOOD_SYNC: i32 = 5;

/// Score book over peer identities.
#[derive(Default)]
pub struct ReputationService {
    scores: RwLock<HashMap<Address, i32>>,
    banned: RwLock<HashSet<Address>>,
}

impl ReputationService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn score(&self, identity: &Address) -> i32 {
        self.scores.read().get(identity).copied().unwrap_or(0)
    }

    pub fn is_banned(&self, identity: &Address) -> bool {
        self.banned.read().contains(identity)
    }

    /// Apply a (positive or negative) adjustment; bans on crossing the
    /// threshold and reports whether the identity is now banned.
    pub fn adjust(&self, identity: &Address, delta: i32, reason: &str) -> bool {
        let mut scores = self.scores.write();
        let score = scores.entry(*identity).or_insert(0);
        *score += delta;

        if delta < 0 {
            warn!(
                peer = %shared_types::short_hex(identity),
                delta,
                score = *score,
                reason,
                "peer penalized"
            );
        }

        if *score <= BAN_THRESHOLD && !self.is_banned(identity) {
            self.banned.write().insert(*identity);
            info!(peer = %shared_types::short_hex(identity), "peer banned");
            return true;
        }
        self.is_banned(identity)
    }
}
