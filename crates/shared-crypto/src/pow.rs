//! # Proof-of-Work Hash
//!
//! The consensus rule only requires a function `H(pow_input, nonce) -> 32B`
//! whose output, read big-endian, must be at or below the difficulty target.
//! The concrete function is pluggable behind [`PowHasher`] because the
//! production hash family has a significant per-instance initialization cost
//! (a seeded dataset), and every mining worker owns its own instance.
//!
//! **IMPORTANT**: the target is a CEILING. A higher difficulty produces a
//! lower target, which means fewer valid hashes.

use crate::hashing::{keccak256, keccak256_concat};
use primitive_types::U256;

/// A proof-of-work hash instance.
///
/// Instances are not shared across threads; each worker constructs (or is
/// handed) its own. Construction may be expensive, hashing must be cheap.
pub trait PowHasher: Send {
    /// Hash the PoW input together with a candidate nonce.
    fn pow_hash(&mut self, input: &[u8], nonce: u64) -> [u8; 32];
}

/// Scratchpad size for [`DatasetPowHasher`]: 2 MiB, enough to defeat naive
/// register-only evaluation while keeping per-worker setup under ~100 ms.
const SCRATCHPAD_BYTES: usize = 2 * 1024 * 1024;

/// Number of dependent scratchpad reads mixed into each hash.
const MIX_ROUNDS: usize = 16;

/// Memory-backed PoW hash: a keccak-filled scratchpad seeded once, then a
/// short chain of data-dependent reads folded into the final digest.
///
/// Stands in for a RandomX-class VM: deterministic, seedable and with a
/// deliberately expensive constructor.
pub struct DatasetPowHasher {
    scratchpad: Vec<u8>,
}

impl DatasetPowHasher {
    /// Build the scratchpad from a 32-byte seed. This is the expensive step.
    pub fn new(seed: &[u8; 32]) -> Self {
        let mut scratchpad = vec![0u8; SCRATCHPAD_BYTES];
        let mut block = keccak256(seed);
        for chunk in scratchpad.chunks_mut(32) {
            block = keccak256(&block);
            chunk.copy_from_slice(&block[..chunk.len()]);
        }
        Self { scratchpad }
    }
}

impl PowHasher for DatasetPowHasher {
    fn pow_hash(&mut self, input: &[u8], nonce: u64) -> [u8; 32] {
        let mut state = keccak256_concat(&[input, &nonce.to_be_bytes()]);

        for _ in 0..MIX_ROUNDS {
            let offset = (u64::from_be_bytes(state[..8].try_into().unwrap()) as usize)
                % (SCRATCHPAD_BYTES - 32);
            state = keccak256_concat(&[&state, &self.scratchpad[offset..offset + 32]]);
        }

        state
    }
}

/// Convert a difficulty into a comparison target: `(2^256 - 1) / difficulty`.
///
/// A zero difficulty is treated as one (the easiest possible target) so the
/// division is always defined.
pub fn target_from_difficulty(difficulty: U256) -> U256 {
    if difficulty.is_zero() {
        U256::MAX
    } else {
        U256::MAX / difficulty
    }
}

/// Big-endian comparison of a PoW hash against a target.
pub fn hash_meets_target(hash: &[u8; 32], target: &U256) -> bool {
    U256::from_big_endian(hash) <= *target
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_hash() {
        let mut a = DatasetPowHasher::new(&[7u8; 32]);
        let mut b = DatasetPowHasher::new(&[7u8; 32]);
        assert_eq!(a.pow_hash(b"input", 42), b.pow_hash(b"input", 42));
    }

    #[test]
    fn different_nonce_different_hash() {
        let mut hasher = DatasetPowHasher::new(&[7u8; 32]);
        assert_ne!(hasher.pow_hash(b"input", 1), hasher.pow_hash(b"input", 2));
    }

    #[test]
    fn different_seed_different_hash() {
        let mut a = DatasetPowHasher::new(&[1u8; 32]);
        let mut b = DatasetPowHasher::new(&[2u8; 32]);
        assert_ne!(a.pow_hash(b"input", 42), b.pow_hash(b"input", 42));
    }

    #[test]
    fn target_is_inverse_of_difficulty() {
        assert_eq!(target_from_difficulty(U256::one()), U256::MAX);
        assert_eq!(target_from_difficulty(U256::from(2)), U256::MAX / 2);
        // Zero difficulty must not divide by zero.
        assert_eq!(target_from_difficulty(U256::zero()), U256::MAX);
    }

    #[test]
    fn hash_comparison_is_big_endian() {
        let mut low = [0u8; 32];
        low[31] = 1;
        let mut high = [0u8; 32];
        high[0] = 1;

        let target = U256::from(1) << 200;
        assert!(hash_meets_target(&low, &target));
        assert!(!hash_meets_target(&high, &target));
    }
}
