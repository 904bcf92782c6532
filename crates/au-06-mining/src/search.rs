//! # Nonce Search
//!
//! Parallel proof-of-work search. The nonce space `[0, 2^63)` is split into
//! one contiguous chunk per worker; each worker owns its hash instance and
//! polls the shared found/cancel flags every 4096 attempts.

use primitive_types::U256;
use shared_crypto::{hash_meets_target, DatasetPowHasher, PowHasher};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::debug;

/// Upper bound of the searched nonce space.
const NONCE_SPACE_END: u64 = 1 << 63;

/// Attempts between flag polls.
const POLL_INTERVAL: u64 = 4_096;

/// A reusable pool of per-worker hash instances. Construction is the
/// expensive part (each worker seeds its own dataset), so the searcher
/// lives as long as the mining controller.
pub struct NonceSearcher {
    workers: Vec<DatasetPowHasher>,
}

impl NonceSearcher {
    pub fn new(seed: &[u8; 32], threads: usize) -> Self {
        let threads = threads.max(1);
        let workers = (0..threads).map(|_| DatasetPowHasher::new(seed)).collect();
        Self { workers }
    }

    pub fn threads(&self) -> usize {
        self.workers.len()
    }

    /// Search for a nonce whose PoW hash meets `target`. Returns `None`
    /// when cancelled or when the space is exhausted.
    pub fn search(
        &mut self,
        pow_input: &[u8],
        target: U256,
        cancel: &AtomicBool,
    ) -> Option<u64> {
        let found = AtomicBool::new(false);
        let solution = AtomicU64::new(u64::MAX);
        let chunk = NONCE_SPACE_END / self.workers.len() as u64;

        std::thread::scope(|scope| {
            for (index, worker) in self.workers.iter_mut().enumerate() {
                let start = index as u64 * chunk;
                let end = start + chunk;
                let found = &found;
                let solution = &solution;
                scope.spawn(move || {
                    search_chunk(worker, pow_input, &target, start, end, cancel, found, solution);
                });
            }
        });

        if found.load(Ordering::Acquire) {
            let nonce = solution.load(Ordering::Acquire);
            debug!(nonce, "proof-of-work solved");
            Some(nonce)
        } else {
            None
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn search_chunk(
    worker: &mut DatasetPowHasher,
    pow_input: &[u8],
    target: &U256,
    start: u64,
    end: u64,
    cancel: &AtomicBool,
    found: &AtomicBool,
    solution: &AtomicU64,
) {
    let mut nonce = start;
    while nonce < end {
        if (nonce - start) % POLL_INTERVAL == 0
            && (cancel.load(Ordering::Relaxed) || found.load(Ordering::Relaxed))
        {
            return;
        }

        let hash = worker.pow_hash(pow_input, nonce);
        if hash_meets_target(&hash, target) {
            solution.store(nonce, Ordering::Release);
            found.store(true, Ordering::Release);
            return;
        }
        nonce += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_crypto::target_from_difficulty;

    #[test]
    fn trivial_target_is_solved_immediately() {
        let mut searcher = NonceSearcher::new(&[1u8; 32], 2);
        let cancel = AtomicBool::new(false);

        // Difficulty one accepts every hash.
        let target = target_from_difficulty(U256::one());
        let nonce = searcher.search(b"input", target, &cancel).unwrap();

        let mut check = DatasetPowHasher::new(&[1u8; 32]);
        let hash = check.pow_hash(b"input", nonce);
        assert!(hash_meets_target(&hash, &target));
    }

    #[test]
    fn moderate_target_verifies() {
        let mut searcher = NonceSearcher::new(&[2u8; 32], 2);
        let cancel = AtomicBool::new(false);

        // Roughly 1 in 64 hashes qualifies.
        let target = target_from_difficulty(U256::from(64u64));
        let nonce = searcher.search(b"header-bytes", target, &cancel).unwrap();

        let mut check = DatasetPowHasher::new(&[2u8; 32]);
        assert!(hash_meets_target(
            &check.pow_hash(b"header-bytes", nonce),
            &target
        ));
    }

    #[test]
    fn pre_cancelled_search_returns_none() {
        let mut searcher = NonceSearcher::new(&[3u8; 32], 2);
        let cancel = AtomicBool::new(true);

        // An (effectively) impossible target, so only cancellation can end
        // the search promptly.
        let target = U256::zero();
        assert_eq!(searcher.search(b"input", target, &cancel), None);
    }
}
