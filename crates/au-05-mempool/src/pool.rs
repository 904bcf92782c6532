//! # Transaction Pool
//!
//! Priority queue with per-sender nonce chains. Internally synchronized:
//! many readers during template assembly, exclusive writer on mutation.

use crate::errors::MempoolError;
use parking_lot::RwLock;
use shared_bus::BlockConnectedEvent;
use shared_types::{Address, Hash, Tx, Wei};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::debug;

/// Head-state view the pool validates against.
pub trait MempoolStateView: Send + Sync {
    /// Last used nonce of an account on the canonical head (-1 for none).
    fn account_nonce(&self, address: &Address) -> i64;

    /// Fee floor for a transaction of `size` encoded bytes.
    fn required_fee(&self, size: usize) -> Wei;
}

/// Pool limits.
#[derive(Debug, Clone)]
pub struct MempoolConfig {
    pub max_transactions: usize,
    pub max_per_sender: usize,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        Self {
            max_transactions: 5_000,
            max_per_sender: 64,
        }
    }
}

/// A pooled transaction with its cached ordering data.
#[derive(Debug, Clone)]
struct MempoolEntry {
    tx: Tx,
    size: u32,
    fee_per_byte: Wei,
    received_at_ms: u64,
}

/// Ordering key for the price index: ascending fee-per-byte, older first on
/// ties, hash as the final tie break. Iterated in reverse for selection.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct PricedTx {
    fee_per_byte: Wei,
    /// Inverted so that, within one price, older transactions sort HIGHER
    /// and win selection when iterating in reverse.
    age_rank: u64,
    tx_hash: Hash,
}

struct PoolInner {
    by_hash: HashMap<Hash, MempoolEntry>,
    by_price: BTreeSet<PricedTx>,
    by_sender: HashMap<Address, BTreeMap<u64, Hash>>,
}

impl PoolInner {
    fn insert(&mut self, entry: MempoolEntry) {
        let tx_hash = entry.tx.hash();
        self.by_price.insert(PricedTx {
            fee_per_byte: entry.fee_per_byte,
            age_rank: u64::MAX - entry.received_at_ms,
            tx_hash,
        });
        self.by_sender
            .entry(entry.tx.sender)
            .or_default()
            .insert(entry.tx.nonce, tx_hash);
        self.by_hash.insert(tx_hash, entry);
    }

    fn remove(&mut self, tx_hash: &Hash) -> Option<MempoolEntry> {
        let entry = self.by_hash.remove(tx_hash)?;
        self.by_price.remove(&PricedTx {
            fee_per_byte: entry.fee_per_byte,
            age_rank: u64::MAX - entry.received_at_ms,
            tx_hash: *tx_hash,
        });
        if let Some(chain) = self.by_sender.get_mut(&entry.tx.sender) {
            chain.remove(&entry.tx.nonce);
            if chain.is_empty() {
                self.by_sender.remove(&entry.tx.sender);
            }
        }
        Some(entry)
    }

    fn cheapest(&self) -> Option<&PricedTx> {
        self.by_price.iter().next()
    }
}

/// The shared mempool.
pub struct Mempool {
    inner: RwLock<PoolInner>,
    state: std::sync::Arc<dyn MempoolStateView>,
    config: MempoolConfig,
    network_id: u32,
}

impl Mempool {
    pub fn new(
        state: std::sync::Arc<dyn MempoolStateView>,
        config: MempoolConfig,
        network_id: u32,
    ) -> Self {
        Self {
            inner: RwLock::new(PoolInner {
                by_hash: HashMap::new(),
                by_price: BTreeSet::new(),
                by_sender: HashMap::new(),
            }),
            state,
            config,
            network_id,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().by_hash.is_empty()
    }

    pub fn contains(&self, tx_hash: &Hash) -> bool {
        self.inner.read().by_hash.contains_key(tx_hash)
    }

    pub fn get(&self, tx_hash: &Hash) -> Option<Tx> {
        self.inner.read().by_hash.get(tx_hash).map(|e| e.tx.clone())
    }

    pub fn hashes(&self) -> Vec<Hash> {
        self.inner.read().by_hash.keys().copied().collect()
    }

    pub fn get_many(&self, hashes: &[Hash]) -> Vec<Tx> {
        let inner = self.inner.read();
        hashes
            .iter()
            .filter_map(|h| inner.by_hash.get(h).map(|e| e.tx.clone()))
            .collect()
    }

    /// Decode, recover and admit a raw transaction from the wire or API.
    pub fn submit(&self, raw: &[u8], received_at_ms: u64) -> Result<Hash, MempoolError> {
        let mut tx = Tx::decode(raw)?;
        tx.sender = tx.recover_sender().map_err(|_| MempoolError::BadSignature)?;
        self.add(tx, received_at_ms)
    }

    /// Admit a transaction whose sender is already recovered.
    pub fn add(&self, tx: Tx, received_at_ms: u64) -> Result<Hash, MempoolError> {
        if tx.network != self.network_id {
            return Err(MempoolError::WrongNetwork);
        }

        let tx_hash = tx.hash();
        let size = tx.encoded_size();

        let required = self.state.required_fee(size);
        if tx.fee < required {
            return Err(MempoolError::FeeTooLow {
                required,
                got: tx.fee,
            });
        }

        let mut inner = self.inner.write();

        if inner.by_hash.contains_key(&tx_hash) {
            return Err(MempoolError::Duplicate(tx_hash));
        }

        // The next admissible nonce continues the head state through every
        // transaction this sender already has pending.
        let pending = inner
            .by_sender
            .get(&tx.sender)
            .map(|chain| chain.len())
            .unwrap_or(0);
        if pending >= self.config.max_per_sender {
            return Err(MempoolError::SenderLimit(self.config.max_per_sender));
        }
        let state_nonce = self.state.account_nonce(&tx.sender);
        let expected = (state_nonce + 1) as u64 + pending as u64;
        if tx.nonce != expected {
            return Err(MempoolError::NonceMismatch {
                expected,
                got: tx.nonce,
            });
        }

        // Scaled to micro-wei per byte so small fees still order.
        let fee_per_byte = tx
            .fee
            .checked_mul(Wei::from(1_000_000u64))
            .unwrap_or(Wei::MAX)
            / Wei::from(size.max(1));

        if inner.by_hash.len() >= self.config.max_transactions {
            // Evict the cheapest entry if the newcomer beats it.
            let Some(cheapest) = inner.cheapest().cloned() else {
                return Err(MempoolError::PoolFull);
            };
            if cheapest.fee_per_byte >= fee_per_byte {
                return Err(MempoolError::PoolFull);
            }
            inner.remove(&cheapest.tx_hash);
        }

        debug!(
            tx = %shared_types::short_hex(&tx_hash),
            nonce = tx.nonce,
            "transaction admitted to mempool"
        );
        inner.insert(MempoolEntry {
            tx,
            size: size as u32,
            fee_per_byte,
            received_at_ms,
        });
        Ok(tx_hash)
    }

    /// Transactions for a block template: fee-per-byte descending while
    /// respecting per-sender nonce order, bounded by a total byte budget.
    pub fn txs_for_block(&self, max_total_bytes: u64) -> Vec<Tx> {
        let inner = self.inner.read();
        let mut selected: Vec<Tx> = Vec::new();
        let mut selected_hashes: HashSet<Hash> = HashSet::new();
        let mut total_bytes = 0u64;

        loop {
            let mut picked = None;
            for priced in inner.by_price.iter().rev() {
                if selected_hashes.contains(&priced.tx_hash) {
                    continue;
                }
                let entry = &inner.by_hash[&priced.tx_hash];

                // Only the sender's lowest unselected nonce is eligible.
                let next_for_sender = inner.by_sender[&entry.tx.sender]
                    .values()
                    .find(|h| !selected_hashes.contains(*h));
                if next_for_sender != Some(&priced.tx_hash) {
                    continue;
                }

                if total_bytes + u64::from(entry.size) > max_total_bytes {
                    continue;
                }
                picked = Some((priced.tx_hash, entry.tx.clone(), entry.size));
                break;
            }

            let Some((tx_hash, tx, size)) = picked else {
                break;
            };
            selected_hashes.insert(tx_hash);
            total_bytes += u64::from(size);
            selected.push(tx);
        }

        selected
    }

    /// Drop the given transactions (template assembly found them invalid).
    pub fn remove_all(&self, hashes: &[Hash]) {
        let mut inner = self.inner.write();
        for tx_hash in hashes {
            inner.remove(tx_hash);
        }
    }

    /// Eviction on block connect: remove included transactions and any
    /// whose nonce the new state has already consumed.
    pub fn on_block_connected(&self, event: &BlockConnectedEvent) {
        let mut inner = self.inner.write();

        for tx_hash in &event.block.tx_hashes {
            inner.remove(tx_hash);
        }

        for change in &event.diff.nonces {
            let stale: Vec<Hash> = inner
                .by_sender
                .get(&change.address)
                .map(|chain| {
                    chain
                        .iter()
                        .filter(|(nonce, _)| (**nonce as i64) <= change.current)
                        .map(|(_, h)| *h)
                        .collect()
                })
                .unwrap_or_default();
            for tx_hash in stale {
                inner.remove(&tx_hash);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use shared_types::{NATIVE_TOKEN_ADDRESS, ZERO_ADDRESS};
    use std::sync::Arc;

    /// Stub head state: programmable nonces, fixed base fee of 1.
    #[derive(Default)]
    struct StubState {
        nonces: Mutex<HashMap<Address, i64>>,
    }

    impl StubState {
        fn set_nonce(&self, address: Address, nonce: i64) {
            self.nonces.lock().insert(address, nonce);
        }
    }

    impl MempoolStateView for StubState {
        fn account_nonce(&self, address: &Address) -> i64 {
            self.nonces.lock().get(address).copied().unwrap_or(-1)
        }

        fn required_fee(&self, _size: usize) -> Wei {
            Wei::one()
        }
    }

    fn pool() -> (Mempool, Arc<StubState>) {
        let state = Arc::new(StubState::default());
        (
            Mempool::new(state.clone(), MempoolConfig::default(), 1),
            state,
        )
    }

    fn tx(sender: Address, nonce: u64, fee: u64) -> Tx {
        let mut tx = Tx::transfer_template(
            1,
            nonce,
            [0xBB; 20],
            NATIVE_TOKEN_ADDRESS,
            Wei::from(10u64),
            Wei::from(fee),
        );
        tx.sender = sender;
        // Unique signatures keep hashes distinct across senders/fees.
        tx.signature[0] = sender[0];
        tx.signature[1] = nonce as u8;
        tx.signature[2] = fee as u8;
        tx
    }

    const A: Address = [0xA1; 20];
    const B: Address = [0xB2; 20];

    #[test]
    fn admits_sequential_nonces() {
        let (pool, _) = pool();
        pool.add(tx(A, 0, 10), 1).unwrap();
        pool.add(tx(A, 1, 10), 2).unwrap();
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn rejects_nonce_gap_and_duplicate() {
        let (pool, state) = pool();
        state.set_nonce(A, 4);

        let err = pool.add(tx(A, 6, 10), 1).unwrap_err();
        assert!(matches!(
            err,
            MempoolError::NonceMismatch {
                expected: 5,
                got: 6
            }
        ));

        pool.add(tx(A, 5, 10), 1).unwrap();
        let err = pool.add(tx(A, 5, 10), 2).unwrap_err();
        assert!(matches!(err, MempoolError::Duplicate(_)));
    }

    #[test]
    fn rejects_fee_below_floor() {
        let (pool, _) = pool();
        let err = pool.add(tx(A, 0, 0), 1).unwrap_err();
        assert!(matches!(err, MempoolError::FeeTooLow { .. }));
    }

    #[test]
    fn rejects_wrong_network() {
        let (pool, _) = pool();
        let mut t = tx(A, 0, 10);
        t.network = 99;
        assert!(matches!(
            pool.add(t, 1).unwrap_err(),
            MempoolError::WrongNetwork
        ));
    }

    #[test]
    fn selection_is_fee_ordered_with_nonce_chains() {
        let (pool, _) = pool();
        // B pays more than A, but A's nonce-0 must precede A's nonce-1.
        pool.add(tx(A, 0, 5), 1).unwrap();
        pool.add(tx(A, 1, 50), 2).unwrap();
        pool.add(tx(B, 0, 20), 3).unwrap();

        let selected = pool.txs_for_block(1_000_000);
        let order: Vec<(Address, u64)> =
            selected.iter().map(|t| (t.sender, t.nonce)).collect();

        // B0 (20/byte-ish) first, then A0 unlocks A1.
        assert_eq!(order[0], (B, 0));
        assert_eq!(order[1], (A, 0));
        assert_eq!(order[2], (A, 1));
    }

    #[test]
    fn selection_respects_byte_budget() {
        let (pool, _) = pool();
        pool.add(tx(A, 0, 10), 1).unwrap();
        pool.add(tx(B, 0, 5), 2).unwrap();

        let one_tx_bytes = tx(A, 0, 10).encoded_size() as u64;
        let selected = pool.txs_for_block(one_tx_bytes);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].sender, A);
    }

    #[test]
    fn full_pool_evicts_cheapest_for_better_fee() {
        let state = Arc::new(StubState::default());
        let config = MempoolConfig {
            max_transactions: 2,
            max_per_sender: 64,
        };
        let pool = Mempool::new(state, config, 1);

        pool.add(tx(A, 0, 2), 1).unwrap();
        pool.add(tx(B, 0, 3), 2).unwrap();

        // A cheap newcomer is refused.
        let c: Address = [0xC3; 20];
        assert!(matches!(
            pool.add(tx(c, 0, 2), 3).unwrap_err(),
            MempoolError::PoolFull
        ));

        // A richer one evicts the cheapest (A's).
        pool.add(tx(c, 0, 40), 4).unwrap();
        assert_eq!(pool.len(), 2);
        assert!(!pool.contains(&tx(A, 0, 2).hash()));
    }

    #[test]
    fn sender_cap_is_enforced() {
        let state = Arc::new(StubState::default());
        let config = MempoolConfig {
            max_transactions: 100,
            max_per_sender: 2,
        };
        let pool = Mempool::new(state, config, 1);

        pool.add(tx(A, 0, 10), 1).unwrap();
        pool.add(tx(A, 1, 10), 2).unwrap();
        assert!(matches!(
            pool.add(tx(A, 2, 10), 3).unwrap_err(),
            MempoolError::SenderLimit(2)
        ));
    }

    #[test]
    fn block_connect_evicts_included_and_stale() {
        use shared_bus::BlockConnectedEvent;
        use shared_types::{
            Block, BlockHeader, ConnectedSource, NonceChange, StateDiff, StoredBlock,
            ZERO_HASH, ZERO_SIGNATURE,
        };

        let (pool, _) = pool();
        let included = tx(A, 0, 10);
        let included_hash = included.hash();
        pool.add(included.clone(), 1).unwrap();
        pool.add(tx(A, 1, 10), 2).unwrap();
        pool.add(tx(B, 0, 10), 3).unwrap();

        // The connected block includes A0 and (per its diff) consumed A1
        // from a competing transaction.
        let stored = StoredBlock::new(
            Block {
                header: BlockHeader {
                    version: 1,
                    height: 1,
                    timestamp_ms: 1,
                    previous_hash: ZERO_HASH,
                    difficulty: Default::default(),
                    tx_root_hash: ZERO_HASH,
                    state_root_hash: ZERO_HASH,
                    coinbase: ZERO_ADDRESS,
                    nonce: 0,
                    signature: ZERO_SIGNATURE,
                },
                txs: vec![included],
            },
            Default::default(),
            ConnectedSource::Propagated,
            None,
            0,
            Vec::new(),
        );

        let event = BlockConnectedEvent {
            source: ConnectedSource::Propagated,
            block: Arc::new(stored),
            diff: StateDiff {
                nonces: vec![NonceChange {
                    address: A,
                    previous: -1,
                    current: 1,
                }],
                ..Default::default()
            },
            total_fees: Wei::zero(),
            actual_reward_paid: Wei::zero(),
            cumulative_difficulty: Default::default(),
            burn_outcomes: Default::default(),
            received_from: None,
            received_at_ms: 0,
        };

        pool.on_block_connected(&event);

        assert!(!pool.contains(&included_hash));
        // A1 was stale (state nonce is now 1), B0 survives.
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.hashes(), vec![tx(B, 0, 10).hash()]);
    }
}
