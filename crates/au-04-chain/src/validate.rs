//! # Block Validation
//!
//! Stateless checks (signature recovery, structural limits) and the
//! header-context checks performed against the parent. Stateful execution
//! and the state-root comparison live in ingestion.

use crate::errors::ChainError;
use rayon::prelude::*;
use shared_crypto::{hash_meets_target, merkle_root, recover_address, target_from_difficulty, PowHasher};
use shared_types::{Block, BlockHeader, NetworkSettings, StoredBlock};

/// How far into the future a header timestamp may run ahead of the local
/// receive time.
pub const MAX_TIMESTAMP_DRIFT_MS: u64 = 60_000;

/// Recover every transaction sender in parallel and apply the stateless
/// per-transaction checks. Returns the block with senders filled in.
pub fn recover_senders(block: Block, settings: &NetworkSettings) -> Result<Block, ChainError> {
    let Block { header, txs } = block;

    let txs = txs
        .into_par_iter()
        .map(|mut tx| {
            if tx.network != settings.network_id {
                return Err(ChainError::WrongNetwork(tx.hash()));
            }
            tx.sender = tx.recover_sender()?;
            Ok(tx)
        })
        .collect::<Result<Vec<_>, ChainError>>()?;

    Ok(Block { header, txs })
}

/// Header checks that need only the parent: linkage, height, timestamps.
pub fn validate_header_context(
    header: &BlockHeader,
    parent: &StoredBlock,
    received_at_ms: u64,
) -> Result<(), ChainError> {
    let expected_height = parent.height() + 1;
    if header.height != expected_height {
        return Err(ChainError::WrongHeight {
            expected: expected_height,
            got: header.height,
        });
    }

    let parent_ts = parent.block.header.timestamp_ms;
    if header.timestamp_ms <= parent_ts {
        return Err(ChainError::TimestampNotMonotonic {
            parent: parent_ts,
            got: header.timestamp_ms,
        });
    }

    let limit = received_at_ms.saturating_add(MAX_TIMESTAMP_DRIFT_MS);
    if header.timestamp_ms > limit {
        return Err(ChainError::TimestampTooFarInFuture {
            got: header.timestamp_ms,
            limit,
        });
    }

    Ok(())
}

/// The header's transaction root must commit to the block's transactions.
pub fn validate_tx_root(block: &Block) -> Result<(), ChainError> {
    let leaves: Vec<[u8; 32]> = block.txs.iter().map(|tx| tx.hash()).collect();
    if merkle_root(&leaves) != block.header.tx_root_hash {
        return Err(ChainError::TxRootMismatch);
    }
    Ok(())
}

/// The header must be signed by its coinbase.
pub fn validate_coinbase_signature(header: &BlockHeader) -> Result<(), ChainError> {
    let signer = recover_address(&header.hash(), &header.signature)?;
    if signer != header.coinbase {
        return Err(ChainError::BadCoinbaseSignature);
    }
    Ok(())
}

/// The PoW hash over the nonce-free header bytes must meet the target.
pub fn validate_pow(header: &BlockHeader, pow: &mut dyn PowHasher) -> Result<(), ChainError> {
    let target = target_from_difficulty(header.difficulty);
    let hash = pow.pow_hash(&header.pow_input(), header.nonce);
    if !hash_meets_target(&hash, &target) {
        return Err(ChainError::BadPow);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use primitive_types::U256;
    use shared_crypto::KeyPair;
    use shared_types::{ConnectedSource, Tx, Wei, NATIVE_TOKEN_ADDRESS, ZERO_HASH, ZERO_SIGNATURE};

    fn header(height: u64, ts: u64, previous: [u8; 32]) -> BlockHeader {
        BlockHeader {
            version: 1,
            height,
            timestamp_ms: ts,
            previous_hash: previous,
            difficulty: U256::one(),
            tx_root_hash: ZERO_HASH,
            state_root_hash: ZERO_HASH,
            coinbase: [0u8; 20],
            nonce: 0,
            signature: ZERO_SIGNATURE,
        }
    }

    fn parent_at(height: u64, ts: u64) -> StoredBlock {
        StoredBlock::new(
            Block {
                header: header(height, ts, ZERO_HASH),
                txs: Vec::new(),
            },
            U256::from(height),
            ConnectedSource::Sync,
            None,
            0,
            Vec::new(),
        )
    }

    #[test]
    fn header_context_accepts_direct_child() {
        let parent = parent_at(5, 1_000);
        let child = header(6, 2_000, parent.hash);
        validate_header_context(&child, &parent, 2_000).unwrap();
    }

    #[test]
    fn header_context_rejects_bad_height_and_timestamps() {
        let parent = parent_at(5, 1_000);

        let wrong_height = header(7, 2_000, parent.hash);
        assert!(matches!(
            validate_header_context(&wrong_height, &parent, 2_000),
            Err(ChainError::WrongHeight { expected: 6, got: 7 })
        ));

        let stale = header(6, 1_000, parent.hash);
        assert!(matches!(
            validate_header_context(&stale, &parent, 2_000),
            Err(ChainError::TimestampNotMonotonic { .. })
        ));

        let future = header(6, 2_000 + MAX_TIMESTAMP_DRIFT_MS + 1, parent.hash);
        assert!(matches!(
            validate_header_context(&future, &parent, 2_000),
            Err(ChainError::TimestampTooFarInFuture { .. })
        ));
    }

    #[test]
    fn tx_root_must_match() {
        let mut tx = Tx::transfer_template(
            1,
            0,
            [1u8; 20],
            NATIVE_TOKEN_ADDRESS,
            Wei::from(5u64),
            Wei::one(),
        );
        tx.signature = [3u8; 65];
        let tx_hash = tx.hash();

        let mut block = Block {
            header: header(1, 2_000, ZERO_HASH),
            txs: vec![tx],
        };
        assert!(matches!(
            validate_tx_root(&block),
            Err(ChainError::TxRootMismatch)
        ));

        block.header.tx_root_hash = merkle_root(&[tx_hash]);
        validate_tx_root(&block).unwrap();
    }

    #[test]
    fn coinbase_signature_roundtrip() {
        let keypair = KeyPair::generate();
        let mut h = header(1, 2_000, ZERO_HASH);
        h.coinbase = keypair.address();
        h.signature = keypair.sign_recoverable(&h.hash()).unwrap();
        validate_coinbase_signature(&h).unwrap();

        let other = KeyPair::generate();
        h.signature = other.sign_recoverable(&h.hash()).unwrap();
        assert!(matches!(
            validate_coinbase_signature(&h),
            Err(ChainError::BadCoinbaseSignature)
        ));
    }

    #[test]
    fn sender_recovery_fills_in_addresses() {
        let keypair = KeyPair::generate();
        let settings = NetworkSettings::devnet([1u8; 20]);

        let mut tx = Tx::transfer_template(
            settings.network_id,
            0,
            [2u8; 20],
            NATIVE_TOKEN_ADDRESS,
            Wei::from(5u64),
            Wei::one(),
        );
        tx.signature = keypair.sign_recoverable(&tx.signing_hash()).unwrap();

        let block = Block {
            header: header(1, 2_000, ZERO_HASH),
            txs: vec![tx],
        };
        let recovered = recover_senders(block, &settings).unwrap();
        assert_eq!(recovered.txs[0].sender, keypair.address());
    }

    #[test]
    fn wrong_network_is_rejected() {
        let settings = NetworkSettings::devnet([1u8; 20]);
        let mut tx = Tx::transfer_template(
            settings.network_id + 1,
            0,
            [2u8; 20],
            NATIVE_TOKEN_ADDRESS,
            Wei::from(5u64),
            Wei::one(),
        );
        tx.signature = [7u8; 65];

        let block = Block {
            header: header(1, 2_000, ZERO_HASH),
            txs: vec![tx],
        };
        assert!(matches!(
            recover_senders(block, &settings),
            Err(ChainError::WrongNetwork(_))
        ));
    }
}
