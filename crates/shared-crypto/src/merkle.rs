//! # Transaction Merkle Root
//!
//! Binary Merkle tree over transaction hashes. Pairs are combined with
//! keccak-256; an odd node at any level is paired with itself. The root of
//! an empty list is the all-zero hash, matching the tx-root of an empty
//! block.

use crate::hashing::keccak256_concat;

/// Compute the Merkle root of an ordered list of 32-byte leaves.
pub fn merkle_root(leaves: &[[u8; 32]]) -> [u8; 32] {
    if leaves.is_empty() {
        return [0u8; 32];
    }

    let mut level: Vec<[u8; 32]> = leaves.to_vec();

    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        for pair in level.chunks(2) {
            let right = pair.get(1).unwrap_or(&pair[0]);
            next.push(keccak256_concat(&[&pair[0], right]));
        }
        level = next;
    }

    level[0]
}
