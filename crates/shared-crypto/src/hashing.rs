//! # Keccak-256 Hashing
//!
//! Every consensus-facing hash in the node is keccak-256: transaction and
//! block hashes, trie node hashes, balance keys and derived token addresses.

use sha3::{Digest, Keccak256};

/// Compute the keccak-256 hash of a byte slice.
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Compute the keccak-256 hash of several concatenated byte slices
/// without building an intermediate buffer.
pub fn keccak256_concat(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_matches_known_vector() {
        // keccak256("") is a fixed constant of the algorithm.
        let expected =
            hex::decode("c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470")
                .unwrap();
        assert_eq!(keccak256(&[]).to_vec(), expected);
    }

    #[test]
    fn concat_equals_single_buffer() {
        let a = b"hello ";
        let b = b"world";
        let mut joined = Vec::new();
        joined.extend_from_slice(a);
        joined.extend_from_slice(b);
        assert_eq!(keccak256_concat(&[a, b]), keccak256(&joined));
    }
}
