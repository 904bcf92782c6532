//! # Primitives
//!
//! The three scalar types everything else is built from, their sentinel
//! values, and the two consensus key-derivation rules.

use shared_crypto::keccak256_concat;

/// A 32-byte keccak-256 hash.
pub type Hash = [u8; 32];

/// A 20-byte account address.
pub type Address = [u8; 20];

/// An unsigned 256-bit amount in the smallest unit.
pub type Wei = primitive_types::U256;

/// A recoverable ECDSA signature, `r‖s‖v`.
pub type RecoverableSignature = [u8; 65];

/// The all-zero hash.
pub const ZERO_HASH: Hash = [0u8; 32];

/// The zero address. Transfers to it burn the token instead of crediting.
pub const ZERO_ADDRESS: Address = [0u8; 20];

/// Sentinel address of the native token: `0x0000…0001`.
pub const NATIVE_TOKEN_ADDRESS: Address = [
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1,
];

/// The all-zero signature used in unsigned header templates.
pub const ZERO_SIGNATURE: RecoverableSignature = [0u8; 65];

/// Balance sub-trie key: `keccak256(address ‖ token_address)`.
///
/// A single trie holds the balances of every (account, token) pair.
pub fn balance_key(address: &Address, token_address: &Address) -> Hash {
    keccak256_concat(&[address, token_address])
}

/// Deterministic token address for a governance-created token:
/// trailing 20 bytes of `keccak256(creator ‖ creator_nonce)`.
pub fn derive_token_address(creator: &Address, nonce: u64) -> Address {
    let digest = keccak256_concat(&[creator, &nonce.to_be_bytes()]);
    let mut address = [0u8; 20];
    address.copy_from_slice(&digest[12..]);
    address
}

/// Abbreviated hex rendering for logs: `0x` plus the first four bytes.
pub fn short_hex(bytes: &[u8]) -> String {
    let head = &bytes[..bytes.len().min(4)];
    format!("0x{}", hex::encode(head))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn balance_key_separates_tokens() {
        let account = [1u8; 20];
        assert_ne!(
            balance_key(&account, &NATIVE_TOKEN_ADDRESS),
            balance_key(&account, &[9u8; 20]),
        );
    }

    #[test]
    fn derived_token_address_is_deterministic() {
        let creator = [5u8; 20];
        assert_eq!(
            derive_token_address(&creator, 3),
            derive_token_address(&creator, 3),
        );
        assert_ne!(
            derive_token_address(&creator, 3),
            derive_token_address(&creator, 4),
        );
    }

    #[test]
    fn sentinels_are_distinct() {
        assert_ne!(ZERO_ADDRESS, NATIVE_TOKEN_ADDRESS);
    }
}
