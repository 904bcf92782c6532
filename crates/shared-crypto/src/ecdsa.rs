//! # Recoverable ECDSA (secp256k1)
//!
//! Transactions and block headers carry a 65-byte `r‖s‖v` signature. The
//! signer's 20-byte address is never transmitted; it is recovered from the
//! signature over the signing hash, Ethereum-style: the address is the last
//! 20 bytes of keccak-256 of the uncompressed public key.
//!
//! Signing uses RFC 6979 deterministic nonces, so no RNG is involved after
//! key generation.

use crate::errors::CryptoError;
use crate::hashing::keccak256;
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;

/// Length of a recoverable signature: 64 bytes `r‖s` plus one recovery byte.
pub const SIGNATURE_LEN: usize = 65;

/// A secp256k1 keypair used for transaction and block signing.
pub struct KeyPair {
    signing_key: SigningKey,
}

impl KeyPair {
    /// Generate a random keypair.
    pub fn generate() -> Self {
        let signing_key = SigningKey::random(&mut rand::thread_rng());
        Self { signing_key }
    }

    /// Create from secret key bytes (32 bytes).
    pub fn from_secret_bytes(bytes: &[u8; 32]) -> Result<Self, CryptoError> {
        let signing_key =
            SigningKey::from_bytes(bytes.into()).map_err(|_| CryptoError::InvalidPrivateKey)?;
        Ok(Self { signing_key })
    }

    /// Raw secret key bytes.
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes().into()
    }

    /// The 20-byte address of this keypair.
    pub fn address(&self) -> [u8; 20] {
        address_of(self.signing_key.verifying_key())
    }

    /// Sign a 32-byte prehash, returning a recoverable `r‖s‖v` signature.
    pub fn sign_recoverable(&self, prehash: &[u8; 32]) -> Result<[u8; 65], CryptoError> {
        let (signature, recovery_id) = self
            .signing_key
            .sign_prehash_recoverable(prehash)
            .map_err(|_| CryptoError::SigningFailed)?;

        let mut out = [0u8; 65];
        out[..64].copy_from_slice(&signature.to_bytes());
        out[64] = recovery_id.to_byte();
        Ok(out)
    }
}

/// Recover the signer's address from a recoverable signature over `prehash`.
pub fn recover_address(prehash: &[u8; 32], signature: &[u8; 65]) -> Result<[u8; 20], CryptoError> {
    let recovery_id =
        RecoveryId::from_byte(signature[64]).ok_or(CryptoError::InvalidRecoveryId(signature[64]))?;

    let signature =
        Signature::from_slice(&signature[..64]).map_err(|_| CryptoError::InvalidSignature)?;

    let verifying_key = VerifyingKey::recover_from_prehash(prehash, &signature, recovery_id)
        .map_err(|_| CryptoError::RecoveryFailed)?;

    Ok(address_of(&verifying_key))
}

/// Derive an address from a verifying key: keccak-256 of the uncompressed
/// point without the 0x04 prefix, keeping the trailing 20 bytes.
fn address_of(key: &VerifyingKey) -> [u8; 20] {
    let point = key.to_encoded_point(false);
    let digest = keccak256(&point.as_bytes()[1..]);
    let mut address = [0u8; 20];
    address.copy_from_slice(&digest[12..]);
    address
}
