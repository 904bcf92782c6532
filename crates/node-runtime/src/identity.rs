//! # Node Identity
//!
//! The node's secp256k1 keypair, used for the peer handshake and for
//! signing mined block headers (the coinbase must be the signer). The key
//! is persisted hex-encoded under the data directory and generated on first
//! start.

use anyhow::Context;
use shared_crypto::KeyPair;
use shared_types::Address;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

const KEY_FILE: &str = "identity.key";

/// Owns the node keypair.
pub struct IdentityService {
    keypair: Arc<KeyPair>,
}

impl IdentityService {
    /// Load the key from `data_dir`, generating and persisting one when
    /// absent.
    pub fn load_or_generate(data_dir: &Path) -> anyhow::Result<Self> {
        let path = data_dir.join(KEY_FILE);
        let keypair = if path.exists() {
            Self::read_key(&path)?
        } else {
            let keypair = KeyPair::generate();
            Self::write_key(&path, &keypair)?;
            info!(path = %path.display(), "generated new node identity");
            keypair
        };

        info!(
            address = %shared_types::short_hex(&keypair.address()),
            "node identity loaded"
        );
        Ok(Self {
            keypair: Arc::new(keypair),
        })
    }

    fn read_key(path: &PathBuf) -> anyhow::Result<KeyPair> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading identity key {}", path.display()))?;
        let bytes = hex::decode(raw.trim()).context("identity key is not hex")?;
        let secret: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| anyhow::anyhow!("identity key must be 32 bytes"))?;
        KeyPair::from_secret_bytes(&secret).map_err(|e| anyhow::anyhow!("invalid secret key: {e}"))
    }

    fn write_key(path: &PathBuf, keypair: &KeyPair) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, hex::encode(keypair.secret_bytes()))?;
        Ok(())
    }

    pub fn keypair(&self) -> Arc<KeyPair> {
        self.keypair.clone()
    }

    pub fn address(&self) -> Address {
        self.keypair.address()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_persists_across_loads() {
        let dir = tempfile::tempdir().unwrap();

        let first = IdentityService::load_or_generate(dir.path()).unwrap();
        let second = IdentityService::load_or_generate(dir.path()).unwrap();
        assert_eq!(first.address(), second.address());
    }

    #[test]
    fn corrupt_key_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(KEY_FILE), "not-hex!").unwrap();
        assert!(IdentityService::load_or_generate(dir.path()).is_err());
    }
}
