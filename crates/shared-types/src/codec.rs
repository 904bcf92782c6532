//! # Versioned State-Value Codec
//!
//! The byte encoding of every value stored in the state tries. The state
//! root is a hash over these bytes, so the encoding is fixed: big-endian
//! fixed-width scalars, length-prefixed variable fields, one leading version
//! byte per value so future fields can be appended without breaking historic
//! roots.

use crate::entities::{
    AddressAliasState, AuthorityState, BalanceState, BipPayload, BipState, BipStatus,
    NetworkParamsState, NonceState, TokenState,
};
use crate::errors::CodecError;
use crate::primitives::{Address, Hash, Wei};
use std::collections::BTreeMap;

// =============================================================================
// WRITER / READER
// =============================================================================

/// Append-only encoder.
#[derive(Default)]
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_u64(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_i64(&mut self, value: i64) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_bool(&mut self, value: bool) {
        self.write_u8(u8::from(value));
    }

    pub fn write_fixed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn write_var_bytes(&mut self, bytes: &[u8]) {
        self.write_u32(bytes.len() as u32);
        self.buf.extend_from_slice(bytes);
    }

    pub fn write_string(&mut self, value: &str) {
        self.write_var_bytes(value.as_bytes());
    }

    /// Variable-length big integer: one length byte plus minimal big-endian
    /// magnitude. Zero encodes as a bare zero length.
    pub fn write_wei(&mut self, value: &Wei) {
        if value.is_zero() {
            self.write_u8(0);
            return;
        }
        let mut raw = [0u8; 32];
        value.to_big_endian(&mut raw);
        let start = raw.iter().position(|&b| b != 0).unwrap_or(31);
        self.write_u8((32 - start) as u8);
        self.buf.extend_from_slice(&raw[start..]);
    }

    pub fn write_opt<T, F>(&mut self, value: Option<&T>, f: F)
    where
        F: FnOnce(&mut Self, &T),
    {
        match value {
            None => self.write_u8(0),
            Some(v) => {
                self.write_u8(1);
                f(self, v);
            }
        }
    }
}

/// Sequential decoder.
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        let end = self.pos.checked_add(len).ok_or(CodecError::LengthOverflow)?;
        if end > self.data.len() {
            return Err(CodecError::UnexpectedEof);
        }
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, CodecError> {
        Ok(u16::from_be_bytes(self.take(2)?.try_into().unwrap()))
    }

    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        Ok(u32::from_be_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub fn read_u64(&mut self) -> Result<u64, CodecError> {
        Ok(u64::from_be_bytes(self.take(8)?.try_into().unwrap()))
    }

    pub fn read_i64(&mut self) -> Result<i64, CodecError> {
        Ok(i64::from_be_bytes(self.take(8)?.try_into().unwrap()))
    }

    pub fn read_bool(&mut self) -> Result<bool, CodecError> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(CodecError::InvalidBool(other)),
        }
    }

    pub fn read_hash(&mut self) -> Result<Hash, CodecError> {
        Ok(self.take(32)?.try_into().unwrap())
    }

    pub fn read_address(&mut self) -> Result<Address, CodecError> {
        Ok(self.take(20)?.try_into().unwrap())
    }

    pub fn read_var_bytes(&mut self) -> Result<&'a [u8], CodecError> {
        let len = self.read_u32()? as usize;
        self.take(len)
    }

    pub fn read_string(&mut self) -> Result<String, CodecError> {
        let bytes = self.read_var_bytes()?;
        String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidUtf8)
    }

    pub fn read_wei(&mut self) -> Result<Wei, CodecError> {
        let len = self.read_u8()? as usize;
        if len > 32 {
            return Err(CodecError::LengthOverflow);
        }
        let bytes = self.take(len)?;
        Ok(Wei::from_big_endian(bytes))
    }

    pub fn read_opt<T, F>(&mut self, f: F) -> Result<Option<T>, CodecError>
    where
        F: FnOnce(&mut Self) -> Result<T, CodecError>,
    {
        match self.read_u8()? {
            0 => Ok(None),
            1 => Ok(Some(f(self)?)),
            other => Err(CodecError::InvalidBool(other)),
        }
    }

    pub fn expect_end(&self) -> Result<(), CodecError> {
        if self.pos != self.data.len() {
            return Err(CodecError::TrailingBytes);
        }
        Ok(())
    }
}

// =============================================================================
// STATE VALUE TRAIT
// =============================================================================

/// A value persisted in a state trie.
pub trait StateValue: Sized {
    const VERSION: u8;

    fn encode_body(&self, w: &mut ByteWriter);
    fn decode_body(r: &mut ByteReader<'_>) -> Result<Self, CodecError>;

    fn encode(&self) -> Vec<u8> {
        let mut w = ByteWriter::new();
        w.write_u8(Self::VERSION);
        self.encode_body(&mut w);
        w.into_bytes()
    }

    fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut r = ByteReader::new(bytes);
        let version = r.read_u8()?;
        if version != Self::VERSION {
            return Err(CodecError::UnsupportedVersion {
                found: version,
                newest: Self::VERSION,
            });
        }
        let value = Self::decode_body(&mut r)?;
        r.expect_end()?;
        Ok(value)
    }
}

// =============================================================================
// ENTITY CODECS
// =============================================================================

impl StateValue for BalanceState {
    const VERSION: u8 = 1;

    fn encode_body(&self, w: &mut ByteWriter) {
        w.write_wei(&self.balance);
        w.write_u64(self.updated_at_height);
        w.write_u64(self.updated_at_ms);
    }

    fn decode_body(r: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            balance: r.read_wei()?,
            updated_at_height: r.read_u64()?,
            updated_at_ms: r.read_u64()?,
        })
    }
}

impl StateValue for NonceState {
    const VERSION: u8 = 1;

    fn encode_body(&self, w: &mut ByteWriter) {
        w.write_i64(self.nonce);
        w.write_u64(self.updated_at_height);
        w.write_u64(self.updated_at_ms);
    }

    fn decode_body(r: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            nonce: r.read_i64()?,
            updated_at_height: r.read_u64()?,
            updated_at_ms: r.read_u64()?,
        })
    }
}

impl StateValue for AuthorityState {
    const VERSION: u8 = 1;

    fn encode_body(&self, w: &mut ByteWriter) {
        w.write_fixed(&self.origin_tx_hash);
        w.write_u64(self.created_at_height);
        w.write_u64(self.updated_at_height);
        w.write_u64(self.updated_at_ms);
    }

    fn decode_body(r: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            origin_tx_hash: r.read_hash()?,
            created_at_height: r.read_u64()?,
            updated_at_height: r.read_u64()?,
            updated_at_ms: r.read_u64()?,
        })
    }
}

impl StateValue for AddressAliasState {
    const VERSION: u8 = 1;

    fn encode_body(&self, w: &mut ByteWriter) {
        w.write_fixed(&self.address);
        w.write_fixed(&self.origin_tx_hash);
        w.write_u64(self.created_at_height);
        w.write_u64(self.updated_at_height);
        w.write_u64(self.updated_at_ms);
    }

    fn decode_body(r: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            address: r.read_address()?,
            origin_tx_hash: r.read_hash()?,
            created_at_height: r.read_u64()?,
            updated_at_height: r.read_u64()?,
            updated_at_ms: r.read_u64()?,
        })
    }
}

impl StateValue for TokenState {
    const VERSION: u8 = 1;

    fn encode_body(&self, w: &mut ByteWriter) {
        w.write_string(&self.name);
        w.write_string(&self.ticker);
        w.write_u8(self.decimals);
        w.write_opt(self.website_url.as_ref(), |w, v| w.write_string(v));
        w.write_opt(self.logo_url.as_ref(), |w, v| w.write_string(v));
        w.write_opt(self.max_supply.as_ref(), |w, v| w.write_wei(v));
        w.write_wei(&self.total_supply);
        w.write_bool(self.user_burnable);
        w.write_fixed(&self.origin_tx_hash);
        w.write_u64(self.updated_at_height);
        w.write_u64(self.updated_at_ms);
    }

    fn decode_body(r: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            name: r.read_string()?,
            ticker: r.read_string()?,
            decimals: r.read_u8()?,
            website_url: r.read_opt(|r| r.read_string())?,
            logo_url: r.read_opt(|r| r.read_string())?,
            max_supply: r.read_opt(|r| r.read_wei())?,
            total_supply: r.read_wei()?,
            user_burnable: r.read_bool()?,
            origin_tx_hash: r.read_hash()?,
            updated_at_height: r.read_u64()?,
            updated_at_ms: r.read_u64()?,
        })
    }
}

fn write_voter_map(w: &mut ByteWriter, voters: &BTreeMap<Address, Hash>) {
    w.write_u32(voters.len() as u32);
    for (address, tx_hash) in voters {
        w.write_fixed(address);
        w.write_fixed(tx_hash);
    }
}

fn read_voter_map(r: &mut ByteReader<'_>) -> Result<BTreeMap<Address, Hash>, CodecError> {
    let count = r.read_u32()?;
    let mut voters = BTreeMap::new();
    for _ in 0..count {
        let address = r.read_address()?;
        let tx_hash = r.read_hash()?;
        voters.insert(address, tx_hash);
    }
    Ok(voters)
}

impl StateValue for BipState {
    const VERSION: u8 = 1;

    fn encode_body(&self, w: &mut ByteWriter) {
        w.write_u8(match self.status {
            BipStatus::Pending => 0,
            BipStatus::Approved => 1,
            BipStatus::Disapproved => 2,
        });
        w.write_bool(self.action_executed);
        w.write_u32(self.required_votes);
        write_voter_map(w, &self.approvers);
        write_voter_map(w, &self.disapprovers);
        w.write_u64(self.expiration_ms);
        w.write_u16(self.tx_version);
        w.write_var_bytes(&self.payload.to_rlp_bytes());
        w.write_opt(self.derived_token_address.as_ref(), |w, v| w.write_fixed(v));
        w.write_opt(self.executed_at_height.as_ref(), |w, v| w.write_u64(*v));
        w.write_u64(self.updated_at_height);
        w.write_u64(self.updated_at_ms);
    }

    fn decode_body(r: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        let status = match r.read_u8()? {
            0 => BipStatus::Pending,
            1 => BipStatus::Approved,
            2 => BipStatus::Disapproved,
            other => return Err(CodecError::InvalidDiscriminant(other)),
        };
        let action_executed = r.read_bool()?;
        let required_votes = r.read_u32()?;
        let approvers = read_voter_map(r)?;
        let disapprovers = read_voter_map(r)?;
        let expiration_ms = r.read_u64()?;
        let tx_version = r.read_u16()?;
        let payload = BipPayload::from_rlp_bytes(r.read_var_bytes()?)?;
        Ok(Self {
            status,
            action_executed,
            required_votes,
            approvers,
            disapprovers,
            expiration_ms,
            tx_version,
            payload,
            derived_token_address: r.read_opt(|r| r.read_address())?,
            executed_at_height: r.read_opt(|r| r.read_u64())?,
            updated_at_height: r.read_u64()?,
            updated_at_ms: r.read_u64()?,
        })
    }
}

impl StateValue for NetworkParamsState {
    const VERSION: u8 = 1;

    fn encode_body(&self, w: &mut ByteWriter) {
        w.write_wei(&self.block_reward);
        w.write_fixed(&self.block_reward_pool_address);
        w.write_u64(self.target_mining_time_ms);
        w.write_u64(self.asert_half_life_blocks);
        w.write_u64(self.asert_anchor_height);
        w.write_wei(&self.min_difficulty);
        w.write_wei(&self.min_tx_base_fee);
        w.write_wei(&self.min_tx_byte_fee);
        w.write_u32(self.authority_count);
        w.write_u64(self.updated_at_height);
        w.write_u64(self.updated_at_ms);
    }

    fn decode_body(r: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            block_reward: r.read_wei()?,
            block_reward_pool_address: r.read_address()?,
            target_mining_time_ms: r.read_u64()?,
            asert_half_life_blocks: r.read_u64()?,
            asert_anchor_height: r.read_u64()?,
            min_difficulty: r.read_wei()?,
            min_tx_base_fee: r.read_wei()?,
            min_tx_byte_fee: r.read_wei()?,
            authority_count: r.read_u32()?,
            updated_at_height: r.read_u64()?,
            updated_at_ms: r.read_u64()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::{NATIVE_TOKEN_ADDRESS, ZERO_HASH};

    #[test]
    fn balance_roundtrip() {
        let value = BalanceState {
            balance: Wei::from(123_456_789u64),
            updated_at_height: 7,
            updated_at_ms: 1_700_000_000_000,
        };
        assert_eq!(BalanceState::decode(&value.encode()).unwrap(), value);
    }

    #[test]
    fn zero_balance_encodes_compactly() {
        let value = BalanceState::default();
        // version + zero-length wei + two u64 stamps
        assert_eq!(value.encode().len(), 1 + 1 + 8 + 8);
    }

    #[test]
    fn negative_nonce_roundtrip() {
        let value = NonceState::default();
        let decoded = NonceState::decode(&value.encode()).unwrap();
        assert_eq!(decoded.nonce, -1);
    }

    #[test]
    fn token_roundtrip_with_optionals() {
        let value = TokenState {
            name: "Example".into(),
            ticker: "EXM".into(),
            decimals: 18,
            website_url: None,
            logo_url: Some("https://example.org/logo.png".into()),
            max_supply: Some(Wei::from(1_000_000u64)),
            total_supply: Wei::from(250u64),
            user_burnable: true,
            origin_tx_hash: [9u8; 32],
            updated_at_height: 3,
            updated_at_ms: 4,
        };
        assert_eq!(TokenState::decode(&value.encode()).unwrap(), value);
    }

    #[test]
    fn bip_roundtrip() {
        let mut approvers = BTreeMap::new();
        approvers.insert([1u8; 20], [2u8; 32]);
        let value = BipState {
            status: BipStatus::Pending,
            action_executed: false,
            required_votes: 2,
            approvers,
            disapprovers: BTreeMap::new(),
            expiration_ms: 999,
            tx_version: 1,
            payload: BipPayload::AuthorityAdd { address: [3u8; 20] },
            derived_token_address: None,
            executed_at_height: None,
            updated_at_height: 5,
            updated_at_ms: 6,
        };
        assert_eq!(BipState::decode(&value.encode()).unwrap(), value);
    }

    #[test]
    fn params_roundtrip() {
        let value = NetworkParamsState {
            block_reward: Wei::from(50u64),
            block_reward_pool_address: NATIVE_TOKEN_ADDRESS,
            target_mining_time_ms: 10_000,
            asert_half_life_blocks: 288,
            asert_anchor_height: 0,
            min_difficulty: Wei::from(1_000u64),
            min_tx_base_fee: Wei::one(),
            min_tx_byte_fee: Wei::zero(),
            authority_count: 3,
            updated_at_height: 0,
            updated_at_ms: 0,
        };
        assert_eq!(NetworkParamsState::decode(&value.encode()).unwrap(), value);
    }

    #[test]
    fn wrong_version_is_rejected() {
        let mut bytes = BalanceState::default().encode();
        bytes[0] = 9;
        assert!(matches!(
            BalanceState::decode(&bytes),
            Err(CodecError::UnsupportedVersion { found: 9, newest: 1 })
        ));
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut bytes = AuthorityState {
            origin_tx_hash: ZERO_HASH,
            created_at_height: 0,
            updated_at_height: 0,
            updated_at_ms: 0,
        }
        .encode();
        bytes.push(0xFF);
        assert_eq!(
            AuthorityState::decode(&bytes),
            Err(CodecError::TrailingBytes)
        );
    }
}
