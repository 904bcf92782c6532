//! # Canonical Recursive-List Encoding
//!
//! Length-prefixed byte items and nested lists, with the classic two-tier
//! header (short form up to 55 bytes, long form beyond). Every content hash
//! in consensus — transaction hashes, block hashes, the PoW input — is
//! keccak-256 over this encoding, and wire payloads reuse it, so encoding
//! and decoding are strict: scalars are minimal big-endian, single bytes
//! below 0x80 encode as themselves, and any non-canonical form is rejected.
//!
//! Optional fields encode as a nested list of zero or one items.

use crate::errors::RlpError;
use primitive_types::U256;

const BYTES_SHORT_BASE: u8 = 0x80;
const BYTES_LONG_BASE: u8 = 0xb7;
const LIST_SHORT_BASE: u8 = 0xc0;
const LIST_LONG_BASE: u8 = 0xf7;
const SHORT_LIMIT: usize = 55;

// =============================================================================
// ENCODER
// =============================================================================

/// Append a byte item (header + payload) to `out`.
pub fn append_bytes(out: &mut Vec<u8>, data: &[u8]) {
    if data.len() == 1 && data[0] < BYTES_SHORT_BASE {
        out.push(data[0]);
        return;
    }
    append_header(out, data.len(), BYTES_SHORT_BASE, BYTES_LONG_BASE);
    out.extend_from_slice(data);
}

/// Wrap an already-encoded sequence of items into a list item.
pub fn wrap_list(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 9);
    append_header(&mut out, payload.len(), LIST_SHORT_BASE, LIST_LONG_BASE);
    out.extend_from_slice(payload);
    out
}

fn append_header(out: &mut Vec<u8>, len: usize, short_base: u8, long_base: u8) {
    if len <= SHORT_LIMIT {
        out.push(short_base + len as u8);
    } else {
        let len_bytes = minimal_be(len as u64);
        out.push(long_base + len_bytes.len() as u8);
        out.extend_from_slice(&len_bytes);
    }
}

/// Minimal big-endian encoding of a u64; zero encodes as empty.
fn minimal_be(value: u64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let start = bytes.iter().position(|&b| b != 0).unwrap_or(8);
    bytes[start..].to_vec()
}

/// Builder for a list item with typed push methods.
#[derive(Default)]
pub struct RlpList {
    payload: Vec<u8>,
}

impl RlpList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_bytes(&mut self, data: &[u8]) -> &mut Self {
        append_bytes(&mut self.payload, data);
        self
    }

    pub fn push_u64(&mut self, value: u64) -> &mut Self {
        self.push_bytes(&minimal_be(value))
    }

    pub fn push_u8(&mut self, value: u8) -> &mut Self {
        self.push_u64(u64::from(value))
    }

    pub fn push_u16(&mut self, value: u16) -> &mut Self {
        self.push_u64(u64::from(value))
    }

    pub fn push_u32(&mut self, value: u32) -> &mut Self {
        self.push_u64(u64::from(value))
    }

    pub fn push_u256(&mut self, value: &U256) -> &mut Self {
        if value.is_zero() {
            return self.push_bytes(&[]);
        }
        let mut buf = [0u8; 32];
        value.to_big_endian(&mut buf);
        let start = buf.iter().position(|&b| b != 0).unwrap_or(31);
        let bytes = buf[start..].to_vec();
        self.push_bytes(&bytes)
    }

    pub fn push_str(&mut self, value: &str) -> &mut Self {
        self.push_bytes(value.as_bytes())
    }

    pub fn push_bool(&mut self, value: bool) -> &mut Self {
        self.push_u64(u64::from(value))
    }

    /// Append a finished nested list.
    pub fn push_list(&mut self, list: RlpList) -> &mut Self {
        let encoded = list.finish();
        self.payload.extend_from_slice(&encoded);
        self
    }

    /// Optional field: `None` is an empty nested list, `Some` a one-item one.
    pub fn push_opt<T, F>(&mut self, value: Option<&T>, f: F) -> &mut Self
    where
        F: FnOnce(&mut RlpList, &T),
    {
        let mut inner = RlpList::new();
        if let Some(v) = value {
            f(&mut inner, v);
        }
        self.push_list(inner)
    }

    /// Finish the list: wrap the accumulated payload in a list header.
    pub fn finish(self) -> Vec<u8> {
        wrap_list(&self.payload)
    }
}

// =============================================================================
// DECODER
// =============================================================================

struct ItemHeader {
    is_list: bool,
    /// Offset of the payload relative to the header start.
    payload_offset: usize,
    payload_len: usize,
}

/// Sequential reader over the items of one list payload.
pub struct RlpReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> RlpReader<'a> {
    /// Open a reader over a top-level list item spanning all of `data`.
    pub fn from_list(data: &'a [u8]) -> Result<Self, RlpError> {
        let header = parse_header(data)?;
        if !header.is_list {
            return Err(RlpError::ExpectedList);
        }
        let end = header.payload_offset + header.payload_len;
        if end != data.len() {
            return Err(RlpError::TrailingBytes);
        }
        Ok(Self {
            data: &data[header.payload_offset..end],
            pos: 0,
        })
    }

    /// True while at least one item remains.
    pub fn has_more(&self) -> bool {
        self.pos < self.data.len()
    }

    /// Error unless every item has been consumed.
    pub fn expect_end(&self) -> Result<(), RlpError> {
        if self.has_more() {
            return Err(RlpError::TrailingBytes);
        }
        Ok(())
    }

    fn next_item(&mut self) -> Result<(bool, &'a [u8]), RlpError> {
        let remaining = &self.data[self.pos..];
        let header = parse_header(remaining)?;
        let end = header.payload_offset + header.payload_len;
        if end > remaining.len() {
            return Err(RlpError::UnexpectedEof);
        }
        self.pos += end;
        Ok((header.is_list, &remaining[header.payload_offset..end]))
    }

    pub fn take_bytes(&mut self) -> Result<&'a [u8], RlpError> {
        let (is_list, payload) = self.next_item()?;
        if is_list {
            return Err(RlpError::ExpectedBytes);
        }
        Ok(payload)
    }

    pub fn take_fixed<const N: usize>(&mut self) -> Result<[u8; N], RlpError> {
        let bytes = self.take_bytes()?;
        bytes.try_into().map_err(|_| RlpError::WrongLength {
            expected: N,
            found: bytes.len(),
        })
    }

    pub fn take_u64(&mut self) -> Result<u64, RlpError> {
        let bytes = self.take_bytes()?;
        if bytes.len() > 8 {
            return Err(RlpError::ScalarOverflow);
        }
        if bytes.first() == Some(&0) {
            return Err(RlpError::NonCanonical);
        }
        let mut value = 0u64;
        for &b in bytes {
            value = (value << 8) | u64::from(b);
        }
        Ok(value)
    }

    pub fn take_u8(&mut self) -> Result<u8, RlpError> {
        u8::try_from(self.take_u64()?).map_err(|_| RlpError::ScalarOverflow)
    }

    pub fn take_u16(&mut self) -> Result<u16, RlpError> {
        u16::try_from(self.take_u64()?).map_err(|_| RlpError::ScalarOverflow)
    }

    pub fn take_u32(&mut self) -> Result<u32, RlpError> {
        u32::try_from(self.take_u64()?).map_err(|_| RlpError::ScalarOverflow)
    }

    pub fn take_u256(&mut self) -> Result<U256, RlpError> {
        let bytes = self.take_bytes()?;
        if bytes.len() > 32 {
            return Err(RlpError::ScalarOverflow);
        }
        if bytes.first() == Some(&0) {
            return Err(RlpError::NonCanonical);
        }
        Ok(U256::from_big_endian(bytes))
    }

    pub fn take_string(&mut self) -> Result<String, RlpError> {
        let bytes = self.take_bytes()?;
        String::from_utf8(bytes.to_vec()).map_err(|_| RlpError::InvalidUtf8)
    }

    pub fn take_bool(&mut self) -> Result<bool, RlpError> {
        match self.take_u64()? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(RlpError::NonCanonical),
        }
    }

    pub fn take_list(&mut self) -> Result<RlpReader<'a>, RlpError> {
        let (is_list, payload) = self.next_item()?;
        if !is_list {
            return Err(RlpError::ExpectedList);
        }
        Ok(RlpReader {
            data: payload,
            pos: 0,
        })
    }

    /// Optional field: empty nested list is `None`, one-item list is `Some`.
    pub fn take_opt<T, F>(&mut self, f: F) -> Result<Option<T>, RlpError>
    where
        F: FnOnce(&mut RlpReader<'a>) -> Result<T, RlpError>,
    {
        let mut inner = self.take_list()?;
        if !inner.has_more() {
            return Ok(None);
        }
        let value = f(&mut inner)?;
        inner.expect_end()?;
        Ok(Some(value))
    }
}

fn parse_header(data: &[u8]) -> Result<ItemHeader, RlpError> {
    let &first = data.first().ok_or(RlpError::UnexpectedEof)?;

    let (is_list, short_base, long_base) = if first < LIST_SHORT_BASE {
        (false, BYTES_SHORT_BASE, BYTES_LONG_BASE)
    } else {
        (true, LIST_SHORT_BASE, LIST_LONG_BASE)
    };

    if !is_list && first < BYTES_SHORT_BASE {
        // Single byte encodes itself.
        return Ok(ItemHeader {
            is_list: false,
            payload_offset: 0,
            payload_len: 1,
        });
    }

    let marker = first - short_base;
    if usize::from(marker) <= SHORT_LIMIT {
        let payload_len = usize::from(marker);
        if !is_list && payload_len == 1 {
            let &byte = data.get(1).ok_or(RlpError::UnexpectedEof)?;
            if byte < BYTES_SHORT_BASE {
                return Err(RlpError::NonCanonical);
            }
        }
        return Ok(ItemHeader {
            is_list,
            payload_offset: 1,
            payload_len,
        });
    }

    let len_len = usize::from(first - long_base);
    let len_bytes = data.get(1..1 + len_len).ok_or(RlpError::UnexpectedEof)?;
    if len_bytes.first() == Some(&0) || len_len > 8 {
        return Err(RlpError::NonCanonical);
    }
    let mut payload_len = 0usize;
    for &b in len_bytes {
        payload_len = (payload_len << 8) | usize::from(b);
    }
    if payload_len <= SHORT_LIMIT {
        return Err(RlpError::NonCanonical);
    }
    Ok(ItemHeader {
        is_list,
        payload_offset: 1 + len_len,
        payload_len,
    })
}
