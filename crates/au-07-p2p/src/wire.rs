//! # Wire Protocol
//!
//! Frame layout: `u32` big-endian frame length, then `u64` request id,
//! varint message code, `u32` payload length and the payload itself. The
//! payload is a canonical recursive-list encoding, bit-exact because block
//! and transaction bytes feed content hashes on the receiving side.

use crate::errors::P2pError;
use primitive_types::U256;
use shared_types::rlp::{RlpList, RlpReader};
use shared_types::{Address, BlockHeader, Hash, Tx};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Hard ceiling on a single frame.
pub const MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

// Message codes.
const CODE_STATUS: u32 = 0;
const CODE_DISCONNECT: u32 = 1;
const CODE_PING: u32 = 2;
const CODE_PONG: u32 = 3;
const CODE_NEW_BLOCK: u32 = 20;
const CODE_GET_BLOCK_HEADERS: u32 = 40;
const CODE_BLOCK_HEADERS: u32 = 41;
const CODE_GET_BLOCK_BODIES: u32 = 42;
const CODE_BLOCK_BODIES: u32 = 43;
const CODE_NEW_MEMPOOL_TX: u32 = 60;
const CODE_GET_MEMPOOL_HASHES: u32 = 61;
const CODE_MEMPOOL_HASHES: u32 = 62;
const CODE_GET_MEMPOOL_TRANSACTIONS: u32 = 63;
const CODE_MEMPOOL_TRANSACTIONS: u32 = 64;

/// The opening handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusPayload {
    pub protocol_version: u16,
    pub network: u32,
    pub head_hash: Hash,
    pub head_height: u64,
    pub total_difficulty: U256,
    pub genesis_hash: Hash,
    pub identity: Address,
}

/// Every message of the protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Status(StatusPayload),
    Disconnect { reason: Option<String> },
    Ping,
    Pong,
    NewBlock { header: BlockHeader },
    GetBlockHeaders {
        locators: Vec<Hash>,
        stop_hash: Option<Hash>,
        batch_size: u32,
    },
    BlockHeaders { headers: Vec<BlockHeader> },
    GetBlockBodies { hashes: Vec<Hash> },
    BlockBodies { bodies: Vec<Vec<Tx>> },
    NewMempoolTx { tx: Tx },
    GetMempoolHashes,
    MempoolHashes { hashes: Vec<Hash> },
    GetMempoolTransactions { hashes: Vec<Hash> },
    MempoolTransactions { txs: Vec<Tx> },
}

impl Message {
    pub fn code(&self) -> u32 {
        match self {
            Message::Status(_) => CODE_STATUS,
            Message::Disconnect { .. } => CODE_DISCONNECT,
            Message::Ping => CODE_PING,
            Message::Pong => CODE_PONG,
            Message::NewBlock { .. } => CODE_NEW_BLOCK,
            Message::GetBlockHeaders { .. } => CODE_GET_BLOCK_HEADERS,
            Message::BlockHeaders { .. } => CODE_BLOCK_HEADERS,
            Message::GetBlockBodies { .. } => CODE_GET_BLOCK_BODIES,
            Message::BlockBodies { .. } => CODE_BLOCK_BODIES,
            Message::NewMempoolTx { .. } => CODE_NEW_MEMPOOL_TX,
            Message::GetMempoolHashes => CODE_GET_MEMPOOL_HASHES,
            Message::MempoolHashes { .. } => CODE_MEMPOOL_HASHES,
            Message::GetMempoolTransactions { .. } => CODE_GET_MEMPOOL_TRANSACTIONS,
            Message::MempoolTransactions { .. } => CODE_MEMPOOL_TRANSACTIONS,
        }
    }

    pub fn encode_payload(&self) -> Vec<u8> {
        let mut list = RlpList::new();
        match self {
            Message::Status(status) => {
                list.push_u16(status.protocol_version)
                    .push_u32(status.network)
                    .push_bytes(&status.head_hash)
                    .push_u64(status.head_height)
                    .push_u256(&status.total_difficulty)
                    .push_bytes(&status.genesis_hash)
                    .push_bytes(&status.identity);
            }
            Message::Disconnect { reason } => {
                list.push_opt(reason.as_ref(), |l, r| {
                    l.push_str(r);
                });
            }
            Message::Ping | Message::Pong | Message::GetMempoolHashes => {}
            Message::NewBlock { header } => {
                list.push_list(header_list(header));
            }
            Message::GetBlockHeaders {
                locators,
                stop_hash,
                batch_size,
            } => {
                let mut inner = RlpList::new();
                for locator in locators {
                    inner.push_bytes(locator);
                }
                list.push_list(inner);
                list.push_opt(stop_hash.as_ref(), |l, h| {
                    l.push_bytes(h);
                });
                list.push_u32(*batch_size);
            }
            Message::BlockHeaders { headers } => {
                let mut inner = RlpList::new();
                for header in headers {
                    inner.push_list(header_list(header));
                }
                list.push_list(inner);
            }
            Message::GetBlockBodies { hashes }
            | Message::MempoolHashes { hashes }
            | Message::GetMempoolTransactions { hashes } => {
                let mut inner = RlpList::new();
                for hash in hashes {
                    inner.push_bytes(hash);
                }
                list.push_list(inner);
            }
            Message::BlockBodies { bodies } => {
                let mut outer = RlpList::new();
                for body in bodies {
                    let mut txs = RlpList::new();
                    for tx in body {
                        txs.push_bytes(&tx.rlp_encode());
                    }
                    outer.push_list(txs);
                }
                list.push_list(outer);
            }
            Message::NewMempoolTx { tx } => {
                list.push_bytes(&tx.rlp_encode());
            }
            Message::MempoolTransactions { txs } => {
                let mut inner = RlpList::new();
                for tx in txs {
                    inner.push_bytes(&tx.rlp_encode());
                }
                list.push_list(inner);
            }
        }
        list.finish()
    }

    pub fn decode(code: u32, payload: &[u8]) -> Result<Self, P2pError> {
        let mut reader = RlpReader::from_list(payload)?;
        let message = match code {
            CODE_STATUS => Message::Status(StatusPayload {
                protocol_version: reader.take_u16()?,
                network: reader.take_u32()?,
                head_hash: reader.take_fixed::<32>()?,
                head_height: reader.take_u64()?,
                total_difficulty: reader.take_u256()?,
                genesis_hash: reader.take_fixed::<32>()?,
                identity: reader.take_fixed::<20>()?,
            }),
            CODE_DISCONNECT => Message::Disconnect {
                reason: reader.take_opt(|r| r.take_string())?,
            },
            CODE_PING => Message::Ping,
            CODE_PONG => Message::Pong,
            CODE_NEW_BLOCK => {
                let mut inner = reader.take_list()?;
                let header = read_header(&mut inner)?;
                inner.expect_end()?;
                Message::NewBlock { header }
            }
            CODE_GET_BLOCK_HEADERS => {
                let mut inner = reader.take_list()?;
                let mut locators = Vec::new();
                while inner.has_more() {
                    locators.push(inner.take_fixed::<32>()?);
                }
                Message::GetBlockHeaders {
                    locators,
                    stop_hash: reader.take_opt(|r| r.take_fixed::<32>())?,
                    batch_size: reader.take_u32()?,
                }
            }
            CODE_BLOCK_HEADERS => {
                let mut inner = reader.take_list()?;
                let mut headers = Vec::new();
                while inner.has_more() {
                    let mut header_reader = inner.take_list()?;
                    headers.push(read_header(&mut header_reader)?);
                    header_reader.expect_end()?;
                }
                Message::BlockHeaders { headers }
            }
            CODE_GET_BLOCK_BODIES => Message::GetBlockBodies {
                hashes: read_hashes(&mut reader)?,
            },
            CODE_BLOCK_BODIES => {
                let mut outer = reader.take_list()?;
                let mut bodies = Vec::new();
                while outer.has_more() {
                    let mut txs_reader = outer.take_list()?;
                    let mut txs = Vec::new();
                    while txs_reader.has_more() {
                        txs.push(Tx::decode(txs_reader.take_bytes()?)?);
                    }
                    bodies.push(txs);
                }
                Message::BlockBodies { bodies }
            }
            CODE_NEW_MEMPOOL_TX => Message::NewMempoolTx {
                tx: Tx::decode(reader.take_bytes()?)?,
            },
            CODE_GET_MEMPOOL_HASHES => Message::GetMempoolHashes,
            CODE_MEMPOOL_HASHES => Message::MempoolHashes {
                hashes: read_hashes(&mut reader)?,
            },
            CODE_GET_MEMPOOL_TRANSACTIONS => Message::GetMempoolTransactions {
                hashes: read_hashes(&mut reader)?,
            },
            CODE_MEMPOOL_TRANSACTIONS => {
                let mut inner = reader.take_list()?;
                let mut txs = Vec::new();
                while inner.has_more() {
                    txs.push(Tx::decode(inner.take_bytes()?)?);
                }
                Message::MempoolTransactions { txs }
            }
            other => return Err(P2pError::UnknownMessageCode(other)),
        };
        reader.expect_end()?;
        Ok(message)
    }
}

fn read_hashes(reader: &mut RlpReader<'_>) -> Result<Vec<Hash>, P2pError> {
    let mut inner = reader.take_list()?;
    let mut hashes = Vec::new();
    while inner.has_more() {
        hashes.push(inner.take_fixed::<32>()?);
    }
    Ok(hashes)
}

fn header_list(header: &BlockHeader) -> RlpList {
    let mut list = RlpList::new();
    list.push_bytes(&header.rlp_encode());
    list
}

fn read_header(reader: &mut RlpReader<'_>) -> Result<BlockHeader, P2pError> {
    Ok(BlockHeader::decode(reader.take_bytes()?)?)
}

/// One framed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub request_id: u64,
    pub message: Message,
}

/// LEB128-encode a u32.
fn write_varint(out: &mut Vec<u8>, mut value: u32) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            break;
        }
        out.push(byte | 0x80);
    }
}

fn read_varint(data: &[u8]) -> Result<(u32, usize), P2pError> {
    let mut value = 0u32;
    let mut shift = 0u32;
    for (index, &byte) in data.iter().enumerate() {
        if shift >= 32 {
            return Err(P2pError::MalformedFrame);
        }
        value |= u32::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return Ok((value, index + 1));
        }
        shift += 7;
    }
    Err(P2pError::MalformedFrame)
}

/// Serialize a frame body (everything after the length prefix).
pub fn encode_frame(frame: &Frame) -> Vec<u8> {
    let payload = frame.message.encode_payload();
    let mut body = Vec::with_capacity(payload.len() + 20);
    body.extend_from_slice(&frame.request_id.to_be_bytes());
    write_varint(&mut body, frame.message.code());
    body.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    body.extend_from_slice(&payload);
    body
}

pub fn decode_frame(body: &[u8]) -> Result<Frame, P2pError> {
    if body.len() < 8 {
        return Err(P2pError::MalformedFrame);
    }
    let request_id = u64::from_be_bytes(body[..8].try_into().unwrap());
    let (code, varint_len) = read_varint(&body[8..])?;

    let len_start = 8 + varint_len;
    let payload_start = len_start + 4;
    if body.len() < payload_start {
        return Err(P2pError::MalformedFrame);
    }
    let payload_len =
        u32::from_be_bytes(body[len_start..payload_start].try_into().unwrap()) as usize;
    if body.len() != payload_start + payload_len {
        return Err(P2pError::MalformedFrame);
    }

    let message = Message::decode(code, &body[payload_start..])?;
    Ok(Frame {
        request_id,
        message,
    })
}

/// Write one length-prefixed frame to the socket.
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<(), P2pError>
where
    W: AsyncWriteExt + Unpin,
{
    let body = encode_frame(frame);
    if body.len() > MAX_FRAME_BYTES {
        return Err(P2pError::FrameTooLarge(body.len()));
    }
    writer.write_u32(body.len() as u32).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed frame from the socket.
pub async fn read_frame<R>(reader: &mut R) -> Result<Frame, P2pError>
where
    R: AsyncReadExt + Unpin,
{
    let len = reader.read_u32().await? as usize;
    if len > MAX_FRAME_BYTES {
        return Err(P2pError::FrameTooLarge(len));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    decode_frame(&body)
}
