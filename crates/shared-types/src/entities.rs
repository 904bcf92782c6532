//! # Core Domain Entities
//!
//! Defines the chain and state entities shared by all subsystems.
//!
//! ## Clusters
//!
//! - **Chain**: `Tx`, `TxPayload`, `BipPayload`, `Block`, `BlockHeader`
//! - **Stored chain**: `StoredBlock`, `ConnectedSource`, `BlockEvent`
//! - **State**: balance/nonce/authority/alias/token/BIP/params records
//! - **Diffs**: per-block state changes handed to event listeners
//!
//! Chain entities carry their canonical recursive-list encodings here because
//! those encodings define the content hashes; nothing else is allowed to
//! produce them.

use crate::errors::RlpError;
use crate::primitives::{
    Address, Hash, RecoverableSignature, Wei, ZERO_ADDRESS, ZERO_SIGNATURE,
};
use crate::rlp::{RlpList, RlpReader};
use primitive_types::U256;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, Bytes};
use shared_crypto::{keccak256, recover_address, CryptoError};
use std::collections::{BTreeMap, HashMap};

// =============================================================================
// CLUSTER A: TRANSACTIONS
// =============================================================================

/// Transaction kinds. Only `Transfer` debits its fee from the sender;
/// governance transactions are system-paid (their fee is minted).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TxType {
    Transfer = 0,
    BipCreate = 1,
    BipVote = 2,
}

impl TxType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Transfer),
            1 => Some(Self::BipCreate),
            2 => Some(Self::BipVote),
            _ => None,
        }
    }

    /// True when the fee is debited from the sender's native balance.
    pub fn is_user_paid(self) -> bool {
        matches!(self, Self::Transfer)
    }
}

/// Direction of a governance vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum VoteType {
    Approval = 0,
    Disapproval = 1,
}

impl VoteType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Approval),
            1 => Some(Self::Disapproval),
            _ => None,
        }
    }
}

/// Typed transaction payload. `Transfer` carries none.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxPayload {
    BipCreate(BipPayload),
    BipVote { vote: VoteType },
}

impl TxPayload {
    fn write(&self, list: &mut RlpList) {
        match self {
            TxPayload::BipCreate(payload) => {
                list.push_u8(1);
                list.push_list(payload.to_list());
            }
            TxPayload::BipVote { vote } => {
                list.push_u8(2);
                list.push_u8(*vote as u8);
            }
        }
    }

    fn read(reader: &mut RlpReader<'_>) -> Result<Self, RlpError> {
        let tag = reader.take_u8()?;
        match tag {
            1 => {
                let mut inner = reader.take_list()?;
                let payload = BipPayload::read(&mut inner)?;
                inner.expect_end()?;
                Ok(TxPayload::BipCreate(payload))
            }
            2 => {
                let vote = VoteType::from_u8(reader.take_u8()?)
                    .ok_or(RlpError::UnknownTag(tag))?;
                Ok(TxPayload::BipVote { vote })
            }
            other => Err(RlpError::UnknownTag(other)),
        }
    }
}

/// Discriminator for [`BipPayload`] variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum BipPayloadKind {
    TokenCreate = 0,
    TokenUpdate = 1,
    TokenMint = 2,
    TokenBurn = 3,
    AuthorityAdd = 4,
    AuthorityRemove = 5,
    NetworkParamsSet = 6,
    AddressAliasAdd = 7,
    AddressAliasRemove = 8,
}

/// The action a BIP executes once approved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BipPayload {
    TokenCreate {
        name: String,
        ticker: String,
        decimals: u8,
        website_url: Option<String>,
        logo_url: Option<String>,
        max_supply: Option<Wei>,
        user_burnable: bool,
    },
    TokenUpdate {
        token_address: Address,
        name: Option<String>,
        ticker: Option<String>,
        website_url: Option<String>,
        logo_url: Option<String>,
    },
    TokenMint {
        token_address: Address,
        recipient: Address,
        amount: Wei,
    },
    TokenBurn {
        token_address: Address,
        owner: Address,
        amount: Wei,
    },
    AuthorityAdd {
        address: Address,
    },
    AuthorityRemove {
        address: Address,
    },
    NetworkParamsSet(NetworkParamsUpdate),
    AddressAliasAdd {
        alias: String,
        address: Address,
    },
    AddressAliasRemove {
        alias: String,
    },
}

impl BipPayload {
    pub fn kind(&self) -> BipPayloadKind {
        match self {
            BipPayload::TokenCreate { .. } => BipPayloadKind::TokenCreate,
            BipPayload::TokenUpdate { .. } => BipPayloadKind::TokenUpdate,
            BipPayload::TokenMint { .. } => BipPayloadKind::TokenMint,
            BipPayload::TokenBurn { .. } => BipPayloadKind::TokenBurn,
            BipPayload::AuthorityAdd { .. } => BipPayloadKind::AuthorityAdd,
            BipPayload::AuthorityRemove { .. } => BipPayloadKind::AuthorityRemove,
            BipPayload::NetworkParamsSet(_) => BipPayloadKind::NetworkParamsSet,
            BipPayload::AddressAliasAdd { .. } => BipPayloadKind::AddressAliasAdd,
            BipPayload::AddressAliasRemove { .. } => BipPayloadKind::AddressAliasRemove,
        }
    }

    fn to_list(&self) -> RlpList {
        let mut list = RlpList::new();
        list.push_u8(self.kind() as u8);
        match self {
            BipPayload::TokenCreate {
                name,
                ticker,
                decimals,
                website_url,
                logo_url,
                max_supply,
                user_burnable,
            } => {
                list.push_str(name)
                    .push_str(ticker)
                    .push_u8(*decimals)
                    .push_opt(website_url.as_ref(), |l, v| {
                        l.push_str(v);
                    })
                    .push_opt(logo_url.as_ref(), |l, v| {
                        l.push_str(v);
                    })
                    .push_opt(max_supply.as_ref(), |l, v| {
                        l.push_u256(v);
                    })
                    .push_bool(*user_burnable);
            }
            BipPayload::TokenUpdate {
                token_address,
                name,
                ticker,
                website_url,
                logo_url,
            } => {
                list.push_bytes(token_address)
                    .push_opt(name.as_ref(), |l, v| {
                        l.push_str(v);
                    })
                    .push_opt(ticker.as_ref(), |l, v| {
                        l.push_str(v);
                    })
                    .push_opt(website_url.as_ref(), |l, v| {
                        l.push_str(v);
                    })
                    .push_opt(logo_url.as_ref(), |l, v| {
                        l.push_str(v);
                    });
            }
            BipPayload::TokenMint {
                token_address,
                recipient,
                amount,
            } => {
                list.push_bytes(token_address)
                    .push_bytes(recipient)
                    .push_u256(amount);
            }
            BipPayload::TokenBurn {
                token_address,
                owner,
                amount,
            } => {
                list.push_bytes(token_address)
                    .push_bytes(owner)
                    .push_u256(amount);
            }
            BipPayload::AuthorityAdd { address } | BipPayload::AuthorityRemove { address } => {
                list.push_bytes(address);
            }
            BipPayload::NetworkParamsSet(update) => {
                list.push_list(update.to_list());
            }
            BipPayload::AddressAliasAdd { alias, address } => {
                list.push_str(alias).push_bytes(address);
            }
            BipPayload::AddressAliasRemove { alias } => {
                list.push_str(alias);
            }
        }
        list
    }

    fn read(reader: &mut RlpReader<'_>) -> Result<Self, RlpError> {
        let kind = reader.take_u8()?;
        let payload = match kind {
            0 => BipPayload::TokenCreate {
                name: reader.take_string()?,
                ticker: reader.take_string()?,
                decimals: reader.take_u8()?,
                website_url: reader.take_opt(|r| r.take_string())?,
                logo_url: reader.take_opt(|r| r.take_string())?,
                max_supply: reader.take_opt(|r| r.take_u256())?,
                user_burnable: reader.take_bool()?,
            },
            1 => BipPayload::TokenUpdate {
                token_address: reader.take_fixed::<20>()?,
                name: reader.take_opt(|r| r.take_string())?,
                ticker: reader.take_opt(|r| r.take_string())?,
                website_url: reader.take_opt(|r| r.take_string())?,
                logo_url: reader.take_opt(|r| r.take_string())?,
            },
            2 => BipPayload::TokenMint {
                token_address: reader.take_fixed::<20>()?,
                recipient: reader.take_fixed::<20>()?,
                amount: reader.take_u256()?,
            },
            3 => BipPayload::TokenBurn {
                token_address: reader.take_fixed::<20>()?,
                owner: reader.take_fixed::<20>()?,
                amount: reader.take_u256()?,
            },
            4 => BipPayload::AuthorityAdd {
                address: reader.take_fixed::<20>()?,
            },
            5 => BipPayload::AuthorityRemove {
                address: reader.take_fixed::<20>()?,
            },
            6 => {
                let mut inner = reader.take_list()?;
                let update = NetworkParamsUpdate::read(&mut inner)?;
                inner.expect_end()?;
                BipPayload::NetworkParamsSet(update)
            }
            7 => BipPayload::AddressAliasAdd {
                alias: reader.take_string()?,
                address: reader.take_fixed::<20>()?,
            },
            8 => BipPayload::AddressAliasRemove {
                alias: reader.take_string()?,
            },
            other => return Err(RlpError::UnknownTag(other)),
        };
        Ok(payload)
    }

    /// Canonical encoding as a standalone item; also used when the payload
    /// is embedded in a stored BIP record.
    pub fn to_rlp_bytes(&self) -> Vec<u8> {
        self.to_list().finish()
    }

    pub fn from_rlp_bytes(bytes: &[u8]) -> Result<Self, RlpError> {
        let mut reader = RlpReader::from_list(bytes)?;
        let payload = Self::read(&mut reader)?;
        reader.expect_end()?;
        Ok(payload)
    }
}

/// Partial update of the network parameters; absent fields keep their value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkParamsUpdate {
    pub block_reward: Option<Wei>,
    pub block_reward_pool_address: Option<Address>,
    pub target_mining_time_ms: Option<u64>,
    pub asert_half_life_blocks: Option<u64>,
    pub min_difficulty: Option<U256>,
    pub min_tx_base_fee: Option<Wei>,
    pub min_tx_byte_fee: Option<Wei>,
}

impl NetworkParamsUpdate {
    /// True when the update touches the difficulty schedule, which forces an
    /// anchor reset.
    pub fn resets_asert_anchor(&self) -> bool {
        self.target_mining_time_ms.is_some() || self.asert_half_life_blocks.is_some()
    }

    fn to_list(&self) -> RlpList {
        let mut list = RlpList::new();
        list.push_opt(self.block_reward.as_ref(), |l, v| {
            l.push_u256(v);
        })
        .push_opt(self.block_reward_pool_address.as_ref(), |l, v| {
            l.push_bytes(v);
        })
        .push_opt(self.target_mining_time_ms.as_ref(), |l, v| {
            l.push_u64(*v);
        })
        .push_opt(self.asert_half_life_blocks.as_ref(), |l, v| {
            l.push_u64(*v);
        })
        .push_opt(self.min_difficulty.as_ref(), |l, v| {
            l.push_u256(v);
        })
        .push_opt(self.min_tx_base_fee.as_ref(), |l, v| {
            l.push_u256(v);
        })
        .push_opt(self.min_tx_byte_fee.as_ref(), |l, v| {
            l.push_u256(v);
        });
        list
    }

    fn read(reader: &mut RlpReader<'_>) -> Result<Self, RlpError> {
        Ok(Self {
            block_reward: reader.take_opt(|r| r.take_u256())?,
            block_reward_pool_address: reader.take_opt(|r| r.take_fixed::<20>())?,
            target_mining_time_ms: reader.take_opt(|r| r.take_u64())?,
            asert_half_life_blocks: reader.take_opt(|r| r.take_u64())?,
            min_difficulty: reader.take_opt(|r| r.take_u256())?,
            min_tx_base_fee: reader.take_opt(|r| r.take_u256())?,
            min_tx_byte_fee: reader.take_opt(|r| r.take_u256())?,
        })
    }
}

/// A transaction.
///
/// `sender` is never encoded: it is recovered from the signature over the
/// signing hash. The content hash covers every encoded field including the
/// signature; the signing hash covers everything except the signature.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tx {
    pub version: u16,
    pub tx_type: TxType,
    pub network: u32,
    pub timestamp_ms: u64,
    pub nonce: u64,
    pub recipient: Address,
    pub token_address: Address,
    pub amount: Wei,
    pub fee: Wei,
    pub message: String,
    pub payload: Option<TxPayload>,
    pub reference_hash: Hash,
    #[serde_as(as = "Bytes")]
    pub signature: RecoverableSignature,
    /// Recovered from `signature`; zero until recovery has run.
    pub sender: Address,
}

impl Tx {
    fn to_list(&self, include_signature: bool) -> RlpList {
        let mut list = RlpList::new();
        list.push_u16(self.version)
            .push_u8(self.tx_type as u8)
            .push_u32(self.network)
            .push_u64(self.timestamp_ms)
            .push_u64(self.nonce)
            .push_bytes(&self.recipient)
            .push_bytes(&self.token_address)
            .push_u256(&self.amount)
            .push_u256(&self.fee)
            .push_str(&self.message)
            .push_opt(self.payload.as_ref(), |l, p| {
                let mut inner = RlpList::new();
                p.write(&mut inner);
                l.push_list(inner);
            })
            .push_bytes(&self.reference_hash);
        if include_signature {
            list.push_bytes(&self.signature);
        }
        list
    }

    /// Full canonical encoding (with signature), as sent on the wire.
    pub fn rlp_encode(&self) -> Vec<u8> {
        self.to_list(true).finish()
    }

    /// Content hash over the full encoding.
    pub fn hash(&self) -> Hash {
        keccak256(&self.rlp_encode())
    }

    /// Hash the sender signed: the encoding without the signature.
    pub fn signing_hash(&self) -> Hash {
        keccak256(&self.to_list(false).finish())
    }

    /// Encoded byte length; the per-byte fee floor is charged against this.
    pub fn encoded_size(&self) -> usize {
        self.rlp_encode().len()
    }

    /// Recover the sender address from the signature.
    pub fn recover_sender(&self) -> Result<Address, CryptoError> {
        recover_address(&self.signing_hash(), &self.signature)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, RlpError> {
        let mut reader = RlpReader::from_list(bytes)?;
        let tx = Self::read(&mut reader)?;
        reader.expect_end()?;
        Ok(tx)
    }

    pub(crate) fn read(reader: &mut RlpReader<'_>) -> Result<Self, RlpError> {
        let version = reader.take_u16()?;
        let type_byte = reader.take_u8()?;
        let tx_type = TxType::from_u8(type_byte).ok_or(RlpError::UnknownTag(type_byte))?;
        Ok(Self {
            version,
            tx_type,
            network: reader.take_u32()?,
            timestamp_ms: reader.take_u64()?,
            nonce: reader.take_u64()?,
            recipient: reader.take_fixed::<20>()?,
            token_address: reader.take_fixed::<20>()?,
            amount: reader.take_u256()?,
            fee: reader.take_u256()?,
            message: reader.take_string()?,
            payload: reader.take_opt(|r| {
                let mut inner = r.take_list()?;
                let payload = TxPayload::read(&mut inner)?;
                inner.expect_end()?;
                Ok(payload)
            })?,
            reference_hash: reader.take_fixed::<32>()?,
            signature: reader.take_fixed::<65>()?,
            sender: ZERO_ADDRESS,
        })
    }
}

// =============================================================================
// CLUSTER B: BLOCKS
// =============================================================================

/// A block header.
///
/// Three nested encodings exist:
/// - block hash / signing hash: everything except the signature
/// - PoW input: everything except nonce and signature
/// - wire form: everything
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: u16,
    pub height: u64,
    pub timestamp_ms: u64,
    pub previous_hash: Hash,
    pub difficulty: U256,
    pub tx_root_hash: Hash,
    pub state_root_hash: Hash,
    pub coinbase: Address,
    pub nonce: u64,
    #[serde_as(as = "Bytes")]
    pub signature: RecoverableSignature,
}

impl BlockHeader {
    fn to_list(&self, with_nonce: bool, with_signature: bool) -> RlpList {
        let mut list = RlpList::new();
        list.push_u16(self.version)
            .push_u64(self.height)
            .push_u64(self.timestamp_ms)
            .push_bytes(&self.previous_hash)
            .push_u256(&self.difficulty)
            .push_bytes(&self.tx_root_hash)
            .push_bytes(&self.state_root_hash)
            .push_bytes(&self.coinbase);
        if with_nonce {
            list.push_u64(self.nonce);
        }
        if with_signature {
            list.push_bytes(&self.signature);
        }
        list
    }

    /// Block hash, which is also the hash the coinbase signs.
    pub fn hash(&self) -> Hash {
        keccak256(&self.to_list(true, false).finish())
    }

    /// The bytes fed to the PoW hash together with the candidate nonce.
    pub fn pow_input(&self) -> Vec<u8> {
        self.to_list(false, false).finish()
    }

    pub fn rlp_encode(&self) -> Vec<u8> {
        self.to_list(true, true).finish()
    }

    pub(crate) fn read(reader: &mut RlpReader<'_>) -> Result<Self, RlpError> {
        Ok(Self {
            version: reader.take_u16()?,
            height: reader.take_u64()?,
            timestamp_ms: reader.take_u64()?,
            previous_hash: reader.take_fixed::<32>()?,
            difficulty: reader.take_u256()?,
            tx_root_hash: reader.take_fixed::<32>()?,
            state_root_hash: reader.take_fixed::<32>()?,
            coinbase: reader.take_fixed::<20>()?,
            nonce: reader.take_u64()?,
            signature: reader.take_fixed::<65>()?,
        })
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, RlpError> {
        let mut reader = RlpReader::from_list(bytes)?;
        let header = Self::read(&mut reader)?;
        reader.expect_end()?;
        Ok(header)
    }
}

/// A block: header plus ordered transactions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub txs: Vec<Tx>,
}

impl Block {
    pub fn rlp_encode(&self) -> Vec<u8> {
        let mut list = RlpList::new();
        list.push_list(self.header.to_list(true, true));
        let mut txs = RlpList::new();
        for tx in &self.txs {
            txs.push_list(tx.to_list(true));
        }
        list.push_list(txs);
        list.finish()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, RlpError> {
        let mut reader = RlpReader::from_list(bytes)?;
        let mut header_reader = reader.take_list()?;
        let header = BlockHeader::read(&mut header_reader)?;
        header_reader.expect_end()?;

        let mut txs_reader = reader.take_list()?;
        let mut txs = Vec::new();
        while txs_reader.has_more() {
            let mut tx_reader = txs_reader.take_list()?;
            txs.push(Tx::read(&mut tx_reader)?);
            tx_reader.expect_end()?;
        }
        reader.expect_end()?;

        Ok(Self { header, txs })
    }

    pub fn encoded_size(&self) -> usize {
        self.rlp_encode().len()
    }
}

/// The slice of block context transaction handlers see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimpleBlock {
    pub height: u64,
    pub timestamp_ms: u64,
    pub coinbase: Address,
}

impl SimpleBlock {
    pub fn from_header(header: &BlockHeader) -> Self {
        Self {
            height: header.height,
            timestamp_ms: header.timestamp_ms,
            coinbase: header.coinbase,
        }
    }
}

// =============================================================================
// CLUSTER C: STORED BLOCKS & EVENTS
// =============================================================================

/// How a block reached the canonical chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectedSource {
    Genesis,
    Mined,
    Propagated,
    Sync,
    Reorg,
}

/// State changes a block caused that no explicit transaction represents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockEvent {
    BlockReward { coinbase: Address, amount: Wei },
    FeesCollected { coinbase: Address, amount: Wei },
    TokenCreated { token_address: Address },
    TokenUpdated { token_address: Address },
    TokenMinted { token_address: Address, recipient: Address, amount: Wei },
    TokenBurned { token_address: Address, owner: Address, requested: Wei, actual: Wei },
    TokenSupplyUpdated { token_address: Address, total_supply: Wei },
    AuthorityAdded { address: Address },
    AuthorityRemoved { address: Address },
    NetworkParamsChanged,
    AddressAliasAdded { alias: String, address: Address },
    AddressAliasRemoved { alias: String },
    BipStateCreated { bip_hash: Hash },
    BipStateUpdated { bip_hash: Hash, status: BipStatus },
}

/// Requested vs. actually-burned amount of a capped token burn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BurnOutcome {
    pub requested: Wei,
    pub actual: Wei,
}

/// A block as persisted, with every index precomputed at construction.
///
/// `hash` is set exactly once here and never recomputed afterwards; all
/// canonical-chain bookkeeping compares against this field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredBlock {
    pub block: Block,
    pub hash: Hash,
    pub cumulative_difficulty: U256,
    pub source: ConnectedSource,
    pub received_from: Option<Address>,
    pub received_at_ms: u64,
    pub size_bytes: u64,
    pub tx_hashes: Vec<Hash>,
    pub tx_sizes: Vec<u32>,
    pub tx_senders: Vec<Address>,
    pub tx_index_by_hash: HashMap<Hash, u32>,
    pub events: Vec<BlockEvent>,
}

impl StoredBlock {
    /// Build the stored form of a block. Transaction senders must already be
    /// recovered on the contained transactions.
    pub fn new(
        block: Block,
        cumulative_difficulty: U256,
        source: ConnectedSource,
        received_from: Option<Address>,
        received_at_ms: u64,
        events: Vec<BlockEvent>,
    ) -> Self {
        let hash = block.header.hash();
        let size_bytes = block.encoded_size() as u64;

        let mut tx_hashes = Vec::with_capacity(block.txs.len());
        let mut tx_sizes = Vec::with_capacity(block.txs.len());
        let mut tx_senders = Vec::with_capacity(block.txs.len());
        let mut tx_index_by_hash = HashMap::with_capacity(block.txs.len());

        for (index, tx) in block.txs.iter().enumerate() {
            let tx_hash = tx.hash();
            tx_hashes.push(tx_hash);
            tx_sizes.push(tx.encoded_size() as u32);
            tx_senders.push(tx.sender);
            tx_index_by_hash.insert(tx_hash, index as u32);
        }

        Self {
            block,
            hash,
            cumulative_difficulty,
            source,
            received_from,
            received_at_ms,
            size_bytes,
            tx_hashes,
            tx_sizes,
            tx_senders,
            tx_index_by_hash,
            events,
        }
    }

    pub fn height(&self) -> u64 {
        self.block.header.height
    }

    pub fn previous_hash(&self) -> &Hash {
        &self.block.header.previous_hash
    }

    pub fn tx_by_hash(&self, tx_hash: &Hash) -> Option<&Tx> {
        self.tx_index_by_hash
            .get(tx_hash)
            .map(|&index| &self.block.txs[index as usize])
    }
}

// =============================================================================
// CLUSTER D: STATE ENTITIES
// =============================================================================

/// Balance of one (account, token) pair.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceState {
    pub balance: Wei,
    pub updated_at_height: u64,
    pub updated_at_ms: u64,
}

/// Account nonce. `-1` means no transaction yet, so the first valid
/// transaction nonce is 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NonceState {
    pub nonce: i64,
    pub updated_at_height: u64,
    pub updated_at_ms: u64,
}

impl Default for NonceState {
    fn default() -> Self {
        Self {
            nonce: -1,
            updated_at_height: 0,
            updated_at_ms: 0,
        }
    }
}

/// Membership record of the governance authority set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorityState {
    pub origin_tx_hash: Hash,
    pub created_at_height: u64,
    pub updated_at_height: u64,
    pub updated_at_ms: u64,
}

/// Human-readable alias for an address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressAliasState {
    pub address: Address,
    pub origin_tx_hash: Hash,
    pub created_at_height: u64,
    pub updated_at_height: u64,
    pub updated_at_ms: u64,
}

/// A token record. The native token uses the sentinel address and is created
/// at genesis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenState {
    pub name: String,
    pub ticker: String,
    pub decimals: u8,
    pub website_url: Option<String>,
    pub logo_url: Option<String>,
    pub max_supply: Option<Wei>,
    pub total_supply: Wei,
    pub user_burnable: bool,
    pub origin_tx_hash: Hash,
    pub updated_at_height: u64,
    pub updated_at_ms: u64,
}

/// Lifecycle of a governance proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BipStatus {
    Pending,
    Approved,
    Disapproved,
}

/// A governance proposal, keyed by the hash of its creating transaction.
///
/// Voter sets are ordered maps (voter address to voting tx hash) so the
/// record encodes deterministically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BipState {
    pub status: BipStatus,
    pub action_executed: bool,
    pub required_votes: u32,
    pub approvers: BTreeMap<Address, Hash>,
    pub disapprovers: BTreeMap<Address, Hash>,
    pub expiration_ms: u64,
    pub tx_version: u16,
    pub payload: BipPayload,
    pub derived_token_address: Option<Address>,
    pub executed_at_height: Option<u64>,
    pub updated_at_height: u64,
    pub updated_at_ms: u64,
}

impl BipState {
    pub fn kind(&self) -> BipPayloadKind {
        self.payload.kind()
    }
}

/// Governed network parameters, a state singleton.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkParamsState {
    pub block_reward: Wei,
    pub block_reward_pool_address: Address,
    pub target_mining_time_ms: u64,
    pub asert_half_life_blocks: u64,
    pub asert_anchor_height: u64,
    pub min_difficulty: U256,
    pub min_tx_base_fee: Wei,
    pub min_tx_byte_fee: Wei,
    pub authority_count: u32,
    pub updated_at_height: u64,
    pub updated_at_ms: u64,
}

impl NetworkParamsState {
    /// Fee floor for a transaction of `size` encoded bytes.
    pub fn required_fee(&self, size: usize) -> Wei {
        self.min_tx_base_fee + self.min_tx_byte_fee * Wei::from(size)
    }
}

/// Governance constants fixed at genesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernanceRules {
    /// Approval threshold in basis points of the authority count.
    pub approval_threshold_bps: u32,
    /// How long a proposal stays votable after creation.
    pub bip_expiration_period_ms: u64,
}

impl GovernanceRules {
    /// `ceil(authority_count * threshold_bps / 10000)`.
    pub fn required_votes(&self, authority_count: u32) -> u32 {
        let product = u64::from(authority_count) * u64::from(self.approval_threshold_bps);
        product.div_ceil(10_000) as u32
    }
}

// =============================================================================
// CLUSTER E: PER-BLOCK STATE DIFFS
// =============================================================================

/// One balance transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceChange {
    pub address: Address,
    pub token_address: Address,
    pub previous: Wei,
    pub current: Wei,
}

/// One nonce transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NonceChange {
    pub address: Address,
    pub previous: i64,
    pub current: i64,
}

/// One token-record transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenChange {
    pub token_address: Address,
    pub previous: Option<TokenState>,
    pub current: TokenState,
}

/// One proposal transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BipChange {
    pub bip_hash: Hash,
    pub current: BipState,
}

/// Everything a block changed, gathered in validation mode for downstream
/// listeners (indexers reconcile from this instead of replaying).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateDiff {
    pub balances: Vec<BalanceChange>,
    pub nonces: Vec<NonceChange>,
    pub tokens: Vec<TokenChange>,
    pub bips: Vec<BipChange>,
    pub params: Option<NetworkParamsState>,
    pub authorities_added: Vec<Address>,
    pub authorities_removed: Vec<Address>,
    pub aliases_added: Vec<(String, Address)>,
    pub aliases_removed: Vec<String>,
}

// =============================================================================
// TEST HELPERS
// =============================================================================

impl Tx {
    /// An unsigned transfer skeleton for tests and local construction.
    pub fn transfer_template(
        network: u32,
        nonce: u64,
        recipient: Address,
        token_address: Address,
        amount: Wei,
        fee: Wei,
    ) -> Self {
        Self {
            version: 1,
            tx_type: TxType::Transfer,
            network,
            timestamp_ms: 0,
            nonce,
            recipient,
            token_address,
            amount,
            fee,
            message: String::new(),
            payload: None,
            reference_hash: crate::primitives::ZERO_HASH,
            signature: ZERO_SIGNATURE,
            sender: ZERO_ADDRESS,
        }
    }
}
