//! P2P error types.

use au_04_chain::ChainError;
use shared_types::RlpError;
use thiserror::Error;

/// Errors from framing, handshakes and peer requests.
#[derive(Debug, Error)]
pub enum P2pError {
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame exceeds the size limit ({0} bytes)")]
    FrameTooLarge(usize),

    #[error("malformed frame")]
    MalformedFrame,

    #[error("unknown message code {0}")]
    UnknownMessageCode(u32),

    #[error("payload decode: {0}")]
    Rlp(#[from] RlpError),

    #[error("handshake rejected: {0}")]
    HandshakeRejected(String),

    #[error("peer is banned")]
    PeerBanned,

    #[error("request timed out")]
    Timeout,

    #[error("peer answered with the wrong message type")]
    UnexpectedResponse,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("peer requested disconnect")]
    Disconnected,

    #[error("no peer is ahead of us")]
    NoSyncCandidate,

    #[error(transparent)]
    Chain(#[from] ChainError),
}
