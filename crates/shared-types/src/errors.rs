//! Error types for the shared encodings and the storage port.

use thiserror::Error;

/// Errors from the canonical recursive-list encoding.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RlpError {
    #[error("unexpected end of input")]
    UnexpectedEof,

    #[error("expected a list, found a byte item")]
    ExpectedList,

    #[error("expected a byte item, found a list")]
    ExpectedBytes,

    #[error("non-canonical encoding")]
    NonCanonical,

    #[error("scalar too large for target type")]
    ScalarOverflow,

    #[error("byte item has wrong length: expected {expected}, found {found}")]
    WrongLength { expected: usize, found: usize },

    #[error("invalid utf-8 in string item")]
    InvalidUtf8,

    #[error("unknown tag {0}")]
    UnknownTag(u8),

    #[error("trailing bytes after item")]
    TrailingBytes,
}

/// Errors from the versioned state-value codec.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("unexpected end of input")]
    UnexpectedEof,

    #[error("unsupported codec version {found} (newest known: {newest})")]
    UnsupportedVersion { found: u8, newest: u8 },

    #[error("invalid boolean byte {0}")]
    InvalidBool(u8),

    #[error("invalid utf-8 in string field")]
    InvalidUtf8,

    #[error("invalid discriminant {0}")]
    InvalidDiscriminant(u8),

    #[error("length field overflows input")]
    LengthOverflow,

    #[error("trailing bytes after value")]
    TrailingBytes,

    #[error("rlp-embedded field: {0}")]
    Rlp(#[from] RlpError),
}

/// Errors from the column-store port.
#[derive(Debug, Error, Clone)]
pub enum StoreError {
    #[error("storage i/o: {0}")]
    Io(String),

    #[error("storage backend closed")]
    Closed,
}
