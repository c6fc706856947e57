//! Protocol-level errors for tensor header processing
//!
//! Every variant describes a structural violation of the header layout. None
//! of them are retryable: once a receiver has read a malformed header the
//! byte stream can no longer be trusted to be aligned on message boundaries.

use kvpipe_types::{ElementKind, MAX_RANK};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Buffer is too small to contain a header
    #[error("Message too small: need {need} bytes, got {got} (context: {context})")]
    MessageTooSmall {
        need: usize,
        got: usize,
        context: String,
    },

    /// Null flag byte is neither 0 nor 1
    #[error("Invalid null flag {value:#04x}: expected 0x00 or 0x01")]
    InvalidNullFlag { value: u8 },

    /// Element kind code is not in the kind table
    #[error("Unknown element kind code {code}: known codes are {known}")]
    UnknownElementKind { code: u8, known: String },

    /// Declared rank exceeds the fixed header capacity
    #[error("Rank {rank} exceeds maximum {max}")]
    RankTooLarge { rank: usize, max: usize },

    /// Reserved bytes or unused dimension slots are set
    #[error("Non-zero padding at header offset {offset} (indicates: stream misalignment or foreign sender)")]
    NonZeroPadding { offset: usize },

    /// Shape cannot be represented in memory on this host
    #[error("Dimension overflow: shape {dims:?} of {kind} exceeds addressable size")]
    DimensionOverflow { kind: ElementKind, dims: Vec<u64> },

    /// Payload announced by the header exceeds the receiver's limit
    #[error("Payload too large: {size} bytes exceeds limit {limit}")]
    PayloadTooLarge { size: usize, limit: usize },
}

impl ProtocolError {
    pub fn message_too_small(need: usize, got: usize, context: impl Into<String>) -> Self {
        Self::MessageTooSmall {
            need,
            got,
            context: context.into(),
        }
    }

    pub fn unknown_element_kind(code: u8) -> Self {
        let known = ElementKind::ALL
            .iter()
            .map(|k| format!("{}={}", k.code(), k))
            .collect::<Vec<_>>()
            .join(", ");
        Self::UnknownElementKind { code, known }
    }

    pub fn rank_too_large(rank: usize) -> Self {
        Self::RankTooLarge {
            rank,
            max: MAX_RANK,
        }
    }

    pub fn dimension_overflow(kind: ElementKind, dims: impl IntoIterator<Item = u64>) -> Self {
        Self::DimensionOverflow {
            kind,
            dims: dims.into_iter().collect(),
        }
    }
}

/// Result type for protocol operations
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;
