//! # Tensor Header Codec
//!
//! ## Purpose
//!
//! Fixed-layout header announcing the nullability, element kind and shape of
//! the payload that follows it. The header travels as its own transmission so
//! the receiver can size a destination buffer before the payload arrives.
//!
//! ## Wire Layout
//!
//! ```text
//! offset  size  field
//! 0       1     is_null       0 = value follows, 1 = no payload
//! 1       1     element_kind  ElementKind code
//! 2       1     rank          0..=MAX_RANK
//! 3       5     reserved      zero
//! 8       112   dims          MAX_RANK × u64 little-endian, unused slots zero
//! ```
//!
//! The layout is versionless: both endpoints are built from the same table
//! and agree on it out of band.

use crate::constants::{
    DEFAULT_MAX_PAYLOAD_BYTES, DIMS_OFFSET, FLAG_NULL, FLAG_VALUE, HEADER_SIZE, MAX_RANK,
    RESERVED_OFFSET,
};
use crate::error::{ProtocolError, ProtocolResult};
use kvpipe_types::{checked_nbytes, ElementKind, ValueDescriptor};
use zerocopy::byteorder::{LittleEndian, U64};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

/// On-the-wire header record
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
pub struct TensorHeader {
    pub is_null: u8,
    pub element_kind: u8,
    pub rank: u8,
    pub reserved: [u8; 5],
    pub dims: [U64<LittleEndian>; MAX_RANK],
}

// Layout is part of the protocol
const _: () = assert!(std::mem::size_of::<TensorHeader>() == HEADER_SIZE);

impl TensorHeader {
    /// Header for the "no value" marker
    pub fn null() -> Self {
        let mut header = Self::new_zeroed();
        header.is_null = FLAG_NULL;
        header
    }

    /// Build the header describing `descriptor`
    pub fn from_descriptor(descriptor: &ValueDescriptor) -> ProtocolResult<Self> {
        if descriptor.is_null {
            return Ok(Self::null());
        }

        let rank = descriptor.dims.len();
        if rank > MAX_RANK {
            return Err(ProtocolError::rank_too_large(rank));
        }

        let kind = descriptor.element_kind;
        let overflow =
            || ProtocolError::dimension_overflow(kind, descriptor.dims.iter().map(|&d| d as u64));
        if checked_nbytes(kind, &descriptor.dims).is_none() {
            return Err(overflow());
        }

        let mut header = Self::new_zeroed();
        header.is_null = FLAG_VALUE;
        header.element_kind = kind.code();
        header.rank = rank as u8;
        for (slot, &dim) in header.dims.iter_mut().zip(&descriptor.dims) {
            let dim = u64::try_from(dim).map_err(|_| overflow())?;
            *slot = U64::new(dim);
        }
        Ok(header)
    }

    /// Validate the record and convert it back into a descriptor
    pub fn to_descriptor(&self, max_payload: usize) -> ProtocolResult<ValueDescriptor> {
        match self.is_null {
            FLAG_NULL => return Ok(ValueDescriptor::null()),
            FLAG_VALUE => {}
            value => return Err(ProtocolError::InvalidNullFlag { value }),
        }

        let kind = ElementKind::from_code(self.element_kind)
            .ok_or_else(|| ProtocolError::unknown_element_kind(self.element_kind))?;

        let rank = self.rank as usize;
        if rank > MAX_RANK {
            return Err(ProtocolError::rank_too_large(rank));
        }

        if let Some(i) = self.reserved.iter().position(|&b| b != 0) {
            return Err(ProtocolError::NonZeroPadding {
                offset: RESERVED_OFFSET + i,
            });
        }
        if let Some(i) = self.dims[rank..].iter().position(|d| d.get() != 0) {
            return Err(ProtocolError::NonZeroPadding {
                offset: DIMS_OFFSET + (rank + i) * 8,
            });
        }

        let raw_dims = self.dims[..rank].iter().map(|d| d.get());
        let dims = raw_dims
            .clone()
            .map(usize::try_from)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| ProtocolError::dimension_overflow(kind, raw_dims.clone()))?;

        let size = checked_nbytes(kind, &dims)
            .ok_or_else(|| ProtocolError::dimension_overflow(kind, raw_dims))?;
        if size > max_payload {
            return Err(ProtocolError::PayloadTooLarge {
                size,
                limit: max_payload,
            });
        }

        Ok(ValueDescriptor::new(kind, dims))
    }
}

/// Encode `descriptor` into a fixed-size header
pub fn encode_header(descriptor: &ValueDescriptor) -> ProtocolResult<[u8; HEADER_SIZE]> {
    let header = TensorHeader::from_descriptor(descriptor)?;
    let mut out = [0u8; HEADER_SIZE];
    out.copy_from_slice(header.as_bytes());
    Ok(out)
}

/// Decode a header with the default payload ceiling
pub fn decode_header(data: &[u8]) -> ProtocolResult<ValueDescriptor> {
    decode_header_with_limit(data, DEFAULT_MAX_PAYLOAD_BYTES)
}

/// Decode a header, rejecting payloads larger than `max_payload` bytes
///
/// Trailing bytes beyond [`HEADER_SIZE`] are ignored.
pub fn decode_header_with_limit(data: &[u8], max_payload: usize) -> ProtocolResult<ValueDescriptor> {
    let header = TensorHeader::read_from_prefix(data).ok_or_else(|| {
        ProtocolError::message_too_small(HEADER_SIZE, data.len(), "TensorHeader decoding")
    })?;
    header.to_descriptor(max_payload)
}
