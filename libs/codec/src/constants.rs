//! Wire layout constants

pub use kvpipe_types::MAX_RANK;

/// Size of the encoded header in bytes
pub const HEADER_SIZE: usize = 8 + MAX_RANK * 8;

/// Offset of the first dimension slot
pub const DIMS_OFFSET: usize = 8;

/// Offset of the reserved bytes following the rank
pub const RESERVED_OFFSET: usize = 3;

/// Null flag values
pub const FLAG_VALUE: u8 = 0;
pub const FLAG_NULL: u8 = 1;

/// Default ceiling on a single payload accepted by a receiver (just under 4 GiB)
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = u32::MAX as usize;
