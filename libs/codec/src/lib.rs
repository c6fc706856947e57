//! # kvpipe Codec
//!
//! ## Purpose
//!
//! The Metadata Codec of the kvpipe transport: converts a value's
//! nullability, element kind and shape into a fixed 120-byte header record
//! and back, rejecting anything that does not describe a valid payload.
//!
//! ## Architecture Role
//!
//! ```text
//! libs/types → [codec] → libs/network
//!     ↑           ↓            ↓
//! Tensors    TensorHeader   Pipe sends header,
//! Descriptors validation    then payload
//! ```
//!
//! ## What This Crate Does NOT Contain
//! - Payload transmission or framing (belongs in libs/network)
//! - Schema negotiation: the layout is fixed for a session

pub mod constants;
pub mod error;
pub mod header;

pub use constants::*;
pub use error::{ProtocolError, ProtocolResult};
pub use header::{decode_header, decode_header_with_limit, encode_header, TensorHeader};
