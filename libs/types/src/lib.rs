//! # kvpipe Types
//!
//! Value types shared by every layer of the kvpipe transport.
//!
//! ## Architecture Role
//!
//! ```text
//! libs/types → libs/codec → libs/network
//!     ↑             ↓             ↓
//!  Tensors     Header codec   Pipe, pool,
//!  Kinds       Validation     dispatcher,
//!  Devices                    transports
//! ```
//!
//! ## What This Crate Contains
//! - [`ElementKind`]: closed table of element types with wire codes and sizes
//! - [`Tensor`]: immutable dense buffer with shape and device tag
//! - [`ValueDescriptor`]: nullability, kind and shape of one pipe message
//! - [`Device`]: where received values are materialized
//!
//! ## What This Crate Does NOT Contain
//! - Wire encoding (belongs in libs/codec)
//! - Sockets, threads or buffer pools (belong in libs/network)

pub mod descriptor;
pub mod device;
pub mod element;
pub mod tensor;

pub use descriptor::ValueDescriptor;
pub use device::{Device, ParseDeviceError};
pub use element::{Element, ElementKind};
pub use tensor::{checked_nbytes, checked_numel, Tensor, TensorError};

/// Maximum tensor rank a header can describe
pub const MAX_RANK: usize = 14;
