//! Value descriptors
//!
//! The header-level view of a pipe message: nullability, element kind and
//! shape. A null descriptor carries no kind or shape and announces that no
//! payload follows.

use crate::element::ElementKind;
use crate::tensor::{checked_nbytes, Tensor};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueDescriptor {
    pub is_null: bool,
    pub element_kind: ElementKind,
    pub dims: Vec<usize>,
}

impl ValueDescriptor {
    /// Descriptor for the "no value" marker
    pub fn null() -> Self {
        Self {
            is_null: true,
            element_kind: ElementKind::F32,
            dims: Vec::new(),
        }
    }

    pub fn new(element_kind: ElementKind, dims: Vec<usize>) -> Self {
        Self {
            is_null: false,
            element_kind,
            dims,
        }
    }

    pub fn of(tensor: &Tensor) -> Self {
        Self::new(tensor.kind(), tensor.dims().to_vec())
    }

    pub fn for_value(value: Option<&Tensor>) -> Self {
        value.map_or_else(Self::null, Self::of)
    }

    pub fn rank(&self) -> usize {
        if self.is_null {
            0
        } else {
            self.dims.len()
        }
    }

    /// Payload bytes that follow the header, `None` if the shape overflows
    pub fn checked_payload_len(&self) -> Option<usize> {
        if self.is_null {
            Some(0)
        } else {
            checked_nbytes(self.element_kind, &self.dims)
        }
    }

    /// Payload bytes that follow the header
    ///
    /// Descriptors built from tensors or accepted by the decoder never
    /// overflow; anything else saturates.
    pub fn payload_len(&self) -> usize {
        self.checked_payload_len().unwrap_or(usize::MAX)
    }
}

impl fmt::Display for ValueDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null {
            f.write_str("null")
        } else {
            write!(f, "{}{:?}", self.element_kind, self.dims)
        }
    }
}
