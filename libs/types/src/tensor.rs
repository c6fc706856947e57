//! Dense tensor values
//!
//! A [`Tensor`] is an immutable, contiguous, row-major buffer of elements of a
//! single [`ElementKind`] plus its shape and the device it lives on. Element
//! bytes are stored little-endian in a [`Bytes`] so clones are reference
//! counted and the dispatcher can hold a value without copying the caller's
//! data.

use crate::descriptor::ValueDescriptor;
use crate::device::Device;
use crate::element::{Element, ElementKind};
use crate::MAX_RANK;
use bytes::Bytes;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TensorError {
    #[error("Shape {dims:?} of {kind} needs {expected_bytes} bytes, got {got_bytes}")]
    ShapeMismatch {
        kind: ElementKind,
        dims: Vec<usize>,
        expected_bytes: usize,
        got_bytes: usize,
    },

    #[error("Element kind mismatch: tensor holds {actual}, requested {expected}")]
    KindMismatch {
        expected: ElementKind,
        actual: ElementKind,
    },

    #[error("Rank {rank} exceeds maximum {max}")]
    RankTooLarge { rank: usize, max: usize },

    #[error("Shape {dims:?} overflows addressable memory")]
    SizeOverflow { dims: Vec<usize> },
}

/// Number of elements described by `dims`, or `None` on overflow
///
/// Rank-0 shapes describe a single element.
pub fn checked_numel(dims: &[usize]) -> Option<usize> {
    dims.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d))
}

/// Payload size in bytes for a shape of `kind`, or `None` on overflow
pub fn checked_nbytes(kind: ElementKind, dims: &[usize]) -> Option<usize> {
    checked_numel(dims)?.checked_mul(kind.size_bytes())
}

#[derive(Clone, PartialEq)]
pub struct Tensor {
    kind: ElementKind,
    dims: Vec<usize>,
    device: Device,
    data: Bytes,
}

impl Tensor {
    /// Build a host tensor from raw little-endian element bytes
    pub fn from_bytes(
        kind: ElementKind,
        dims: &[usize],
        data: impl Into<Bytes>,
    ) -> Result<Self, TensorError> {
        let data = data.into();
        if dims.len() > MAX_RANK {
            return Err(TensorError::RankTooLarge {
                rank: dims.len(),
                max: MAX_RANK,
            });
        }
        let expected_bytes = checked_nbytes(kind, dims).ok_or_else(|| TensorError::SizeOverflow {
            dims: dims.to_vec(),
        })?;
        if expected_bytes != data.len() {
            return Err(TensorError::ShapeMismatch {
                kind,
                dims: dims.to_vec(),
                expected_bytes,
                got_bytes: data.len(),
            });
        }
        Ok(Self {
            kind,
            dims: dims.to_vec(),
            device: Device::Cpu,
            data,
        })
    }

    /// Build a host tensor by copying typed elements
    pub fn from_slice<T: Element>(dims: &[usize], values: &[T]) -> Result<Self, TensorError> {
        let bytes: &[u8] = bytemuck::cast_slice(values);
        Self::from_bytes(T::KIND, dims, Bytes::copy_from_slice(bytes))
    }

    /// One-dimensional tensor holding `values`
    pub fn vector<T: Element>(values: &[T]) -> Self {
        let bytes: &[u8] = bytemuck::cast_slice(values);
        Self {
            kind: T::KIND,
            dims: vec![values.len()],
            device: Device::Cpu,
            data: Bytes::copy_from_slice(bytes),
        }
    }

    /// Rank-0 tensor holding a single element
    pub fn scalar<T: Element>(value: T) -> Self {
        Self {
            kind: T::KIND,
            dims: Vec::new(),
            device: Device::Cpu,
            data: Bytes::copy_from_slice(bytemuck::bytes_of(&value)),
        }
    }

    /// Zero-filled tensor of the given kind and shape
    pub fn zeros(kind: ElementKind, dims: &[usize]) -> Result<Self, TensorError> {
        let len = checked_nbytes(kind, dims).ok_or_else(|| TensorError::SizeOverflow {
            dims: dims.to_vec(),
        })?;
        Self::from_bytes(kind, dims, vec![0u8; len])
    }

    pub fn kind(&self) -> ElementKind {
        self.kind
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Number of elements
    pub fn numel(&self) -> usize {
        self.data.len() / self.kind.size_bytes()
    }

    /// Payload size in bytes
    pub fn nbytes(&self) -> usize {
        self.data.len()
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Shared handle to the element bytes
    pub fn bytes(&self) -> Bytes {
        self.data.clone()
    }

    pub fn into_bytes(self) -> Bytes {
        self.data
    }

    /// Retag the tensor for `device`
    ///
    /// Storage stays in host memory; the tag decides whether the transport
    /// stages the value before sending.
    pub fn to_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    /// Copy the elements out as `T`, which must match the tensor's kind
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>, TensorError> {
        if T::KIND != self.kind {
            return Err(TensorError::KindMismatch {
                expected: T::KIND,
                actual: self.kind,
            });
        }
        // Copy through a typed buffer: `data` carries no alignment guarantee
        let mut out = vec![<T as bytemuck::Zeroable>::zeroed(); self.numel()];
        bytemuck::cast_slice_mut::<T, u8>(&mut out).copy_from_slice(&self.data);
        Ok(out)
    }

    /// Header-level description of this value
    pub fn descriptor(&self) -> ValueDescriptor {
        ValueDescriptor::of(self)
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("kind", &self.kind)
            .field("dims", &self.dims)
            .field("device", &self.device)
            .field("nbytes", &self.data.len())
            .finish()
    }
}
