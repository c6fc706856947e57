//! Element Kinds
//!
//! Closed enumeration of the numeric element types a pipe can carry, with an
//! explicit wire code and byte size for each. Kind dispatch never inspects
//! Rust types at runtime: callers either name an [`ElementKind`] directly or
//! go through the [`Element`] trait implemented for the plain scalar types.

use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Element type of a tensor payload
///
/// The discriminant is the one-byte code written into the wire header.
/// Codes are fixed for the lifetime of a session; both endpoints must be
/// built from the same table.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive, Serialize, Deserialize,
)]
#[repr(u8)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    F32 = 0,
    F64 = 1,
    /// IEEE half precision, carried as raw bits
    F16 = 2,
    /// bfloat16, carried as raw bits
    BF16 = 3,
    I8 = 4,
    I16 = 5,
    I32 = 6,
    I64 = 7,
    U8 = 8,
    /// One byte per element, 0 or 1
    Bool = 9,
}

impl ElementKind {
    /// Every supported kind, in code order
    pub const ALL: [ElementKind; 10] = [
        ElementKind::F32,
        ElementKind::F64,
        ElementKind::F16,
        ElementKind::BF16,
        ElementKind::I8,
        ElementKind::I16,
        ElementKind::I32,
        ElementKind::I64,
        ElementKind::U8,
        ElementKind::Bool,
    ];

    /// Size of one element in bytes
    pub const fn size_bytes(self) -> usize {
        match self {
            ElementKind::F64 | ElementKind::I64 => 8,
            ElementKind::F32 | ElementKind::I32 => 4,
            ElementKind::F16 | ElementKind::BF16 | ElementKind::I16 => 2,
            ElementKind::I8 | ElementKind::U8 | ElementKind::Bool => 1,
        }
    }

    /// Wire code for this kind
    pub fn code(self) -> u8 {
        self.into()
    }

    /// Look up a kind by wire code
    pub fn from_code(code: u8) -> Option<Self> {
        Self::try_from(code).ok()
    }

    pub const fn name(self) -> &'static str {
        match self {
            ElementKind::F32 => "f32",
            ElementKind::F64 => "f64",
            ElementKind::F16 => "f16",
            ElementKind::BF16 => "bf16",
            ElementKind::I8 => "i8",
            ElementKind::I16 => "i16",
            ElementKind::I32 => "i32",
            ElementKind::I64 => "i64",
            ElementKind::U8 => "u8",
            ElementKind::Bool => "bool",
        }
    }

    pub const fn is_floating_point(self) -> bool {
        matches!(
            self,
            ElementKind::F32 | ElementKind::F64 | ElementKind::F16 | ElementKind::BF16
        )
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Rust scalar type with a native [`ElementKind`]
///
/// `Pod` lets tensors reinterpret element slices as bytes without copying
/// through an intermediate representation.
pub trait Element: bytemuck::Pod + Send + Sync + 'static {
    const KIND: ElementKind;
}

macro_rules! impl_element {
    ($($ty:ty => $kind:ident),* $(,)?) => {
        $(
            impl Element for $ty {
                const KIND: ElementKind = ElementKind::$kind;
            }
        )*
    };
}

impl_element! {
    f32 => F32,
    f64 => F64,
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    u8 => U8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_round_trip_through_lookup() {
        for kind in ElementKind::ALL {
            assert_eq!(ElementKind::from_code(kind.code()), Some(kind));
        }
        assert_eq!(ElementKind::from_code(10), None);
        assert_eq!(ElementKind::from_code(0xFF), None);
    }

    #[test]
    fn test_size_table_matches_rust_types() {
        assert_eq!(ElementKind::F32.size_bytes(), std::mem::size_of::<f32>());
        assert_eq!(ElementKind::F64.size_bytes(), std::mem::size_of::<f64>());
        assert_eq!(ElementKind::I16.size_bytes(), std::mem::size_of::<i16>());
        assert_eq!(ElementKind::I64.size_bytes(), std::mem::size_of::<i64>());
        assert_eq!(ElementKind::BF16.size_bytes(), 2);
        assert_eq!(ElementKind::Bool.size_bytes(), 1);
    }

    #[test]
    fn test_element_trait_kinds() {
        assert_eq!(<f32 as Element>::KIND, ElementKind::F32);
        assert_eq!(<i64 as Element>::KIND, ElementKind::I64);
        assert_eq!(<u8 as Element>::KIND, ElementKind::U8);
    }
}
