//! Element types that can be stored in an arena.

use std::fmt;
use tessera_tensor::DType;

/// Tag recorded next to every stored sequence.
///
/// The discriminants are written into shared memory, so they must never be
/// renumbered.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ElementKind {
    Int32 = 1,
    Float32 = 2,
}

impl ElementKind {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(ElementKind::Int32),
            2 => Some(ElementKind::Float32),
            _ => None,
        }
    }

    #[inline]
    pub fn size_bytes(self) -> usize {
        4
    }

    pub fn dtype(self) -> DType {
        match self {
            ElementKind::Int32 => DType::Int32,
            ElementKind::Float32 => DType::Float32,
        }
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.dtype(), f)
    }
}

mod sealed {
    pub trait Sealed {}
}

/// A fixed-width numeric type that may be copied bytewise into and out of
/// shared memory.
///
/// # Safety
///
/// Implementers must be plain old data for which every bit pattern is a
/// valid value, with `size_of::<Self>() == Self::KIND.size_bytes()`. The
/// trait is sealed; only `i32` and `f32` implement it.
pub unsafe trait Element: sealed::Sealed + Copy + Send + Sync + 'static {
    const KIND: ElementKind;
}

macro_rules! impl_element {
    ($($t:ty => $kind:ident),* $(,)?) => {
        $(
            impl sealed::Sealed for $t {}
            unsafe impl Element for $t {
                const KIND: ElementKind = ElementKind::$kind;
            }
        )*
    };
}

impl_element! {
    i32 => Int32,
    f32 => Float32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::size_of;

    #[test]
    fn kind_sizes_match_rust_types() {
        assert_eq!(size_of::<i32>(), <i32 as Element>::KIND.size_bytes());
        assert_eq!(size_of::<f32>(), <f32 as Element>::KIND.size_bytes());
    }

    #[test]
    fn raw_tags_round_trip() {
        for kind in [ElementKind::Int32, ElementKind::Float32] {
            assert_eq!(ElementKind::from_raw(kind as u32), Some(kind));
        }
        assert_eq!(ElementKind::from_raw(0), None);
        assert_eq!(ElementKind::from_raw(3), None);
    }

    #[test]
    fn display_uses_dtype_names() {
        assert_eq!(ElementKind::Int32.to_string(), "int32");
        assert_eq!(ElementKind::Float32.to_string(), "float32");
    }
}
