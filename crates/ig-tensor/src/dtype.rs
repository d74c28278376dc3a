use half::f16;
use std::fmt;

/// Supported element data types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    /// 32-bit floating point.
    F32,
    /// 16-bit floating point (IEEE 754 half-precision, via the `half` crate).
    F16,
    /// 8-bit signed integer.
    I8,
    /// 8-bit unsigned integer.
    U8,
    /// 32-bit signed integer (accumulator type for integer pipelines).
    I32,
}

impl DType {
    /// Returns the size in bytes of a single element.
    pub fn size_in_bytes(&self) -> usize {
        match self {
            DType::F32 | DType::I32 => 4,
            DType::F16 => 2,
            DType::I8 | DType::U8 => 1,
        }
    }

    /// Returns true if this dtype is an integer format.
    pub fn is_integer(&self) -> bool {
        matches!(self, DType::I8 | DType::U8 | DType::I32)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DType::F32 => write!(f, "f32"),
            DType::F16 => write!(f, "f16"),
            DType::I8 => write!(f, "i8"),
            DType::U8 => write!(f, "u8"),
            DType::I32 => write!(f, "i32"),
        }
    }
}

/// A Rust scalar type usable as tensor storage.
///
/// The zero value doubles as the fill for masked (padded / out-of-bounds)
/// lanes, which must read as zero and never touch memory.
pub trait Element: Copy + Default + PartialEq + Send + Sync + std::fmt::Debug + 'static {
    const DTYPE: DType;
}

impl Element for f32 {
    const DTYPE: DType = DType::F32;
}

impl Element for f16 {
    const DTYPE: DType = DType::F16;
}

impl Element for i8 {
    const DTYPE: DType = DType::I8;
}

impl Element for u8 {
    const DTYPE: DType = DType::U8;
}

impl Element for i32 {
    const DTYPE: DType = DType::I32;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_in_bytes() {
        assert_eq!(DType::F32.size_in_bytes(), 4);
        assert_eq!(DType::F16.size_in_bytes(), 2);
        assert_eq!(DType::I8.size_in_bytes(), 1);
        assert_eq!(DType::U8.size_in_bytes(), 1);
        assert_eq!(DType::I32.size_in_bytes(), 4);
    }

    #[test]
    fn test_is_integer() {
        assert!(!DType::F32.is_integer());
        assert!(!DType::F16.is_integer());
        assert!(DType::I8.is_integer());
        assert!(DType::I32.is_integer());
    }

    #[test]
    fn test_element_tags() {
        assert_eq!(<f32 as Element>::DTYPE, DType::F32);
        assert_eq!(<i8 as Element>::DTYPE, DType::I8);
        assert_eq!(<f16 as Element>::DTYPE, DType::F16);
    }

    #[test]
    fn test_display() {
        assert_eq!(DType::F32.to_string(), "f32");
        assert_eq!(DType::I8.to_string(), "i8");
    }
}
