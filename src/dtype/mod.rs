//! Data types supported by sparsr tensors

mod dispatch;
mod element;

pub use element::Element;

/// Runtime representation of a tensor's element type
///
/// `DType` is the dynamic counterpart of the [`Element`] trait; the
/// `dispatch_dtype!` macro bridges the two.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum DType {
    /// 64-bit floating point
    F64,
    /// 32-bit floating point
    F32,
    /// 16-bit floating point (IEEE half, requires the `f16` feature)
    F16,
    /// 16-bit brain floating point (requires the `f16` feature)
    BF16,
    /// 64-bit signed integer
    I64,
    /// 32-bit signed integer
    I32,
    /// 16-bit signed integer
    I16,
    /// 8-bit signed integer
    I8,
    /// 8-bit unsigned integer
    U8,
}

impl DType {
    /// Size of a single element in bytes
    pub const fn size_in_bytes(&self) -> usize {
        match self {
            DType::F64 | DType::I64 => 8,
            DType::F32 | DType::I32 => 4,
            DType::F16 | DType::BF16 | DType::I16 => 2,
            DType::I8 | DType::U8 => 1,
        }
    }

    /// Is this a floating-point type?
    pub const fn is_float(&self) -> bool {
        matches!(self, DType::F64 | DType::F32 | DType::F16 | DType::BF16)
    }

    /// Is this an integer type?
    pub const fn is_int(&self) -> bool {
        !self.is_float()
    }

    /// Short lowercase name, e.g. "f32"
    pub const fn short_name(&self) -> &'static str {
        match self {
            DType::F64 => "f64",
            DType::F32 => "f32",
            DType::F16 => "f16",
            DType::BF16 => "bf16",
            DType::I64 => "i64",
            DType::I32 => "i32",
            DType::I16 => "i16",
            DType::I8 => "i8",
            DType::U8 => "u8",
        }
    }
}

impl std::fmt::Display for DType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.short_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_in_bytes() {
        assert_eq!(DType::F64.size_in_bytes(), 8);
        assert_eq!(DType::F32.size_in_bytes(), 4);
        assert_eq!(DType::I64.size_in_bytes(), 8);
        assert_eq!(DType::U8.size_in_bytes(), 1);
    }

    #[test]
    fn test_classification() {
        assert!(DType::F32.is_float());
        assert!(!DType::F32.is_int());
        assert!(DType::I32.is_int());
        assert!(!DType::I32.is_float());
    }

    #[test]
    fn test_element_round_trip() {
        assert_eq!(f32::DTYPE, DType::F32);
        assert_eq!(i64::DTYPE, DType::I64);
        assert_eq!(f64::from_f64(2.5), 2.5);
        assert_eq!(i32::from_f64(2.9), 2);
    }
}
