//! Runtime dtype dispatch
//!
//! The `dispatch_dtype!` macro converts a [`DType`](super::DType) value into a
//! concrete generic type so that typed kernels can be called from
//! dtype-erased entry points.
//!
//! ```ignore
//! fn my_operation(dtype: DType) -> Result<Tensor<R>> {
//!     crate::dispatch_dtype!(dtype, T => {
//!         // T is now a concrete type (f32, f64, i32, ...)
//!         client.kernel::<T>()
//!     }, "my_operation")
//! }
//! ```

/// Internal helper macro to dispatch types requiring the "f16" feature.
#[macro_export]
#[doc(hidden)]
macro_rules! dispatch_f16_type {
    ($T:ident, $body:block, $dtype:expr, $error_op:expr, $type:ty) => {{
        #[cfg(feature = "f16")]
        {
            type $T = $type;
            $body
        }
        #[cfg(not(feature = "f16"))]
        {
            return Err($crate::error::Error::UnsupportedDType {
                dtype: $dtype,
                op: $error_op,
            });
        }
    }};
}

/// Macro for runtime dtype dispatch to typed operations.
///
/// Takes a `DType` value and executes a code block with `T` bound to the
/// corresponding Rust type. F16/BF16 require the `f16` feature and produce
/// an `UnsupportedDType` error otherwise.
#[macro_export]
macro_rules! dispatch_dtype {
    ($dtype:expr, $T:ident => $body:block, $error_op:expr) => {
        match $dtype {
            $crate::dtype::DType::F64 => {
                type $T = f64;
                $body
            }
            $crate::dtype::DType::F32 => {
                type $T = f32;
                $body
            }
            $crate::dtype::DType::F16 => {
                $crate::dispatch_f16_type!($T, $body, $dtype, $error_op, half::f16)
            }
            $crate::dtype::DType::BF16 => {
                $crate::dispatch_f16_type!($T, $body, $dtype, $error_op, half::bf16)
            }
            $crate::dtype::DType::I64 => {
                type $T = i64;
                $body
            }
            $crate::dtype::DType::I32 => {
                type $T = i32;
                $body
            }
            $crate::dtype::DType::I16 => {
                type $T = i16;
                $body
            }
            $crate::dtype::DType::I8 => {
                type $T = i8;
                $body
            }
            $crate::dtype::DType::U8 => {
                type $T = u8;
                $body
            }
        }
    };
}
