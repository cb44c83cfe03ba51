//! Marker trait connecting host element types to their device dtype.

use crate::ScalarDType;

/// Host-side element type with a fixed device representation.
///
/// Used by typed array views to move values in and out of raw device bytes
/// without per-element dispatch on the dtype.
pub trait Element: Copy + Send + Sync + 'static {
    const DTYPE: ScalarDType;

    fn write_to(self, dst: &mut [u8]);
    fn read_from(src: &[u8]) -> Self;
}

macro_rules! impl_element {
    ($($ty:ty => $dtype:ident),* $(,)?) => {
        $(
            impl Element for $ty {
                const DTYPE: ScalarDType = ScalarDType::$dtype;

                fn write_to(self, dst: &mut [u8]) {
                    dst[..size_of::<$ty>()].copy_from_slice(&self.to_ne_bytes());
                }

                fn read_from(src: &[u8]) -> Self {
                    let mut bytes = [0u8; size_of::<$ty>()];
                    bytes.copy_from_slice(&src[..size_of::<$ty>()]);
                    Self::from_ne_bytes(bytes)
                }
            }
        )*
    };
}

impl_element! {
    i8 => Int8,
    u8 => UInt8,
    i16 => Int16,
    u16 => UInt16,
    i32 => Int32,
    u32 => UInt32,
    i64 => Int64,
    u64 => UInt64,
    f32 => Float32,
    f64 => Float64,
}
