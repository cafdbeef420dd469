//! Fixed repertoire of total orders over byte-encoded keys.
//!
//! The ordered containers take one of these at creation time. Numeric
//! comparators expect native-endian fixed-width encodings; undersized or
//! mismatched keys order by length, the same convention the byte
//! comparator starts from.

use std::cmp::Ordering;

/// Comparator over raw key bytes.
pub type CmpFn = fn(&[u8], &[u8]) -> Ordering;

macro_rules! numeric_comparator {
    ($(#[$doc:meta])* $name:ident, $ty:ty) => {
        $(#[$doc])*
        pub fn $name(k1: &[u8], k2: &[u8]) -> Ordering {
            const WIDTH: usize = std::mem::size_of::<$ty>();
            if k1.len() < WIDTH || k2.len() < WIDTH || k1.len() != k2.len() {
                return k1.len().cmp(&k2.len());
            }
            let a = <$ty>::from_ne_bytes(k1[..WIDTH].try_into().unwrap());
            let b = <$ty>::from_ne_bytes(k2[..WIDTH].try_into().unwrap());
            a.partial_cmp(&b).unwrap_or(Ordering::Equal)
        }
    };
}

numeric_comparator!(
    /// 16-bit signed integer keys.
    cmp_i16, i16
);
numeric_comparator!(
    /// 32-bit signed integer keys.
    cmp_i32, i32
);
numeric_comparator!(
    /// 64-bit signed integer keys.
    cmp_i64, i64
);
numeric_comparator!(
    /// 16-bit unsigned integer keys.
    cmp_u16, u16
);
numeric_comparator!(
    /// 32-bit unsigned integer keys.
    cmp_u32, u32
);
numeric_comparator!(
    /// 64-bit unsigned integer keys.
    cmp_u64, u64
);
numeric_comparator!(
    /// 32-bit float keys. NaN compares equal to everything its size.
    cmp_f32, f32
);
numeric_comparator!(
    /// 64-bit float keys. NaN compares equal to everything its size.
    cmp_f64, f64
);

/// Default comparator: keys order by length first, then bytewise.
pub fn cmp_bytes(k1: &[u8], k2: &[u8]) -> Ordering {
    k1.len().cmp(&k2.len()).then_with(|| k1.cmp(k2))
}
