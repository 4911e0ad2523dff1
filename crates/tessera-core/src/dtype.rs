use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::scalar::Scalar;
use crate::{Result, TesseraError};

/// Element types supported by tessera arrays. The set is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
}

impl DType {
    pub const ALL: [DType; 10] = [
        DType::I8,
        DType::I16,
        DType::I32,
        DType::I64,
        DType::U8,
        DType::U16,
        DType::U32,
        DType::U64,
        DType::F32,
        DType::F64,
    ];

    /// Look a dtype up by its numeric tag (declaration order, starting at 0).
    pub fn from_tag(tag: u8) -> Result<DType> {
        DType::ALL
            .get(tag as usize)
            .copied()
            .ok_or_else(|| TesseraError::InvalidType {
                tag: tag.to_string(),
            })
    }

    pub fn tag(&self) -> u8 {
        *self as u8
    }

    /// Size in bytes of a single element.
    pub fn size_of(&self) -> usize {
        match self {
            DType::I8 | DType::U8 => 1,
            DType::I16 | DType::U16 => 2,
            DType::I32 | DType::U32 | DType::F32 => 4,
            DType::I64 | DType::U64 | DType::F64 => 8,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, DType::F32 | DType::F64)
    }

    pub fn is_integer(&self) -> bool {
        !self.is_float()
    }

    /// Floats count as signed.
    pub fn is_signed(&self) -> bool {
        !matches!(self, DType::U8 | DType::U16 | DType::U32 | DType::U64)
    }

    pub fn name(&self) -> &'static str {
        match self {
            DType::I8 => "i8",
            DType::I16 => "i16",
            DType::I32 => "i32",
            DType::I64 => "i64",
            DType::U8 => "u8",
            DType::U16 => "u16",
            DType::U32 => "u32",
            DType::U64 => "u64",
            DType::F32 => "f32",
            DType::F64 => "f64",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for DType {
    type Err = TesseraError;

    fn from_str(s: &str) -> Result<Self> {
        DType::ALL
            .iter()
            .copied()
            .find(|d| d.name() == s)
            .ok_or_else(|| TesseraError::InvalidType { tag: s.to_string() })
    }
}

impl TryFrom<u8> for DType {
    type Error = TesseraError;

    fn try_from(tag: u8) -> Result<Self> {
        DType::from_tag(tag)
    }
}

/// Lossless intermediate used for casts between element types.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Repr {
    Int(i128),
    Float(f64),
}

/// A primitive that can live in an array buffer.
///
/// Arithmetic here is the per-element semantics every kernel shares:
/// integers wrap, division promotes narrow integers to floating point,
/// and the transcendental functions compute integers in f32 (8/16-bit)
/// or f64 (32/64-bit) before narrowing back.
pub trait Element:
    bytemuck::Pod + PartialOrd + Default + fmt::Debug + fmt::Display + Send + Sync + 'static
{
    const DTYPE: DType;
    const ZERO: Self;
    const ONE: Self;
    /// Identity for max-reductions (`-inf` for floats).
    const LOWEST: Self;
    /// Identity for min-reductions (`+inf` for floats).
    const HIGHEST: Self;

    fn to_repr(self) -> Repr;
    fn from_repr(repr: Repr) -> Self;
    fn into_scalar(self) -> Scalar;

    fn to_f64(self) -> f64;

    fn from_f64(v: f64) -> Self {
        Self::from_repr(Repr::Float(v))
    }

    fn elem_add(self, rhs: Self) -> Self;
    fn elem_sub(self, rhs: Self) -> Self;
    fn elem_mul(self, rhs: Self) -> Self;
    fn elem_div(self, rhs: Self) -> Self;
    fn elem_pow(self, exp: Self) -> Self;
    fn elem_neg(self) -> Self;
    fn elem_abs(self) -> Self;
    fn elem_log(self) -> Self;
    fn elem_exp(self) -> Self;
    fn elem_sqrt(self) -> Self;
}

macro_rules! impl_int_common {
    ($t:ty, $variant:ident) => {
        const DTYPE: DType = DType::$variant;
        const ZERO: Self = 0;
        const ONE: Self = 1;
        const LOWEST: Self = <$t>::MIN;
        const HIGHEST: Self = <$t>::MAX;

        fn to_repr(self) -> Repr {
            Repr::Int(self as i128)
        }

        fn from_repr(repr: Repr) -> Self {
            match repr {
                Repr::Int(v) => v as $t,
                Repr::Float(v) => (v as i128) as $t,
            }
        }

        fn into_scalar(self) -> Scalar {
            Scalar::$variant(self)
        }

        fn to_f64(self) -> f64 {
            self as f64
        }

        #[inline(always)]
        fn elem_add(self, rhs: Self) -> Self {
            self.wrapping_add(rhs)
        }

        #[inline(always)]
        fn elem_sub(self, rhs: Self) -> Self {
            self.wrapping_sub(rhs)
        }

        #[inline(always)]
        fn elem_mul(self, rhs: Self) -> Self {
            self.wrapping_mul(rhs)
        }
    };
}

macro_rules! impl_int_element {
    // $p: the float type integer division and transcendentals run in.
    ($t:ty, $variant:ident, $p:ty, signed) => {
        impl Element for $t {
            impl_int_common!($t, $variant);

            #[inline(always)]
            fn elem_div(self, rhs: Self) -> Self {
                if rhs == 0 {
                    0
                } else {
                    Self::from_repr(Repr::Float(((self as $p) / (rhs as $p)) as f64))
                }
            }

            fn elem_pow(self, exp: Self) -> Self {
                if exp < 0 {
                    return 0;
                }
                powi(self, exp as u64)
            }

            #[inline(always)]
            fn elem_neg(self) -> Self {
                self.wrapping_neg()
            }

            #[inline(always)]
            fn elem_abs(self) -> Self {
                self.wrapping_abs()
            }

            fn elem_log(self) -> Self {
                (self as $p).ln() as $t
            }

            fn elem_exp(self) -> Self {
                (self as $p).exp() as $t
            }

            fn elem_sqrt(self) -> Self {
                (self.max(0) as $p).sqrt() as $t
            }
        }
    };
    ($t:ty, $variant:ident, $p:ty, unsigned) => {
        impl Element for $t {
            impl_int_common!($t, $variant);

            #[inline(always)]
            fn elem_div(self, rhs: Self) -> Self {
                if rhs == 0 {
                    0
                } else {
                    Self::from_repr(Repr::Float(((self as $p) / (rhs as $p)) as f64))
                }
            }

            fn elem_pow(self, exp: Self) -> Self {
                powi(self, exp as u64)
            }

            #[inline(always)]
            fn elem_neg(self) -> Self {
                self.wrapping_neg()
            }

            #[inline(always)]
            fn elem_abs(self) -> Self {
                self
            }

            fn elem_log(self) -> Self {
                (self as $p).ln() as $t
            }

            fn elem_exp(self) -> Self {
                (self as $p).exp() as $t
            }

            fn elem_sqrt(self) -> Self {
                (self as $p).sqrt() as $t
            }
        }
    };
}

// 64-bit integers divide natively; no float type holds them exactly.
macro_rules! impl_wide_int_element {
    ($t:ty, $variant:ident, $neg:expr, $abs:expr) => {
        impl Element for $t {
            impl_int_common!($t, $variant);

            fn elem_div(self, rhs: Self) -> Self {
                if rhs == 0 {
                    0
                } else {
                    self.wrapping_div(rhs)
                }
            }

            #[allow(unused_comparisons)]
            fn elem_pow(self, exp: Self) -> Self {
                if exp < 0 {
                    return 0;
                }
                powi(self, exp as u64)
            }

            #[inline(always)]
            fn elem_neg(self) -> Self {
                $neg(self)
            }

            #[inline(always)]
            fn elem_abs(self) -> Self {
                $abs(self)
            }

            fn elem_log(self) -> Self {
                (self as f64).ln() as $t
            }

            fn elem_exp(self) -> Self {
                (self as f64).exp() as $t
            }

            #[allow(unused_comparisons)]
            fn elem_sqrt(self) -> Self {
                let clamped = if self < 0 { 0 } else { self };
                (clamped as f64).sqrt() as $t
            }
        }
    };
}

macro_rules! impl_float_element {
    ($t:ty, $variant:ident) => {
        impl Element for $t {
            const DTYPE: DType = DType::$variant;
            const ZERO: Self = 0.0;
            const ONE: Self = 1.0;
            const LOWEST: Self = <$t>::NEG_INFINITY;
            const HIGHEST: Self = <$t>::INFINITY;

            fn to_repr(self) -> Repr {
                Repr::Float(self as f64)
            }

            fn from_repr(repr: Repr) -> Self {
                match repr {
                    Repr::Int(v) => v as $t,
                    Repr::Float(v) => v as $t,
                }
            }

            fn into_scalar(self) -> Scalar {
                Scalar::$variant(self)
            }

            fn to_f64(self) -> f64 {
                self as f64
            }

            #[inline(always)]
            fn elem_add(self, rhs: Self) -> Self {
                self + rhs
            }

            #[inline(always)]
            fn elem_sub(self, rhs: Self) -> Self {
                self - rhs
            }

            #[inline(always)]
            fn elem_mul(self, rhs: Self) -> Self {
                self * rhs
            }

            #[inline(always)]
            fn elem_div(self, rhs: Self) -> Self {
                self / rhs
            }

            fn elem_pow(self, exp: Self) -> Self {
                (exp * self.ln()).exp()
            }

            #[inline(always)]
            fn elem_neg(self) -> Self {
                -self
            }

            #[inline(always)]
            fn elem_abs(self) -> Self {
                self.abs()
            }

            fn elem_log(self) -> Self {
                self.ln()
            }

            fn elem_exp(self) -> Self {
                self.exp()
            }

            fn elem_sqrt(self) -> Self {
                self.sqrt()
            }
        }
    };
}

/// Exponentiation by squaring with wrapping multiplication.
fn powi<T: Element>(base: T, mut exp: u64) -> T {
    let mut result = T::ONE;
    let mut b = base;
    while exp > 0 {
        if exp & 1 == 1 {
            result = result.elem_mul(b);
        }
        exp >>= 1;
        if exp > 0 {
            b = b.elem_mul(b);
        }
    }
    result
}

impl_int_element!(i8, I8, f32, signed);
impl_int_element!(i16, I16, f32, signed);
impl_int_element!(i32, I32, f64, signed);
impl_int_element!(u8, U8, f32, unsigned);
impl_int_element!(u16, U16, f32, unsigned);
impl_int_element!(u32, U32, f64, unsigned);
impl_wide_int_element!(i64, I64, i64::wrapping_neg, i64::wrapping_abs);
impl_wide_int_element!(u64, U64, u64::wrapping_neg, |v: u64| v);
impl_float_element!(f32, F32);
impl_float_element!(f64, F64);

/// Run `$body` with `$T` bound to the element type behind a runtime dtype.
#[macro_export]
macro_rules! dispatch_dtype {
    ($dtype:expr, $T:ident => $body:expr) => {
        match $dtype {
            $crate::DType::I8 => {
                type $T = i8;
                $body
            }
            $crate::DType::I16 => {
                type $T = i16;
                $body
            }
            $crate::DType::I32 => {
                type $T = i32;
                $body
            }
            $crate::DType::I64 => {
                type $T = i64;
                $body
            }
            $crate::DType::U8 => {
                type $T = u8;
                $body
            }
            $crate::DType::U16 => {
                type $T = u16;
                $body
            }
            $crate::DType::U32 => {
                type $T = u32;
                $body
            }
            $crate::DType::U64 => {
                type $T = u64;
                $body
            }
            $crate::DType::F32 => {
                type $T = f32;
                $body
            }
            $crate::DType::F64 => {
                type $T = f64;
                $body
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dtype_metadata() {
        assert_eq!(DType::I8.size_of(), 1);
        assert_eq!(DType::U16.size_of(), 2);
        assert_eq!(DType::F32.size_of(), 4);
        assert_eq!(DType::U64.size_of(), 8);
        assert!(DType::F64.is_float());
        assert!(!DType::I32.is_float());
        assert!(DType::I64.is_signed());
        assert!(!DType::U32.is_signed());
    }

    #[test]
    fn test_dtype_tags() {
        for (i, d) in DType::ALL.iter().enumerate() {
            assert_eq!(DType::from_tag(i as u8).unwrap(), *d);
            assert_eq!(d.tag() as usize, i);
        }
        assert!(matches!(
            DType::from_tag(10),
            Err(TesseraError::InvalidType { .. })
        ));
        assert_eq!("u16".parse::<DType>().unwrap(), DType::U16);
        assert!("f16".parse::<DType>().is_err());
    }

    #[test]
    fn test_element_constants() {
        assert_eq!(<i8 as Element>::DTYPE, DType::I8);
        assert_eq!(<f64 as Element>::DTYPE, DType::F64);
        assert_eq!(<f32 as Element>::LOWEST, f32::NEG_INFINITY);
        assert_eq!(<u8 as Element>::HIGHEST, 255);
    }

    #[test]
    fn test_casts_wrap_and_truncate() {
        assert_eq!(i8::from_repr(Repr::Int(300)), 44);
        assert_eq!(u8::from_repr((-1i32).to_repr()), 255);
        assert_eq!(i64::from_repr((-128i8).to_repr()), -128);
        assert_eq!(i32::from_f64(-2.9), -2);
        assert_eq!(f32::from_repr(Repr::Int(7)), 7.0);
    }

    #[test]
    fn test_division_promotion() {
        assert_eq!(7i8.elem_div(2), 3);
        assert_eq!((-7i16).elem_div(2), -3);
        assert_eq!(100u32.elem_div(7), 14);
        assert_eq!(i64::MAX.elem_div(3), i64::MAX / 3);
        assert_eq!(5i32.elem_div(0), 0);
        // Narrow quotients wrap like every other integer cast.
        assert_eq!(i8::MIN.elem_div(-1), i8::MIN);
        assert_eq!(i16::MIN.elem_div(-1), i16::MIN);
        assert_eq!(i32::MIN.elem_div(-1), i32::MIN);
        assert_eq!(5u64.elem_div(0), 0);
        assert!((1.0f32.elem_div(0.0)).is_infinite());
    }

    #[test]
    fn test_integer_pow() {
        assert_eq!(3i32.elem_pow(4), 81);
        assert_eq!(2u8.elem_pow(9), 0);
        for base in [1i32, -1, 2] {
            assert_eq!(base.elem_pow(-1), 0);
        }
        assert_eq!(1i8.elem_pow(-3), 0);
        assert_eq!((-1i64).elem_pow(-2), 0);
        assert_eq!(2i64.elem_pow(-1), 0);
        assert_eq!(7u16.elem_pow(0), 1);
    }

    #[test]
    fn test_float_pow() {
        assert!((2.0f64.elem_pow(10.0) - 1024.0).abs() < 1e-9);
        assert!((9.0f32.elem_pow(0.5) - 3.0).abs() < 1e-5);
    }

    #[test]
    fn test_unary_integer_paths() {
        assert_eq!((-9i32).elem_sqrt(), 0);
        assert_eq!(16u8.elem_sqrt(), 4);
        assert_eq!(i8::MIN.elem_abs(), i8::MIN);
        assert_eq!((-5i64).elem_abs(), 5);
        assert_eq!(1u64.elem_neg(), u64::MAX);
        assert_eq!(1i16.elem_exp(), 2);
    }

    #[test]
    fn test_dispatch_dtype_binds_type() {
        for d in DType::ALL {
            let size = dispatch_dtype!(d, T => std::mem::size_of::<T>());
            assert_eq!(size, d.size_of());
        }
    }
}
