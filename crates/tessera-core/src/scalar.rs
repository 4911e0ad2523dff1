use std::fmt;

use crate::dtype::{DType, Element, Repr};

/// A single dtype-tagged value.
///
/// Full reductions that keep the input dtype return a `Scalar`, and scalar
/// operands (`add_scalar`, `full`, ...) are accepted as `impl Into<Scalar>`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
}

macro_rules! scalar_match {
    ($s:expr, $v:ident => $body:expr) => {
        match $s {
            Scalar::I8($v) => $body,
            Scalar::I16($v) => $body,
            Scalar::I32($v) => $body,
            Scalar::I64($v) => $body,
            Scalar::U8($v) => $body,
            Scalar::U16($v) => $body,
            Scalar::U32($v) => $body,
            Scalar::U64($v) => $body,
            Scalar::F32($v) => $body,
            Scalar::F64($v) => $body,
        }
    };
}

impl Scalar {
    pub fn dtype(&self) -> DType {
        scalar_match!(*self, v => element_dtype(v))
    }

    pub fn to_f64(&self) -> f64 {
        scalar_match!(*self, v => v.to_f64())
    }

    pub fn to_repr(&self) -> Repr {
        scalar_match!(*self, v => v.to_repr())
    }

    /// Convert to `T` with the same rules as `Array::astype`.
    pub fn cast<T: Element>(&self) -> T {
        T::from_repr(self.to_repr())
    }

    pub fn cast_to(&self, dtype: DType) -> Scalar {
        crate::dispatch_dtype!(dtype, T => self.cast::<T>().into_scalar())
    }

    /// The value as `T`, only if `T` is exactly this scalar's dtype.
    pub fn get<T: Element>(&self) -> Option<T> {
        if self.dtype() == T::DTYPE {
            Some(self.cast::<T>())
        } else {
            None
        }
    }
}

fn element_dtype<T: Element>(_: T) -> DType {
    T::DTYPE
}

macro_rules! impl_scalar_from {
    ($($t:ty => $variant:ident),*) => {
        $(
            impl From<$t> for Scalar {
                fn from(v: $t) -> Self {
                    Scalar::$variant(v)
                }
            }
        )*
    };
}

impl_scalar_from!(
    i8 => I8, i16 => I16, i32 => I32, i64 => I64,
    u8 => U8, u16 => U16, u32 => U32, u64 => U64,
    f32 => F32, f64 => F64
);

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        scalar_match!(*self, v => write!(f, "{v}"))
    }
}
