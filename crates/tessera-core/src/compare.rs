//! Comparisons between arrays.

use crate::array::{Array, ArrayBase};
use crate::dispatch::for_each_offset;
use crate::dtype::{Element, Repr};
use crate::elementwise::{binary_into, binary_new, same_dtype, BinaryKernel};
use crate::storage::{self, Storage, StorageMut};
use crate::{dispatch_dtype, Result, TesseraError};

pub const DEFAULT_RTOL: f64 = 1e-5;
pub const DEFAULT_ATOL: f64 = 1e-8;

/// `1` where the operands are equal, `0` elsewhere, in the operand dtype.
pub struct Equal;

impl BinaryKernel for Equal {
    const NAME: &'static str = "equal";

    #[inline(always)]
    fn apply<T: Element>(a: T, b: T) -> T {
        if a == b {
            T::ONE
        } else {
            T::ZERO
        }
    }
}

/// `|a - b| <= atol + rtol * |b|`. Integers take the difference exactly.
/// With both tolerances zero the values must match bit for bit, so `0.0`
/// and `-0.0` differ.
#[inline]
fn close<T: Element>(a: T, b: T, rtol: f64, atol: f64) -> bool {
    if rtol == 0.0 && atol == 0.0 {
        return a == b && bytemuck::bytes_of(&a) == bytemuck::bytes_of(&b);
    }
    let (diff, magnitude) = match (a.to_repr(), b.to_repr()) {
        (Repr::Int(x), Repr::Int(y)) => ((x - y).unsigned_abs() as f64, y.unsigned_abs() as f64),
        _ => {
            let (x, y) = (a.to_f64(), b.to_f64());
            ((x - y).abs(), y.abs())
        }
    };
    // NaN compares false here, so it is never close.
    diff <= atol + rtol * magnitude
}

/// Whether every element of `a` is within tolerance of the matching element
/// of `b`. The operands need the same dtype and shape; no broadcasting.
pub fn allclose<A: Storage, B: Storage>(
    a: &ArrayBase<A>,
    b: &ArrayBase<B>,
    rtol: f64,
    atol: f64,
) -> Result<bool> {
    let dtype = same_dtype(a.dtype(), b.dtype())?;
    if a.dims() != b.dims() {
        return Err(TesseraError::shape_mismatch(a.dims(), b.dims()));
    }
    if !(rtol >= 0.0 && atol >= 0.0) {
        return Err(TesseraError::argument(format!(
            "allclose: tolerances must be non-negative, got rtol={rtol} atol={atol}"
        )));
    }
    let (x, y) = (a.bytes(), b.bytes());
    let mut all = true;
    dispatch_dtype!(dtype, T => {
        for_each_offset(
            a.dims(),
            [a.strides(), b.strides()],
            [a.offset(), b.offset()],
            |[i, j]| {
                if all && !close(storage::read::<T>(x, i), storage::read::<T>(y, j), rtol, atol) {
                    all = false;
                }
            },
        );
    });
    Ok(all)
}

impl<S: Storage> ArrayBase<S> {
    /// Elementwise equality into `out`, with broadcasting.
    pub fn equal<B: Storage, O: StorageMut>(
        &self,
        other: &ArrayBase<B>,
        out: &mut ArrayBase<O>,
    ) -> Result<()> {
        binary_into::<Equal, _, _, _>(self, other, out)
    }

    pub fn equal_new<B: Storage>(&self, other: &ArrayBase<B>) -> Result<Array> {
        binary_new::<Equal, _, _>(self, other)
    }

    /// [`allclose`] with [`DEFAULT_RTOL`] and [`DEFAULT_ATOL`].
    pub fn allclose<B: Storage>(&self, other: &ArrayBase<B>) -> Result<bool> {
        allclose(self, other, DEFAULT_RTOL, DEFAULT_ATOL)
    }
}
