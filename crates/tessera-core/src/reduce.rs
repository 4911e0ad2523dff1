//! Reductions.
//!
//! Floating-point sums use pairwise summation with a fixed tree: blocks of
//! at most [`PAIRWISE_BLOCK`] elements go through eight partial
//! accumulators combined as `((r0+r1)+(r2+r3))+((r4+r5)+(r6+r7))`, larger
//! runs split at `n / 2`. Parallel execution evaluates the two halves of
//! that same tree on different threads, so results never depend on the
//! thread count.
//!
//! Axis reductions run the full-reduction routine on every fiber.

use std::borrow::Cow;

use rayon::prelude::*;
use tracing::{debug, trace};

use crate::array::{Array, ArrayBase};
use crate::config::{self, ExecConfig};
use crate::dispatch::offsets;
use crate::dtype::{DType, Element};
use crate::elementwise::same_dtype;
use crate::scalar::Scalar;
use crate::shape::Shape;
use crate::storage::{self, Storage};
use crate::{dispatch_dtype, Result, TesseraError};

pub const PAIRWISE_BLOCK: usize = 128;

// =========================================================================
// Accumulation kernels
// =========================================================================

#[inline]
fn block_sum<T: Element>(a: &[T]) -> T {
    let n8 = a.len() & !7;
    let mut r = [T::ZERO; 8];
    for chunk in a[..n8].chunks_exact(8) {
        for k in 0..8 {
            r[k] = r[k].elem_add(chunk[k]);
        }
    }
    let mut sum = (r[0].elem_add(r[1]).elem_add(r[2].elem_add(r[3])))
        .elem_add(r[4].elem_add(r[5]).elem_add(r[6].elem_add(r[7])));
    for &v in &a[n8..] {
        sum = sum.elem_add(v);
    }
    sum
}

/// Pairwise sum of `a`.
pub fn pairwise_sum<T: Element>(a: &[T]) -> T {
    if a.len() <= PAIRWISE_BLOCK {
        return block_sum(a);
    }
    let half = a.len() / 2;
    pairwise_sum(&a[..half]).elem_add(pairwise_sum(&a[half..]))
}

/// [`pairwise_sum`] with subtrees longer than `min_len` forked onto the pool.
fn pairwise_sum_par<T: Element>(a: &[T], min_len: usize) -> T {
    if a.len() <= min_len.max(PAIRWISE_BLOCK) {
        return pairwise_sum(a);
    }
    let half = a.len() / 2;
    let (l, r) = rayon::join(
        || pairwise_sum_par(&a[..half], min_len),
        || pairwise_sum_par(&a[half..], min_len),
    );
    l.elem_add(r)
}

fn sum_of<T: Element>(a: &[T], cfg: &ExecConfig) -> T {
    let size = std::mem::size_of::<T>();
    if cfg.use_parallel(a.len() * size) {
        trace!(n = a.len(), "sum: parallel");
        pairwise_sum_par(a, cfg.bytes_per_task / size)
    } else {
        pairwise_sum(a)
    }
}

fn prod_of<T: Element>(a: &[T]) -> T {
    a.iter().fold(T::ONE, |acc, &v| acc.elem_mul(v))
}

/// Eight running accumulators combined in a fixed tree, then the tail.
#[inline]
fn fold8<T: Element>(a: &[T], init: T, op: impl Fn(T, T) -> T) -> T {
    let n8 = a.len() & !7;
    let mut r = [init; 8];
    for chunk in a[..n8].chunks_exact(8) {
        for k in 0..8 {
            r[k] = op(r[k], chunk[k]);
        }
    }
    let mut acc = op(
        op(op(r[0], r[1]), op(r[2], r[3])),
        op(op(r[4], r[5]), op(r[6], r[7])),
    );
    for &v in &a[n8..] {
        acc = op(acc, v);
    }
    acc
}

#[inline(always)]
fn pick_max<T: Element>(acc: T, v: T) -> T {
    if v > acc {
        v
    } else {
        acc
    }
}

#[inline(always)]
fn pick_min<T: Element>(acc: T, v: T) -> T {
    if v < acc {
        v
    } else {
        acc
    }
}

fn max_of<T: Element>(a: &[T], cfg: &ExecConfig) -> T {
    if cfg.use_parallel(std::mem::size_of_val(a)) {
        let chunk = crate::dispatch::task_len::<T>(cfg);
        return a
            .par_chunks(chunk)
            .map(|c| fold8(c, T::LOWEST, pick_max))
            .reduce(|| T::LOWEST, pick_max);
    }
    fold8(a, T::LOWEST, pick_max)
}

fn min_of<T: Element>(a: &[T], cfg: &ExecConfig) -> T {
    if cfg.use_parallel(std::mem::size_of_val(a)) {
        let chunk = crate::dispatch::task_len::<T>(cfg);
        return a
            .par_chunks(chunk)
            .map(|c| fold8(c, T::HIGHEST, pick_min))
            .reduce(|| T::HIGHEST, pick_min);
    }
    fold8(a, T::HIGHEST, pick_min)
}

/// Index of the first element `better` prefers over every earlier one.
fn arg_of<T: Element>(a: &[T], better: impl Fn(T, T) -> bool) -> i64 {
    let mut best = 0;
    for (i, &v) in a.iter().enumerate().skip(1) {
        if better(v, a[best]) {
            best = i;
        }
    }
    best as i64
}

fn mean_of<T: Element>(a: &[T], cfg: &ExecConfig) -> f64 {
    let wide: Vec<f64> = a.iter().map(|v| v.to_f64()).collect();
    sum_of(&wide, cfg) / a.len() as f64
}

/// Population standard deviation, two passes.
fn std_of<T: Element>(a: &[T], cfg: &ExecConfig) -> f64 {
    let mean = mean_of(a, cfg);
    let sq: Vec<f64> = a
        .iter()
        .map(|v| {
            let d = v.to_f64() - mean;
            d * d
        })
        .collect();
    (sum_of(&sq, cfg) / a.len() as f64).sqrt()
}

/// The elements in logical order, borrowed when already contiguous.
fn elements<S: Storage, T: Element>(a: &ArrayBase<S>) -> Result<Cow<'_, [T]>> {
    if a.is_contiguous() {
        if let Ok(slice) = a.as_slice::<T>() {
            return Ok(Cow::Borrowed(slice));
        }
    }
    Ok(Cow::Owned(a.to_vec::<T>()?))
}

// =========================================================================
// Axis plumbing
// =========================================================================

/// Fibers along one axis: where each starts and how to step through it.
struct AxisPlan {
    out_shape: Shape,
    bases: Vec<usize>,
    stride: usize,
    len: usize,
}

impl AxisPlan {
    /// `axis` may count from the end. With `keepdim` the reduced axis stays
    /// in the output with extent 1.
    fn new<S: Storage>(
        a: &ArrayBase<S>,
        axis: isize,
        keepdim: bool,
        op: &'static str,
    ) -> Result<Self> {
        let axis = a.shape.normalize_axis(axis)?;
        let rest = a.shape.without_axis(axis);
        let mut rest_strides = a.strides.clone();
        rest_strides.remove(axis);
        let bases = offsets(rest.dims(), &rest_strides, a.offset);
        let out_shape = if keepdim {
            a.shape.with_unit_axis(axis)
        } else {
            rest
        };
        debug!(op, axis, fibers = bases.len(), len = a.dims()[axis], "axis reduction");
        Ok(Self {
            out_shape,
            bases,
            stride: a.strides[axis],
            len: a.dims()[axis],
        })
    }

    /// Apply `f` to every fiber, writing one result per fiber into `out`.
    fn run<T: Element, R: Element>(
        &self,
        bytes: &[u8],
        out: &mut Array,
        cfg: &ExecConfig,
        f: impl Fn(&[T]) -> R + Send + Sync,
    ) -> Result<()> {
        let dense = self.stride == std::mem::size_of::<T>();
        let (stride, len) = (self.stride, self.len);
        let reduce_one = |scratch: &mut Vec<T>, base: usize| -> R {
            if dense {
                // Contiguous fiber: read it in place when it is aligned.
                if let Ok(fiber) = storage::typed::<T>(bytes, base, len) {
                    return f(fiber);
                }
            }
            scratch.clear();
            scratch.extend((0..len).map(|i| storage::read::<T>(bytes, base + i * stride)));
            f(scratch)
        };

        let n = out.numel();
        let results = out.as_slice_mut::<R>()?;
        if cfg.use_parallel(self.bases.len() * len * std::mem::size_of::<T>()) {
            results
                .par_iter_mut()
                .zip(self.bases.par_iter())
                .for_each_init(
                    || Vec::with_capacity(len),
                    |scratch, (o, &base)| *o = reduce_one(scratch, base),
                );
        } else {
            let mut scratch = Vec::with_capacity(len);
            for (o, &base) in results.iter_mut().zip(&self.bases) {
                *o = reduce_one(&mut scratch, base);
            }
        }
        debug_assert_eq!(n, self.bases.len());
        Ok(())
    }
}

// =========================================================================
// Public methods
// =========================================================================

impl<S: Storage> ArrayBase<S> {
    /// Sum of all elements. Integers wrap in their own type.
    pub fn sum(&self) -> Result<Scalar> {
        let cfg = config::current();
        dispatch_dtype!(self.dtype, T => Ok(sum_of(&elements::<S, T>(self)?, &cfg).into_scalar()))
    }

    /// Product of all elements. Integers wrap in their own type.
    pub fn prod(&self) -> Result<Scalar> {
        dispatch_dtype!(self.dtype, T => Ok(prod_of(&elements::<S, T>(self)?).into_scalar()))
    }

    pub fn max(&self) -> Result<Scalar> {
        let cfg = config::current();
        dispatch_dtype!(self.dtype, T => Ok(max_of(&elements::<S, T>(self)?, &cfg).into_scalar()))
    }

    pub fn min(&self) -> Result<Scalar> {
        let cfg = config::current();
        dispatch_dtype!(self.dtype, T => Ok(min_of(&elements::<S, T>(self)?, &cfg).into_scalar()))
    }

    /// Flat row-major index of the first maximum.
    pub fn argmax(&self) -> Result<i64> {
        dispatch_dtype!(self.dtype, T => Ok(arg_of(&elements::<S, T>(self)?, |v: T, b: T| v > b)))
    }

    /// Flat row-major index of the first minimum.
    pub fn argmin(&self) -> Result<i64> {
        dispatch_dtype!(self.dtype, T => Ok(arg_of(&elements::<S, T>(self)?, |v: T, b: T| v < b)))
    }

    pub fn mean(&self) -> Result<f64> {
        let cfg = config::current();
        dispatch_dtype!(self.dtype, T => Ok(mean_of(&elements::<S, T>(self)?, &cfg)))
    }

    /// Population standard deviation.
    pub fn std(&self) -> Result<f64> {
        let cfg = config::current();
        dispatch_dtype!(self.dtype, T => Ok(std_of(&elements::<S, T>(self)?, &cfg)))
    }

    /// Inner product of two equal-length 1-D arrays of the same dtype.
    pub fn dot<B: Storage>(&self, other: &ArrayBase<B>) -> Result<Scalar> {
        let dtype = same_dtype(self.dtype, other.dtype)?;
        if self.ndim() != 1 || other.ndim() != 1 {
            return Err(TesseraError::shape(
                if self.ndim() != 1 { self.dims() } else { other.dims() },
                "dot requires 1-D operands",
            ));
        }
        if self.numel() != other.numel() {
            return Err(TesseraError::shape_mismatch(self.dims(), other.dims()));
        }
        let cfg = config::current();
        dispatch_dtype!(dtype, T => {
            let x = elements::<S, T>(self)?;
            let y = elements::<B, T>(other)?;
            let products: Vec<T> = x.iter().zip(y.iter()).map(|(&a, &b)| a.elem_mul(b)).collect();
            Ok(sum_of(&products, &cfg).into_scalar())
        })
    }

    pub fn sum_axis(&self, axis: isize, keepdim: bool) -> Result<Array> {
        self.reduce_axis_same(SameOp::Sum, axis, keepdim)
    }

    pub fn prod_axis(&self, axis: isize, keepdim: bool) -> Result<Array> {
        self.reduce_axis_same(SameOp::Prod, axis, keepdim)
    }

    pub fn max_axis(&self, axis: isize, keepdim: bool) -> Result<Array> {
        self.reduce_axis_same(SameOp::Max, axis, keepdim)
    }

    pub fn min_axis(&self, axis: isize, keepdim: bool) -> Result<Array> {
        self.reduce_axis_same(SameOp::Min, axis, keepdim)
    }

    /// Per-fiber index of the first maximum, as i64.
    pub fn argmax_axis(&self, axis: isize, keepdim: bool) -> Result<Array> {
        let plan = AxisPlan::new(self, axis, keepdim, "argmax_axis")?;
        let mut out = Array::alloc(plan.out_shape.clone(), DType::I64)?;
        let cfg = config::current();
        dispatch_dtype!(self.dtype, T => {
            plan.run::<T, i64>(self.bytes(), &mut out, &cfg, |x| arg_of(x, |v: T, b: T| v > b))
        })?;
        Ok(out)
    }

    /// Per-fiber index of the first minimum, as i64.
    pub fn argmin_axis(&self, axis: isize, keepdim: bool) -> Result<Array> {
        let plan = AxisPlan::new(self, axis, keepdim, "argmin_axis")?;
        let mut out = Array::alloc(plan.out_shape.clone(), DType::I64)?;
        let cfg = config::current();
        dispatch_dtype!(self.dtype, T => {
            plan.run::<T, i64>(self.bytes(), &mut out, &cfg, |x| arg_of(x, |v: T, b: T| v < b))
        })?;
        Ok(out)
    }

    /// Per-fiber mean, as f64.
    pub fn mean_axis(&self, axis: isize, keepdim: bool) -> Result<Array> {
        let plan = AxisPlan::new(self, axis, keepdim, "mean_axis")?;
        let mut out = Array::alloc(plan.out_shape.clone(), DType::F64)?;
        let cfg = config::current();
        let seq = ExecConfig::sequential();
        dispatch_dtype!(self.dtype, T => {
            plan.run::<T, f64>(self.bytes(), &mut out, &cfg, |x| mean_of(x, &seq))
        })?;
        Ok(out)
    }

    /// Per-fiber population standard deviation, as f64.
    pub fn std_axis(&self, axis: isize, keepdim: bool) -> Result<Array> {
        let plan = AxisPlan::new(self, axis, keepdim, "std_axis")?;
        let mut out = Array::alloc(plan.out_shape.clone(), DType::F64)?;
        let cfg = config::current();
        let seq = ExecConfig::sequential();
        dispatch_dtype!(self.dtype, T => {
            plan.run::<T, f64>(self.bytes(), &mut out, &cfg, |x| std_of(x, &seq))
        })?;
        Ok(out)
    }

    fn reduce_axis_same(&self, op: SameOp, axis: isize, keepdim: bool) -> Result<Array> {
        let plan = AxisPlan::new(self, axis, keepdim, op.name())?;
        let mut out = Array::alloc(plan.out_shape.clone(), self.dtype)?;
        let cfg = config::current();
        // Fibers already run in parallel; each one reduces sequentially.
        let seq = ExecConfig::sequential();
        dispatch_dtype!(self.dtype, T => {
            plan.run::<T, T>(self.bytes(), &mut out, &cfg, |x| op.apply(x, &seq))
        })?;
        Ok(out)
    }
}

/// Reductions whose result keeps the input dtype.
#[derive(Debug, Clone, Copy)]
enum SameOp {
    Sum,
    Prod,
    Max,
    Min,
}

impl SameOp {
    fn name(self) -> &'static str {
        match self {
            SameOp::Sum => "sum_axis",
            SameOp::Prod => "prod_axis",
            SameOp::Max => "max_axis",
            SameOp::Min => "min_axis",
        }
    }

    fn apply<T: Element>(self, a: &[T], cfg: &ExecConfig) -> T {
        match self {
            SameOp::Sum => sum_of(a, cfg),
            SameOp::Prod => prod_of(a),
            SameOp::Max => max_of(a, cfg),
            SameOp::Min => min_of(a, cfg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::with_config;
    use proptest::prelude::*;

    fn parallel_cfg() -> ExecConfig {
        ExecConfig {
            parallel: true,
            parallel_threshold_bytes: 0,
            bytes_per_task: 4096,
            ..Default::default()
        }
    }

    #[test]
    fn test_million_ones_sum_exactly() {
        let a = Array::ones(&[1_000_000], DType::F32).unwrap();
        assert_eq!(a.sum().unwrap(), Scalar::F32(1_000_000.0));
    }

    #[test]
    fn test_pairwise_beats_naive_accumulation() {
        let data = vec![0.1f32; 1_000_000];
        let naive = data.iter().fold(0.0f32, |acc, &v| acc + v);
        let pairwise = pairwise_sum(&data);
        assert!((pairwise - 100_000.0).abs() < 1.0, "pairwise = {pairwise}");
        assert!((naive - 100_000.0).abs() > (pairwise - 100_000.0).abs());
    }

    #[test]
    fn test_block_tree_order() {
        // Nine elements: eight go through the accumulators, the ninth is tail.
        let data = [1e8f32, 1.0, -1e8, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0];
        // ((1e8 + 1) + (-1e8 + 1)) loses both ones in f32.
        assert_eq!(block_sum(&data), 1.0);
    }

    #[test]
    fn test_integer_sum_is_exact() {
        for (dtype, n) in [
            (DType::I8, 15u64),
            (DType::U8, 22),
            (DType::I16, 255),
            (DType::U16, 361),
            (DType::I32, 10_000),
            (DType::U32, 10_000),
            (DType::I64, 100_000),
            (DType::U64, 100_000),
        ] {
            let a = Array::arange(1.0, (n + 1) as f64, 1.0, dtype).unwrap();
            let expected = (n * (n + 1) / 2) as f64;
            assert_eq!(a.sum().unwrap().to_f64(), expected, "{dtype}");
        }
    }

    #[test]
    fn test_integer_sum_wraps() {
        let a = Array::batch(&[3], &[100i8, 100, 100]).unwrap();
        assert_eq!(a.sum().unwrap(), Scalar::I8(300i32 as i8));
    }

    #[test]
    fn test_prod() {
        let a = Array::arange(1.0, 6.0, 1.0, DType::I32).unwrap();
        assert_eq!(a.prod().unwrap(), Scalar::I32(120));
        let f = Array::batch(&[3], &[0.5f64, 4.0, -1.0]).unwrap();
        assert_eq!(f.prod().unwrap(), Scalar::F64(-2.0));
    }

    #[test]
    fn test_min_max() {
        let data: Vec<i16> = (0..1000).map(|i| ((i * 7919) % 1009) as i16 - 500).collect();
        let a = Array::batch(&[1000], &data).unwrap();
        assert_eq!(a.max().unwrap(), Scalar::I16(*data.iter().max().unwrap()));
        assert_eq!(a.min().unwrap(), Scalar::I16(*data.iter().min().unwrap()));

        let f = Array::batch(&[5], &[-3.0f32, -1.0, -7.5, -2.0, -1.5]).unwrap();
        assert_eq!(f.max().unwrap(), Scalar::F32(-1.0));
        assert_eq!(f.min().unwrap(), Scalar::F32(-7.5));
    }

    #[test]
    fn test_argmax_first_occurrence() {
        let a = Array::batch(&[4], &[3i32, 5, 5, 1]).unwrap();
        assert_eq!(a.argmax().unwrap(), 1);
        assert_eq!(a.argmin().unwrap(), 3);
        let b = Array::batch(&[3], &[2.0f64, 2.0, 2.0]).unwrap();
        assert_eq!(b.argmax().unwrap(), 0);
        assert_eq!(b.argmin().unwrap(), 0);
    }

    #[test]
    fn test_mean_and_std() {
        let a = Array::batch(&[8], &[2u8, 4, 4, 4, 5, 5, 7, 9]).unwrap();
        assert_eq!(a.mean().unwrap(), 5.0);
        assert_eq!(a.std().unwrap(), 2.0);
        let single = Array::batch(&[1], &[3.5f32]).unwrap();
        assert_eq!(single.std().unwrap(), 0.0);
    }

    #[test]
    fn test_mean_does_not_overflow_small_ints() {
        let a = Array::full(&[1000], DType::U8, 200u8).unwrap();
        assert_eq!(a.mean().unwrap(), 200.0);
    }

    #[test]
    fn test_reductions_on_strided_view() {
        let a = Array::arange(0.0, 20.0, 1.0, DType::F64).unwrap();
        let evens = a.slice(&[0], &[20], &[2]).unwrap();
        assert_eq!(evens.sum().unwrap(), Scalar::F64(90.0));
        assert_eq!(evens.max().unwrap(), Scalar::F64(18.0));
        assert_eq!(evens.argmax().unwrap(), 9);
        assert_eq!(evens.mean().unwrap(), 9.0);
    }

    #[test]
    fn test_dot() {
        let a = Array::batch(&[3], &[1.0f32, 2.0, 3.0]).unwrap();
        let b = Array::batch(&[3], &[4.0f32, 5.0, 6.0]).unwrap();
        assert_eq!(a.dot(&b).unwrap(), Scalar::F32(32.0));

        let c = Array::batch(&[2], &[1.0f32, 2.0]).unwrap();
        assert!(matches!(a.dot(&c), Err(TesseraError::ShapeMismatch { .. })));
        let d = Array::batch(&[3], &[1i32, 2, 3]).unwrap();
        assert!(matches!(a.dot(&d), Err(TesseraError::DTypeMismatch { .. })));
        let m = Array::zeros(&[3, 1], DType::F32).unwrap();
        assert!(matches!(a.dot(&m), Err(TesseraError::InvalidShape { .. })));
    }

    #[test]
    fn test_axis_reductions() {
        let a = Array::batch(&[2, 3], &[1i32, 2, 3, 4, 5, 6]).unwrap();

        let s0 = a.sum_axis(0, false).unwrap();
        assert_eq!(s0.dims(), &[3]);
        assert_eq!(s0.to_vec::<i32>().unwrap(), vec![5, 7, 9]);
        let s1 = a.sum_axis(1, false).unwrap();
        assert_eq!(s1.to_vec::<i32>().unwrap(), vec![6, 15]);

        assert_eq!(a.prod_axis(1, false).unwrap().to_vec::<i32>().unwrap(), vec![6, 120]);
        assert_eq!(a.max_axis(0, false).unwrap().to_vec::<i32>().unwrap(), vec![4, 5, 6]);
        assert_eq!(a.min_axis(1, false).unwrap().to_vec::<i32>().unwrap(), vec![1, 4]);

        let am = a.argmax_axis(1, false).unwrap();
        assert_eq!(am.dtype(), DType::I64);
        assert_eq!(am.to_vec::<i64>().unwrap(), vec![2, 2]);
        assert_eq!(a.argmin_axis(0, false).unwrap().to_vec::<i64>().unwrap(), vec![0, 0, 0]);

        let mean = a.mean_axis(0, false).unwrap();
        assert_eq!(mean.dtype(), DType::F64);
        assert_eq!(mean.to_vec::<f64>().unwrap(), vec![2.5, 3.5, 4.5]);
        assert_eq!(a.std_axis(0, false).unwrap().to_vec::<f64>().unwrap(), vec![1.5; 3]);
    }

    #[test]
    fn test_axis_reduction_of_vector_is_rank_zero() {
        let a = Array::batch(&[4], &[1.0f64, 2.0, 3.0, 4.0]).unwrap();
        let s = a.sum_axis(0, false).unwrap();
        assert_eq!(s.ndim(), 0);
        assert_eq!(s.numel(), 1);
        assert_eq!(s.get::<f64>(&[]).unwrap(), 10.0);
    }

    #[test]
    fn test_axis_reduction_on_transposed() {
        let mut a = Array::batch(&[2, 3], &[1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        a.transpose(&[1, 0]).unwrap();
        let s = a.sum_axis(1, false).unwrap();
        assert_eq!(s.to_vec::<f32>().unwrap(), vec![5.0, 7.0, 9.0]);
    }

    #[test]
    fn test_invalid_axis() {
        let a = Array::zeros(&[2, 3], DType::F32).unwrap();
        assert_eq!(
            a.sum_axis(2, false).unwrap_err(),
            TesseraError::InvalidAxis { axis: 2, ndim: 2 }
        );
        assert_eq!(
            a.mean_axis(-3, true).unwrap_err(),
            TesseraError::InvalidAxis { axis: 3, ndim: 2 }
        );
    }

    #[test]
    fn test_keepdim_keeps_unit_axis() {
        let a = Array::batch(&[2, 3], &[1i32, 2, 3, 4, 5, 6]).unwrap();

        let s0 = a.sum_axis(0, true).unwrap();
        assert_eq!(s0.dims(), &[1, 3]);
        assert_eq!(s0.to_vec::<i32>().unwrap(), vec![5, 7, 9]);

        let s1 = a.sum_axis(1, true).unwrap();
        assert_eq!(s1.dims(), &[2, 1]);
        assert_eq!(s1.get::<i32>(&[1, 0]).unwrap(), 15);

        let am = a.argmax_axis(1, true).unwrap();
        assert_eq!(am.dims(), &[2, 1]);
        assert_eq!(am.to_vec::<i64>().unwrap(), vec![2, 2]);

        let mean = a.mean_axis(0, true).unwrap();
        assert_eq!(mean.dims(), &[1, 3]);
        assert_eq!(mean.to_vec::<f64>().unwrap(), vec![2.5, 3.5, 4.5]);

        // The kept axis broadcasts back against the input.
        let centered = a.sub_new(&a.min_axis(1, true).unwrap()).unwrap();
        assert_eq!(centered.to_vec::<i32>().unwrap(), vec![0, 1, 2, 0, 1, 2]);

        let v = Array::batch(&[4], &[1.0f64, 2.0, 3.0, 4.0]).unwrap();
        let kept = v.sum_axis(0, true).unwrap();
        assert_eq!(kept.dims(), &[1]);
        assert_eq!(kept.to_vec::<f64>().unwrap(), vec![10.0]);
    }

    #[test]
    fn test_negative_axis_counts_from_end() {
        let a = Array::batch(&[2, 3], &[1i32, 2, 3, 4, 5, 6]).unwrap();
        assert_eq!(
            a.sum_axis(-1, false).unwrap().to_vec::<i32>().unwrap(),
            a.sum_axis(1, false).unwrap().to_vec::<i32>().unwrap()
        );
        assert_eq!(a.max_axis(-2, true).unwrap().dims(), &[1, 3]);
    }

    #[test]
    fn test_parallel_axis_matches_sequential() {
        let a = Array::randn(&[64, 300]).unwrap();
        let seq = with_config(ExecConfig::sequential(), || a.sum_axis(1, false).unwrap()).unwrap();
        let par = with_config(parallel_cfg(), || a.sum_axis(1, false).unwrap()).unwrap();
        assert_eq!(seq.to_vec::<f32>().unwrap(), par.to_vec::<f32>().unwrap());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_parallel_sum_is_bitwise_sequential(
            data in prop::collection::vec(-1e6f32..1e6, 1..20_000)
        ) {
            let a = Array::batch(&[data.len()], &data).unwrap();
            let seq = with_config(ExecConfig::sequential(), || a.sum().unwrap()).unwrap();
            let par = with_config(parallel_cfg(), || a.sum().unwrap()).unwrap();
            prop_assert_eq!(seq.to_f64().to_bits(), par.to_f64().to_bits());
            let mx_seq = with_config(ExecConfig::sequential(), || a.max().unwrap()).unwrap();
            let mx_par = with_config(parallel_cfg(), || a.max().unwrap()).unwrap();
            prop_assert_eq!(mx_seq, mx_par);
        }
    }
}
