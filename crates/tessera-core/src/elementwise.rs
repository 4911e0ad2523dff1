//! Element-wise arithmetic.
//!
//! Every op comes in an allocating form writing into a caller-supplied
//! output (`a.add(&b, &mut out)`), a form returning a fresh array
//! (`a.add_new(&b)`), and an in-place form on owning contiguous arrays
//! (`a.add_inplace(&b)`). All validation happens before any write.

use rayon::prelude::*;
use tracing::{debug, trace};

use crate::array::{Array, ArrayBase};
use crate::config::{self, ExecConfig};
use crate::dispatch::{for_each_offset, lanes, select_path, task_len, KernelPath};
use crate::dtype::{DType, Element};
use crate::scalar::Scalar;
use crate::shape::{broadcast_shapes, broadcast_strides, Shape, Strides};
use crate::storage::{self, Storage, StorageMut};
use crate::{dispatch_dtype, Result, TesseraError};

// =========================================================================
// Kernels
// =========================================================================

pub trait BinaryKernel {
    const NAME: &'static str;

    fn apply<T: Element>(a: T, b: T) -> T;

    fn supports(_dtype: DType) -> bool {
        true
    }

    fn vectorizable(_dtype: DType) -> bool {
        true
    }
}

pub trait UnaryKernel {
    const NAME: &'static str;

    fn apply<T: Element>(a: T) -> T;

    fn supports(_dtype: DType) -> bool {
        true
    }
}

pub struct Add;
pub struct Sub;
pub struct Mul;
pub struct Div;
pub struct Pow;
pub struct Maximum;
pub struct Minimum;

impl BinaryKernel for Add {
    const NAME: &'static str = "add";

    #[inline(always)]
    fn apply<T: Element>(a: T, b: T) -> T {
        a.elem_add(b)
    }
}

impl BinaryKernel for Sub {
    const NAME: &'static str = "sub";

    #[inline(always)]
    fn apply<T: Element>(a: T, b: T) -> T {
        a.elem_sub(b)
    }
}

impl BinaryKernel for Mul {
    const NAME: &'static str = "mul";

    #[inline(always)]
    fn apply<T: Element>(a: T, b: T) -> T {
        a.elem_mul(b)
    }
}

impl BinaryKernel for Div {
    const NAME: &'static str = "div";

    #[inline(always)]
    fn apply<T: Element>(a: T, b: T) -> T {
        a.elem_div(b)
    }

    // 64-bit integers have no exact float promotion; they divide one by one.
    fn vectorizable(dtype: DType) -> bool {
        !matches!(dtype, DType::I64 | DType::U64)
    }
}

impl BinaryKernel for Pow {
    const NAME: &'static str = "pow";

    fn apply<T: Element>(a: T, b: T) -> T {
        a.elem_pow(b)
    }

    fn vectorizable(dtype: DType) -> bool {
        dtype.is_float()
    }
}

impl BinaryKernel for Maximum {
    const NAME: &'static str = "maximum";

    #[inline(always)]
    fn apply<T: Element>(a: T, b: T) -> T {
        if b > a {
            b
        } else {
            a
        }
    }
}

impl BinaryKernel for Minimum {
    const NAME: &'static str = "minimum";

    #[inline(always)]
    fn apply<T: Element>(a: T, b: T) -> T {
        if b < a {
            b
        } else {
            a
        }
    }
}

pub struct Neg;
pub struct Abs;
pub struct Log;
pub struct Exp;
pub struct Sqrt;

impl UnaryKernel for Neg {
    const NAME: &'static str = "neg";

    #[inline(always)]
    fn apply<T: Element>(a: T) -> T {
        a.elem_neg()
    }
}

impl UnaryKernel for Abs {
    const NAME: &'static str = "abs";

    #[inline(always)]
    fn apply<T: Element>(a: T) -> T {
        a.elem_abs()
    }

    fn supports(dtype: DType) -> bool {
        dtype.is_signed()
    }
}

impl UnaryKernel for Log {
    const NAME: &'static str = "log";

    fn apply<T: Element>(a: T) -> T {
        a.elem_log()
    }
}

impl UnaryKernel for Exp {
    const NAME: &'static str = "exp";

    fn apply<T: Element>(a: T) -> T {
        a.elem_exp()
    }
}

impl UnaryKernel for Sqrt {
    const NAME: &'static str = "sqrt";

    fn apply<T: Element>(a: T) -> T {
        a.elem_sqrt()
    }
}

// =========================================================================
// Plans
// =========================================================================

/// A validated read-only operand laid out against the iteration shape.
struct Operand {
    strides: Strides,
    offset: usize,
}

/// Everything an executor needs once validation has passed.
struct Plan {
    path: KernelPath,
    shape: Shape,
    inputs: Vec<Operand>,
    out: Operand,
}

impl Plan {
    fn numel(&self) -> usize {
        self.shape.numel()
    }
}

pub(crate) fn same_dtype(expected: DType, got: DType) -> Result<DType> {
    if expected != got {
        return Err(TesseraError::DTypeMismatch { expected, got });
    }
    Ok(expected)
}

fn check_supported(op: &'static str, supported: bool, dtype: DType) -> Result<()> {
    if !supported {
        return Err(TesseraError::UnsupportedDType { op, dtype });
    }
    Ok(())
}

fn plan_binary<A: Storage, B: Storage, O: StorageMut>(
    op: &'static str,
    vectorizable: bool,
    a: &ArrayBase<A>,
    b: &ArrayBase<B>,
    out: &ArrayBase<O>,
) -> Result<Plan> {
    same_dtype(a.dtype, b.dtype)?;
    same_dtype(a.dtype, out.dtype)?;
    let shape = broadcast_shapes(&a.shape, &b.shape)?;
    if out.shape != shape {
        return Err(TesseraError::shape_mismatch(shape.dims(), out.dims()));
    }
    let dense = a.shape == shape
        && b.shape == shape
        && a.is_contiguous()
        && b.is_contiguous()
        && out.is_contiguous();
    let path = select_path(dense, vectorizable);
    debug!(op, dtype = %a.dtype, %path, numel = shape.numel(), "binary");
    Ok(Plan {
        path,
        inputs: vec![
            Operand {
                strides: broadcast_strides(&a.shape, &a.strides, &shape)?,
                offset: a.offset,
            },
            Operand {
                strides: broadcast_strides(&b.shape, &b.strides, &shape)?,
                offset: b.offset,
            },
        ],
        out: Operand {
            strides: out.strides.clone(),
            offset: out.offset,
        },
        shape,
    })
}

fn plan_unary<A: Storage, O: StorageMut>(
    op: &'static str,
    vectorizable: bool,
    a: &ArrayBase<A>,
    out: &ArrayBase<O>,
) -> Result<Plan> {
    same_dtype(a.dtype, out.dtype)?;
    if out.shape != a.shape {
        return Err(TesseraError::shape_mismatch(a.dims(), out.dims()));
    }
    let path = select_path(a.is_contiguous() && out.is_contiguous(), vectorizable);
    debug!(op, dtype = %a.dtype, %path, numel = a.numel(), "unary");
    Ok(Plan {
        path,
        shape: a.shape.clone(),
        inputs: vec![Operand {
            strides: a.strides.clone(),
            offset: a.offset,
        }],
        out: Operand {
            strides: out.strides.clone(),
            offset: out.offset,
        },
    })
}

/// In-place plans write over `target` itself, which must be contiguous;
/// `other`, if any, is broadcast to the target's shape.
fn plan_inplace<B: Storage>(
    op: &'static str,
    vectorizable: bool,
    target: &Array,
    other: Option<&ArrayBase<B>>,
) -> Result<Plan> {
    if !target.is_contiguous() {
        return Err(TesseraError::argument(format!(
            "{op}: in-place operations require a contiguous array"
        )));
    }
    let mut inputs = Vec::new();
    let mut dense = true;
    if let Some(b) = other {
        same_dtype(target.dtype, b.dtype)?;
        let shape = broadcast_shapes(&target.shape, &b.shape)?;
        if shape != target.shape {
            return Err(TesseraError::shape_mismatch(target.dims(), shape.dims()));
        }
        dense = b.shape == target.shape && b.is_contiguous();
        inputs.push(Operand {
            strides: broadcast_strides(&b.shape, &b.strides, &target.shape)?,
            offset: b.offset,
        });
    }
    let path = select_path(dense, vectorizable);
    debug!(op, dtype = %target.dtype, %path, numel = target.numel(), "in-place");
    Ok(Plan {
        path,
        shape: target.shape.clone(),
        inputs,
        out: Operand {
            strides: target.strides.clone(),
            offset: target.offset,
        },
    })
}

// =========================================================================
// Executors
// =========================================================================

fn exec_zip<T: Element>(
    plan: &Plan,
    a: &[u8],
    b: &[u8],
    out: &mut [u8],
    cfg: &ExecConfig,
    f: impl Fn(T, T) -> T + Send + Sync + Copy,
) -> Result<()> {
    let (pa, pb, po) = (&plan.inputs[0], &plan.inputs[1], &plan.out);
    let n = plan.numel();
    match plan.path {
        KernelPath::Strided => {
            for_each_offset(
                plan.shape.dims(),
                [&pa.strides[..], &pb.strides[..], &po.strides[..]],
                [pa.offset, pb.offset, po.offset],
                |[i, j, k]| storage::write(out, k, f(storage::read(a, i), storage::read(b, j))),
            );
        }
        KernelPath::Vectorized => {
            let x = storage::typed::<T>(a, pa.offset, n)?;
            let y = storage::typed::<T>(b, pb.offset, n)?;
            let o = storage::typed_mut::<T>(out, po.offset, n)?;
            if cfg.use_parallel(3 * n * std::mem::size_of::<T>()) {
                let chunk = task_len::<T>(cfg);
                trace!(chunk, "zip: parallel");
                o.par_chunks_mut(chunk)
                    .zip(x.par_chunks(chunk))
                    .zip(y.par_chunks(chunk))
                    .for_each(|((o, x), y)| zip_blocks(x, y, o, f));
            } else {
                zip_blocks(x, y, o, f);
            }
        }
        KernelPath::Scalar => {
            let x = storage::typed::<T>(a, pa.offset, n)?;
            let y = storage::typed::<T>(b, pb.offset, n)?;
            let o = storage::typed_mut::<T>(out, po.offset, n)?;
            for ((o, &x), &y) in o.iter_mut().zip(x).zip(y) {
                *o = f(x, y);
            }
        }
    }
    Ok(())
}

/// Vector-width blocks, then a scalar tail.
#[inline]
fn zip_blocks<T: Element>(a: &[T], b: &[T], out: &mut [T], f: impl Fn(T, T) -> T) {
    let lanes = lanes::<T>();
    let split = out.len() - out.len() % lanes;
    let (head, tail) = out.split_at_mut(split);
    for ((o, x), y) in head
        .chunks_exact_mut(lanes)
        .zip(a.chunks_exact(lanes))
        .zip(b.chunks_exact(lanes))
    {
        for i in 0..lanes {
            o[i] = f(x[i], y[i]);
        }
    }
    for ((o, &x), &y) in tail.iter_mut().zip(&a[split..]).zip(&b[split..]) {
        *o = f(x, y);
    }
}

fn exec_map<T: Element>(
    plan: &Plan,
    a: &[u8],
    out: &mut [u8],
    cfg: &ExecConfig,
    f: impl Fn(T) -> T + Send + Sync + Copy,
) -> Result<()> {
    let (pa, po) = (&plan.inputs[0], &plan.out);
    let n = plan.numel();
    match plan.path {
        KernelPath::Strided => {
            for_each_offset(
                plan.shape.dims(),
                [&pa.strides[..], &po.strides[..]],
                [pa.offset, po.offset],
                |[i, k]| storage::write(out, k, f(storage::read(a, i))),
            );
        }
        KernelPath::Vectorized => {
            let x = storage::typed::<T>(a, pa.offset, n)?;
            let o = storage::typed_mut::<T>(out, po.offset, n)?;
            if cfg.use_parallel(2 * n * std::mem::size_of::<T>()) {
                let chunk = task_len::<T>(cfg);
                trace!(chunk, "map: parallel");
                o.par_chunks_mut(chunk)
                    .zip(x.par_chunks(chunk))
                    .for_each(|(o, x)| map_blocks(x, o, f));
            } else {
                map_blocks(x, o, f);
            }
        }
        KernelPath::Scalar => {
            let x = storage::typed::<T>(a, pa.offset, n)?;
            let o = storage::typed_mut::<T>(out, po.offset, n)?;
            for (o, &x) in o.iter_mut().zip(x) {
                *o = f(x);
            }
        }
    }
    Ok(())
}

#[inline]
fn map_blocks<T: Element>(a: &[T], out: &mut [T], f: impl Fn(T) -> T) {
    let lanes = lanes::<T>();
    let split = out.len() - out.len() % lanes;
    let (head, tail) = out.split_at_mut(split);
    for (o, x) in head.chunks_exact_mut(lanes).zip(a.chunks_exact(lanes)) {
        for i in 0..lanes {
            o[i] = f(x[i]);
        }
    }
    for (o, &x) in tail.iter_mut().zip(&a[split..]) {
        *o = f(x);
    }
}

/// `target[i] = f(target[i], other[i])` over a contiguous target.
fn exec_zip_inplace<T: Element>(
    plan: &Plan,
    target: &mut [u8],
    other: &[u8],
    cfg: &ExecConfig,
    f: impl Fn(T, T) -> T + Send + Sync + Copy,
) -> Result<()> {
    let (pb, po) = (&plan.inputs[0], &plan.out);
    let n = plan.numel();
    let t = storage::typed_mut::<T>(target, po.offset, n)?;
    match plan.path {
        KernelPath::Strided => {
            let mut i = 0;
            for_each_offset(plan.shape.dims(), [&pb.strides[..]], [pb.offset], |[j]| {
                t[i] = f(t[i], storage::read(other, j));
                i += 1;
            });
        }
        KernelPath::Vectorized => {
            let y = storage::typed::<T>(other, pb.offset, n)?;
            if cfg.use_parallel(2 * n * std::mem::size_of::<T>()) {
                let chunk = task_len::<T>(cfg);
                t.par_chunks_mut(chunk)
                    .zip(y.par_chunks(chunk))
                    .for_each(|(t, y)| zip_blocks_inplace(t, y, f));
            } else {
                zip_blocks_inplace(t, y, f);
            }
        }
        KernelPath::Scalar => {
            let y = storage::typed::<T>(other, pb.offset, n)?;
            for (t, &y) in t.iter_mut().zip(y) {
                *t = f(*t, y);
            }
        }
    }
    Ok(())
}

#[inline]
fn zip_blocks_inplace<T: Element>(t: &mut [T], b: &[T], f: impl Fn(T, T) -> T) {
    let lanes = lanes::<T>();
    let split = t.len() - t.len() % lanes;
    let (head, tail) = t.split_at_mut(split);
    for (o, y) in head.chunks_exact_mut(lanes).zip(b.chunks_exact(lanes)) {
        for i in 0..lanes {
            o[i] = f(o[i], y[i]);
        }
    }
    for (o, &y) in tail.iter_mut().zip(&b[split..]) {
        *o = f(*o, y);
    }
}

/// `target[i] = f(target[i])` over a contiguous target.
fn exec_map_inplace<T: Element>(
    plan: &Plan,
    target: &mut [u8],
    cfg: &ExecConfig,
    f: impl Fn(T) -> T + Send + Sync + Copy,
) -> Result<()> {
    let n = plan.numel();
    let t = storage::typed_mut::<T>(target, plan.out.offset, n)?;
    let apply = |t: &mut [T]| t.iter_mut().for_each(|v| *v = f(*v));
    if plan.path == KernelPath::Vectorized && cfg.use_parallel(n * std::mem::size_of::<T>()) {
        t.par_chunks_mut(task_len::<T>(cfg)).for_each(apply);
    } else {
        apply(t);
    }
    Ok(())
}

// =========================================================================
// Generic entry points
// =========================================================================

pub(crate) fn binary_into<K: BinaryKernel, A: Storage, B: Storage, O: StorageMut>(
    a: &ArrayBase<A>,
    b: &ArrayBase<B>,
    out: &mut ArrayBase<O>,
) -> Result<()> {
    check_supported(K::NAME, K::supports(a.dtype), a.dtype)?;
    let plan = plan_binary(K::NAME, K::vectorizable(a.dtype), a, b, out)?;
    let cfg = config::current();
    let (x, y) = (a.bytes(), b.bytes());
    let o = out.bytes_mut();
    dispatch_dtype!(a.dtype, T => exec_zip::<T>(&plan, x, y, o, &cfg, K::apply::<T>))
}

pub(crate) fn binary_new<K: BinaryKernel, A: Storage, B: Storage>(
    a: &ArrayBase<A>,
    b: &ArrayBase<B>,
) -> Result<Array> {
    same_dtype(a.dtype, b.dtype)?;
    let shape = broadcast_shapes(&a.shape, &b.shape)?;
    let mut out = Array::alloc(shape, a.dtype)?;
    binary_into::<K, _, _, _>(a, b, &mut out)?;
    Ok(out)
}

fn binary_inplace<K: BinaryKernel, B: Storage>(target: &mut Array, other: &ArrayBase<B>) -> Result<()> {
    let dtype = target.dtype;
    check_supported(K::NAME, K::supports(dtype), dtype)?;
    let plan = plan_inplace(K::NAME, K::vectorizable(dtype), target, Some(other))?;
    let cfg = config::current();
    let y = other.bytes();
    let t = target.bytes_mut();
    dispatch_dtype!(dtype, T => exec_zip_inplace::<T>(&plan, t, y, &cfg, K::apply::<T>))
}

fn scalar_into<K: BinaryKernel, A: Storage, O: StorageMut>(
    a: &ArrayBase<A>,
    s: Scalar,
    out: &mut ArrayBase<O>,
) -> Result<()> {
    check_supported(K::NAME, K::supports(a.dtype), a.dtype)?;
    let plan = plan_unary(K::NAME, K::vectorizable(a.dtype), a, out)?;
    let cfg = config::current();
    let x = a.bytes();
    let o = out.bytes_mut();
    dispatch_dtype!(a.dtype, T => {
        let s: T = s.cast();
        exec_map::<T>(&plan, x, o, &cfg, move |v| K::apply(v, s))
    })
}

fn scalar_inplace<K: BinaryKernel>(target: &mut Array, s: Scalar) -> Result<()> {
    let dtype = target.dtype;
    check_supported(K::NAME, K::supports(dtype), dtype)?;
    let plan = plan_inplace::<&[u8]>(K::NAME, K::vectorizable(dtype), target, None)?;
    let cfg = config::current();
    let t = target.bytes_mut();
    dispatch_dtype!(dtype, T => {
        let s: T = s.cast();
        exec_map_inplace::<T>(&plan, t, &cfg, move |v| K::apply(v, s))
    })
}

fn unary_into<K: UnaryKernel, A: Storage, O: StorageMut>(
    a: &ArrayBase<A>,
    out: &mut ArrayBase<O>,
) -> Result<()> {
    check_supported(K::NAME, K::supports(a.dtype), a.dtype)?;
    let plan = plan_unary(K::NAME, true, a, out)?;
    let cfg = config::current();
    let x = a.bytes();
    let o = out.bytes_mut();
    dispatch_dtype!(a.dtype, T => exec_map::<T>(&plan, x, o, &cfg, K::apply::<T>))
}

fn unary_inplace<K: UnaryKernel>(target: &mut Array) -> Result<()> {
    let dtype = target.dtype;
    check_supported(K::NAME, K::supports(dtype), dtype)?;
    let plan = plan_inplace::<&[u8]>(K::NAME, true, target, None)?;
    let cfg = config::current();
    let t = target.bytes_mut();
    dispatch_dtype!(dtype, T => exec_map_inplace::<T>(&plan, t, &cfg, K::apply::<T>))
}

fn clip_bounds(min: f64, max: f64) -> Result<()> {
    if min.is_nan() || max.is_nan() || min > max {
        return Err(TesseraError::argument(format!(
            "clip: invalid bounds [{min}, {max}]"
        )));
    }
    Ok(())
}

#[inline(always)]
fn clamp<T: Element>(v: T, lo: T, hi: T) -> T {
    if v < lo {
        lo
    } else if v > hi {
        hi
    } else {
        v
    }
}

// =========================================================================
// Public methods
// =========================================================================

macro_rules! binary_ops {
    ($($kernel:ty => $name:ident, $new:ident, $inplace:ident, $scalar:ident, $scalar_inplace:ident;)*) => {
        impl<S: Storage> ArrayBase<S> {
            $(
                #[doc = concat!("Element-wise `", stringify!($name), "` with broadcasting into `out`.")]
                pub fn $name<B: Storage, O: StorageMut>(
                    &self,
                    other: &ArrayBase<B>,
                    out: &mut ArrayBase<O>,
                ) -> Result<()> {
                    binary_into::<$kernel, _, _, _>(self, other, out)
                }

                pub fn $new<B: Storage>(&self, other: &ArrayBase<B>) -> Result<Array> {
                    binary_new::<$kernel, _, _>(self, other)
                }

                pub fn $scalar<O: StorageMut>(
                    &self,
                    value: impl Into<Scalar>,
                    out: &mut ArrayBase<O>,
                ) -> Result<()> {
                    scalar_into::<$kernel, _, _>(self, value.into(), out)
                }
            )*
        }

        impl Array {
            $(
                pub fn $inplace<B: Storage>(&mut self, other: &ArrayBase<B>) -> Result<()> {
                    binary_inplace::<$kernel, _>(self, other)
                }

                pub fn $scalar_inplace(&mut self, value: impl Into<Scalar>) -> Result<()> {
                    scalar_inplace::<$kernel>(self, value.into())
                }
            )*
        }
    };
}

binary_ops! {
    Add => add, add_new, add_inplace, add_scalar, add_scalar_inplace;
    Sub => sub, sub_new, sub_inplace, sub_scalar, sub_scalar_inplace;
    Mul => mul, mul_new, mul_inplace, mul_scalar, mul_scalar_inplace;
    Div => div, div_new, div_inplace, div_scalar, div_scalar_inplace;
    Pow => pow, pow_new, pow_inplace, pow_scalar, pow_scalar_inplace;
    Maximum => maximum, maximum_new, maximum_inplace, maximum_scalar, maximum_scalar_inplace;
    Minimum => minimum, minimum_new, minimum_inplace, minimum_scalar, minimum_scalar_inplace;
}

macro_rules! unary_ops {
    ($($kernel:ty => $name:ident, $new:ident, $inplace:ident;)*) => {
        impl<S: Storage> ArrayBase<S> {
            $(
                pub fn $name<O: StorageMut>(&self, out: &mut ArrayBase<O>) -> Result<()> {
                    unary_into::<$kernel, _, _>(self, out)
                }

                pub fn $new(&self) -> Result<Array> {
                    let mut out = Array::alloc(self.shape.clone(), self.dtype)?;
                    unary_into::<$kernel, _, _>(self, &mut out)?;
                    Ok(out)
                }
            )*
        }

        impl Array {
            $(
                pub fn $inplace(&mut self) -> Result<()> {
                    unary_inplace::<$kernel>(self)
                }
            )*
        }
    };
}

unary_ops! {
    Neg => neg, neg_new, neg_inplace;
    Abs => abs, abs_new, abs_inplace;
    Log => log, log_new, log_inplace;
    Exp => exp, exp_new, exp_inplace;
    Sqrt => sqrt, sqrt_new, sqrt_inplace;
}

impl<S: Storage> ArrayBase<S> {
    /// Clamp every element to `[min, max]`, both cast to the array's dtype.
    pub fn clip<O: StorageMut>(&self, min: f64, max: f64, out: &mut ArrayBase<O>) -> Result<()> {
        clip_bounds(min, max)?;
        let plan = plan_unary("clip", true, self, out)?;
        let cfg = config::current();
        let x = self.bytes();
        let o = out.bytes_mut();
        dispatch_dtype!(self.dtype, T => {
            let (lo, hi) = (T::from_f64(min), T::from_f64(max));
            exec_map::<T>(&plan, x, o, &cfg, move |v| clamp(v, lo, hi))
        })
    }
}

impl Array {
    pub fn clip_inplace(&mut self, min: f64, max: f64) -> Result<()> {
        clip_bounds(min, max)?;
        let dtype = self.dtype;
        let plan = plan_inplace::<&[u8]>("clip", true, self, None)?;
        let cfg = config::current();
        let t = self.bytes_mut();
        dispatch_dtype!(dtype, T => {
            let (lo, hi) = (T::from_f64(min), T::from_f64(max));
            exec_map_inplace::<T>(&plan, t, &cfg, move |v| clamp(v, lo, hi))
        })
    }
}
