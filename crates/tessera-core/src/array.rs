use std::fmt;

use smallvec::SmallVec;
use tracing::warn;

use crate::config;
use crate::dispatch::for_each_offset;
use crate::dtype::{DType, Element};
use crate::memory::AlignedBuffer;
use crate::scalar::Scalar;
use crate::shape::{Shape, Strides};
use crate::storage::{self, Storage, StorageMut};
use crate::{dispatch_dtype, Result, TesseraError};

/// A typed, strided N-dimensional array over some byte storage.
///
/// Strides and the offset are in bytes. Contiguity is derived from the
/// strides on demand and never stored.
#[derive(Clone)]
pub struct ArrayBase<S: Storage> {
    pub(crate) data: S,
    pub(crate) dtype: DType,
    pub(crate) shape: Shape,
    pub(crate) strides: Strides,
    pub(crate) offset: usize,
}

/// An array that owns an aligned buffer and frees it on drop.
pub type Array = ArrayBase<AlignedBuffer>;
/// A read-only view borrowing another array's buffer.
pub type ArrayView<'a> = ArrayBase<&'a [u8]>;
/// A writable view borrowing another array's buffer.
pub type ArrayViewMut<'a> = ArrayBase<&'a mut [u8]>;

/// Inputs to [`Array::create`]. Only read during construction.
#[derive(Debug, Clone, Copy)]
pub struct ArrayDesc<'a> {
    pub shape: &'a [usize],
    pub dtype: DType,
    /// Raw native-endian element bytes copied into the new buffer.
    pub data: Option<&'a [u8]>,
}

impl Array {
    // =========================================================================
    // Constructors
    // =========================================================================

    /// Allocate a zero-filled array, copying `desc.data` in when present.
    pub fn create(desc: &ArrayDesc<'_>) -> Result<Array> {
        let shape = Shape::validated(desc.shape)?;
        let nbytes = shape
            .numel()
            .checked_mul(desc.dtype.size_of())
            .ok_or_else(|| TesseraError::shape(desc.shape, "byte size overflows"))?;
        if let Some(data) = desc.data {
            if data.len() != nbytes {
                return Err(TesseraError::argument(format!(
                    "expected {} bytes for shape {} of {}, got {}",
                    nbytes,
                    shape,
                    desc.dtype,
                    data.len()
                )));
            }
        }
        let mut arr = Self::alloc(shape, desc.dtype)?;
        if let Some(data) = desc.data {
            arr.data.as_mut_slice()[..nbytes].copy_from_slice(data);
        }
        Ok(arr)
    }

    /// Zero-filled contiguous array with no shape validation (rank 0 allowed).
    pub(crate) fn alloc(shape: Shape, dtype: DType) -> Result<Array> {
        let size = dtype.size_of();
        let data = AlignedBuffer::zeroed(shape.numel() * size, config::current().alignment)?;
        let strides = shape.contiguous_strides(size);
        Ok(Array {
            data,
            dtype,
            shape,
            strides,
            offset: 0,
        })
    }

    pub fn zeros(shape: &[usize], dtype: DType) -> Result<Array> {
        Self::create(&ArrayDesc {
            shape,
            dtype,
            data: None,
        })
    }

    pub fn ones(shape: &[usize], dtype: DType) -> Result<Array> {
        Self::full(shape, dtype, 1u8)
    }

    /// Every element set to `value`, cast to `dtype`.
    pub fn full(shape: &[usize], dtype: DType, value: impl Into<Scalar>) -> Result<Array> {
        let mut arr = Self::zeros(shape, dtype)?;
        arr.fill(value);
        Ok(arr)
    }

    /// Copy typed data into a new array of the given shape.
    pub fn batch<T: Element>(shape: &[usize], data: &[T]) -> Result<Array> {
        Self::create(&ArrayDesc {
            shape,
            dtype: T::DTYPE,
            data: Some(bytemuck::cast_slice(data)),
        })
    }

    /// Copy raw native-endian element bytes into a new array.
    pub fn from_bytes(shape: &[usize], dtype: DType, bytes: &[u8]) -> Result<Array> {
        Self::create(&ArrayDesc {
            shape,
            dtype,
            data: Some(bytes),
        })
    }

    /// A rank-0 array holding one value.
    pub fn scalar(value: impl Into<Scalar>) -> Result<Array> {
        let value = value.into();
        let mut arr = Self::alloc(Shape::scalar(), value.dtype())?;
        arr.fill(value);
        Ok(arr)
    }

    /// `ceil((stop - start) / step)` values `start + i * step`.
    pub fn arange(start: f64, stop: f64, step: f64, dtype: DType) -> Result<Array> {
        if step == 0.0 || !step.is_finite() {
            return Err(TesseraError::argument("arange: step must be finite and non-zero"));
        }
        if (step > 0.0 && start >= stop) || (step < 0.0 && start <= stop) {
            return Err(TesseraError::argument(format!(
                "arange: step {step} does not lead from {start} to {stop}"
            )));
        }
        if !dtype.is_signed() && (start < 0.0 || stop < 0.0) {
            return Err(TesseraError::argument(format!(
                "arange: negative bound for unsigned dtype {dtype}"
            )));
        }
        let n = ((stop - start) / step).ceil() as usize;
        let mut arr = Self::zeros(&[n], dtype)?;
        dispatch_dtype!(dtype, T => {
            for (i, v) in arr.as_slice_mut::<T>()?.iter_mut().enumerate() {
                *v = T::from_f64(start + i as f64 * step);
            }
        });
        Ok(arr)
    }

    /// `num` evenly spaced values from `start` to `stop` inclusive.
    pub fn linspace(start: f64, stop: f64, num: usize, dtype: DType) -> Result<Array> {
        if num == 0 {
            return Err(TesseraError::argument("linspace: num must be positive"));
        }
        if !dtype.is_signed() && (start < 0.0 || stop < 0.0) {
            return Err(TesseraError::argument(format!(
                "linspace: negative bound for unsigned dtype {dtype}"
            )));
        }
        let step = if num > 1 {
            (stop - start) / (num - 1) as f64
        } else {
            0.0
        };
        let mut arr = Self::zeros(&[num], dtype)?;
        dispatch_dtype!(dtype, T => {
            for (i, v) in arr.as_slice_mut::<T>()?.iter_mut().enumerate() {
                *v = T::from_f64(start + i as f64 * step);
            }
        });
        Ok(arr)
    }

    /// f32 array of samples from N(0, 1).
    pub fn randn(shape: &[usize]) -> Result<Array> {
        use rand::Rng;
        let mut arr = Self::zeros(shape, DType::F32)?;
        let mut rng = rand::thread_rng();
        for v in arr.as_slice_mut::<f32>()? {
            let u1: f32 = rng.gen_range(1e-5f32..1.0f32);
            let u2: f32 = rng.gen_range(0.0f32..std::f32::consts::TAU);
            *v = (-2.0f32 * u1.ln()).sqrt() * u2.cos();
        }
        Ok(arr)
    }

    /// f32 array uniformly distributed in [low, high).
    pub fn rand_uniform(shape: &[usize], low: f32, high: f32) -> Result<Array> {
        use rand::Rng;
        if !(low < high) {
            return Err(TesseraError::argument(format!(
                "rand_uniform: empty range [{low}, {high})"
            )));
        }
        let mut arr = Self::zeros(shape, DType::F32)?;
        let mut rng = rand::thread_rng();
        for v in arr.as_slice_mut::<f32>()? {
            *v = rng.gen_range(low..high);
        }
        Ok(arr)
    }

    // =========================================================================
    // Type conversion
    // =========================================================================

    /// Convert every element to `dtype` in place.
    ///
    /// Integer narrowing wraps (two's complement), float to integer truncates
    /// toward zero. The buffer is resized to exactly `numel * new_width`.
    pub fn astype(&mut self, dtype: DType) -> Result<()> {
        if !self.is_contiguous() || self.offset != 0 {
            return Err(TesseraError::argument(
                "astype requires a contiguous array; copy it first",
            ));
        }
        if dtype == self.dtype {
            return Ok(());
        }
        let n = self.numel();
        let from = self.dtype;
        let (old_width, new_width) = (from.size_of(), dtype.size_of());

        if new_width > old_width {
            self.data.resize(n * new_width)?;
        }
        let bytes = self.data.as_mut_slice();
        dispatch_dtype!(from, S => dispatch_dtype!(dtype, D => convert_in_place::<S, D>(bytes, n)));
        if new_width < old_width {
            // The data is already converted, so a failed shrink is not an
            // error: the array stays valid in the larger block and only
            // `capacity()` reports the extra room.
            if let Err(e) = self.data.resize(n * new_width) {
                warn!(error = %e, "astype: kept oversized buffer");
            }
        }

        self.dtype = dtype;
        self.strides = self.shape.contiguous_strides(new_width);
        Ok(())
    }
}

/// Convert `n` packed elements from `S` to `D` within one buffer. Widening
/// runs back to front and narrowing front to back, so no unread element is
/// overwritten.
fn convert_in_place<S: Element, D: Element>(bytes: &mut [u8], n: usize) {
    let (ws, wd) = (std::mem::size_of::<S>(), std::mem::size_of::<D>());
    let mut step = |i: usize| {
        let v: S = storage::read(bytes, i * ws);
        storage::write(bytes, i * wd, D::from_repr(v.to_repr()));
    };
    if wd > ws {
        (0..n).rev().for_each(&mut step);
    } else {
        (0..n).for_each(&mut step);
    }
}

impl<'a> ArrayView<'a> {
    /// Borrow typed data as an array without copying.
    pub fn from_slice<T: Element>(data: &'a [T], shape: &[usize]) -> Result<Self> {
        let shape = checked_shape(shape, data.len())?;
        let strides = shape.contiguous_strides(T::DTYPE.size_of());
        Ok(ArrayBase {
            data: bytemuck::cast_slice(data),
            dtype: T::DTYPE,
            shape,
            strides,
            offset: 0,
        })
    }
}

impl<'a> ArrayViewMut<'a> {
    /// Borrow typed data mutably as an array without copying.
    pub fn from_slice_mut<T: Element>(data: &'a mut [T], shape: &[usize]) -> Result<Self> {
        let shape = checked_shape(shape, data.len())?;
        let strides = shape.contiguous_strides(T::DTYPE.size_of());
        Ok(ArrayBase {
            data: bytemuck::cast_slice_mut(data),
            dtype: T::DTYPE,
            shape,
            strides,
            offset: 0,
        })
    }
}

fn checked_shape(dims: &[usize], len: usize) -> Result<Shape> {
    let shape = Shape::validated(dims)?;
    if shape.numel() != len {
        return Err(TesseraError::shape(
            dims,
            format!("requires {} elements, got {}", shape.numel(), len),
        ));
    }
    Ok(shape)
}

impl<S: Storage> ArrayBase<S> {
    // =========================================================================
    // Properties
    // =========================================================================

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn dims(&self) -> &[usize] {
        self.shape.dims()
    }

    pub fn ndim(&self) -> usize {
        self.shape.ndim()
    }

    pub fn numel(&self) -> usize {
        self.shape.numel()
    }

    /// Byte strides.
    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    /// Byte offset of the first element.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn owns_data(&self) -> bool {
        S::OWNED
    }

    /// Elements the underlying buffer can hold.
    pub fn capacity(&self) -> usize {
        self.data.bytes().len() / self.dtype.size_of()
    }

    /// Address of the underlying buffer, shared by every view of it.
    pub fn buffer_ptr(&self) -> *const u8 {
        self.data.bytes().as_ptr()
    }

    pub fn is_contiguous(&self) -> bool {
        self.shape
            .is_contiguous(&self.strides, self.dtype.size_of())
    }

    pub(crate) fn bytes(&self) -> &[u8] {
        self.data.bytes()
    }

    pub(crate) fn check_dtype<T: Element>(&self) -> Result<()> {
        if T::DTYPE != self.dtype {
            return Err(TesseraError::DTypeMismatch {
                expected: self.dtype,
                got: T::DTYPE,
            });
        }
        Ok(())
    }

    // =========================================================================
    // Data access
    // =========================================================================

    pub fn view(&self) -> ArrayView<'_> {
        ArrayBase {
            data: self.data.bytes(),
            dtype: self.dtype,
            shape: self.shape.clone(),
            strides: self.strides.clone(),
            offset: self.offset,
        }
    }

    fn element_offset(&self, index: &[usize]) -> Result<usize> {
        if index.len() != self.ndim() {
            return Err(TesseraError::shape(
                self.dims(),
                format!("index {index:?} has the wrong rank"),
            ));
        }
        let mut off = self.offset;
        for (axis, (&i, &d)) in index.iter().zip(self.dims()).enumerate() {
            if i >= d {
                return Err(TesseraError::shape(
                    self.dims(),
                    format!("index {i} out of range on axis {axis}"),
                ));
            }
            off += i * self.strides[axis];
        }
        Ok(off)
    }

    pub fn get<T: Element>(&self, index: &[usize]) -> Result<T> {
        self.check_dtype::<T>()?;
        let off = self.element_offset(index)?;
        Ok(storage::read(self.bytes(), off))
    }

    /// Elements in row-major logical order.
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        self.check_dtype::<T>()?;
        let bytes = self.bytes();
        if self.is_contiguous() {
            if let Ok(slice) = storage::typed::<T>(bytes, self.offset, self.numel()) {
                return Ok(slice.to_vec());
            }
        }
        let mut out = Vec::with_capacity(self.numel());
        for_each_offset(self.dims(), [&self.strides[..]], [self.offset], |[o]| {
            out.push(storage::read::<T>(bytes, o))
        });
        Ok(out)
    }

    /// The elements as a typed slice; contiguous arrays only.
    pub fn as_slice<T: Element>(&self) -> Result<&[T]> {
        self.check_dtype::<T>()?;
        if !self.is_contiguous() {
            return Err(TesseraError::argument("as_slice requires a contiguous array"));
        }
        storage::typed(self.bytes(), self.offset, self.numel())
    }

    // =========================================================================
    // Shape operations
    // =========================================================================

    /// Per-axis `[start, stop)` with `step`; returns (shape, strides, offset).
    fn sliced_layout(
        &self,
        start: &[usize],
        stop: &[usize],
        step: &[usize],
    ) -> Result<(Shape, Strides, usize)> {
        let ndim = self.ndim();
        if start.len() != ndim || stop.len() != ndim || step.len() != ndim {
            return Err(TesseraError::shape(
                self.dims(),
                format!(
                    "slice bounds have ranks {}/{}/{}",
                    start.len(),
                    stop.len(),
                    step.len()
                ),
            ));
        }
        let mut dims: SmallVec<[usize; 4]> = SmallVec::with_capacity(ndim);
        let mut strides = Strides::with_capacity(ndim);
        let mut offset = self.offset;
        for axis in 0..ndim {
            let (a, b, s, d) = (start[axis], stop[axis], step[axis], self.dims()[axis]);
            if s == 0 || a >= b || b > d {
                return Err(TesseraError::shape(
                    self.dims(),
                    format!("slice {a}..{b} step {s} out of range on axis {axis}"),
                ));
            }
            dims.push((b - a).div_ceil(s));
            strides.push(self.strides[axis] * s);
            offset += a * self.strides[axis];
        }
        Ok((Shape::new(&dims), strides, offset))
    }

    /// A view of `start[i]..stop[i]` stepping by `step[i]` on every axis.
    pub fn slice(&self, start: &[usize], stop: &[usize], step: &[usize]) -> Result<ArrayView<'_>> {
        let (shape, strides, offset) = self.sliced_layout(start, stop, step)?;
        Ok(ArrayBase {
            data: self.data.bytes(),
            dtype: self.dtype,
            shape,
            strides,
            offset,
        })
    }

    /// Permute axes in place. Only the shape and strides change.
    pub fn transpose(&mut self, axes: &[usize]) -> Result<()> {
        let ndim = self.ndim();
        if axes.len() != ndim {
            return Err(TesseraError::argument(format!(
                "transpose: {} axes given for {} dimensions",
                axes.len(),
                ndim
            )));
        }
        let mut seen = SmallVec::<[bool; 4]>::from_elem(false, ndim);
        for &ax in axes {
            if ax >= ndim || seen[ax] {
                return Err(TesseraError::argument(format!(
                    "transpose: {axes:?} is not a permutation of 0..{ndim}"
                )));
            }
            seen[ax] = true;
        }
        let dims: SmallVec<[usize; 4]> = axes.iter().map(|&ax| self.dims()[ax]).collect();
        let strides: Strides = axes.iter().map(|&ax| self.strides[ax]).collect();
        *self.shape.dims_mut() = dims;
        self.strides = strides;
        Ok(())
    }

    /// Reassign the shape of a contiguous array. One extent may be -1.
    pub fn reshape(&mut self, new_shape: &[isize]) -> Result<()> {
        let resolved = self.shape.resolve_reshape(new_shape).ok_or_else(|| {
            TesseraError::shape(
                self.dims(),
                format!("cannot reshape {} elements into {new_shape:?}", self.numel()),
            )
        })?;
        if !self.is_contiguous() {
            return Err(TesseraError::argument(
                "reshape requires a contiguous array; copy it first",
            ));
        }
        self.strides = resolved.contiguous_strides(self.dtype.size_of());
        self.shape = resolved;
        Ok(())
    }

    /// Collapse a contiguous array to rank 1 in place.
    pub fn flatten(&mut self) -> Result<()> {
        if !self.is_contiguous() {
            return Err(TesseraError::argument(
                "flatten requires a contiguous array; copy it first",
            ));
        }
        self.shape = Shape::new(&[self.numel()]);
        self.strides = SmallVec::from_slice(&[self.dtype.size_of()]);
        Ok(())
    }

    /// An owning, contiguous copy with the same shape and dtype.
    pub fn copy(&self) -> Result<Array> {
        let mut out = Array::alloc(self.shape.clone(), self.dtype)?;
        copy_into(self, &mut out);
        Ok(out)
    }
}

impl<S: StorageMut> ArrayBase<S> {
    pub fn view_mut(&mut self) -> ArrayViewMut<'_> {
        ArrayBase {
            data: self.data.bytes_mut(),
            dtype: self.dtype,
            shape: self.shape.clone(),
            strides: self.strides.clone(),
            offset: self.offset,
        }
    }

    pub fn slice_mut(
        &mut self,
        start: &[usize],
        stop: &[usize],
        step: &[usize],
    ) -> Result<ArrayViewMut<'_>> {
        let (shape, strides, offset) = self.sliced_layout(start, stop, step)?;
        Ok(ArrayBase {
            data: self.data.bytes_mut(),
            dtype: self.dtype,
            shape,
            strides,
            offset,
        })
    }

    pub(crate) fn bytes_mut(&mut self) -> &mut [u8] {
        self.data.bytes_mut()
    }

    pub fn set<T: Element>(&mut self, index: &[usize], value: T) -> Result<()> {
        self.check_dtype::<T>()?;
        let off = self.element_offset(index)?;
        storage::write(self.bytes_mut(), off, value);
        Ok(())
    }

    pub fn as_slice_mut<T: Element>(&mut self) -> Result<&mut [T]> {
        self.check_dtype::<T>()?;
        if !self.is_contiguous() {
            return Err(TesseraError::argument(
                "as_slice_mut requires a contiguous array",
            ));
        }
        let (offset, n) = (self.offset, self.numel());
        storage::typed_mut(self.bytes_mut(), offset, n)
    }

    /// Overwrite every element with `value` cast to this array's dtype.
    pub fn fill(&mut self, value: impl Into<Scalar>) {
        let value = value.into();
        let size = self.dtype.size_of();
        let bytes = self.data.bytes_mut();
        dispatch_dtype!(self.dtype, T => {
            let v: T = value.cast();
            for_each_offset(self.shape.dims(), [&self.strides[..]], [self.offset], |[o]| {
                bytes[o..o + size].copy_from_slice(bytemuck::bytes_of(&v))
            });
        });
    }
}

/// Copy `src` into `dst` element by element. Shapes and dtypes must match.
pub(crate) fn copy_into<S: Storage, D: StorageMut>(src: &ArrayBase<S>, dst: &mut ArrayBase<D>) {
    debug_assert_eq!(src.dims(), dst.dims());
    debug_assert_eq!(src.dtype, dst.dtype);
    let size = src.dtype.size_of();
    let sb = src.data.bytes();
    let db = dst.data.bytes_mut();
    if src.shape.is_contiguous(&src.strides, size) && dst.shape.is_contiguous(&dst.strides, size) {
        let n = src.numel() * size;
        db[dst.offset..dst.offset + n].copy_from_slice(&sb[src.offset..src.offset + n]);
        return;
    }
    for_each_offset(
        src.shape.dims(),
        [&src.strides[..], &dst.strides[..]],
        [src.offset, dst.offset],
        |[s, d]| db[d..d + size].copy_from_slice(&sb[s..s + size]),
    );
}

/// Join arrays along an existing axis.
pub fn concat(arrays: &[ArrayView<'_>], axis: usize) -> Result<Array> {
    let first = arrays
        .first()
        .ok_or_else(|| TesseraError::argument("concat: no arrays given"))?;
    let ndim = first.ndim();
    if axis >= ndim {
        return Err(TesseraError::InvalidAxis { axis, ndim });
    }
    let mut total = 0;
    for a in arrays {
        if a.dtype != first.dtype {
            return Err(TesseraError::DTypeMismatch {
                expected: first.dtype,
                got: a.dtype,
            });
        }
        let same_rest = a.ndim() == ndim
            && (0..ndim).all(|i| i == axis || a.dims()[i] == first.dims()[i]);
        if !same_rest {
            return Err(TesseraError::shape_mismatch(first.dims(), a.dims()));
        }
        total += a.dims()[axis];
    }

    let mut dims = first.dims().to_vec();
    dims[axis] = total;
    let mut out = Array::zeros(&dims, first.dtype)?;
    let mut pos = 0;
    for a in arrays {
        let len = a.dims()[axis];
        let mut start = vec![0; ndim];
        let mut stop = dims.clone();
        start[axis] = pos;
        stop[axis] = pos + len;
        let mut dst = out.slice_mut(&start, &stop, &vec![1; ndim])?;
        copy_into(a, &mut dst);
        pos += len;
    }
    Ok(out)
}

impl<S: Storage> fmt::Debug for ArrayBase<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Array(shape={}, dtype={}, strides={:?}, offset={}, contiguous={}, owned={})",
            self.shape,
            self.dtype,
            self.strides.as_slice(),
            self.offset,
            self.is_contiguous(),
            self.owns_data(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iota(n: usize) -> Array {
        Array::arange(0.0, n as f64, 1.0, DType::I32).unwrap()
    }

    #[test]
    fn test_create_zero_filled_and_aligned() {
        let a = Array::zeros(&[3, 5], DType::F64).unwrap();
        assert_eq!(a.numel(), 15);
        assert_eq!(a.strides(), &[40, 8]);
        assert!(a.is_contiguous());
        assert!(a.owns_data());
        assert_eq!(a.buffer_ptr() as usize % 16, 0);
        assert!(a.to_vec::<f64>().unwrap().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_create_rejects_bad_input() {
        assert!(matches!(
            Array::zeros(&[], DType::I8),
            Err(TesseraError::InvalidShape { .. })
        ));
        assert!(matches!(
            Array::zeros(&[2, 0], DType::I8),
            Err(TesseraError::InvalidShape { .. })
        ));
        assert!(matches!(
            Array::from_bytes(&[4], DType::I32, &[0u8; 15]),
            Err(TesseraError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_batch_and_full() {
        let a = Array::batch(&[5], &[10i32, 20, 30, 40, 50]).unwrap();
        assert_eq!(a.to_vec::<i32>().unwrap(), vec![10, 20, 30, 40, 50]);
        let f = Array::full(&[2, 2], DType::U8, 7i64).unwrap();
        assert_eq!(f.to_vec::<u8>().unwrap(), vec![7; 4]);
        let o = Array::ones(&[3], DType::F32).unwrap();
        assert_eq!(o.to_vec::<f32>().unwrap(), vec![1.0; 3]);
        assert!(matches!(
            a.to_vec::<f32>(),
            Err(TesseraError::DTypeMismatch { .. })
        ));
    }

    #[test]
    fn test_arange_rules() {
        let a = Array::arange(0.0, 1.0, 0.25, DType::F64).unwrap();
        assert_eq!(a.to_vec::<f64>().unwrap(), vec![0.0, 0.25, 0.5, 0.75]);
        let b = Array::arange(5.0, 0.0, -2.0, DType::I16).unwrap();
        assert_eq!(b.to_vec::<i16>().unwrap(), vec![5, 3, 1]);
        assert!(Array::arange(0.0, 5.0, 0.0, DType::I32).is_err());
        assert!(Array::arange(0.0, 5.0, -1.0, DType::I32).is_err());
        assert!(Array::arange(3.0, 3.0, 1.0, DType::I32).is_err());
        assert!(Array::arange(-2.0, 3.0, 1.0, DType::U8).is_err());
    }

    #[test]
    fn test_linspace() {
        let a = Array::linspace(0.0, 1.0, 5, DType::F32).unwrap();
        assert_eq!(a.to_vec::<f32>().unwrap(), vec![0.0, 0.25, 0.5, 0.75, 1.0]);
        let one = Array::linspace(3.0, 9.0, 1, DType::I64).unwrap();
        assert_eq!(one.to_vec::<i64>().unwrap(), vec![3]);
        assert!(Array::linspace(0.0, 1.0, 0, DType::F32).is_err());
    }

    #[test]
    fn test_slice_step_two() {
        let a = iota(10);
        let v = a.slice(&[0], &[10], &[2]).unwrap();
        assert!(!v.owns_data());
        assert_eq!(v.to_vec::<i32>().unwrap(), vec![0, 2, 4, 6, 8]);
        assert_eq!(v.buffer_ptr(), a.buffer_ptr());
    }

    #[test]
    fn test_slice_2d_and_bounds() {
        let mut a = iota(12);
        a.reshape(&[3, 4]).unwrap();
        let v = a.slice(&[1, 1], &[3, 4], &[1, 2]).unwrap();
        assert_eq!(v.dims(), &[2, 2]);
        assert_eq!(v.offset(), 20);
        assert_eq!(v.to_vec::<i32>().unwrap(), vec![5, 7, 9, 11]);
        assert!(a.slice(&[0, 0], &[4, 4], &[1, 1]).is_err());
        assert!(a.slice(&[0, 0], &[3, 4], &[1, 0]).is_err());
        assert!(a.slice(&[0], &[3], &[1]).is_err());
    }

    #[test]
    fn test_slice_mut_writes_through() {
        let mut a = Array::zeros(&[6], DType::I64).unwrap();
        a.slice_mut(&[1], &[6], &[2]).unwrap().fill(9i64);
        assert_eq!(a.to_vec::<i64>().unwrap(), vec![0, 9, 0, 9, 0, 9]);
    }

    #[test]
    fn test_transpose_round_trip() {
        let mut a = Array::zeros(&[2, 3, 4], DType::F32).unwrap();
        let (dims, strides, ptr) = (a.dims().to_vec(), a.strides().to_vec(), a.buffer_ptr());
        a.transpose(&[2, 0, 1]).unwrap();
        assert_eq!(a.dims(), &[4, 2, 3]);
        assert!(!a.is_contiguous());
        a.transpose(&[1, 2, 0]).unwrap();
        assert_eq!(a.dims(), dims.as_slice());
        assert_eq!(a.strides(), strides.as_slice());
        assert_eq!(a.buffer_ptr(), ptr);
    }

    #[test]
    fn test_transpose_rejects_non_permutation() {
        let mut a = Array::zeros(&[2, 3], DType::F32).unwrap();
        assert!(matches!(
            a.transpose(&[0, 0]),
            Err(TesseraError::InvalidArgument(_))
        ));
        assert!(a.transpose(&[0, 2]).is_err());
        assert!(a.transpose(&[0]).is_err());
        a.transpose(&[0, 1]).unwrap();
        assert_eq!(a.dims(), &[2, 3]);
    }

    #[test]
    fn test_copy_materialises_transposed() {
        let mut a = iota(6);
        a.reshape(&[2, 3]).unwrap();
        a.transpose(&[1, 0]).unwrap();
        let c = a.copy().unwrap();
        assert!(c.is_contiguous());
        assert_eq!(c.dims(), &[3, 2]);
        assert_eq!(c.to_vec::<i32>().unwrap(), vec![0, 3, 1, 4, 2, 5]);
    }

    #[test]
    fn test_flatten_requires_contiguity() {
        let mut a = iota(6);
        a.reshape(&[2, 3]).unwrap();
        a.transpose(&[1, 0]).unwrap();
        assert!(matches!(a.flatten(), Err(TesseraError::InvalidArgument(_))));
        let mut c = a.copy().unwrap();
        c.flatten().unwrap();
        assert_eq!(c.dims(), &[6]);
        assert_eq!(c.strides(), &[4]);
    }

    #[test]
    fn test_reshape() {
        let mut a = iota(12);
        a.reshape(&[2, -1, 3]).unwrap();
        assert_eq!(a.dims(), &[2, 2, 3]);
        assert!(a.reshape(&[5, -1]).is_err());
    }

    /// Log output for debugging a failing test: `RUST_LOG=tessera_core=trace`.
    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    #[test]
    fn test_astype_round_trips() {
        init_tracing();
        let mut a = Array::batch(&[4], &[-3i32, 0, 7, 1 << 20]).unwrap();
        a.astype(DType::F64).unwrap();
        assert_eq!(a.strides(), &[8]);
        assert_eq!(a.capacity(), 4);
        a.astype(DType::I32).unwrap();
        assert_eq!(a.to_vec::<i32>().unwrap(), vec![-3, 0, 7, 1 << 20]);

        let mut b = Array::batch(&[2], &[-128i8, 5]).unwrap();
        b.astype(DType::I64).unwrap();
        assert_eq!(b.to_vec::<i64>().unwrap(), vec![-128, 5]);
    }

    #[test]
    fn test_astype_narrowing_wraps() {
        init_tracing();
        let mut a = Array::batch(&[3], &[300i32, -1, 255]).unwrap();
        a.astype(DType::U8).unwrap();
        assert_eq!(a.to_vec::<u8>().unwrap(), vec![44, 255, 255]);
        assert_eq!(a.capacity(), 3);

        let mut f = Array::batch(&[2], &[2.9f32, -2.9]).unwrap();
        f.astype(DType::I16).unwrap();
        assert_eq!(f.to_vec::<i16>().unwrap(), vec![2, -2]);
    }

    #[test]
    fn test_astype_rejects_non_contiguous() {
        let mut a = Array::zeros(&[2, 3], DType::I32).unwrap();
        a.transpose(&[1, 0]).unwrap();
        assert!(matches!(
            a.astype(DType::F32),
            Err(TesseraError::InvalidArgument(_))
        ));
        assert_eq!(a.dtype(), DType::I32);
    }

    #[test]
    fn test_get_set_and_views_from_slices() {
        let mut data = [1.0f64, 2.0, 3.0, 4.0];
        {
            let mut v = ArrayViewMut::from_slice_mut(&mut data, &[2, 2]).unwrap();
            v.set(&[1, 0], 30.0).unwrap();
            assert!(v.set(&[2, 0], 1.0).is_err());
        }
        let v = ArrayView::from_slice(&data, &[2, 2]).unwrap();
        assert_eq!(v.get::<f64>(&[1, 0]).unwrap(), 30.0);
        assert!(ArrayView::from_slice(&data, &[3]).is_err());
    }

    #[test]
    fn test_scalar_array() {
        let s = Array::scalar(2.5f32).unwrap();
        assert_eq!(s.ndim(), 0);
        assert_eq!(s.numel(), 1);
        assert_eq!(s.get::<f32>(&[]).unwrap(), 2.5);
    }

    #[test]
    fn test_concat() {
        let a = Array::batch(&[1, 2], &[1u16, 2]).unwrap();
        let b = Array::batch(&[2, 2], &[3u16, 4, 5, 6]).unwrap();
        let c = concat(&[a.view(), b.view()], 0).unwrap();
        assert_eq!(c.dims(), &[3, 2]);
        assert_eq!(c.to_vec::<u16>().unwrap(), vec![1, 2, 3, 4, 5, 6]);
        let d = concat(&[b.view(), b.view()], 1).unwrap();
        assert_eq!(d.to_vec::<u16>().unwrap(), vec![3, 4, 3, 4, 5, 6, 5, 6]);
        assert!(concat(&[a.view(), b.view()], 1).is_err());
        assert!(concat(&[], 0).is_err());
    }

    #[test]
    fn test_random_constructors() {
        let u = Array::rand_uniform(&[1000], -1.0, 1.0).unwrap();
        assert!(u.to_vec::<f32>().unwrap().iter().all(|&v| (-1.0..1.0).contains(&v)));
        let n = Array::randn(&[64]).unwrap();
        assert!(n.to_vec::<f32>().unwrap().iter().all(|v| v.is_finite()));
        assert!(Array::rand_uniform(&[4], 1.0, 1.0).is_err());
    }
}
