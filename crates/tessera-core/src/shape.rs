use smallvec::SmallVec;
use std::fmt;

use crate::{Result, TesseraError};

/// Byte strides, one per axis.
pub type Strides = SmallVec<[usize; 4]>;

/// Array shape with stack-allocated storage for ≤4 dimensions.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Shape {
    dims: SmallVec<[usize; 4]>,
}

impl Shape {
    pub fn new(dims: &[usize]) -> Self {
        Self {
            dims: SmallVec::from_slice(dims),
        }
    }

    pub fn scalar() -> Self {
        Self {
            dims: SmallVec::new(),
        }
    }

    /// A shape usable for a new array: rank ≥ 1 and every extent positive.
    pub fn validated(dims: &[usize]) -> Result<Self> {
        if dims.is_empty() {
            return Err(TesseraError::shape(dims, "rank must be at least 1"));
        }
        if dims.contains(&0) {
            return Err(TesseraError::shape(dims, "extents must be positive"));
        }
        dims.iter()
            .try_fold(1usize, |acc, &d| acc.checked_mul(d))
            .ok_or_else(|| TesseraError::shape(dims, "element count overflows"))?;
        Ok(Self::new(dims))
    }

    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    pub fn numel(&self) -> usize {
        if self.dims.is_empty() {
            1
        } else {
            self.dims.iter().product()
        }
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub(crate) fn dims_mut(&mut self) -> &mut SmallVec<[usize; 4]> {
        &mut self.dims
    }

    /// Row-major byte strides for elements of `elem_size` bytes.
    pub fn contiguous_strides(&self, elem_size: usize) -> Strides {
        let ndim = self.dims.len();
        if ndim == 0 {
            return SmallVec::new();
        }
        let mut strides = SmallVec::from_elem(0usize, ndim);
        strides[ndim - 1] = elem_size;
        for i in (0..ndim - 1).rev() {
            strides[i] = strides[i + 1] * self.dims[i + 1];
        }
        strides
    }

    /// Whether `strides` walk this shape in row-major order with no gaps.
    /// Axes of extent 1 never move, so their stride is ignored.
    pub fn is_contiguous(&self, strides: &[usize], elem_size: usize) -> bool {
        let mut expected = elem_size;
        for (&d, &s) in self.dims.iter().zip(strides).rev() {
            if d != 1 && s != expected {
                return false;
            }
            expected *= d;
        }
        true
    }

    pub fn resolve_reshape(&self, target: &[isize]) -> Option<Shape> {
        let numel = self.numel();
        let mut infer = None;
        let mut dims = SmallVec::<[usize; 4]>::with_capacity(target.len());
        for (axis, &extent) in target.iter().enumerate() {
            match extent {
                -1 if infer.is_none() => {
                    infer = Some(axis);
                    dims.push(1);
                }
                e if e > 0 => dims.push(e as usize),
                _ => return None,
            }
        }
        let known = dims.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d))?;
        match infer {
            Some(axis) if numel % known == 0 => dims[axis] = numel / known,
            None if known == numel => {}
            _ => return None,
        }
        Some(Shape { dims })
    }

    /// Resolve a possibly negative axis index.
    pub fn normalize_axis(&self, axis: isize) -> Result<usize> {
        let ndim = self.ndim() as isize;
        let resolved = if axis < 0 { axis + ndim } else { axis };
        if resolved < 0 || resolved >= ndim {
            return Err(TesseraError::InvalidAxis {
                axis: axis.unsigned_abs(),
                ndim: self.ndim(),
            });
        }
        Ok(resolved as usize)
    }

    /// The shape with `axis` dropped.
    pub fn without_axis(&self, axis: usize) -> Shape {
        let mut dims = self.dims.clone();
        dims.remove(axis);
        Shape { dims }
    }

    /// The shape with `axis` set to extent 1.
    pub fn with_unit_axis(&self, axis: usize) -> Shape {
        let mut dims = self.dims.clone();
        dims[axis] = 1;
        Shape { dims }
    }
}

// =========================================================================
// Broadcasting
// =========================================================================

/// Broadcast two shapes: align trailing axes, pad the shorter with 1s, and
/// take the larger extent where one side is 1.
pub fn broadcast_shapes(a: &Shape, b: &Shape) -> Result<Shape> {
    let ndim = a.ndim().max(b.ndim());
    let mut dims = SmallVec::from_elem(1usize, ndim);
    for i in 0..ndim {
        let da = padded_dim(a, ndim, i);
        let db = padded_dim(b, ndim, i);
        dims[i] = match (da, db) {
            (x, y) if x == y => x,
            (1, y) => y,
            (x, 1) => x,
            _ => return Err(TesseraError::shape_mismatch(a.dims(), b.dims())),
        };
    }
    Ok(Shape { dims })
}

fn padded_dim(shape: &Shape, ndim: usize, i: usize) -> usize {
    let pad = ndim - shape.ndim();
    if i < pad {
        1
    } else {
        shape.dims[i - pad]
    }
}

/// Strides that read an operand of `shape` as if it had shape `target`.
/// Missing leading axes and stretched extent-1 axes get stride 0.
pub fn broadcast_strides(shape: &Shape, strides: &[usize], target: &Shape) -> Result<Strides> {
    let ndim = target.ndim();
    if shape.ndim() > ndim {
        return Err(TesseraError::shape_mismatch(target.dims(), shape.dims()));
    }
    let pad = ndim - shape.ndim();
    let mut out = SmallVec::from_elem(0usize, ndim);
    for i in pad..ndim {
        let d = shape.dims[i - pad];
        let t = target.dims[i];
        out[i] = if d == t {
            strides[i - pad]
        } else if d == 1 {
            0
        } else {
            return Err(TesseraError::shape_mismatch(target.dims(), shape.dims()));
        };
    }
    Ok(out)
}

impl fmt::Debug for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Shape({:?})", self.dims.as_slice())
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{d}")?;
        }
        write!(f, "]")
    }
}
