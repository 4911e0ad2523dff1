//! Kernel selection and strided iteration.
//!
//! Each operation picks one of three paths per call:
//! a vectorized kernel over raw contiguous runs, a generic strided walk
//! (which also covers broadcasting through zero strides), or a plain
//! scalar loop for dtype/op pairs that must not be vectorized.

use std::fmt;

use smallvec::SmallVec;

use crate::config::ExecConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelPath {
    Vectorized,
    Strided,
    Scalar,
}

impl fmt::Display for KernelPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelPath::Vectorized => write!(f, "vectorized"),
            KernelPath::Strided => write!(f, "strided"),
            KernelPath::Scalar => write!(f, "scalar"),
        }
    }
}

/// Pick a path: strided unless every operand is contiguous with the output's
/// shape, and scalar when the op has no vector form for this dtype.
pub fn select_path(all_contiguous: bool, vectorizable: bool) -> KernelPath {
    match (all_contiguous, vectorizable) {
        (false, _) => KernelPath::Strided,
        (true, true) => KernelPath::Vectorized,
        (true, false) => KernelPath::Scalar,
    }
}

/// Elements of `T` in one 256-bit vector register.
pub const fn lanes<T>() -> usize {
    let size = std::mem::size_of::<T>();
    if size >= 32 {
        1
    } else {
        32 / size
    }
}

/// Elements per parallel task: `bytes_per_task` worth, rounded to whole vectors.
pub fn task_len<T>(cfg: &ExecConfig) -> usize {
    let lanes = lanes::<T>();
    let n = (cfg.bytes_per_task / std::mem::size_of::<T>()).max(lanes);
    n - n % lanes
}

/// Walk `shape` in row-major order, calling `f` with the byte offset of the
/// current element in each of `N` operands.
///
/// The innermost axis runs as a flat loop; outer axes advance like an
/// odometer, rewinding an axis' contribution when it wraps.
pub fn for_each_offset<const N: usize>(
    shape: &[usize],
    strides: [&[usize]; N],
    base: [usize; N],
    mut f: impl FnMut([usize; N]),
) {
    let ndim = shape.len();
    if ndim == 0 {
        f(base);
        return;
    }
    if shape.contains(&0) {
        return;
    }
    let inner = shape[ndim - 1];
    let mut inner_step = [0usize; N];
    for k in 0..N {
        inner_step[k] = strides[k][ndim - 1];
    }

    let mut index: SmallVec<[usize; 4]> = SmallVec::from_elem(0, ndim - 1);
    let mut offsets = base;
    loop {
        let mut cur = offsets;
        for _ in 0..inner {
            f(cur);
            for k in 0..N {
                cur[k] += inner_step[k];
            }
        }

        let mut axis = ndim - 1;
        loop {
            if axis == 0 {
                return;
            }
            axis -= 1;
            index[axis] += 1;
            for k in 0..N {
                offsets[k] += strides[k][axis];
            }
            if index[axis] < shape[axis] {
                break;
            }
            for k in 0..N {
                offsets[k] -= strides[k][axis] * shape[axis];
            }
            index[axis] = 0;
        }
    }
}

/// Row-major byte offsets of every element, collected.
pub fn offsets(shape: &[usize], strides: &[usize], base: usize) -> Vec<usize> {
    let mut out = Vec::with_capacity(shape.iter().product());
    for_each_offset(shape, [strides], [base], |[o]| out.push(o));
    out
}
