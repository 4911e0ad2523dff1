//! Matrix multiplication.

use rayon::prelude::*;
use tracing::debug;

use crate::array::{Array, ArrayBase};
use crate::config;
use crate::dispatch::for_each_offset;
use crate::dtype::Element;
use crate::elementwise::same_dtype;
use crate::shape::Shape;
use crate::storage::{self, Storage, StorageMut};
use crate::{dispatch_dtype, Result, TesseraError};

/// Operand geometry of one `(M, K) x (K, N)` product.
#[derive(Clone, Copy)]
struct MatmulDims {
    m: usize,
    k: usize,
    n: usize,
}

fn check_dims<A: Storage, B: Storage>(a: &ArrayBase<A>, b: &ArrayBase<B>) -> Result<MatmulDims> {
    if a.ndim() != 2 {
        return Err(TesseraError::shape(a.dims(), "matmul requires 2-D operands"));
    }
    if b.ndim() != 2 {
        return Err(TesseraError::shape(b.dims(), "matmul requires 2-D operands"));
    }
    let (m, k, n) = (a.dims()[0], a.dims()[1], b.dims()[1]);
    if b.dims()[0] != k {
        return Err(TesseraError::shape_mismatch(&[k, n], b.dims()));
    }
    Ok(MatmulDims { m, k, n })
}

/// Row-major `M x N` product, one output row per task (i-k-j order).
fn product<T: Element, A: Storage, B: Storage>(
    a: &ArrayBase<A>,
    b: &ArrayBase<B>,
    dims: &MatmulDims,
) -> Vec<T> {
    let MatmulDims { m, k, n } = *dims;
    let (a_bytes, b_bytes) = (a.bytes(), b.bytes());
    let (sa0, sa1) = (a.strides()[0], a.strides()[1]);
    let (sb0, sb1) = (b.strides()[0], b.strides()[1]);
    let (oa, ob) = (a.offset(), b.offset());

    let row = |i: usize, c: &mut [T]| {
        for p in 0..k {
            let aip: T = storage::read(a_bytes, oa + i * sa0 + p * sa1);
            let b_row = ob + p * sb0;
            for (j, cj) in c.iter_mut().enumerate() {
                let bpj: T = storage::read(b_bytes, b_row + j * sb1);
                *cj = cj.elem_add(aip.elem_mul(bpj));
            }
        }
    };

    let mut c = vec![T::ZERO; m * n];
    let cfg = config::current();
    if cfg.use_parallel(m * n * k * std::mem::size_of::<T>()) {
        c.par_chunks_mut(n).enumerate().for_each(|(i, ci)| row(i, ci));
    } else {
        for (i, ci) in c.chunks_mut(n).enumerate() {
            row(i, ci);
        }
    }
    c
}

impl<S: Storage> ArrayBase<S> {
    /// `out = self x other` for `self` of shape `(M, K)` and `other` of
    /// shape `(K, N)`. Integer dtypes wrap.
    pub fn matmul<B: Storage, O: StorageMut>(
        &self,
        other: &ArrayBase<B>,
        out: &mut ArrayBase<O>,
    ) -> Result<()> {
        let dtype = same_dtype(self.dtype, other.dtype)?;
        same_dtype(dtype, out.dtype)?;
        let dims = check_dims(self, other)?;
        if out.dims() != [dims.m, dims.n] {
            return Err(TesseraError::shape_mismatch(&[dims.m, dims.n], out.dims()));
        }
        debug!(m = dims.m, k = dims.k, n = dims.n, %dtype, "matmul");

        dispatch_dtype!(dtype, T => {
            let c = product::<T, S, B>(self, other, &dims);
            let shape = out.shape.clone();
            let strides = out.strides.clone();
            let base = out.offset;
            let bytes = out.bytes_mut();
            let mut values = c.into_iter();
            for_each_offset(shape.dims(), [&strides[..]], [base], |[o]| {
                if let Some(v) = values.next() {
                    storage::write::<T>(bytes, o, v);
                }
            });
        });
        Ok(())
    }

    /// [`matmul`](Self::matmul) into a new `(M, N)` array.
    pub fn matmul_new<B: Storage>(&self, other: &ArrayBase<B>) -> Result<Array> {
        let dims = check_dims(self, other)?;
        let mut out = Array::alloc(Shape::new(&[dims.m, dims.n]), self.dtype)?;
        self.matmul(other, &mut out)?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DType;

    #[test]
    fn test_matmul_2x3_by_3x2() {
        let a = Array::batch(&[2, 3], &[1.0f64, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let b = Array::batch(&[3, 2], &[7.0f64, 8.0, 9.0, 10.0, 11.0, 12.0]).unwrap();
        let c = a.matmul_new(&b).unwrap();
        assert_eq!(c.dims(), &[2, 2]);
        assert_eq!(c.to_vec::<f64>().unwrap(), vec![58.0, 64.0, 139.0, 154.0]);
    }

    #[test]
    fn test_matmul_transposed_operand() {
        let a = Array::batch(&[2, 2], &[1i32, 2, 3, 4]).unwrap();
        let mut at = a.copy().unwrap();
        at.transpose(&[1, 0]).unwrap();
        // [[1, 3], [2, 4]] x [[1, 2], [3, 4]]
        let c = at.matmul_new(&a).unwrap();
        assert_eq!(c.to_vec::<i32>().unwrap(), vec![10, 14, 14, 20]);
    }

    #[test]
    fn test_matmul_into_strided_output() {
        let a = Array::batch(&[2, 2], &[1.0f32, 0.0, 0.0, 1.0]).unwrap();
        let b = Array::batch(&[2, 2], &[5.0f32, 6.0, 7.0, 8.0]).unwrap();
        let mut out = Array::zeros(&[2, 2], DType::F32).unwrap();
        out.transpose(&[1, 0]).unwrap();
        a.matmul(&b, &mut out).unwrap();
        assert_eq!(out.to_vec::<f32>().unwrap(), vec![5.0, 6.0, 7.0, 8.0]);
    }

    #[test]
    fn test_matmul_wraps_integers() {
        let a = Array::batch(&[1, 2], &[100u8, 100]).unwrap();
        let b = Array::batch(&[2, 1], &[2u8, 1]).unwrap();
        let c = a.matmul_new(&b).unwrap();
        assert_eq!(c.to_vec::<u8>().unwrap(), vec![44]);
    }

    #[test]
    fn test_matmul_dimension_errors() {
        let a = Array::zeros(&[2, 3], DType::F32).unwrap();
        let b = Array::zeros(&[2, 3], DType::F32).unwrap();
        assert!(matches!(a.matmul_new(&b), Err(TesseraError::ShapeMismatch { .. })));

        let v = Array::zeros(&[3], DType::F32).unwrap();
        assert!(matches!(a.matmul_new(&v), Err(TesseraError::InvalidShape { .. })));

        let b = Array::zeros(&[3, 4], DType::F32).unwrap();
        let mut wrong = Array::zeros(&[2, 3], DType::F32).unwrap();
        assert!(matches!(
            a.matmul(&b, &mut wrong),
            Err(TesseraError::ShapeMismatch { .. })
        ));

        let i = Array::zeros(&[3, 4], DType::I32).unwrap();
        assert!(matches!(a.matmul_new(&i), Err(TesseraError::DTypeMismatch { .. })));
    }
}
