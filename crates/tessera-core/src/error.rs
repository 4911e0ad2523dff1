use thiserror::Error;

use crate::DType;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TesseraError {
    #[error("Invalid dtype tag {tag:?}")]
    InvalidType { tag: String },

    #[error("Invalid shape {shape:?}: {reason}")]
    InvalidShape { shape: Vec<usize>, reason: String },

    #[error("Invalid axis {axis} for array with {ndim} dimensions")]
    InvalidAxis { axis: usize, ndim: usize },

    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("DType mismatch: expected {expected}, got {got}")]
    DTypeMismatch { expected: DType, got: DType },

    #[error("Operation {op} not supported for dtype {dtype}")]
    UnsupportedDType { op: &'static str, dtype: DType },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Allocation of {size} bytes with alignment {align} failed")]
    AllocationFailure { size: usize, align: usize },
}

impl TesseraError {
    pub(crate) fn shape(shape: &[usize], reason: impl Into<String>) -> Self {
        TesseraError::InvalidShape {
            shape: shape.to_vec(),
            reason: reason.into(),
        }
    }

    pub(crate) fn shape_mismatch(expected: &[usize], got: &[usize]) -> Self {
        TesseraError::ShapeMismatch {
            expected: expected.to_vec(),
            got: got.to_vec(),
        }
    }

    pub(crate) fn argument(msg: impl Into<String>) -> Self {
        TesseraError::InvalidArgument(msg.into())
    }
}
