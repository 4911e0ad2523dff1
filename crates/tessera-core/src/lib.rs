//! # tessera-core
//!
//! Strided N-dimensional numeric arrays for the CPU.
//! Ten fixed-width dtypes, NumPy-style broadcasting, pairwise reductions,
//! and data-parallel kernels that give the same answer as sequential ones.

pub mod array;
pub mod compare;
pub mod config;
pub mod dispatch;
pub mod dtype;
pub mod elementwise;
pub mod error;
pub mod linalg;
pub mod memory;
pub mod reduce;
pub mod scalar;
pub mod shape;
pub mod storage;

pub use array::{concat, Array, ArrayBase, ArrayDesc, ArrayView, ArrayViewMut};
pub use compare::{allclose, DEFAULT_ATOL, DEFAULT_RTOL};
pub use config::{with_config, ExecConfig};
pub use dispatch::KernelPath;
pub use dtype::{DType, Element};
pub use error::TesseraError;
pub use scalar::Scalar;
pub use shape::Shape;
pub use storage::{Storage, StorageMut};

pub type Result<T> = std::result::Result<T, TesseraError>;
