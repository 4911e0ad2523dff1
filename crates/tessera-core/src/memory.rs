//! Alignment-guaranteed allocation.
//!
//! Every array buffer comes from here. Sizes are rounded up to a multiple of
//! the alignment, and reallocation is always allocate, copy, free.

use std::alloc::{self, Layout};
use std::fmt;
use std::ptr::NonNull;

use tracing::{debug, trace, warn};

use crate::{Result, TesseraError};

/// Alignment of every array buffer: one cache line, enough for 512-bit vectors.
pub const ARRAY_ALIGN: usize = 64;

/// Layout for `size` bytes rounded up to a multiple of `alignment`.
/// Zero-byte requests still reserve one aligned block.
fn padded_layout(alignment: usize, size: usize) -> Result<Layout> {
    if !alignment.is_power_of_two() {
        return Err(TesseraError::argument(format!(
            "alignment {alignment} is not a power of two"
        )));
    }
    let rounded = size
        .max(1)
        .checked_add(alignment - 1)
        .map(|s| s & !(alignment - 1))
        .ok_or(TesseraError::AllocationFailure {
            size,
            align: alignment,
        })?;
    Layout::from_size_align(rounded, alignment).map_err(|_| TesseraError::AllocationFailure {
        size,
        align: alignment,
    })
}

/// Allocate `size` zeroed bytes aligned to `alignment`.
pub fn aligned_alloc(alignment: usize, size: usize) -> Result<NonNull<u8>> {
    let layout = padded_layout(alignment, size)?;
    // SAFETY: padded_layout never yields a zero-sized layout.
    let ptr = unsafe { alloc::alloc_zeroed(layout) };
    trace!(size, padded = layout.size(), alignment, "aligned_alloc");
    NonNull::new(ptr).ok_or(TesseraError::AllocationFailure {
        size,
        align: alignment,
    })
}

/// Release a block from [`aligned_alloc`] or [`aligned_realloc`].
///
/// # Safety
/// `ptr` must have been returned by this module with the same `alignment`
/// and requested `size`, and must not be used afterwards.
pub unsafe fn aligned_free(ptr: NonNull<u8>, alignment: usize, size: usize) {
    match padded_layout(alignment, size) {
        Ok(layout) => alloc::dealloc(ptr.as_ptr(), layout),
        Err(e) => {
            warn!(alignment, size, error = %e, "aligned_free: invalid layout, block leaked");
        }
    }
}

/// Move a block to a fresh allocation of `new_size` bytes, keeping the first
/// `min(old_size, new_size)` bytes. Grown bytes are zero. On failure the
/// old block is left untouched.
///
/// # Safety
/// Same contract as [`aligned_free`] for `ptr`, `alignment` and `old_size`.
pub unsafe fn aligned_realloc(
    ptr: NonNull<u8>,
    alignment: usize,
    old_size: usize,
    new_size: usize,
) -> Result<NonNull<u8>> {
    let fresh = aligned_alloc(alignment, new_size)?;
    std::ptr::copy_nonoverlapping(ptr.as_ptr(), fresh.as_ptr(), old_size.min(new_size));
    aligned_free(ptr, alignment, old_size);
    debug!(old_size, new_size, alignment, "aligned_realloc");
    Ok(fresh)
}

/// An owned, zero-initialised, aligned byte buffer.
pub struct AlignedBuffer {
    ptr: NonNull<u8>,
    len: usize,
    align: usize,
}

// SAFETY: the buffer is uniquely owned plain bytes.
unsafe impl Send for AlignedBuffer {}
unsafe impl Sync for AlignedBuffer {}

impl AlignedBuffer {
    pub fn zeroed(len: usize, align: usize) -> Result<Self> {
        let ptr = aligned_alloc(align, len)?;
        Ok(Self { ptr, len, align })
    }

    pub fn from_bytes(bytes: &[u8], align: usize) -> Result<Self> {
        let mut buf = Self::zeroed(bytes.len(), align)?;
        buf.as_mut_slice().copy_from_slice(bytes);
        Ok(buf)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn align(&self) -> usize {
        self.align
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr is valid for len initialised bytes while self lives.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above, and &mut self guarantees exclusive access.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    /// Resize to `new_len` bytes, preserving the common prefix.
    pub fn resize(&mut self, new_len: usize) -> Result<()> {
        if new_len == self.len {
            return Ok(());
        }
        // SAFETY: ptr/align/len describe a live block from aligned_alloc.
        self.ptr = unsafe { aligned_realloc(self.ptr, self.align, self.len, new_len)? };
        self.len = new_len;
        Ok(())
    }
}

impl Drop for AlignedBuffer {
    fn drop(&mut self) {
        // SAFETY: ptr/align/len describe a live block from aligned_alloc.
        unsafe { aligned_free(self.ptr, self.align, self.len) }
    }
}

impl fmt::Debug for AlignedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AlignedBuffer(len={}, align={})", self.len, self.align)
    }
}
