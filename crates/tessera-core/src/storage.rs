use crate::dtype::Element;
use crate::memory::AlignedBuffer;
use crate::{Result, TesseraError};

/// Bytes an array reads from: an owned aligned buffer or a borrowed slice.
pub trait Storage {
    /// Whether dropping the storage releases the buffer.
    const OWNED: bool;

    fn bytes(&self) -> &[u8];
}

/// Storage that can be written through.
pub trait StorageMut: Storage {
    fn bytes_mut(&mut self) -> &mut [u8];
}

impl Storage for AlignedBuffer {
    const OWNED: bool = true;

    fn bytes(&self) -> &[u8] {
        self.as_slice()
    }
}

impl StorageMut for AlignedBuffer {
    fn bytes_mut(&mut self) -> &mut [u8] {
        self.as_mut_slice()
    }
}

impl Storage for &[u8] {
    const OWNED: bool = false;

    fn bytes(&self) -> &[u8] {
        self
    }
}

impl Storage for &mut [u8] {
    const OWNED: bool = false;

    fn bytes(&self) -> &[u8] {
        self
    }
}

impl StorageMut for &mut [u8] {
    fn bytes_mut(&mut self) -> &mut [u8] {
        self
    }
}

/// Read one element at a byte offset.
#[inline(always)]
pub(crate) fn read<T: Element>(bytes: &[u8], offset: usize) -> T {
    bytemuck::pod_read_unaligned(&bytes[offset..offset + std::mem::size_of::<T>()])
}

/// Write one element at a byte offset.
#[inline(always)]
pub(crate) fn write<T: Element>(bytes: &mut [u8], offset: usize, value: T) {
    bytes[offset..offset + std::mem::size_of::<T>()].copy_from_slice(bytemuck::bytes_of(&value));
}

/// `len` packed elements starting at a byte offset, as a typed slice.
pub(crate) fn typed<T: Element>(bytes: &[u8], offset: usize, len: usize) -> Result<&[T]> {
    let end = offset + len * std::mem::size_of::<T>();
    bytemuck::try_cast_slice(&bytes[offset..end])
        .map_err(|e| TesseraError::argument(format!("misaligned {} buffer: {e}", T::DTYPE)))
}

pub(crate) fn typed_mut<T: Element>(bytes: &mut [u8], offset: usize, len: usize) -> Result<&mut [T]> {
    let end = offset + len * std::mem::size_of::<T>();
    bytemuck::try_cast_slice_mut(&mut bytes[offset..end])
        .map_err(|e| TesseraError::argument(format!("misaligned {} buffer: {e}", T::DTYPE)))
}
