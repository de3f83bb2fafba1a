// Aligned scratch buffer for O_DIRECT transfers

use crate::{ScanError, ScanResult};
use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ptr::NonNull;

/// Alignment requirements for Direct I/O
pub const PAGE_SIZE: usize = 4096;

/// Heap buffer whose start address is aligned for direct I/O.
pub struct AlignedBuffer {
    ptr: NonNull<u8>,
    layout: Layout,
    len: usize,
}

impl AlignedBuffer {
    /// Allocate `len` zeroed bytes aligned to `alignment`.
    pub fn new(len: usize, alignment: usize) -> ScanResult<Self> {
        if !alignment.is_power_of_two() {
            return Err(ScanError::Config(format!(
                "Alignment {} is not a power of 2",
                alignment
            )));
        }
        if len == 0 {
            return Err(ScanError::Config("Cannot allocate an empty buffer".to_string()));
        }

        // Round the allocation up so the tail is aligned too
        let capacity = (len + alignment - 1) & !(alignment - 1);
        let layout = Layout::from_size_align(capacity, alignment)
            .map_err(|e| ScanError::Config(e.to_string()))?;

        // Safety: layout has non-zero size
        let raw = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).ok_or_else(|| {
            ScanError::IoError(std::io::Error::new(
                std::io::ErrorKind::OutOfMemory,
                format!("Failed to allocate {} bytes", capacity),
            ))
        })?;

        Ok(Self { ptr, layout, len })
    }

    /// Create buffer aligned to page boundary (4KB)
    pub fn page_aligned(len: usize) -> ScanResult<Self> {
        Self::new(len, PAGE_SIZE)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn alignment(&self) -> usize {
        self.layout.align()
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    pub fn zero(&mut self) {
        self.as_mut_slice().fill(0);
    }
}

impl Drop for AlignedBuffer {
    fn drop(&mut self) {
        unsafe {
            dealloc(self.ptr.as_ptr(), self.layout);
        }
    }
}

unsafe impl Send for AlignedBuffer {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_is_aligned_and_zeroed() {
        let buf = AlignedBuffer::page_aligned(65536).unwrap();
        assert_eq!(buf.as_slice().as_ptr() as usize % PAGE_SIZE, 0);
        assert_eq!(buf.len(), 65536);
        assert!(buf.as_slice().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_odd_length_keeps_requested_len() {
        let mut buf = AlignedBuffer::new(1000, 512).unwrap();
        assert_eq!(buf.len(), 1000);
        buf.as_mut_slice().fill(0xAB);
        buf.zero();
        assert!(buf.as_slice().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_bad_alignment_rejected() {
        assert!(AlignedBuffer::new(4096, 3000).is_err());
        assert!(AlignedBuffer::new(0, 4096).is_err());
    }
}
