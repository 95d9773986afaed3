//! Byte storage behind a heap
//!
//! The real instruction heap is a locked device buffer owned by the
//! hardware layer. [`HostHeapMemory`] is a CPU mirror with the same
//! contract, used by software backends and tests.

use crate::error::{out_of_space, HeapResult};

/// Raw access to the heap's bytes
pub trait HeapMemory: Send {
    fn capacity(&self) -> usize;

    /// Copy `bytes` to `offset`
    fn write(&mut self, offset: usize, bytes: &[u8]) -> HeapResult<()>;

    /// Set `len` bytes starting at `offset` to `value`
    fn fill(&mut self, offset: usize, len: usize, value: u8) -> HeapResult<()>;

    fn read(&self, offset: usize, len: usize) -> HeapResult<&[u8]>;

    /// Replace the storage with a zeroed buffer of `new_capacity` bytes
    ///
    /// Previous contents are not preserved: callers reload whatever they
    /// still need.
    fn resize(&mut self, new_capacity: usize) -> HeapResult<()>;
}

/// `Vec<u8>`-backed heap memory
#[derive(Debug, Clone, Default)]
pub struct HostHeapMemory {
    bytes: Vec<u8>,
}

impl HostHeapMemory {
    pub fn new(capacity: usize) -> HeapResult<Self> {
        let mut memory = HostHeapMemory { bytes: Vec::new() };
        memory.resize(capacity)?;
        Ok(memory)
    }

    fn range(&self, offset: usize, len: usize) -> HeapResult<std::ops::Range<usize>> {
        let end = offset
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| out_of_space("heap memory", offset.saturating_add(len), self.bytes.len()))?;
        Ok(offset..end)
    }
}

impl HeapMemory for HostHeapMemory {
    fn capacity(&self) -> usize {
        self.bytes.len()
    }

    fn write(&mut self, offset: usize, bytes: &[u8]) -> HeapResult<()> {
        let range = self.range(offset, bytes.len())?;
        self.bytes[range].copy_from_slice(bytes);
        Ok(())
    }

    fn fill(&mut self, offset: usize, len: usize, value: u8) -> HeapResult<()> {
        let range = self.range(offset, len)?;
        self.bytes[range].fill(value);
        Ok(())
    }

    fn read(&self, offset: usize, len: usize) -> HeapResult<&[u8]> {
        let range = self.range(offset, len)?;
        Ok(&self.bytes[range])
    }

    fn resize(&mut self, new_capacity: usize) -> HeapResult<()> {
        let mut bytes = Vec::new();
        bytes.try_reserve_exact(new_capacity)?;
        bytes.resize(new_capacity, 0);
        self.bytes = bytes;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_read() {
        let mut memory = HostHeapMemory::new(256).unwrap();
        memory.write(64, &[1, 2, 3]).unwrap();
        assert_eq!(memory.read(64, 3).unwrap(), &[1, 2, 3]);
        assert_eq!(memory.read(67, 1).unwrap(), &[0]);
    }

    #[test]
    fn test_fill() {
        let mut memory = HostHeapMemory::new(128).unwrap();
        memory.fill(0, 128, 0xAB).unwrap();
        memory.fill(8, 8, 0).unwrap();
        assert_eq!(memory.read(7, 2).unwrap(), &[0xAB, 0]);
        assert_eq!(memory.read(16, 1).unwrap(), &[0xAB]);
    }

    #[test]
    fn test_out_of_bounds() {
        let mut memory = HostHeapMemory::new(64).unwrap();
        assert!(memory.write(60, &[0; 8]).is_err());
        assert!(memory.read(0, 65).is_err());
        assert!(memory.fill(usize::MAX, 2, 0).is_err());
    }

    #[test]
    fn test_resize_zeroes() {
        let mut memory = HostHeapMemory::new(64).unwrap();
        memory.fill(0, 64, 0xFF).unwrap();
        memory.resize(128).unwrap();
        assert_eq!(memory.capacity(), 128);
        assert!(memory.read(0, 128).unwrap().iter().all(|b| *b == 0));
    }
}
