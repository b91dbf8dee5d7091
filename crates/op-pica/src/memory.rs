//! Guest memory access for vertex and index fetch

use op_core::GpuError;

/// Read-only view of guest physical memory
pub trait GuestMemory {
    /// `len` bytes at physical address `paddr`, or `None` if unmapped
    fn read(&self, paddr: u32, len: usize) -> Option<&[u8]>;

    /// Like [`GuestMemory::read`] but with an error describing the failure
    fn read_checked(&self, paddr: u32, len: usize) -> Result<&[u8], GpuError> {
        self.read(paddr, len)
            .ok_or(GpuError::MemoryRead { addr: paddr, len })
    }
}

/// One contiguous block of memory starting at `base`
#[derive(Debug, Clone, Default)]
pub struct FlatMemory {
    base: u32,
    data: Vec<u8>,
}

impl FlatMemory {
    pub fn new(base: u32, size: usize) -> Self {
        Self {
            base,
            data: vec![0; size],
        }
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Copy `bytes` to `paddr`
    pub fn write(&mut self, paddr: u32, bytes: &[u8]) -> Result<(), GpuError> {
        let range = self.range(paddr, bytes.len()).ok_or(GpuError::MemoryWrite {
            addr: paddr,
            len: bytes.len(),
        })?;
        self.data[range].copy_from_slice(bytes);
        Ok(())
    }

    fn range(&self, paddr: u32, len: usize) -> Option<std::ops::Range<usize>> {
        let start = paddr.checked_sub(self.base)? as usize;
        let end = start.checked_add(len)?;
        (end <= self.data.len()).then_some(start..end)
    }
}

impl GuestMemory for FlatMemory {
    fn read(&self, paddr: u32, len: usize) -> Option<&[u8]> {
        self.range(paddr, len).map(|range| &self.data[range])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_write() {
        let mut mem = FlatMemory::new(0x1800_0000, 0x100);
        mem.write(0x1800_0010, &[1, 2, 3]).unwrap();
        assert_eq!(mem.read(0x1800_0010, 3), Some(&[1u8, 2, 3][..]));
        assert_eq!(mem.read(0x1800_00FF, 1), Some(&[0u8][..]));
    }

    #[test]
    fn test_out_of_range() {
        let mut mem = FlatMemory::new(0x1000, 0x10);
        assert!(mem.read(0x0FFF, 1).is_none());
        assert!(mem.read(0x100F, 2).is_none());
        assert_eq!(
            mem.read_checked(0x2000, 4),
            Err(GpuError::MemoryRead { addr: 0x2000, len: 4 })
        );
        assert!(mem.write(0x100E, &[0; 4]).is_err());
    }
}
