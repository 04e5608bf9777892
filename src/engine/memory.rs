use byteorder::{ByteOrder, LittleEndian};
use bytesize::ByteSize;
use thiserror::Error;

use super::system::PAGE_SIZE;

/// A physical address outside the configured address space.
#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
#[error("physical address {addr:#x} outside memory range of {size:#x} bytes")]
pub struct MemoryRange {
    pub addr: u64,
    pub size: u64,
}

/// Sparse, byte-addressable physical memory.
///
/// The address space is a flat array of `memory_size` bytes, but pages are
/// only materialised on first write. Reads of never-written pages return
/// zero without allocating, so a loader can park segments megabytes apart
/// while the emulator only pays for the pages it touches.
#[derive(Debug, Clone)]
pub struct Memory {
    memory_size: usize,
    page_mask: usize,
    page_shift: u32,
    data: Vec<Vec<u8>>,
}

impl Memory {
    pub fn new(memory_size: usize) -> Self {
        assert!(
            memory_size % PAGE_SIZE == 0,
            "memory size must be multiple of page size"
        );
        let page_mask = PAGE_SIZE - 1;
        let page_shift = PAGE_SIZE.trailing_zeros();
        let pages = memory_size / PAGE_SIZE;
        Self {
            memory_size,
            page_mask,
            page_shift,
            data: vec![[].to_vec(); pages],
        }
    }

    pub fn size(&self) -> usize {
        self.memory_size
    }

    /// Amount of backing store actually materialised.
    pub fn allocated(&self) -> ByteSize {
        ByteSize::b(
            self.data
                .iter()
                .filter(|page| !page.is_empty())
                .fold(0, |acc, _| acc + PAGE_SIZE as u64),
        )
    }

    fn check_range(&self, addr: u64, len: u64) -> Result<(), MemoryRange> {
        if addr.checked_add(len - 1).map_or(true, |end| end >= self.memory_size as u64) {
            return Err(MemoryRange {
                addr,
                size: self.memory_size as u64,
            });
        }
        Ok(())
    }

    fn byte(&self, addr: u64) -> u8 {
        let page = &self.data[addr as usize >> self.page_shift];
        if page.is_empty() {
            return 0;
        }
        page[addr as usize & self.page_mask]
    }

    fn byte_mut(&mut self, addr: u64) -> &mut u8 {
        let index = addr as usize >> self.page_shift;
        if self.data[index].is_empty() {
            self.data[index] = vec![0; PAGE_SIZE];
        }
        &mut self.data[index][addr as usize & self.page_mask]
    }

    /// Borrow of the in-page byte run starting at `addr`, when the page is
    /// materialised and the run does not cross a page boundary.
    fn in_page(&self, addr: u64, len: usize) -> Option<&[u8]> {
        let offset = addr as usize & self.page_mask;
        if offset + len > PAGE_SIZE {
            return None;
        }
        let page = &self.data[addr as usize >> self.page_shift];
        if page.is_empty() {
            return None;
        }
        Some(&page[offset..offset + len])
    }

    fn in_page_mut(&mut self, addr: u64, len: usize) -> Option<&mut [u8]> {
        let offset = addr as usize & self.page_mask;
        if offset + len > PAGE_SIZE {
            return None;
        }
        let index = addr as usize >> self.page_shift;
        if self.data[index].is_empty() {
            self.data[index] = vec![0; PAGE_SIZE];
        }
        Some(&mut self.data[index][offset..offset + len])
    }

    pub fn read_u8(&self, addr: u64) -> Result<u8, MemoryRange> {
        self.check_range(addr, 1)?;
        Ok(self.byte(addr))
    }

    pub fn read_u16(&self, addr: u64) -> Result<u16, MemoryRange> {
        self.check_range(addr, 2)?;
        if let Some(bytes) = self.in_page(addr, 2) {
            return Ok(LittleEndian::read_u16(bytes));
        }
        Ok(u16::from(self.byte(addr)) | u16::from(self.byte(addr + 1)) << 8)
    }

    pub fn read_u32(&self, addr: u64) -> Result<u32, MemoryRange> {
        self.check_range(addr, 4)?;
        if let Some(bytes) = self.in_page(addr, 4) {
            return Ok(LittleEndian::read_u32(bytes));
        }
        let mut value = 0;
        for i in 0..4 {
            value |= u32::from(self.byte(addr + i)) << (8 * i);
        }
        Ok(value)
    }

    pub fn read_u64(&self, addr: u64) -> Result<u64, MemoryRange> {
        self.check_range(addr, 8)?;
        if let Some(bytes) = self.in_page(addr, 8) {
            return Ok(LittleEndian::read_u64(bytes));
        }
        let mut value = 0;
        for i in 0..8 {
            value |= u64::from(self.byte(addr + i)) << (8 * i);
        }
        Ok(value)
    }

    pub fn write_u8(&mut self, addr: u64, value: u8) -> Result<(), MemoryRange> {
        self.check_range(addr, 1)?;
        *self.byte_mut(addr) = value;
        Ok(())
    }

    pub fn write_u16(&mut self, addr: u64, value: u16) -> Result<(), MemoryRange> {
        self.check_range(addr, 2)?;
        if let Some(bytes) = self.in_page_mut(addr, 2) {
            LittleEndian::write_u16(bytes, value);
            return Ok(());
        }
        for i in 0..2 {
            *self.byte_mut(addr + i) = (value >> (8 * i)) as u8;
        }
        Ok(())
    }

    pub fn write_u32(&mut self, addr: u64, value: u32) -> Result<(), MemoryRange> {
        self.check_range(addr, 4)?;
        if let Some(bytes) = self.in_page_mut(addr, 4) {
            LittleEndian::write_u32(bytes, value);
            return Ok(());
        }
        for i in 0..4 {
            *self.byte_mut(addr + i) = (value >> (8 * i)) as u8;
        }
        Ok(())
    }

    pub fn write_u64(&mut self, addr: u64, value: u64) -> Result<(), MemoryRange> {
        self.check_range(addr, 8)?;
        if let Some(bytes) = self.in_page_mut(addr, 8) {
            LittleEndian::write_u64(bytes, value);
            return Ok(());
        }
        for i in 0..8 {
            *self.byte_mut(addr + i) = (value >> (8 * i)) as u8;
        }
        Ok(())
    }

    /// Stamps a byte slice into memory, materialising pages as needed.
    pub fn write_bytes(&mut self, addr: u64, bytes: &[u8]) -> Result<(), MemoryRange> {
        if bytes.is_empty() {
            return Ok(());
        }
        self.check_range(addr, bytes.len() as u64)?;
        let mut addr = addr;
        let mut rest = bytes;
        while !rest.is_empty() {
            let offset = addr as usize & self.page_mask;
            let run = (PAGE_SIZE - offset).min(rest.len());
            self.in_page_mut(addr, run)
                .expect("run stays within one page")
                .copy_from_slice(&rest[..run]);
            addr += run as u64;
            rest = &rest[run..];
        }
        Ok(())
    }

    /// Copies a contiguous byte range out of memory. Unmaterialised pages
    /// read as zero. This is the linear view used by tests and post-mortem
    /// inspection; execution always goes through the paged accessors.
    pub fn copy_out(&self, addr: u64, len: usize) -> Result<Vec<u8>, MemoryRange> {
        if len == 0 {
            return Ok(Vec::new());
        }
        self.check_range(addr, len as u64)?;
        let mut out = vec![0; len];
        let mut copied = 0;
        while copied < len {
            let at = addr + copied as u64;
            let offset = at as usize & self.page_mask;
            let run = (PAGE_SIZE - offset).min(len - copied);
            if let Some(bytes) = self.in_page(at, run) {
                out[copied..copied + run].copy_from_slice(bytes);
            }
            copied += run;
        }
        Ok(out)
    }

    /// Returns an iterator over materialised pages as `(base_address, bytes)`.
    ///
    /// Note that the iterator does not cover un-mapped pages (i.e. pages that
    /// have not been written to before), which read as all zero.
    pub fn iter_pages(&self) -> impl Iterator<Item = (u64, &[u8])> {
        self.data
            .iter()
            .enumerate()
            .filter(|(_, page)| !page.is_empty())
            .map(move |(index, page)| ((index << self.page_shift) as u64, page.as_slice()))
    }
}
