use crate::registry::AllocKind;
use crate::{Address, MemoryError};
use rustc_hash::FxHashMap;

/// Allocator and byte store for fixed (externally addressed) memory.
pub trait MemoryProvider {
    /// Allocates `len` bytes aligned to `align` and returns their address.
    fn allocate_fixed(&mut self, len: usize, align: usize, kind: AllocKind) -> Result<Address, MemoryError>;

    /// Frees an allocation made by [`MemoryProvider::allocate_fixed`].
    fn free_fixed(&mut self, kind: AllocKind, address: Address, len: usize, align: usize) -> Result<(), MemoryError>;

    fn bytes(&self, address: Address, len: usize) -> Result<&[u8], MemoryError>;

    fn bytes_mut(&mut self, address: Address, len: usize) -> Result<&mut [u8], MemoryError>;
}

/// A contiguous linear memory starting at `base`, the way a wasm32
/// instance exposes its memory.
///
/// Freed blocks go to a first-fit free list and are coalesced with their
/// neighbours; the memory grows at the top up to `max_size` bytes.
#[derive(Debug)]
pub struct LinearMemory {
    base: Address,
    data: Vec<u8>,
    max_size: usize,
    /// Free blocks as (address, len), sorted by address.
    free: Vec<(Address, usize)>,
    live: FxHashMap<Address, usize>,
}

impl LinearMemory {
    pub const DEFAULT_MAX_SIZE: usize = 16 * 1024 * 1024;

    pub fn new(base: Address, initial_size: usize) -> Self {
        Self::with_max_size(base, initial_size, Self::DEFAULT_MAX_SIZE.max(initial_size))
    }

    pub fn with_max_size(base: Address, initial_size: usize, max_size: usize) -> Self {
        let free = if initial_size > 0 { vec![(base, initial_size)] } else { Vec::new() };
        LinearMemory {
            base,
            data: vec![0; initial_size],
            max_size,
            free,
            live: FxHashMap::default(),
        }
    }

    pub fn base(&self) -> Address {
        self.base
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn live_allocations(&self) -> usize {
        self.live.len()
    }

    fn take_free_block(&mut self, len: usize, align: usize) -> Option<Address> {
        let (index, aligned) = self.free.iter().enumerate().find_map(|(index, &(start, size))| {
            let aligned = align_up(start, align);
            (aligned + len <= start + size).then_some((index, aligned))
        })?;
        let (start, size) = self.free.remove(index);
        let tail = start + size - (aligned + len);
        if tail > 0 {
            self.free.insert(index, (aligned + len, tail));
        }
        if aligned > start {
            self.free.insert(index, (start, aligned - start));
        }
        Some(aligned)
    }

    fn grow(&mut self, len: usize, align: usize) -> Result<Address, MemoryError> {
        let top = self.base + self.data.len();
        let aligned = align_up(top, align);
        let new_size = aligned + len - self.base;
        if new_size > self.max_size {
            return Err(MemoryError::OutOfMemory { len, align });
        }
        if aligned > top {
            self.release_block(top, aligned - top);
        }
        self.data.resize(new_size, 0);
        Ok(aligned)
    }

    fn release_block(&mut self, address: Address, len: usize) {
        let index = self.free.partition_point(|&(start, _)| start < address);
        self.free.insert(index, (address, len));
        // merge with the following block, then with the preceding one
        if index + 1 < self.free.len() && address + len == self.free[index + 1].0 {
            self.free[index].1 += self.free[index + 1].1;
            self.free.remove(index + 1);
        }
        if index > 0 && self.free[index - 1].0 + self.free[index - 1].1 == address {
            self.free[index - 1].1 += self.free[index].1;
            self.free.remove(index);
        }
    }

    fn range(&self, address: Address, len: usize) -> Result<std::ops::Range<usize>, MemoryError> {
        if address < self.base {
            return Err(MemoryError::InvalidAddress(address));
        }
        let offset = address - self.base;
        let available = self.data.len();
        match offset.checked_add(len) {
            Some(end) if end <= available => Ok(offset..end),
            _ => Err(MemoryError::Range { offset, len, available }),
        }
    }
}

impl Default for LinearMemory {
    fn default() -> Self {
        Self::new(0x1000, 0)
    }
}

impl MemoryProvider for LinearMemory {
    fn allocate_fixed(&mut self, len: usize, align: usize, kind: AllocKind) -> Result<Address, MemoryError> {
        if align == 0 || !align.is_power_of_two() {
            return Err(MemoryError::InvalidLayout(format!("alignment {}", align)));
        }
        if len == 0 {
            // dangling but well-aligned, never dereferenced
            return Ok(align);
        }
        let address = match self.take_free_block(len, align) {
            Some(address) => address,
            None => self.grow(len, align)?,
        };
        let range = self.range(address, len)?;
        self.data[range].fill(0);
        self.live.insert(address, len);
        log::trace!("linear memory: allocated {:?} {} bytes at {:#x}", kind, len, address);
        Ok(address)
    }

    fn free_fixed(&mut self, kind: AllocKind, address: Address, len: usize, _align: usize) -> Result<(), MemoryError> {
        if len == 0 {
            return Ok(());
        }
        match self.live.get(&address) {
            Some(&size) if size == len => {
                self.live.remove(&address);
                self.release_block(address, len);
                log::trace!("linear memory: freed {:?} {} bytes at {:#x}", kind, len, address);
                Ok(())
            }
            _ => Err(MemoryError::InvalidAddress(address)),
        }
    }

    fn bytes(&self, address: Address, len: usize) -> Result<&[u8], MemoryError> {
        if len == 0 {
            return Ok(&[]);
        }
        let range = self.range(address, len)?;
        Ok(&self.data[range])
    }

    fn bytes_mut(&mut self, address: Address, len: usize) -> Result<&mut [u8], MemoryError> {
        if len == 0 {
            return Ok(&mut []);
        }
        let range = self.range(address, len)?;
        Ok(&mut self.data[range])
    }
}

fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}
