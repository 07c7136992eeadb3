use crate::provider::{LinearMemory, MemoryProvider};
use crate::{Address, MemoryError};
use rustc_hash::{FxHashMap, FxHashSet};
use std::fmt;

/// Identifies a backing buffer. [`BufferId::FIXED`] stands for the whole of
/// fixed memory, where a view's offset is its address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(u32);

impl BufferId {
    pub const FIXED: BufferId = BufferId(0);
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buffer#{}", self.0)
    }
}

/// Canonical identity of a byte range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ViewId(u32);

impl fmt::Display for ViewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "view#{}", self.0)
    }
}

/// What a view covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewInfo {
    pub buffer: BufferId,
    pub offset: usize,
    pub len: usize,
}

/// Purpose of a fixed allocation, passed through to the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AllocKind {
    /// Long-lived allocation owned by the host.
    Heap,
    /// Call-scoped shadow copy, over-allocated and aligned by hand.
    Scratch,
    /// Host buffer placed inside fixed memory.
    Resident,
}

/// Bookkeeping for a fixed allocation made through the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedAllocation {
    pub kind: AllocKind,
    pub address: Address,
    /// Address handed out by the provider, which is what gets freed.
    pub unaligned: Address,
    pub len: usize,
    pub reserved: usize,
    pub align: usize,
}

#[derive(Debug)]
enum Backing {
    Fixed,
    Relocatable(Vec<u8>),
    Resident { address: Address, len: usize },
}

/// Hands out canonical views over relocatable buffers and fixed memory.
///
/// A given (buffer, offset, len) always maps to the same [`ViewId`] for the
/// registry's lifetime, so view identity can stand in for content equality.
pub struct ViewRegistry {
    provider: Box<dyn MemoryProvider>,
    buffers: Vec<Backing>,
    views: Vec<ViewInfo>,
    canonical: FxHashMap<(BufferId, usize, usize), ViewId>,
    allocations: FxHashMap<ViewId, FixedAllocation>,
    released: FxHashSet<ViewId>,
}

impl ViewRegistry {
    pub fn new(provider: Box<dyn MemoryProvider>) -> Self {
        ViewRegistry {
            provider,
            buffers: vec![Backing::Fixed],
            views: Vec::new(),
            canonical: FxHashMap::default(),
            allocations: FxHashMap::default(),
            released: FxHashSet::default(),
        }
    }

    pub fn provider(&self) -> &dyn MemoryProvider {
        self.provider.as_ref()
    }

    pub fn provider_mut(&mut self) -> &mut dyn MemoryProvider {
        self.provider.as_mut()
    }

    /// Registers a relocatable buffer holding `bytes`.
    pub fn create_buffer(&mut self, bytes: Vec<u8>) -> BufferId {
        let id = BufferId(self.buffers.len() as u32);
        self.buffers.push(Backing::Relocatable(bytes));
        id
    }

    /// Creates a host buffer whose bytes live in fixed memory, so views over
    /// it are addressable without shadowing.
    pub fn create_resident_buffer(&mut self, len: usize, align: usize) -> Result<BufferId, MemoryError> {
        let address = self.provider.allocate_fixed(len, align, AllocKind::Resident)?;
        let id = BufferId(self.buffers.len() as u32);
        self.buffers.push(Backing::Resident { address, len });
        log::debug!("resident {} of {} bytes at {:#x}", id, len, address);
        Ok(id)
    }

    fn backing(&self, buffer: BufferId) -> Result<&Backing, MemoryError> {
        self.buffers.get(buffer.0 as usize).ok_or(MemoryError::InvalidBuffer(buffer))
    }

    pub fn buffer_len(&self, buffer: BufferId) -> Result<usize, MemoryError> {
        match self.backing(buffer)? {
            Backing::Fixed => Ok(usize::MAX),
            Backing::Relocatable(bytes) => Ok(bytes.len()),
            Backing::Resident { len, .. } => Ok(*len),
        }
    }

    /// Fixed address of a buffer's first byte, for buffers that live in
    /// fixed memory.
    pub fn buffer_address(&self, buffer: BufferId) -> Option<Address> {
        match self.backing(buffer).ok()? {
            Backing::Fixed => Some(0),
            Backing::Resident { address, .. } => Some(*address),
            Backing::Relocatable(_) => None,
        }
    }

    /// Gets the canonical view over `len` bytes at `offset` of `buffer`.
    pub fn obtain_view(&mut self, buffer: BufferId, offset: usize, len: usize) -> Result<ViewId, MemoryError> {
        if let Some(&view) = self.canonical.get(&(buffer, offset, len)) {
            return Ok(view);
        }
        let available = self.buffer_len(buffer)?;
        if buffer != BufferId::FIXED && offset.checked_add(len).map_or(true, |end| end > available) {
            return Err(MemoryError::Range { offset, len, available });
        }
        let view = ViewId(self.views.len() as u32);
        self.views.push(ViewInfo { buffer, offset, len });
        self.canonical.insert((buffer, offset, len), view);
        Ok(view)
    }

    /// Gets the view over `len` bytes at `offset` inside `view`.
    pub fn subview(&mut self, view: ViewId, offset: usize, len: usize) -> Result<ViewId, MemoryError> {
        let info = self.info(view)?;
        if offset.checked_add(len).map_or(true, |end| end > info.len) {
            return Err(MemoryError::Range {
                offset,
                len,
                available: info.len,
            });
        }
        self.obtain_view(info.buffer, info.offset + offset, len)
    }

    pub fn info(&self, view: ViewId) -> Result<ViewInfo, MemoryError> {
        self.views.get(view.0 as usize).copied().ok_or(MemoryError::InvalidView(view))
    }

    pub fn is_fixed(&self, view: ViewId) -> Result<bool, MemoryError> {
        Ok(self.info(view)?.buffer == BufferId::FIXED)
    }

    /// Gets the address of an externally backed view.
    pub fn get_address(&self, view: ViewId) -> Result<Address, MemoryError> {
        let info = self.info(view)?;
        self.buffer_address(info.buffer)
            .map(|base| base + info.offset)
            .ok_or(MemoryError::NotAddressable(view))
    }

    /// Gets the view over fixed memory at `address`. Addresses inside a
    /// resident buffer resolve to a view of that buffer.
    pub fn obtain_fixed_view(&mut self, address: Address, len: usize) -> Result<ViewId, MemoryError> {
        if len == 0 {
            // shared zero-length sentinel per address, never dereferenced
            return self.obtain_view(BufferId::FIXED, address, 0);
        }
        let resident = self.buffers.iter().enumerate().find_map(|(index, backing)| match backing {
            Backing::Resident { address: base, len: size }
                if address >= *base && address.checked_add(len).map_or(false, |end| end <= base + size) =>
            {
                Some((BufferId(index as u32), address - base))
            }
            _ => None,
        });
        if let Some((buffer, offset)) = resident {
            return self.obtain_view(buffer, offset, len);
        }
        self.provider.bytes(address, len)?;
        self.obtain_view(BufferId::FIXED, address, len)
    }

    /// The zero-length view standing for null pointers and empty slices.
    pub fn empty_view(&mut self) -> Result<ViewId, MemoryError> {
        self.obtain_view(BufferId::FIXED, 0, 0)
    }

    /// Allocates fixed memory through the provider and records the
    /// allocation so that [`ViewRegistry::release_fixed_view`] can free it.
    pub fn allocate_fixed_view(&mut self, len: usize, align: usize, kind: AllocKind) -> Result<ViewId, MemoryError> {
        if align == 0 || !align.is_power_of_two() {
            return Err(MemoryError::InvalidLayout(format!("alignment {}", align)));
        }
        if len == 0 {
            return self.obtain_fixed_view(align, 0);
        }
        let (unaligned, address, reserved) = match kind {
            AllocKind::Scratch => {
                let reserved = len + align - 1;
                let unaligned = self.provider.allocate_fixed(reserved, 1, kind)?;
                (unaligned, (unaligned + align - 1) & !(align - 1), reserved)
            }
            _ => {
                let address = self.provider.allocate_fixed(len, align, kind)?;
                (address, address, len)
            }
        };
        let view = self.obtain_view(BufferId::FIXED, address, len)?;
        self.released.remove(&view);
        self.allocations.insert(
            view,
            FixedAllocation {
                kind,
                address,
                unaligned,
                len,
                reserved,
                align,
            },
        );
        log::debug!("allocated {:?} fixed {} ({} bytes, align {}) at {:#x}", kind, view, len, align, address);
        Ok(view)
    }

    pub fn allocation(&self, view: ViewId) -> Option<&FixedAllocation> {
        self.allocations.get(&view)
    }

    /// Number of fixed allocations made through the registry and not yet
    /// released.
    pub fn live_allocations(&self) -> usize {
        self.allocations.len()
    }

    /// Frees a fixed view the registry allocated. Views it does not own and
    /// views already released are left alone.
    pub fn release_fixed_view(&mut self, view: ViewId) -> Result<(), MemoryError> {
        match self.allocations.remove(&view) {
            Some(allocation) => {
                self.provider.free_fixed(allocation.kind, allocation.unaligned, allocation.reserved, allocation.align)?;
                self.released.insert(view);
                log::debug!("released {:?} fixed {} at {:#x}", allocation.kind, view, allocation.address);
            }
            None if self.released.contains(&view) => {
                log::warn!("fixed {} released twice", view);
            }
            None => {}
        }
        Ok(())
    }

    pub fn view_bytes(&self, view: ViewId) -> Result<&[u8], MemoryError> {
        let info = self.info(view)?;
        if info.len == 0 {
            return Ok(&[]);
        }
        match self.backing(info.buffer)? {
            Backing::Fixed => self.provider.bytes(info.offset, info.len),
            Backing::Resident { address, .. } => self.provider.bytes(address + info.offset, info.len),
            Backing::Relocatable(bytes) => Ok(&bytes[info.offset..info.offset + info.len]),
        }
    }

    pub fn view_bytes_mut(&mut self, view: ViewId) -> Result<&mut [u8], MemoryError> {
        let info = self.info(view)?;
        if info.len == 0 {
            return Ok(&mut []);
        }
        let resident = match self.buffers.get_mut(info.buffer.0 as usize) {
            None => return Err(MemoryError::InvalidBuffer(info.buffer)),
            Some(Backing::Relocatable(bytes)) => return Ok(&mut bytes[info.offset..info.offset + info.len]),
            Some(Backing::Resident { address, .. }) => *address,
            Some(Backing::Fixed) => 0,
        };
        self.provider.bytes_mut(resident + info.offset, info.len)
    }

    /// Copies the bytes of `from` into `to`; both views must have the same
    /// length.
    pub fn copy_view(&mut self, from: ViewId, to: ViewId) -> Result<(), MemoryError> {
        if from == to {
            return Ok(());
        }
        let bytes = self.view_bytes(from)?.to_vec();
        let dest = self.view_bytes_mut(to)?;
        if dest.len() != bytes.len() {
            return Err(MemoryError::Range {
                offset: 0,
                len: bytes.len(),
                available: dest.len(),
            });
        }
        dest.copy_from_slice(&bytes);
        Ok(())
    }

    /// Number of canonical views handed out so far.
    pub fn view_count(&self) -> usize {
        self.views.len()
    }
}

impl Default for ViewRegistry {
    fn default() -> Self {
        Self::new(Box::new(LinearMemory::default()))
    }
}

impl fmt::Debug for ViewRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewRegistry")
            .field("buffers", &self.buffers.len())
            .field("views", &self.views.len())
            .field("allocations", &self.allocations)
            .finish()
    }
}
