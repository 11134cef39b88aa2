use super::{AllocError, DeviceSize};
use std::collections::HashMap;
use std::ptr::NonNull;

/// Identifies a device memory block handed out by a [`MemoryBackend`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(pub u64);

/// The graphics API side of the allocator: creates, destroys and maps whole
/// device memory blocks. The pool only ever asks for blocks, never for
/// individual allocations.
pub trait MemoryBackend: Send {
    /// Creates a block of `size` bytes from memory type `memory_type`.
    fn create_block(&mut self, memory_type: u32, size: DeviceSize) -> Result<BlockId, AllocError>;

    fn destroy_block(&mut self, id: BlockId);

    /// Returns the host address of the first byte of the block.
    ///
    /// The pointer stays valid until the matching `unmap`.
    fn map(&mut self, id: BlockId) -> Result<NonNull<u8>, AllocError>;

    fn unmap(&mut self, id: BlockId);
}

struct HostBlock {
    size: DeviceSize,
    // allocated on first map
    data: Option<Box<[u8]>>,
}

/// Host memory implementation of [`MemoryBackend`].
///
/// Used where no device is around: tests, the demo binary, CPU side staging.
/// Memory is only allocated once a block is mapped and is zero initialized.
/// An optional capacity makes block creation fail like an exhausted heap.
pub struct HostMemoryBackend {
    blocks: HashMap<BlockId, HostBlock>,
    next_id: u64,
    capacity: Option<DeviceSize>,
    used: DeviceSize,
}

impl Default for HostMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl HostMemoryBackend {
    pub fn new() -> Self {
        Self {
            blocks: HashMap::new(),
            next_id: 0,
            capacity: None,
            used: 0,
        }
    }

    /// A backend whose blocks may add up to at most `capacity` bytes.
    pub fn with_capacity(capacity: DeviceSize) -> Self {
        Self {
            capacity: Some(capacity),
            ..Self::new()
        }
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Bytes of all live blocks.
    pub fn used(&self) -> DeviceSize {
        self.used
    }
}

impl MemoryBackend for HostMemoryBackend {
    fn create_block(&mut self, memory_type: u32, size: DeviceSize) -> Result<BlockId, AllocError> {
        let new_used = self.used.checked_add(size).ok_or(AllocError::OutOfMemory)?;
        if self.capacity.is_some_and(|capacity| new_used > capacity) {
            log::debug!(
                "Host heap exhausted: {} of {:?} bytes used, {} requested",
                self.used,
                self.capacity,
                size
            );
            return Err(AllocError::OutOfMemory);
        }
        if usize::try_from(size).is_err() {
            return Err(AllocError::OutOfMemory);
        }

        let id = BlockId(self.next_id);
        self.next_id += 1;
        self.used = new_used;
        self.blocks.insert(id, HostBlock { size, data: None });
        log::trace!("Created host block {:?} of {} bytes (type {})", id, size, memory_type);
        Ok(id)
    }

    fn destroy_block(&mut self, id: BlockId) {
        match self.blocks.remove(&id) {
            Some(block) => self.used -= block.size,
            None => log::warn!("Destroying unknown host block {:?}", id),
        }
    }

    fn map(&mut self, id: BlockId) -> Result<NonNull<u8>, AllocError> {
        let block = self
            .blocks
            .get_mut(&id)
            .ok_or(AllocError::InvalidHandle("unknown block"))?;
        let size = block.size as usize;
        let data = block
            .data
            .get_or_insert_with(|| vec![0u8; size].into_boxed_slice());
        NonNull::new(data.as_mut_ptr()).ok_or(AllocError::OutOfMemory)
    }

    fn unmap(&mut self, _id: BlockId) {
        // host memory stays resident until the block is destroyed
    }
}
