use super::{AllocError, BlockId, BlockMetadata, DeviceSize, MemoryBackend};
use std::ptr::NonNull;

#[derive(Debug, Clone, Copy)]
struct MappedPtr(NonNull<u8>);

// SAFETY: only dereferenced under the pool lock or through a `MappedRange`.
unsafe impl Send for MappedPtr {}

#[derive(Debug)]
struct Mapping {
    ptr: MappedPtr,
    count: u32,
}

/// One device memory block of a pool together with its book keeping.
#[derive(Debug)]
pub(crate) struct DeviceBlock {
    id: BlockId,
    metadata: Box<dyn BlockMetadata>,
    mapping: Option<Mapping>,
}

impl DeviceBlock {
    pub fn new(id: BlockId, metadata: Box<dyn BlockMetadata>) -> Self {
        Self {
            id,
            metadata,
            mapping: None,
        }
    }

    pub fn id(&self) -> BlockId {
        self.id
    }

    pub fn size(&self) -> DeviceSize {
        self.metadata.size()
    }

    pub fn metadata(&self) -> &dyn BlockMetadata {
        self.metadata.as_ref()
    }

    pub fn metadata_mut(&mut self) -> &mut dyn BlockMetadata {
        self.metadata.as_mut()
    }

    /// Maps the block, reference counted. Returns the block's base address.
    pub fn map<B: MemoryBackend>(&mut self, backend: &mut B) -> Result<NonNull<u8>, AllocError> {
        if let Some(mapping) = &mut self.mapping {
            mapping.count += 1;
            return Ok(mapping.ptr.0);
        }
        let ptr = backend.map(self.id)?;
        self.mapping = Some(Mapping {
            ptr: MappedPtr(ptr),
            count: 1,
        });
        Ok(ptr)
    }

    pub fn unmap<B: MemoryBackend>(&mut self, backend: &mut B) -> Result<(), AllocError> {
        let mapping = self
            .mapping
            .as_mut()
            .ok_or(AllocError::InvalidHandle("block is not mapped"))?;
        mapping.count -= 1;
        if mapping.count == 0 {
            self.mapping = None;
            backend.unmap(self.id);
        }
        Ok(())
    }

    /// Runs `f` on the whole block's memory.
    pub fn with_mapped<B, R>(
        &mut self,
        backend: &mut B,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> Result<R, AllocError>
    where
        B: MemoryBackend,
    {
        let len = usize::try_from(self.size())
            .map_err(|_| AllocError::ValidationFailed("block is not host addressable".into()))?;
        let ptr = self.map(backend)?;
        // SAFETY: the backend hands out a pointer valid for the block's size
        // until the matching unmap, and the pool lock prevents concurrent access.
        let data = unsafe { std::slice::from_raw_parts_mut(ptr.as_ptr(), len) };
        let res = f(data);
        self.unmap(backend)?;
        Ok(res)
    }

    /// Gives the block back to the backend.
    pub fn destroy<B: MemoryBackend>(self, backend: &mut B) {
        if let Some(mapping) = &self.mapping {
            log::warn!(
                "Destroying block {:?} that is still mapped {} time(s)",
                self.id,
                mapping.count
            );
            backend.unmap(self.id);
        }
        if !self.metadata.is_empty() {
            log::warn!(
                "Destroying block {:?} with {} live allocation(s)",
                self.id,
                self.metadata.allocation_count()
            );
        }
        backend.destroy_block(self.id);
    }
}
