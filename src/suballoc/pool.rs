use super::block::DeviceBlock;
use super::corruption::{
    fill_pattern, find_pattern_mismatch, validate_magic, write_magic,
    ALLOCATION_FILL_PATTERN_CREATED, ALLOCATION_FILL_PATTERN_DESTROYED,
};
use super::{
    create_metadata, AllocError, AllocationRequest, AllocationStrategy, BlockId, DeviceSize,
    MemoryBackend, PlacementPlan, PoolDesc, Statistics, Suballocation, SuballocationKind,
};
use crate::util::align_up;
use std::ops::Range;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// A granted address range. Owned by whoever requested it, given back with
/// [`BlockPool::free`].
#[derive(Debug, PartialEq, Eq)]
pub struct Allocation {
    pool_id: u64,
    block_id: BlockId,
    offset: DeviceSize,
    size: DeviceSize,
    kind: SuballocationKind,
}

impl Allocation {
    pub fn block_id(&self) -> BlockId {
        self.block_id
    }

    /// Offset inside the block, the value to bind buffers and images at.
    pub fn offset(&self) -> DeviceSize {
        self.offset
    }

    pub fn size(&self) -> DeviceSize {
        self.size
    }

    pub fn kind(&self) -> SuballocationKind {
        self.kind
    }

    #[cfg(test)]
    pub(crate) fn duplicate(&self) -> Self {
        Self { ..*self }
    }
}

/// Host view of a mapped allocation.
///
/// Valid until the matching [`BlockPool::unmap`] and only while the
/// allocation is live.
#[derive(Debug)]
pub struct MappedRange {
    ptr: NonNull<u8>,
    len: usize,
}

impl MappedRange {
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// # Safety
    ///
    /// The range must still be mapped, its allocation must be live, and no
    /// other reference to the same bytes may exist for `'a`.
    pub unsafe fn as_mut_slice<'a>(&self) -> &'a mut [u8] {
        std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len)
    }
}

struct PoolState<B> {
    backend: B,
    // creation order
    blocks: Vec<DeviceBlock>,
}

/// A set of blocks of one memory type, handing out suballocations of them.
///
/// All mutations go through one mutex, so a pool can be shared between the
/// render thread and loader threads behind an `Arc`.
pub struct BlockPool<B: MemoryBackend> {
    id: u64,
    desc: PoolDesc,
    state: Mutex<PoolState<B>>,
}

impl<B: MemoryBackend> BlockPool<B> {
    pub fn new(desc: PoolDesc, backend: B) -> Result<Self, AllocError> {
        desc.validate()?;

        let pool = Self {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            desc,
            state: Mutex::new(PoolState {
                backend,
                blocks: Vec::new(),
            }),
        };

        {
            let mut state = pool.lock();
            for _ in 0..pool.desc.min_block_count {
                let size = align_up(pool.desc.block_size, pool.desc.block_size_granularity);
                pool.create_block(&mut state, size)?;
            }
        }

        log::debug!(
            "Created block pool {} for memory type {} ({:?}, block size {})",
            pool.id,
            pool.desc.memory_type,
            pool.desc.metadata_kind,
            pool.desc.block_size
        );
        Ok(pool)
    }

    pub fn desc(&self) -> &PoolDesc {
        &self.desc
    }

    fn lock(&self) -> MutexGuard<'_, PoolState<B>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocates a range for `request`, creating a new block if none of the
    /// existing ones has room.
    pub fn allocate(&self, request: &AllocationRequest) -> Result<Allocation, AllocError> {
        request.validate()?;
        let request = AllocationRequest {
            strategy: Some(request.strategy.unwrap_or(self.desc.default_strategy)),
            ..*request
        };

        let mut state = self.lock();
        let res = self.allocate_locked(&mut state, &request);
        match &res {
            Ok(a) => log::trace!(
                "Allocated {} bytes ({:?}) at {:?}+{}",
                a.size,
                a.kind,
                a.block_id,
                a.offset
            ),
            Err(e) => log::debug!("Allocation of {} bytes failed: {}", request.size, e),
        }
        res
    }

    fn allocate_locked(
        &self,
        state: &mut PoolState<B>,
        request: &AllocationRequest,
    ) -> Result<Allocation, AllocError> {
        for index in self.block_order(&state.blocks, request) {
            if let Some(plan) = state.blocks[index].metadata().find_free_region(request) {
                return self.commit(state, index, &plan);
            }
        }

        if let Some(max) = self.desc.max_block_count {
            if state.blocks.len() >= max {
                return Err(AllocError::OutOfMemory);
            }
        }

        let block_size = self.new_block_size(request)?;
        let index = self.create_block(state, block_size)?;
        let plan = state.blocks[index]
            .metadata()
            .find_free_region(request)
            .ok_or(AllocError::OutOfMemory)?;
        self.commit(state, index, &plan)
    }

    /// Blocks worth trying, in the order they are tried.
    ///
    /// Best and first fit look at the block with the least free space first,
    /// which keeps the other blocks empty enough to be released. Min offset
    /// goes by creation order.
    fn block_order(&self, blocks: &[DeviceBlock], request: &AllocationRequest) -> Vec<usize> {
        let mut order: Vec<usize> = (0..blocks.len())
            .filter(|&i| blocks[i].metadata().sum_free_size() >= request.size)
            .collect();
        match request.strategy.unwrap_or(self.desc.default_strategy) {
            AllocationStrategy::MinOffset => {}
            AllocationStrategy::MinMemory | AllocationStrategy::MinTime => {
                order.sort_by_key(|&i| (blocks[i].metadata().sum_free_size(), blocks[i].id()));
            }
        }
        order
    }

    fn new_block_size(&self, request: &AllocationRequest) -> Result<DeviceSize, AllocError> {
        let margin = self.desc.debug.margin;
        let required = margin
            .checked_add(request.alignment - 1)
            .and_then(|v| v.checked_add(request.size))
            .and_then(|v| v.checked_add(margin))
            .ok_or(AllocError::OutOfMemory)?;
        let size = self.desc.block_size.max(required);
        size.checked_add(self.desc.block_size_granularity - 1)
            .map(|v| v & !(self.desc.block_size_granularity - 1))
            .ok_or(AllocError::OutOfMemory)
    }

    fn create_block(&self, state: &mut PoolState<B>, size: DeviceSize) -> Result<usize, AllocError> {
        let PoolState { backend, blocks } = state;
        let id = backend.create_block(self.desc.memory_type, size).map_err(|e| {
            log::debug!("Backend could not create a block of {} bytes: {}", size, e);
            AllocError::OutOfMemory
        })?;
        let mut block = DeviceBlock::new(id, create_metadata(&self.desc.metadata_desc(), size));

        // free memory carries the destroyed pattern, see `check_corruption`
        if self.desc.debug.initialize_allocations {
            let filled = block.with_mapped(backend, |data| {
                fill_pattern(data, ALLOCATION_FILL_PATTERN_DESTROYED)
            });
            if let Err(e) = filled {
                block.destroy(backend);
                return Err(e);
            }
        }

        blocks.push(block);
        log::debug!(
            "Pool {} created block {:?} of {} bytes ({} blocks)",
            self.id,
            id,
            size,
            blocks.len()
        );
        Ok(blocks.len() - 1)
    }

    /// Host byte range of `[offset, offset + size)`.
    fn host_range(offset: DeviceSize, size: DeviceSize) -> Range<usize> {
        offset as usize..(offset + size) as usize
    }

    fn write_guards(&self, data: &mut [u8], offset: DeviceSize, size: DeviceSize) {
        let debug = &self.desc.debug;
        let payload = Self::host_range(offset, size);
        let margin = debug.margin as usize;
        write_magic(data, payload.start - margin..payload.start, debug.magic_value);
        write_magic(data, payload.end..payload.end + margin, debug.magic_value);
    }

    fn guards_intact(&self, data: &[u8], offset: DeviceSize, size: DeviceSize) -> bool {
        let debug = &self.desc.debug;
        let payload = Self::host_range(offset, size);
        let margin = debug.margin as usize;
        validate_magic(data, payload.start - margin..payload.start, debug.magic_value)
            && validate_magic(data, payload.end..payload.end + margin, debug.magic_value)
    }

    /// Part of the free range `free` that no live neighbour's margin overlaps.
    ///
    /// With `initialize_allocations` on, these bytes always hold
    /// `ALLOCATION_FILL_PATTERN_DESTROYED`.
    fn free_interior(&self, free: &Suballocation, block_size: DeviceSize) -> Option<Range<usize>> {
        let margin = self.desc.debug.margin;
        let start = if free.offset > 0 {
            free.offset + margin
        } else {
            0
        };
        let end = if free.end() < block_size {
            free.end().saturating_sub(margin)
        } else {
            block_size
        };
        (start < end).then(|| Self::host_range(start, end - start))
    }

    fn commit(
        &self,
        state: &mut PoolState<B>,
        index: usize,
        plan: &PlacementPlan,
    ) -> Result<Allocation, AllocError> {
        let PoolState { backend, blocks } = state;
        let block = &mut blocks[index];
        block.metadata_mut().commit(plan)?;

        let debug = &self.desc.debug;
        if debug.corruption_detection || debug.initialize_allocations {
            let written = block.with_mapped(backend, |data| {
                if debug.corruption_detection {
                    self.write_guards(data, plan.offset, plan.size);
                }
                if debug.initialize_allocations {
                    let payload = Self::host_range(plan.offset, plan.size);
                    fill_pattern(&mut data[payload], ALLOCATION_FILL_PATTERN_CREATED);
                }
            });
            if let Err(e) = written {
                block.metadata_mut().release(plan.offset)?;
                return Err(e);
            }
        }

        #[cfg(feature = "validate_every_op")]
        block.metadata().validate()?;

        Ok(Allocation {
            pool_id: self.id,
            block_id: block.id(),
            offset: plan.offset,
            size: plan.size,
            kind: plan.kind,
        })
    }

    /// Looks up the block of a live allocation of this pool.
    fn find_live(
        &self,
        blocks: &[DeviceBlock],
        allocation: &Allocation,
    ) -> Result<usize, AllocError> {
        if allocation.pool_id != self.id {
            return Err(AllocError::InvalidHandle("allocation belongs to another pool"));
        }
        let index = blocks
            .iter()
            .position(|b| b.id() == allocation.block_id)
            .ok_or(AllocError::InvalidHandle("unknown block"))?;
        match blocks[index].metadata().allocation_at(allocation.offset) {
            Some(s) if s.size == allocation.size && s.kind == allocation.kind => Ok(index),
            _ => Err(AllocError::InvalidHandle("allocation is not live")),
        }
    }

    /// Gives `allocation` back to its block.
    ///
    /// With corruption detection on, damaged guard bytes are reported as
    /// `ValidationFailed`. The range is released either way, so the handle is
    /// spent once this returns.
    pub fn free(&self, allocation: Allocation) -> Result<(), AllocError> {
        let mut state = self.lock();
        let PoolState { backend, blocks } = &mut *state;
        let index = self.find_live(blocks, &allocation)?;
        let block = &mut blocks[index];
        let debug = &self.desc.debug;

        let intact = !debug.corruption_detection
            || block.with_mapped(backend, |data| {
                self.guards_intact(data, allocation.offset, allocation.size)
            })?;

        block.metadata_mut().release(allocation.offset)?;
        log::trace!(
            "Freed {} bytes at {:?}+{}",
            allocation.size,
            allocation.block_id,
            allocation.offset
        );

        if debug.initialize_allocations {
            let block_size = block.size();
            let interior = block
                .metadata()
                .suballocations()
                .iter()
                .find(|s| s.is_free() && s.offset <= allocation.offset && allocation.offset < s.end())
                .and_then(|free| self.free_interior(free, block_size));
            if let Some(interior) = interior {
                block.with_mapped(backend, |data| {
                    fill_pattern(&mut data[interior], ALLOCATION_FILL_PATTERN_DESTROYED)
                })?;
            }
        }

        #[cfg(feature = "validate_every_op")]
        block.metadata().validate()?;

        if block.metadata().is_empty() {
            self.release_empty_block(&mut state, index);
        }

        if !intact {
            log::error!(
                "Memory corruption detected around {:?}+{} ({} bytes)",
                allocation.block_id,
                allocation.offset,
                allocation.size
            );
            return Err(AllocError::ValidationFailed(format!(
                "corruption detected around allocation at {:?}+{}",
                allocation.block_id, allocation.offset
            )));
        }
        Ok(())
    }

    /// Destroys the now empty block at `index` unless it is needed to keep
    /// `keep_empty_blocks` warm or to stay at `min_block_count`.
    fn release_empty_block(&self, state: &mut PoolState<B>, index: usize) {
        let empty = state
            .blocks
            .iter()
            .filter(|b| b.metadata().is_empty())
            .count();
        if empty <= self.desc.keep_empty_blocks || state.blocks.len() <= self.desc.min_block_count {
            return;
        }

        let block = state.blocks.remove(index);
        log::debug!(
            "Pool {} destroys empty block {:?} of {} bytes",
            self.id,
            block.id(),
            block.size()
        );
        block.destroy(&mut state.backend);
    }

    /// Maps the block of `allocation` and returns its range. Pair with
    /// [`BlockPool::unmap`].
    pub fn map(&self, allocation: &Allocation) -> Result<MappedRange, AllocError> {
        let mut state = self.lock();
        let PoolState { backend, blocks } = &mut *state;
        let index = self.find_live(blocks, allocation)?;
        let len = usize::try_from(allocation.size)
            .map_err(|_| AllocError::ValidationFailed("allocation is not host addressable".into()))?;
        let base = blocks[index].map(backend)?;
        // SAFETY: offset + size lies within the block the backend mapped.
        let ptr = unsafe { NonNull::new_unchecked(base.as_ptr().add(allocation.offset as usize)) };
        Ok(MappedRange { ptr, len })
    }

    pub fn unmap(&self, allocation: &Allocation) -> Result<(), AllocError> {
        let mut state = self.lock();
        let PoolState { backend, blocks } = &mut *state;
        let index = self.find_live(blocks, allocation)?;
        blocks[index].unmap(backend)
    }

    pub fn block_count(&self) -> usize {
        self.lock().blocks.len()
    }

    pub fn statistics(&self) -> Statistics {
        let state = self.lock();
        let mut total = Statistics::default();
        for block in &state.blocks {
            total.merge(&block.metadata().statistics());
        }
        total
    }

    /// Snapshot of the ranges of one block.
    pub fn suballocations(&self, block_id: BlockId) -> Option<Vec<Suballocation>> {
        let state = self.lock();
        state
            .blocks
            .iter()
            .find(|b| b.id() == block_id)
            .map(|b| b.metadata().suballocations())
    }

    /// Checks the invariants of every block.
    pub fn validate(&self) -> Result<(), AllocError> {
        let state = self.lock();
        for (i, block) in state.blocks.iter().enumerate() {
            block.metadata().validate()?;
            super::error::ensure_valid!(
                state.blocks[..i].iter().all(|b| b.id() != block.id()),
                "block {:?} is listed twice",
                block.id()
            );
        }
        Ok(())
    }

    /// Verifies the guard bytes around every live allocation and, with
    /// `initialize_allocations` on, that no freed byte was written since its
    /// free.
    pub fn check_corruption(&self) -> Result<(), AllocError> {
        let debug = &self.desc.debug;
        if !debug.corruption_detection && !debug.initialize_allocations {
            return Err(AllocError::InvalidConfig(
                "corruption detection and allocation initialization are both disabled".into(),
            ));
        }

        let mut state = self.lock();
        let PoolState { backend, blocks } = &mut *state;
        for block in blocks
            .iter_mut()
            .filter(|b| debug.initialize_allocations || !b.metadata().is_empty())
        {
            let ranges = block.metadata().suballocations();
            let block_size = block.size();
            let damaged = block.with_mapped(backend, |data| {
                ranges
                    .iter()
                    .find(|s| {
                        if s.is_free() {
                            debug.initialize_allocations
                                && self.free_interior(s, block_size).is_some_and(|interior| {
                                    find_pattern_mismatch(
                                        &data[interior],
                                        ALLOCATION_FILL_PATTERN_DESTROYED,
                                    )
                                    .is_some()
                                })
                        } else {
                            debug.corruption_detection && !self.guards_intact(data, s.offset, s.size)
                        }
                    })
                    .copied()
            })?;

            if let Some(s) = damaged {
                let what = if s.is_free() {
                    "freed memory written"
                } else {
                    "guard bytes damaged"
                };
                log::error!("Memory corruption detected at {:?}+{}: {}", block.id(), s.offset, what);
                return Err(AllocError::ValidationFailed(format!(
                    "{} at {:?}+{}",
                    what,
                    block.id(),
                    s.offset
                )));
            }
        }
        Ok(())
    }
}

impl<B: MemoryBackend> Drop for BlockPool<B> {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        let live: usize = state
            .blocks
            .iter()
            .map(|b| b.metadata().allocation_count())
            .sum();
        if live > 0 {
            log::warn!("Dropping block pool {} with {} live allocation(s)", self.id, live);
        }
        for block in state.blocks.drain(..) {
            block.destroy(&mut state.backend);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::suballoc::{BlockMetadataKind, DebugDesc, HostMemoryBackend};
    use SuballocationKind::*;

    fn req(size: u64, alignment: u64, kind: SuballocationKind) -> AllocationRequest {
        AllocationRequest::new(size, alignment, kind)
    }

    fn debug_pool(corruption_detection: bool, initialize_allocations: bool) -> BlockPool<HostMemoryBackend> {
        let desc = PoolDesc {
            block_size: 4096,
            block_size_granularity: 256,
            debug: DebugDesc {
                margin: 16,
                corruption_detection,
                initialize_allocations,
                ..Default::default()
            },
            ..Default::default()
        };
        BlockPool::new(desc, HostMemoryBackend::new()).unwrap()
    }

    #[test]
    fn double_free_is_rejected() {
        let pool = BlockPool::new(PoolDesc::default(), HostMemoryBackend::new()).unwrap();
        let _other = pool.allocate(&req(64, 16, Buffer)).unwrap();
        let a = pool.allocate(&req(64, 16, Buffer)).unwrap();
        let copy = a.duplicate();
        pool.free(a).unwrap();
        assert!(matches!(pool.free(copy), Err(AllocError::InvalidHandle(_))));
        pool.validate().unwrap();
    }

    #[test]
    fn foreign_handle_is_rejected() {
        let first = BlockPool::new(PoolDesc::default(), HostMemoryBackend::new()).unwrap();
        let second = BlockPool::new(PoolDesc::default(), HostMemoryBackend::new()).unwrap();
        let a = first.allocate(&req(64, 16, Buffer)).unwrap();
        let _b = second.allocate(&req(64, 16, Buffer)).unwrap();

        assert!(matches!(second.map(&a), Err(AllocError::InvalidHandle(_))));
        assert!(matches!(second.free(a), Err(AllocError::InvalidHandle(_))));
        assert_eq!(first.statistics().allocation_count, 1);
    }

    #[test]
    fn mismatched_handle_is_rejected() {
        let pool = BlockPool::new(PoolDesc::default(), HostMemoryBackend::new()).unwrap();
        let a = pool.allocate(&req(64, 16, Buffer)).unwrap();
        let mut forged = a.duplicate();
        forged.size = 32;
        assert!(matches!(pool.free(forged), Err(AllocError::InvalidHandle(_))));
        let mut forged = a.duplicate();
        forged.block_id = BlockId(999);
        assert!(matches!(pool.free(forged), Err(AllocError::InvalidHandle(_))));
        pool.free(a).unwrap();
    }

    #[test]
    fn empty_blocks_beyond_one_are_destroyed() {
        let desc = PoolDesc {
            block_size: 1024,
            block_size_granularity: 256,
            ..Default::default()
        };
        let pool = BlockPool::new(desc, HostMemoryBackend::new()).unwrap();
        let a = pool.allocate(&req(1024, 1, Buffer)).unwrap();
        let b = pool.allocate(&req(1024, 1, Buffer)).unwrap();
        let c = pool.allocate(&req(1024, 1, Buffer)).unwrap();
        assert_eq!(pool.block_count(), 3);

        pool.free(a).unwrap();
        assert_eq!(pool.block_count(), 3);
        pool.free(b).unwrap();
        assert_eq!(pool.block_count(), 2);
        pool.free(c).unwrap();
        assert_eq!(pool.block_count(), 1);

        // the warm block is reused
        let d = pool.allocate(&req(512, 1, Buffer)).unwrap();
        assert_eq!(pool.block_count(), 1);
        pool.free(d).unwrap();
    }

    #[test]
    fn min_block_count_is_created_up_front_and_kept() {
        let desc = PoolDesc {
            block_size: 1024,
            block_size_granularity: 256,
            min_block_count: 2,
            ..Default::default()
        };
        let pool = BlockPool::new(desc, HostMemoryBackend::new()).unwrap();
        assert_eq!(pool.block_count(), 2);

        let a = pool.allocate(&req(1024, 1, Buffer)).unwrap();
        let b = pool.allocate(&req(1024, 1, Buffer)).unwrap();
        assert_eq!(pool.block_count(), 2);
        pool.free(a).unwrap();
        pool.free(b).unwrap();
        assert_eq!(pool.block_count(), 2);
    }

    #[test]
    fn block_creation_failure_is_out_of_memory() {
        let desc = PoolDesc {
            block_size: 1024,
            block_size_granularity: 256,
            ..Default::default()
        };
        let pool = BlockPool::new(desc, HostMemoryBackend::with_capacity(2048)).unwrap();
        let _a = pool.allocate(&req(1024, 1, Buffer)).unwrap();
        let _b = pool.allocate(&req(1024, 1, Buffer)).unwrap();
        assert_eq!(pool.allocate(&req(16, 1, Buffer)), Err(AllocError::OutOfMemory));
        assert_eq!(pool.block_count(), 2);
    }

    #[test]
    fn min_offset_scans_blocks_in_creation_order() {
        let desc = PoolDesc {
            block_size: 1024,
            block_size_granularity: 256,
            min_block_count: 2,
            ..Default::default()
        };
        let pool = BlockPool::new(desc, HostMemoryBackend::new()).unwrap();
        let a = pool.allocate(&req(900, 1, Buffer)).unwrap();
        let b = pool.allocate(&req(1000, 1, Buffer)).unwrap();
        assert_ne!(a.block_id(), b.block_id());
        let first_block = a.block_id();
        pool.free(a).unwrap();
        assert_eq!(pool.block_count(), 2);

        let c = pool
            .allocate(&req(20, 1, Buffer).with_strategy(AllocationStrategy::MinOffset))
            .unwrap();
        assert_eq!((c.block_id(), c.offset()), (first_block, 0));

        // best fit prefers the fuller block
        let d = pool.allocate(&req(20, 1, Buffer)).unwrap();
        assert_eq!((d.block_id(), d.offset()), (b.block_id(), 1000));
    }

    #[test]
    fn map_gives_access_to_the_range() {
        let pool = debug_pool(false, false);
        let a = pool.allocate(&req(64, 16, Buffer)).unwrap();
        let b = pool.allocate(&req(64, 16, Buffer)).unwrap();

        let range = pool.map(&a).unwrap();
        assert_eq!(range.len(), 64);
        unsafe { range.as_mut_slice() }.fill(0xAB);
        pool.unmap(&a).unwrap();

        let range = pool.map(&b).unwrap();
        assert!(unsafe { range.as_mut_slice() }.iter().all(|&x| x == 0));
        pool.unmap(&b).unwrap();

        assert!(matches!(pool.unmap(&b), Err(AllocError::InvalidHandle(_))));
        pool.free(a).unwrap();
        pool.free(b).unwrap();
    }

    #[test]
    fn corruption_is_detected_on_free() {
        let pool = debug_pool(true, false);
        let a = pool.allocate(&req(100, 16, Buffer)).unwrap();
        let b = pool.allocate(&req(100, 16, Buffer)).unwrap();
        assert_eq!(a.offset(), 16);
        pool.check_corruption().unwrap();

        let range = pool.map(&a).unwrap();
        // write one byte past the end of `a`
        unsafe { *range.as_ptr().add(100) = 0 };
        pool.unmap(&a).unwrap();

        assert!(matches!(pool.check_corruption(), Err(AllocError::ValidationFailed(_))));
        assert!(matches!(pool.free(a), Err(AllocError::ValidationFailed(_))));

        // the damaged range is still given back
        let stats = pool.statistics();
        assert_eq!(stats.allocation_count, 1);
        assert_eq!(stats.allocation_bytes, 100);
        pool.check_corruption().unwrap();
        pool.validate().unwrap();

        pool.free(b).unwrap();
        assert_eq!(pool.statistics().allocation_count, 0);
        assert_eq!(pool.block_count(), 1);
    }

    #[test]
    fn odd_sizes_with_byte_alignment_keep_guards_intact() {
        let pool = debug_pool(true, false);
        let a = pool.allocate(&req(5, 1, Buffer)).unwrap();
        let b = pool.allocate(&req(64, 16, Buffer)).unwrap();
        assert_eq!((a.offset(), b.offset()), (16, 48));
        pool.check_corruption().unwrap();

        let mut live = vec![a, b];
        for size in [1, 3, 7, 13, 22, 31] {
            live.push(pool.allocate(&req(size, 1, Unknown)).unwrap());
            pool.check_corruption().unwrap();
        }
        for a in live {
            pool.free(a).unwrap();
            pool.check_corruption().unwrap();
        }
    }

    #[test]
    fn intact_guards_pass() {
        let pool = debug_pool(true, false);
        let allocations: Vec<_> = (1..20)
            .map(|i| pool.allocate(&req(i * 8, 8, Buffer)).unwrap())
            .collect();
        pool.validate().unwrap();
        pool.check_corruption().unwrap();
        for a in allocations {
            pool.free(a).unwrap();
        }
    }

    #[test]
    fn check_corruption_needs_it_enabled() {
        let pool = debug_pool(false, false);
        assert!(matches!(pool.check_corruption(), Err(AllocError::InvalidConfig(_))));
    }

    #[test]
    fn write_after_free_is_detected() {
        let pool = debug_pool(false, true);
        let keep = pool.allocate(&req(32, 16, Buffer)).unwrap();
        let a = pool.allocate(&req(64, 16, Buffer)).unwrap();
        let range = pool.map(&a).unwrap();
        let ptr = range.as_ptr();
        pool.unmap(&a).unwrap();
        pool.free(a).unwrap();
        pool.check_corruption().unwrap();

        // `keep` holds the block alive, so the stale pointer still hits it
        unsafe { *ptr.add(10) = 0 };
        assert!(matches!(pool.check_corruption(), Err(AllocError::ValidationFailed(_))));
        pool.free(keep).unwrap();
    }

    #[test]
    fn fill_patterns_on_create_and_destroy() {
        let pool = debug_pool(false, true);
        let keep = pool.allocate(&req(32, 16, Buffer)).unwrap();
        let a = pool.allocate(&req(64, 16, Buffer)).unwrap();
        let range = pool.map(&a).unwrap();
        let ptr = range.as_ptr();
        assert!(unsafe { range.as_mut_slice() }
            .iter()
            .all(|&x| x == ALLOCATION_FILL_PATTERN_CREATED));
        // keep the block mapped so the bytes can be inspected after the free
        let _hold = pool.map(&keep).unwrap();
        pool.unmap(&a).unwrap();
        pool.free(a).unwrap();

        let freed = unsafe { std::slice::from_raw_parts(ptr, 64) };
        assert!(freed.iter().all(|&x| x == ALLOCATION_FILL_PATTERN_DESTROYED));
        pool.unmap(&keep).unwrap();
    }

    #[test]
    fn linear_pool_behaves_like_a_stack() {
        let desc = PoolDesc {
            block_size: 1024,
            block_size_granularity: 256,
            metadata_kind: BlockMetadataKind::Linear,
            ..Default::default()
        };
        let pool = BlockPool::new(desc, HostMemoryBackend::new()).unwrap();
        let a = pool.allocate(&req(100, 1, Buffer)).unwrap();
        let b = pool.allocate(&req(100, 1, Buffer)).unwrap();
        let c = pool.allocate(&req(100, 1, Buffer)).unwrap();
        assert_eq!((a.offset(), b.offset(), c.offset()), (0, 100, 200));

        pool.free(b).unwrap();
        let d = pool.allocate(&req(100, 1, Buffer)).unwrap();
        assert_eq!(d.offset(), 300);
        pool.validate().unwrap();

        for x in [a, c, d] {
            pool.free(x).unwrap();
        }
        assert_eq!(pool.statistics().allocation_count, 0);
    }

    #[test]
    fn pool_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<BlockPool<HostMemoryBackend>>();
    }
}
