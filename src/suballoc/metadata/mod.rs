use super::{AllocError, AllocationRequest, DeviceSize, PlacementPlan, Statistics, Suballocation};
use std::fmt::Debug;

mod placement;

mod generic;
pub use generic::*;

mod linear;
pub use linear::*;

/// Free suballocations smaller than this are not put into the size index.
/// They are only found by linear scan.
pub const MIN_FREE_SUBALLOCATION_SIZE_TO_REGISTER: DeviceSize = 16;

/// Book keeping style of a block, chosen when the block is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlockMetadataKind {
    /// Free list with best-fit search, reuses any hole.
    #[default]
    Generic,
    /// Stack / ring buffer, only ever places at the ends.
    Linear,
}

/// Placement parameters shared by every block of a pool.
#[derive(Debug, Clone, Copy)]
pub struct MetadataDesc {
    pub kind: BlockMetadataKind,
    pub buffer_image_granularity: DeviceSize,
    pub debug_margin: DeviceSize,
}

/// Tracks which ranges of one fixed-size block are in use.
pub trait BlockMetadata: Debug + Send {
    fn size(&self) -> DeviceSize;

    fn allocation_count(&self) -> usize;

    /// Number of free ranges.
    fn free_range_count(&self) -> usize;

    fn sum_free_size(&self) -> DeviceSize;

    fn is_empty(&self) -> bool {
        self.allocation_count() == 0
    }

    /// Looks for room for `request` without changing anything.
    fn find_free_region(&self, request: &AllocationRequest) -> Option<PlacementPlan>;

    /// Carves a plan returned by `find_free_region` out of its free range.
    fn commit(&mut self, plan: &PlacementPlan) -> Result<(), AllocError>;

    /// Turns the allocation at `offset` back into free space and merges it
    /// with free neighbours.
    fn release(&mut self, offset: DeviceSize) -> Result<Suballocation, AllocError>;

    /// The live allocation starting at `offset`, if any.
    fn allocation_at(&self, offset: DeviceSize) -> Option<Suballocation>;

    /// Snapshot of all ranges, free and used, in offset order.
    fn suballocations(&self) -> Vec<Suballocation>;

    /// Checks every structural invariant of the block.
    fn validate(&self) -> Result<(), AllocError>;

    fn statistics(&self) -> Statistics {
        Statistics::from_block(self.size(), &self.suballocations())
    }
}

pub fn create_metadata(desc: &MetadataDesc, size: DeviceSize) -> Box<dyn BlockMetadata> {
    match desc.kind {
        BlockMetadataKind::Generic => Box::new(GenericMetadata::new(
            size,
            desc.buffer_image_granularity,
            desc.debug_margin,
        )),
        BlockMetadataKind::Linear => Box::new(LinearMetadata::new(
            size,
            desc.buffer_image_granularity,
            desc.debug_margin,
        )),
    }
}
