use super::{AllocError, DeviceSize, SuballocationKind};
use crate::util::is_power_of_two;

/// One contiguous range inside a block, either free or in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Suballocation {
    pub offset: DeviceSize,
    pub size: DeviceSize,
    pub kind: SuballocationKind,
}

impl Suballocation {
    pub fn free(offset: DeviceSize, size: DeviceSize) -> Self {
        Self {
            offset,
            size,
            kind: SuballocationKind::Free,
        }
    }

    pub fn is_free(&self) -> bool {
        self.kind.is_free()
    }

    /// One past the last byte.
    pub fn end(&self) -> DeviceSize {
        self.offset + self.size
    }
}

/// How a block picks the free region for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AllocationStrategy {
    /// Best fit: the smallest free region that satisfies the request, ties
    /// broken by the lowest offset. Minimizes fragmentation.
    #[default]
    MinMemory,
    /// First fit: the first suitable free region in offset order.
    MinTime,
    /// The lowest usable offset, also across blocks.
    MinOffset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationRequest {
    pub size: DeviceSize,
    pub alignment: DeviceSize,
    pub kind: SuballocationKind,
    /// Falls back to the pool's default strategy when unset.
    pub strategy: Option<AllocationStrategy>,
}

impl AllocationRequest {
    pub fn new(size: DeviceSize, alignment: DeviceSize, kind: SuballocationKind) -> Self {
        Self {
            size,
            alignment,
            kind,
            strategy: None,
        }
    }

    pub fn with_strategy(mut self, strategy: AllocationStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn validate(&self) -> Result<(), AllocError> {
        if !is_power_of_two(self.alignment) {
            return Err(AllocError::InvalidAlignment(self.alignment));
        }
        if self.size == 0 {
            return Err(AllocError::ZeroSize);
        }
        if self.kind.is_free() {
            return Err(AllocError::ValidationFailed(
                "cannot allocate a range of kind Free".to_string(),
            ));
        }
        Ok(())
    }
}

/// Where a request goes inside one block, as decided by `find_free_region`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlacementPlan {
    /// Offset of the free suballocation that gets split.
    pub free_offset: DeviceSize,
    /// Aligned offset of the new allocation.
    pub offset: DeviceSize,
    pub size: DeviceSize,
    pub kind: SuballocationKind,
}
