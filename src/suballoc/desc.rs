use super::{
    AllocError, AllocationStrategy, BlockMetadataKind, DeviceSize, MetadataDesc,
    CORRUPTION_DETECTION_MAGIC_VALUE,
};
use crate::util::is_power_of_two;

#[derive(Debug, Clone)]
pub struct DebugDesc {
    /// Free bytes kept before and after every allocation.
    pub margin: DeviceSize,
    /// Fills the margins with `magic_value` and checks them on free.
    pub corruption_detection: bool,
    pub magic_value: u32,
    /// Fills allocations with a pattern on creation and on destruction.
    pub initialize_allocations: bool,
}

impl Default for DebugDesc {
    fn default() -> Self {
        Self {
            margin: 0,
            corruption_detection: false,
            magic_value: CORRUPTION_DETECTION_MAGIC_VALUE,
            initialize_allocations: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PoolDesc {
    /// Memory type every block of the pool is created from.
    pub memory_type: u32,
    /// Size of a regular block. Larger requests get a dedicated bigger block.
    pub block_size: DeviceSize,
    /// New block sizes are rounded up to a multiple of this.
    pub block_size_granularity: DeviceSize,
    /// `VkPhysicalDeviceLimits::bufferImageGranularity` of the device.
    pub buffer_image_granularity: DeviceSize,
    pub metadata_kind: BlockMetadataKind,
    pub default_strategy: AllocationStrategy,
    /// Blocks created up front and never released.
    pub min_block_count: usize,
    pub max_block_count: Option<usize>,
    /// Fully empty blocks kept around for reuse.
    pub keep_empty_blocks: usize,
    pub debug: DebugDesc,
}

impl Default for PoolDesc {
    fn default() -> Self {
        Self {
            memory_type: 0,
            block_size: 256 * 1024 * 1024,
            block_size_granularity: 64 * 1024,
            buffer_image_granularity: 1,
            metadata_kind: BlockMetadataKind::Generic,
            default_strategy: AllocationStrategy::MinMemory,
            min_block_count: 0,
            max_block_count: None,
            keep_empty_blocks: 1,
            debug: DebugDesc::default(),
        }
    }
}

impl PoolDesc {
    pub fn validate(&self) -> Result<(), AllocError> {
        let invalid = |msg: String| Err(AllocError::InvalidConfig(msg));

        if self.block_size == 0 {
            return invalid("block_size must be non-zero".into());
        }
        if !is_power_of_two(self.block_size_granularity) {
            return invalid(format!(
                "block_size_granularity {} is not a power of two",
                self.block_size_granularity
            ));
        }
        if !is_power_of_two(self.buffer_image_granularity) {
            return invalid(format!(
                "buffer_image_granularity {} is not a power of two",
                self.buffer_image_granularity
            ));
        }
        if self.debug.corruption_detection
            && (self.debug.margin == 0 || self.debug.margin % 4 != 0)
        {
            return invalid(format!(
                "corruption detection needs a non-zero margin that is a multiple of 4, got {}",
                self.debug.margin
            ));
        }
        if let Some(max) = self.max_block_count {
            if self.min_block_count > max {
                return invalid(format!(
                    "min_block_count {} exceeds max_block_count {}",
                    self.min_block_count, max
                ));
            }
        }
        Ok(())
    }

    pub(crate) fn metadata_desc(&self) -> MetadataDesc {
        MetadataDesc {
            kind: self.metadata_kind,
            buffer_image_granularity: self.buffer_image_granularity,
            debug_margin: self.debug.margin,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_desc_is_valid() {
        PoolDesc::default().validate().unwrap();
    }

    #[test]
    fn rejects_bad_values() {
        let bad = [
            PoolDesc {
                block_size: 0,
                ..Default::default()
            },
            PoolDesc {
                block_size_granularity: 3000,
                ..Default::default()
            },
            PoolDesc {
                buffer_image_granularity: 0,
                ..Default::default()
            },
            PoolDesc {
                debug: DebugDesc {
                    margin: 6,
                    corruption_detection: true,
                    ..Default::default()
                },
                ..Default::default()
            },
            PoolDesc {
                min_block_count: 3,
                max_block_count: Some(2),
                ..Default::default()
            },
        ];
        for desc in bad {
            assert!(
                matches!(desc.validate(), Err(AllocError::InvalidConfig(_))),
                "{desc:?}"
            );
        }
    }
}
