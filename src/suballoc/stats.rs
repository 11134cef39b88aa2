use super::{DeviceSize, Suballocation};

/// Usage numbers for one block or, merged, for a whole pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Statistics {
    pub block_count: usize,
    pub allocation_count: usize,
    pub unused_range_count: usize,
    pub block_bytes: DeviceSize,
    pub allocation_bytes: DeviceSize,
    pub unused_bytes: DeviceSize,
    pub allocation_size_min: DeviceSize,
    pub allocation_size_max: DeviceSize,
    pub unused_range_size_min: DeviceSize,
    pub unused_range_size_max: DeviceSize,
}

impl Default for Statistics {
    fn default() -> Self {
        Self {
            block_count: 0,
            allocation_count: 0,
            unused_range_count: 0,
            block_bytes: 0,
            allocation_bytes: 0,
            unused_bytes: 0,
            allocation_size_min: DeviceSize::MAX,
            allocation_size_max: 0,
            unused_range_size_min: DeviceSize::MAX,
            unused_range_size_max: 0,
        }
    }
}

impl Statistics {
    /// Statistics of one block given its full suballocation list.
    pub fn from_block(block_size: DeviceSize, suballocations: &[Suballocation]) -> Self {
        let mut stats = Statistics {
            block_count: 1,
            block_bytes: block_size,
            ..Default::default()
        };
        for s in suballocations {
            if s.is_free() {
                stats.unused_range_count += 1;
                stats.unused_bytes += s.size;
                stats.unused_range_size_min = stats.unused_range_size_min.min(s.size);
                stats.unused_range_size_max = stats.unused_range_size_max.max(s.size);
            } else {
                stats.allocation_count += 1;
                stats.allocation_bytes += s.size;
                stats.allocation_size_min = stats.allocation_size_min.min(s.size);
                stats.allocation_size_max = stats.allocation_size_max.max(s.size);
            }
        }
        stats
    }

    pub fn merge(&mut self, other: &Statistics) {
        self.block_count += other.block_count;
        self.allocation_count += other.allocation_count;
        self.unused_range_count += other.unused_range_count;
        self.block_bytes += other.block_bytes;
        self.allocation_bytes += other.allocation_bytes;
        self.unused_bytes += other.unused_bytes;
        self.allocation_size_min = self.allocation_size_min.min(other.allocation_size_min);
        self.allocation_size_max = self.allocation_size_max.max(other.allocation_size_max);
        self.unused_range_size_min = self.unused_range_size_min.min(other.unused_range_size_min);
        self.unused_range_size_max = self.unused_range_size_max.max(other.unused_range_size_max);
    }

    /// Fraction of the free bytes that are not part of the largest free range.
    ///
    /// `0.0` means all free memory is in one piece.
    pub fn fragmentation(&self) -> f64 {
        if self.unused_bytes == 0 {
            return 0.0;
        }
        1.0 - self.unused_range_size_max as f64 / self.unused_bytes as f64
    }
}
