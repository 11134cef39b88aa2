use super::placement::place_in_free_range;
use super::BlockMetadata;
use crate::suballoc::error::ensure_valid;
use crate::suballoc::{
    AllocError, AllocationRequest, AllocationStrategy, DeviceSize, PlacementPlan, Suballocation,
};
use crate::util::{binary_search_by, insert_sorted_by};

/// Stack / ring buffer block metadata.
///
/// New allocations go right after the last live allocation, or wrap around
/// into the gap in front of the first one. A hole left in the middle only
/// becomes usable again once everything between it and one of the ends has
/// been released. Suited for per-frame staging data that is freed in roughly
/// the order it was allocated.
#[derive(Debug, Clone)]
pub struct LinearMetadata {
    size: DeviceSize,
    granularity: DeviceSize,
    debug_margin: DeviceSize,
    // live allocations only, sorted by offset
    allocations: Vec<Suballocation>,
    sum_used: DeviceSize,
}

impl LinearMetadata {
    pub fn new(size: DeviceSize, granularity: DeviceSize, debug_margin: DeviceSize) -> Self {
        Self {
            size,
            granularity: granularity.max(1),
            debug_margin,
            allocations: Vec::new(),
            sum_used: 0,
        }
    }

    fn tail_range(&self) -> (DeviceSize, DeviceSize) {
        let start = self.allocations.last().map_or(0, |a| a.end());
        (start, self.size - start)
    }

    fn place_at_tail(&self, request: &AllocationRequest) -> Option<PlacementPlan> {
        let (start, size) = self.tail_range();
        self.plan(start, size, &self.allocations, &[], request)
    }

    fn place_at_front(&self, request: &AllocationRequest) -> Option<PlacementPlan> {
        let first = self.allocations.first()?;
        self.plan(0, first.offset, &[], &self.allocations, request)
    }

    fn plan(
        &self,
        free_offset: DeviceSize,
        free_size: DeviceSize,
        preceding: &[Suballocation],
        following: &[Suballocation],
        request: &AllocationRequest,
    ) -> Option<PlacementPlan> {
        place_in_free_range(
            free_offset,
            free_size,
            preceding,
            following,
            request,
            self.granularity,
            self.debug_margin,
        )
        .map(|offset| PlacementPlan {
            free_offset,
            offset,
            size: request.size,
            kind: request.kind,
        })
    }
}

impl BlockMetadata for LinearMetadata {
    fn size(&self) -> DeviceSize {
        self.size
    }

    fn allocation_count(&self) -> usize {
        self.allocations.len()
    }

    fn free_range_count(&self) -> usize {
        self.suballocations().iter().filter(|s| s.is_free()).count()
    }

    fn sum_free_size(&self) -> DeviceSize {
        self.size - self.sum_used
    }

    fn find_free_region(&self, request: &AllocationRequest) -> Option<PlacementPlan> {
        let needed = request
            .size
            .checked_add(self.debug_margin.checked_mul(2)?)?;
        if needed > self.sum_free_size() {
            return None;
        }

        match request.strategy.unwrap_or_default() {
            AllocationStrategy::MinOffset => self
                .place_at_front(request)
                .or_else(|| self.place_at_tail(request)),
            AllocationStrategy::MinMemory | AllocationStrategy::MinTime => self
                .place_at_tail(request)
                .or_else(|| self.place_at_front(request)),
        }
    }

    fn commit(&mut self, plan: &PlacementPlan) -> Result<(), AllocError> {
        ensure_valid!(!plan.kind.is_free(), "cannot commit a Free allocation");
        ensure_valid!(plan.size > 0, "cannot commit an empty allocation");
        ensure_valid!(
            plan.offset + plan.size <= self.size,
            "plan {:?} exceeds block of {} bytes",
            plan,
            self.size
        );

        let index = match binary_search_by(&self.allocations, |a| a.offset.cmp(&plan.offset)) {
            Ok(_) => {
                return Err(AllocError::ValidationFailed(format!(
                    "offset {} is already in use",
                    plan.offset
                )))
            }
            Err(index) => index,
        };
        let gap_start = index.checked_sub(1).map_or(0, |i| self.allocations[i].end());
        let gap_end = self.allocations.get(index).map_or(self.size, |a| a.offset);
        ensure_valid!(
            plan.free_offset == gap_start && plan.offset >= gap_start && plan.offset + plan.size <= gap_end,
            "plan {:?} does not fit into [{}, {})",
            plan,
            gap_start,
            gap_end
        );

        let allocation = Suballocation {
            offset: plan.offset,
            size: plan.size,
            kind: plan.kind,
        };
        insert_sorted_by(&mut self.allocations, allocation, |a, b| a.offset.cmp(&b.offset));
        self.sum_used += plan.size;
        Ok(())
    }

    fn release(&mut self, offset: DeviceSize) -> Result<Suballocation, AllocError> {
        let index = binary_search_by(&self.allocations, |a| a.offset.cmp(&offset))
            .map_err(|_| AllocError::InvalidHandle("no allocation at this offset"))?;
        let released = self.allocations.remove(index);
        self.sum_used -= released.size;
        Ok(released)
    }

    fn allocation_at(&self, offset: DeviceSize) -> Option<Suballocation> {
        binary_search_by(&self.allocations, |a| a.offset.cmp(&offset))
            .ok()
            .map(|index| self.allocations[index])
    }

    fn suballocations(&self) -> Vec<Suballocation> {
        let mut out = Vec::with_capacity(self.allocations.len() * 2 + 1);
        let mut cursor = 0;
        for a in &self.allocations {
            if a.offset > cursor {
                out.push(Suballocation::free(cursor, a.offset - cursor));
            }
            out.push(*a);
            cursor = a.end();
        }
        if cursor < self.size {
            out.push(Suballocation::free(cursor, self.size - cursor));
        }
        out
    }

    fn validate(&self) -> Result<(), AllocError> {
        let mut cursor = 0;
        let mut used = 0;
        for a in &self.allocations {
            ensure_valid!(!a.is_free(), "free entry among live allocations at {}", a.offset);
            ensure_valid!(a.size > 0, "empty allocation at {}", a.offset);
            ensure_valid!(a.offset >= cursor, "overlap at {}", a.offset);
            ensure_valid!(
                a.offset - cursor >= self.debug_margin,
                "missing debug margin before {}",
                a.offset
            );
            used += a.size;
            cursor = a.end();
        }
        ensure_valid!(cursor <= self.size, "allocations exceed the block");
        if !self.allocations.is_empty() {
            ensure_valid!(
                self.size - cursor >= self.debug_margin,
                "missing debug margin after {}",
                cursor
            );
        }
        ensure_valid!(used == self.sum_used, "used byte count out of sync");
        Ok(())
    }
}
