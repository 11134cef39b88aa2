use super::placement::place_in_free_range;
use super::{BlockMetadata, MIN_FREE_SUBALLOCATION_SIZE_TO_REGISTER};
use crate::suballoc::error::ensure_valid;
use crate::suballoc::{
    AllocError, AllocationRequest, AllocationStrategy, DeviceSize, PlacementPlan, Suballocation,
    SuballocationKind,
};
use crate::util::{binary_search_by, binary_search_leftmost_by, insert_sorted};

/// Key of a registered free range. Ordered by size first, so the index is
/// walked from the smallest sufficient range, with the lowest offset winning
/// between equal sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct FreeEntry {
    size: DeviceSize,
    offset: DeviceSize,
}

/// Free-list block metadata.
///
/// Keeps every range of the block, free or used, in a vector sorted by
/// offset, plus an index of the registered free ranges sorted by size. The
/// index refers to ranges by offset, which stays stable while the vector
/// shifts around.
#[derive(Debug, Clone)]
pub struct GenericMetadata {
    size: DeviceSize,
    granularity: DeviceSize,
    debug_margin: DeviceSize,

    suballocations: Vec<Suballocation>,
    free_by_size: Vec<FreeEntry>,

    free_count: usize,
    sum_free_size: DeviceSize,
}

impl GenericMetadata {
    pub fn new(size: DeviceSize, granularity: DeviceSize, debug_margin: DeviceSize) -> Self {
        let mut metadata = Self {
            size,
            granularity: granularity.max(1),
            debug_margin,
            suballocations: vec![Suballocation::free(0, size)],
            free_by_size: Vec::new(),
            free_count: 1,
            sum_free_size: size,
        };
        metadata.register_free(0, size);
        metadata
    }

    fn index_of(&self, offset: DeviceSize) -> Option<usize> {
        binary_search_by(&self.suballocations, |s| s.offset.cmp(&offset)).ok()
    }

    fn register_free(&mut self, offset: DeviceSize, size: DeviceSize) {
        if size >= MIN_FREE_SUBALLOCATION_SIZE_TO_REGISTER {
            insert_sorted(&mut self.free_by_size, FreeEntry { size, offset });
        }
    }

    fn unregister_free(&mut self, offset: DeviceSize, size: DeviceSize) {
        if size < MIN_FREE_SUBALLOCATION_SIZE_TO_REGISTER {
            return;
        }
        let key = FreeEntry { size, offset };
        match binary_search_by(&self.free_by_size, |e| e.cmp(&key)) {
            Ok(index) => {
                self.free_by_size.remove(index);
            }
            Err(_) => debug_assert!(false, "free range {key:?} missing from the size index"),
        }
    }

    fn place_at(&self, index: usize, request: &AllocationRequest) -> Option<PlacementPlan> {
        let free = &self.suballocations[index];
        debug_assert!(free.is_free());

        place_in_free_range(
            free.offset,
            free.size,
            &self.suballocations[..index],
            &self.suballocations[index + 1..],
            request,
            self.granularity,
            self.debug_margin,
        )
        .map(|offset| PlacementPlan {
            free_offset: free.offset,
            offset,
            size: request.size,
            kind: request.kind,
        })
    }

    fn find_best_fit(&self, request: &AllocationRequest, needed: DeviceSize) -> Option<PlacementPlan> {
        // dust ranges are always smaller than registered ones, so a fitting one wins
        if needed < MIN_FREE_SUBALLOCATION_SIZE_TO_REGISTER {
            let dust = self
                .suballocations
                .iter()
                .enumerate()
                .filter(|(_, s)| {
                    s.is_free() && s.size >= needed && s.size < MIN_FREE_SUBALLOCATION_SIZE_TO_REGISTER
                })
                .filter_map(|(index, s)| self.place_at(index, request).map(|plan| (s.size, plan)))
                .min_by_key(|(size, plan)| (*size, plan.free_offset));
            if let Some((_, plan)) = dust {
                return Some(plan);
            }
        }

        let start = match binary_search_leftmost_by(&self.free_by_size, |e| e.size.cmp(&needed)) {
            Ok(index) | Err(index) => index,
        };
        self.free_by_size[start..].iter().find_map(|entry| {
            let index = self.index_of(entry.offset)?;
            self.place_at(index, request)
        })
    }

    fn find_first_fit(&self, request: &AllocationRequest, needed: DeviceSize) -> Option<PlacementPlan> {
        self.suballocations
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_free() && s.size >= needed)
            .find_map(|(index, _)| self.place_at(index, request))
    }
}

impl BlockMetadata for GenericMetadata {
    fn size(&self) -> DeviceSize {
        self.size
    }

    fn allocation_count(&self) -> usize {
        self.suballocations.len() - self.free_count
    }

    fn free_range_count(&self) -> usize {
        self.free_count
    }

    fn sum_free_size(&self) -> DeviceSize {
        self.sum_free_size
    }

    fn find_free_region(&self, request: &AllocationRequest) -> Option<PlacementPlan> {
        let needed = request
            .size
            .checked_add(self.debug_margin.checked_mul(2)?)?;
        if needed > self.sum_free_size {
            return None;
        }

        match request.strategy.unwrap_or_default() {
            AllocationStrategy::MinMemory => self.find_best_fit(request, needed),
            AllocationStrategy::MinTime | AllocationStrategy::MinOffset => {
                self.find_first_fit(request, needed)
            }
        }
    }

    fn commit(&mut self, plan: &PlacementPlan) -> Result<(), AllocError> {
        let index = self
            .index_of(plan.free_offset)
            .ok_or_else(|| AllocError::ValidationFailed(format!("no range at {}", plan.free_offset)))?;
        let free = self.suballocations[index];

        ensure_valid!(free.is_free(), "range at {} is not free", free.offset);
        ensure_valid!(!plan.kind.is_free(), "cannot commit a Free allocation");
        ensure_valid!(plan.size > 0, "cannot commit an empty allocation");
        ensure_valid!(
            plan.offset >= free.offset && plan.offset + plan.size <= free.end(),
            "plan {:?} does not fit into {:?}",
            plan,
            free
        );

        self.unregister_free(free.offset, free.size);

        let head = plan.offset - free.offset;
        let tail = free.end() - (plan.offset + plan.size);

        self.suballocations[index] = Suballocation {
            offset: plan.offset,
            size: plan.size,
            kind: plan.kind,
        };
        self.free_count -= 1;

        if tail > 0 {
            let tail_offset = plan.offset + plan.size;
            self.suballocations
                .insert(index + 1, Suballocation::free(tail_offset, tail));
            self.register_free(tail_offset, tail);
            self.free_count += 1;
        }
        if head > 0 {
            self.suballocations
                .insert(index, Suballocation::free(free.offset, head));
            self.register_free(free.offset, head);
            self.free_count += 1;
        }

        self.sum_free_size -= plan.size;
        Ok(())
    }

    fn release(&mut self, offset: DeviceSize) -> Result<Suballocation, AllocError> {
        let mut index = self
            .index_of(offset)
            .ok_or(AllocError::InvalidHandle("no allocation at this offset"))?;
        let released = self.suballocations[index];
        if released.is_free() {
            return Err(AllocError::InvalidHandle("allocation is already free"));
        }

        self.suballocations[index].kind = SuballocationKind::Free;
        self.free_count += 1;
        self.sum_free_size += released.size;

        if let Some(next) = self.suballocations.get(index + 1).copied() {
            if next.is_free() {
                self.unregister_free(next.offset, next.size);
                self.suballocations[index].size += next.size;
                self.suballocations.remove(index + 1);
                self.free_count -= 1;
            }
        }

        if index > 0 {
            let prev = self.suballocations[index - 1];
            if prev.is_free() {
                self.unregister_free(prev.offset, prev.size);
                self.suballocations[index - 1].size += self.suballocations[index].size;
                self.suballocations.remove(index);
                self.free_count -= 1;
                index -= 1;
            }
        }

        let merged = self.suballocations[index];
        self.register_free(merged.offset, merged.size);
        Ok(released)
    }

    fn allocation_at(&self, offset: DeviceSize) -> Option<Suballocation> {
        self.index_of(offset)
            .map(|index| self.suballocations[index])
            .filter(|s| !s.is_free())
    }

    fn suballocations(&self) -> Vec<Suballocation> {
        self.suballocations.clone()
    }

    fn validate(&self) -> Result<(), AllocError> {
        ensure_valid!(!self.suballocations.is_empty(), "block has no ranges");

        let mut expected_offset = 0;
        let mut free_count = 0;
        let mut sum_free = 0;
        let mut registered = 0;
        let mut prev_free = false;

        for (index, s) in self.suballocations.iter().enumerate() {
            ensure_valid!(s.offset == expected_offset, "gap or overlap at {}", s.offset);
            ensure_valid!(s.size > 0, "empty range at {}", s.offset);

            if s.is_free() {
                ensure_valid!(!prev_free, "adjacent free ranges at {}", s.offset);
                free_count += 1;
                sum_free += s.size;
                if s.size >= MIN_FREE_SUBALLOCATION_SIZE_TO_REGISTER {
                    registered += 1;
                    let key = FreeEntry {
                        size: s.size,
                        offset: s.offset,
                    };
                    ensure_valid!(
                        binary_search_by(&self.free_by_size, |e| e.cmp(&key)).is_ok(),
                        "free range {:?} is not registered",
                        key
                    );
                }
            } else if self.debug_margin > 0 {
                let prev = index.checked_sub(1).map(|i| &self.suballocations[i]);
                let next = self.suballocations.get(index + 1);
                ensure_valid!(
                    prev.is_some_and(|p| p.is_free() && p.size >= self.debug_margin),
                    "missing debug margin before {}",
                    s.offset
                );
                ensure_valid!(
                    next.is_some_and(|n| n.is_free() && n.size >= self.debug_margin),
                    "missing debug margin after {}",
                    s.offset
                );
            }

            prev_free = s.is_free();
            expected_offset = s.end();
        }

        ensure_valid!(
            expected_offset == self.size,
            "ranges cover {} of {} bytes",
            expected_offset,
            self.size
        );
        ensure_valid!(free_count == self.free_count, "free range count out of sync");
        ensure_valid!(sum_free == self.sum_free_size, "free byte count out of sync");
        ensure_valid!(
            registered == self.free_by_size.len(),
            "size index holds {} entries, expected {}",
            self.free_by_size.len(),
            registered
        );
        ensure_valid!(
            self.free_by_size.windows(2).all(|w| w[0] < w[1]),
            "size index is not sorted"
        );
        Ok(())
    }
}
