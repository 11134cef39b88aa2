use crate::suballoc::{
    is_buffer_image_granularity_conflict, AllocationRequest, DeviceSize, Suballocation,
};
use crate::util::{align_up, blocks_on_same_page};

fn checked_align_up(value: DeviceSize, alignment: DeviceSize) -> Option<DeviceSize> {
    value
        .checked_add(alignment - 1)
        .map(|v| v & !(alignment - 1))
}

/// Tries to fit `request` into the free range `[free_offset, free_offset + free_size)`.
///
/// `preceding` are the suballocations before the range and `following` the
/// ones after it, both in offset order. Returns the offset the allocation
/// would start at.
///
/// The offset leaves room for `margin` in front, is aligned to the request, and
/// is pushed to the next `granularity` page when a preceding suballocation on
/// the same page has a conflicting kind. A range is rejected when the tail
/// would share a page with a conflicting following suballocation, since those
/// cannot be moved.
pub(super) fn place_in_free_range(
    free_offset: DeviceSize,
    free_size: DeviceSize,
    preceding: &[Suballocation],
    following: &[Suballocation],
    request: &AllocationRequest,
    granularity: DeviceSize,
    margin: DeviceSize,
) -> Option<DeviceSize> {
    if free_size < request.size {
        return None;
    }

    let mut offset = checked_align_up(free_offset.checked_add(margin)?, request.alignment)?;

    if granularity > 1 {
        let conflict = preceding
            .iter()
            .rev()
            .take_while(|prev| blocks_on_same_page(prev.offset, prev.size, offset, granularity))
            .any(|prev| is_buffer_image_granularity_conflict(prev.kind, request.kind));
        if conflict {
            offset = checked_align_up(offset, granularity)?;
        }
    }

    let end = offset.checked_add(request.size)?;
    if end.checked_add(margin)? > free_offset + free_size {
        return None;
    }

    if granularity > 1 {
        let conflict = following
            .iter()
            .take_while(|next| blocks_on_same_page(offset, request.size, next.offset, granularity))
            .any(|next| is_buffer_image_granularity_conflict(request.kind, next.kind));
        if conflict {
            return None;
        }
    }

    debug_assert_eq!(offset, align_up(offset, request.alignment));
    Some(offset)
}
