/// Bit-trick helpers around powers of two.
///
/// Implemented for the 32- and 64-bit magnitudes the allocator deals with
/// (`u32` for memory type bits and counters, `u64` for device sizes) and
/// for `usize`.
pub trait PowerOfTwo: Copy {
    /// Returns `true` if exactly one bit is set.
    fn is_power_of_two(self) -> bool;

    /// Returns `self` if it is already a power of two, otherwise the smallest
    /// power of two strictly greater than `self`. `0` maps to `1`.
    fn next_power_of_two(self) -> Self;

    /// Returns the largest power of two that is `<= self`. `self` must be
    /// non-zero.
    fn prev_power_of_two(self) -> Self;
}

macro_rules! impl_power_of_two {
    ($($ty:ty),*) => {
        $(
            impl PowerOfTwo for $ty {
                #[inline]
                fn is_power_of_two(self) -> bool {
                    self.count_ones() == 1
                }

                #[inline]
                fn next_power_of_two(self) -> Self {
                    if PowerOfTwo::is_power_of_two(self) {
                        return self;
                    }
                    debug_assert!(
                        self.leading_zeros() > 0,
                        "next power of two of {} overflows",
                        self
                    );
                    1 << (<$ty>::BITS - self.leading_zeros())
                }

                #[inline]
                fn prev_power_of_two(self) -> Self {
                    debug_assert!(self != 0, "zero has no previous power of two");
                    1 << (<$ty>::BITS - 1 - self.leading_zeros())
                }
            }
        )*
    };
}

impl_power_of_two!(u32, u64, usize);

pub fn is_power_of_two<T: PowerOfTwo>(v: T) -> bool {
    v.is_power_of_two()
}

pub fn next_power_of_two<T: PowerOfTwo>(v: T) -> T {
    v.next_power_of_two()
}

pub fn prev_power_of_two<T: PowerOfTwo>(v: T) -> T {
    v.prev_power_of_two()
}

/// Rounds `value` up to the next multiple of `alignment`.
#[inline]
pub fn align_up(value: u64, alignment: u64) -> u64 {
    debug_assert!(is_power_of_two(alignment), "alignment {alignment} is not a power of two");
    (value + alignment - 1) & !(alignment - 1)
}

/// Rounds `value` down to the previous multiple of `alignment`.
#[inline]
pub fn align_down(value: u64, alignment: u64) -> u64 {
    debug_assert!(is_power_of_two(alignment), "alignment {alignment} is not a power of two");
    value & !(alignment - 1)
}

/// Returns `true` if the last byte of resource A and the first byte of
/// resource B fall on the same `page_size` page.
///
/// Resource A must lie entirely before resource B.
#[inline]
pub fn blocks_on_same_page(
    resource_a_offset: u64,
    resource_a_size: u64,
    resource_b_offset: u64,
    page_size: u64,
) -> bool {
    debug_assert!(
        resource_a_offset + resource_a_size <= resource_b_offset
            && resource_a_size > 0
            && page_size > 0
    );
    let resource_a_end = resource_a_offset + resource_a_size - 1;
    let resource_a_end_page = align_down(resource_a_end, page_size);
    let resource_b_start_page = align_down(resource_b_offset, page_size);
    resource_a_end_page == resource_b_start_page
}
