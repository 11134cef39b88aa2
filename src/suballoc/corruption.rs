//! Guard values and fill patterns used to catch out-of-bounds writes,
//! use-after-free and reads of uninitialized allocations.

use std::ops::Range;

/// Written into the debug margin before and after every allocation.
pub const CORRUPTION_DETECTION_MAGIC_VALUE: u32 = 0x7F84_E666;

pub const ALLOCATION_FILL_PATTERN_CREATED: u8 = 0xDC;
pub const ALLOCATION_FILL_PATTERN_DESTROYED: u8 = 0xEF;

const MAGIC_SIZE: usize = std::mem::size_of::<u32>();

/// Start of every 4 byte aligned word lying fully inside `range`.
///
/// Positions are relative to the start of `block`, so the margins of two
/// neighbours that overlap always agree on where the words are.
fn magic_words(range: Range<usize>) -> impl Iterator<Item = usize> {
    let first = range.start.next_multiple_of(MAGIC_SIZE);
    (first..range.end.saturating_sub(MAGIC_SIZE - 1)).step_by(MAGIC_SIZE)
}

/// Writes `magic` into every aligned word of `block[range]`.
///
/// Bytes of partial words at either end are left untouched.
pub fn write_magic(block: &mut [u8], range: Range<usize>, magic: u32) {
    let bytes = magic.to_ne_bytes();
    for at in magic_words(range) {
        block[at..at + MAGIC_SIZE].copy_from_slice(&bytes);
    }
}

/// Returns `true` if every aligned word of `block[range]` still holds `magic`.
pub fn validate_magic(block: &[u8], range: Range<usize>, magic: u32) -> bool {
    let bytes = magic.to_ne_bytes();
    magic_words(range).all(|at| block[at..at + MAGIC_SIZE] == bytes)
}

pub fn fill_pattern(data: &mut [u8], pattern: u8) {
    data.fill(pattern);
}

/// Index of the first byte that differs from `pattern`, if any.
pub fn find_pattern_mismatch(data: &[u8], pattern: u8) -> Option<usize> {
    data.iter().position(|&b| b != pattern)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAGIC: u32 = CORRUPTION_DETECTION_MAGIC_VALUE;

    #[test]
    fn magic_round_trip_and_detection() {
        let mut block = [0u8; 16];
        assert!(!validate_magic(&block, 0..16, MAGIC));

        write_magic(&mut block, 0..16, MAGIC);
        assert!(validate_magic(&block, 0..16, MAGIC));

        block[9] ^= 0xFF;
        assert!(!validate_magic(&block, 0..16, MAGIC));
    }

    #[test]
    fn only_whole_aligned_words_are_guarded() {
        let mut block = [0u8; 32];
        write_magic(&mut block, 3..21, MAGIC);
        assert_eq!(&block[..4], &[0; 4]);
        assert_eq!(&block[20..], &[0; 12]);
        assert!(validate_magic(&block, 4..20, MAGIC));

        // partial words are not part of the guard
        block[3] = 1;
        block[20] = 1;
        assert!(validate_magic(&block, 3..21, MAGIC));
        assert_eq!(magic_words(5..7).count(), 0);
    }

    #[test]
    fn overlapping_margins_at_odd_offsets_agree() {
        let mut block = [0u8; 64];
        // tail margin of [16, 21) and head margin of [30, 35)
        write_magic(&mut block, 21..37, MAGIC);
        write_magic(&mut block, 14..30, MAGIC);
        assert!(validate_magic(&block, 21..37, MAGIC));
        assert!(validate_magic(&block, 14..30, MAGIC));
    }

    #[test]
    fn fill_patterns() {
        let mut data = vec![0u8; 32];
        fill_pattern(&mut data, ALLOCATION_FILL_PATTERN_CREATED);
        assert_eq!(find_pattern_mismatch(&data, ALLOCATION_FILL_PATTERN_CREATED), None);

        data[20] = 1;
        assert_eq!(
            find_pattern_mismatch(&data, ALLOCATION_FILL_PATTERN_CREATED),
            Some(20)
        );

        fill_pattern(&mut data, ALLOCATION_FILL_PATTERN_DESTROYED);
        assert_eq!(find_pattern_mismatch(&data, ALLOCATION_FILL_PATTERN_DESTROYED), None);
    }
}
