use std::cmp::Ordering;

/// Binary search over a sorted slice.
///
/// `compare` orders an element relative to the searched key. Returns
/// `Ok(index)` of a matching element, or `Err(insertion_point)` where the key
/// would have to be inserted to keep the slice sorted.
///
/// With duplicate keys any matching index may be returned; use
/// [`binary_search_leftmost_by`] when the first one is needed.
pub fn binary_search_by<T, F>(items: &[T], mut compare: F) -> Result<usize, usize>
where
    F: FnMut(&T) -> Ordering,
{
    let mut begin = 0;
    let mut end = items.len();

    while begin < end {
        let mid = begin + (end - begin) / 2;
        match compare(&items[mid]) {
            Ordering::Equal => return Ok(mid),
            Ordering::Less => begin = mid + 1,
            Ordering::Greater => end = mid,
        }
    }

    Err(begin)
}

/// Like [`binary_search_by`], but always returns the leftmost match.
///
/// On a miss the insertion point is also the index of the first element that
/// compares `Greater`, which makes this the lower bound of the key.
pub fn binary_search_leftmost_by<T, F>(items: &[T], mut compare: F) -> Result<usize, usize>
where
    F: FnMut(&T) -> Ordering,
{
    let mut begin = 0;
    let mut end = items.len();

    while begin < end {
        let mid = begin + (end - begin) / 2;
        if compare(&items[mid]) == Ordering::Less {
            begin = mid + 1;
        } else {
            end = mid;
        }
    }

    match items.get(begin) {
        Some(item) if compare(item) == Ordering::Equal => Ok(begin),
        _ => Err(begin),
    }
}

/// Inserts `value` into the sorted `items`, keeping them sorted by `Ord`.
///
/// Locating is `O(log n)`, the splice is `O(n)`. Returns the index the value
/// was inserted at.
pub fn insert_sorted<T: Ord>(items: &mut Vec<T>, value: T) -> usize {
    let index = match binary_search_by(items, |item| item.cmp(&value)) {
        Ok(index) | Err(index) => index,
    };
    items.insert(index, value);
    index
}

/// Inserts `value` into `items`, which are sorted by `compare`.
pub fn insert_sorted_by<T, F>(items: &mut Vec<T>, value: T, mut compare: F) -> usize
where
    F: FnMut(&T, &T) -> Ordering,
{
    let index = match binary_search_by(items, |item| compare(item, &value)) {
        Ok(index) | Err(index) => index,
    };
    items.insert(index, value);
    index
}
