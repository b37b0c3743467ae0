//! Identifier index: a sequence of document ids parallel to the data array.
//!
//! The sequence is strictly increasing because ids are assigned append-only
//! from the collection's id counter, which makes position lookup a plain
//! binary search.

use crate::collection::DocId;

/// Locates the data position of `id`, or `None` if the id is absent.
///
/// Runs in O(log n) under the strictly-increasing invariant.
#[inline]
pub fn locate(id_index: &[DocId], id: DocId) -> Option<usize> {
    locate_counted(id_index, id).0
}

/// Binary search that also reports the number of three-way comparisons
/// performed. The counter exists so tests can pin the logarithmic bound.
pub fn locate_counted(id_index: &[DocId], id: DocId) -> (Option<usize>, usize) {
    let mut lo = 0usize;
    let mut hi = id_index.len();
    let mut comparisons = 0usize;

    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        comparisons += 1;
        match id_index[mid].cmp(&id) {
            std::cmp::Ordering::Less => lo = mid + 1,
            std::cmp::Ordering::Greater => hi = mid,
            std::cmp::Ordering::Equal => return (Some(mid), comparisons),
        }
    }
    (None, comparisons)
}
