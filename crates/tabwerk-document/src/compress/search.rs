// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Integer binary search for the largest value satisfying a predicate.

/// Find the largest `v` in `lo..=hi` for which `predicate(v)` holds.
///
/// Halves the interval each step: a passing midpoint moves the lower bound up,
/// a failing one moves the upper bound down. On return the answer `v` was
/// itself probed and passed, and `v + 1` (when `v < hi`) was probed and
/// failed, so the boundary is exact even for predicates that are not strictly
/// monotone. Returns `Ok(None)` when no probed value passed.
///
/// The predicate is fallible; the first error aborts the search.
pub fn binary_search_max<E>(
    lo: u32,
    hi: u32,
    mut predicate: impl FnMut(u32) -> Result<bool, E>,
) -> Result<Option<u32>, E> {
    if lo > hi {
        return Ok(None);
    }
    // i64 so that `right = mid - 1` can go below `lo` without wrapping.
    let mut left = i64::from(lo);
    let mut right = i64::from(hi);
    while left <= right {
        let mid = (left + right) / 2;
        if predicate(mid as u32)? {
            left = mid + 1;
        } else {
            right = mid - 1;
        }
    }
    if right < i64::from(lo) {
        Ok(None)
    } else {
        Ok(Some(right as u32))
    }
}
