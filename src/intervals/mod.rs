//! Interval arithmetic for diarization timestamps
//!
//! All merge decisions are made on integer-scaled bounds so that floating
//! point noise near segment boundaries cannot flip a merge. Floats are
//! converted at the edges with a fixed number of decimals.

use crate::types::DiarizationError;

/// Decimal places used when scaling float bounds to integers.
pub const DEFAULT_DECIMALS: u32 = 5;

/// Start margin used by [`merge_float_intervals`].
///
/// A margin of 2 means integer-neighboring segments such as `[1, 10]` and
/// `[11, 20]` stay separate: a gap of one scaled unit breaks continuity.
pub const DEFAULT_MARGIN: i64 = 2;

/// Convert a floating point bound to its integer-scaled representation.
pub fn fl2int(x: f64, decimals: u32) -> i64 {
    (x * 10f64.powi(decimals as i32)).round() as i64
}

/// Convert an integer-scaled bound back to a floating point number.
pub fn int2fl(x: i64, decimals: u32) -> f64 {
    x as f64 / 10f64.powi(decimals as i32)
}

/// Check whether two ranges overlap.
pub fn is_overlap(range_a: [f64; 2], range_b: [f64; 2]) -> bool {
    range_a[1] > range_b[0] && range_b[1] > range_a[0]
}

/// The overlapping range between two ranges, or `None` when they are
/// disjoint.
pub fn overlap_range(range_a: [f64; 2], range_b: [f64; 2]) -> Option<[f64; 2]> {
    if !is_overlap(range_a, range_b) {
        return None;
    }
    Some([range_a[0].max(range_b[0]), range_a[1].min(range_b[1])])
}

/// Select the parts of `source_ranges` that fall inside `target_range`,
/// preserving input order.
pub fn sub_range_list(target_range: [f64; 2], source_ranges: &[[f64; 2]]) -> Vec<[f64; 2]> {
    source_ranges
        .iter()
        .filter_map(|s| overlap_range(*s, target_range))
        .collect()
}

/// Merge integer ranges in a single sweep.
///
/// Ranges are sorted ascending by start; a range is merged into the current
/// one while `current.end >= next.start`, so touching ranges merge and a gap
/// of one unit keeps them apart.
pub fn merge_int_intervals(mut intervals: Vec<[i64; 2]>) -> Vec<[i64; 2]> {
    if intervals.len() <= 1 {
        return intervals;
    }
    intervals.sort_unstable_by(|a, b| a[0].cmp(&b[0]).then(a[1].cmp(&b[1])));

    let mut merged: Vec<[i64; 2]> = Vec::with_capacity(intervals.len());
    let mut current = intervals[0];
    for next in intervals.into_iter().skip(1) {
        if current[1] >= next[0] {
            current[1] = current[1].max(next[1]);
        } else {
            merged.push(current);
            current = next;
        }
    }
    merged.push(current);
    merged
}

/// Merge overlapping float ranges via the integer-scaled representation.
///
/// Each bound is scaled by `10^decimals`, `margin` is added to every start
/// before the sweep and subtracted again afterwards. Ranges that collapse to
/// `start >= end` under the margin shift are dropped.
///
/// Returns an error when any input range has its end before its start; that
/// indicates a bug in the caller rather than bad data.
pub fn merge_float_intervals(
    ranges: &[[f64; 2]],
    decimals: u32,
    margin: i64,
) -> Result<Vec<[f64; 2]>, DiarizationError> {
    let mut ranges_int: Vec<[i64; 2]> = Vec::with_capacity(ranges.len());
    for range in ranges {
        if range[1] < range[0] {
            return Err(DiarizationError::InvariantViolation {
                stage: "merge_float_intervals".to_string(),
                message: format!("range start {} exceeds end {}", range[0], range[1]),
            });
        }
        let start = fl2int(range[0], decimals) + margin;
        let end = fl2int(range[1], decimals);
        if start < end {
            ranges_int.push([start, end]);
        }
    }
    let merged = merge_int_intervals(ranges_int);
    Ok(merged
        .into_iter()
        .map(|r| [int2fl(r[0] - margin, decimals), int2fl(r[1], decimals)])
        .collect())
}

/// [`merge_float_intervals`] with the default decimals and margin.
pub fn merge_float_intervals_default(
    ranges: &[[f64; 2]],
) -> Result<Vec<[f64; 2]>, DiarizationError> {
    merge_float_intervals(ranges, DEFAULT_DECIMALS, DEFAULT_MARGIN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn overlap_detection() {
        assert!(is_overlap([0.0, 1.0], [0.5, 2.0]));
        assert!(!is_overlap([0.0, 1.0], [1.0, 2.0]));
        assert!(!is_overlap([2.0, 3.0], [0.0, 1.0]));
    }

    #[test]
    fn overlap_range_of_disjoint_ranges_is_none() {
        assert_eq!(overlap_range([0.0, 1.0], [2.0, 3.0]), None);
        assert_eq!(overlap_range([0.0, 2.0], [1.0, 3.0]), Some([1.0, 2.0]));
    }

    #[test]
    fn sub_range_list_clips_and_preserves_order() {
        let sources = [[0.0, 0.3], [0.6, 1.3], [1.5, 2.0], [2.5, 3.0]];
        let out = sub_range_list([0.8, 2.6], &sources);
        assert_eq!(out, vec![[0.8, 1.3], [1.5, 2.0], [2.5, 2.6]]);
        for range in &out {
            assert!(range[0] >= 0.8 && range[1] <= 2.6);
            assert!(sources.iter().any(|s| s[0] <= range[0] && range[1] <= s[1]));
        }
    }

    #[test]
    fn int_merge_joins_touching_ranges() {
        let merged = merge_int_intervals(vec![[102, 103], [104, 109], [107, 120]]);
        assert_eq!(merged, vec![[102, 103], [104, 120]]);
        let merged = merge_int_intervals(vec![[1, 10], [10, 20]]);
        assert_eq!(merged, vec![[1, 20]]);
    }

    #[test]
    fn margin_two_keeps_neighboring_integers_apart() {
        let merged = merge_float_intervals(&[[1.0, 10.0], [11.0, 20.0]], 0, 2).unwrap();
        assert_eq!(merged, vec![[1.0, 10.0], [11.0, 20.0]]);
        let merged = merge_float_intervals(&[[1.0, 10.0], [10.0, 20.0]], 0, 2).unwrap();
        assert_eq!(merged, vec![[1.0, 10.0], [10.0, 20.0]]);
        let merged = merge_float_intervals(&[[1.0, 10.0], [10.0, 20.0]], 0, 0).unwrap();
        assert_eq!(merged, vec![[1.0, 20.0]]);
    }

    #[test]
    fn float_merge_joins_overlapping_ranges() {
        let merged =
            merge_float_intervals_default(&[[10.2, 10.83], [10.42, 10.91], [10.45, 12.09]])
                .unwrap();
        assert_eq!(merged, vec![[10.2, 12.09]]);
    }

    #[test]
    fn reversed_range_is_an_invariant_violation() {
        assert!(merge_float_intervals_default(&[[2.0, 1.0]]).is_err());
    }

    fn arb_ranges() -> impl Strategy<Value = Vec<[f64; 2]>> {
        prop::collection::vec((0.0f64..500.0, 0.001f64..20.0), 0..40).prop_map(|pairs| {
            pairs
                .into_iter()
                .map(|(start, len)| {
                    let start = (start * 1000.0).round() / 1000.0;
                    let len = (len * 1000.0).round() / 1000.0;
                    [start, start + len]
                })
                .collect()
        })
    }

    proptest! {
        #[test]
        fn merge_is_idempotent(ranges in arb_ranges()) {
            let once = merge_float_intervals_default(&ranges).unwrap();
            let twice = merge_float_intervals_default(&once).unwrap();
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn merged_output_is_sorted_and_disjoint(ranges in arb_ranges()) {
            let merged = merge_float_intervals_default(&ranges).unwrap();
            for pair in merged.windows(2) {
                // Consecutive outputs may touch at a boundary but never
                // overlap in their interiors.
                prop_assert!(pair[0][1] <= pair[1][0]);
            }
        }

        #[test]
        fn merge_covers_every_input_point(ranges in arb_ranges()) {
            let merged = merge_float_intervals_default(&ranges).unwrap();
            for range in &ranges {
                // Interior points of each input must land in exactly one
                // output interval.
                let mid = (range[0] + range[1]) / 2.0;
                let covering = merged
                    .iter()
                    .filter(|m| m[0] <= mid && mid <= m[1])
                    .count();
                prop_assert_eq!(covering, 1);
            }
        }

        #[test]
        fn sub_ranges_are_contained(
            ranges in arb_ranges(),
            target_start in 0.0f64..400.0,
            target_len in 0.5f64..100.0,
        ) {
            let target = [target_start, target_start + target_len];
            for sub in sub_range_list(target, &ranges) {
                prop_assert!(sub[0] >= target[0] && sub[1] <= target[1]);
                prop_assert!(ranges.iter().any(|s| s[0] <= sub[0] && sub[1] <= s[1]));
            }
        }
    }
}
