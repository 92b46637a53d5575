//! Segment layout
//!
//! Turns VAD speech segments into fixed-window subsegments at every scale of
//! the schedule, and clips oracle-VAD ranges to the session bounds.

pub mod scale;

pub use scale::{scale_mapping_argmat, ScaleSchedule};

use crate::intervals::{merge_float_intervals, sub_range_list, DEFAULT_DECIMALS, DEFAULT_MARGIN};
use crate::types::DiarizationError;

/// Default minimum subsegment duration in seconds.
pub const MIN_SUBSEGMENT_DURATION: f64 = 0.03;

/// Decimal places used when rounding subsegment durations.
const SUBSEGMENT_DUR_DECIMALS: i32 = 2;

/// Generate `(offset, duration)` subsegments for one speech segment.
///
/// A segment of length `duration` starting at `offset` is sliced with the
/// given window and shift. The slice count is `ceil((duration - window) /
/// shift) + 1`, except that a segment shorter than the shift produces a
/// single slice. Every slice has length `window` except the last, which is
/// clipped to the segment end. Slices shorter than
/// `min_subsegment_duration` are discarded.
pub fn get_subsegments(
    offset: f64,
    window: f64,
    shift: f64,
    duration: f64,
    min_subsegment_duration: f64,
) -> Vec<(f64, f64)> {
    let mut subsegments = Vec::new();
    let slice_end = offset + duration;

    let slices = if duration >= min_subsegment_duration && duration < shift {
        1
    } else {
        let base = ((duration - window) / shift).ceil() as i64 + 1;
        base.max(1)
    };

    if slices == 1 {
        let dur = duration.min(window);
        if dur >= min_subsegment_duration {
            subsegments.push((offset, dur));
        }
        return subsegments;
    }

    for k in 0..slices {
        let start = offset + k as f64 * shift;
        let dur = if k == slices - 1 {
            (slice_end - start).min(window)
        } else {
            window
        };
        let dur = round_decimals(dur, SUBSEGMENT_DUR_DECIMALS);
        if dur >= min_subsegment_duration {
            subsegments.push((start, dur));
        }
    }
    subsegments
}

fn round_decimals(x: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (x * factor).round() / factor
}

/// Subsegments for every speech segment at every scale of the schedule.
///
/// The outer vector is indexed by scale in schedule order (base scale last);
/// each inner vector concatenates the subsegments of all speech segments in
/// input order.
pub fn subsegments_for_schedule(
    speech_segments: &[[f64; 2]],
    schedule: &ScaleSchedule,
    min_subsegment_duration: f64,
) -> Vec<Vec<(f64, f64)>> {
    schedule
        .scales()
        .map(|(window, shift)| {
            speech_segments
                .iter()
                .flat_map(|segment| {
                    get_subsegments(
                        segment[0],
                        window,
                        shift,
                        segment[1] - segment[0],
                        min_subsegment_duration,
                    )
                })
                .collect()
        })
        .collect()
}

/// Subsegment `[start, end]` ranges for one scale.
pub fn subsegment_ranges(
    speech_segments: &[[f64; 2]],
    window: f64,
    shift: f64,
    min_subsegment_duration: f64,
) -> Vec<[f64; 2]> {
    speech_segments
        .iter()
        .flat_map(|segment| {
            get_subsegments(
                segment[0],
                window,
                shift,
                segment[1] - segment[0],
                min_subsegment_duration,
            )
        })
        .map(|(start, dur)| [start, start + dur])
        .collect()
}

/// Clip raw VAD ranges to the session window and merge overlaps.
///
/// `vad_ranges` are `[start, end]` pairs read from an RTTM or VAD table;
/// the result is merged with the default margin and restricted to
/// `[offset, offset + duration]`. An empty result is legal here; the caller
/// decides whether to drop the session.
pub fn speech_ranges_for_session(
    vad_ranges: &[[f64; 2]],
    offset: f64,
    duration: f64,
) -> Result<Vec<[f64; 2]>, DiarizationError> {
    if duration <= 0.0 {
        return Ok(Vec::new());
    }
    let merged = merge_float_intervals(vad_ranges, DEFAULT_DECIMALS, DEFAULT_MARGIN)?;
    Ok(sub_range_list([offset, offset + duration], &merged))
}
