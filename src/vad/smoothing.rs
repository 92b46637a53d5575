//! TS-VAD smoothing
//!
//! Converts a per-speaker 0/1 activation sequence into speech intervals with
//! hysteresis: onset/offset thresholds, boundary padding, and minimum
//! duration filtering, all on a centisecond frame grid.

use crate::types::VadParams;

const FRAMES_PER_SEC: f64 = 100.0;

/// Smooth one speaker's activation sequence into `[start, end]` intervals.
///
/// Each decoder step covers `hop_len_in_cs` centisecond frames, so the
/// activation vector is expanded onto the centisecond grid first. Segments
/// then open when the signal reaches `onset` and close when it falls below
/// `offset`; boundaries are padded, speech runs shorter than
/// `min_duration_on` are dropped and gaps shorter than `min_duration_off`
/// are filled.
pub fn ts_vad_post_processing(
    activations: &[u8],
    vad_params: &VadParams,
    hop_len_in_cs: usize,
) -> Vec<[f64; 2]> {
    let frame_len = 1.0 / FRAMES_PER_SEC;
    let mut segments: Vec<[f64; 2]> = Vec::new();

    let mut seg_start: Option<f64> = None;
    let total_frames = activations.len() * hop_len_in_cs;
    for frame in 0..total_frames {
        let value = activations[frame / hop_len_in_cs] as f64;
        let t = frame as f64 * frame_len;
        match seg_start {
            None if value >= vad_params.onset => seg_start = Some(t),
            Some(start) if value < vad_params.offset => {
                segments.push([start, t]);
                seg_start = None;
            }
            _ => {}
        }
    }
    if let Some(start) = seg_start {
        segments.push([start, total_frames as f64 * frame_len]);
    }

    if vad_params.pad_onset != 0.0 || vad_params.pad_offset != 0.0 {
        for segment in segments.iter_mut() {
            segment[0] = (segment[0] - vad_params.pad_onset).max(0.0);
            segment[1] += vad_params.pad_offset;
        }
        segments = coalesce(segments, 0.0);
    }

    // Gap filling runs before short-speech removal.
    let filled = coalesce(segments, vad_params.min_duration_off);
    filled
        .into_iter()
        .filter(|seg| seg[1] - seg[0] >= vad_params.min_duration_on)
        .collect()
}

/// Merge segments whose gap is at most `max_gap`. Input is ordered.
fn coalesce(segments: Vec<[f64; 2]>, max_gap: f64) -> Vec<[f64; 2]> {
    let mut out: Vec<[f64; 2]> = Vec::with_capacity(segments.len());
    for segment in segments {
        match out.last_mut() {
            Some(last) if segment[0] - last[1] <= max_gap => {
                last[1] = last[1].max(segment[1]);
            }
            _ => out.push(segment),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> VadParams {
        VadParams {
            onset: 0.5,
            offset: 0.3,
            pad_onset: 0.0,
            pad_offset: 0.0,
            min_duration_on: 0.0,
            min_duration_off: 0.0,
        }
    }

    fn assert_close(actual: &[[f64; 2]], expected: &[[f64; 2]]) {
        assert_eq!(actual.len(), expected.len(), "{actual:?} vs {expected:?}");
        for (a, e) in actual.iter().zip(expected.iter()) {
            assert!((a[0] - e[0]).abs() < 1e-9, "{actual:?} vs {expected:?}");
            assert!((a[1] - e[1]).abs() < 1e-9, "{actual:?} vs {expected:?}");
        }
    }

    #[test]
    fn single_run_becomes_one_interval() {
        // 8 cs per step: steps 2..5 active -> [0.16, 0.40]
        let act = [0u8, 0, 1, 1, 1, 0];
        let segments = ts_vad_post_processing(&act, &params(), 8);
        assert_close(&segments, &[[0.16, 0.40]]);
    }

    #[test]
    fn trailing_activity_is_closed_at_the_end() {
        let act = [0u8, 1, 1];
        let segments = ts_vad_post_processing(&act, &params(), 10);
        assert_close(&segments, &[[0.10, 0.30]]);
    }

    #[test]
    fn short_speech_is_dropped() {
        let mut p = params();
        p.min_duration_on = 0.2;
        let act = [1u8, 0, 0, 0, 1, 1, 1, 1];
        let segments = ts_vad_post_processing(&act, &p, 8);
        // The single-step burst (0.08 s) is dropped, the long run survives.
        assert_close(&segments, &[[0.32, 0.64]]);
    }

    #[test]
    fn short_gaps_are_filled() {
        let mut p = params();
        p.min_duration_off = 0.2;
        let act = [1u8, 1, 0, 1, 1];
        let segments = ts_vad_post_processing(&act, &p, 8);
        // The 0.08 s gap closes into a single interval.
        assert_close(&segments, &[[0.0, 0.40]]);
    }

    #[test]
    fn padding_extends_and_merges() {
        let mut p = params();
        p.pad_onset = 0.05;
        p.pad_offset = 0.05;
        let act = [1u8, 0, 1];
        let segments = ts_vad_post_processing(&act, &p, 8);
        // [0.0, 0.08] and [0.16, 0.24] pad to [0.0, 0.13] and [0.11, 0.29].
        assert_close(&segments, &[[0.0, 0.29]]);
    }

    #[test]
    fn all_silent_yields_no_intervals() {
        let act = [0u8; 16];
        assert!(ts_vad_post_processing(&act, &params(), 8).is_empty());
    }
}
