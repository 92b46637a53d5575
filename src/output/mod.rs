//! Diarization output assembly
//!
//! From cluster labels or a speaker-activation matrix to merged, sorted
//! speaker intervals ready for RTTM and JSON emission.

use ndarray::ArrayView2;

use crate::intervals::{merge_float_intervals_default, DEFAULT_DECIMALS};
use crate::session::SpeakerLabel;
use crate::types::{DiarizationError, VadParams};
use crate::vad::ts_vad_post_processing;

/// Resolve overlapping boundaries between consecutive labeled segments.
///
/// When a segment runs past the start of the next one, the boundary is moved
/// to the midpoint of the overlap on both sides.
pub fn get_contiguous_stamps(stamps: &[SpeakerLabel]) -> Vec<SpeakerLabel> {
    if stamps.is_empty() {
        return Vec::new();
    }
    let mut lines = stamps.to_vec();
    let mut contiguous = Vec::with_capacity(lines.len());
    for i in 0..lines.len() - 1 {
        if lines[i].end > lines[i + 1].start {
            let avg = (lines[i + 1].start + lines[i].end) / 2.0;
            lines[i + 1].start = avg;
            contiguous.push(SpeakerLabel::new(
                lines[i].start,
                avg,
                lines[i].speaker.clone(),
            ));
        } else {
            contiguous.push(lines[i].clone());
        }
    }
    contiguous.push(lines[lines.len() - 1].clone());
    contiguous
}

/// Merge adjacent stamps of the same speaker.
pub fn merge_stamps(lines: &[SpeakerLabel]) -> Vec<SpeakerLabel> {
    if lines.is_empty() {
        return Vec::new();
    }
    let mut stamps = lines.to_vec();
    let mut merged = Vec::with_capacity(stamps.len());
    for i in 0..stamps.len() - 1 {
        if stamps[i].end == stamps[i + 1].start && stamps[i].speaker == stamps[i + 1].speaker {
            stamps[i + 1].start = stamps[i].start;
        } else {
            merged.push(stamps[i].clone());
        }
    }
    merged.push(stamps[stamps.len() - 1].clone());
    merged
}

/// Speaker-turn labels from per-segment cluster labels.
///
/// Returns the merged speaker-turn labels plus the raw per-segment lines
/// (used for the optional cluster-label dump).
pub fn generate_cluster_labels(
    segment_ranges: &[[f64; 2]],
    cluster_labels: &[i64],
) -> (Vec<SpeakerLabel>, Vec<SpeakerLabel>) {
    let lines: Vec<SpeakerLabel> = segment_ranges
        .iter()
        .zip(cluster_labels.iter())
        .map(|(range, label)| SpeakerLabel::new(range[0], range[1], format!("speaker_{label}")))
        .collect();
    let contiguous = get_contiguous_stamps(&lines);
    let merged = merge_stamps(&contiguous);
    (merged, lines)
}

/// Per-speaker interval lists from a speaker-activation matrix.
///
/// Column `m` of the matrix collects the `timestamps` rows where its bit is
/// set.
pub fn speaker_assignment_intervals(
    assign: ArrayView2<'_, u8>,
    timestamps: &[[f64; 2]],
) -> Result<Vec<Vec<[f64; 2]>>, DiarizationError> {
    let (t, m) = assign.dim();
    if timestamps.len() < t {
        return Err(DiarizationError::InvariantViolation {
            stage: "speaker_assignment_intervals".to_string(),
            message: format!("{} timestamps for {t} activation rows", timestamps.len()),
        });
    }
    let mut per_speaker: Vec<Vec<[f64; 2]>> = vec![Vec::new(); m];
    for tdx in 0..t {
        for (spk, intervals) in per_speaker.iter_mut().enumerate() {
            if assign[[tdx, spk]] != 0 {
                intervals.push(timestamps[tdx]);
            }
        }
    }
    Ok(per_speaker)
}

/// Per-speaker interval lists via TS-VAD smoothing of each activation
/// column, shifted by the session offset.
pub fn ts_vad_speaker_intervals(
    assign: ArrayView2<'_, u8>,
    vad_params: &VadParams,
    hop_len_in_cs: usize,
    offset: f64,
) -> Vec<Vec<[f64; 2]>> {
    let (t, m) = assign.dim();
    let mut per_speaker = Vec::with_capacity(m);
    for spk in 0..m {
        let column: Vec<u8> = (0..t).map(|tdx| assign[[tdx, spk]]).collect();
        let intervals = ts_vad_post_processing(&column, vad_params, hop_len_in_cs)
            .into_iter()
            .map(|seg| [seg[0] + offset, seg[1] + offset])
            .collect();
        per_speaker.push(intervals);
    }
    per_speaker
}

/// Merge each speaker's intervals and emit labels sorted by start time.
pub fn diarization_output_lines(
    speaker_intervals: &[Vec<[f64; 2]>],
) -> Result<Vec<SpeakerLabel>, DiarizationError> {
    let mut labels = Vec::new();
    for (spk, intervals) in speaker_intervals.iter().enumerate() {
        for merged in merge_float_intervals_default(intervals)? {
            let start = round_decimals(merged[0]);
            let end = round_decimals(merged[1]);
            labels.push(SpeakerLabel::new(start, end, format!("speaker_{spk}")));
        }
    }
    labels.sort_by(|a, b| {
        a.start
            .partial_cmp(&b.start)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    Ok(labels)
}

fn round_decimals(x: f64) -> f64 {
    let factor = 10f64.powi(DEFAULT_DECIMALS as i32);
    (x * factor).round() / factor
}
