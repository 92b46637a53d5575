//! Adaptive VAD thresholding
//!
//! The fine-scale VAD probabilities are aggregated to the clustering scale,
//! a histogram knee lifts the threshold above the non-speech mode, and the
//! configured base threshold is added on top as an extra-confidence offset.

pub mod smoothing;

pub use smoothing::ts_vad_post_processing;

use ndarray::{Array1, ArrayView1};

use crate::types::DiarizationError;

const HISTOGRAM_BINS: usize = 50;

/// Bins inspected for the knee; only the low-probability region matters.
const KNEE_SEARCH_BINS: usize = 10;

/// Speech masks at the clustering scale and the base scale.
#[derive(Debug, Clone)]
pub struct VadMasks {
    /// Final threshold after the adaptive offset.
    pub threshold: f64,

    /// One decision per clustering-scale segment.
    pub scaled: Array1<bool>,

    /// One decision per base-scale segment.
    pub base: Array1<bool>,
}

/// Replace scale-map values by their run ordinal.
///
/// A covering segment the argmin assignment never lands on leaves a gap in
/// the raw scale-map values; downstream label scattering indexes a dense
/// per-run vector, so the values are renumbered consecutively first.
pub fn run_ordinals(scale_row: &[usize]) -> Vec<usize> {
    let mut out = Vec::with_capacity(scale_row.len());
    let mut ordinal = 0usize;
    for (idx, value) in scale_row.iter().enumerate() {
        if idx > 0 && scale_row[idx - 1] != *value {
            ordinal += 1;
        }
        out.push(ordinal);
    }
    out
}

/// Last fine-scale index of each run sharing a scale-map value.
///
/// `scale_row` is one row of the scale map and is non-decreasing; the
/// returned indices mark the end of each covering segment's run.
pub fn run_end_indices(scale_row: &[usize]) -> Vec<usize> {
    let mut ends = Vec::new();
    for (idx, value) in scale_row.iter().enumerate() {
        if idx + 1 == scale_row.len() || scale_row[idx + 1] != *value {
            ends.push(idx);
        }
    }
    ends
}

/// Average the fine-scale probabilities over each scale-map run.
pub fn aggregate_scaled_probs(
    vad_probs: ArrayView1<'_, f32>,
    scale_row: &[usize],
) -> Result<Array1<f32>, DiarizationError> {
    if vad_probs.len() != scale_row.len() {
        return Err(DiarizationError::InvariantViolation {
            stage: "aggregate_scaled_probs".to_string(),
            message: format!(
                "{} VAD probabilities for {} fine-scale segments",
                vad_probs.len(),
                scale_row.len()
            ),
        });
    }
    let ends = run_end_indices(scale_row);
    let mut means = Vec::with_capacity(ends.len());
    let mut run_start = 0usize;
    for end in ends {
        let run = vad_probs.slice(ndarray::s![run_start..=end]);
        means.push(run.mean().unwrap_or(0.0));
        run_start = end + 1;
    }
    Ok(Array1::from(means))
}

/// Adaptive threshold from the histogram knee of the scaled probabilities.
///
/// A 50-bin histogram over `[0, 1]` is normalized by the total count; the
/// knee is the largest drop `h[i] - h[i+1]` within the first ten bins, and
/// the final threshold is the upper edge of the knee bin plus the configured
/// base threshold.
pub fn adaptive_vad_threshold(scaled_probs: ArrayView1<'_, f32>, base_threshold: f64) -> f64 {
    let total = scaled_probs.len();
    if total == 0 {
        return base_threshold;
    }
    let mut hist = [0f64; HISTOGRAM_BINS];
    for &p in scaled_probs.iter() {
        let bin = ((p as f64 * HISTOGRAM_BINS as f64) as usize).min(HISTOGRAM_BINS - 1);
        hist[bin] += 1.0;
    }
    for count in hist.iter_mut() {
        *count /= total as f64;
    }
    let mut knee = 0usize;
    let mut best_drop = f64::NEG_INFINITY;
    for i in 0..KNEE_SEARCH_BINS {
        let drop = hist[i] - hist[i + 1];
        if drop > best_drop {
            best_drop = drop;
            knee = i;
        }
    }
    let knee_edge = (knee + 1) as f64 / HISTOGRAM_BINS as f64;
    knee_edge + base_threshold
}

/// Threshold the fine-scale probabilities and their scaled aggregate.
pub fn vad_masks(
    vad_probs: ArrayView1<'_, f32>,
    scale_row: &[usize],
    base_threshold: f64,
) -> Result<VadMasks, DiarizationError> {
    let scaled_probs = aggregate_scaled_probs(vad_probs, scale_row)?;
    let threshold = adaptive_vad_threshold(scaled_probs.view(), base_threshold);
    tracing::info!("[VAD Thresholding] adaptive vad_threshold is set to {threshold:.3}");
    let scaled = scaled_probs.mapv(|p| p as f64 > threshold);
    let base = vad_probs.mapv(|p| p as f64 > threshold);
    Ok(VadMasks {
        threshold,
        scaled,
        base,
    })
}
