//! MSDD overlap-decoder post-processing
//!
//! Turns per-frame per-speaker sigmoid activations into a binary
//! speaker-activation matrix: top-k selection bounds the overlap degree,
//! the logit gap gates how confident a second speaker must be, and the VAD
//! or TS-VAD mask silences non-speech frames.

use ndarray::{Array1, Array2, Array3, ArrayView2, Axis};

use crate::types::{DiarizationConfig, DiarizationError, LateFusionMode};

/// MSDD prediction tensor, single-channel or with a trailing channel axis.
#[derive(Debug, Clone)]
pub enum MsddPreds {
    /// `[T, M]` sigmoid activations
    Single(Array2<f32>),

    /// `[T, M, C]` per-channel activations for late fusion
    MultiChannel(Array3<f32>),
}

impl MsddPreds {
    pub fn num_frames(&self) -> usize {
        match self {
            MsddPreds::Single(p) => p.dim().0,
            MsddPreds::MultiChannel(p) => p.dim().0,
        }
    }

    pub fn num_speakers(&self) -> usize {
        match self {
            MsddPreds::Single(p) => p.dim().1,
            MsddPreds::MultiChannel(p) => p.dim().1,
        }
    }

    fn has_nan(&self) -> bool {
        match self {
            MsddPreds::Single(p) => p.iter().any(|v| v.is_nan()),
            MsddPreds::MultiChannel(p) => p.iter().any(|v| v.is_nan()),
        }
    }
}

/// Keep the `k` largest activations of every row, zero the rest.
///
/// Also returns the per-row logit gap: the ratio of the second-largest kept
/// activation to the largest, or zero when `k == 1`.
pub fn top_k_for_each_row(logits: ArrayView2<'_, f32>, k: usize) -> (Array2<f32>, Array1<f32>) {
    let (t, m) = logits.dim();
    let k = k.min(m).max(1);
    let mut masked = Array2::<f32>::zeros((t, m));
    let mut gaps = Array1::<f32>::zeros(t);
    let mut order: Vec<usize> = Vec::with_capacity(m);
    for tdx in 0..t {
        order.clear();
        order.extend(0..m);
        order.sort_by(|a, b| {
            logits[[tdx, *b]]
                .partial_cmp(&logits[[tdx, *a]])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        for &col in order.iter().take(k) {
            masked[[tdx, col]] = logits[[tdx, col]];
        }
        if k > 1 {
            let top = logits[[tdx, order[0]]];
            let second = logits[[tdx, order[1]]];
            gaps[tdx] = if top > 0.0 { second / top } else { 0.0 };
        }
    }
    (masked, gaps)
}

/// Decode a single-channel prediction matrix into `{0, 1}` activations.
///
/// The result has the same shape as `preds`; row sums never exceed the
/// effective overlap bound, and frames that fail the VAD (or TS-VAD) gate
/// are all-zero.
pub fn speaker_activation_matrix(
    clus_labels: &[i64],
    preds: ArrayView2<'_, f32>,
    threshold: f64,
    max_overlap_count: usize,
    config: &DiarizationConfig,
) -> Result<Array2<u8>, DiarizationError> {
    let (t, m) = preds.dim();
    if clus_labels.len() != t {
        return Err(DiarizationError::InvariantViolation {
            stage: "speaker_activation_matrix".to_string(),
            message: format!("{} cluster labels for {t} prediction frames", clus_labels.len()),
        });
    }
    let vad_mask: Vec<bool> = clus_labels.iter().map(|l| *l > -1).collect();
    let mut active_speakers: Vec<i64> = clus_labels.iter().copied().filter(|l| *l >= 0).collect();
    active_speakers.sort_unstable();
    active_speakers.dedup();

    let mut preds = preds.to_owned();
    if config.mask_spks_with_clus {
        for col in 0..m {
            if !active_speakers.contains(&(col as i64)) {
                preds.column_mut(col).fill(0.0);
            }
        }
    }

    let total: f32 = preds.sum();
    if total <= 0.0 {
        // No activity anywhere: the whole matrix is silence.
        return Ok(Array2::<u8>::zeros((t, m)));
    }
    let spk_time_each = preds.sum_axis(Axis(0)) / total;

    let k = if config.infer_overlap {
        active_speakers.len().max(1).min(max_overlap_count)
    } else {
        1
    };
    let k = k.min(m).max(1);

    let (mut top_k, logit_gap) = top_k_for_each_row(preds.view(), k);
    let nonzero_per_row: Vec<usize> = top_k
        .rows()
        .into_iter()
        .map(|row| row.iter().filter(|v| **v > 0.0).count())
        .collect();
    if nonzero_per_row.iter().any(|count| *count != k) {
        return Err(DiarizationError::InvariantViolation {
            stage: "speaker_activation_matrix".to_string(),
            message: format!("top-{k} selection left a row without exactly {k} active entries"),
        });
    }
    let (top_1, _) = top_k_for_each_row(preds.view(), 1);

    // Speakers with a negligible share of total activity never enter the
    // overlap assignment.
    for col in 0..m {
        if (spk_time_each[col] as f64) < config.overlap_infer_spk_limit {
            top_k.column_mut(col).fill(0.0);
        }
    }

    let mut assign = Array2::<u8>::zeros((t, m));
    for tdx in 0..t {
        for col in 0..m {
            let top1_hit = top_1[[tdx, col]] > 0.0;
            let ovl_hit = top_k[[tdx, col]] as f64 >= threshold
                && logit_gap[tdx] as f64 >= threshold
                && top_k[[tdx, col]] > 0.0;
            if top1_hit || ovl_hit {
                assign[[tdx, col]] = 1;
            }
        }
    }

    if config.ts_vad_threshold <= 0.0 {
        for tdx in 0..t {
            if !vad_mask[tdx] {
                assign.row_mut(tdx).fill(0);
            }
        }
    } else {
        for tdx in 0..t {
            let frame_max = preds
                .row(tdx)
                .iter()
                .fold(f32::NEG_INFINITY, |acc, v| acc.max(*v));
            if (frame_max as f64) < config.ts_vad_threshold {
                assign.row_mut(tdx).fill(0);
            }
        }
    }
    Ok(assign)
}

/// Decode predictions with multi-channel late fusion.
///
/// `pre_mean` averages the channels before decoding; `post_mean` and
/// `post_max` decode every channel separately and reduce the stacked
/// activation matrices afterwards. The mean reduction is binarized at a
/// half-majority so the result stays a 0/1 matrix.
pub fn mixdown_preds(
    clus_labels: &[i64],
    preds: &MsddPreds,
    threshold: f64,
    max_overlap_count: usize,
    config: &DiarizationConfig,
) -> Result<Array2<u8>, DiarizationError> {
    if preds.has_nan() {
        return Err(DiarizationError::DataError {
            uniq_id: String::new(),
            message: "MSDD predictions contain NaN values".to_string(),
        });
    }
    // Sessions can end with trailing decoder frames past the clustering
    // output; pad the labels with non-speech to match.
    let mut labels = clus_labels.to_vec();
    if labels.len() < preds.num_frames() {
        labels.resize(preds.num_frames(), -1);
    } else if labels.len() > preds.num_frames() {
        return Err(DiarizationError::DataError {
            uniq_id: String::new(),
            message: format!(
                "{} cluster labels for {} prediction frames",
                labels.len(),
                preds.num_frames()
            ),
        });
    }

    match preds {
        MsddPreds::Single(p) => {
            speaker_activation_matrix(&labels, p.view(), threshold, max_overlap_count, config)
        }
        MsddPreds::MultiChannel(p) => match config.mc_late_fusion_mode {
            LateFusionMode::PreMean => {
                let mixed = p.mean_axis(Axis(2)).ok_or_else(|| {
                    DiarizationError::DataError {
                        uniq_id: String::new(),
                        message: "MSDD predictions have an empty channel axis".to_string(),
                    }
                })?;
                speaker_activation_matrix(
                    &labels,
                    mixed.view(),
                    threshold,
                    max_overlap_count,
                    config,
                )
            }
            LateFusionMode::PostMean | LateFusionMode::PostMax => {
                let num_channels = p.dim().2;
                if num_channels == 0 {
                    return Err(DiarizationError::DataError {
                        uniq_id: String::new(),
                        message: "MSDD predictions have an empty channel axis".to_string(),
                    });
                }
                let (t, m) = (p.dim().0, p.dim().1);
                let mut summed = Array2::<u32>::zeros((t, m));
                let mut union = Array2::<u8>::zeros((t, m));
                for ch in 0..num_channels {
                    let channel = p.index_axis(Axis(2), ch).to_owned();
                    let assign = speaker_activation_matrix(
                        &labels,
                        channel.view(),
                        threshold,
                        max_overlap_count,
                        config,
                    )?;
                    for tdx in 0..t {
                        for col in 0..m {
                            summed[[tdx, col]] += assign[[tdx, col]] as u32;
                            union[[tdx, col]] |= assign[[tdx, col]];
                        }
                    }
                }
                if config.mc_late_fusion_mode == LateFusionMode::PostMax {
                    Ok(union)
                } else {
                    Ok(summed.mapv(|count| u8::from(count * 2 >= num_channels as u32)))
                }
            }
        },
    }
}
