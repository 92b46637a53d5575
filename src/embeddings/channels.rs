//! Multi-channel embedding selection
//!
//! Keeps the `max_mc_ch_num` most mutually correlated channels at every time
//! step. Silent channels carry no speaker information and are replaced by
//! tiling the positive ones.

use ndarray::{Array2, Array3, Array4, ArrayView4, Axis};

use crate::types::DiarizationError;

use super::cosine_similarity;

/// Channel-selected embeddings, in the layout the caller asked for.
#[derive(Debug, Clone)]
pub enum SelectedChannelEmbs {
    /// `[T, D, C']` after collapsing the scale axis
    Collapsed(Array3<f32>),

    /// `[T, S, D, C']` with the scale axis preserved
    Full(Array4<f32>),
}

/// Select the top channels of a multi-channel embedding tensor.
///
/// With `collapse_scale_dim` the scale axis is reduced by the multiscale
/// weights first; otherwise scales and embedding dimensions are flattened
/// into one feature vector per channel and the shape is restored after
/// selection.
///
/// At every time step the channels are ranked by their mean cosine
/// similarity to all channels. Channels whose similarity score summed over
/// time is not positive are treated as silent: they are never selected, and
/// when fewer than `max_mc_ch_num` positive channels exist the positive ones
/// are tiled cyclically to fill the quota. All channels silent is a fatal
/// data error.
pub fn select_channel_embs(
    ms_emb_seq: ArrayView4<'_, f32>,
    max_mc_ch_num: usize,
    collapse_scale_dim: bool,
    multiscale_weights: &[f64],
) -> Result<SelectedChannelEmbs, DiarizationError> {
    let (t, s, d, c) = ms_emb_seq.dim();

    // [T, F, C] where F is either D (collapsed) or S*D (flattened)
    let mut merged: Array3<f32> = if collapse_scale_dim {
        let mut out = Array3::<f32>::zeros((t, d, c));
        for scale_idx in 0..s {
            let weight = multiscale_weights
                .get(scale_idx)
                .copied()
                .unwrap_or(1.0) as f32;
            out.scaled_add(weight, &ms_emb_seq.index_axis(Axis(1), scale_idx));
        }
        out
    } else {
        ms_emb_seq
            .to_owned()
            .into_shape((t, s * d, c))
            .map_err(|e| DiarizationError::InvariantViolation {
                stage: "select_channel_embs".to_string(),
                message: format!("flattening scale axis failed: {e}"),
            })?
    };

    // When the array has fewer channels than the quota, append a copy of the
    // leading channels once before ranking.
    if merged.dim().2 < max_mc_ch_num {
        let avail = merged.dim().2;
        let delta = (max_mc_ch_num - avail).min(avail);
        let head = merged.slice(ndarray::s![.., .., ..delta]).to_owned();
        merged = ndarray::concatenate(Axis(2), &[merged.view(), head.view()]).map_err(|e| {
            DiarizationError::InvariantViolation {
                stage: "select_channel_embs".to_string(),
                message: format!("channel tiling failed: {e}"),
            }
        })?;
    }
    let num_ch = merged.dim().2;
    let feat = merged.dim().1;

    // Per-time-step channel score: mean cosine similarity to every channel.
    let mut ch_scores = Array2::<f32>::zeros((t, num_ch));
    let mut channel_buf: Vec<Vec<f32>> = vec![vec![0.0; feat]; num_ch];
    for tdx in 0..t {
        for (ch, buf) in channel_buf.iter_mut().enumerate() {
            for f in 0..feat {
                buf[f] = merged[[tdx, f, ch]];
            }
        }
        for c2 in 0..num_ch {
            let mut acc = 0.0f32;
            for c1 in 0..num_ch {
                acc += cosine_similarity(&channel_buf[c1], &channel_buf[c2]);
            }
            ch_scores[[tdx, c2]] = acc / num_ch as f32;
        }
    }

    let only_pos: Vec<bool> = (0..num_ch)
        .map(|ch| ch_scores.column(ch).sum() > 0.0)
        .collect();
    let num_pos = only_pos.iter().filter(|p| **p).count();
    if num_pos == 0 {
        return Err(DiarizationError::DataError {
            uniq_id: String::new(),
            message: "all channels are silent, cannot perform channel selection".to_string(),
        });
    }

    // Rank channels per time step, keep positive ones, tile to the quota.
    let mut selected = Array3::<f32>::zeros((t, feat, max_mc_ch_num));
    for tdx in 0..t {
        let mut order: Vec<usize> = (0..num_ch).collect();
        order.sort_by(|a, b| {
            ch_scores[[tdx, *b]]
                .partial_cmp(&ch_scores[[tdx, *a]])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let positive: Vec<usize> = order.into_iter().filter(|ch| only_pos[*ch]).collect();
        let mut chosen: Vec<usize> = (0..max_mc_ch_num)
            .map(|k| positive[k % positive.len()])
            .collect();
        // Stable downstream ordering: channel indices, highest first.
        chosen.sort_unstable_by(|a, b| b.cmp(a));
        for (slot, ch) in chosen.iter().enumerate() {
            for f in 0..feat {
                selected[[tdx, f, slot]] = merged[[tdx, f, *ch]];
            }
        }
    }

    if collapse_scale_dim {
        Ok(SelectedChannelEmbs::Collapsed(selected))
    } else {
        let restored = selected
            .into_shape((t, s, d, max_mc_ch_num))
            .map_err(|e| DiarizationError::InvariantViolation {
                stage: "select_channel_embs".to_string(),
                message: format!("restoring scale axis failed: {e}"),
            })?;
        Ok(SelectedChannelEmbs::Full(restored))
    }
}
