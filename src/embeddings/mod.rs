//! Multi-scale embedding tensors
//!
//! Embeddings arrive from the external extractor shaped `[T, S, D]` for a
//! single channel or `[T, S, D, C]` for a microphone array, where `T` counts
//! base-scale segments and `S` counts scales (coarsest first).

pub mod channels;

pub use channels::{select_channel_embs, SelectedChannelEmbs};

use ndarray::{Array2, Array3, Array4, ArrayView3, Axis};

use crate::types::DiarizationError;

/// Embedding tensor for one session, polymorphic over the channel layout.
#[derive(Debug, Clone)]
pub enum EmbeddingTensor {
    /// `[T, S, D]`
    SingleChannel(Array3<f32>),

    /// `[T, S, D, C]`
    MultiChannel(Array4<f32>),
}

impl EmbeddingTensor {
    pub fn num_segments(&self) -> usize {
        match self {
            EmbeddingTensor::SingleChannel(e) => e.dim().0,
            EmbeddingTensor::MultiChannel(e) => e.dim().0,
        }
    }

    pub fn num_scales(&self) -> usize {
        match self {
            EmbeddingTensor::SingleChannel(e) => e.dim().1,
            EmbeddingTensor::MultiChannel(e) => e.dim().1,
        }
    }

    pub fn embedding_dim(&self) -> usize {
        match self {
            EmbeddingTensor::SingleChannel(e) => e.dim().2,
            EmbeddingTensor::MultiChannel(e) => e.dim().2,
        }
    }

    pub fn is_multi_channel(&self) -> bool {
        matches!(self, EmbeddingTensor::MultiChannel(_))
    }

    /// Select a subset of segment rows and a scale prefix, keeping channels.
    pub fn select(&self, rows: &[usize], num_scales: usize) -> EmbeddingTensor {
        match self {
            EmbeddingTensor::SingleChannel(e) => {
                let sliced = e.slice(ndarray::s![.., ..num_scales, ..]);
                EmbeddingTensor::SingleChannel(sliced.select(Axis(0), rows))
            }
            EmbeddingTensor::MultiChannel(e) => {
                let sliced = e.slice(ndarray::s![.., ..num_scales, .., ..]);
                EmbeddingTensor::MultiChannel(sliced.select(Axis(0), rows))
            }
        }
    }
}

/// Collapse the scale axis with per-scale weights: `[T, S, D] -> [T, D]`.
pub fn collapse_scales(embs: ArrayView3<'_, f32>, weights: &[f64]) -> Array2<f32> {
    let (t, s, d) = embs.dim();
    let mut out = Array2::<f32>::zeros((t, d));
    for scale_idx in 0..s {
        let weight = weights.get(scale_idx).copied().unwrap_or(1.0) as f32;
        out.scaled_add(weight, &embs.index_axis(Axis(1), scale_idx));
    }
    out
}

/// Mean-center and L2-normalize embeddings of shape `[N, D]`.
pub fn embedding_normalize(embs: &Array2<f32>, use_std: bool) -> Array2<f32> {
    const EPS: f32 = 1e-10;
    let mean = match embs.mean_axis(Axis(0)) {
        Some(mean) => mean,
        None => return embs.clone(),
    };
    let mut out = embs - &mean;
    if use_std {
        let std = out.std_axis(Axis(0), 0.0) + EPS;
        out = out / &std;
    }
    for mut row in out.rows_mut() {
        let norm = row.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            row.mapv_inplace(|v| v / norm);
        }
    }
    out
}

/// Cosine similarity of two equal-length vectors; 0 when either is silent.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Shape-compatibility check between embeddings and cluster labels.
pub fn check_segment_count(
    tensor: &EmbeddingTensor,
    expected: usize,
    uniq_id: &str,
) -> Result<(), DiarizationError> {
    if tensor.num_segments() != expected {
        return Err(DiarizationError::DataError {
            uniq_id: uniq_id.to_string(),
            message: format!(
                "embedding tensor has {} segments, expected {}",
                tensor.num_segments(),
                expected
            ),
        });
    }
    Ok(())
}
