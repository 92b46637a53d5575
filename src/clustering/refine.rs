//! Divide-and-conquer refinement for long recordings
//!
//! The global clustering of a long session is refined chunk by chunk: each
//! chunk of speech-active frames is re-clustered locally with the global
//! speaker count as the oracle, stitched back onto the global labels, and
//! rejected when it disagrees with the global labeling too strongly.

use ndarray::{Array2, Axis};

use crate::embeddings::EmbeddingTensor;
use crate::types::{DiarizationConfig, DiarizationError};

use super::counter::{CounterEmbeddings, CounterRequest, SpeakerCounter};
use super::labels::{get_minimal_indices, stitch_cluster_labels, sync_score};

/// Local re-clustering uses a tight neighbour-ratio search.
const REFINE_MAX_RP_THRESHOLD: f64 = 0.05;

/// Mean embedding over the scale axis (and channels, for array input).
fn mean_over_scales(tensor: &EmbeddingTensor) -> Array2<f32> {
    match tensor {
        EmbeddingTensor::SingleChannel(e) => {
            e.mean_axis(Axis(1)).expect("non-empty scale axis")
        }
        EmbeddingTensor::MultiChannel(e) => e
            .mean_axis(Axis(3))
            .expect("non-empty channel axis")
            .mean_axis(Axis(1))
            .expect("non-empty scale axis"),
    }
}

/// Refine finest-scale labels chunk by chunk.
///
/// `embeddings` is the full `[T_fine, S, D]` tensor and `labels_finest` the
/// globally clustered labels with `-1` marking non-speech. Chunks hold
/// `unit_clus_len` speech-active frames each. A chunk whose stitched local
/// labels agree with the global labels on less than `sync_score_thres` of
/// the frames keeps its global labels.
pub fn divide_and_conquer_refine(
    counter: &dyn SpeakerCounter,
    embeddings: &EmbeddingTensor,
    labels_finest: &[i64],
    clustering_scale_idx: usize,
    config: &DiarizationConfig,
) -> Result<Vec<i64>, DiarizationError> {
    let num_scales = embeddings.num_scales();
    let fine_grained_scale_idx = (clustering_scale_idx + 1).min(num_scales.saturating_sub(1));

    let speech_rows: Vec<usize> = labels_finest
        .iter()
        .enumerate()
        .filter_map(|(idx, label)| (*label > -1).then_some(idx))
        .collect();
    if speech_rows.is_empty() || config.unit_clus_len == 0 {
        return Ok(labels_finest.to_vec());
    }
    let speech_labels: Vec<i64> = speech_rows.iter().map(|r| labels_finest[*r]).collect();

    let mut refined_speech: Vec<i64> = Vec::with_capacity(speech_labels.len());
    for (chunk_rows, chunk_labels) in speech_rows
        .chunks(config.unit_clus_len)
        .zip(speech_labels.chunks(config.unit_clus_len))
    {
        let chunk_embs = embeddings.select(chunk_rows, fine_grained_scale_idx + 1);
        let local_num_speakers = chunk_labels.iter().copied().max().unwrap_or(0) + 1;
        let offset = chunk_labels.iter().copied().min().unwrap_or(0);
        let global_minimal = get_minimal_indices(chunk_labels);

        let local_labels = counter.cluster(CounterRequest {
            embeddings: CounterEmbeddings::Mono(mean_over_scales(&chunk_embs)),
            oracle_num_speakers: local_num_speakers,
            max_num_speakers: config.max_num_speakers,
            min_num_speakers: 1,
            max_rp_threshold: REFINE_MAX_RP_THRESHOLD,
            sparse_search_volume: config.sparse_search_volume,
            drop_length_thres: config.drop_length_thres,
            reclus_aff_thres: config.reclus_aff_thres,
            use_drop_and_recluster: false,
        })?;
        if local_labels.len() != chunk_labels.len() {
            return Err(DiarizationError::ClusteringError {
                message: format!(
                    "local clustering returned {} labels for a chunk of {}",
                    local_labels.len(),
                    chunk_labels.len()
                ),
            });
        }

        let stitched = stitch_cluster_labels(&global_minimal, &local_labels);
        let score = sync_score(&global_minimal, &stitched);
        tracing::info!(
            "[Speaker Clustering] fine-grained label sync score: {score:.4}, offset: {offset}, \
             sync_score_thres: {:.3}",
            config.sync_score_thres
        );
        if score < config.sync_score_thres {
            refined_speech.extend(global_minimal.iter().map(|l| l + offset));
        } else {
            refined_speech.extend(stitched);
        }
    }

    let mut refined = labels_finest.to_vec();
    for (row, label) in speech_rows.iter().zip(refined_speech) {
        refined[*row] = label;
    }
    Ok(refined)
}
