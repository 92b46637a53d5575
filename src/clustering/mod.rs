//! Clustering driver
//!
//! Wraps the external speaker counter for one session: long-form detection,
//! VAD masking, channel selection, the counter call, and expansion of the
//! clustering-scale labels back to the finest scale.

pub mod counter;
pub mod labels;
pub mod refine;

pub use counter::{CounterEmbeddings, CounterRequest, SpeakerCounter};
pub use labels::{expand_to_finest_scale, get_minimal_indices, stitch_cluster_labels, sync_score};
pub use refine::divide_and_conquer_refine;

use ndarray::{Array1, Array2, Array3};

use crate::embeddings::{
    collapse_scales, select_channel_embs, EmbeddingTensor, SelectedChannelEmbs,
};
use crate::segments::ScaleSchedule;
use crate::types::{DiarizationConfig, DiarizationError};
use crate::vad::{run_end_indices, run_ordinals, vad_masks};

/// Per-session tensors produced by the external embedding and VAD models.
#[derive(Debug, Clone)]
pub struct SessionTensors {
    /// `[T_fine, S, D]` or `[T_fine, S, D, C]`
    pub embeddings: EmbeddingTensor,

    /// `[S, T_fine, 2]` start/end in feature frames
    pub timestamps: Array3<f32>,

    /// `[S, T_fine]` covering-segment index per scale
    pub scale_map: Array2<usize>,

    /// `[T_fine]` speech probability per finest-scale segment
    pub vad_probs: Array1<f32>,
}

/// Result of clustering one session.
#[derive(Debug, Clone)]
pub struct ClusterOutcome {
    /// One label per finest-scale segment, `-1` for non-speech
    pub labels_finest: Vec<i64>,

    /// `[start, end]` in seconds for each emitted segment
    pub output_ranges: Vec<[f64; 2]>,

    /// Label per emitted segment, aligned with `output_ranges`
    pub output_labels: Vec<i64>,

    /// Estimated (or oracle) speaker count
    pub num_speakers: usize,

    /// Final adaptive VAD threshold used for masking
    pub vad_threshold: f64,

    /// Whether the long-form path was taken
    pub long_form: bool,

    /// Scale index clustering actually ran at
    pub effective_scale_idx: usize,
}

/// Clustering driver for one engine instance.
pub struct ClusterDriver<'a> {
    config: &'a DiarizationConfig,
    schedule: &'a ScaleSchedule,
}

impl<'a> ClusterDriver<'a> {
    pub fn new(config: &'a DiarizationConfig, schedule: &'a ScaleSchedule) -> Self {
        Self { config, schedule }
    }

    /// Cluster one session's embeddings into speaker labels.
    ///
    /// `oracle_num_speakers` is the manifest speaker count; it is required
    /// when the configuration enables oracle mode.
    pub fn cluster_session(
        &self,
        uniq_id: &str,
        oracle_num_speakers: Option<usize>,
        tensors: &SessionTensors,
        speaker_counter: &dyn SpeakerCounter,
    ) -> Result<ClusterOutcome, DiarizationError> {
        let config = self.config;
        let num_scales = self.schedule.num_scales();
        let t_fine = tensors.scale_map.dim().1;
        self.check_shapes(uniq_id, tensors, num_scales, t_fine)?;

        let configured_idx = if config.use_single_scale_clustering {
            0
        } else {
            config.clustering_scale_index
        };
        let long_form = t_fine > config.long_audio_thres;
        let effective_idx = if long_form {
            let lowered = configured_idx.saturating_sub(1);
            tracing::info!(
                "[Speaker Clustering] long form audio detected: {t_fine} segments, \
                 clustering at scale {lowered}"
            );
            lowered
        } else {
            tracing::info!("[Speaker Clustering] short form audio detected: {t_fine} segments");
            configured_idx
        };

        let scale_row = run_ordinals(&tensors.scale_map.row(effective_idx).to_vec());
        let masks = vad_masks(tensors.vad_probs.view(), &scale_row, config.vad_threshold)?;
        let scaled_seg_ends = run_end_indices(&scale_row);
        let num_scaled = scaled_seg_ends.len();
        if masks.scaled.len() != num_scaled {
            return Err(DiarizationError::InvariantViolation {
                stage: "cluster_session".to_string(),
                message: format!(
                    "{} scaled VAD decisions for {num_scaled} clustering-scale segments",
                    masks.scaled.len()
                ),
            });
        }

        // One row per clustering-scale segment, scales up to the effective
        // index, then drop the VAD-masked rows.
        let ms_embs = tensors.embeddings.select(&scaled_seg_ends, effective_idx + 1);
        let speech_rows: Vec<usize> = (0..num_scaled).filter(|i| masks.scaled[*i]).collect();
        if speech_rows.is_empty() {
            return Err(DiarizationError::DataError {
                uniq_id: uniq_id.to_string(),
                message: "no speech segments left after VAD masking".to_string(),
            });
        }
        let masked_embs = ms_embs.select(&speech_rows, effective_idx + 1);

        let counter_embs = match &masked_embs {
            EmbeddingTensor::SingleChannel(e) => {
                CounterEmbeddings::Mono(collapse_scales(e.view(), &config.multiscale_weights))
            }
            EmbeddingTensor::MultiChannel(e) => {
                match select_channel_embs(
                    e.view(),
                    config.max_mc_ch_num,
                    true,
                    &config.multiscale_weights,
                )
                .map_err(|e| e.with_session(uniq_id))?
                {
                    SelectedChannelEmbs::Collapsed(sel) => CounterEmbeddings::MultiChannel(sel),
                    SelectedChannelEmbs::Full(_) => {
                        return Err(DiarizationError::InvariantViolation {
                            stage: "cluster_session".to_string(),
                            message: "channel selection returned an uncollapsed tensor"
                                .to_string(),
                        })
                    }
                }
            }
        };

        let oracle = if config.oracle_num_speakers {
            match oracle_num_speakers {
                Some(n) => n as i64,
                None => {
                    return Err(DiarizationError::ConfigError {
                        message: format!(
                            "oracle_num_speakers is enabled but num_speakers is null for '{uniq_id}'"
                        ),
                    })
                }
            }
        } else {
            -1
        };

        let drop_length_scaled = (self.schedule.window(configured_idx)
            / self.schedule.window(effective_idx)
            * config.drop_length_thres as f64) as usize;

        let raw_labels = speaker_counter.cluster(CounterRequest {
            embeddings: counter_embs,
            oracle_num_speakers: oracle,
            max_num_speakers: config.max_num_speakers,
            min_num_speakers: config.min_num_speakers,
            max_rp_threshold: config.max_rp_threshold,
            sparse_search_volume: config.sparse_search_volume,
            drop_length_thres: drop_length_scaled,
            reclus_aff_thres: config.reclus_aff_thres,
            use_drop_and_recluster: true,
        })?;
        if raw_labels.len() != speech_rows.len() {
            return Err(DiarizationError::ClusteringError {
                message: format!(
                    "counter returned {} labels for {} segments",
                    raw_labels.len(),
                    speech_rows.len()
                ),
            });
        }
        let cluster_labels = get_minimal_indices(&raw_labels);
        let num_speakers = cluster_labels
            .iter()
            .copied()
            .max()
            .map(|m| (m + 1) as usize)
            .unwrap_or(0);
        if num_speakers > config.max_num_speakers {
            return Err(DiarizationError::ClusteringError {
                message: format!(
                    "counter produced {num_speakers} speakers, above the limit of {}",
                    config.max_num_speakers
                ),
            });
        }

        let labels_finest = expand_to_finest_scale(
            num_scaled,
            &cluster_labels,
            &masks.scaled,
            &masks.base,
            &scale_row,
        )?;

        let feat_per_sec = config.feat_per_sec as f64;
        let (output_ranges, output_labels) = if config.get_rttm_with_the_finest_scale {
            let finest_idx = num_scales - 1;
            let mut ranges = Vec::new();
            let mut out_labels = Vec::new();
            for (tdx, label) in labels_finest.iter().enumerate() {
                if *label != -1 {
                    ranges.push([
                        tensors.timestamps[[finest_idx, tdx, 0]] as f64 / feat_per_sec,
                        tensors.timestamps[[finest_idx, tdx, 1]] as f64 / feat_per_sec,
                    ]);
                    out_labels.push(*label);
                }
            }
            (ranges, out_labels)
        } else {
            let ranges = speech_rows
                .iter()
                .map(|i| {
                    let tdx = scaled_seg_ends[*i];
                    [
                        tensors.timestamps[[effective_idx, tdx, 0]] as f64 / feat_per_sec,
                        tensors.timestamps[[effective_idx, tdx, 1]] as f64 / feat_per_sec,
                    ]
                })
                .collect();
            (ranges, cluster_labels.clone())
        };
        if output_ranges.len() != output_labels.len() {
            return Err(DiarizationError::DataError {
                uniq_id: uniq_id.to_string(),
                message: "mismatch of length between cluster labels and timestamps".to_string(),
            });
        }

        Ok(ClusterOutcome {
            labels_finest,
            output_ranges,
            output_labels,
            num_speakers,
            vad_threshold: masks.threshold,
            long_form,
            effective_scale_idx: effective_idx,
        })
    }

    fn check_shapes(
        &self,
        uniq_id: &str,
        tensors: &SessionTensors,
        num_scales: usize,
        t_fine: usize,
    ) -> Result<(), DiarizationError> {
        if tensors.scale_map.dim().0 != num_scales
            || tensors.timestamps.dim().0 != num_scales
            || tensors.timestamps.dim().1 != t_fine
        {
            return Err(DiarizationError::DataError {
                uniq_id: uniq_id.to_string(),
                message: format!(
                    "scale map {:?} and timestamps {:?} disagree with a {num_scales}-scale schedule",
                    tensors.scale_map.dim(),
                    tensors.timestamps.dim()
                ),
            });
        }
        if tensors.vad_probs.len() != t_fine {
            return Err(DiarizationError::DataError {
                uniq_id: uniq_id.to_string(),
                message: format!(
                    "{} VAD probabilities for {t_fine} finest-scale segments",
                    tensors.vad_probs.len()
                ),
            });
        }
        if tensors.embeddings.num_segments() != t_fine {
            return Err(DiarizationError::DataError {
                uniq_id: uniq_id.to_string(),
                message: format!(
                    "embedding tensor has {} segments, expected {t_fine}",
                    tensors.embeddings.num_segments()
                ),
            });
        }
        if tensors.embeddings.num_scales() < num_scales {
            return Err(DiarizationError::DataError {
                uniq_id: uniq_id.to_string(),
                message: format!(
                    "embedding tensor has {} scales, schedule has {num_scales}",
                    tensors.embeddings.num_scales()
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, Array2, Array3};

    struct ConstCounter {
        labels: Vec<i64>,
    }

    impl SpeakerCounter for ConstCounter {
        fn cluster(&self, request: CounterRequest) -> Result<Vec<i64>, DiarizationError> {
            assert_eq!(request.embeddings.num_rows(), self.labels.len());
            Ok(self.labels.clone())
        }
    }

    fn single_scale_tensors(t_fine: usize, vad: &[f32]) -> SessionTensors {
        let timestamps = Array3::from_shape_fn((1, t_fine, 2), |(_, t, j)| {
            // 0.5 s segments every 0.25 s at 100 frames/s
            (t as f32 * 25.0) + (j as f32 * 50.0)
        });
        let scale_map = Array2::from_shape_fn((1, t_fine), |(_, t)| t);
        SessionTensors {
            embeddings: EmbeddingTensor::SingleChannel(Array3::<f32>::from_elem(
                (t_fine, 1, 8),
                0.5,
            )),
            timestamps,
            scale_map,
            vad_probs: Array1::from(vad.to_vec()),
        }
    }

    fn single_scale_config() -> DiarizationConfig {
        DiarizationConfig {
            window_lengths_in_sec: vec![0.5],
            shift_lengths_in_sec: vec![0.25],
            multiscale_weights: vec![1.0],
            clustering_scale_index: 0,
            vad_threshold: 0.1,
            ..Default::default()
        }
    }

    #[test]
    fn single_speaker_session_gets_label_zero_everywhere() {
        let config = single_scale_config();
        let schedule = ScaleSchedule::new(
            config.window_lengths_in_sec.clone(),
            config.shift_lengths_in_sec.clone(),
            config.multiscale_weights.clone(),
        )
        .unwrap();
        let vad = vec![0.9f32; 20];
        let tensors = single_scale_tensors(20, &vad);
        let counter = ConstCounter {
            labels: vec![7; 20],
        };
        let driver = ClusterDriver::new(&config, &schedule);
        let outcome = driver
            .cluster_session("sess", None, &tensors, &counter)
            .unwrap();
        // Labels are minimal: the counter's label 7 becomes 0.
        assert_eq!(outcome.num_speakers, 1);
        assert!(outcome.labels_finest.iter().all(|l| *l == 0));
        assert_eq!(outcome.output_ranges.len(), 20);
    }

    #[test]
    fn masked_frames_stay_nonspeech() {
        let config = single_scale_config();
        let schedule = ScaleSchedule::single(0.5, 0.25).unwrap();
        let mut vad = vec![0.9f32; 12];
        for v in vad.iter_mut().skip(8) {
            *v = 0.0;
        }
        let tensors = single_scale_tensors(12, &vad);
        let counter = ConstCounter {
            labels: vec![0; 8],
        };
        let driver = ClusterDriver::new(&config, &schedule);
        let outcome = driver
            .cluster_session("sess", None, &tensors, &counter)
            .unwrap();
        assert!(outcome.labels_finest[..8].iter().all(|l| *l == 0));
        assert!(outcome.labels_finest[8..].iter().all(|l| *l == -1));
    }

    #[test]
    fn oracle_mode_without_count_is_a_config_error() {
        let config = DiarizationConfig {
            oracle_num_speakers: true,
            ..single_scale_config()
        };
        let schedule = ScaleSchedule::single(0.5, 0.25).unwrap();
        let tensors = single_scale_tensors(4, &[0.9, 0.9, 0.9, 0.9]);
        let counter = ConstCounter { labels: vec![0; 4] };
        let driver = ClusterDriver::new(&config, &schedule);
        let result = driver.cluster_session("sess", None, &tensors, &counter);
        assert!(matches!(
            result,
            Err(DiarizationError::ConfigError { .. })
        ));
    }

    #[test]
    fn oracle_speaker_count_reaches_the_counter() {
        let config = DiarizationConfig {
            oracle_num_speakers: true,
            ..single_scale_config()
        };
        let schedule = ScaleSchedule::single(0.5, 0.25).unwrap();
        let tensors = single_scale_tensors(4, &[0.9, 0.9, 0.9, 0.9]);
        struct OracleCheckCounter;
        impl SpeakerCounter for OracleCheckCounter {
            fn cluster(&self, request: CounterRequest) -> Result<Vec<i64>, DiarizationError> {
                assert_eq!(request.oracle_num_speakers, 1);
                Ok(vec![0; request.embeddings.num_rows()])
            }
        }
        let driver = ClusterDriver::new(&config, &schedule);
        let outcome = driver
            .cluster_session("sess", Some(1), &tensors, &OracleCheckCounter)
            .unwrap();
        assert_eq!(outcome.num_speakers, 1);
    }

    #[test]
    fn counter_length_mismatch_is_rejected() {
        let config = single_scale_config();
        let schedule = ScaleSchedule::single(0.5, 0.25).unwrap();
        let tensors = single_scale_tensors(4, &[0.9, 0.9, 0.9, 0.9]);
        struct BadCounter;
        impl SpeakerCounter for BadCounter {
            fn cluster(&self, _request: CounterRequest) -> Result<Vec<i64>, DiarizationError> {
                Ok(vec![0])
            }
        }
        let driver = ClusterDriver::new(&config, &schedule);
        assert!(driver
            .cluster_session("sess", None, &tensors, &BadCounter)
            .is_err());
    }
}
