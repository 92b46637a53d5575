//! Core type definitions for the diarization post-processing engine
//!
//! Configuration, device selection and error types shared by all pipeline
//! stages.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration for the diarization post-processing engine.
///
/// This structure contains every recognized tuning option for the pipeline:
/// the multi-scale segmentation schedule, speaker-count bounds handed to the
/// external clusterer, the adaptive VAD threshold offset, the long-form
/// refinement path and the MSDD overlap-decoder post-processing.
///
/// Unknown keys in a deserialized configuration are rejected; every option
/// carries an explicit default.
///
/// # Performance Tuning
///
/// - **Meetings with few speakers**: lower `max_num_speakers`, disable
///   `infer_overlap` for cleaner single-speaker output
/// - **Long recordings (hours)**: keep `long_audio_thres` at its default so
///   clustering drops to a coarser scale, and leave `unit_clus_len` > 0 to
///   enable divide-and-conquer refinement
/// - **Far-field multi-channel arrays**: raise `max_mc_ch_num` up to the
///   channel count; `post_max` late fusion is the most recall-oriented mode
///
/// # Examples
///
/// ```rust
/// use diarkit::types::DiarizationConfig;
///
/// let config = DiarizationConfig {
///     max_num_speakers: 4,
///     oracle_num_speakers: false,
///     infer_overlap: true,
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DiarizationConfig {
    /// Window length in seconds for each scale, longest first
    pub window_lengths_in_sec: Vec<f64>,

    /// Shift length in seconds for each scale, longest first
    pub shift_lengths_in_sec: Vec<f64>,

    /// Per-scale linear weights used when collapsing the scale axis
    pub multiscale_weights: Vec<f64>,

    /// Restrict clustering to scale 0 only
    pub use_single_scale_clustering: bool,

    /// Scale index used for clustering (coarser than the base scale)
    pub clustering_scale_index: usize,

    /// Maximum number of speakers the clusterer may estimate
    pub max_num_speakers: usize,

    /// Minimum number of speakers the clusterer may estimate
    pub min_num_speakers: usize,

    /// Take the speaker count from the session manifest instead of estimating
    pub oracle_num_speakers: bool,

    /// Maximum p-neighbour ratio searched by the external clusterer
    pub max_rp_threshold: f64,

    /// Number of p-values in the clusterer's sparse search
    pub sparse_search_volume: usize,

    /// Affinity threshold for the clusterer's re-clustering pass
    pub reclus_aff_thres: f64,

    /// Maximum number of channels kept by the multi-channel selector
    pub max_mc_ch_num: usize,

    /// Offset added to the adaptive VAD threshold knee
    pub vad_threshold: f64,

    /// Minimum subsegment duration in seconds; shorter slices are discarded
    pub min_subsegment_duration: f64,

    /// Feature frames per second of the timestamp tensors
    pub feat_per_sec: usize,

    /// Segment-count threshold passed to the clusterer to drop short segments
    pub drop_length_thres: usize,

    /// Finest-scale segment count above which a recording is long form
    pub long_audio_thres: usize,

    /// Agreement fraction below which local re-clustering is rejected
    pub sync_score_thres: f64,

    /// Number of speech-active frames per divide-and-conquer chunk;
    /// 0 disables the refinement
    pub unit_clus_len: usize,

    /// Enable overlap-aware speaker assignment from the MSDD decoder
    pub infer_overlap: bool,

    /// Zero MSDD columns whose speaker never appears in the cluster labels
    pub mask_spks_with_clus: bool,

    /// Activity fraction below which a speaker is excluded from overlap
    pub overlap_infer_spk_limit: f64,

    /// TS-VAD frame gate; 0 falls back to the clustering VAD mask
    pub ts_vad_threshold: f64,

    /// Multi-channel late-fusion mode for MSDD predictions
    pub mc_late_fusion_mode: LateFusionMode,

    /// Hop length of one decoder step in centiseconds
    pub hop_len_in_cs: usize,

    /// Emit speaker intervals through TS-VAD smoothing instead of raw
    /// segment timestamps
    pub use_ts_vad: bool,

    /// Hysteresis parameters for TS-VAD smoothing
    pub vad_params: VadParams,

    /// Label describing the inference mode, used in logs only
    pub infer_mode: String,

    /// System name used in the output directory layout
    pub system_name: String,

    /// Render RTTM output at the finest scale instead of the clustering scale
    pub get_rttm_with_the_finest_scale: bool,

    /// Include the threshold value in output directory names
    pub verbose: bool,
}

impl Default for DiarizationConfig {
    fn default() -> Self {
        Self {
            window_lengths_in_sec: vec![1.5, 1.25, 1.0, 0.75, 0.5],
            shift_lengths_in_sec: vec![0.75, 0.625, 0.5, 0.375, 0.25],
            multiscale_weights: vec![1.0, 1.0, 1.0, 1.0, 1.0],
            use_single_scale_clustering: false,
            clustering_scale_index: 2,
            max_num_speakers: 8,
            min_num_speakers: 1,
            oracle_num_speakers: false,
            max_rp_threshold: 0.25,
            sparse_search_volume: 30,
            reclus_aff_thres: 0.85,
            max_mc_ch_num: 4,
            vad_threshold: 0.1,
            min_subsegment_duration: 0.05,
            feat_per_sec: 100,
            drop_length_thres: 4500,
            long_audio_thres: 100_000,
            sync_score_thres: 0.75,
            unit_clus_len: 10_000,
            infer_overlap: true,
            mask_spks_with_clus: true,
            overlap_infer_spk_limit: 0.05,
            ts_vad_threshold: 0.0,
            mc_late_fusion_mode: LateFusionMode::PostMean,
            hop_len_in_cs: 8,
            use_ts_vad: false,
            vad_params: VadParams::default(),
            infer_mode: "offline".to_string(),
            system_name: "diarkit".to_string(),
            get_rttm_with_the_finest_scale: true,
            verbose: true,
        }
    }
}

impl DiarizationConfig {
    /// Validate the option ranges that do not depend on session data.
    ///
    /// Scale-schedule consistency is checked separately when the schedule is
    /// built; this covers the scalar options.
    pub fn validate(&self) -> Result<(), DiarizationError> {
        if self.max_num_speakers == 0 || self.min_num_speakers == 0 {
            return Err(DiarizationError::ConfigError {
                message: "speaker count bounds must be positive".to_string(),
            });
        }
        if self.min_num_speakers > self.max_num_speakers {
            return Err(DiarizationError::ConfigError {
                message: format!(
                    "min_num_speakers {} exceeds max_num_speakers {}",
                    self.min_num_speakers, self.max_num_speakers
                ),
            });
        }
        if !(0.0..=1.0).contains(&self.vad_threshold) {
            return Err(DiarizationError::ConfigError {
                message: format!("vad_threshold {} out of [0, 1]", self.vad_threshold),
            });
        }
        if !(0.0..=1.0).contains(&self.sync_score_thres) {
            return Err(DiarizationError::ConfigError {
                message: format!("sync_score_thres {} out of [0, 1]", self.sync_score_thres),
            });
        }
        if self.max_mc_ch_num == 0 {
            return Err(DiarizationError::ConfigError {
                message: "max_mc_ch_num must be positive".to_string(),
            });
        }
        if self.hop_len_in_cs == 0 {
            return Err(DiarizationError::ConfigError {
                message: "hop_len_in_cs must be positive".to_string(),
            });
        }
        if self.clustering_scale_index >= self.window_lengths_in_sec.len() {
            return Err(DiarizationError::ConfigError {
                message: format!(
                    "clustering_scale_index {} out of range for {} scales",
                    self.clustering_scale_index,
                    self.window_lengths_in_sec.len()
                ),
            });
        }
        Ok(())
    }
}

/// Hysteresis parameters for TS-VAD smoothing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VadParams {
    /// Onset threshold for starting a speech segment
    pub onset: f64,

    /// Offset threshold for ending a speech segment
    pub offset: f64,

    /// Padding added before each detected onset, in seconds
    pub pad_onset: f64,

    /// Padding added after each detected offset, in seconds
    pub pad_offset: f64,

    /// Speech segments shorter than this are dropped, in seconds
    pub min_duration_on: f64,

    /// Non-speech gaps shorter than this are filled, in seconds
    pub min_duration_off: f64,
}

impl Default for VadParams {
    fn default() -> Self {
        Self {
            onset: 0.5,
            offset: 0.3,
            pad_onset: 0.0,
            pad_offset: 0.0,
            min_duration_on: 0.2,
            min_duration_off: 0.2,
        }
    }
}

/// Multi-channel late-fusion mode for MSDD predictions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LateFusionMode {
    /// Average predictions across channels before decoding
    PreMean,

    /// Decode each channel, then average the activation matrices
    PostMean,

    /// Decode each channel, then take the element-wise maximum
    PostMax,
}

impl std::fmt::Display for LateFusionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LateFusionMode::PreMean => write!(f, "pre_mean"),
            LateFusionMode::PostMean => write!(f, "post_mean"),
            LateFusionMode::PostMax => write!(f, "post_max"),
        }
    }
}

/// Hardware acceleration options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HardwareAcceleration {
    Auto,
    CPU,
    Metal,
    CUDA,
}

impl HardwareAcceleration {
    /// Resolve the requested device to one the current build can use.
    ///
    /// The tensor math in this crate runs on the CPU; the external clusterer
    /// and neural decoders own their own devices. Requesting an accelerator
    /// therefore falls back to CPU with a warning rather than failing.
    pub fn resolve(self) -> HardwareAcceleration {
        match self {
            HardwareAcceleration::Auto | HardwareAcceleration::CPU => HardwareAcceleration::CPU,
            other => {
                tracing::warn!(
                    "{:?} requested but not available in this build, falling back to CPU",
                    other
                );
                HardwareAcceleration::CPU
            }
        }
    }
}

/// Diarization errors
#[derive(Debug, Error)]
pub enum DiarizationError {
    #[error("Invalid configuration: {message}")]
    ConfigError { message: String },

    #[error("Manifest error: {message}")]
    ManifestError { message: String },

    #[error("Data error in session '{uniq_id}': {message}")]
    DataError { uniq_id: String, message: String },

    #[error("Clustering failed: {message}")]
    ClusteringError { message: String },

    #[error("Invariant violation in {stage}: {message}")]
    InvariantViolation { stage: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DiarizationError {
    /// Attach a session id to an error raised below the session level.
    pub fn with_session(self, uniq_id: &str) -> DiarizationError {
        match self {
            DiarizationError::DataError { uniq_id: id, message } if id.is_empty() => {
                DiarizationError::DataError {
                    uniq_id: uniq_id.to_string(),
                    message,
                }
            }
            DiarizationError::DataError { .. } => self,
            other => DiarizationError::DataError {
                uniq_id: uniq_id.to_string(),
                message: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(DiarizationConfig::default().validate().is_ok());
    }

    #[test]
    fn unknown_config_keys_are_rejected() {
        let parsed: Result<DiarizationConfig, _> =
            serde_json::from_str(r#"{"max_num_speakers": 4, "not_an_option": 1}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn speaker_bound_order_is_checked() {
        let config = DiarizationConfig {
            min_num_speakers: 5,
            max_num_speakers: 2,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn late_fusion_mode_parses_from_snake_case() {
        let mode: LateFusionMode = serde_json::from_str("\"post_max\"").unwrap();
        assert_eq!(mode, LateFusionMode::PostMax);
    }

    #[test]
    fn accelerators_fall_back_to_cpu() {
        assert_eq!(
            HardwareAcceleration::CUDA.resolve(),
            HardwareAcceleration::CPU
        );
        assert_eq!(
            HardwareAcceleration::Auto.resolve(),
            HardwareAcceleration::CPU
        );
    }
}
