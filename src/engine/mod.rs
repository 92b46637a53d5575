//! Diarization engine
//!
//! Coordinates the per-session pipeline (VAD masking, channel selection,
//! clustering, optional MSDD decoding, emission) and the batch loop that
//! runs sessions in parallel. Sessions share no mutable state, so each one
//! runs on its own worker; a failed session is recorded and the batch keeps
//! going.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::task::JoinSet;

use crate::clustering::{
    divide_and_conquer_refine, ClusterDriver, SessionTensors, SpeakerCounter,
};
use crate::msdd::{mixdown_preds, MsddPreds};
use crate::output::{
    diarization_output_lines, generate_cluster_labels, speaker_assignment_intervals,
    ts_vad_speaker_intervals,
};
use crate::session::{
    change_output_dir_names, labels_to_rttm_file, rttm_to_labels, write_diarized_segments,
    OutputDirs, SessionMap, SessionMeta, SpeakerLabel,
};
use crate::types::{DiarizationConfig, DiarizationError, HardwareAcceleration};

/// Default maximum number of speakers speaking at once.
pub const DEFAULT_MAX_OVERLAP_COUNT: usize = 2;

/// Everything the external models produced for one session.
#[derive(Debug, Clone)]
pub struct SessionInputs {
    pub tensors: SessionTensors,

    /// Overlap-decoder output; `None` runs the clustering-only path.
    pub msdd_preds: Option<MsddPreds>,
}

/// Result of one successfully diarized session.
#[derive(Debug, Clone)]
pub struct SessionOutput {
    pub uniq_id: String,

    /// Final speaker turns, sorted by start time.
    pub labels: Vec<SpeakerLabel>,

    /// Raw per-segment lines from the clustering path, empty when the MSDD
    /// decoder produced the output.
    pub raw_segment_lines: Vec<SpeakerLabel>,

    /// Reference labels from the session RTTM, when one exists.
    pub reference: Option<Vec<SpeakerLabel>>,

    pub num_speakers: usize,
    pub rttm_path: Option<PathBuf>,
    pub json_path: Option<PathBuf>,
}

/// Failure record for one session; the batch continues past it.
#[derive(Debug, Clone)]
pub struct SessionFailure {
    pub uniq_id: String,
    pub error: String,
}

/// Outcome of a batch run.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub outputs: Vec<SessionOutput>,
    pub failures: Vec<SessionFailure>,
}

/// Main diarization engine.
///
/// Holds the validated configuration, the scale schedule and the external
/// speaker counter. Cloning is cheap; clones share the counter.
///
/// # Examples
///
/// ```ignore
/// let engine = DiarizationEngine::new(config, counter, HardwareAcceleration::Auto)?;
/// let output = engine.diarize_session("sess", &meta, inputs, None, 0.7)?;
/// println!("{} speakers", output.num_speakers);
/// ```
#[derive(Clone)]
pub struct DiarizationEngine {
    config: Arc<DiarizationConfig>,
    schedule: Arc<crate::segments::ScaleSchedule>,
    counter: Arc<dyn SpeakerCounter>,
    device: HardwareAcceleration,
}

impl DiarizationEngine {
    /// Create an engine after validating the configuration.
    ///
    /// Configuration errors abort here, before any session work starts.
    pub fn new(
        config: DiarizationConfig,
        counter: Arc<dyn SpeakerCounter>,
        device: HardwareAcceleration,
    ) -> Result<Self, DiarizationError> {
        config.validate()?;
        let schedule = crate::segments::ScaleSchedule::new(
            config.window_lengths_in_sec.clone(),
            config.shift_lengths_in_sec.clone(),
            config.multiscale_weights.clone(),
        )?;
        let device = device.resolve();
        tracing::info!(
            "Initializing DiarizationEngine: {} scales, infer_mode {}, device {:?}",
            schedule.num_scales(),
            config.infer_mode,
            device
        );
        Ok(Self {
            config: Arc::new(config),
            schedule: Arc::new(schedule),
            counter,
            device,
        })
    }

    pub fn config(&self) -> &DiarizationConfig {
        &self.config
    }

    pub fn device(&self) -> HardwareAcceleration {
        self.device
    }

    /// Run the full pipeline for one session.
    ///
    /// `threshold` is the sigmoid threshold applied to the MSDD output;
    /// `dirs`, when given, receives the RTTM and JSON files.
    pub fn diarize_session(
        &self,
        uniq_id: &str,
        meta: &SessionMeta,
        inputs: &SessionInputs,
        dirs: Option<&OutputDirs>,
        threshold: f64,
    ) -> Result<SessionOutput, DiarizationError> {
        let config = &*self.config;
        let driver = ClusterDriver::new(config, self.schedule.as_ref());
        let mut outcome = driver.cluster_session(
            uniq_id,
            meta.num_speakers,
            &inputs.tensors,
            self.counter.as_ref(),
        )?;

        if outcome.long_form && config.unit_clus_len > 0 {
            outcome.labels_finest = divide_and_conquer_refine(
                self.counter.as_ref(),
                &inputs.tensors.embeddings,
                &outcome.labels_finest,
                outcome.effective_scale_idx,
                config,
            )?;
            if config.get_rttm_with_the_finest_scale {
                let (ranges, labels) =
                    self.finest_scale_outputs(&inputs.tensors, &outcome.labels_finest);
                outcome.output_ranges = ranges;
                outcome.output_labels = labels;
            }
        }

        let offset = meta.offset.unwrap_or(0.0);
        let (labels, raw_segment_lines) = match &inputs.msdd_preds {
            Some(preds) => {
                let assign = mixdown_preds(
                    &outcome.labels_finest,
                    preds,
                    threshold,
                    DEFAULT_MAX_OVERLAP_COUNT,
                    config,
                )
                .map_err(|e| e.with_session(uniq_id))?;
                let per_speaker = if config.use_ts_vad {
                    ts_vad_speaker_intervals(
                        assign.view(),
                        &config.vad_params,
                        config.hop_len_in_cs,
                        offset,
                    )
                } else {
                    let timestamps = self.finest_timestamps_sec(&inputs.tensors);
                    speaker_assignment_intervals(assign.view(), &timestamps)?
                };
                (diarization_output_lines(&per_speaker)?, Vec::new())
            }
            None => generate_cluster_labels(&outcome.output_ranges, &outcome.output_labels),
        };

        let reference = match meta.rttm_filepath.as_deref() {
            Some(path) => match rttm_to_labels(std::path::Path::new(path)) {
                Ok(labels) => Some(labels),
                Err(_) => {
                    tracing::warn!(
                        "{uniq_id}: reference RTTM {path} is unavailable, scoring disabled"
                    );
                    None
                }
            },
            None => None,
        };

        // Writes happen last so an aborted session leaves no partial files.
        let (rttm_path, json_path) = match dirs {
            Some(dirs) => {
                let rttm = labels_to_rttm_file(&labels, uniq_id, &dirs.rttm_dir)?;
                let json = write_diarized_segments(&labels, uniq_id, meta, &dirs.json_dir)?;
                (Some(rttm), Some(json))
            }
            None => (None, None),
        };

        tracing::info!(
            "{uniq_id}: diarized {} speaker turns, {} speakers",
            labels.len(),
            outcome.num_speakers
        );
        Ok(SessionOutput {
            uniq_id: uniq_id.to_string(),
            labels,
            raw_segment_lines,
            reference,
            num_speakers: outcome.num_speakers,
            rttm_path,
            json_path,
        })
    }

    /// Diarize every session of a batch in parallel worker tasks.
    ///
    /// Sessions missing from `inputs` and sessions that fail are recorded as
    /// failures; the batch always runs to completion. When `out_dir` is
    /// given, output directories are derived from the system name and the
    /// threshold.
    pub async fn run_batch(
        &self,
        sessions: &SessionMap,
        mut inputs: HashMap<String, SessionInputs>,
        out_dir: Option<&std::path::Path>,
        threshold: f64,
    ) -> Result<BatchOutcome, DiarizationError> {
        let dirs = match out_dir {
            Some(head) => Some(change_output_dir_names(
                head,
                &self.config.system_name,
                threshold,
                self.config.verbose,
            )?),
            None => None,
        };
        tracing::info!(
            "Generating RTTM with infer_mode: {} for {} sessions",
            self.config.infer_mode,
            sessions.len()
        );

        let mut join_set: JoinSet<Result<SessionOutput, SessionFailure>> = JoinSet::new();
        let mut outcome = BatchOutcome::default();
        for (uniq_id, meta) in sessions.iter() {
            let Some(session_inputs) = inputs.remove(uniq_id) else {
                outcome.failures.push(SessionFailure {
                    uniq_id: uniq_id.to_string(),
                    error: "no model outputs provided for session".to_string(),
                });
                continue;
            };
            let engine = self.clone();
            let uniq_id = uniq_id.to_string();
            let meta = meta.clone();
            let dirs = dirs.clone();
            join_set.spawn_blocking(move || {
                engine
                    .diarize_session(&uniq_id, &meta, &session_inputs, dirs.as_ref(), threshold)
                    .map_err(|e| SessionFailure {
                        uniq_id: uniq_id.clone(),
                        error: e.to_string(),
                    })
                // session_inputs drops here, releasing the tensors before
                // the next session is scheduled on this worker
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(Ok(output)) => outcome.outputs.push(output),
                Ok(Err(failure)) => {
                    tracing::warn!("session {} failed: {}", failure.uniq_id, failure.error);
                    outcome.failures.push(failure);
                }
                Err(join_error) => outcome.failures.push(SessionFailure {
                    uniq_id: String::new(),
                    error: format!("session worker panicked: {join_error}"),
                }),
            }
        }

        // Deterministic output order regardless of completion order.
        let order: HashMap<&str, usize> = sessions
            .uniq_ids()
            .enumerate()
            .map(|(idx, id)| (id, idx))
            .collect();
        outcome
            .outputs
            .sort_by_key(|out| order.get(out.uniq_id.as_str()).copied().unwrap_or(usize::MAX));
        Ok(outcome)
    }

    fn finest_timestamps_sec(&self, tensors: &SessionTensors) -> Vec<[f64; 2]> {
        let finest_idx = self.schedule.num_scales() - 1;
        let feat_per_sec = self.config.feat_per_sec as f64;
        let t_fine = tensors.timestamps.dim().1;
        (0..t_fine)
            .map(|tdx| {
                [
                    tensors.timestamps[[finest_idx, tdx, 0]] as f64 / feat_per_sec,
                    tensors.timestamps[[finest_idx, tdx, 1]] as f64 / feat_per_sec,
                ]
            })
            .collect()
    }

    fn finest_scale_outputs(
        &self,
        tensors: &SessionTensors,
        labels_finest: &[i64],
    ) -> (Vec<[f64; 2]>, Vec<i64>) {
        let timestamps = self.finest_timestamps_sec(tensors);
        let mut ranges = Vec::new();
        let mut labels = Vec::new();
        for (tdx, label) in labels_finest.iter().enumerate() {
            if *label != -1 {
                ranges.push(timestamps[tdx]);
                labels.push(*label);
            }
        }
        (ranges, labels)
    }
}
