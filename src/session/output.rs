//! Output directory layout and diarized-JSON emission

use std::fs;
use std::path::{Path, PathBuf};

use crate::types::DiarizationError;

use super::types::{DiarizedSegment, SessionMeta, SpeakerLabel};

/// Output directories for one run: RTTM and JSON, keyed by threshold.
#[derive(Debug, Clone)]
pub struct OutputDirs {
    pub rttm_dir: PathBuf,
    pub json_dir: PathBuf,
}

/// Build the output directory layout for a threshold sweep.
///
/// Produces `<head>/<system_name>/pred_rttms_T<θ>` and
/// `<head>/<system_name>/pred_jsons_T<θ>` with the threshold printed to two
/// decimals. With `verbose` off the threshold suffix collapses to a bare
/// `T`. Both directories are created.
pub fn change_output_dir_names(
    head: &Path,
    system_name: &str,
    threshold: f64,
    verbose: bool,
) -> Result<OutputDirs, DiarizationError> {
    let suffix = if verbose {
        format!("{threshold:.2}")
    } else {
        String::new()
    };
    let system_dir = head.join(system_name);
    let rttm_dir = system_dir.join(format!("pred_rttms_T{suffix}"));
    let json_dir = system_dir.join(format!("pred_jsons_T{suffix}"));
    fs::create_dir_all(&rttm_dir)?;
    fs::create_dir_all(&json_dir)?;
    Ok(OutputDirs { rttm_dir, json_dir })
}

/// Convert diarized labels to JSON records for one session.
pub fn diarized_segments(labels: &[SpeakerLabel], meta: &SessionMeta) -> Vec<DiarizedSegment> {
    labels
        .iter()
        .map(|label| DiarizedSegment {
            start_time: label.start,
            end_time: label.end,
            offset: label.start,
            duration: ((label.end - label.start) * 100.0).round() / 100.0,
            speaker: label.speaker.clone(),
            audio_filepath: meta.audio_filepath.clone(),
            words: None,
            text: None,
        })
        .collect()
}

/// Write one session's diarized segments to `<out_json_dir>/<uniq_id>.json`
/// as a JSON array.
pub fn write_diarized_segments(
    labels: &[SpeakerLabel],
    uniq_id: &str,
    meta: &SessionMeta,
    out_json_dir: &Path,
) -> Result<PathBuf, DiarizationError> {
    let records = diarized_segments(labels, meta);
    let path = out_json_dir.join(format!("{uniq_id}.json"));
    let file = fs::File::create(&path)?;
    serde_json::to_writer_pretty(file, &records)?;
    Ok(path)
}
