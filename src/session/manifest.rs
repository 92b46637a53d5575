//! Manifest loading and VAD validation
//!
//! Manifests are JSON-lines files; each line describes one session. The
//! loader builds the session directory used by every later stage.

use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::segments::{get_subsegments, speech_ranges_for_session};
use crate::types::DiarizationError;

use super::rttm::{read_rttm_lines, vad_range_from_line};
use super::types::{SessionMap, SessionMeta};

/// Base name of a file path without its extension.
pub fn uniq_name_from_filepath(filepath: &str) -> String {
    Path::new(filepath)
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| filepath.to_string())
}

/// `uniq_id` with the session window attached: `<id>_<start_ms>_<end_ms>`.
///
/// Used when one recording is split into several sessions so their outputs
/// do not collide. Falls back to the bare id when no window is set.
fn uniq_id_with_dur(meta: &SessionMeta) -> String {
    let bare = meta
        .rttm_filepath
        .as_deref()
        .map(uniq_name_from_filepath)
        .unwrap_or_else(|| uniq_name_from_filepath(&meta.audio_filepath));
    match (meta.offset, meta.duration) {
        (None, None) => bare,
        (offset, duration) => {
            let start = offset.unwrap_or(0.0);
            let start_ms = (start * 1000.0).round() as i64;
            let end = match duration {
                Some(dur) => format!("{}", ((start + dur) * 1000.0).round() as i64),
                None => "NULL".to_string(),
            };
            format!("{bare}_{start_ms}_{end}")
        }
    }
}

/// Resolve the `uniq_id` for a manifest line.
pub fn uniq_id_for_meta(meta: &SessionMeta, attach_dur: bool) -> String {
    if attach_dur {
        return uniq_id_with_dur(meta);
    }
    meta.uniq_id
        .clone()
        .unwrap_or_else(|| uniq_name_from_filepath(&meta.audio_filepath))
}

/// Load a manifest file into a [`SessionMap`].
///
/// Every line must be a JSON object with at least `audio_filepath`. The
/// `uniq_id` falls back to the audio filename stem; a duplicate `uniq_id`
/// is a fatal manifest error.
pub fn audio_rttm_map(
    manifest_path: &Path,
    attach_dur: bool,
) -> Result<SessionMap, DiarizationError> {
    let contents = fs::read_to_string(manifest_path)?;
    let mut map = SessionMap::default();
    for (line_no, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let meta: SessionMeta =
            serde_json::from_str(line).map_err(|e| DiarizationError::ManifestError {
                message: format!(
                    "invalid manifest line {} in {}: {e}",
                    line_no + 1,
                    manifest_path.display()
                ),
            })?;
        let uniq_id = uniq_id_for_meta(&meta, attach_dur);
        if !map.insert(uniq_id.clone(), meta) {
            return Err(DiarizationError::ManifestError {
                message: format!("duplicate uniq_id '{uniq_id}'; session names must be unique"),
            });
        }
    }
    tracing::info!(
        "Loaded {} sessions from {}",
        map.len(),
        manifest_path.display()
    );
    Ok(map)
}

/// One speech-segment record of the oracle-VAD manifest.
///
/// These records feed the external embedding extractor; the label is always
/// `UNK` because speaker identities are unknown before clustering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechSegmentRecord {
    pub audio_filepath: String,
    pub offset: f64,
    pub duration: f64,
    pub label: String,
    pub uniq_id: String,
}

/// Write the oracle-VAD segments manifest for every session.
///
/// Each session's RTTM (or VAD table) is parsed, merged and clipped to the
/// session window; one JSON line is written per speech range. Sessions
/// without a usable duration fall back to the extent of their VAD output.
/// Returns the ids of sessions that produced at least one speech segment,
/// ready for [`validate_vad_sessions`].
pub fn write_oracle_vad_manifest(
    map: &SessionMap,
    manifest_path: &Path,
) -> Result<HashSet<String>, DiarizationError> {
    let mut out = fs::File::create(manifest_path)?;
    let mut speech_ids = HashSet::new();
    for (uniq_id, meta) in map.iter() {
        let rttm_path = meta.rttm_filepath.as_deref().ok_or_else(|| {
            DiarizationError::ManifestError {
                message: format!("session '{uniq_id}' has no rttm_filepath for oracle VAD"),
            }
        })?;
        let vad_ranges = read_rttm_lines(Path::new(rttm_path))?
            .iter()
            .filter(|line| !line.trim().is_empty())
            .map(|line| vad_range_from_line(line))
            .collect::<Result<Vec<_>, _>>()?;

        let offset = meta.offset.unwrap_or(0.0);
        let duration = match meta.duration {
            Some(duration) => duration,
            None => vad_ranges
                .iter()
                .fold(0f64, |acc, r| acc.max(r[1]))
                - offset,
        };
        let ranges = speech_ranges_for_session(&vad_ranges, offset, duration)?;
        if ranges.is_empty() {
            tracing::warn!("{uniq_id}: the VAD label does not contain any speech segments");
            continue;
        }
        for range in &ranges {
            let record = SpeechSegmentRecord {
                audio_filepath: meta.audio_filepath.clone(),
                offset: range[0],
                duration: range[1] - range[0],
                label: "UNK".to_string(),
                uniq_id: uniq_id.to_string(),
            };
            serde_json::to_writer(&mut out, &record)?;
            writeln!(out)?;
        }
        speech_ids.insert(uniq_id.to_string());
    }
    Ok(speech_ids)
}

/// Expand a segments manifest into subsegment records for one scale.
pub fn subsegment_records(
    segments: &[SpeechSegmentRecord],
    window: f64,
    shift: f64,
    min_subsegment_duration: f64,
) -> Vec<SpeechSegmentRecord> {
    let mut records = Vec::new();
    for segment in segments {
        for (start, dur) in get_subsegments(
            segment.offset,
            window,
            shift,
            segment.duration,
            min_subsegment_duration,
        ) {
            if dur > min_subsegment_duration {
                records.push(SpeechSegmentRecord {
                    audio_filepath: segment.audio_filepath.clone(),
                    offset: start,
                    duration: dur,
                    label: segment.label.clone(),
                    uniq_id: segment.uniq_id.clone(),
                });
            }
        }
    }
    records
}

/// Drop sessions that contain no speech from the session directory.
///
/// `speech_uniq_ids` holds the ids of sessions with at least one
/// positive-duration speech segment. Silent sessions are removed with a
/// warning; an entirely silent batch is fatal.
pub fn validate_vad_sessions(
    map: &mut SessionMap,
    speech_uniq_ids: &HashSet<String>,
) -> Result<(), DiarizationError> {
    let silent: Vec<String> = map
        .uniq_ids()
        .filter(|id| !speech_uniq_ids.contains(*id))
        .map(|id| id.to_string())
        .collect();
    for uniq_id in &silent {
        map.remove(uniq_id);
        tracing::warn!(
            "{uniq_id} is ignored since the file does not contain any speech signal to be processed"
        );
    }
    if map.is_empty() {
        return Err(DiarizationError::ManifestError {
            message: "all sessions in the manifest contain silence".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_manifest(lines: &[&str]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
        file
    }

    #[test]
    fn uniq_id_falls_back_to_filename_stem() {
        let file = write_manifest(&[r#"{"audio_filepath": "/data/session_a.wav"}"#]);
        let map = audio_rttm_map(file.path(), false).unwrap();
        assert!(map.get("session_a").is_some());
    }

    #[test]
    fn explicit_uniq_id_wins() {
        let file =
            write_manifest(&[r#"{"audio_filepath": "/data/a.wav", "uniq_id": "meeting_01"}"#]);
        let map = audio_rttm_map(file.path(), false).unwrap();
        assert!(map.get("meeting_01").is_some());
        assert!(map.get("a").is_none());
    }

    #[test]
    fn duplicate_uniq_id_is_fatal() {
        let file = write_manifest(&[
            r#"{"audio_filepath": "/data/a.wav"}"#,
            r#"{"audio_filepath": "/other/a.wav"}"#,
        ]);
        assert!(audio_rttm_map(file.path(), false).is_err());
    }

    #[test]
    fn attach_dur_appends_session_window() {
        let file = write_manifest(&[
            r#"{"audio_filepath": "/data/a.wav", "rttm_filepath": "/ref/a.rttm", "offset": 1.5, "duration": 10.0}"#,
        ]);
        let map = audio_rttm_map(file.path(), true).unwrap();
        assert!(map.get("a_1500_11500").is_some());
    }

    #[test]
    fn oracle_vad_manifest_merges_and_clips_ranges() {
        let dir = tempfile::tempdir().unwrap();
        let rttm_path = dir.path().join("a.rttm");
        std::fs::write(
            &rttm_path,
            "SPEAKER a 1 0.0 2.0 <NA> <NA> x <NA> <NA>\n\
             SPEAKER a 1 1.5 2.0 <NA> <NA> y <NA> <NA>\n",
        )
        .unwrap();
        let file = write_manifest(&[&format!(
            r#"{{"audio_filepath": "/data/a.wav", "rttm_filepath": "{}", "offset": 0.0, "duration": 3.0}}"#,
            rttm_path.display()
        )]);
        let map = audio_rttm_map(file.path(), false).unwrap();

        let manifest_path = dir.path().join("oracle_vad.json");
        let speech_ids = write_oracle_vad_manifest(&map, &manifest_path).unwrap();
        assert!(speech_ids.contains("a"));

        let contents = std::fs::read_to_string(&manifest_path).unwrap();
        let records: Vec<SpeechSegmentRecord> = contents
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        // The two turns merge to [0, 3.5] and clip to the 3 s session.
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].offset, 0.0);
        assert_eq!(records[0].duration, 3.0);
        assert_eq!(records[0].label, "UNK");

        let subsegments = subsegment_records(&records, 1.5, 0.75, 0.05);
        assert_eq!(subsegments[0].offset, 0.0);
        assert!(subsegments.iter().all(|r| r.duration > 0.05));
    }

    #[test]
    fn silent_sessions_are_dropped_and_all_silent_is_fatal() {
        let file = write_manifest(&[
            r#"{"audio_filepath": "/data/a.wav"}"#,
            r#"{"audio_filepath": "/data/b.wav"}"#,
        ]);
        let mut map = audio_rttm_map(file.path(), false).unwrap();
        let speech: HashSet<String> = ["a".to_string()].into_iter().collect();
        validate_vad_sessions(&mut map, &speech).unwrap();
        assert_eq!(map.len(), 1);
        assert!(map.get("b").is_none());

        let empty = HashSet::new();
        assert!(validate_vad_sessions(&mut map, &empty).is_err());
    }
}
