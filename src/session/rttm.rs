//! NIST RTTM reading and writing
//!
//! Reader takes fields 3 (start), 4 (duration) and 7 (speaker); the writer
//! emits the 10-field SPEAKER line with 3-decimal timestamps and channel
//! fixed to 1.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::types::DiarizationError;

use super::types::SpeakerLabel;

fn round3(x: f64) -> f64 {
    (x * 1000.0).round() / 1000.0
}

/// Parse one RTTM line into `(start, end, speaker)`.
pub fn convert_rttm_line(line: &str) -> Result<(f64, f64, String), DiarizationError> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 8 {
        return Err(DiarizationError::ManifestError {
            message: format!("RTTM line has {} fields, expected at least 8", fields.len()),
        });
    }
    let start: f64 = fields[3]
        .parse()
        .map_err(|_| DiarizationError::ManifestError {
            message: format!("invalid RTTM start field '{}'", fields[3]),
        })?;
    let dur: f64 = fields[4]
        .parse()
        .map_err(|_| DiarizationError::ManifestError {
            message: format!("invalid RTTM duration field '{}'", fields[4]),
        })?;
    let start = round3(start);
    let end = round3(start + round3(dur));
    Ok((start, end, fields[7].to_string()))
}

/// Extract a `[start, end]` VAD range from an RTTM or VAD-table line.
///
/// Full RTTM lines use fields 3 and 4; short three-field VAD tables use
/// fields 0 and 1.
pub fn vad_range_from_line(line: &str) -> Result<[f64; 2], DiarizationError> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    let (start_field, dur_field) = if fields.len() > 3 {
        (fields[3], fields[4])
    } else if fields.len() == 3 {
        (fields[0], fields[1])
    } else {
        return Err(DiarizationError::ManifestError {
            message: format!("VAD line has {} fields, expected 3 or more", fields.len()),
        });
    };
    let start: f64 = start_field
        .parse()
        .map_err(|_| DiarizationError::ManifestError {
            message: format!("invalid VAD start field '{start_field}'"),
        })?;
    let dur: f64 = dur_field
        .parse()
        .map_err(|_| DiarizationError::ManifestError {
            message: format!("invalid VAD duration field '{dur_field}'"),
        })?;
    Ok([start, start + dur])
}

/// Read all lines of an RTTM file.
pub fn read_rttm_lines(rttm_path: &Path) -> Result<Vec<String>, DiarizationError> {
    if !rttm_path.exists() {
        return Err(DiarizationError::ManifestError {
            message: format!("RTTM file not found: {}", rttm_path.display()),
        });
    }
    let contents = fs::read_to_string(rttm_path)?;
    Ok(contents.lines().map(|l| l.to_string()).collect())
}

/// Read an RTTM file into speaker labels.
pub fn rttm_to_labels(rttm_path: &Path) -> Result<Vec<SpeakerLabel>, DiarizationError> {
    read_rttm_lines(rttm_path)?
        .iter()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            convert_rttm_line(line).map(|(start, end, speaker)| SpeakerLabel::new(start, end, speaker))
        })
        .collect()
}

/// Format one RTTM SPEAKER line.
pub fn format_rttm_line(uniq_id: &str, label: &SpeakerLabel) -> String {
    format!(
        "SPEAKER {} 1   {:.3}   {:.3} <NA> <NA> {} <NA> <NA>",
        uniq_id,
        label.start,
        label.end - label.start,
        label.speaker
    )
}

/// Write labels to `<out_rttm_dir>/<uniq_id>.rttm`.
pub fn labels_to_rttm_file(
    labels: &[SpeakerLabel],
    uniq_id: &str,
    out_rttm_dir: &Path,
) -> Result<PathBuf, DiarizationError> {
    let path = out_rttm_dir.join(format!("{uniq_id}.rttm"));
    let mut file = fs::File::create(&path)?;
    for label in labels {
        writeln!(file, "{}", format_rttm_line(uniq_id, label))?;
    }
    Ok(path)
}

/// Dump raw base-scale cluster labels next to the RTTM output.
///
/// One line per segment: `<uniq_id> <start> <end> <speaker>`.
pub fn write_cluster_labels(
    base_scale_idx: usize,
    lines: &[(String, SpeakerLabel)],
    out_dir: &Path,
) -> Result<PathBuf, DiarizationError> {
    let path = out_dir.join(format!("subsegments_scale{base_scale_idx}_cluster.label"));
    let mut file = fs::File::create(&path)?;
    for (uniq_id, label) in lines {
        writeln!(
            file,
            "{uniq_id} {} {} {}",
            label.start, label.end, label.speaker
        )?;
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn rttm_line_roundtrip() {
        let label = SpeakerLabel::new(0.0, 5.0, "speaker_0");
        let line = format_rttm_line("s", &label);
        assert_eq!(line, "SPEAKER s 1   0.000   5.000 <NA> <NA> speaker_0 <NA> <NA>");
        let (start, end, speaker) = convert_rttm_line(&line).unwrap();
        assert_eq!(start, 0.0);
        assert_eq!(end, 5.0);
        assert_eq!(speaker, "speaker_0");
    }

    #[test]
    fn vad_range_handles_both_line_shapes() {
        let full = "SPEAKER s 1 1.500 2.250 <NA> <NA> speaker_1 <NA> <NA>";
        assert_eq!(vad_range_from_line(full).unwrap(), [1.5, 3.75]);
        let short = "4.0 1.5 speech";
        assert_eq!(vad_range_from_line(short).unwrap(), [4.0, 5.5]);
    }

    #[test]
    fn labels_write_and_read_back() {
        let dir = tempdir().unwrap();
        let labels = vec![
            SpeakerLabel::new(0.0, 1.25, "speaker_0"),
            SpeakerLabel::new(1.25, 3.5, "speaker_1"),
        ];
        let path = labels_to_rttm_file(&labels, "sess", dir.path()).unwrap();
        let parsed = rttm_to_labels(&path).unwrap();
        assert_eq!(parsed, labels);
    }

    #[test]
    fn missing_rttm_is_reported() {
        assert!(read_rttm_lines(Path::new("/nonexistent/x.rttm")).is_err());
    }
}
