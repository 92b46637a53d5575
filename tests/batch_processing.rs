//! Batch processing and manifest round-trips
//!
//! Covers the manifest to oracle-VAD segment path and the batch loop's
//! failure isolation: one bad session must not stop the others.

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;

use ndarray::{Array1, Array2, Array3};

use diarkit::clustering::{CounterRequest, SessionTensors, SpeakerCounter};
use diarkit::segments::{
    scale_mapping_argmat, speech_ranges_for_session, subsegments_for_schedule, ScaleSchedule,
};
use diarkit::session::{audio_rttm_map, rttm::read_rttm_lines, rttm::vad_range_from_line};
use diarkit::types::DiarizationError;
use diarkit::{
    DiarizationConfig, DiarizationEngine, EmbeddingTensor, HardwareAcceleration, MsddPreds,
    SessionInputs,
};

struct SingleSpeakerCounter;

impl SpeakerCounter for SingleSpeakerCounter {
    fn cluster(&self, request: CounterRequest) -> Result<Vec<i64>, DiarizationError> {
        Ok(vec![0; request.embeddings.num_rows()])
    }
}

fn single_scale_inputs(t_fine: usize, msdd_preds: Option<MsddPreds>) -> SessionInputs {
    let timestamps = Array3::from_shape_fn((1, t_fine, 2), |(_, t, j)| ((t + j) * 100) as f32);
    SessionInputs {
        tensors: SessionTensors {
            embeddings: EmbeddingTensor::SingleChannel(Array3::from_elem((t_fine, 1, 8), 0.5)),
            timestamps,
            scale_map: Array2::from_shape_fn((1, t_fine), |(_, t)| t),
            vad_probs: Array1::from_elem(t_fine, 0.9),
        },
        msdd_preds,
    }
}

#[test]
fn oracle_vad_manifest_feeds_segmentation() {
    let dir = tempfile::tempdir().unwrap();

    let rttm_path = dir.path().join("sess.rttm");
    let mut rttm = std::fs::File::create(&rttm_path).unwrap();
    writeln!(rttm, "SPEAKER sess 1 0.50 2.00 <NA> <NA> alice <NA> <NA>").unwrap();
    writeln!(rttm, "SPEAKER sess 1 2.00 1.50 <NA> <NA> bob <NA> <NA>").unwrap();
    writeln!(rttm, "SPEAKER sess 1 8.00 2.00 <NA> <NA> alice <NA> <NA>").unwrap();

    let manifest_path = dir.path().join("manifest.json");
    let mut manifest = std::fs::File::create(&manifest_path).unwrap();
    writeln!(
        manifest,
        r#"{{"audio_filepath": "/data/sess.wav", "rttm_filepath": "{}", "offset": 0.0, "duration": 9.0}}"#,
        rttm_path.display()
    )
    .unwrap();

    let sessions = audio_rttm_map(&manifest_path, false).unwrap();
    let meta = sessions.get("sess").unwrap();

    let vad_ranges: Vec<[f64; 2]> = read_rttm_lines(std::path::Path::new(
        meta.rttm_filepath.as_deref().unwrap(),
    ))
    .unwrap()
    .iter()
    .map(|line| vad_range_from_line(line).unwrap())
    .collect();

    let speech = speech_ranges_for_session(
        &vad_ranges,
        meta.offset.unwrap_or(0.0),
        meta.duration.unwrap_or(0.0),
    )
    .unwrap();
    // The two touching turns merge; the final turn is clipped to 9 s.
    assert_eq!(speech, vec![[0.5, 3.5], [8.0, 9.0]]);

    let schedule =
        ScaleSchedule::new(vec![1.5, 0.5], vec![0.75, 0.25], vec![1.0, 1.0]).unwrap();
    let per_scale = subsegments_for_schedule(&speech, &schedule, 0.03);
    assert_eq!(per_scale.len(), 2);
    assert!(per_scale[1].len() > per_scale[0].len());
    for subs in &per_scale {
        assert!(subs.iter().all(|(_, dur)| *dur > 0.0));
    }

    let ranges_per_scale: Vec<Vec<[f64; 2]>> = per_scale
        .iter()
        .map(|subs| subs.iter().map(|(s, d)| [*s, *s + *d]).collect())
        .collect();
    let scale_map = scale_mapping_argmat(&ranges_per_scale).unwrap();
    assert_eq!(scale_map.dim().0, 2);
    assert_eq!(scale_map.dim().1, ranges_per_scale[1].len());
    for t in 0..scale_map.dim().1 {
        assert_eq!(scale_map[[1, t]], t);
        assert!(scale_map[[0, t]] < ranges_per_scale[0].len());
    }
}

#[tokio::test]
async fn batch_records_failures_and_keeps_going() {
    let dir = tempfile::tempdir().unwrap();
    let manifest_path = dir.path().join("manifest.json");
    let mut manifest = std::fs::File::create(&manifest_path).unwrap();
    writeln!(manifest, r#"{{"audio_filepath": "/data/good.wav"}}"#).unwrap();
    writeln!(manifest, r#"{{"audio_filepath": "/data/bad.wav"}}"#).unwrap();
    writeln!(manifest, r#"{{"audio_filepath": "/data/missing.wav"}}"#).unwrap();
    let sessions = audio_rttm_map(&manifest_path, false).unwrap();

    let config = DiarizationConfig {
        window_lengths_in_sec: vec![1.5],
        shift_lengths_in_sec: vec![0.75],
        multiscale_weights: vec![1.0],
        clustering_scale_index: 0,
        ..Default::default()
    };
    let engine = DiarizationEngine::new(
        config,
        Arc::new(SingleSpeakerCounter),
        HardwareAcceleration::Auto,
    )
    .unwrap();

    let mut inputs = HashMap::new();
    inputs.insert("good".to_string(), single_scale_inputs(8, None));
    // NaN decoder output makes this session fail.
    let mut nan_preds = Array2::<f32>::from_elem((8, 2), 0.5);
    nan_preds[[3, 1]] = f32::NAN;
    inputs.insert(
        "bad".to_string(),
        single_scale_inputs(8, Some(MsddPreds::Single(nan_preds))),
    );

    let outcome = engine
        .run_batch(&sessions, inputs, None, 0.7)
        .await
        .unwrap();

    assert_eq!(outcome.outputs.len(), 1);
    assert_eq!(outcome.outputs[0].uniq_id, "good");
    assert_eq!(outcome.outputs[0].num_speakers, 1);

    assert_eq!(outcome.failures.len(), 2);
    let failed: Vec<&str> = outcome
        .failures
        .iter()
        .map(|f| f.uniq_id.as_str())
        .collect();
    assert!(failed.contains(&"bad"));
    assert!(failed.contains(&"missing"));
}

#[tokio::test]
async fn duplicate_sessions_abort_before_any_work() {
    let dir = tempfile::tempdir().unwrap();
    let manifest_path = dir.path().join("manifest.json");
    let mut manifest = std::fs::File::create(&manifest_path).unwrap();
    writeln!(manifest, r#"{{"audio_filepath": "/data/a.wav"}}"#).unwrap();
    writeln!(manifest, r#"{{"audio_filepath": "/other/a.wav"}}"#).unwrap();
    assert!(audio_rttm_map(&manifest_path, false).is_err());
}
