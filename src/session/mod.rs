//! Session metadata, manifest loading and diarization file formats

pub mod manifest;
pub mod output;
pub mod rttm;
pub mod types;

pub use manifest::{
    audio_rttm_map, subsegment_records, uniq_name_from_filepath, validate_vad_sessions,
    write_oracle_vad_manifest, SpeechSegmentRecord,
};
pub use output::{change_output_dir_names, write_diarized_segments, OutputDirs};
pub use rttm::{labels_to_rttm_file, rttm_to_labels};
pub use types::{DiarizedSegment, SessionMap, SessionMeta, SpeakerLabel};
