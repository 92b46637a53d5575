//! diarkit: speaker diarization post-processing engine
//!
//! Converts multi-scale speaker embeddings and frame-level voice-activity
//! probabilities into time-stamped speaker labels, optionally refined by an
//! overlap-aware decoder (MSDD), and writes the result as RTTM and JSON
//! diarization segments.
//!
//! The neural models (embedding extractor, VAD, MSDD) and the spectral
//! speaker counter are external collaborators: this crate consumes their
//! output tensors and owns everything that happens afterwards, from segment
//! layout and adaptive VAD thresholding through channel selection, the
//! clustering driver with long-form refinement, overlap-aware
//! post-processing and output emission.

pub mod clustering;
pub mod embeddings;
pub mod engine;
pub mod intervals;
pub mod msdd;
pub mod online;
pub mod output;
pub mod segments;
pub mod session;
pub mod types;
pub mod vad;

pub use clustering::{
    ClusterDriver, CounterEmbeddings, CounterRequest, SessionTensors, SpeakerCounter,
};
pub use embeddings::EmbeddingTensor;
pub use engine::{BatchOutcome, DiarizationEngine, SessionFailure, SessionInputs, SessionOutput};
pub use msdd::MsddPreds;
pub use online::OnlineSegmentor;
pub use segments::ScaleSchedule;
pub use session::{SessionMap, SessionMeta, SpeakerLabel};
pub use types::{
    DiarizationConfig, DiarizationError, HardwareAcceleration, LateFusionMode, VadParams,
};
