//! Seam to the external speaker counter / spectral clusterer
//!
//! The eigen-decomposition based speaker counter is an external collaborator;
//! this crate only prepares its inputs and consumes its label output.

use ndarray::{Array2, Array3};

use crate::types::DiarizationError;

/// Embeddings handed to the counter, after VAD masking and scale collapse.
#[derive(Debug, Clone)]
pub enum CounterEmbeddings {
    /// `[N, D]`
    Mono(Array2<f32>),

    /// `[N, D, C]` with the selected channels kept
    MultiChannel(Array3<f32>),
}

impl CounterEmbeddings {
    pub fn num_rows(&self) -> usize {
        match self {
            CounterEmbeddings::Mono(e) => e.dim().0,
            CounterEmbeddings::MultiChannel(e) => e.dim().0,
        }
    }
}

/// One clustering request.
#[derive(Debug, Clone)]
pub struct CounterRequest {
    pub embeddings: CounterEmbeddings,

    /// Known speaker count, or -1 to estimate
    pub oracle_num_speakers: i64,

    pub max_num_speakers: usize,
    pub min_num_speakers: usize,
    pub max_rp_threshold: f64,
    pub sparse_search_volume: usize,
    pub drop_length_thres: usize,
    pub reclus_aff_thres: f64,
    pub use_drop_and_recluster: bool,
}

/// External speaker counter and clusterer.
///
/// Implementations must return one non-negative label per embedding row.
pub trait SpeakerCounter: Send + Sync {
    fn cluster(&self, request: CounterRequest) -> Result<Vec<i64>, DiarizationError>;
}
