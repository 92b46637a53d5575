//! Session descriptor types

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// One manifest line: everything known about a session up front.
///
/// Only `audio_filepath` is required; the rest is optional metadata. Extra
/// keys in a manifest line are ignored so manifests produced by other tools
/// keep loading.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMeta {
    pub audio_filepath: String,

    #[serde(default)]
    pub rttm_filepath: Option<String>,

    #[serde(default)]
    pub offset: Option<f64>,

    #[serde(default)]
    pub duration: Option<f64>,

    #[serde(default)]
    pub num_speakers: Option<usize>,

    #[serde(default)]
    pub uem_filepath: Option<String>,

    #[serde(default)]
    pub ctm_filepath: Option<String>,

    #[serde(default)]
    pub text: Option<String>,

    #[serde(default)]
    pub uniq_id: Option<String>,
}

/// Session directory built from a manifest, keyed by `uniq_id`.
///
/// Built once at manifest load and read-only afterwards, except for
/// [`SessionMap::remove`] which drops silent sessions during VAD validation.
/// Iteration preserves manifest order.
#[derive(Debug, Clone, Default)]
pub struct SessionMap {
    sessions: HashMap<String, SessionMeta>,
    order: Vec<String>,
}

impl SessionMap {
    pub(crate) fn insert(&mut self, uniq_id: String, meta: SessionMeta) -> bool {
        if self.sessions.contains_key(&uniq_id) {
            return false;
        }
        self.order.push(uniq_id.clone());
        self.sessions.insert(uniq_id, meta);
        true
    }

    pub fn get(&self, uniq_id: &str) -> Option<&SessionMeta> {
        self.sessions.get(uniq_id)
    }

    pub fn remove(&mut self, uniq_id: &str) -> Option<SessionMeta> {
        let removed = self.sessions.remove(uniq_id);
        if removed.is_some() {
            self.order.retain(|id| id != uniq_id);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SessionMeta)> {
        self.order
            .iter()
            .filter_map(|id| self.sessions.get(id).map(|meta| (id.as_str(), meta)))
    }

    pub fn uniq_ids(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(|id| id.as_str())
    }
}

/// A diarized interval with its speaker label, in seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeakerLabel {
    pub start: f64,
    pub end: f64,
    pub speaker: String,
}

impl SpeakerLabel {
    pub fn new(start: f64, end: f64, speaker: impl Into<String>) -> Self {
        Self {
            start,
            end,
            speaker: speaker.into(),
        }
    }
}

/// One record of the diarized-JSON output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiarizedSegment {
    pub start_time: f64,
    pub end_time: f64,
    pub offset: f64,
    pub duration: f64,
    pub speaker: String,
    pub audio_filepath: String,
    pub words: Option<String>,
    pub text: Option<String>,
}
