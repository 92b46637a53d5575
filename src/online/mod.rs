//! Online segmentation for the streaming diarizer
//!
//! Works on a short audio buffer: old segments overlapping the new frame are
//! retired, the cumulative VAD state is merged forward, and fresh
//! subsegments are cut from the buffer and padded to the window length.

use crate::intervals::{merge_float_intervals, sub_range_list, DEFAULT_DECIMALS};
use crate::segments::{get_subsegments, MIN_SUBSEGMENT_DURATION};
use crate::types::DiarizationError;

/// Cursor to the point where new segments should replace old ones.
///
/// Walks backwards over the existing segment ranges and pops every range
/// whose end reaches into the new frame; the cursor lands on the onset of
/// the last popped range.
pub fn get_new_cursor_for_update(
    frame_start: f64,
    segment_range_ts: &[[f64; 2]],
) -> (f64, usize) {
    let mut cursor_for_old_segments = frame_start;
    let mut count = 0usize;
    while count < segment_range_ts.len() {
        let t_range = segment_range_ts[segment_range_ts.len() - 1 - count];
        if frame_start <= t_range[1] {
            count += 1;
            cursor_for_old_segments = t_range[0];
        } else {
            break;
        }
    }
    (cursor_for_old_segments, segment_range_ts.len() - count)
}

/// Merge the new VAD output into the cumulative speech labels.
///
/// Returns the speech ranges new segments should be cut from (covering
/// `[cursor_for_old_segments, buffer_end]`) and the updated cumulative
/// labels.
#[allow(clippy::type_complexity)]
pub fn get_speech_labels_for_update(
    frame_start: f64,
    buffer_end: f64,
    cumulative_speech_labels: &[[f64; 2]],
    vad_timestamps: &[[f64; 2]],
    cursor_for_old_segments: f64,
) -> Result<(Vec<[f64; 2]>, Vec<[f64; 2]>), DiarizationError> {
    let new_incoming = sub_range_list([frame_start, buffer_end], vad_timestamps);

    let update_overlap = if cursor_for_old_segments < frame_start {
        sub_range_list(
            [cursor_for_old_segments, frame_start],
            cumulative_speech_labels,
        )
    } else {
        Vec::new()
    };

    let mut for_new_segments = update_overlap;
    for_new_segments.extend(new_incoming.iter().copied());
    let for_new_segments = merge_float_intervals(&for_new_segments, DEFAULT_DECIMALS, 0)?;

    let mut cumulative = cumulative_speech_labels.to_vec();
    cumulative.extend(new_incoming);
    let cumulative = merge_float_intervals(&cumulative, DEFAULT_DECIMALS, 0)?;

    Ok((for_new_segments, cumulative))
}

/// Pad a signal to `target_len` samples by repeating it.
pub fn repeat_signal(signal: &[f32], target_len: usize) -> Vec<f32> {
    let mut out = Vec::with_capacity(target_len);
    while out.len() < target_len {
        let take = (target_len - out.len()).min(signal.len());
        out.extend_from_slice(&signal[..take]);
    }
    out
}

fn get_target_sig(
    sig: &[f32],
    start_sec: f64,
    end_sec: f64,
    slice_length: usize,
    sample_rate: u32,
) -> &[f32] {
    let start_idx = (start_sec * sample_rate as f64) as usize;
    let end_idx = ((end_sec * sample_rate as f64) as usize)
        .min(slice_length + start_idx)
        .min(sig.len());
    &sig[start_idx.min(sig.len())..end_idx]
}

/// Online segmentor for the streaming diarizer.
///
/// Owns the cumulative speech-label state; the buffer bounds are advanced by
/// the caller between steps via [`OnlineSegmentor::update_buffer`].
pub struct OnlineSegmentor {
    frame_start: f64,
    buffer_start: f64,
    buffer_end: f64,
    sample_rate: u32,
    cumulative_speech_labels: Vec<[f64; 2]>,
}

impl OnlineSegmentor {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            frame_start: 0.0,
            buffer_start: 0.0,
            buffer_end: 0.0,
            sample_rate,
            cumulative_speech_labels: Vec::new(),
        }
    }

    /// Advance the buffer bounds before the next segmentation step.
    pub fn update_buffer(&mut self, buffer_start: f64, buffer_end: f64, frame_start: f64) {
        self.buffer_start = buffer_start;
        self.buffer_end = buffer_end;
        self.frame_start = frame_start;
    }

    pub fn cumulative_speech_labels(&self) -> &[[f64; 2]] {
        &self.cumulative_speech_labels
    }

    /// Segment the current buffer, replacing segments that overlap the new
    /// frame and appending fresh ones.
    ///
    /// The three parallel lists are updated in place and always keep equal
    /// lengths; segment indices increase monotonically across calls.
    #[allow(clippy::too_many_arguments)]
    pub fn run_online_segmentation(
        &mut self,
        audio_buffer: &[f32],
        vad_timestamps: &[[f64; 2]],
        segment_raw_audio: &mut Vec<Vec<f32>>,
        segment_range_ts: &mut Vec<[f64; 2]>,
        segment_indexes: &mut Vec<i64>,
        window: f64,
        shift: f64,
    ) -> Result<(), DiarizationError> {
        if self.buffer_start >= 0.0 {
            let speech_labels_for_update: Vec<[f64; 2]>;
            if segment_raw_audio.is_empty() && !vad_timestamps.is_empty() {
                let mut adopted = vad_timestamps.to_vec();
                adopted[0][0] = adopted[0][0].max(0.0);
                speech_labels_for_update = adopted.clone();
                self.cumulative_speech_labels = adopted;
            } else {
                let (cursor_for_old_segments, cursor_index) =
                    get_new_cursor_for_update(self.frame_start, segment_range_ts);
                segment_range_ts.truncate(cursor_index);
                segment_raw_audio.truncate(cursor_index);
                segment_indexes.truncate(cursor_index);

                let (for_update, cumulative) = get_speech_labels_for_update(
                    self.frame_start,
                    self.buffer_end,
                    &self.cumulative_speech_labels,
                    vad_timestamps,
                    cursor_for_old_segments,
                )?;
                speech_labels_for_update = for_update;
                self.cumulative_speech_labels = cumulative;
            }

            self.extend_segments_from_buffer(
                audio_buffer,
                &speech_labels_for_update,
                segment_raw_audio,
                segment_range_ts,
                segment_indexes,
                window,
                shift,
            )?;
        }

        if segment_raw_audio.len() != segment_range_ts.len()
            || segment_range_ts.len() != segment_indexes.len()
        {
            return Err(DiarizationError::InvariantViolation {
                stage: "run_online_segmentation".to_string(),
                message: "segment information lists have a length mismatch".to_string(),
            });
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn extend_segments_from_buffer(
        &self,
        audio_buffer: &[f32],
        speech_labels: &[[f64; 2]],
        segment_raw_audio: &mut Vec<Vec<f32>>,
        segment_range_ts: &mut Vec<[f64; 2]>,
        segment_indexes: &mut Vec<i64>,
        window: f64,
        shift: f64,
    ) -> Result<(), DiarizationError> {
        let slice_length = (window * self.sample_rate as f64) as usize;
        let mut ind_offset = segment_indexes.last().copied().unwrap_or(-1);
        let buffer_len = self.buffer_end - self.buffer_start;

        for range in speech_labels {
            let range_start = (range[0] - self.buffer_start).max(0.0);
            let range_end = range[1] - self.buffer_start;
            let subsegments = get_subsegments(
                range_start,
                window,
                shift,
                range_end - range_start,
                MIN_SUBSEGMENT_DURATION,
            );
            for (start_sec, dur) in subsegments {
                if start_sec > self.buffer_end {
                    continue;
                }
                ind_offset += 1;
                let end_sec = (start_sec + dur).min(buffer_len);
                let signal =
                    get_target_sig(audio_buffer, start_sec, end_sec, slice_length, self.sample_rate);
                if signal.is_empty() {
                    return Err(DiarizationError::InvariantViolation {
                        stage: "extend_segments_from_buffer".to_string(),
                        message: format!(
                            "empty signal slice for segment [{start_sec:.3}, {end_sec:.3}]"
                        ),
                    });
                }
                let signal = if signal.len() < slice_length {
                    repeat_signal(signal, slice_length)
                } else {
                    signal.to_vec()
                };
                segment_raw_audio.push(signal);
                segment_range_ts
                    .push([self.buffer_start + start_sec, self.buffer_start + end_sec]);
                segment_indexes.push(ind_offset);
            }
        }
        Ok(())
    }
}
