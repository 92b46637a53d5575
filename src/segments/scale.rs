//! Multi-scale segmentation schedule and the inter-scale index map

use ndarray::Array2;

use crate::types::DiarizationError;

/// An ordered list of `(window, shift)` scales, longest first.
///
/// The last scale is the base scale: it has the shortest window and provides
/// the highest temporal resolution. Windows and shifts must strictly decrease
/// across the list and every window must exceed its shift.
#[derive(Debug, Clone, PartialEq)]
pub struct ScaleSchedule {
    windows: Vec<f64>,
    shifts: Vec<f64>,
    weights: Vec<f64>,
}

impl ScaleSchedule {
    pub fn new(
        windows: Vec<f64>,
        shifts: Vec<f64>,
        weights: Vec<f64>,
    ) -> Result<Self, DiarizationError> {
        if windows.is_empty() || windows.len() != shifts.len() || windows.len() != weights.len() {
            return Err(DiarizationError::ConfigError {
                message: format!(
                    "scale schedule lengths mismatch: {} windows, {} shifts, {} weights",
                    windows.len(),
                    shifts.len(),
                    weights.len()
                ),
            });
        }
        for pair in windows.windows(2) {
            if pair[1] >= pair[0] {
                return Err(DiarizationError::ConfigError {
                    message: "scale windows must strictly decrease".to_string(),
                });
            }
        }
        for pair in shifts.windows(2) {
            if pair[1] >= pair[0] {
                return Err(DiarizationError::ConfigError {
                    message: "scale shifts must strictly decrease".to_string(),
                });
            }
        }
        for (window, shift) in windows.iter().zip(shifts.iter()) {
            if *window <= 0.0 || *shift <= 0.0 || window <= shift {
                return Err(DiarizationError::ConfigError {
                    message: format!("invalid scale (window {window}, shift {shift})"),
                });
            }
        }
        if weights.iter().any(|w| *w < 0.0) {
            return Err(DiarizationError::ConfigError {
                message: "multiscale weights must be non-negative".to_string(),
            });
        }
        Ok(Self {
            windows,
            shifts,
            weights,
        })
    }

    /// A single-scale schedule, equivalent to a one-element list.
    pub fn single(window: f64, shift: f64) -> Result<Self, DiarizationError> {
        Self::new(vec![window], vec![shift], vec![1.0])
    }

    pub fn num_scales(&self) -> usize {
        self.windows.len()
    }

    /// Index of the base (finest) scale.
    pub fn base_scale_idx(&self) -> usize {
        self.windows.len() - 1
    }

    pub fn window(&self, scale_idx: usize) -> f64 {
        self.windows[scale_idx]
    }

    pub fn shift(&self, scale_idx: usize) -> f64 {
        self.shifts[scale_idx]
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn scales(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.windows.iter().copied().zip(self.shifts.iter().copied())
    }
}

/// Build the scale map from per-scale segment ranges.
///
/// Row `s` of the result maps every base-scale segment index to the index of
/// its covering segment at scale `s`, chosen as the segment whose center is
/// nearest to the base segment's center. The last row is the identity.
///
/// `ranges_per_scale` holds `[start, end]` pairs for each scale in schedule
/// order; the last entry is the base scale.
pub fn scale_mapping_argmat(
    ranges_per_scale: &[Vec<[f64; 2]>],
) -> Result<Array2<usize>, DiarizationError> {
    let num_scales = ranges_per_scale.len();
    if num_scales == 0 {
        return Err(DiarizationError::InvariantViolation {
            stage: "scale_mapping_argmat".to_string(),
            message: "no scales provided".to_string(),
        });
    }
    let base = &ranges_per_scale[num_scales - 1];
    if base.is_empty() {
        return Err(DiarizationError::InvariantViolation {
            stage: "scale_mapping_argmat".to_string(),
            message: "base scale has no segments".to_string(),
        });
    }
    let base_centers: Vec<f64> = base.iter().map(|r| (r[0] + r[1]) / 2.0).collect();

    let mut scale_map = Array2::<usize>::zeros((num_scales, base.len()));
    for (scale_idx, ranges) in ranges_per_scale.iter().enumerate() {
        if ranges.is_empty() {
            return Err(DiarizationError::InvariantViolation {
                stage: "scale_mapping_argmat".to_string(),
                message: format!("scale {scale_idx} has no segments"),
            });
        }
        let centers: Vec<f64> = ranges.iter().map(|r| (r[0] + r[1]) / 2.0).collect();
        // Segment centers are monotone within a scale, so the argmin cursor
        // only ever moves forward.
        let mut cursor = 0usize;
        for (base_idx, base_center) in base_centers.iter().enumerate() {
            while cursor + 1 < centers.len()
                && (centers[cursor + 1] - base_center).abs() < (centers[cursor] - base_center).abs()
            {
                cursor += 1;
            }
            scale_map[[scale_idx, base_idx]] = cursor;
        }
    }
    Ok(scale_map)
}
