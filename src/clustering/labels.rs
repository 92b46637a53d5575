//! Cluster-label algebra
//!
//! Minimal relabeling, permutation stitching between two labelings of the
//! same frames, and expansion of clustering-scale labels to the finest scale.

use ndarray::Array1;

use crate::types::DiarizationError;

/// Threshold below which the permutation search is exhaustive.
const EXACT_STITCH_LIMIT: usize = 8;

/// Relabel so the used non-negative labels become `{0, .., K-1}`,
/// preserving order. Negative labels pass through.
pub fn get_minimal_indices(labels: &[i64]) -> Vec<i64> {
    let mut used: Vec<i64> = labels.iter().copied().filter(|l| *l >= 0).collect();
    used.sort_unstable();
    used.dedup();
    labels
        .iter()
        .map(|l| {
            if *l < 0 {
                *l
            } else {
                used.binary_search(l).expect("label present in used set") as i64
            }
        })
        .collect()
}

/// Fraction of positions where two labelings agree.
pub fn sync_score(reference: &[i64], candidate: &[i64]) -> f64 {
    if reference.is_empty() {
        return 0.0;
    }
    let matches = reference
        .iter()
        .zip(candidate.iter())
        .filter(|(a, b)| a == b)
        .count();
    matches as f64 / reference.len() as f64
}

/// Remap `y_new` onto the label space of `y_old` so the two labelings agree
/// on as many frames as possible.
///
/// The confusion matrix between the labelings is built once; for small label
/// counts every permutation is scored and the best one is applied, which is
/// equivalent to a Hungarian assignment at these sizes. Larger label counts
/// fall back to greedy assignment on the confusion counts.
pub fn stitch_cluster_labels(y_old: &[i64], y_new: &[i64]) -> Vec<i64> {
    if y_old.is_empty() {
        return y_new.to_vec();
    }
    let max_old = y_old.iter().copied().max().unwrap_or(0).max(0);
    let max_new = y_new.iter().copied().max().unwrap_or(0).max(0);
    let k = (max_old.max(max_new) + 1) as usize;

    // confusion[new_label][old_label]
    let mut confusion = vec![vec![0usize; k]; k];
    for (old, new) in y_old.iter().zip(y_new.iter()) {
        if *old >= 0 && *new >= 0 {
            confusion[*new as usize][*old as usize] += 1;
        }
    }

    let mapping = if k <= EXACT_STITCH_LIMIT {
        best_permutation(&confusion, k)
    } else {
        greedy_assignment(&confusion, k)
    };

    y_new
        .iter()
        .map(|l| if *l < 0 { *l } else { mapping[*l as usize] as i64 })
        .collect()
}

fn best_permutation(confusion: &[Vec<usize>], k: usize) -> Vec<usize> {
    let mut perm: Vec<usize> = (0..k).collect();
    let mut best: Vec<usize> = perm.clone();
    let mut best_score = permutation_score(confusion, &perm);
    permute(&mut perm, 0, &mut |candidate| {
        let score = permutation_score(confusion, candidate);
        if score > best_score {
            best_score = score;
            best = candidate.to_vec();
        }
    });
    best
}

fn permutation_score(confusion: &[Vec<usize>], perm: &[usize]) -> usize {
    perm.iter()
        .enumerate()
        .map(|(new, old)| confusion[new][*old])
        .sum()
}

fn permute(values: &mut Vec<usize>, start: usize, visit: &mut impl FnMut(&[usize])) {
    if start == values.len() {
        visit(values);
        return;
    }
    for i in start..values.len() {
        values.swap(start, i);
        permute(values, start + 1, visit);
        values.swap(start, i);
    }
}

fn greedy_assignment(confusion: &[Vec<usize>], k: usize) -> Vec<usize> {
    let mut pairs: Vec<(usize, usize, usize)> = Vec::with_capacity(k * k);
    for new in 0..k {
        for old in 0..k {
            pairs.push((confusion[new][old], new, old));
        }
    }
    pairs.sort_unstable_by(|a, b| b.0.cmp(&a.0));
    let mut mapping = vec![usize::MAX; k];
    let mut taken = vec![false; k];
    for (_, new, old) in pairs {
        if mapping[new] == usize::MAX && !taken[old] {
            mapping[new] = old;
            taken[old] = true;
        }
    }
    for (new, slot) in mapping.iter_mut().enumerate() {
        if *slot == usize::MAX {
            *slot = new;
        }
    }
    mapping
}

/// Project clustering-scale labels to the finest scale.
///
/// `cluster_labels` holds one label per VAD-positive clustering-scale
/// segment, in segment order. The result has one entry per finest-scale
/// segment: `-1` where the base VAD mask is off or the covering segment was
/// masked, the covering segment's label elsewhere.
pub fn expand_to_finest_scale(
    num_scaled_segments: usize,
    cluster_labels: &[i64],
    vad_scaled: &Array1<bool>,
    vad_base: &Array1<bool>,
    scale_row: &[usize],
) -> Result<Vec<i64>, DiarizationError> {
    if vad_scaled.len() != num_scaled_segments {
        return Err(DiarizationError::InvariantViolation {
            stage: "expand_to_finest_scale".to_string(),
            message: format!(
                "{} scaled VAD decisions for {} segments",
                vad_scaled.len(),
                num_scaled_segments
            ),
        });
    }
    let mut scaled_labels = vec![-1i64; num_scaled_segments];
    let mut cursor = 0usize;
    for (idx, active) in vad_scaled.iter().enumerate() {
        if *active {
            let label = *cluster_labels.get(cursor).ok_or_else(|| {
                DiarizationError::InvariantViolation {
                    stage: "expand_to_finest_scale".to_string(),
                    message: "fewer cluster labels than VAD-positive segments".to_string(),
                }
            })?;
            scaled_labels[idx] = label;
            cursor += 1;
        }
    }
    if cursor != cluster_labels.len() {
        return Err(DiarizationError::InvariantViolation {
            stage: "expand_to_finest_scale".to_string(),
            message: format!(
                "{} cluster labels for {cursor} VAD-positive segments",
                cluster_labels.len()
            ),
        });
    }

    let mut finest = vec![-1i64; scale_row.len()];
    for (tdx, mapped) in scale_row.iter().enumerate() {
        if vad_base[tdx] {
            finest[tdx] = scaled_labels[*mapped];
        }
    }
    Ok(finest)
}
