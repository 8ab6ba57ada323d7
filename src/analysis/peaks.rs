use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result, ensure_aligned, ensure_finite};

/// A local maximum found by [`find_peaks`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectedPeak {
    pub wavenumber: f64,
    pub height: f64,
    /// Sample index into the spectrum the peak was found in.
    pub index: usize,
}

/// Find local maxima of `y` with `y >= threshold`, at least `min_distance`
/// samples apart.
///
/// Flat tops count once, at the (lower) middle sample of the plateau. The
/// first and last samples are never peaks. When two candidates are closer
/// than `min_distance` the taller one is kept; between equally tall
/// candidates the one with the lower index wins. Peaks are returned in index
/// order.
pub fn find_peaks(x: &[f64], y: &[f64], threshold: f64, min_distance: usize) -> Result<Vec<DetectedPeak>> {
    if !(threshold >= 0.0) {
        return Err(EngineError::invalid_parameter(format!(
            "peak threshold must be at least 0, got {threshold}"
        )));
    }
    if min_distance < 1 {
        return Err(EngineError::invalid_parameter(format!(
            "minimum peak distance must be at least 1, got {min_distance}"
        )));
    }
    ensure_finite(y, "intensity data")?;
    ensure_aligned(x, y)?;

    let mut candidates: Vec<usize> = local_maxima(y)
        .into_iter()
        .filter(|&i| y[i] >= threshold)
        .collect();

    if min_distance > 1 {
        candidates = filter_by_distance(candidates, y, min_distance);
    }

    let peaks: Vec<DetectedPeak> = candidates
        .into_iter()
        .map(|index| DetectedPeak {
            wavenumber: x[index],
            height: y[index],
            index,
        })
        .collect();

    log::info!("Found {} peaks (threshold {threshold}, distance {min_distance})", peaks.len());
    Ok(peaks)
}

/// Indices of strict local maxima, plateaus reduced to their middle sample.
#[allow(clippy::float_cmp)]
fn local_maxima(y: &[f64]) -> Vec<usize> {
    let n = y.len();
    let mut maxima = Vec::new();
    if n < 3 {
        return maxima;
    }

    let mut i = 1;
    while i < n - 1 {
        if y[i - 1] < y[i] {
            let mut ahead = i + 1;
            while ahead < n - 1 && y[ahead] == y[i] {
                ahead += 1;
            }
            if y[ahead] < y[i] {
                maxima.push((i + ahead - 1) / 2);
                i = ahead;
                continue;
            }
        }
        i += 1;
    }
    maxima
}

fn filter_by_distance(peaks: Vec<usize>, y: &[f64], distance: usize) -> Vec<usize> {
    let mut by_priority: Vec<usize> = (0..peaks.len()).collect();
    // Tallest first; stable sort keeps index order among equal heights.
    by_priority.sort_by(|&a, &b| y[peaks[b]].total_cmp(&y[peaks[a]]));

    let mut keep = vec![true; peaks.len()];
    for &p in &by_priority {
        if !keep[p] {
            continue;
        }
        for q in (0..p).rev().take_while(|&q| peaks[p] - peaks[q] < distance) {
            keep[q] = false;
        }
        for q in (p + 1..peaks.len()).take_while(|&q| peaks[q] - peaks[p] < distance) {
            keep[q] = false;
        }
    }

    peaks
        .into_iter()
        .zip(keep)
        .filter_map(|(idx, k)| k.then_some(idx))
        .collect()
}
