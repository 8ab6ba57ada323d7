use serde::{Deserialize, Serialize};

use super::peaks::DetectedPeak;
use crate::error::{EngineError, Result, ensure_aligned, ensure_finite};
use crate::processing::Interval;
use crate::processing::numeric::trapezoid;

/// Half-width of the window given to a peak that has no neighbours.
pub const DEFAULT_HALF_WINDOW: f64 = 50.0;

/// Slopes over an x-span narrower than this are treated as flat.
const MIN_SPAN: f64 = 1e-10;

/// Height and area of one peak, raw and against a two-point local baseline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PeakMetrics {
    /// Wavenumber of the sample the peak resolved to.
    pub wavenumber: f64,
    pub lower: f64,
    pub upper: f64,
    pub uncorrected_height: f64,
    pub corrected_height: f64,
    pub uncorrected_area: f64,
    pub corrected_area: f64,
}

impl PeakMetrics {
    pub fn interval(&self) -> Option<Interval> {
        Interval::new(self.lower, self.upper).ok()
    }
}

fn window_indices(x: &[f64], lower: f64, upper: f64) -> Vec<usize> {
    (0..x.len()).filter(|&i| lower <= x[i] && x[i] <= upper).collect()
}

/// Quantify the peak nearest `peak_wavenumber` inside `[lower, upper]`.
///
/// The local baseline is the straight line through the first and last
/// samples of the window (in array order). Areas follow the direction of
/// the x axis, so a descending axis gives negated areas.
pub fn quantify(x: &[f64], y: &[f64], peak_wavenumber: f64, lower: f64, upper: f64) -> Result<PeakMetrics> {
    ensure_aligned(x, y)?;
    ensure_finite(y, "intensity data")?;
    if !(lower < upper) {
        return Err(EngineError::invalid_range(format!(
            "lower bound ({lower}) must be less than upper bound ({upper})"
        )));
    }

    let idx = window_indices(x, lower, upper);
    if idx.len() < 2 {
        return Err(EngineError::insufficient_data(format!(
            "range {lower:.2} - {upper:.2} holds {} data points, at least 2 are needed",
            idx.len()
        )));
    }
    let xs: Vec<f64> = idx.iter().map(|&i| x[i]).collect();
    let ys: Vec<f64> = idx.iter().map(|&i| y[i]).collect();
    let last = xs.len() - 1;

    let dx = xs[last] - xs[0];
    let slope = if dx.abs() < MIN_SPAN { 0.0 } else { (ys[last] - ys[0]) / dx };
    let intercept = ys[0] - slope * xs[0];
    let above: Vec<f64> = xs
        .iter()
        .zip(&ys)
        .map(|(xi, yi)| yi - (slope * xi + intercept))
        .collect();

    // Nearest sample; the first one wins a tie.
    let peak = (0..xs.len()).fold(0, |best, i| {
        if (xs[i] - peak_wavenumber).abs() < (xs[best] - peak_wavenumber).abs() {
            i
        } else {
            best
        }
    });

    let metrics = PeakMetrics {
        wavenumber: xs[peak],
        lower,
        upper,
        uncorrected_height: ys[peak],
        corrected_height: above[peak],
        uncorrected_area: trapezoid(&ys, &xs),
        corrected_area: trapezoid(&above, &xs),
    };
    log::info!(
        "Peak at {:.2} quantified: corrected height {:.4}, range {lower:.2} - {upper:.2}",
        metrics.wavenumber,
        metrics.corrected_height
    );
    Ok(metrics)
}

/// Quantify the tallest sample inside a fixed window.
///
/// Used to measure the same band across several datasets.
pub fn quantify_fixed_window(x: &[f64], y: &[f64], lower: f64, upper: f64) -> Result<PeakMetrics> {
    ensure_aligned(x, y)?;
    let (lower, upper) = (lower.min(upper), lower.max(upper));
    let idx = window_indices(x, lower, upper);
    let top = idx
        .iter()
        .copied()
        .reduce(|best, i| if y[i] > y[best] { i } else { best })
        .ok_or_else(|| {
            EngineError::insufficient_data(format!("range {lower:.2} - {upper:.2} holds no data points"))
        })?;
    quantify(x, y, x[top], lower, upper)
}

/// Integration windows for a set of detected peaks.
///
/// Each window reaches halfway to the neighbouring peak on either side; the
/// outermost edges mirror the inner half-gap, and a lone peak gets
/// ±[`DEFAULT_HALF_WINDOW`]. Windows are returned in the order of `peaks`.
pub fn auto_windows(peaks: &[DetectedPeak]) -> Vec<(DetectedPeak, Interval)> {
    let mut order: Vec<usize> = (0..peaks.len()).collect();
    order.sort_by(|&a, &b| peaks[a].wavenumber.total_cmp(&peaks[b].wavenumber));

    let mut windows: Vec<Option<Interval>> = vec![None; peaks.len()];
    for (pos, &i) in order.iter().enumerate() {
        let w = peaks[i].wavenumber;
        let below = pos.checked_sub(1).map(|p| peaks[order[p]].wavenumber);
        let above = order.get(pos + 1).map(|&p| peaks[p].wavenumber);

        let (lower, upper) = match (below, above) {
            (Some(b), Some(a)) => ((b + w) / 2.0, (w + a) / 2.0),
            (Some(b), None) => ((b + w) / 2.0, w + (w - b) / 2.0),
            (None, Some(a)) => (w - (a - w) / 2.0, (w + a) / 2.0),
            (None, None) => (w - DEFAULT_HALF_WINDOW, w + DEFAULT_HALF_WINDOW),
        };
        windows[i] = Interval::new(lower, upper).ok();
    }

    peaks
        .iter()
        .zip(windows)
        .filter_map(|(p, w)| w.map(|w| (*p, w)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const X: [f64; 5] = [0.0, 1.0, 2.0, 3.0, 4.0];

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-12
    }

    #[test]
    fn symmetric_triangle_on_flat_baseline() {
        let y = [0.0, 0.0, 10.0, 0.0, 0.0];
        let m = quantify(&X, &y, 2.0, 0.0, 4.0).unwrap();
        assert_eq!(m.wavenumber, 2.0);
        assert!(close(m.uncorrected_height, 10.0));
        assert!(close(m.corrected_height, 10.0));
        // Trapezoid over a triangle with base 2 and apex 10.
        assert!(close(m.uncorrected_area, 10.0));
        assert!(close(m.corrected_area, 10.0));
        assert!(close(m.corrected_area, trapezoid(&y, &X)));
    }

    #[test]
    fn sloped_baseline_is_subtracted() {
        let y = [0.0, 5.0, 20.0, 15.0, 10.0];
        let m = quantify(&X, &y, 2.0, 0.0, 4.0).unwrap();
        assert!(close(m.uncorrected_height, 20.0));
        assert!(close(m.corrected_height, 15.0));
        // Baseline area is 20, raw area 45.
        assert!(close(m.uncorrected_area, 45.0));
        assert!(close(m.corrected_area, 25.0));
    }

    #[test]
    fn descending_axis_negates_area_only() {
        let x: Vec<f64> = X.iter().rev().copied().collect();
        let y = [0.0, 0.0, 10.0, 0.0, 0.0];
        let m = quantify(&x, &y, 2.1, 0.0, 4.0).unwrap();
        assert!(close(m.corrected_height, 10.0));
        assert!(close(m.uncorrected_area, -10.0));
    }

    #[test]
    fn nearest_sample_with_first_tie() {
        let y = [0.0, 1.0, 2.0, 1.0, 0.0];
        assert_eq!(quantify(&X, &y, 2.5, 0.0, 4.0).unwrap().wavenumber, 2.0);
        assert_eq!(quantify(&X, &y, 99.0, 0.0, 4.0).unwrap().wavenumber, 4.0);
    }

    #[test]
    fn window_errors() {
        let y = [0.0, 1.0, 2.0, 1.0, 0.0];
        assert!(matches!(quantify(&X, &y, 2.0, 3.0, 1.0), Err(EngineError::InvalidRange(_))));
        assert!(matches!(
            quantify(&X, &y, 2.0, 1.5, 2.5),
            Err(EngineError::InsufficientData(_))
        ));
        assert!(matches!(
            quantify(&X, &y, 2.0, 10.0, 20.0),
            Err(EngineError::InsufficientData(_))
        ));
    }

    #[test]
    fn fixed_window_uses_tallest_sample() {
        let y = [0.0, 3.0, 1.0, 7.0, 0.0];
        let m = quantify_fixed_window(&X, &y, 4.0, 0.0).unwrap();
        assert_eq!(m.wavenumber, 3.0);
        assert_eq!((m.lower, m.upper), (0.0, 4.0));
        assert!(quantify_fixed_window(&X, &y, 10.0, 20.0).is_err());
    }

    #[test]
    fn windows_reach_halfway_to_neighbours() {
        let peak = |wavenumber: f64, index| DetectedPeak { wavenumber, height: 1.0, index };
        // Descending axis order, as find_peaks returns them for FTIR data.
        let peaks = [peak(1700.0, 10), peak(1600.0, 20), peak(1450.0, 30)];
        let w = auto_windows(&peaks);
        let bounds: Vec<(f64, f64)> = w.iter().map(|(_, iv)| (iv.lower(), iv.upper())).collect();
        assert_eq!(bounds, vec![(1650.0, 1750.0), (1525.0, 1650.0), (1375.0, 1525.0)]);
        assert_eq!(w[0].0.index, 10);

        let single = auto_windows(&[peak(1000.0, 5)]);
        assert_eq!((single[0].1.lower(), single[0].1.upper()), (950.0, 1050.0));
        assert!(auto_windows(&[]).is_empty());
    }
}
