//! Smoothing kernels.
//!
//! Savitzky-Golay and LOWESS come from the `savitzky-golay` and `lowess`
//! crates; the window filters are small enough to keep here. Parameters are
//! expected to have passed
//! [`SmoothingMethod::validate`](super::smoothing::SmoothingMethod::validate).

use lowess::prelude::*;
use savitzky_golay::SavitzkyGolayFilter;

use super::numeric::median;
use crate::error::{EngineError, Result};

// ---------------------------------------------------------------------------
// Savitzky-Golay / LOWESS (external crates)
// ---------------------------------------------------------------------------

/// Savitzky-Golay smoothing over a window of `window` samples.
pub fn savgol(y: &[f64], window: usize, polyorder: usize) -> Result<Vec<f64>> {
    let mut filter = SavitzkyGolayFilter::new(window, polyorder).map_err(|e| {
        EngineError::invalid_parameter(format!("savgol window {window}, order {polyorder}: {e}"))
    })?;
    Ok(filter.apply(y))
}

/// Locally weighted linear regression with `iterations` robustifying passes.
///
/// The fit runs on ascending `x`; output is in the same order as the input,
/// whatever the direction of `x`.
pub fn lowess(x: &[f64], y: &[f64], frac: f64, iterations: usize) -> Result<Vec<f64>> {
    let mut order: Vec<usize> = (0..x.len()).collect();
    order.sort_by(|&a, &b| x[a].total_cmp(&x[b]));
    let xs: Vec<f64> = order.iter().map(|&i| x[i]).collect();
    let ys: Vec<f64> = order.iter().map(|&i| y[i]).collect();

    let to_engine = |e: LowessError| EngineError::invalid_parameter(format!("lowess fit failed: {e}"));
    let model = Lowess::new()
        .fraction(frac)
        .iterations(iterations)
        .delta(0.0)
        .boundary_policy(NoBoundary)
        .adapter(Batch)
        .build()
        .map_err(to_engine)?;
    let fitted = model.fit(&xs, &ys).map_err(to_engine)?.y;
    if fitted.len() != xs.len() {
        return Err(EngineError::invalid_data(format!(
            "lowess returned {} values for {} samples",
            fitted.len(),
            xs.len()
        )));
    }

    let mut out = vec![0.0; xs.len()];
    for (&orig, v) in order.iter().zip(fitted) {
        out[orig] = v;
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Moving average / Gaussian / median
// ---------------------------------------------------------------------------

const MAX_GAUSSIAN_PERIODS: f64 = 4.0;

/// Centred moving average; samples beyond the ends count as zero.
pub fn moving_average(y: &[f64], window: usize) -> Vec<f64> {
    let n = y.len() as isize;
    let w = window as isize;
    let offset = (w - 1) / 2;
    (0..n)
        .map(|i| {
            let centre = i + offset;
            let sum: f64 = (0..w)
                .map(|k| centre - k)
                .filter(|&j| j >= 0 && j < n)
                .map(|j| y[j as usize])
                .sum();
            sum / window as f64
        })
        .collect()
}

/// Gaussian filter with reflected edges and a kernel truncated at 4σ.
///
/// Reflection repeats with period `2n`, so the radius is capped at a few
/// periods; a wider kernel only adds near-uniform weight to the same samples.
pub fn gaussian(y: &[f64], sigma: f64) -> Vec<f64> {
    let n = y.len() as isize;
    let radius = (4.0 * sigma + 0.5).min(MAX_GAUSSIAN_PERIODS * 2.0 * n as f64) as isize;
    let mut kernel: Vec<f64> = (-radius..=radius)
        .map(|k| (-0.5 * (k as f64 / sigma).powi(2)).exp())
        .collect();
    let total: f64 = kernel.iter().sum();
    kernel.iter_mut().for_each(|k| *k /= total);

    let reflect = |i: isize| -> usize {
        let period = 2 * n;
        let m = i.rem_euclid(period);
        (if m >= n { period - 1 - m } else { m }) as usize
    };

    (0..n)
        .map(|i| {
            kernel
                .iter()
                .enumerate()
                .map(|(k, w)| w * y[reflect(i + k as isize - radius)])
                .sum()
        })
        .collect()
}

/// Running median over an odd window; samples beyond the ends count as zero.
pub fn median_filter(y: &[f64], window: usize) -> Vec<f64> {
    let n = y.len() as isize;
    let half = (window / 2) as isize;
    let mut buf = Vec::with_capacity(window);
    (0..n)
        .map(|i| {
            buf.clear();
            buf.extend((i - half..=i + half).map(|j| {
                if j >= 0 && j < n { y[j as usize] } else { 0.0 }
            }));
            median(&buf)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: &[f64], b: &[f64], tol: f64) {
        assert_eq!(a.len(), b.len());
        for (i, (p, q)) in a.iter().zip(b).enumerate() {
            assert!((p - q).abs() < tol, "index {i}: {p} vs {q}");
        }
    }

    #[test]
    fn savgol_preserves_polynomials_of_its_order() {
        let y: Vec<f64> = (0..15).map(|i| (i as f64).powi(2) * 0.5 - i as f64).collect();
        let out = savgol(&y, 7, 2).unwrap();
        assert_close(&out[3..12], &y[3..12], 1e-8);
    }

    #[test]
    fn savgol_reduces_alternating_noise() {
        let y: Vec<f64> = (0..21).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        let out = savgol(&y, 5, 2).unwrap();
        let before: f64 = y[5..15].iter().map(|v| v.abs()).sum();
        let after: f64 = out[5..15].iter().map(|v| v.abs()).sum();
        assert!(after < before);
    }

    #[test]
    fn lowess_smooths_in_either_direction() {
        let x: Vec<f64> = (0..40).map(|i| 100.0 - i as f64).collect();
        let line: Vec<f64> = x.iter().map(|v| 2.0 * v + 1.0).collect();
        let y: Vec<f64> = line
            .iter()
            .enumerate()
            .map(|(i, v)| if i % 2 == 0 { v + 0.5 } else { v - 0.5 })
            .collect();
        let out = lowess(&x, &y, 0.3, 2).unwrap();
        assert_eq!(out.len(), y.len());
        let err = |a: &[f64]| -> f64 { a[5..35].iter().zip(&line[5..35]).map(|(p, q)| (p - q).abs()).sum() };
        assert!(err(&out) < err(&y));
        // Output stays aligned with the descending input.
        assert!(out[0] > out[39]);
    }

    #[test]
    fn moving_average_zero_pads_edges() {
        let out = moving_average(&[3.0, 3.0, 3.0, 3.0], 3);
        assert_close(&out, &[2.0, 3.0, 3.0, 2.0], 1e-12);
        assert_close(&moving_average(&[1.0, 2.0], 1), &[1.0, 2.0], 1e-12);
    }

    #[test]
    fn gaussian_keeps_constants() {
        let out = gaussian(&[5.0; 10], 2.0);
        assert_close(&out, &[5.0; 10], 1e-12);
    }

    #[test]
    fn gaussian_with_huge_sigma_averages() {
        let y = [1.0, 2.0, 3.0, 4.0];
        let out = gaussian(&y, 1e19);
        assert_eq!(out.len(), 4);
        for v in out {
            assert!(v.is_finite() && (v - 2.5).abs() < 0.1, "{v}");
        }
    }

    #[test]
    fn median_removes_spike() {
        let out = median_filter(&[1.0, 1.0, 9.0, 1.0, 1.0], 3);
        assert_close(&out, &[1.0, 1.0, 1.0, 1.0, 1.0], 1e-12);
    }
}
