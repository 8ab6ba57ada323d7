//! Whole-spectrum baseline estimation.
//!
//! Unlike smoothing, baselines are never restricted to intervals: every
//! method sees the full spectrum and the corrected array is `y - baseline`.

use std::fmt;

use serde_json::json;

use super::numeric::{BandedMatrix, polyfit_eval, scale_to_unit, std_dev};
use super::params::{ParamMap, get_f64, get_usize};
use crate::error::{EngineError, Result, ensure_aligned, ensure_finite};

/// Relative change below which the iterative methods stop.
const TOLERANCE: f64 = 1e-3;

const MODPOLY_MAX_ITER: usize = 250;
const ASLS_MAX_ITER: usize = 50;
const SPLINE_MAX_ITER: usize = 50;

// ---------------------------------------------------------------------------
// BaselineMethod
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BaselineMethod {
    /// Lower convex hull, linearly interpolated.
    Rubberband,
    /// Modified polynomial fit: repeatedly clip the signal to the fit.
    ModPoly { poly_order: usize, max_iter: usize },
    /// Improved ModPoly: clip to fit + one residual standard deviation.
    IModPoly { poly_order: usize, max_iter: usize },
    /// Asymmetric least squares (Whittaker smoother with asymmetric weights).
    Asls { lam: f64, p: f64 },
    /// Iterative clipped least-squares spline with evenly spaced knots.
    Spline { num_knots: usize },
}

impl fmt::Display for BaselineMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BaselineMethod::Rubberband => write!(f, "rubberband"),
            BaselineMethod::ModPoly { poly_order, .. } => write!(f, "modpoly(order={poly_order})"),
            BaselineMethod::IModPoly { poly_order, max_iter } => {
                write!(f, "imodpoly(order={poly_order}, max_iter={max_iter})")
            }
            BaselineMethod::Asls { lam, p } => write!(f, "asls(lam={lam:e}, p={p})"),
            BaselineMethod::Spline { num_knots } => write!(f, "spline(knots={num_knots})"),
        }
    }
}

impl BaselineMethod {
    pub fn name(&self) -> &'static str {
        match self {
            BaselineMethod::Rubberband => "rubberband",
            BaselineMethod::ModPoly { .. } => "modpoly",
            BaselineMethod::IModPoly { .. } => "imodpoly",
            BaselineMethod::Asls { .. } => "asls",
            BaselineMethod::Spline { .. } => "spline",
        }
    }

    /// Build a method from its config name and a loose parameter map.
    /// `mixture_model` is accepted as an alias for the spline method.
    pub fn from_parts(name: &str, params: &ParamMap) -> Result<Option<Self>> {
        let method = match name.trim().to_ascii_lowercase().as_str() {
            "" | "none" => return Ok(None),
            "rubberband" => BaselineMethod::Rubberband,
            "modpoly" => BaselineMethod::ModPoly {
                poly_order: get_usize(params, &["poly_order"], 2)?,
                max_iter: get_usize(params, &["max_iter"], MODPOLY_MAX_ITER)?,
            },
            "imodpoly" => BaselineMethod::IModPoly {
                poly_order: get_usize(params, &["poly_order"], 2)?,
                max_iter: get_usize(params, &["max_iter", "num_iter"], 50)?,
            },
            "asls" => BaselineMethod::Asls {
                lam: get_f64(params, &["lam", "lambda"], 1e6)?,
                p: get_f64(params, &["p"], 0.01)?,
            },
            "spline" | "mixture_model" => BaselineMethod::Spline {
                num_knots: get_usize(params, &["num_knots"], 10)?,
            },
            other => {
                return Err(EngineError::invalid_parameter(format!(
                    "unknown baseline method '{other}'"
                )))
            }
        };
        method.validate_params()?;
        Ok(Some(method))
    }

    pub fn to_parts(&self) -> (&'static str, ParamMap) {
        let value = match *self {
            BaselineMethod::Rubberband => json!({}),
            BaselineMethod::ModPoly { poly_order, max_iter } => {
                json!({"poly_order": poly_order, "max_iter": max_iter})
            }
            BaselineMethod::IModPoly { poly_order, max_iter } => {
                json!({"poly_order": poly_order, "max_iter": max_iter})
            }
            BaselineMethod::Asls { lam, p } => json!({"lam": lam, "p": p}),
            BaselineMethod::Spline { num_knots } => json!({"num_knots": num_knots}),
        };
        let params = match value {
            serde_json::Value::Object(map) => map,
            _ => ParamMap::new(),
        };
        (self.name(), params)
    }

    /// Checks that do not depend on the data.
    pub fn validate_params(&self) -> Result<()> {
        match *self {
            BaselineMethod::Rubberband => {}
            BaselineMethod::ModPoly { poly_order, max_iter }
            | BaselineMethod::IModPoly { poly_order, max_iter } => {
                if poly_order < 1 {
                    return Err(EngineError::invalid_parameter(
                        "polynomial order must be at least 1",
                    ));
                }
                if max_iter < 1 {
                    return Err(EngineError::invalid_parameter(
                        "iteration count must be at least 1",
                    ));
                }
            }
            BaselineMethod::Asls { lam, p } => {
                if !(lam > 0.0) || !lam.is_finite() {
                    return Err(EngineError::invalid_parameter(format!(
                        "asls smoothing parameter must be greater than 0, got {lam}"
                    )));
                }
                if !(p > 0.0 && p < 1.0) {
                    return Err(EngineError::invalid_parameter(format!(
                        "asls asymmetry parameter must be strictly between 0 and 1, got {p}"
                    )));
                }
            }
            BaselineMethod::Spline { num_knots } => {
                if num_knots < 2 {
                    return Err(EngineError::invalid_parameter(format!(
                        "spline needs at least 2 knots, got {num_knots}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Full validation against a spectrum of `len` samples.
    pub fn validate(&self, len: usize) -> Result<()> {
        self.validate_params()?;
        match *self {
            BaselineMethod::ModPoly { poly_order, .. } | BaselineMethod::IModPoly { poly_order, .. } => {
                if poly_order >= len {
                    return Err(EngineError::invalid_parameter(format!(
                        "polynomial order ({poly_order}) must be less than data length ({len})"
                    )));
                }
            }
            BaselineMethod::Asls { .. } => {
                if len < 3 {
                    return Err(EngineError::insufficient_data(format!(
                        "asls needs at least 3 points, got {len}"
                    )));
                }
            }
            BaselineMethod::Spline { num_knots } => {
                if num_knots > len / 2 {
                    return Err(EngineError::invalid_parameter(format!(
                        "knot count ({num_knots}) cannot exceed half the data length ({})",
                        len / 2
                    )));
                }
            }
            BaselineMethod::Rubberband => {}
        }
        Ok(())
    }
}

/// Output of a baseline correction, both arrays aligned with the input `x`.
#[derive(Debug, Clone, PartialEq)]
pub struct BaselineCorrection {
    pub corrected: Vec<f64>,
    pub baseline: Vec<f64>,
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

pub fn correct(x: &[f64], y: &[f64], method: &BaselineMethod) -> Result<BaselineCorrection> {
    ensure_finite(y, "intensity data")?;
    ensure_aligned(x, y)?;
    ensure_finite(x, "wavenumber data")?;
    method.validate(y.len())?;

    let baseline = match *method {
        BaselineMethod::Rubberband => rubberband(x, y),
        BaselineMethod::ModPoly { poly_order, max_iter } => modpoly(x, y, poly_order, max_iter)?,
        BaselineMethod::IModPoly { poly_order, max_iter } => imodpoly(x, y, poly_order, max_iter)?,
        BaselineMethod::Asls { lam, p } => asls(y, lam, p)?,
        BaselineMethod::Spline { num_knots } => spline(y, num_knots)?,
    };
    if let Some(i) = baseline.iter().position(|v| !v.is_finite()) {
        return Err(EngineError::invalid_data(format!(
            "{method} produced a non-finite baseline at index {i}"
        )));
    }

    let corrected = y.iter().zip(&baseline).map(|(a, b)| a - b).collect();
    log::info!("Baseline correction finished: {method}");
    Ok(BaselineCorrection { corrected, baseline })
}

// ---------------------------------------------------------------------------
// Kernels
// ---------------------------------------------------------------------------

fn rubberband(x: &[f64], y: &[f64]) -> Vec<f64> {
    let n = x.len();
    if n < 3 {
        return y.to_vec();
    }
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| x[a].total_cmp(&x[b]));

    // Lower hull by monotone chain.
    let cross = |o: usize, a: usize, b: usize| {
        (x[a] - x[o]) * (y[b] - y[o]) - (y[a] - y[o]) * (x[b] - x[o])
    };
    let mut hull: Vec<usize> = Vec::new();
    for &i in &order {
        while hull.len() >= 2 && cross(hull[hull.len() - 2], hull[hull.len() - 1], i) <= 0.0 {
            hull.pop();
        }
        hull.push(i);
    }

    let mut out = vec![0.0; n];
    let mut seg = 0;
    for &i in &order {
        while seg + 2 < hull.len() && x[hull[seg + 1]] < x[i] {
            seg += 1;
        }
        let (a, b) = (hull[seg], hull[(seg + 1).min(hull.len() - 1)]);
        out[i] = if a == b || x[b] == x[a] {
            y[a]
        } else {
            y[a] + (y[b] - y[a]) * (x[i] - x[a]) / (x[b] - x[a])
        };
    }
    out
}

fn relative_change(new: &[f64], old: &[f64]) -> f64 {
    let diff: f64 = new.iter().zip(old).map(|(a, b)| (a - b).powi(2)).sum::<f64>().sqrt();
    let norm: f64 = old.iter().map(|v| v * v).sum::<f64>().sqrt();
    if norm == 0.0 { diff } else { diff / norm }
}

fn modpoly(x: &[f64], y: &[f64], order: usize, max_iter: usize) -> Result<Vec<f64>> {
    let t = scale_to_unit(x);
    let mut work = y.to_vec();
    let mut fit = polyfit_eval(&t, &work, order)?;
    for _ in 1..max_iter {
        for (w, f) in work.iter_mut().zip(&fit) {
            *w = w.min(*f);
        }
        let next = polyfit_eval(&t, &work, order)?;
        let change = relative_change(&next, &fit);
        fit = next;
        if change < TOLERANCE {
            break;
        }
    }
    Ok(fit)
}

fn imodpoly(x: &[f64], y: &[f64], order: usize, max_iter: usize) -> Result<Vec<f64>> {
    let t = scale_to_unit(x);
    let mut work = y.to_vec();
    let mut fit = polyfit_eval(&t, &work, order)?;
    let residual: Vec<f64> = work.iter().zip(&fit).map(|(a, b)| a - b).collect();
    let mut dev = std_dev(&residual);

    for _ in 1..max_iter {
        for (w, f) in work.iter_mut().zip(&fit) {
            *w = w.min(f + dev);
        }
        fit = polyfit_eval(&t, &work, order)?;
        let residual: Vec<f64> = work.iter().zip(&fit).map(|(a, b)| a - b).collect();
        let next_dev = std_dev(&residual);
        let change = if dev == 0.0 { next_dev } else { ((next_dev - dev) / dev).abs() };
        dev = next_dev;
        if change < TOLERANCE {
            break;
        }
    }
    Ok(fit)
}

/// `λ·DᵀD` for the second-difference operator, half-bandwidth 2.
fn second_difference_penalty(n: usize, lam: f64) -> BandedMatrix {
    let mut penalty = BandedMatrix::zeros(n, 2);
    let row = [1.0, -2.0, 1.0];
    for start in 0..n - 2 {
        for a in 0..3 {
            for b in 0..=a {
                penalty.add(start + a, start + b, lam * row[a] * row[b]);
            }
        }
    }
    penalty
}

fn asls(y: &[f64], lam: f64, p: f64) -> Result<Vec<f64>> {
    let n = y.len();
    let penalty = second_difference_penalty(n, lam);
    let mut weights = vec![1.0; n];
    let mut z = y.to_vec();

    for _ in 0..ASLS_MAX_ITER {
        let mut system = penalty.clone();
        for (i, &w) in weights.iter().enumerate() {
            system.add(i, i, w);
        }
        let rhs: Vec<f64> = weights.iter().zip(y).map(|(w, v)| w * v).collect();
        z = system.solve(&rhs)?;

        let next: Vec<f64> = y
            .iter()
            .zip(&z)
            .map(|(v, b)| if v > b { p } else { 1.0 - p })
            .collect();
        let change = relative_change(&next, &weights);
        weights = next;
        if change < TOLERANCE {
            break;
        }
    }
    Ok(z)
}

/// Knot positions (sample indices) spread evenly over `0..n`.
fn knot_indices(n: usize, num_knots: usize) -> Vec<usize> {
    let last = (n - 1) as f64;
    let mut knots: Vec<usize> = (0..num_knots)
        .map(|j| (j as f64 * last / (num_knots - 1) as f64).round() as usize)
        .collect();
    knots.dedup();
    knots
}

fn spline(y: &[f64], num_knots: usize) -> Result<Vec<f64>> {
    let n = y.len();
    let knots = knot_indices(n, num_knots);
    let m = knots.len();

    // Each sample is covered by the two hat functions of its knot segment.
    let basis: Vec<(usize, f64)> = (0..n)
        .map(|i| {
            let seg = knots.partition_point(|&k| k <= i).saturating_sub(1).min(m - 2);
            let (k0, k1) = (knots[seg], knots[seg + 1]);
            let t = (i - k0) as f64 / (k1 - k0) as f64;
            (seg, t)
        })
        .collect();

    let mut normal = BandedMatrix::zeros(m, 1);
    for &(seg, t) in &basis {
        normal.add(seg, seg, (1.0 - t) * (1.0 - t));
        normal.add(seg + 1, seg + 1, t * t);
        normal.add(seg + 1, seg, (1.0 - t) * t);
    }

    let mut work = y.to_vec();
    let mut fit = vec![0.0; n];
    for iter in 0..SPLINE_MAX_ITER {
        let mut rhs = vec![0.0; m];
        for (&(seg, t), &v) in basis.iter().zip(&work) {
            rhs[seg] += (1.0 - t) * v;
            rhs[seg + 1] += t * v;
        }
        let coeffs = normal.solve(&rhs)?;
        let next: Vec<f64> = basis
            .iter()
            .map(|&(seg, t)| (1.0 - t) * coeffs[seg] + t * coeffs[seg + 1])
            .collect();
        let change = relative_change(&next, &fit);
        fit = next;
        if iter > 0 && change < TOLERANCE {
            break;
        }
        for (w, f) in work.iter_mut().zip(&fit) {
            *w = w.min(*f);
        }
    }
    Ok(fit)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn axis(n: usize) -> Vec<f64> {
        (0..n).map(|i| 1800.0 - 2.0 * i as f64).collect()
    }

    /// Sloped line plus one Gaussian band in the middle.
    fn peak_on_slope(x: &[f64]) -> (Vec<f64>, Vec<f64>) {
        let line: Vec<f64> = x.iter().map(|v| 0.001 * (v - 1600.0) + 0.2).collect();
        let y = x
            .iter()
            .zip(&line)
            .map(|(v, l)| l + (-((v - 1700.0) / 8.0).powi(2)).exp())
            .collect();
        (y, line)
    }

    fn corrected_is_flat_away_from_peak(method: BaselineMethod, tol: f64) {
        let x = axis(101);
        let (y, _) = peak_on_slope(&x);
        let out = correct(&x, &y, &method).unwrap();
        assert_eq!(out.corrected.len(), y.len());
        for i in [0, 5, 95, 100] {
            assert!(out.corrected[i].abs() < tol, "{method}: index {i} = {}", out.corrected[i]);
        }
        assert!(out.corrected[50] > 0.8, "{method}: peak lost");
        for ((c, b), v) in out.corrected.iter().zip(&out.baseline).zip(&y) {
            assert!((c + b - v).abs() < 1e-12);
        }
    }

    #[test]
    fn rubberband_removes_linear_background() {
        corrected_is_flat_away_from_peak(BaselineMethod::Rubberband, 1e-9);
    }

    #[test]
    fn polynomial_methods_remove_linear_background() {
        corrected_is_flat_away_from_peak(BaselineMethod::ModPoly { poly_order: 1, max_iter: 250 }, 0.05);
        corrected_is_flat_away_from_peak(BaselineMethod::IModPoly { poly_order: 1, max_iter: 50 }, 0.05);
    }

    #[test]
    fn asls_and_spline_track_background() {
        corrected_is_flat_away_from_peak(BaselineMethod::Asls { lam: 1e4, p: 0.01 }, 0.05);
        corrected_is_flat_away_from_peak(BaselineMethod::Spline { num_knots: 10 }, 0.05);
    }

    #[test]
    fn rubberband_handles_descending_axis() {
        let x = [4.0, 3.0, 2.0, 1.0, 0.0];
        let y = [1.0, 1.5, 5.0, 1.5, 1.0];
        let out = correct(&x, &y, &BaselineMethod::Rubberband).unwrap();
        assert_eq!(out.baseline, vec![1.0; 5]);
        assert_eq!(out.corrected, vec![0.0, 0.5, 4.0, 0.5, 0.0]);
    }

    #[test]
    fn parameter_domains() {
        let len = 20;
        let bad = [
            BaselineMethod::ModPoly { poly_order: 0, max_iter: 10 },
            BaselineMethod::ModPoly { poly_order: 20, max_iter: 10 },
            BaselineMethod::IModPoly { poly_order: 2, max_iter: 0 },
            BaselineMethod::Asls { lam: 0.0, p: 0.01 },
            BaselineMethod::Asls { lam: 1e5, p: 1.0 },
            BaselineMethod::Asls { lam: 1e5, p: 0.0 },
            BaselineMethod::Spline { num_knots: 1 },
            BaselineMethod::Spline { num_knots: 11 },
        ];
        for method in bad {
            assert!(method.validate(len).is_err(), "{method} should be rejected");
        }
        assert!(BaselineMethod::Spline { num_knots: 10 }.validate(len).is_ok());
    }

    #[test]
    fn rejects_bad_data() {
        let m = BaselineMethod::Rubberband;
        assert!(matches!(correct(&[], &[], &m), Err(EngineError::InvalidData(_))));
        assert!(matches!(
            correct(&[1.0, 2.0], &[f64::NAN, 1.0], &m),
            Err(EngineError::InvalidData(_))
        ));
    }

    #[test]
    fn loose_parts() {
        let params = serde_json::json!({"poly_order": "3", "num_iter": "20"});
        let m = BaselineMethod::from_parts("imodpoly", params.as_object().unwrap()).unwrap();
        assert_eq!(m, Some(BaselineMethod::IModPoly { poly_order: 3, max_iter: 20 }));

        let alias = BaselineMethod::from_parts("mixture_model", &ParamMap::new()).unwrap();
        assert_eq!(alias, Some(BaselineMethod::Spline { num_knots: 10 }));

        let asls = BaselineMethod::Asls { lam: 1e6, p: 0.01 };
        let (name, params) = asls.to_parts();
        assert_eq!(BaselineMethod::from_parts(name, &params).unwrap(), Some(asls));
        assert!(BaselineMethod::from_parts("airpls", &ParamMap::new()).is_err());
    }
}
