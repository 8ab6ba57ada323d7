use std::fmt;

use serde::{Deserialize, Serialize};

use serde_json::json;

use super::filters;
use super::interval::Interval;
use super::params::{ParamMap, get_f64, get_usize};
use crate::error::{EngineError, Result, ensure_aligned, ensure_finite};

// ---------------------------------------------------------------------------
// Method parameters
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SavgolParams {
    pub window_length: usize,
    pub polyorder: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LowessParams {
    pub frac: f64,
    #[serde(alias = "it")]
    pub iterations: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowParams {
    pub window_length: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GaussianParams {
    pub sigma: f64,
}

/// A smoothing algorithm together with its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum SmoothingMethod {
    Savgol(SavgolParams),
    Lowess(LowessParams),
    MovingAverage(WindowParams),
    Gaussian(GaussianParams),
    Median(WindowParams),
}

impl fmt::Display for SmoothingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SmoothingMethod::Savgol(p) => {
                write!(f, "savgol(window={}, poly={})", p.window_length, p.polyorder)
            }
            SmoothingMethod::Lowess(p) => {
                write!(f, "lowess(frac={}, iterations={})", p.frac, p.iterations)
            }
            SmoothingMethod::MovingAverage(p) => write!(f, "moving_average(window={})", p.window_length),
            SmoothingMethod::Gaussian(p) => write!(f, "gaussian(sigma={})", p.sigma),
            SmoothingMethod::Median(p) => write!(f, "median(window={})", p.window_length),
        }
    }
}

impl SmoothingMethod {
    /// Config/CLI name of the method.
    pub fn name(&self) -> &'static str {
        match self {
            SmoothingMethod::Savgol(_) => "savgol",
            SmoothingMethod::Lowess(_) => "lowess",
            SmoothingMethod::MovingAverage(_) => "moving_average",
            SmoothingMethod::Gaussian(_) => "gaussian",
            SmoothingMethod::Median(_) => "median",
        }
    }

    /// Build a method from its config name and a loose parameter map.
    ///
    /// An empty name or `"none"` means no smoothing. Missing parameters take
    /// their defaults, and caller conventions are applied before validation.
    pub fn from_parts(name: &str, params: &ParamMap) -> Result<Option<Self>> {
        let method = match name.trim().to_ascii_lowercase().as_str() {
            "" | "none" => return Ok(None),
            "savgol" | "savitzky_golay" => SmoothingMethod::Savgol(SavgolParams {
                window_length: get_usize(params, &["window_length"], 11)?,
                polyorder: get_usize(params, &["polyorder"], 3)?,
            }),
            "lowess" => SmoothingMethod::Lowess(LowessParams {
                frac: get_f64(params, &["frac"], 0.2)?,
                iterations: get_usize(params, &["it", "iterations"], 3)?,
            }),
            "moving_average" => SmoothingMethod::MovingAverage(WindowParams {
                window_length: get_usize(params, &["window_length"], 5)?,
            }),
            "gaussian" => SmoothingMethod::Gaussian(GaussianParams {
                sigma: get_f64(params, &["sigma"], 1.0)?,
            }),
            "median" => SmoothingMethod::Median(WindowParams {
                window_length: get_usize(params, &["window_length"], 5)?,
            }),
            other => {
                return Err(EngineError::invalid_parameter(format!(
                    "unknown smoothing method '{other}'"
                )))
            }
        };
        let method = method.with_caller_conventions();
        method.validate_params()?;
        Ok(Some(method))
    }

    /// Inverse of [`from_parts`](Self::from_parts).
    pub fn to_parts(&self) -> (&'static str, ParamMap) {
        let value = match *self {
            SmoothingMethod::Savgol(p) => {
                json!({"window_length": p.window_length, "polyorder": p.polyorder})
            }
            SmoothingMethod::Lowess(p) => json!({"frac": p.frac, "it": p.iterations}),
            SmoothingMethod::MovingAverage(p) | SmoothingMethod::Median(p) => {
                json!({"window_length": p.window_length})
            }
            SmoothingMethod::Gaussian(p) => json!({"sigma": p.sigma}),
        };
        let params = match value {
            serde_json::Value::Object(map) => map,
            _ => ParamMap::new(),
        };
        (self.name(), params)
    }

    /// Bump even Savitzky-Golay and median windows to the next odd length,
    /// the convention every front end applies before dispatch.
    pub fn with_caller_conventions(self) -> Self {
        let odd = |w: usize| if w % 2 == 0 { w + 1 } else { w };
        match self {
            SmoothingMethod::Savgol(p) => SmoothingMethod::Savgol(SavgolParams {
                window_length: odd(p.window_length),
                ..p
            }),
            SmoothingMethod::Median(p) => SmoothingMethod::Median(WindowParams {
                window_length: odd(p.window_length),
            }),
            other => other,
        }
    }

    /// Checks that do not depend on the data.
    pub fn validate_params(&self) -> Result<()> {
        match *self {
            SmoothingMethod::Savgol(p) => {
                if p.window_length % 2 == 0 {
                    return Err(EngineError::invalid_parameter(format!(
                        "savgol window length must be odd, got {}",
                        p.window_length
                    )));
                }
                if p.polyorder >= p.window_length {
                    return Err(EngineError::invalid_parameter(format!(
                        "savgol polynomial order ({}) must be less than window length ({})",
                        p.polyorder, p.window_length
                    )));
                }
            }
            SmoothingMethod::Lowess(p) => {
                if !(p.frac > 0.0 && p.frac <= 1.0) {
                    return Err(EngineError::invalid_parameter(format!(
                        "lowess fraction must be in (0, 1], got {}",
                        p.frac
                    )));
                }
                if p.iterations < 1 {
                    return Err(EngineError::invalid_parameter(format!(
                        "lowess iteration count must be at least 1, got {}",
                        p.iterations
                    )));
                }
            }
            SmoothingMethod::MovingAverage(p) => {
                if p.window_length < 1 {
                    return Err(EngineError::invalid_parameter(
                        "moving average window length must be at least 1",
                    ));
                }
            }
            SmoothingMethod::Median(p) => {
                if p.window_length < 1 {
                    return Err(EngineError::invalid_parameter(
                        "median window length must be at least 1",
                    ));
                }
                if p.window_length % 2 == 0 {
                    return Err(EngineError::invalid_parameter(format!(
                        "median window length must be odd, got {}",
                        p.window_length
                    )));
                }
            }
            SmoothingMethod::Gaussian(p) => {
                if !(p.sigma > 0.0) || !p.sigma.is_finite() {
                    return Err(EngineError::invalid_parameter(format!(
                        "gaussian sigma must be greater than 0, got {}",
                        p.sigma
                    )));
                }
            }
        }
        Ok(())
    }

    /// Full validation against a subset of `len` samples.
    pub fn validate(&self, len: usize) -> Result<()> {
        self.validate_params()?;
        let window = match *self {
            SmoothingMethod::Savgol(p) => Some(p.window_length),
            SmoothingMethod::MovingAverage(p) | SmoothingMethod::Median(p) => Some(p.window_length),
            SmoothingMethod::Lowess(_) | SmoothingMethod::Gaussian(_) => None,
        };
        if let Some(window) = window {
            if window > len {
                return Err(EngineError::invalid_parameter(format!(
                    "{} window length ({window}) cannot exceed data length ({len})",
                    self.name()
                )));
            }
        }
        Ok(())
    }

    fn apply(&self, x: &[f64], y: &[f64]) -> Result<Vec<f64>> {
        Ok(match *self {
            SmoothingMethod::Savgol(p) => filters::savgol(y, p.window_length, p.polyorder)?,
            SmoothingMethod::Lowess(p) => filters::lowess(x, y, p.frac, p.iterations)?,
            SmoothingMethod::MovingAverage(p) => filters::moving_average(y, p.window_length),
            SmoothingMethod::Gaussian(p) => filters::gaussian(y, p.sigma),
            SmoothingMethod::Median(p) => filters::median_filter(y, p.window_length),
        })
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Smooth `y` with `method`, restricted to `intervals`.
///
/// An empty interval list means the whole spectrum. The returned array starts
/// as a copy of `y`; only samples with `lower <= x <= upper` for some interval
/// are overwritten. Every non-empty subset is validated before any of them is
/// smoothed, and results land in a copy, so an error leaves nothing
/// half-applied.
pub fn smooth(x: &[f64], y: &[f64], intervals: &[Interval], method: &SmoothingMethod) -> Result<Vec<f64>> {
    ensure_aligned(x, y)?;
    ensure_finite(y, "intensity data")?;
    method.validate_params()?;

    let mut subsets: Vec<Vec<usize>> = Vec::new();
    if intervals.is_empty() {
        log::info!("No ranges selected, smoothing the whole spectrum");
        method.validate(x.len())?;
        subsets.push((0..x.len()).collect());
    } else {
        log::info!("Smoothing within {} ranges", intervals.len());
        for iv in intervals {
            let idx: Vec<usize> = (0..x.len()).filter(|&i| iv.contains(x[i])).collect();
            if idx.is_empty() {
                log::warn!("Range [{iv}] contains no data points, skipped");
                continue;
            }
            method
                .validate(idx.len())
                .inspect_err(|e| log::error!("Smoothing validation failed for range [{iv}]: {e}"))?;
            subsets.push(idx);
        }
    }

    let mut out = y.to_vec();
    for idx in subsets {
        let xs: Vec<f64> = idx.iter().map(|&i| x[i]).collect();
        let ys: Vec<f64> = idx.iter().map(|&i| y[i]).collect();
        let smoothed = method.apply(&xs, &ys)?;
        if smoothed.len() != idx.len() {
            return Err(EngineError::invalid_data(format!(
                "{method} returned {} values for {} samples",
                smoothed.len(),
                idx.len()
            )));
        }
        for (&i, v) in idx.iter().zip(smoothed) {
            out[i] = v;
        }
    }

    log::info!("Smoothing finished: {method}");
    Ok(out)
}
