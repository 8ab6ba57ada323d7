//! Saved processing parameters.
//!
//! Files are JSON with a small envelope around the body:
//!
//! ```json
//! {
//!   "version": "1.0",
//!   "created_at": "2024-05-01T10:12:00+02:00",
//!   "config": {
//!     "smoothing":     { "method": "savgol", "params": { "window_length": 11, "polyorder": 3 } },
//!     "baseline":      { "method": "asls", "params": { "lam": 1e6, "p": 0.01 }, "data_source": "smoothed" },
//!     "peak_analysis": { "threshold": 0.1, "distance": 10, "data_source": "corrected" }
//!   }
//! }
//! ```
//!
//! Files without `version` are older saves holding the body directly.
//! Parameter values may be numbers or numeric strings.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::data::DataKind;
use crate::error::EngineError;
use crate::processing::params::{ParamMap, get_f64, get_usize};
use crate::processing::{BaselineMethod, Interval, SmoothingMethod};

pub const CONFIG_VERSION: &str = "1.0";

pub const DEFAULT_PEAK_THRESHOLD: f64 = 0.1;
pub const DEFAULT_PEAK_DISTANCE: usize = 10;

// ---------------------------------------------------------------------------
// Typed configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct SmoothingStage {
    pub method: SmoothingMethod,
    /// Ranges to smooth; empty means the whole spectrum.
    pub ranges: Vec<Interval>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BaselineStage {
    pub method: BaselineMethod,
    /// `Smoothed` uses the smoothed array when one was produced.
    pub data_source: DataKind,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PeakStage {
    pub threshold: f64,
    pub distance: usize,
    pub data_source: DataKind,
}

impl Default for PeakStage {
    fn default() -> Self {
        PeakStage {
            threshold: DEFAULT_PEAK_THRESHOLD,
            distance: DEFAULT_PEAK_DISTANCE,
            data_source: DataKind::Original,
        }
    }
}

/// Smoothing, baseline and peak settings applied by the batch pipeline.
/// A `None` stage is skipped.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProcessingConfig {
    pub y_label: Option<String>,
    pub smoothing: Option<SmoothingStage>,
    pub baseline: Option<BaselineStage>,
    pub peak_analysis: Option<PeakStage>,
}

// ---------------------------------------------------------------------------
// On-disk form
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
struct RawConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    y_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    smoothing: Option<RawMethod>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    baseline: Option<RawMethod>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    peak_analysis: Option<ParamMap>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RawMethod {
    #[serde(default)]
    method: String,
    #[serde(default)]
    params: ParamMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data_source: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    ranges: Vec<Interval>,
}

#[derive(Debug, Serialize)]
struct Envelope<'a> {
    version: &'a str,
    created_at: String,
    config: Value,
}

impl ProcessingConfig {
    /// The configuration `config-template` writes out.
    pub fn template() -> Self {
        ProcessingConfig {
            y_label: Some("Absorbance".to_string()),
            smoothing: SmoothingMethod::from_parts("savgol", &ParamMap::new())
                .ok()
                .flatten()
                .map(|method| SmoothingStage { method, ranges: Vec::new() }),
            baseline: BaselineMethod::from_parts("asls", &ParamMap::new())
                .ok()
                .flatten()
                .map(|method| BaselineStage { method, data_source: DataKind::Smoothed }),
            peak_analysis: Some(PeakStage {
                data_source: DataKind::Corrected,
                ..PeakStage::default()
            }),
        }
    }

    /// Build from the config body (the object under `config`).
    pub fn from_body(body: &Value) -> crate::error::Result<Self> {
        let raw: RawConfig = serde_json::from_value(body.clone())?;

        let smoothing = match raw.smoothing {
            Some(s) => SmoothingMethod::from_parts(&s.method, &s.params)?
                .map(|method| SmoothingStage { method, ranges: s.ranges }),
            None => None,
        };
        let baseline = match raw.baseline {
            Some(b) => BaselineMethod::from_parts(&b.method, &b.params)?.map(|method| BaselineStage {
                method,
                data_source: DataKind::from_source(b.data_source.as_deref().unwrap_or("")),
            }),
            None => None,
        };
        let peak_analysis = match raw.peak_analysis {
            Some(p) => {
                let stage = PeakStage {
                    threshold: get_f64(&p, &["threshold"], DEFAULT_PEAK_THRESHOLD)?,
                    distance: get_usize(&p, &["distance"], DEFAULT_PEAK_DISTANCE)?,
                    data_source: DataKind::from_source(
                        p.get("data_source").and_then(Value::as_str).unwrap_or(""),
                    ),
                };
                if stage.threshold < 0.0 || stage.distance < 1 {
                    return Err(EngineError::invalid_parameter(format!(
                        "peak threshold must be >= 0 and distance >= 1, got {} and {}",
                        stage.threshold, stage.distance
                    )));
                }
                Some(stage)
            }
            None => None,
        };

        Ok(ProcessingConfig {
            y_label: raw.y_label,
            smoothing,
            baseline,
            peak_analysis,
        })
    }

    /// The config body in its on-disk form.
    pub fn to_body(&self) -> Value {
        let raw = RawConfig {
            y_label: self.y_label.clone(),
            smoothing: self.smoothing.as_ref().map(|s| {
                let (method, params) = s.method.to_parts();
                RawMethod {
                    method: method.to_string(),
                    params,
                    data_source: None,
                    ranges: s.ranges.clone(),
                }
            }),
            baseline: self.baseline.as_ref().map(|b| {
                let (method, params) = b.method.to_parts();
                RawMethod {
                    method: method.to_string(),
                    params,
                    data_source: Some(b.data_source.to_string()),
                    ranges: Vec::new(),
                }
            }),
            peak_analysis: self.peak_analysis.as_ref().and_then(|p| {
                json!({
                    "threshold": p.threshold,
                    "distance": p.distance,
                    "data_source": p.data_source,
                })
                .as_object()
                .cloned()
            }),
        };
        serde_json::to_value(raw).unwrap_or(Value::Null)
    }

    /// Parse a config file's text, with or without the envelope.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let root: Value = serde_json::from_str(text).context("parsing configuration JSON")?;
        let body = match root.get("version") {
            Some(version) => {
                log::debug!("Configuration version {version}");
                root.get("config")
                    .ok_or_else(|| EngineError::FileFormat("configuration has a version but no 'config' body".into()))?
            }
            None => {
                log::info!("Loading legacy configuration without a version field");
                &root
            }
        };
        Ok(Self::from_body(body)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config = Self::from_json_str(&text)
            .with_context(|| format!("Failed to load config file: {}", path.display()))?;
        log::info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let envelope = Envelope {
            version: CONFIG_VERSION,
            created_at: chrono::Local::now().to_rfc3339(),
            config: self.to_body(),
        };
        let text = serde_json::to_string_pretty(&envelope)?;
        std::fs::write(path, text).with_context(|| format!("Failed to write config file: {}", path.display()))?;
        log::info!("Configuration saved to {}", path.display());
        Ok(())
    }
}
