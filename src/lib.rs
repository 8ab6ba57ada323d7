//! FTIR spectrum processing: range selection, smoothing, baseline correction,
//! peak detection and peak quantification, plus batch runs over many files.
//!
//! ```text
//!   loader ─▶ SpectrumStore ─▶ smoothing ─▶ baseline ─▶ find_peaks ─▶ quantify ─▶ AnalysisRegistry ─▶ export
//!                                  ▲                                     ▲
//!                             IntervalSet                           IntervalSet
//! ```
//!
//! [`state::Session`] ties the pieces together for interactive use;
//! [`batch::BatchCoordinator`] applies a saved [`config::ProcessingConfig`]
//! to a list of files.

pub mod analysis;
pub mod batch;
pub mod config;
pub mod data;
pub mod error;
pub mod processing;
pub mod state;

pub use analysis::{AnalysisRegistry, DetectedPeak, PeakMetrics, PeakRecord};
pub use batch::{BatchCoordinator, BatchSummary};
pub use config::ProcessingConfig;
pub use data::{DataKind, Spectrum, SpectrumStore};
pub use error::{EngineError, Result};
pub use processing::{BaselineMethod, Interval, IntervalSet, SmoothingMethod};
pub use state::Session;
