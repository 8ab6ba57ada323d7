//! Signal processing: wavenumber ranges, smoothing and baseline correction.
//!
//! ```text
//!   IntervalSet ──(scopes)──▶ smoothing::smooth ──▶ smoothed y
//!                                                     │
//!   spectrum y ───────────────────────────────────────┴─▶ baseline::correct ──▶ corrected y, baseline
//! ```

pub mod baseline;
pub mod filters;
pub mod interval;
pub mod numeric;
pub mod params;
pub mod smoothing;

pub use baseline::{BaselineCorrection, BaselineMethod, correct};
pub use interval::{Edge, GAP_TOLERANCE, Interval, IntervalSet};
pub use smoothing::{SmoothingMethod, smooth};
