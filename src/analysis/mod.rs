//! Peak detection, quantification and the record of analysed peaks.

pub mod peaks;
pub mod quantify;
pub mod registry;

pub use peaks::{DetectedPeak, find_peaks};
pub use quantify::{PeakMetrics, auto_windows, quantify, quantify_fixed_window};
pub use registry::{AnalysisRegistry, DELETE_TOLERANCE, PeakRecord, RecordId};
