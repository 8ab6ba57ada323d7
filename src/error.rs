use std::fmt;

// ---------------------------------------------------------------------------
// Engine error taxonomy
// ---------------------------------------------------------------------------

/// Errors raised by the interval, smoothing, baseline and peak engine.
///
/// Every variant renders a message suitable for showing to a user as-is;
/// callers decide whether that ends up in a dialog, a log line or a batch
/// summary.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Malformed interval bounds (`lower >= upper`, non-finite, outside data).
    #[error("Invalid range: {0}")]
    InvalidRange(String),

    /// A method parameter outside its domain.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Fewer samples than an operation needs.
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    /// Empty, NaN/Inf or misaligned input arrays, or a missing derived array.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Zero or more than one detected peak inside a validation window.
    #[error("{reason} ({count} peaks in {lower:.2} - {upper:.2})")]
    AmbiguousPeakSelection {
        count: usize,
        lower: f64,
        upper: f64,
        reason: PeakSelectionFailure,
    },

    /// A spectrum or results file that cannot be interpreted.
    #[error("File format error: {0}")]
    FileFormat(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),
}

/// Why a single-peak validation window was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeakSelectionFailure {
    NoPeak,
    Ambiguous,
}

impl fmt::Display for PeakSelectionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeakSelectionFailure::NoPeak => write!(f, "no peak in range"),
            PeakSelectionFailure::Ambiguous => {
                write!(f, "ambiguous peak selection, narrow the range")
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        EngineError::InvalidParameter(message.into())
    }

    pub fn invalid_data(message: impl Into<String>) -> Self {
        EngineError::InvalidData(message.into())
    }

    pub fn insufficient_data(message: impl Into<String>) -> Self {
        EngineError::InsufficientData(message.into())
    }

    pub fn invalid_range(message: impl Into<String>) -> Self {
        EngineError::InvalidRange(message.into())
    }
}

/// Reject empty arrays and arrays holding NaN or infinite values.
pub(crate) fn ensure_finite(values: &[f64], what: &str) -> Result<()> {
    if values.is_empty() {
        return Err(EngineError::invalid_data(format!("{what} is empty")));
    }
    if let Some(i) = values.iter().position(|v| v.is_nan()) {
        return Err(EngineError::invalid_data(format!(
            "{what} contains NaN at index {i}"
        )));
    }
    if let Some(i) = values.iter().position(|v| v.is_infinite()) {
        return Err(EngineError::invalid_data(format!(
            "{what} contains an infinite value at index {i}"
        )));
    }
    Ok(())
}

/// Reject x/y pairs whose lengths differ.
pub(crate) fn ensure_aligned(x: &[f64], y: &[f64]) -> Result<()> {
    if x.len() != y.len() {
        return Err(EngineError::invalid_data(format!(
            "x has {} values but y has {}",
            x.len(),
            y.len()
        )));
    }
    Ok(())
}
