use std::fmt;

use serde::{Deserialize, Serialize};

use super::peaks::DetectedPeak;
use super::quantify::PeakMetrics;
use crate::error::{EngineError, PeakSelectionFailure, Result};
use crate::processing::Interval;

/// Bound tolerance used when deleting a record by its identity.
pub const DELETE_TOLERANCE: f64 = 0.01;

/// Stable identity of a record; never reused within a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(u64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One quantified peak.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeakRecord {
    pub id: RecordId,
    pub dataset: String,
    /// Registry size + 1 at insertion time. Not renumbered on deletion.
    pub sequence_number: usize,
    pub interval: Interval,
    pub metrics: PeakMetrics,
}

impl PeakRecord {
    pub fn wavenumber(&self) -> f64 {
        self.metrics.wavenumber
    }
}

// ---------------------------------------------------------------------------
// AnalysisRegistry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct AnalysisRegistry {
    records: Vec<PeakRecord>,
    next_id: u64,
    delete_tolerance: f64,
}

impl Default for AnalysisRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AnalysisRegistry {
    pub fn new() -> Self {
        AnalysisRegistry {
            records: Vec::new(),
            next_id: 1,
            delete_tolerance: DELETE_TOLERANCE,
        }
    }

    pub fn with_delete_tolerance(delete_tolerance: f64) -> Self {
        AnalysisRegistry {
            delete_tolerance,
            ..Self::new()
        }
    }

    pub fn delete_tolerance(&self) -> f64 {
        self.delete_tolerance
    }

    pub fn records(&self) -> &[PeakRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Append a record. Nothing is deduplicated.
    pub fn add(&mut self, dataset: &str, interval: Interval, metrics: PeakMetrics) -> &PeakRecord {
        let record = PeakRecord {
            id: RecordId(self.next_id),
            dataset: dataset.to_string(),
            sequence_number: self.records.len() + 1,
            interval,
            metrics,
        };
        self.next_id += 1;
        log::info!(
            "Peak {} ({:.2} cm-1) added to analysis for '{dataset}', range {interval}",
            record.sequence_number,
            record.wavenumber()
        );
        let idx = self.records.len();
        self.records.push(record);
        &self.records[idx]
    }

    /// Return the one peak inside `[min(lower, upper), max(lower, upper)]`.
    ///
    /// Fails with [`EngineError::AmbiguousPeakSelection`] when the window
    /// holds no peak or more than one.
    pub fn validate_single_peak(peaks: &[DetectedPeak], lower: f64, upper: f64) -> Result<DetectedPeak> {
        let (lower, upper) = (lower.min(upper), lower.max(upper));
        let inside: Vec<&DetectedPeak> = peaks
            .iter()
            .filter(|p| lower <= p.wavenumber && p.wavenumber <= upper)
            .collect();

        match inside.as_slice() {
            [single] => {
                log::info!("Range {lower:.2} - {upper:.2} holds one peak at {:.2}", single.wavenumber);
                Ok(**single)
            }
            _ => {
                let reason = if inside.is_empty() {
                    PeakSelectionFailure::NoPeak
                } else {
                    PeakSelectionFailure::Ambiguous
                };
                let err = EngineError::AmbiguousPeakSelection {
                    count: inside.len(),
                    lower,
                    upper,
                    reason,
                };
                log::warn!("Range validation failed: {err}");
                Err(err)
            }
        }
    }

    /// The record of `dataset` whose interval contains `x`.
    pub fn find_by_point(&self, dataset: &str, x: f64) -> Option<&PeakRecord> {
        self.records
            .iter()
            .find(|r| r.dataset == dataset && r.interval.contains(x))
    }

    /// Remove the record matching `sequence_number` and both bounds within
    /// the delete tolerance. Returns `None` when nothing matched.
    pub fn delete(&mut self, dataset: &str, sequence_number: usize, lower: f64, upper: f64) -> Option<PeakRecord> {
        let tol = self.delete_tolerance;
        let pos = self.records.iter().position(|r| {
            r.dataset == dataset
                && r.sequence_number == sequence_number
                && (r.interval.lower() - lower).abs() < tol
                && (r.interval.upper() - upper).abs() < tol
        });
        match pos {
            Some(pos) => {
                let removed = self.records.remove(pos);
                log::info!(
                    "Deleted peak {} of '{dataset}', range {}",
                    removed.sequence_number,
                    removed.interval
                );
                Some(removed)
            }
            None => {
                log::warn!(
                    "No record {sequence_number} of '{dataset}' at {lower:.2} - {upper:.2}, nothing deleted"
                );
                None
            }
        }
    }

    pub fn delete_by_id(&mut self, id: RecordId) -> Option<PeakRecord> {
        let pos = self.records.iter().position(|r| r.id == id)?;
        Some(self.records.remove(pos))
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Dense 1..N numbers by current position, for display.
    pub fn display_numbers(&self) -> Vec<(RecordId, usize)> {
        self.records
            .iter()
            .enumerate()
            .map(|(i, r)| (r.id, i + 1))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peak(wavenumber: f64) -> DetectedPeak {
        DetectedPeak { wavenumber, height: 1.0, index: 0 }
    }

    fn metrics(lower: f64, upper: f64) -> PeakMetrics {
        PeakMetrics {
            wavenumber: (lower + upper) / 2.0,
            lower,
            upper,
            uncorrected_height: 1.0,
            corrected_height: 0.5,
            uncorrected_area: 10.0,
            corrected_area: 5.0,
        }
    }

    fn add(reg: &mut AnalysisRegistry, dataset: &str, lower: f64, upper: f64) -> (RecordId, usize) {
        let r = reg.add(dataset, Interval::new(lower, upper).unwrap(), metrics(lower, upper));
        (r.id, r.sequence_number)
    }

    #[test]
    fn single_peak_gate() {
        let peaks = [peak(1500.0), peak(1520.0)];
        let ok = AnalysisRegistry::validate_single_peak(&peaks, 1490.0, 1510.0).unwrap();
        assert_eq!(ok.wavenumber, 1500.0);

        match AnalysisRegistry::validate_single_peak(&peaks, 1530.0, 1490.0) {
            Err(EngineError::AmbiguousPeakSelection { count, reason, .. }) => {
                assert_eq!(count, 2);
                assert_eq!(reason, PeakSelectionFailure::Ambiguous);
            }
            other => panic!("expected ambiguous selection, got {other:?}"),
        }
        match AnalysisRegistry::validate_single_peak(&peaks, 1000.0, 1100.0) {
            Err(EngineError::AmbiguousPeakSelection { count: 0, reason, .. }) => {
                assert_eq!(reason, PeakSelectionFailure::NoPeak);
            }
            other => panic!("expected no peak, got {other:?}"),
        }
    }

    #[test]
    fn sequence_numbers_follow_size() {
        let mut reg = AnalysisRegistry::new();
        assert_eq!(add(&mut reg, "a", 0.0, 10.0).1, 1);
        assert_eq!(add(&mut reg, "a", 20.0, 30.0).1, 2);
        assert!(reg.delete("a", 1, 0.0, 10.0).is_some());
        // Size-driven numbering may repeat a number still in use.
        assert_eq!(add(&mut reg, "a", 40.0, 50.0).1, 2);
    }

    #[test]
    fn delete_by_identity() {
        let mut reg = AnalysisRegistry::new();
        add(&mut reg, "a", 1490.0, 1510.0);
        let before = reg.len();
        add(&mut reg, "a", 1600.0, 1650.0);

        assert!(reg.delete("a", 2, 1600.02, 1650.0).is_none());
        assert!(reg.delete("b", 2, 1600.0, 1650.0).is_none());
        assert!(reg.delete("a", 1, 1600.0, 1650.0).is_none());
        assert_eq!(reg.len(), before + 1);

        assert!(reg.delete("a", 2, 1600.005, 1649.995).is_some());
        assert_eq!(reg.len(), before);
    }

    #[test]
    fn tolerance_is_configurable() {
        let mut reg = AnalysisRegistry::with_delete_tolerance(0.5);
        add(&mut reg, "a", 10.0, 20.0);
        assert!(reg.delete("a", 1, 10.3, 19.8).is_some());
    }

    #[test]
    fn ids_are_never_reused() {
        let mut reg = AnalysisRegistry::new();
        let (first, _) = add(&mut reg, "a", 0.0, 10.0);
        let (second, _) = add(&mut reg, "a", 20.0, 30.0);
        assert!(reg.delete_by_id(first).is_some());
        assert!(reg.delete_by_id(first).is_none());
        let (third, _) = add(&mut reg, "a", 40.0, 50.0);
        assert!(third != first && third != second);
        assert_eq!(reg.display_numbers(), vec![(second, 1), (third, 2)]);
    }

    #[test]
    fn lookup_is_per_dataset() {
        let mut reg = AnalysisRegistry::new();
        add(&mut reg, "a", 0.0, 10.0);
        add(&mut reg, "b", 0.0, 10.0);
        assert_eq!(reg.find_by_point("b", 10.0).unwrap().dataset, "b");
        assert!(reg.find_by_point("a", 10.5).is_none());
        assert!(reg.find_by_point("c", 5.0).is_none());
        reg.clear();
        reg.clear();
        assert!(reg.is_empty());
    }
}
