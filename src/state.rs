use std::path::Path;

use crate::analysis::{
    AnalysisRegistry, DetectedPeak, PeakRecord, auto_windows, find_peaks, quantify, quantify_fixed_window,
};
use crate::data::export::{self, ProcessedColumns};
use crate::data::{ActiveDatasetSelector, DataKind, SpectrumStore, loader};
use crate::error::{EngineError, Result};
use crate::processing::{BaselineMethod, Interval, IntervalSet, SmoothingMethod, correct, smooth};

// ---------------------------------------------------------------------------
// Session state
// ---------------------------------------------------------------------------

/// Everything an interactive session works on, independent of rendering.
#[derive(Debug, Default)]
pub struct Session {
    /// Every loaded dataset.
    pub store: SpectrumStore,

    /// The dataset peak work targets.
    pub selector: ActiveDatasetSelector,

    /// Ranges smoothing is restricted to; empty smooths everything.
    pub smoothing_ranges: IntervalSet,

    /// Ranges drawn for peak integration.
    pub integration_ranges: IntervalSet,

    /// Peaks from the last detection on the active dataset.
    pub peaks: Vec<DetectedPeak>,

    /// Array the last detection ran on; quantification reads the same one.
    pub peak_source: DataKind,

    pub registry: AnalysisRegistry,

    /// Outcome of the last operation, for display.
    pub status_message: Option<String>,
}

/// A dataset the fixed-window analysis could not measure.
#[derive(Debug)]
pub struct DatasetFailure {
    pub dataset: String,
    pub error: EngineError,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    // -- Datasets -----------------------------------------------------------

    /// Load every spectrum in `path`. The first one becomes active when
    /// nothing is active yet.
    pub fn load(&mut self, path: &Path) -> anyhow::Result<Vec<String>> {
        let entries = match loader::load_file(path) {
            Ok(entries) => entries,
            Err(e) => {
                self.status_message = Some(format!("Error loading {}: {e:#}", path.display()));
                return Err(e);
            }
        };
        let names: Vec<String> = entries.iter().map(|e| e.name.clone()).collect();
        for entry in entries {
            self.store.insert(entry);
        }
        if self.selector.active().is_none() {
            if let Some(first) = names.first() {
                self.activate(first)?;
            }
        }
        self.status_message = Some(format!("Loaded {} spectra from {}", names.len(), path.display()));
        Ok(names)
    }

    pub fn remove(&mut self, name: &str) -> bool {
        let removed = self.store.remove(name).is_some();
        self.selector.sync(&self.store);
        if self.selector.active().is_none() {
            self.reset_active_view();
        }
        removed
    }

    /// Make `name` the active dataset. Previous peaks are dropped and the
    /// interval sets are clipped to its wavenumber range.
    pub fn activate(&mut self, name: &str) -> Result<()> {
        self.selector.activate(&self.store, name)?;
        self.peaks.clear();
        if let Some(entry) = self.store.get(name) {
            let range = entry.spectrum.x_range();
            self.smoothing_ranges.bind_to(range);
            self.integration_ranges.bind_to(range);
        }
        self.status_message = Some(format!("Active dataset: {name}"));
        Ok(())
    }

    pub fn deactivate(&mut self) {
        self.selector.deactivate();
        self.reset_active_view();
    }

    fn reset_active_view(&mut self) {
        self.peaks.clear();
        self.smoothing_ranges.unbind();
        self.integration_ranges.unbind();
    }

    fn active_name(&self) -> Result<String> {
        self.selector
            .active()
            .map(str::to_string)
            .ok_or_else(|| EngineError::invalid_data("no active dataset"))
    }

    // -- Processing ---------------------------------------------------------

    /// Smooth the active dataset's raw data inside the smoothing ranges.
    pub fn smooth(&mut self, method: &SmoothingMethod) -> Result<()> {
        let result = self.smooth_active(method);
        self.report(result, |_| format!("Applied {method} smoothing"))
    }

    fn smooth_active(&mut self, method: &SmoothingMethod) -> Result<()> {
        let name = self.active_name()?;
        let (x, y) = self.store.data(&name, DataKind::Original)?;
        let smoothed = smooth(x, y, self.smoothing_ranges.intervals(), method)?;
        self.store.set_smoothed(&name, smoothed)
    }

    pub fn reset_smoothing(&mut self) -> Result<()> {
        let name = self.active_name()?;
        self.store.clear_smoothed(&name)
    }

    /// Correct the active dataset's `source` array over the whole spectrum.
    pub fn correct_baseline(&mut self, method: &BaselineMethod, source: DataKind) -> Result<()> {
        let result = self.correct_active(method, source);
        self.report(result, |_| format!("Applied {method} baseline correction to {source} data"))
    }

    fn correct_active(&mut self, method: &BaselineMethod, source: DataKind) -> Result<()> {
        let name = self.active_name()?;
        let (x, y) = self.store.data(&name, source)?;
        let result = correct(x, y, method)?;
        self.store.set_corrected(&name, result.corrected, result.baseline)
    }

    // -- Peaks --------------------------------------------------------------

    pub fn find_peaks(&mut self, threshold: f64, distance: usize, source: DataKind) -> Result<&[DetectedPeak]> {
        let result = self.find_active_peaks(threshold, distance, source);
        self.report(result, |n| format!("Found {n} peaks in {source} data"))?;
        Ok(&self.peaks)
    }

    fn find_active_peaks(&mut self, threshold: f64, distance: usize, source: DataKind) -> Result<usize> {
        let name = self.active_name()?;
        let (x, y) = self.store.data(&name, source)?;
        self.peaks = find_peaks(x, y, threshold, distance)?;
        self.peak_source = source;
        Ok(self.peaks.len())
    }

    /// Quantify the single detected peak inside `[lower, upper]` and record it.
    ///
    /// Nothing is recorded unless exactly one peak falls in the range.
    pub fn add_peak_to_analysis(&mut self, lower: f64, upper: f64) -> Result<&PeakRecord> {
        let result = self.add_peak(lower, upper);
        match result {
            Ok(_) => {
                let record = self
                    .registry
                    .records()
                    .last()
                    .ok_or_else(|| EngineError::invalid_data("record was not stored"))?;
                self.status_message = Some(format!(
                    "Peak {} added at {:.2} cm-1",
                    record.sequence_number,
                    record.wavenumber()
                ));
                Ok(record)
            }
            Err(e) => {
                self.status_message = Some(e.to_string());
                Err(e)
            }
        }
    }

    fn add_peak(&mut self, lower: f64, upper: f64) -> Result<()> {
        let name = self.active_name()?;
        let peak = AnalysisRegistry::validate_single_peak(&self.peaks, lower, upper)?;
        let interval = Interval::normalized(lower, upper)?;
        let (x, y) = self.store.data(&name, self.peak_source)?;
        let metrics = quantify(x, y, peak.wavenumber, interval.lower(), interval.upper())?;
        self.registry.add(&name, interval, metrics);
        Ok(())
    }

    /// Record every detected peak using windows that meet halfway between
    /// neighbours. Windows that cannot be quantified are skipped.
    pub fn analyse_all_peaks(&mut self) -> Result<usize> {
        let result = self.analyse_all();
        self.report(result, |n| format!("Added {n} peaks to analysis"))
    }

    fn analyse_all(&mut self) -> Result<usize> {
        let name = self.active_name()?;
        if self.peaks.is_empty() {
            return Err(EngineError::invalid_data("no detected peaks, run peak detection first"));
        }
        let (x, y) = self.store.data(&name, self.peak_source)?;
        let mut added = 0;
        for (peak, window) in auto_windows(&self.peaks) {
            match quantify(x, y, peak.wavenumber, window.lower(), window.upper()) {
                Ok(metrics) => {
                    self.registry.add(&name, window, metrics);
                    added += 1;
                }
                Err(e) => log::warn!("Skipping peak at {:.2}: {e}", peak.wavenumber),
            }
        }
        Ok(added)
    }

    /// Quantify the tallest point of `[lower, upper]` in every loaded dataset.
    ///
    /// Datasets lacking `source` data or points in the window are returned
    /// as failures; the others are recorded.
    pub fn analyse_fixed_window(&mut self, lower: f64, upper: f64, source: DataKind) -> Result<Vec<DatasetFailure>> {
        let interval = Interval::normalized(lower, upper)?;
        let mut failures = Vec::new();
        let mut added = 0;
        for entry in self.store.entries() {
            let measured = self
                .store
                .data(&entry.name, source)
                .and_then(|(x, y)| quantify_fixed_window(x, y, interval.lower(), interval.upper()));
            match measured {
                Ok(metrics) => {
                    self.registry.add(&entry.name, interval, metrics);
                    added += 1;
                }
                Err(error) => {
                    log::warn!("Fixed window {interval} failed for '{}': {error}", entry.name);
                    failures.push(DatasetFailure {
                        dataset: entry.name.clone(),
                        error,
                    });
                }
            }
        }
        self.status_message = Some(format!(
            "Fixed window {interval}: {added} datasets analysed, {} failed",
            failures.len()
        ));
        Ok(failures)
    }

    /// The active dataset's record whose range contains `x`.
    pub fn record_at(&self, x: f64) -> Option<&PeakRecord> {
        let name = self.selector.active()?;
        self.registry.find_by_point(name, x)
    }

    /// Delete the active dataset's record under `x`, if any.
    pub fn delete_record_at(&mut self, x: f64) -> Option<PeakRecord> {
        let (dataset, seq, interval) = {
            let r = self.record_at(x)?;
            (r.dataset.clone(), r.sequence_number, r.interval)
        };
        let removed = self
            .registry
            .delete(&dataset, seq, interval.lower(), interval.upper())?;
        self.status_message = Some(format!("Deleted peak {} ({})", removed.sequence_number, removed.interval));
        Some(removed)
    }

    // -- Export -------------------------------------------------------------

    /// Write one array of the active dataset as `wavenumber,absorbance`.
    pub fn export_spectrum(&self, path: &Path, kind: DataKind) -> anyhow::Result<()> {
        let name = self.active_name()?;
        let (x, y) = self.store.data(&name, kind)?;
        export::write_spectrum(path, x, y)
    }

    /// Write the active dataset with every derived array it has.
    pub fn export_processed(&self, path: &Path) -> anyhow::Result<()> {
        let name = self.active_name()?;
        let entry = self
            .store
            .get(&name)
            .ok_or_else(|| EngineError::invalid_data(format!("dataset '{name}' is not loaded")))?;
        let columns = ProcessedColumns {
            x: entry.x(),
            raw: entry.spectrum.y(),
            smoothed: entry.y(DataKind::Smoothed),
            corrected: entry.y(DataKind::Corrected),
        };
        let metadata = [
            ("Dataset", name.clone()),
            ("Data Points", entry.spectrum.len().to_string()),
            ("Export Date", chrono::Local::now().to_rfc3339()),
        ];
        export::write_processed(path, &columns, &metadata)
    }

    pub fn export_peaks(&self, path: &Path) -> anyhow::Result<()> {
        export::write_peak_list(path, &self.peaks)
    }

    pub fn export_results(&self, path: &Path) -> anyhow::Result<()> {
        export::write_results(path, self.registry.records())
    }

    fn report<T>(&mut self, result: Result<T>, message: impl FnOnce(&T) -> String) -> Result<T> {
        self.status_message = Some(match &result {
            Ok(value) => message(value),
            Err(e) => {
                log::error!("{e}");
                e.to_string()
            }
        });
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{DatasetEntry, Spectrum};

    /// Two Gaussian bands on a sloped background, descending axis.
    fn sample(name: &str, scale: f64) -> DatasetEntry {
        let x: Vec<f64> = (0..400).map(|i| 1800.0 - i as f64).collect();
        let y = x
            .iter()
            .map(|&w| {
                0.05 + 0.0001 * (1800.0 - w)
                    + scale * (-((w - 1700.0) / 8.0_f64).powi(2)).exp()
                    + 0.5 * scale * (-((w - 1550.0) / 8.0_f64).powi(2)).exp()
            })
            .collect();
        DatasetEntry::new(name, Spectrum::new(x, y).unwrap())
    }

    fn session() -> Session {
        let mut s = Session::new();
        s.store.insert(sample("a", 1.0));
        s.store.insert(sample("b", 2.0));
        s.activate("a").unwrap();
        s
    }

    #[test]
    fn operations_need_an_active_dataset() {
        let mut s = Session::new();
        s.store.insert(sample("a", 1.0));
        assert!(s.find_peaks(0.1, 1, DataKind::Original).is_err());
        assert_eq!(s.status_message.as_deref(), Some("Invalid data: no active dataset"));
    }

    #[test]
    fn derived_arrays_flow_into_peak_detection() {
        let mut s = session();
        assert!(s.correct_baseline(&BaselineMethod::Rubberband, DataKind::Smoothed).is_err());

        let method = SmoothingMethod::from_parts("savgol", &Default::default()).unwrap().unwrap();
        s.smooth(&method).unwrap();
        s.correct_baseline(&BaselineMethod::Rubberband, DataKind::Smoothed).unwrap();
        let peaks = s.find_peaks(0.2, 10, DataKind::Corrected).unwrap();
        assert_eq!(peaks.len(), 2);
        assert_eq!(s.peak_source, DataKind::Corrected);
    }

    #[test]
    fn add_peak_requires_a_single_peak() {
        let mut s = session();
        s.find_peaks(0.2, 10, DataKind::Original).unwrap();

        assert!(matches!(
            s.add_peak_to_analysis(1500.0, 1750.0),
            Err(EngineError::AmbiguousPeakSelection { count: 2, .. })
        ));
        assert!(s.registry.is_empty());

        let record = s.add_peak_to_analysis(1730.0, 1670.0).unwrap();
        assert_eq!(record.sequence_number, 1);
        assert_eq!(record.wavenumber(), 1700.0);
        assert_eq!(record.interval.lower(), 1670.0);
    }

    #[test]
    fn analyse_all_then_delete_by_point() {
        let mut s = session();
        s.find_peaks(0.2, 10, DataKind::Original).unwrap();
        assert_eq!(s.analyse_all_peaks().unwrap(), 2);

        let seq = s.record_at(1700.0).map(|r| r.sequence_number);
        assert!(seq.is_some());
        let removed = s.delete_record_at(1700.0).unwrap();
        assert_eq!(Some(removed.sequence_number), seq);
        assert_eq!(s.registry.len(), 1);
        assert!(s.delete_record_at(1700.0).is_none());
    }

    #[test]
    fn fixed_window_collects_failures() {
        let mut s = session();
        s.smooth(&SmoothingMethod::from_parts("moving_average", &Default::default()).unwrap().unwrap())
            .unwrap();

        let failures = s.analyse_fixed_window(1680.0, 1720.0, DataKind::Smoothed).unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].dataset, "b");
        assert_eq!(s.registry.len(), 1);

        let failures = s.analyse_fixed_window(1680.0, 1720.0, DataKind::Original).unwrap();
        assert!(failures.is_empty());
        assert_eq!(s.registry.len(), 3);
    }

    #[test]
    fn activation_binds_interval_sets() {
        let mut s = session();
        assert_eq!(s.smoothing_ranges.bounds(), Some((1401.0, 1800.0)));
        s.deactivate();
        assert_eq!(s.smoothing_ranges.bounds(), None);
        assert!(s.remove("a"));
        assert_eq!(s.store.len(), 1);
    }

    #[test]
    fn activation_clips_ranges_to_new_dataset() {
        let mut s = session();
        let narrow: Vec<f64> = (0..101).map(|i| 1650.0 - i as f64).collect();
        let y = vec![0.1; narrow.len()];
        s.store.insert(DatasetEntry::new("c", Spectrum::new(narrow, y).unwrap()));

        s.smoothing_ranges.insert(1500.0, 1700.0).unwrap();
        s.smoothing_ranges.insert(1750.0, 1790.0).unwrap();
        s.integration_ranges.insert(1410.0, 1500.0).unwrap();

        s.activate("c").unwrap();
        assert_eq!(s.smoothing_ranges.bounds(), Some((1550.0, 1650.0)));
        let kept: Vec<(f64, f64)> = s.smoothing_ranges.intervals().iter().map(|&iv| iv.into()).collect();
        assert_eq!(kept, vec![(1550.0, 1650.0)]);
        assert!(s.integration_ranges.is_empty());
    }

    #[test]
    fn load_activates_first_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("film.csv");
        std::fs::write(&path, "wavenumber,absorbance\n1000,0.1\n1002,0.3\n1004,0.2\n").unwrap();

        let mut s = Session::new();
        assert_eq!(s.load(&path).unwrap(), vec!["film".to_string()]);
        assert!(s.selector.is_active("film"));
        assert!(s.load(&dir.path().join("missing.csv")).is_err());
        assert!(s.status_message.unwrap().starts_with("Error loading"));
    }
}
