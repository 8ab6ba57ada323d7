use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result, ensure_aligned, ensure_finite};

// ---------------------------------------------------------------------------
// DataKind – which y array of a dataset an operation reads
// ---------------------------------------------------------------------------

/// Selects the raw intensities or one of the derived arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataKind {
    #[default]
    Original,
    Smoothed,
    Corrected,
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataKind::Original => write!(f, "original"),
            DataKind::Smoothed => write!(f, "smoothed"),
            DataKind::Corrected => write!(f, "corrected"),
        }
    }
}

impl DataKind {
    /// Parse a config `data_source` value; anything unrecognised reads the
    /// original data.
    pub fn from_source(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "smoothed" => DataKind::Smoothed,
            "corrected" => DataKind::Corrected,
            "original" | "" => DataKind::Original,
            other => {
                log::warn!("Unknown data source '{other}', using original data");
                DataKind::Original
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Spectrum – one (wavenumber, intensity) pair of arrays
// ---------------------------------------------------------------------------

/// A validated FTIR spectrum.
///
/// `x` is strictly monotonic (ascending or descending), both arrays have the
/// same non-zero length and contain only finite values.
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrum {
    x: Vec<f64>,
    y: Vec<f64>,
}

impl Spectrum {
    pub fn new(x: Vec<f64>, y: Vec<f64>) -> Result<Self> {
        ensure_aligned(&x, &y)?;
        ensure_finite(&x, "wavenumber column")?;
        ensure_finite(&y, "intensity column")?;

        if x.len() > 1 {
            let ascending = x[1] > x[0];
            let monotonic = x
                .windows(2)
                .all(|w| if ascending { w[1] > w[0] } else { w[1] < w[0] });
            if !monotonic {
                return Err(EngineError::invalid_data(
                    "wavenumbers are not strictly monotonic",
                ));
            }
        }

        Ok(Spectrum { x, y })
    }

    /// Wavenumber axis (cm⁻¹).
    pub fn x(&self) -> &[f64] {
        &self.x
    }

    /// Raw intensities, aligned with `x`.
    pub fn y(&self) -> &[f64] {
        &self.y
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// Observed `(min, max)` of the wavenumber axis.
    pub fn x_range(&self) -> (f64, f64) {
        let first = self.x[0];
        let last = self.x[self.x.len() - 1];
        (first.min(last), first.max(last))
    }
}

// ---------------------------------------------------------------------------
// DatasetEntry – a named spectrum plus its derived arrays
// ---------------------------------------------------------------------------

/// One loaded dataset. Derived arrays are full length and index-aligned with
/// the spectrum's `x`.
#[derive(Debug, Clone)]
pub struct DatasetEntry {
    pub name: String,
    pub spectrum: Spectrum,
    smoothed: Option<Vec<f64>>,
    corrected: Option<Vec<f64>>,
    baseline: Option<Vec<f64>>,
}

impl DatasetEntry {
    pub fn new(name: impl Into<String>, spectrum: Spectrum) -> Self {
        DatasetEntry {
            name: name.into(),
            spectrum,
            smoothed: None,
            corrected: None,
            baseline: None,
        }
    }

    pub fn x(&self) -> &[f64] {
        self.spectrum.x()
    }

    /// The requested y array, if it has been produced.
    pub fn y(&self, kind: DataKind) -> Option<&[f64]> {
        match kind {
            DataKind::Original => Some(self.spectrum.y()),
            DataKind::Smoothed => self.smoothed.as_deref(),
            DataKind::Corrected => self.corrected.as_deref(),
        }
    }

    /// Baseline that produced the corrected array.
    pub fn baseline(&self) -> Option<&[f64]> {
        self.baseline.as_deref()
    }

    pub fn has(&self, kind: DataKind) -> bool {
        self.y(kind).is_some()
    }
}

// ---------------------------------------------------------------------------
// SpectrumStore – every loaded dataset, keyed by name
// ---------------------------------------------------------------------------

/// Owner of all loaded datasets. Insertion order is kept for display.
#[derive(Debug, Clone, Default)]
pub struct SpectrumStore {
    entries: Vec<DatasetEntry>,
}

impl SpectrumStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a dataset. A dataset with the same name is replaced wholesale,
    /// dropping its derived arrays.
    pub fn insert(&mut self, entry: DatasetEntry) {
        match self.entries.iter_mut().find(|e| e.name == entry.name) {
            Some(existing) => {
                log::info!("Reloaded dataset '{}'", entry.name);
                *existing = entry;
            }
            None => {
                log::info!(
                    "Loaded dataset '{}' ({} points)",
                    entry.name,
                    entry.spectrum.len()
                );
                self.entries.push(entry);
            }
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<DatasetEntry> {
        let idx = self.entries.iter().position(|e| e.name == name)?;
        Some(self.entries.remove(idx))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn get(&self, name: &str) -> Option<&DatasetEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn entries(&self) -> &[DatasetEntry] {
        &self.entries
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether data of `kind` is available for `name`.
    pub fn is_available(&self, name: &str, kind: DataKind) -> bool {
        self.get(name).is_some_and(|e| e.has(kind))
    }

    /// Borrow `(x, y)` for a dataset, failing with a readable reason when the
    /// dataset or the derived array does not exist yet.
    pub fn data(&self, name: &str, kind: DataKind) -> Result<(&[f64], &[f64])> {
        let entry = self
            .get(name)
            .ok_or_else(|| EngineError::invalid_data(format!("dataset '{name}' is not loaded")))?;
        let y = entry.y(kind).ok_or_else(|| {
            let hint = match kind {
                DataKind::Smoothed => "run smoothing first",
                DataKind::Corrected => "run baseline correction first",
                DataKind::Original => "",
            };
            EngineError::invalid_data(format!("no {kind} data for '{name}', {hint}"))
        })?;
        Ok((entry.x(), y))
    }

    pub fn set_smoothed(&mut self, name: &str, smoothed: Vec<f64>) -> Result<()> {
        let entry = self.get_mut(name)?;
        ensure_aligned(entry.x(), &smoothed)?;
        entry.smoothed = Some(smoothed);
        log::info!("Smoothed data updated for '{name}'");
        Ok(())
    }

    pub fn set_corrected(&mut self, name: &str, corrected: Vec<f64>, baseline: Vec<f64>) -> Result<()> {
        let entry = self.get_mut(name)?;
        ensure_aligned(entry.x(), &corrected)?;
        ensure_aligned(entry.x(), &baseline)?;
        entry.corrected = Some(corrected);
        entry.baseline = Some(baseline);
        log::info!("Corrected data updated for '{name}'");
        Ok(())
    }

    /// Drop the smoothed array (undo smoothing).
    pub fn clear_smoothed(&mut self, name: &str) -> Result<()> {
        self.get_mut(name)?.smoothed = None;
        Ok(())
    }

    fn get_mut(&mut self, name: &str) -> Result<&mut DatasetEntry> {
        self.entries
            .iter_mut()
            .find(|e| e.name == name)
            .ok_or_else(|| EngineError::invalid_data(format!("dataset '{name}' is not loaded")))
    }
}

// ---------------------------------------------------------------------------
// ActiveDatasetSelector – zero or one dataset targeted by peak work
// ---------------------------------------------------------------------------

/// Holds the name of the dataset peak detection and analysis act on.
///
/// Activating one dataset deactivates any other, so there is never more than
/// one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActiveDatasetSelector {
    active: Option<String>,
}

impl ActiveDatasetSelector {
    pub fn activate(&mut self, store: &SpectrumStore, name: &str) -> Result<()> {
        if store.get(name).is_none() {
            return Err(EngineError::invalid_data(format!(
                "cannot activate '{name}': dataset is not loaded"
            )));
        }
        self.active = Some(name.to_string());
        Ok(())
    }

    pub fn deactivate(&mut self) {
        self.active = None;
    }

    pub fn active(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn is_active(&self, name: &str) -> bool {
        self.active.as_deref() == Some(name)
    }

    /// Forget the selection if it points at a dataset no longer in `store`.
    pub fn sync(&mut self, store: &SpectrumStore) {
        if let Some(name) = &self.active {
            if store.get(name).is_none() {
                self.active = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str) -> DatasetEntry {
        let spectrum = Spectrum::new(vec![4000.0, 3998.0, 3996.0], vec![0.1, 0.2, 0.1]).unwrap();
        DatasetEntry::new(name, spectrum)
    }

    #[test]
    fn spectrum_rejects_bad_input() {
        assert!(Spectrum::new(vec![], vec![]).is_err());
        assert!(Spectrum::new(vec![1.0, 2.0], vec![1.0]).is_err());
        assert!(Spectrum::new(vec![1.0, f64::NAN], vec![1.0, 2.0]).is_err());
        assert!(Spectrum::new(vec![1.0, 2.0], vec![1.0, f64::INFINITY]).is_err());
        assert!(Spectrum::new(vec![1.0, 3.0, 2.0], vec![1.0, 1.0, 1.0]).is_err());
        assert!(Spectrum::new(vec![5.0], vec![1.0]).is_ok());
    }

    #[test]
    fn data_source_names() {
        assert_eq!(DataKind::from_source("Smoothed"), DataKind::Smoothed);
        assert_eq!(DataKind::from_source("corrected"), DataKind::Corrected);
        assert_eq!(DataKind::from_source("raw"), DataKind::Original);
    }

    #[test]
    fn descending_spectrum_range() {
        let sp = Spectrum::new(vec![4000.0, 3000.0, 2000.0], vec![0.0; 3]).unwrap();
        assert_eq!(sp.x_range(), (2000.0, 4000.0));
    }

    #[test]
    fn derived_data_availability() {
        let mut store = SpectrumStore::new();
        store.insert(entry("a"));
        assert!(store.is_available("a", DataKind::Original));
        assert!(!store.is_available("a", DataKind::Smoothed));

        let err = store.data("a", DataKind::Smoothed).unwrap_err();
        assert!(err.to_string().contains("run smoothing first"));

        store.set_smoothed("a", vec![0.0, 0.1, 0.0]).unwrap();
        assert!(store.is_available("a", DataKind::Smoothed));
        assert!(store.set_smoothed("a", vec![0.0]).is_err());

        store.set_corrected("a", vec![0.0; 3], vec![0.1; 3]).unwrap();
        assert_eq!(store.get("a").unwrap().baseline(), Some(&[0.1, 0.1, 0.1][..]));
    }

    #[test]
    fn reload_replaces_and_drops_derived_arrays() {
        let mut store = SpectrumStore::new();
        store.insert(entry("a"));
        store.set_smoothed("a", vec![0.0; 3]).unwrap();
        store.insert(entry("a"));
        assert_eq!(store.len(), 1);
        assert!(!store.is_available("a", DataKind::Smoothed));
    }

    #[test]
    fn selector_holds_at_most_one() {
        let mut store = SpectrumStore::new();
        store.insert(entry("a"));
        store.insert(entry("b"));

        let mut sel = ActiveDatasetSelector::default();
        assert!(sel.activate(&store, "missing").is_err());
        sel.activate(&store, "a").unwrap();
        sel.activate(&store, "b").unwrap();
        assert!(sel.is_active("b"));
        assert!(!sel.is_active("a"));

        store.remove("b");
        sel.sync(&store);
        assert_eq!(sel.active(), None);
    }
}
