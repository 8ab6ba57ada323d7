use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::analysis::{DetectedPeak, PeakRecord};
use crate::error::{EngineError, ensure_aligned};

// ---------------------------------------------------------------------------
// Spectra
// ---------------------------------------------------------------------------

/// Write one y array as `wavenumber,absorbance`.
pub fn write_spectrum(path: &Path, x: &[f64], y: &[f64]) -> Result<()> {
    ensure_aligned(x, y)?;
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("creating {}", path.display()))?;
    writer.write_record(["wavenumber", "absorbance"])?;
    for (a, b) in x.iter().zip(y) {
        writer.write_record([a.to_string(), b.to_string()])?;
    }
    writer.flush()?;
    log::info!("Spectrum written to {}", path.display());
    Ok(())
}

/// Raw data plus whichever derived arrays exist, one column each.
#[derive(Debug, Clone, Copy)]
pub struct ProcessedColumns<'a> {
    pub x: &'a [f64],
    pub raw: &'a [f64],
    pub smoothed: Option<&'a [f64]>,
    pub corrected: Option<&'a [f64]>,
}

/// Write `wavenumber,raw[,smoothed][,corrected]`.
///
/// With `metadata`, each `(key, value)` is written first as a `# key: value`
/// comment line; the loader skips those lines.
pub fn write_processed(path: &Path, columns: &ProcessedColumns<'_>, metadata: &[(&str, String)]) -> Result<()> {
    let derived: Vec<(&str, &[f64])> = [("smoothed", columns.smoothed), ("corrected", columns.corrected)]
        .into_iter()
        .filter_map(|(name, col)| col.map(|c| (name, c)))
        .collect();
    ensure_aligned(columns.x, columns.raw)?;
    for (_, col) in &derived {
        ensure_aligned(columns.x, col)?;
    }

    let mut out = BufWriter::new(File::create(path).with_context(|| format!("creating {}", path.display()))?);
    if !metadata.is_empty() {
        writeln!(out, "# FTIR Spectral Data")?;
        for (key, value) in metadata {
            writeln!(out, "# {key}: {value}")?;
        }
        writeln!(out, "#")?;
    }

    let mut writer = csv::Writer::from_writer(out);
    let mut header = vec!["wavenumber", "raw"];
    header.extend(derived.iter().map(|(name, _)| *name));
    writer.write_record(&header)?;
    for i in 0..columns.x.len() {
        let mut row = vec![columns.x[i].to_string(), columns.raw[i].to_string()];
        row.extend(derived.iter().map(|(_, col)| col[i].to_string()));
        writer.write_record(&row)?;
    }
    writer.flush()?;
    log::info!("Processed data written to {}", path.display());
    Ok(())
}

// ---------------------------------------------------------------------------
// Peak list
// ---------------------------------------------------------------------------

/// Write `peak_number,wavenumber,height`, numbered from 1.
pub fn write_peak_list(path: &Path, peaks: &[DetectedPeak]) -> Result<()> {
    if peaks.is_empty() {
        return Err(EngineError::invalid_data("no peaks to export").into());
    }
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("creating {}", path.display()))?;
    writer.write_record(["peak_number", "wavenumber", "height"])?;
    for (i, p) in peaks.iter().enumerate() {
        writer.write_record([(i + 1).to_string(), p.wavenumber.to_string(), p.height.to_string()])?;
    }
    writer.flush()?;
    log::info!("{} peaks written to {}", peaks.len(), path.display());
    Ok(())
}

// ---------------------------------------------------------------------------
// Peak analysis results
// ---------------------------------------------------------------------------

/// One row of the results table as stored on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    pub file_name: String,
    pub sequence_number: usize,
    pub wavenumber: f64,
    pub uncorrected_height: f64,
    pub corrected_height: f64,
    pub lower_limit: f64,
    pub upper_limit: f64,
    pub uncorrected_area: f64,
    pub corrected_area: f64,
}

impl From<&PeakRecord> for ResultRow {
    fn from(r: &PeakRecord) -> Self {
        ResultRow {
            file_name: r.dataset.clone(),
            sequence_number: r.sequence_number,
            wavenumber: r.metrics.wavenumber,
            uncorrected_height: r.metrics.uncorrected_height,
            corrected_height: r.metrics.corrected_height,
            lower_limit: r.interval.lower(),
            upper_limit: r.interval.upper(),
            uncorrected_area: r.metrics.uncorrected_area,
            corrected_area: r.metrics.corrected_area,
        }
    }
}

const RESULT_COLUMNS: [&str; 9] = [
    "file_name",
    "sequence_number",
    "wavenumber",
    "uncorrected_height",
    "corrected_height",
    "lower_limit",
    "upper_limit",
    "uncorrected_area",
    "corrected_area",
];

/// Write the results table. Wavenumbers and bounds carry 2 decimals,
/// heights and areas 4.
pub fn write_results(path: &Path, records: &[PeakRecord]) -> Result<()> {
    if records.is_empty() {
        return Err(EngineError::invalid_data("no analysis results to export").into());
    }
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("creating {}", path.display()))?;
    writer.write_record(RESULT_COLUMNS)?;
    for row in records.iter().map(ResultRow::from) {
        writer.write_record([
            row.file_name,
            row.sequence_number.to_string(),
            format!("{:.2}", row.wavenumber),
            format!("{:.4}", row.uncorrected_height),
            format!("{:.4}", row.corrected_height),
            format!("{:.2}", row.lower_limit),
            format!("{:.2}", row.upper_limit),
            format!("{:.4}", row.uncorrected_area),
            format!("{:.4}", row.corrected_area),
        ])?;
    }
    writer.flush()?;
    log::info!("{} analysis results written to {}", records.len(), path.display());
    Ok(())
}

/// Read a results table written by [`write_results`].
pub fn read_results(path: &Path) -> Result<Vec<ResultRow>> {
    let mut reader = csv::Reader::from_path(path).with_context(|| format!("opening {}", path.display()))?;
    let headers = reader.headers()?.clone();
    if let Some(missing) = RESULT_COLUMNS.iter().find(|c| !headers.iter().any(|h| h == **c)) {
        return Err(EngineError::FileFormat(format!("results file is missing column '{missing}'")).into());
    }
    reader
        .deserialize::<ResultRow>()
        .enumerate()
        .map(|(i, row)| row.with_context(|| format!("results row {i}")))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{AnalysisRegistry, PeakMetrics};
    use crate::processing::Interval;

    fn registry() -> AnalysisRegistry {
        let mut reg = AnalysisRegistry::new();
        for (i, (lo, hi)) in [(1490.123, 1510.987), (1600.0, 1655.5)].into_iter().enumerate() {
            let metrics = PeakMetrics {
                wavenumber: lo + 10.0 + i as f64,
                lower: lo,
                upper: hi,
                uncorrected_height: 0.123456,
                corrected_height: 0.1,
                uncorrected_area: 2.5,
                corrected_area: 1.25,
            };
            reg.add("sample A", Interval::new(lo, hi).unwrap(), metrics);
        }
        reg
    }

    #[test]
    fn results_round_trip_to_two_decimals() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.csv");
        let reg = registry();
        write_results(&path, reg.records()).unwrap();

        let rows = read_results(&path).unwrap();
        assert_eq!(rows.len(), 2);
        for (row, rec) in rows.iter().zip(reg.records()) {
            assert_eq!(row.file_name, "sample A");
            assert_eq!(row.sequence_number, rec.sequence_number);
            assert!((row.wavenumber - rec.wavenumber()).abs() <= 0.005 + 1e-9);
            assert!((row.lower_limit - rec.interval.lower()).abs() <= 0.005 + 1e-9);
            assert!((row.upper_limit - rec.interval.upper()).abs() <= 0.005 + 1e-9);
        }
        assert_eq!(rows[0].uncorrected_height, 0.1235);
    }

    #[test]
    fn processed_columns_follow_available_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.csv");
        let cols = ProcessedColumns {
            x: &[1.0, 2.0],
            raw: &[0.5, 0.25],
            smoothed: None,
            corrected: Some(&[0.0, 0.1]),
        };
        write_processed(&path, &cols, &[("Data Points", "2".to_string())]).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("# FTIR Spectral Data\n# Data Points: 2\n#\n"));
        assert!(text.contains("wavenumber,raw,corrected\n1,0.5,0\n2,0.25,0.1\n"));
    }

    #[test]
    fn peak_list_is_numbered() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("peaks.csv");
        let peaks = [
            DetectedPeak { wavenumber: 1700.5, height: 0.9, index: 3 },
            DetectedPeak { wavenumber: 1600.0, height: 0.4, index: 9 },
        ];
        write_peak_list(&path, &peaks).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "peak_number,wavenumber,height\n1,1700.5,0.9\n2,1600,0.4\n");
        assert!(write_peak_list(&path, &[]).is_err());
    }

    #[test]
    fn spectrum_export_has_no_bom() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.csv");
        write_spectrum(&path, &[1.0], &[2.0]).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "wavenumber,absorbance\n1,2\n");
    }
}
