//! Apply one [`ProcessingConfig`] to many files.
//!
//! Each file runs through smoothing, baseline correction and peak detection
//! independently; a failing file is recorded in the summary and the batch
//! moves on to the next one.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, unbounded};
use serde::{Deserialize, Serialize};

use crate::analysis::{DetectedPeak, find_peaks};
use crate::config::ProcessingConfig;
use crate::data::export::{self, ProcessedColumns};
use crate::data::{DataKind, loader};
use crate::processing::{correct, smooth};

pub const SUMMARY_FILE_NAME: &str = "batch_summary.json";

// ---------------------------------------------------------------------------
// Summary types
// ---------------------------------------------------------------------------

/// Outcome of one successfully processed file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileResult {
    pub input_file: String,
    pub filename: String,
    pub data_points: usize,
    pub processing_steps: Vec<String>,
    pub output_files: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peaks_found: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileError {
    pub file: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total_files: usize,
    pub successful: usize,
    pub failed: usize,
    pub timestamp: String,
    pub results: Vec<FileResult>,
    pub errors: Vec<FileError>,
    /// Set when the batch stopped early on request.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub cancelled: bool,
}

impl BatchSummary {
    fn new(results: Vec<FileResult>, errors: Vec<FileError>, cancelled: bool) -> Self {
        BatchSummary {
            total_files: results.len() + errors.len(),
            successful: results.len(),
            failed: errors.len(),
            timestamp: chrono::Local::now().to_rfc3339(),
            results,
            errors,
            cancelled,
        }
    }

    /// Write the summary as pretty JSON to `dir/batch_summary.json`.
    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(SUMMARY_FILE_NAME);
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, text).with_context(|| format!("writing {}", path.display()))?;
        log::info!("Batch summary written to {}", path.display());
        Ok(path)
    }
}

/// Reported after each file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    /// 1-based position of the file just finished.
    pub current: usize,
    pub total: usize,
    pub filename: String,
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Arrays produced for one spectrum.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PipelineOutput {
    pub smoothed: Option<Vec<f64>>,
    pub corrected: Option<Vec<f64>>,
    pub baseline: Option<Vec<f64>>,
    pub peaks: Option<Vec<DetectedPeak>>,
}

impl PipelineOutput {
    pub fn steps(&self) -> Vec<String> {
        [
            ("smoothing", self.smoothed.is_some()),
            ("baseline", self.corrected.is_some()),
            ("peak_analysis", self.peaks.is_some()),
        ]
        .into_iter()
        .filter(|(_, done)| *done)
        .map(|(name, _)| name.to_string())
        .collect()
    }
}

/// Run every configured stage over one spectrum.
///
/// Baseline correction reads the smoothed array when asked to and one
/// exists; peak detection reads the requested array, falling back to the
/// raw data when that array was not produced.
pub fn run_pipeline(config: &ProcessingConfig, x: &[f64], y: &[f64]) -> crate::error::Result<PipelineOutput> {
    let mut out = PipelineOutput::default();

    if let Some(stage) = &config.smoothing {
        out.smoothed = Some(smooth(x, y, &stage.ranges, &stage.method)?);
    }

    if let Some(stage) = &config.baseline {
        let source = match (stage.data_source, &out.smoothed) {
            (DataKind::Smoothed, Some(s)) => s.as_slice(),
            _ => y,
        };
        let result = correct(x, source, &stage.method)?;
        out.corrected = Some(result.corrected);
        out.baseline = Some(result.baseline);
    }

    if let Some(stage) = &config.peak_analysis {
        let source = match stage.data_source {
            DataKind::Corrected => out.corrected.as_deref(),
            DataKind::Smoothed => out.smoothed.as_deref(),
            DataKind::Original => None,
        }
        .unwrap_or(y);
        out.peaks = Some(find_peaks(x, source, stage.threshold, stage.distance)?);
    }

    Ok(out)
}

// ---------------------------------------------------------------------------
// BatchCoordinator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct BatchCoordinator {
    config: ProcessingConfig,
    output_dir: PathBuf,
}

impl BatchCoordinator {
    pub fn new(config: ProcessingConfig, output_dir: impl Into<PathBuf>) -> Self {
        BatchCoordinator {
            config,
            output_dir: output_dir.into(),
        }
    }

    pub fn config(&self) -> &ProcessingConfig {
        &self.config
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Process one file and write `{stem}_processed.csv` and, when peaks were
    /// found, `{stem}_peaks.csv` into the output directory.
    pub fn process_file(&self, path: &Path) -> Result<FileResult> {
        self.process_as(path, &loader::dataset_name(path))
    }

    /// [`process_file`](Self::process_file) with outputs named after `base`
    /// instead of the file stem.
    fn process_as(&self, path: &Path, base: &str) -> Result<FileResult> {
        let entry = loader::load_single(path)?;
        let x = entry.spectrum.x();
        let y = entry.spectrum.y();
        let output = run_pipeline(&self.config, x, y)
            .with_context(|| format!("processing {}", path.display()))?;

        let processed_path = self.output_dir.join(format!("{base}_processed.csv"));
        let columns = ProcessedColumns {
            x,
            raw: y,
            smoothed: output.smoothed.as_deref(),
            corrected: output.corrected.as_deref(),
        };
        export::write_processed(&processed_path, &columns, &[])?;
        let mut output_files = vec![processed_path.display().to_string()];

        if let Some(peaks) = output.peaks.as_ref().filter(|p| !p.is_empty()) {
            let peaks_path = self.output_dir.join(format!("{base}_peaks.csv"));
            export::write_peak_list(&peaks_path, peaks)?;
            output_files.push(peaks_path.display().to_string());
        }

        Ok(FileResult {
            input_file: path.display().to_string(),
            filename: file_name(path),
            data_points: x.len(),
            processing_steps: output.steps(),
            output_files,
            peaks_found: output.peaks.as_ref().map(Vec::len),
        })
    }

    /// Process `paths` in order. Per-file failures are collected, never
    /// propagated; the only error is failing to create the output directory.
    ///
    /// `cancel` is checked before each file.
    pub fn run(
        &self,
        paths: &[PathBuf],
        mut on_progress: impl FnMut(&Progress),
        cancel: &AtomicBool,
    ) -> Result<BatchSummary> {
        std::fs::create_dir_all(&self.output_dir)
            .with_context(|| format!("creating output directory {}", self.output_dir.display()))?;
        log::info!("Batch started: {} files into {}", paths.len(), self.output_dir.display());

        let mut results = Vec::new();
        let mut errors = Vec::new();
        let mut cancelled = false;

        let mut used_bases = HashSet::new();

        for (i, path) in paths.iter().enumerate() {
            if cancel.load(Ordering::Relaxed) {
                log::warn!("Batch cancelled after {i} of {} files", paths.len());
                cancelled = true;
                break;
            }
            let base = unique_base(&mut used_bases, &loader::dataset_name(path));
            match self.process_as(path, &base) {
                Ok(result) => {
                    log::info!("Processed {}", path.display());
                    results.push(result);
                }
                Err(e) => {
                    log::error!("Failed to process {}: {e:#}", path.display());
                    errors.push(FileError {
                        file: path.display().to_string(),
                        error: format!("{e:#}"),
                    });
                }
            }
            on_progress(&Progress {
                current: i + 1,
                total: paths.len(),
                filename: file_name(path),
            });
        }

        let summary = BatchSummary::new(results, errors, cancelled);
        log::info!(
            "Batch finished: {} succeeded, {} failed",
            summary.successful,
            summary.failed
        );
        Ok(summary)
    }

    /// Run the batch on a background thread. Progress arrives on the
    /// returned handle's channel.
    pub fn spawn(self, paths: Vec<PathBuf>) -> Result<BatchHandle> {
        let (sender, receiver) = unbounded::<Progress>();
        let cancel = Arc::new(AtomicBool::new(false));
        let cancel_flag = Arc::clone(&cancel);

        let handle = thread::Builder::new()
            .name("ftir-batch".to_string())
            .spawn(move || {
                self.run(
                    &paths,
                    |p| {
                        // A dropped receiver only means nobody is watching.
                        let _ = sender.send(p.clone());
                    },
                    &cancel_flag,
                )
            })
            .context("Failed to spawn batch thread")?;

        Ok(BatchHandle {
            progress: receiver,
            cancel,
            handle,
        })
    }
}

/// `stem`, or `stem_2`, `stem_3`, ... when an earlier file of the batch
/// already claimed it. Inputs from different folders may share a stem.
fn unique_base(used: &mut HashSet<String>, stem: &str) -> String {
    let mut base = stem.to_string();
    let mut n = 1;
    while !used.insert(base.clone()) {
        n += 1;
        base = format!("{stem}_{n}");
    }
    if n > 1 {
        log::warn!("Output name '{stem}' already used in this batch, writing '{base}' instead");
    }
    base
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// A batch running on its own thread.
pub struct BatchHandle {
    progress: Receiver<Progress>,
    cancel: Arc<AtomicBool>,
    handle: JoinHandle<Result<BatchSummary>>,
}

impl BatchHandle {
    pub fn progress(&self) -> &Receiver<Progress> {
        &self.progress
    }

    /// Ask the worker to stop before its next file.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the worker and return its summary.
    pub fn join(self) -> Result<BatchSummary> {
        match self.handle.join() {
            Ok(result) => result,
            Err(_) => anyhow::bail!("batch thread panicked"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PeakStage;

    fn write_spectrum(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        let mut text = String::from("wavenumber,absorbance\n");
        for i in 0..60 {
            let x = 1800.0 - 2.0 * i as f64;
            let y = 0.1 + (-((x - 1700.0) / 6.0_f64).powi(2)).exp();
            text.push_str(&format!("{x},{y}\n"));
        }
        std::fs::write(&path, text).unwrap();
        path
    }

    fn peaks_only() -> ProcessingConfig {
        ProcessingConfig {
            peak_analysis: Some(PeakStage { threshold: 0.5, ..PeakStage::default() }),
            ..ProcessingConfig::default()
        }
    }

    #[test]
    fn single_file_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_spectrum(dir.path(), "a.csv");
        let out = dir.path().join("out");
        std::fs::create_dir_all(&out).unwrap();

        let result = BatchCoordinator::new(peaks_only(), &out).process_file(&input).unwrap();
        assert_eq!(result.filename, "a.csv");
        assert_eq!(result.data_points, 60);
        assert_eq!(result.processing_steps, vec!["peak_analysis"]);
        assert_eq!(result.peaks_found, Some(1));
        assert!(out.join("a_processed.csv").exists());
        assert!(out.join("a_peaks.csv").exists());
    }

    #[test]
    fn cancellation_stops_before_next_file() {
        let dir = tempfile::tempdir().unwrap();
        let paths = vec![write_spectrum(dir.path(), "a.csv"), write_spectrum(dir.path(), "b.csv")];
        let cancel = AtomicBool::new(false);
        let coordinator = BatchCoordinator::new(peaks_only(), dir.path().join("out"));

        let summary = coordinator
            .run(&paths, |_| cancel.store(true, Ordering::Relaxed), &cancel)
            .unwrap();
        assert!(summary.cancelled);
        assert_eq!(summary.total_files, 1);
    }

    #[test]
    fn background_thread_reports_progress() {
        let dir = tempfile::tempdir().unwrap();
        let paths = vec![write_spectrum(dir.path(), "a.csv"), dir.path().join("missing.csv")];
        let handle = BatchCoordinator::new(peaks_only(), dir.path().join("out"))
            .spawn(paths)
            .unwrap();
        let receiver = handle.progress().clone();
        let summary = handle.join().unwrap();

        let seen: Vec<Progress> = receiver.try_iter().collect();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].current, 2);
        assert_eq!(seen[1].filename, "missing.csv");
        assert_eq!((summary.successful, summary.failed), (1, 1));
        assert!(summary.errors[0].file.ends_with("missing.csv"));
    }

    #[test]
    fn same_stem_from_two_folders_gets_distinct_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let (left, right) = (dir.path().join("left"), dir.path().join("right"));
        std::fs::create_dir_all(&left).unwrap();
        std::fs::create_dir_all(&right).unwrap();
        let paths = vec![write_spectrum(&left, "film.csv"), write_spectrum(&right, "film.csv")];
        let out = dir.path().join("out");

        let summary = BatchCoordinator::new(peaks_only(), &out)
            .run(&paths, |_| {}, &AtomicBool::new(false))
            .unwrap();
        assert_eq!(summary.successful, 2);
        assert!(out.join("film_processed.csv").exists());
        assert!(out.join("film_2_processed.csv").exists());
        assert!(out.join("film_2_peaks.csv").exists());
        assert_ne!(summary.results[0].output_files, summary.results[1].output_files);
    }

    #[test]
    fn unique_base_counts_up() {
        let mut used = HashSet::new();
        assert_eq!(unique_base(&mut used, "a"), "a");
        assert_eq!(unique_base(&mut used, "a"), "a_2");
        assert_eq!(unique_base(&mut used, "a"), "a_3");
        assert_eq!(unique_base(&mut used, "b"), "b");
    }

    #[test]
    fn summary_json_shape() {
        let summary = BatchSummary::new(Vec::new(), vec![FileError { file: "f".into(), error: "e".into() }], false);
        let value = serde_json::to_value(&summary).unwrap();
        for key in ["total_files", "successful", "failed", "timestamp", "results", "errors"] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
        assert!(value.get("cancelled").is_none());
        assert_eq!(value["errors"][0]["file"], "f");
    }
}
