//! # ftir-peaks
//!
//! Command-line front end for the FTIR processing engine.
//!
//! ```bash
//! # Savitzky-Golay smoothing of the fingerprint region only
//! ftir-peaks smooth film.csv --method savgol --param window_length=15 --range 1000:1800
//!
//! # Peak table of a baseline-corrected spectrum
//! ftir-peaks baseline film.csv --method asls -o film_corrected.csv
//! ftir-peaks peaks film_corrected.csv --threshold 0.05 --distance 8
//!
//! # Apply a saved configuration to a folder of spectra
//! ftir-peaks batch --config settings.json --output results/ spectra/*.csv
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use serde_json::Value;

use ftir_peaks::analysis::{find_peaks, quantify, quantify_fixed_window};
use ftir_peaks::batch::BatchCoordinator;
use ftir_peaks::config::{DEFAULT_PEAK_DISTANCE, DEFAULT_PEAK_THRESHOLD};
use ftir_peaks::data::{export, loader};
use ftir_peaks::processing::params::ParamMap;
use ftir_peaks::processing::{correct, smooth};
use ftir_peaks::{AnalysisRegistry, BaselineMethod, Interval, ProcessingConfig, SmoothingMethod};

/// ftir-peaks - FTIR smoothing, baseline correction and peak quantification
#[derive(Parser)]
#[command(name = "ftir-peaks")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Verbosity level (-v for info, -vv for debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Smooth a spectrum, optionally only inside some ranges
    Smooth {
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// Output CSV (defaults to <stem>_smoothed.csv next to the input)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// savgol, lowess, moving_average, gaussian or median
        #[arg(short, long, default_value = "savgol")]
        method: String,

        /// Method parameter as key=value, repeatable
        #[arg(short, long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,

        /// Wavenumber range as lower:upper, repeatable; overlapping ranges merge
        #[arg(short, long = "range", value_name = "LOWER:UPPER")]
        ranges: Vec<String>,
    },

    /// Subtract an estimated baseline from the whole spectrum
    Baseline {
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// Output CSV (defaults to <stem>_corrected.csv next to the input)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// rubberband, modpoly, imodpoly, asls or spline
        #[arg(short, long, default_value = "asls")]
        method: String,

        /// Method parameter as key=value, repeatable
        #[arg(short, long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,
    },

    /// Detect peaks and print or save the peak list
    Peaks {
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// Write the peak list CSV here
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Minimum peak height
        #[arg(short, long, default_value_t = DEFAULT_PEAK_THRESHOLD)]
        threshold: f64,

        /// Minimum separation between peaks, in samples
        #[arg(short, long, default_value_t = DEFAULT_PEAK_DISTANCE)]
        distance: usize,
    },

    /// Height and area of the peak inside one wavenumber range
    Quantify {
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        #[arg(long)]
        lower: f64,

        #[arg(long)]
        upper: f64,

        /// Peak position; defaults to the tallest point in the range
        #[arg(long)]
        peak: Option<f64>,

        /// Write a results CSV here
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Apply a saved configuration to many files
    Batch {
        /// Configuration JSON (with or without the version envelope)
        #[arg(short, long)]
        config: PathBuf,

        /// Directory for processed files and batch_summary.json
        #[arg(short, long)]
        output: PathBuf,

        #[arg(value_name = "INPUTS", required = true)]
        inputs: Vec<PathBuf>,
    },

    /// Write an example configuration file
    ConfigTemplate {
        #[arg(value_name = "OUTPUT", default_value = "ftir_config.json")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    match cli.command {
        Commands::Smooth {
            input,
            output,
            method,
            params,
            ranges,
        } => run_smooth(&input, output, &method, &params, &ranges),
        Commands::Baseline {
            input,
            output,
            method,
            params,
        } => run_baseline(&input, output, &method, &params),
        Commands::Peaks {
            input,
            output,
            threshold,
            distance,
        } => run_peaks(&input, output, threshold, distance),
        Commands::Quantify {
            input,
            lower,
            upper,
            peak,
            output,
        } => run_quantify(&input, lower, upper, peak, output),
        Commands::Batch {
            config,
            output,
            inputs,
        } => run_batch(&config, output, inputs),
        Commands::ConfigTemplate { output } => {
            ProcessingConfig::template().save(&output)?;
            println!("Template written to {}", output.display());
            Ok(())
        }
    }
}

fn run_smooth(input: &Path, output: Option<PathBuf>, method: &str, params: &[String], ranges: &[String]) -> Result<()> {
    let method = SmoothingMethod::from_parts(method, &parse_params(params)?)?
        .context("no smoothing method given")?;
    let mut set = ftir_peaks::IntervalSet::new();
    for range in ranges {
        let (lower, upper) = parse_range(range)?;
        set.insert(lower, upper)?;
    }

    let entry = loader::load_single(input)?;
    let smoothed = smooth(entry.x(), entry.spectrum.y(), set.intervals(), &method)?;
    let output = output.unwrap_or_else(|| sibling(input, "smoothed"));
    export::write_spectrum(&output, entry.x(), &smoothed)?;
    println!("{method} smoothing written to {}", output.display());
    Ok(())
}

fn run_baseline(input: &Path, output: Option<PathBuf>, method: &str, params: &[String]) -> Result<()> {
    let method = BaselineMethod::from_parts(method, &parse_params(params)?)?
        .context("no baseline method given")?;
    let entry = loader::load_single(input)?;
    let result = correct(entry.x(), entry.spectrum.y(), &method)?;
    let output = output.unwrap_or_else(|| sibling(input, "corrected"));
    export::write_spectrum(&output, entry.x(), &result.corrected)?;
    println!("{method} baseline correction written to {}", output.display());
    Ok(())
}

fn run_peaks(input: &Path, output: Option<PathBuf>, threshold: f64, distance: usize) -> Result<()> {
    let entry = loader::load_single(input)?;
    let peaks = find_peaks(entry.x(), entry.spectrum.y(), threshold, distance)?;
    println!("{} peaks in {}", peaks.len(), entry.name);
    for (i, p) in peaks.iter().enumerate() {
        println!("{:>4}  {:>10.2}  {:.4}", i + 1, p.wavenumber, p.height);
    }
    if let Some(path) = output {
        export::write_peak_list(&path, &peaks)?;
    }
    Ok(())
}

fn run_quantify(input: &Path, lower: f64, upper: f64, peak: Option<f64>, output: Option<PathBuf>) -> Result<()> {
    let entry = loader::load_single(input)?;
    let interval = Interval::normalized(lower, upper)?;
    let (x, y) = (entry.x(), entry.spectrum.y());
    let metrics = match peak {
        Some(wavenumber) => quantify(x, y, wavenumber, interval.lower(), interval.upper())?,
        None => quantify_fixed_window(x, y, interval.lower(), interval.upper())?,
    };

    println!("Peak at {:.2} cm-1 in {interval}", metrics.wavenumber);
    println!("  height: {:.4} (corrected {:.4})", metrics.uncorrected_height, metrics.corrected_height);
    println!("  area:   {:.4} (corrected {:.4})", metrics.uncorrected_area, metrics.corrected_area);

    if let Some(path) = output {
        let mut registry = AnalysisRegistry::new();
        registry.add(&entry.name, interval, metrics);
        export::write_results(&path, registry.records())?;
    }
    Ok(())
}

fn run_batch(config: &Path, output: PathBuf, inputs: Vec<PathBuf>) -> Result<()> {
    let config = ProcessingConfig::load(config)?;
    let coordinator = BatchCoordinator::new(config, &output);
    let handle = coordinator.spawn(inputs)?;

    for progress in handle.progress().iter() {
        println!("[{}/{}] {}", progress.current, progress.total, progress.filename);
    }
    let summary = handle.join()?;
    let path = summary.save(&output)?;

    info!("Summary written to {}", path.display());
    println!(
        "Processed {} files: {} succeeded, {} failed",
        summary.total_files, summary.successful, summary.failed
    );
    for error in &summary.errors {
        eprintln!("  {}: {}", error.file, error.error);
    }
    if summary.failed > 0 {
        anyhow::bail!("{} of {} files failed", summary.failed, summary.total_files);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Argument helpers
// ---------------------------------------------------------------------------

/// `key=value` pairs into a parameter map; values stay strings and are
/// converted by the method constructors.
fn parse_params(pairs: &[String]) -> Result<ParamMap> {
    let mut map = ParamMap::new();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .with_context(|| format!("parameter '{pair}' is not key=value"))?;
        map.insert(key.trim().to_string(), Value::String(value.trim().to_string()));
    }
    Ok(map)
}

fn parse_range(text: &str) -> Result<(f64, f64)> {
    let (a, b) = text
        .split_once(':')
        .with_context(|| format!("range '{text}' is not lower:upper"))?;
    let a: f64 = a.trim().parse().with_context(|| format!("bad range bound '{a}'"))?;
    let b: f64 = b.trim().parse().with_context(|| format!("bad range bound '{b}'"))?;
    Ok((a.min(b), a.max(b)))
}

fn sibling(input: &Path, suffix: &str) -> PathBuf {
    input.with_file_name(format!("{}_{suffix}.csv", loader::dataset_name(input)))
}
