use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use arrow::array::{Array, AsArray, Float32Array, Float64Array, LargeListArray, ListArray};
use arrow::datatypes::DataType;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde_json::Value as JsonValue;

use super::model::{DatasetEntry, Spectrum};
use crate::error::EngineError;

// ---------------------------------------------------------------------------
// Public entry-point
// ---------------------------------------------------------------------------

/// Load every spectrum in a file.  Dispatch by extension.
///
/// Supported formats:
/// * `.csv` / `.txt` – two-column text export (wavenumber, intensity)
/// * `.json`         – `{ "x": [...], "y": [...] }` or an array of such records
/// * `.parquet`      – `x` and `y` list columns, optional `name` column
///
/// Text files hold one spectrum named after the file stem. Container formats
/// may hold several.
pub fn load_file(path: &Path) -> Result<Vec<DatasetEntry>> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    let stem = dataset_name(path);

    let entries = match ext.as_str() {
        "csv" | "txt" => {
            let spectrum = load_csv(path).with_context(|| format!("loading {}", path.display()))?;
            vec![DatasetEntry::new(stem, spectrum)]
        }
        "json" => load_json(path, &stem).with_context(|| format!("loading {}", path.display()))?,
        "parquet" | "pq" => load_parquet(path, &stem).with_context(|| format!("loading {}", path.display()))?,
        other => return Err(format_error(format!("unsupported file extension: .{other}"))),
    };

    if entries.is_empty() {
        return Err(format_error(format!("{} contains no spectra", path.display())));
    }
    log::info!("Loaded {} spectra from {}", entries.len(), path.display());
    Ok(entries)
}

/// Load a file that must hold exactly one spectrum.
pub fn load_single(path: &Path) -> Result<DatasetEntry> {
    let mut entries = load_file(path)?;
    if entries.len() != 1 {
        return Err(format_error(format!(
            "{} holds {} spectra, expected one",
            path.display(),
            entries.len()
        )));
    }
    Ok(entries.remove(0))
}

/// File stem used as the dataset name.
pub fn dataset_name(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("spectrum")
        .to_string()
}

fn format_error(message: String) -> anyhow::Error {
    EngineError::FileFormat(message).into()
}

// ---------------------------------------------------------------------------
// CSV loader
// ---------------------------------------------------------------------------

/// Column 0 is the wavenumber, column 1 the intensity; any further columns
/// are ignored. A first row whose leading fields are not numbers is taken as
/// the header, and `#` lines are comments. The delimiter is sniffed from the
/// first data line.
fn load_csv(path: &Path) -> Result<Spectrum> {
    let text = std::fs::read_to_string(path).context("reading text file")?;
    parse_two_column(&text)
}

pub(crate) fn parse_two_column(text: &str) -> Result<Spectrum> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let first_line = text
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty() && !l.starts_with('#'))
        .unwrap_or("");
    let delimiter = sniff_delimiter(first_line);

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .trim(csv::Trim::All)
        .comment(Some(b'#'))
        .from_reader(text.as_bytes());

    let mut x = Vec::new();
    let mut y = Vec::new();
    let mut seen_first = false;

    for (row_no, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("CSV row {row_no}"))?;
        // Runs of spaces split into empty fields; for real delimiters an empty
        // field is a missing value and keeps its column position.
        let fields: Vec<&str> = if delimiter == b' ' {
            record.iter().filter(|f| !f.is_empty()).collect()
        } else {
            record.iter().collect()
        };
        if fields.iter().all(|f| f.is_empty()) {
            continue;
        }
        let is_first = !seen_first;
        seen_first = true;

        if fields.len() < 2 {
            return Err(format_error(format!(
                "row {row_no} has {} column, at least 2 are needed",
                fields.len()
            )));
        }
        match (fields[0].parse::<f64>(), fields[1].parse::<f64>()) {
            (Ok(a), Ok(b)) => {
                x.push(a);
                y.push(b);
            }
            _ if is_first => log::debug!("Treating first row as header: {fields:?}"),
            _ if fields[0].is_empty() || fields[1].is_empty() => {
                return Err(format_error(format!("row {row_no}: empty wavenumber or intensity cell")))
            }
            _ => {
                return Err(format_error(format!(
                    "row {row_no}: '{}', '{}' are not numbers",
                    fields[0], fields[1]
                )))
            }
        }
    }

    if x.is_empty() {
        return Err(format_error("file holds no data rows".to_string()));
    }
    Ok(Spectrum::new(x, y)?)
}

fn sniff_delimiter(line: &str) -> u8 {
    [b',', b';', b'\t']
        .into_iter()
        .find(|&d| line.as_bytes().contains(&d))
        .unwrap_or(b' ')
}

// ---------------------------------------------------------------------------
// JSON loader
// ---------------------------------------------------------------------------

/// Expected JSON schema, either a single record or an array of them:
///
/// ```json
/// [
///   { "name": "sample_A", "x": [4000.0, 3998.0, ...], "y": [0.12, 0.14, ...] },
///   ...
/// ]
/// ```
fn load_json(path: &Path, stem: &str) -> Result<Vec<DatasetEntry>> {
    let text = std::fs::read_to_string(path).context("reading JSON file")?;
    let root: JsonValue = serde_json::from_str(&text).context("parsing JSON")?;

    let records: Vec<&JsonValue> = match &root {
        JsonValue::Array(items) => items.iter().collect(),
        JsonValue::Object(_) => vec![&root],
        _ => return Err(format_error("expected a JSON object or array".to_string())),
    };
    let single = records.len() == 1;

    records
        .into_iter()
        .enumerate()
        .map(|(i, rec)| {
            let obj = rec
                .as_object()
                .ok_or_else(|| format_error(format!("record {i} is not a JSON object")))?;
            let x = json_array_to_f64(obj.get("x"), i, "x")?;
            let y = json_array_to_f64(obj.get("y"), i, "y")?;
            let name = obj
                .get("name")
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| default_name(stem, i, single));
            let spectrum = Spectrum::new(x, y).with_context(|| format!("record {i}"))?;
            Ok(DatasetEntry::new(name, spectrum))
        })
        .collect()
}

fn default_name(stem: &str, index: usize, single: bool) -> String {
    if single {
        stem.to_string()
    } else {
        format!("{stem}_{}", index + 1)
    }
}

fn json_array_to_f64(val: Option<&JsonValue>, row: usize, col: &str) -> Result<Vec<f64>> {
    let arr = val
        .and_then(|v| v.as_array())
        .ok_or_else(|| format_error(format!("record {row}: missing or invalid '{col}' array")))?;

    arr.iter()
        .enumerate()
        .map(|(j, v)| {
            v.as_f64()
                .ok_or_else(|| format_error(format!("record {row}, {col}[{j}]: not a number")))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Parquet loader
// ---------------------------------------------------------------------------

/// Expected schema:
/// - `x`: List<Float64|Float32> or LargeList – wavenumber arrays
/// - `y`: List<Float64|Float32> or LargeList – intensity arrays
/// - `name` (optional): Utf8 or LargeUtf8
///
/// Works with files written by Pandas and Polars as well as by
/// `generate_sample`.
fn load_parquet(path: &Path, stem: &str) -> Result<Vec<DatasetEntry>> {
    let file = std::fs::File::open(path).context("opening parquet file")?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file).context("reading parquet metadata")?;
    let total_rows = builder.metadata().file_metadata().num_rows();
    let reader = builder.build().context("building parquet reader")?;
    let single = total_rows == 1;

    let mut entries = Vec::new();
    for batch_result in reader {
        let batch = batch_result.context("reading parquet record batch")?;
        let schema = batch.schema();

        let x_idx = schema
            .index_of("x")
            .map_err(|_| format_error("parquet file missing 'x' column".to_string()))?;
        let y_idx = schema
            .index_of("y")
            .map_err(|_| format_error("parquet file missing 'y' column".to_string()))?;
        let name_col = schema.index_of("name").ok().map(|i| batch.column(i));

        for row in 0..batch.num_rows() {
            let x = extract_f64_list(batch.column(x_idx), row)
                .with_context(|| format!("row {row}: failed to read 'x'"))?;
            let y = extract_f64_list(batch.column(y_idx), row)
                .with_context(|| format!("row {row}: failed to read 'y'"))?;
            let index = entries.len();
            let name = name_col
                .and_then(|col| extract_string(col, row))
                .unwrap_or_else(|| default_name(stem, index, single));
            let spectrum = Spectrum::new(x, y).with_context(|| format!("row {row}"))?;
            entries.push(DatasetEntry::new(name, spectrum));
        }
    }
    Ok(entries)
}

/// Extract a `Vec<f64>` from a List or LargeList column at the given row.
fn extract_f64_list(col: &Arc<dyn Array>, row: usize) -> Result<Vec<f64>> {
    if col.is_null(row) {
        bail!("null value in list column");
    }

    let values_array = match col.data_type() {
        DataType::List(_) => col
            .as_any()
            .downcast_ref::<ListArray>()
            .context("expected ListArray")?
            .value(row),
        DataType::LargeList(_) => col
            .as_any()
            .downcast_ref::<LargeListArray>()
            .context("expected LargeListArray")?
            .value(row),
        other => bail!("expected List or LargeList column, got {other:?}"),
    };

    // Nulls map to NaN so Spectrum validation reports them.
    if let Some(f64_arr) = values_array.as_any().downcast_ref::<Float64Array>() {
        Ok(f64_arr.iter().map(|v| v.unwrap_or(f64::NAN)).collect())
    } else if let Some(f32_arr) = values_array.as_any().downcast_ref::<Float32Array>() {
        Ok(f32_arr.iter().map(|v| v.map_or(f64::NAN, f64::from)).collect())
    } else {
        bail!(
            "list inner type is {:?}, expected Float64 or Float32",
            values_array.data_type()
        )
    }
}

fn extract_string(col: &Arc<dyn Array>, row: usize) -> Option<String> {
    if col.is_null(row) {
        return None;
    }
    match col.data_type() {
        DataType::Utf8 => Some(col.as_string::<i32>().value(row).to_string()),
        DataType::LargeUtf8 => Some(col.as_string::<i64>().value(row).to_string()),
        _ => None,
    }
}
