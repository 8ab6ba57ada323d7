/// Data layer: spectra, loading and file export.
///
/// Architecture:
/// ```text
///  .csv / .txt / .json / .parquet
///        │
///        ▼
///   ┌──────────┐
///   │  loader   │  parse file → Vec<DatasetEntry>
///   └──────────┘
///        │
///        ▼
///   ┌───────────────┐
///   │ SpectrumStore  │  raw spectrum + smoothed / corrected arrays per name
///   └───────────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  export   │  spectra, processed tables, peak lists, results
///   └──────────┘
/// ```

pub mod export;
pub mod loader;
pub mod model;

pub use model::{ActiveDatasetSelector, DataKind, DatasetEntry, Spectrum, SpectrumStore};
