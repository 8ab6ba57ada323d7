//! Writes synthetic FTIR spectra for demos and manual testing: one CSV per
//! sample plus `samples.parquet` holding all of them.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow::array::{Float64Builder, ListBuilder, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use clap::Parser;
use parquet::arrow::ArrowWriter;

use ftir_peaks::data::export;

#[derive(Parser)]
#[command(name = "generate_sample", about = "Generate synthetic FTIR spectra")]
struct Args {
    /// Output directory
    #[arg(default_value = "sample_spectra")]
    output: PathBuf,

    /// Noise standard deviation in absorbance units
    #[arg(long, default_value_t = 0.003)]
    noise: f64,

    #[arg(long, default_value_t = 42)]
    seed: u64,
}

/// Band position, width (sigma) and height, in cm-1 / absorbance.
type Band = (f64, f64, f64);

struct Sample {
    name: &'static str,
    bands: &'static [Band],
    /// Linear drift across the axis, added to an offset of 0.02.
    drift: f64,
}

const SAMPLES: &[Sample] = &[
    Sample {
        name: "polyethylene",
        bands: &[(2915.0, 12.0, 0.9), (2848.0, 10.0, 0.7), (1472.0, 6.0, 0.35), (719.0, 5.0, 0.25)],
        drift: 0.05,
    },
    Sample {
        name: "polystyrene",
        bands: &[(3026.0, 9.0, 0.4), (2923.0, 12.0, 0.5), (1601.0, 5.0, 0.3), (1493.0, 6.0, 0.6), (698.0, 7.0, 0.9)],
        drift: 0.08,
    },
    Sample {
        name: "pet",
        bands: &[(1715.0, 10.0, 1.0), (1240.0, 14.0, 0.85), (1095.0, 10.0, 0.6), (723.0, 6.0, 0.5)],
        drift: 0.12,
    },
];

fn gaussian(x: f64, mu: f64, sigma: f64, amplitude: f64) -> f64 {
    amplitude * (-(x - mu).powi(2) / (2.0 * sigma.powi(2))).exp()
}

fn generate_spectrum(wavenumbers: &[f64], sample: &Sample, noise: f64, rng: &mut SimpleRng) -> Vec<f64> {
    let (lo, hi) = (wavenumbers[wavenumbers.len() - 1], wavenumbers[0]);
    wavenumbers
        .iter()
        .map(|&wn| {
            let background = 0.02 + sample.drift * (hi - wn) / (hi - lo);
            let signal: f64 = sample
                .bands
                .iter()
                .map(|&(mu, sigma, amp)| gaussian(wn, mu, sigma, amp))
                .sum();
            background + signal + rng.gauss(0.0, noise)
        })
        .collect()
}

/// Minimal deterministic PRNG (xoshiro256**)
struct SimpleRng {
    state: [u64; 4],
}

impl SimpleRng {
    fn new(seed: u64) -> Self {
        let mut s = [0u64; 4];
        let mut x = seed;
        for slot in &mut s {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
            *slot = x;
        }
        SimpleRng { state: s }
    }

    fn next_u64(&mut self) -> u64 {
        let result = (self.state[1].wrapping_mul(5)).rotate_left(7).wrapping_mul(9);
        let t = self.state[1] << 17;
        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];
        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);
        result
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Box-Muller
    fn gauss(&mut self, mean: f64, std_dev: f64) -> f64 {
        let u1 = self.next_f64().max(1e-15);
        let u2 = self.next_f64();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        mean + std_dev * z
    }
}

fn list_array(rows: &[Vec<f64>]) -> arrow::array::ListArray {
    let mut builder = ListBuilder::new(Float64Builder::new());
    for row in rows {
        builder.values().append_slice(row);
        builder.append(true);
    }
    builder.finish()
}

fn write_collection(path: &Path, names: &[&str], xs: &[Vec<f64>], ys: &[Vec<f64>]) -> Result<()> {
    let item = Arc::new(Field::new("item", DataType::Float64, true));
    let schema = Arc::new(Schema::new(vec![
        Field::new("name", DataType::Utf8, false),
        Field::new("x", DataType::List(item.clone()), false),
        Field::new("y", DataType::List(item), false),
    ]));
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(StringArray::from(names.to_vec())),
            Arc::new(list_array(xs)),
            Arc::new(list_array(ys)),
        ],
    )
    .context("Failed to create RecordBatch")?;

    let file = std::fs::File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, schema, None)?;
    writer.write(&batch)?;
    writer.close()?;
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let mut rng = SimpleRng::new(args.seed);

    // 4000 → 600 cm-1, step 2
    let wavenumbers: Vec<f64> = (0..1701).map(|i| 4000.0 - i as f64 * 2.0).collect();

    std::fs::create_dir_all(&args.output)
        .with_context(|| format!("creating {}", args.output.display()))?;

    let mut names = Vec::new();
    let mut xs = Vec::new();
    let mut ys = Vec::new();
    for sample in SAMPLES {
        let y = generate_spectrum(&wavenumbers, sample, args.noise, &mut rng);
        export::write_spectrum(&args.output.join(format!("{}.csv", sample.name)), &wavenumbers, &y)?;
        names.push(sample.name);
        xs.push(wavenumbers.clone());
        ys.push(y);
    }

    let collection = args.output.join("samples.parquet");
    write_collection(&collection, &names, &xs, &ys)?;

    println!(
        "Wrote {} spectra ({} wavenumbers each) to {}",
        SAMPLES.len(),
        wavenumbers.len(),
        args.output.display()
    );
    Ok(())
}
