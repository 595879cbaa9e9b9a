//! Sample CSV Generator
//!
//! Writes a synthetic KOI-style CSV (and optionally a feature manifest) for
//! exercising the service by hand.
//!
//! Usage: sample_csv [output|-] [rows] [false_positive_rate] [missing_rate] [manifest_path]

use anyhow::{Context, Result};
use rand::Rng;
use std::fs::File;
use std::io::{self, Write};
use tracing::info;

/// Feature columns, in the order written to the manifest
const FEATURES: &[&str] = &[
    "koi_period",
    "koi_time0bk",
    "koi_impact",
    "koi_duration",
    "koi_depth",
    "koi_prad",
    "koi_teq",
    "koi_insol",
    "koi_model_snr",
    "koi_steff",
    "koi_slogg",
    "koi_srad",
];

/// Identifier, label and vetting columns the service drops
const GOVERNANCE: &[&str] = &[
    "rowid",
    "kepid",
    "kepoi_name",
    "kepler_name",
    "koi_disposition",
    "koi_pdisposition",
    "koi_score",
    "koi_fpflag_nt",
    "koi_fpflag_ss",
    "koi_fpflag_co",
    "koi_fpflag_ec",
    "koi_teq_err1",
    "koi_teq_err2",
    "koi_tce_delivname",
];

/// Row generator for testing
struct RowGenerator {
    rng: rand::rngs::ThreadRng,
    row_counter: u64,
    missing_rate: f64,
}

impl RowGenerator {
    fn new(missing_rate: f64) -> Self {
        Self {
            rng: rand::thread_rng(),
            row_counter: 0,
            missing_rate,
        }
    }

    /// Generate a plausible planet candidate
    fn generate_candidate(&mut self) -> Vec<String> {
        let features = [
            self.rng.gen_range(0.5..400.0),
            self.rng.gen_range(120.0..600.0),
            self.rng.gen_range(0.0..0.9),
            self.rng.gen_range(1.0..10.0),
            self.rng.gen_range(50.0..5000.0),
            self.rng.gen_range(0.5..15.0),
            self.rng.gen_range(200.0..2000.0),
            self.rng.gen_range(0.1..2000.0),
            self.rng.gen_range(10.0..500.0),
            self.rng.gen_range(4000.0..6500.0),
            self.rng.gen_range(4.0..4.7),
            self.rng.gen_range(0.6..1.5),
        ];
        self.row("CONFIRMED", 0, &features)
    }

    /// Generate an eclipsing-binary-like false positive
    fn generate_false_positive(&mut self) -> Vec<String> {
        let features = [
            self.rng.gen_range(0.3..50.0),
            self.rng.gen_range(120.0..600.0),
            self.rng.gen_range(0.9..1.5), // grazing
            self.rng.gen_range(0.5..20.0),
            self.rng.gen_range(5000.0..100000.0), // deep eclipse
            self.rng.gen_range(15.0..200.0),      // too large for a planet
            self.rng.gen_range(800.0..4000.0),
            self.rng.gen_range(100.0..50000.0),
            self.rng.gen_range(100.0..5000.0),
            self.rng.gen_range(3500.0..9000.0),
            self.rng.gen_range(3.5..4.8),
            self.rng.gen_range(0.5..4.0),
        ];
        self.row("FALSE POSITIVE", 1, &features)
    }

    fn row(&mut self, disposition: &str, flag: u8, features: &[f64]) -> Vec<String> {
        self.row_counter += 1;
        let kepid = 10_000_000 + self.row_counter;

        let mut row = vec![
            self.row_counter.to_string(),
            kepid.to_string(),
            format!("K{:05}.01", self.row_counter),
            String::new(),
            disposition.to_string(),
            disposition.to_string(),
            format!("{:.3}", self.rng.gen_range(0.0..1.0)),
            flag.to_string(),
            flag.to_string(),
            "0".to_string(),
            "0".to_string(),
            format!("{:.0}", self.rng.gen_range(10.0..100.0)),
            format!("-{:.0}", self.rng.gen_range(10.0..100.0)),
            "q1_q17_dr25_tce".to_string(),
        ];

        for &value in features {
            let roll: f64 = self.rng.gen();
            let cell = if roll < self.missing_rate {
                String::new()
            } else if roll < self.missing_rate * 1.1 {
                "inf".to_string()
            } else {
                format!("{:.5}", value)
            };
            row.push(cell);
        }
        row
    }
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("sample_csv=info".parse()?),
        )
        .with_writer(io::stderr)
        .init();

    // Parse arguments
    let args: Vec<String> = std::env::args().collect();
    let output = args.get(1).map(|s| s.as_str()).unwrap_or("-");
    let count: u64 = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(100);
    let fp_rate: f64 = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(0.3);
    let missing_rate: f64 = args.get(4).and_then(|s| s.parse().ok()).unwrap_or(0.02);
    let manifest = args.get(5);

    info!(
        output = %output,
        count = count,
        fp_rate = fp_rate,
        missing_rate = missing_rate,
        "Configuration loaded"
    );

    let mut sink: Box<dyn Write> = if output == "-" {
        Box::new(io::stdout().lock())
    } else {
        Box::new(File::create(output).with_context(|| format!("Failed to create {}", output))?)
    };

    writeln!(sink, "# Synthetic KOI cumulative table")?;
    writeln!(sink, "# {} rows, false positive rate {:.2}", count, fp_rate)?;

    let mut writer = csv::Writer::from_writer(sink);
    let header: Vec<&str> = GOVERNANCE.iter().chain(FEATURES.iter()).copied().collect();
    writer.write_record(&header)?;

    let mut generator = RowGenerator::new(missing_rate);
    let mut rng = rand::thread_rng();
    let mut candidates = 0;
    let mut false_positives = 0;

    for _ in 0..count {
        let row = if rng.gen_bool(fp_rate.clamp(0.0, 1.0)) {
            false_positives += 1;
            generator.generate_false_positive()
        } else {
            candidates += 1;
            generator.generate_candidate()
        };
        writer.write_record(&row)?;
    }
    writer.flush()?;

    if let Some(path) = manifest {
        let json = serde_json::to_string_pretty(FEATURES)?;
        std::fs::write(path, json).with_context(|| format!("Failed to write {}", path))?;
        info!(path = %path, features = FEATURES.len(), "Feature manifest written");
    }

    info!(
        "Completed! Wrote {} rows ({} candidates, {} false positives)",
        count, candidates, false_positives
    );

    Ok(())
}
