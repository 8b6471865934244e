use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::constants::{DEFAULT_B_FIELD, DEFAULT_BDT_CUT};
use crate::error::{AnalyzerError, Result};

/// Log line format
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines
    Text,
    /// One JSON object per line
    Json,
}

/// LLP displaced-vertex analyzer configuration
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Events to analyze, one JSON object per line.
    #[arg(long, value_name = "FILE")]
    pub input: PathBuf,

    /// Classifier weight file (JSON boosted forest).
    #[arg(long, value_name = "FILE")]
    pub weight_file: PathBuf,

    /// Write one JSON record per event to a file.
    #[arg(long, value_name = "FILE")]
    pub output_json: Vec<PathBuf>,

    /// Write the per-hemisphere vertex summary in CSV format to a file.
    #[arg(long, value_name = "FILE")]
    pub write_csv: Vec<PathBuf>,

    /// Directory for the run summary (summary.json)
    #[arg(long, value_name = "DIR")]
    pub work_dir: Option<PathBuf>,

    /// Classifier operating point: tracks scoring above it enter the vertex fits
    #[arg(long, default_value_t = DEFAULT_BDT_CUT, allow_negative_numbers = true)]
    pub bdt_cut: f64,

    /// Solenoid field in tesla
    #[arg(long, default_value_t = DEFAULT_B_FIELD)]
    pub b_field: f64,

    /// Number of events analyzed in parallel
    #[arg(long, default_value_t = 1)]
    pub workers: usize,

    /// Status logging interval in events, 0 to disable
    #[arg(long, default_value_t = 1000)]
    pub status_interval: usize,

    /// Log line format
    #[arg(long, value_enum, default_value = "text")]
    pub log_format: LogFormat,

    /// Verbose logging (DEBUG level)
    #[arg(long, short, default_value_t = false)]
    pub verbose: bool,
}

impl Config {
    /// Checks values clap cannot check on its own
    pub fn validate(&self) -> Result<()> {
        if self.b_field.is_nan() || self.b_field <= 0.0 {
            return Err(AnalyzerError::Config(format!(
                "--b-field must be positive, got {}",
                self.b_field
            )));
        }
        if self.workers == 0 {
            return Err(AnalyzerError::Config("--workers must be at least 1".to_string()));
        }
        if !self.bdt_cut.is_finite() {
            return Err(AnalyzerError::Config(format!(
                "--bdt-cut must be finite, got {}",
                self.bdt_cut
            )));
        }
        Ok(())
    }
}
