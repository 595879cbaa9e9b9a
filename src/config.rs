//! Configuration management for the CSV classification service

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::Path;

/// Default location of the configuration file
pub const DEFAULT_CONFIG_PATH: &str = "config/config.toml";

/// Who fills missing feature values before inference
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ImputationMode {
    /// Ask the loaded model whether it carries its own imputer
    #[default]
    Auto,
    /// Always fill with the per-request column median
    RequestMedian,
    /// The model handles missing values; never fill
    Model,
}

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub models: ModelsConfig,
    pub normalization: NormalizationConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

/// HTTP listener configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address
    pub host: String,
    /// Bind port
    pub port: u16,
    /// Largest accepted upload, in bytes
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            max_upload_bytes: 32 * 1024 * 1024,
        }
    }
}

/// Model artifact configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    /// Path to the ONNX classifier
    pub model_path: String,
    /// Optional JSON array with the ordered feature names
    pub features_path: String,
    /// Number of threads for ONNX inference (default: 1)
    pub onnx_threads: usize,
    /// Missing-value handling: "auto", "request_median" or "model"
    pub imputation: ImputationMode,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            model_path: "model.onnx".to_string(),
            features_path: "features.json".to_string(),
            onnx_threads: 1,
            imputation: ImputationMode::Auto,
        }
    }
}

/// Rules applied to uploaded tables before they reach the model
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NormalizationConfig {
    /// Identifier, metadata and leakage-prone columns never passed to the model
    pub drop_columns: Vec<String>,
    /// Training label column, removed when present
    pub label_column: String,
    /// Field delimiter (single ASCII character)
    pub delimiter: String,
    /// Lines starting with this character are skipped; empty disables
    pub comment_char: String,
    /// Standardize each feature column on the request's own rows
    pub standardize: bool,
    /// Include the model input matrix in responses unless the request says otherwise
    pub return_features: bool,
}

impl Default for NormalizationConfig {
    fn default() -> Self {
        Self {
            drop_columns: default_drop_columns(),
            label_column: "koi_disposition".to_string(),
            delimiter: ",".to_string(),
            comment_char: "#".to_string(),
            standardize: false,
            return_features: true,
        }
    }
}

/// Kepler KOI cumulative table: identifiers, vetting flags and scores
fn default_drop_columns() -> Vec<String> {
    [
        "rowid",
        "kepid",
        "kepoi_name",
        "kepler_name",
        "koi_pdisposition",
        "koi_score",
        "koi_teq_err1",
        "koi_teq_err2",
        "koi_tce_delivname",
        "koi_fpflag_nt",
        "koi_fpflag_ss",
        "koi_fpflag_co",
        "koi_fpflag_ec",
    ]
    .iter()
    .map(|c| c.to_string())
    .collect()
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

/// Periodic metrics summary
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Seconds between summaries; 0 disables the reporter
    pub report_interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            report_interval_secs: 60,
        }
    }
}

impl AppConfig {
    /// Load configuration from `CONFIG_PATH` (or the default path) plus environment
    pub fn load() -> Result<Self> {
        let path =
            std::env::var("CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from_path(path)
    }

    /// Load configuration from a specific path.
    ///
    /// The file is optional. `APP_<SECTION>__<KEY>` variables override it, and
    /// `MODEL_PATH` / `FEATURES_PATH` override the artifact locations.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut builder = Config::builder()
            .add_source(File::from(path.as_ref()).required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("normalization.drop_columns"),
            );

        if let Ok(model_path) = std::env::var("MODEL_PATH") {
            builder = builder.set_override("models.model_path", model_path)?;
        }
        if let Ok(features_path) = std::env::var("FEATURES_PATH") {
            builder = builder.set_override("models.features_path", features_path)?;
        }

        let config: AppConfig = builder
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        self.normalization.delimiter_byte()?;
        self.normalization.comment_byte()?;
        if self.models.onnx_threads == 0 {
            bail!("models.onnx_threads must be at least 1");
        }
        if self.normalization.label_column.trim().is_empty() {
            bail!("normalization.label_column must not be empty");
        }
        Ok(())
    }
}

impl NormalizationConfig {
    /// Delimiter as the single byte the CSV reader expects
    pub fn delimiter_byte(&self) -> Result<u8> {
        single_ascii_byte(&self.delimiter)
            .with_context(|| format!("normalization.delimiter {:?}", self.delimiter))
    }

    /// Comment marker byte, `None` when comments are disabled
    pub fn comment_byte(&self) -> Result<Option<u8>> {
        if self.comment_char.is_empty() {
            return Ok(None);
        }
        single_ascii_byte(&self.comment_char)
            .map(Some)
            .with_context(|| format!("normalization.comment_char {:?}", self.comment_char))
    }
}

fn single_ascii_byte(value: &str) -> Result<u8> {
    match value.as_bytes() {
        [b] if b.is_ascii() => Ok(*b),
        _ => bail!("must be exactly one ASCII character"),
    }
}
