//! Error taxonomy for startup and per-request processing

use thiserror::Error;

/// Fatal startup error: the service refuses to come up.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("feature manifest {path} is invalid (must be a JSON array of strings): {reason}")]
    InvalidManifest { path: String, reason: String },

    #[error(
        "could not determine the model's input columns: provide a feature manifest \
         or a model artifact that records its feature names"
    )]
    UndefinedContract,

    #[error("feature contract is empty")]
    EmptyContract,

    #[error("feature contract lists column '{0}' more than once")]
    DuplicateFeature(String),

    #[error("failed to load model from {path}: {reason}")]
    ModelLoad { path: String, reason: String },
}

/// Per-request failure of the normalization/inference pipeline.
///
/// None of these are fatal to the process; the web layer turns them into
/// client-facing responses using [`PipelineError::kind`].
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("input is not text in a supported encoding (UTF-8 or Latin-1): {0}")]
    Decode(String),

    #[error("could not read the CSV: {0}")]
    Parse(String),

    #[error("the CSV is empty (no data rows)")]
    EmptyInput,

    #[error(
        "missing numeric columns required by the model: {missing:?}. \
         Numeric columns detected: {numeric_detected:?}"
    )]
    ColumnMismatch {
        missing: Vec<String>,
        numeric_detected: Vec<String>,
    },

    #[error("error during prediction: {0}")]
    Inference(String),
}

impl PipelineError {
    /// Stable, machine-readable error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Decode(_) => "decode_error",
            PipelineError::Parse(_) => "parse_error",
            PipelineError::EmptyInput => "empty_input",
            PipelineError::ColumnMismatch { .. } => "column_mismatch",
            PipelineError::Inference(_) => "inference_error",
        }
    }

    pub(crate) fn inference(err: impl std::fmt::Display) -> Self {
        PipelineError::Inference(err.to_string())
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
