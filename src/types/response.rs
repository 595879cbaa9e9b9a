//! Response bodies returned by the HTTP API

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result of scoring an uploaded CSV
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictCsvResponse {
    /// Number of data rows scored
    pub row_count: usize,

    /// Feature columns passed to the model, in model order
    pub used_columns: Vec<String>,

    /// Governance and label columns removed from the upload
    pub dropped_columns: Vec<String>,

    /// Numeric columns found after dropping
    pub numeric_columns_detected: Vec<String>,

    /// Header of the upload as parsed
    pub original_columns: Vec<String>,

    /// One class label per row
    pub predictions: Vec<i64>,

    /// Per-row class probabilities, when the model provides them
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probabilities: Option<Vec<Vec<f64>>>,

    /// Exact matrix handed to the model, when requested. When the model
    /// fills missing values itself those cells stay NaN and serialize as
    /// `null`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_input_matrix: Option<Vec<Vec<f64>>>,
}

/// Feature schema for clients validating their CSV before upload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub features: Vec<String>,
}

/// Service status for `GET /`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub status: String,
    pub message: String,
    pub n_features_expected: usize,
    pub model: String,
    pub started_at: DateTime<Utc>,
}

/// Error body for failed requests
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable error kind
    pub kind: String,
    /// Human-readable cause
    pub detail: String,
}
