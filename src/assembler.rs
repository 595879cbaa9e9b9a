//! Packages normalization diagnostics and predictions into one response

use crate::models::PredictionResult;
use crate::normalizer::{Diagnostics, NormalizedMatrix};
use crate::types::PredictCsvResponse;

/// Build the response body. Pure: no I/O, no clocks, no ids.
pub fn assemble(
    diagnostics: Diagnostics,
    matrix: &NormalizedMatrix,
    prediction: PredictionResult,
    include_matrix: bool,
) -> PredictCsvResponse {
    PredictCsvResponse {
        row_count: matrix.n_rows(),
        used_columns: diagnostics.used_columns,
        dropped_columns: diagnostics.dropped_columns,
        numeric_columns_detected: diagnostics.numeric_columns_detected,
        original_columns: diagnostics.original_columns,
        predictions: prediction.labels,
        probabilities: prediction.probabilities,
        model_input_matrix: include_matrix.then(|| matrix.to_rows()),
    }
}
