//! Per-request prediction pipeline: bytes in, response body out

use crate::assembler::assemble;
use crate::config::{AppConfig, ImputationMode};
use crate::contract::FeatureContract;
use crate::error::PipelineResult;
use crate::models::InferenceAdapter;
use crate::normalizer::TableNormalizer;
use crate::table::TableLoader;
use crate::types::PredictCsvResponse;
use anyhow::Result;
use tracing::{debug, info};

/// Per-request switches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestOptions {
    /// Include the matrix handed to the model in the response
    pub return_features: bool,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            return_features: true,
        }
    }
}

/// Loader, normalizer and model wired to one feature contract.
///
/// Holds only read-only state, so one instance serves every request.
pub struct PredictionPipeline {
    contract: FeatureContract,
    loader: TableLoader,
    normalizer: TableNormalizer,
    adapter: InferenceAdapter,
    fill_missing: bool,
}

impl PredictionPipeline {
    pub fn new(
        contract: FeatureContract,
        loader: TableLoader,
        normalizer: TableNormalizer,
        adapter: InferenceAdapter,
        imputation: ImputationMode,
    ) -> Self {
        let fill_missing = match imputation {
            ImputationMode::RequestMedian => true,
            ImputationMode::Model => false,
            ImputationMode::Auto => !adapter.owns_imputation(),
        };

        info!(
            model = %adapter.classifier().name(),
            features = contract.len(),
            imputation = ?imputation,
            fill_missing = fill_missing,
            "Prediction pipeline ready"
        );

        Self {
            contract,
            loader,
            normalizer,
            adapter,
            fill_missing,
        }
    }

    /// Build the pipeline from configuration
    pub fn from_config(
        config: &AppConfig,
        contract: FeatureContract,
        adapter: InferenceAdapter,
    ) -> Result<Self> {
        Ok(Self::new(
            contract,
            TableLoader::from_config(&config.normalization)?,
            TableNormalizer::from_config(&config.normalization),
            adapter,
            config.models.imputation,
        ))
    }

    pub fn contract(&self) -> &FeatureContract {
        &self.contract
    }

    pub fn model_name(&self) -> &str {
        self.adapter.classifier().name()
    }

    /// Whether missing values are filled before inference
    pub fn fills_missing(&self) -> bool {
        self.fill_missing
    }

    /// Decode, normalize, predict and package one upload
    pub fn run(&self, bytes: &[u8], options: RequestOptions) -> PipelineResult<PredictCsvResponse> {
        let table = self.loader.load(bytes)?;
        let normalized = self
            .normalizer
            .normalize(&table, &self.contract, self.fill_missing)?;
        drop(table);

        debug!(
            rows = normalized.matrix.n_rows(),
            dropped = ?normalized.diagnostics.dropped_columns,
            "Upload normalized"
        );

        let prediction = self.adapter.predict(normalized.matrix.values())?;

        Ok(assemble(
            normalized.diagnostics,
            &normalized.matrix,
            prediction,
            options.return_features,
        ))
    }
}
