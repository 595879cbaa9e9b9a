//! CSV Classifier API - Main Entry Point
//!
//! Loads the model and feature contract once, then serves CSV uploads over HTTP.

use anyhow::Result;
use csv_classifier_api::{
    config::{AppConfig, LoggingConfig},
    contract::FeatureContract,
    error::ConfigurationError,
    metrics::{MetricsReporter, ServiceMetrics},
    models::{InferenceAdapter, OnnxClassifier},
    pipeline::PredictionPipeline,
    server::{self, AppContext},
};
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = AppConfig::load()?;

    // Initialize logging
    init_tracing(&config.logging)?;
    info!("Starting CSV Classifier API");
    info!(
        model_path = %config.models.model_path,
        features_path = %config.models.features_path,
        imputation = ?config.models.imputation,
        standardize = config.normalization.standardize,
        "Configuration loaded successfully"
    );

    // Load the model once; failure here means the service does not start
    let classifier = OnnxClassifier::load(&config.models.model_path, config.models.onnx_threads)
        .map_err(|e| ConfigurationError::ModelLoad {
            path: config.models.model_path.clone(),
            reason: format!("{:#}", e),
        })?;
    let classifier = Arc::new(classifier);

    let contract =
        FeatureContract::resolve(Path::new(&config.models.features_path), classifier.as_ref())?;
    info!(
        features = contract.len(),
        source = %contract.source(),
        "Feature contract: {:?}",
        contract.columns()
    );

    // Initialize metrics
    let metrics = Arc::new(ServiceMetrics::new());

    let adapter = InferenceAdapter::new(classifier).with_metrics(metrics.clone());
    let pipeline = PredictionPipeline::from_config(&config, contract, adapter)?;
    let ctx = Arc::new(AppContext::new(pipeline, metrics.clone(), &config));

    // Start metrics reporter
    if config.metrics.report_interval_secs > 0 {
        let reporter = MetricsReporter::new(metrics.clone(), config.metrics.report_interval_secs);
        tokio::spawn(reporter.start());
    }

    server::serve(ctx, &config.server.host, config.server.port).await?;

    // Print final summary
    info!("Service shutting down...");
    metrics.print_summary();

    Ok(())
}

fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&logging.level))?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    if logging.format.eq_ignore_ascii_case("json") {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}
