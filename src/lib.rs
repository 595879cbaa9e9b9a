//! CSV Classifier API Library
//!
//! Serves a trained tabular classifier over HTTP. Uploaded CSV tables are
//! normalized to the model's fixed feature contract, scored, and returned
//! with diagnostics about which columns were used or dropped.

pub mod assembler;
pub mod config;
pub mod contract;
pub mod error;
pub mod metrics;
pub mod models;
pub mod normalizer;
pub mod pipeline;
pub mod server;
pub mod table;
pub mod types;

pub use config::AppConfig;
pub use contract::FeatureContract;
pub use error::{ConfigurationError, PipelineError};
pub use models::{Classifier, InferenceAdapter, OnnxClassifier};
pub use normalizer::TableNormalizer;
pub use pipeline::{PredictionPipeline, RequestOptions};
pub use server::{create_router, AppContext};
pub use table::TableLoader;
pub use types::PredictCsvResponse;
