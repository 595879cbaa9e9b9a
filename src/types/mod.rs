//! Type definitions for the HTTP API

pub mod response;

pub use response::{ErrorBody, FeatureSchema, PredictCsvResponse, ServiceStatus};
