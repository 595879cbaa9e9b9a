//! Feature contract: the ordered input columns the model was trained on.
//!
//! Resolved once at startup. Column order is the exact positional order the
//! model expects, so it is never sorted or deduplicated silently.

use crate::error::ConfigurationError;
use crate::models::Classifier;
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::info;

/// Where the contract came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContractSource {
    /// External JSON manifest
    Manifest(PathBuf),
    /// Column names recorded in the model artifact
    Model,
    /// Constructed directly
    Inline,
}

impl fmt::Display for ContractSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContractSource::Manifest(path) => write!(f, "manifest {}", path.display()),
            ContractSource::Model => write!(f, "model metadata"),
            ContractSource::Inline => write!(f, "inline"),
        }
    }
}

/// Ordered, unique feature column names
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureContract {
    columns: Vec<String>,
    source: ContractSource,
}

impl FeatureContract {
    /// Build a contract from an explicit column list
    pub fn new(columns: Vec<String>) -> Result<Self, ConfigurationError> {
        Self::with_source(columns, ContractSource::Inline)
    }

    fn with_source(columns: Vec<String>, source: ContractSource) -> Result<Self, ConfigurationError> {
        if columns.is_empty() {
            return Err(ConfigurationError::EmptyContract);
        }
        let mut seen = HashSet::with_capacity(columns.len());
        for column in &columns {
            if !seen.insert(column.as_str()) {
                return Err(ConfigurationError::DuplicateFeature(column.clone()));
            }
        }
        Ok(Self { columns, source })
    }

    /// Resolve the contract: the manifest wins when the file exists, then the
    /// model's recorded column names. Anything else is fatal.
    pub fn resolve(
        manifest_path: &Path,
        classifier: &dyn Classifier,
    ) -> Result<Self, ConfigurationError> {
        let contract = if manifest_path.exists() {
            Self::from_manifest(manifest_path)?
        } else if let Some(names) = classifier.feature_names() {
            Self::with_source(names, ContractSource::Model)?
        } else {
            return Err(ConfigurationError::UndefinedContract);
        };

        info!(
            source = %contract.source,
            features = contract.len(),
            "Feature contract resolved"
        );
        Ok(contract)
    }

    /// Read a manifest holding a JSON array of strings
    pub fn from_manifest(path: &Path) -> Result<Self, ConfigurationError> {
        let invalid = |reason: String| ConfigurationError::InvalidManifest {
            path: path.display().to_string(),
            reason,
        };

        let raw = std::fs::read_to_string(path).map_err(|e| invalid(e.to_string()))?;
        let value: Value = serde_json::from_str(&raw).map_err(|e| invalid(e.to_string()))?;

        let Value::Array(items) = value else {
            return Err(invalid("not a JSON array".to_string()));
        };

        let columns = items
            .into_iter()
            .enumerate()
            .map(|(i, item)| match item {
                Value::String(name) => Ok(name),
                other => Err(invalid(format!("element {} is not a string: {}", i, other))),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Self::with_source(columns, ContractSource::Manifest(path.to_path_buf()))
    }

    /// Column names in model order
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Number of features the model expects
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn source(&self) -> &ContractSource {
        &self.source
    }
}
