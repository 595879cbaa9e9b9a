//! ONNX model loader

use anyhow::{Context, Result};
use ort::session::{builder::GraphOptimizationLevel, Session};
use std::path::Path;
use tracing::{info, warn};

/// Metadata key holding the JSON array of training column names
pub const FEATURE_NAMES_KEY: &str = "feature_names";

/// Metadata key flagging a model that embeds its own imputer
pub const IMPUTER_KEY: &str = "has_imputer";

/// Loaded ONNX model with metadata
pub struct LoadedModel {
    /// Model name
    pub name: String,
    /// ONNX Runtime session
    pub session: Session,
    /// Input name for the feature tensor
    pub input_name: String,
    /// Output name for predicted labels
    pub label_output: String,
    /// Output name for class probabilities, when the graph has one
    pub probability_output: Option<String>,
    /// Training column names from the model metadata
    pub feature_names: Option<Vec<String>>,
    /// Whether the graph imputes missing values itself
    pub has_imputer: bool,
}

/// Loader for ONNX models
pub struct ModelLoader {
    /// Number of threads for ONNX inference
    onnx_threads: usize,
}

impl ModelLoader {
    /// Create a new model loader with default settings (1 thread)
    pub fn new() -> Result<Self> {
        Self::with_threads(1)
    }

    /// Create a new model loader with specified number of threads
    pub fn with_threads(onnx_threads: usize) -> Result<Self> {
        ort::init().commit()?;
        info!(onnx_threads = onnx_threads, "ONNX Runtime initialized");
        Ok(Self { onnx_threads })
    }

    /// Load a classifier from an ONNX file
    pub fn load_model<P: AsRef<Path>>(&self, path: P) -> Result<LoadedModel> {
        let path = path.as_ref();
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "model".to_string());

        info!(model = %name, path = %path.display(), threads = self.onnx_threads, "Loading ONNX model");

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(self.onnx_threads)?
            .commit_from_file(path)
            .with_context(|| format!("Failed to load model from {:?}", path))?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .unwrap_or_else(|| "float_input".to_string());

        let output_names: Vec<String> = session.outputs.iter().map(|o| o.name.clone()).collect();
        let (label_output, probability_output) = select_outputs(&output_names)
            .with_context(|| format!("Model {:?} declares no outputs", path))?;

        let (feature_names, has_imputer) = read_metadata(&session, &name);

        info!(
            model = %name,
            input = %input_name,
            label_output = %label_output,
            probability_output = ?probability_output,
            recorded_features = feature_names.as_ref().map(|f| f.len()),
            has_imputer = has_imputer,
            "Model loaded successfully"
        );

        Ok(LoadedModel {
            name,
            session,
            input_name,
            label_output,
            probability_output,
            feature_names,
            has_imputer,
        })
    }
}

impl Default for ModelLoader {
    fn default() -> Self {
        Self { onnx_threads: 1 }
    }
}

/// Pick the label output and, if present, the probability output.
///
/// Labels come from the output whose name mentions "label", else the first
/// output. Probabilities come from an output whose name mentions "prob".
fn select_outputs(names: &[String]) -> Option<(String, Option<String>)> {
    let label = names
        .iter()
        .find(|n| n.to_lowercase().contains("label"))
        .or_else(|| names.first())?
        .clone();

    let probability = names
        .iter()
        .find(|n| **n != label && n.to_lowercase().contains("prob"))
        .cloned();

    Some((label, probability))
}

fn read_metadata(session: &Session, model_name: &str) -> (Option<Vec<String>>, bool) {
    let metadata = match session.metadata() {
        Ok(metadata) => metadata,
        Err(e) => {
            warn!(model = %model_name, error = %e, "Could not read model metadata");
            return (None, false);
        }
    };

    let feature_names = match metadata.custom(FEATURE_NAMES_KEY) {
        Ok(Some(raw)) => match parse_feature_names(&raw) {
            Some(names) => Some(names),
            None => {
                warn!(model = %model_name, key = FEATURE_NAMES_KEY, "Ignoring malformed feature names in metadata");
                None
            }
        },
        Ok(None) => None,
        Err(e) => {
            warn!(model = %model_name, error = %e, "Could not read feature names from metadata");
            None
        }
    };

    let has_imputer = matches!(
        metadata.custom(IMPUTER_KEY),
        Ok(Some(flag)) if flag.trim().eq_ignore_ascii_case("true")
    );

    (feature_names, has_imputer)
}

/// Parse a metadata value holding a JSON array of strings
fn parse_feature_names(raw: &str) -> Option<Vec<String>> {
    serde_json::from_str::<Vec<String>>(raw).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_select_sklearn_outputs() {
        let (label, prob) =
            select_outputs(&names(&["output_label", "output_probability"])).unwrap();
        assert_eq!(label, "output_label");
        assert_eq!(prob.as_deref(), Some("output_probability"));
    }

    #[test]
    fn test_select_label_only() {
        let (label, prob) = select_outputs(&names(&["variable"])).unwrap();
        assert_eq!(label, "variable");
        assert_eq!(prob, None);
    }

    #[test]
    fn test_select_no_outputs() {
        assert!(select_outputs(&[]).is_none());
    }

    #[test]
    fn test_parse_feature_names() {
        assert_eq!(
            parse_feature_names(r#"["koi_period", "koi_depth"]"#),
            Some(names(&["koi_period", "koi_depth"]))
        );
        assert_eq!(parse_feature_names(r#"["a", 1]"#), None);
        assert_eq!(parse_feature_names("koi_period"), None);
    }
}
