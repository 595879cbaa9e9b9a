//! ONNX Runtime implementation of [`Classifier`]

use crate::models::classifier::{Classifier, RawLabel};
use crate::models::loader::{LoadedModel, ModelLoader};
use anyhow::{anyhow, bail, Context, Result};
use ndarray::Array2;
use ort::memory::Allocator;
use ort::session::SessionOutputs;
use ort::value::{DowncastableTarget, DynMapValueType, DynSequenceValueType, DynValue, Tensor};
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

/// Classifier backed by an ONNX Runtime session.
///
/// Running a session needs exclusive access, so runs are serialized.
pub struct OnnxClassifier {
    name: String,
    model: Mutex<LoadedModel>,
    label_output: String,
    probability_output: Option<String>,
    feature_names: Option<Vec<String>>,
    has_imputer: bool,
}

impl OnnxClassifier {
    /// Load the model file with the given intra-op thread count
    pub fn load<P: AsRef<Path>>(path: P, onnx_threads: usize) -> Result<Self> {
        let loader = ModelLoader::with_threads(onnx_threads)?;
        let model = loader.load_model(path)?;
        Ok(Self::from_loaded(model))
    }

    pub fn from_loaded(model: LoadedModel) -> Self {
        Self {
            name: model.name.clone(),
            label_output: model.label_output.clone(),
            probability_output: model.probability_output.clone(),
            feature_names: model.feature_names.clone(),
            has_imputer: model.has_imputer,
            model: Mutex::new(model),
        }
    }

    /// Run the session and hand the outputs to `extract` while the lock is held
    fn run<T>(
        &self,
        features: &Array2<f64>,
        extract: impl FnOnce(&SessionOutputs) -> Result<T>,
    ) -> Result<T> {
        let (rows, cols) = features.dim();
        let shape = vec![rows as i64, cols as i64];
        let data: Vec<f32> = features.iter().map(|&v| v as f32).collect();
        let input_tensor =
            Tensor::from_array((shape, data)).context("Failed to create input tensor")?;

        let mut guard = self
            .model
            .lock()
            .map_err(|e| anyhow!("Lock error: {}", e))?;
        let model = &mut *guard;

        let outputs = model
            .session
            .run(ort::inputs![model.input_name.as_str() => input_tensor])?;

        extract(&outputs)
    }

    fn read_labels(&self, outputs: &SessionOutputs) -> Result<Vec<RawLabel>> {
        let output = outputs
            .get(self.label_output.as_str())
            .ok_or_else(|| anyhow!("Model output {:?} missing", self.label_output))?;
        let labels = extract_labels(output)?;
        debug!(model = %self.name, rows = labels.len(), "Extracted labels");
        Ok(labels)
    }

    fn read_probabilities(
        &self,
        outputs: &SessionOutputs,
        rows: usize,
    ) -> Result<Option<Vec<Vec<f64>>>> {
        let Some(output_name) = self.probability_output.as_deref() else {
            return Ok(None);
        };
        let output = outputs
            .get(output_name)
            .ok_or_else(|| anyhow!("Model output {:?} missing", output_name))?;
        let probabilities = extract_probabilities(output, rows)?;
        debug!(model = %self.name, rows = probabilities.len(), "Extracted probabilities");
        Ok(Some(probabilities))
    }
}

impl Classifier for OnnxClassifier {
    fn name(&self) -> &str {
        &self.name
    }

    fn predict(&self, features: &Array2<f64>) -> Result<Vec<RawLabel>> {
        self.run(features, |outputs| self.read_labels(outputs))
    }

    fn predict_proba(&self, features: &Array2<f64>) -> Result<Option<Vec<Vec<f64>>>> {
        if self.probability_output.is_none() {
            return Ok(None);
        }
        let rows = features.nrows();
        self.run(features, |outputs| self.read_probabilities(outputs, rows))
    }

    /// Both outputs come from the same session run
    fn predict_with_proba(
        &self,
        features: &Array2<f64>,
    ) -> Result<(Vec<RawLabel>, Option<Vec<Vec<f64>>>)> {
        let rows = features.nrows();
        self.run(features, |outputs| {
            let labels = self.read_labels(outputs)?;
            let probabilities = self.read_probabilities(outputs, rows)?;
            Ok((labels, probabilities))
        })
    }

    fn feature_names(&self) -> Option<Vec<String>> {
        self.feature_names.clone()
    }

    fn owns_imputation(&self) -> bool {
        self.has_imputer
    }
}

/// Labels may be int64, float or string tensors depending on how the
/// model was exported
fn extract_labels(output: &DynValue) -> Result<Vec<RawLabel>> {
    if let Ok((_, data)) = output.try_extract_tensor::<i64>() {
        return Ok(data.iter().map(|&v| RawLabel::Int(v)).collect());
    }
    if let Ok((_, data)) = output.try_extract_tensor::<i32>() {
        return Ok(data.iter().map(|&v| RawLabel::Int(v as i64)).collect());
    }
    if let Ok((_, data)) = output.try_extract_tensor::<f32>() {
        return Ok(data.iter().map(|&v| RawLabel::Float(v as f64)).collect());
    }
    if let Ok((_, data)) = output.try_extract_tensor::<f64>() {
        return Ok(data.iter().map(|&v| RawLabel::Float(v)).collect());
    }
    if let Ok((_, data)) = output.try_extract_strings() {
        return Ok(data.into_iter().map(RawLabel::Text).collect());
    }
    bail!("Unsupported label output type {:?}", output.dtype())
}

/// Probabilities come either as a [rows, classes] float tensor or as
/// seq(map(int64, float)), one map per row (sklearn ZipMap)
fn extract_probabilities(output: &DynValue, rows: usize) -> Result<Vec<Vec<f64>>> {
    if let Ok((shape, data)) = output.try_extract_tensor::<f32>() {
        let dims: Vec<i64> = shape.iter().copied().collect();
        let values: Vec<f64> = data.iter().map(|&v| v as f64).collect();
        return split_rows(&dims, values, rows);
    }
    if let Ok((shape, data)) = output.try_extract_tensor::<f64>() {
        let dims: Vec<i64> = shape.iter().copied().collect();
        return split_rows(&dims, data.to_vec(), rows);
    }
    if DynSequenceValueType::can_downcast(&output.dtype()) {
        return extract_from_sequence_map(output);
    }
    bail!("Unsupported probability output type {:?}", output.dtype())
}

fn split_rows(dims: &[i64], values: Vec<f64>, rows: usize) -> Result<Vec<Vec<f64>>> {
    let classes = match dims {
        [_, classes] => *classes as usize,
        [n] if rows == 1 => *n as usize,
        _ => bail!("Unexpected probability tensor shape {:?}", dims),
    };
    if classes == 0 || values.len() != rows * classes {
        bail!(
            "Probability tensor holds {} values, expected {} rows x {} classes",
            values.len(),
            rows,
            classes
        );
    }
    Ok(values.chunks(classes).map(|c| c.to_vec()).collect())
}

fn extract_from_sequence_map(output: &DynValue) -> Result<Vec<Vec<f64>>> {
    let allocator = Allocator::default();

    let sequence = output
        .downcast_ref::<DynSequenceValueType>()
        .map_err(|e| anyhow!("Failed to downcast to sequence: {}", e))?;
    let maps = sequence.try_extract_sequence::<DynMapValueType>(&allocator)?;

    let mut rows = Vec::with_capacity(maps.len());
    for map_value in &maps {
        let mut pairs = map_value.try_extract_key_values::<i64, f32>()?;
        pairs.sort_by_key(|(class_id, _)| *class_id);
        rows.push(pairs.into_iter().map(|(_, p)| p as f64).collect());
    }
    Ok(rows)
}
