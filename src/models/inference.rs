//! Inference adapter around the opaque classifier

use crate::error::{PipelineError, PipelineResult};
use crate::metrics::ServiceMetrics;
use crate::models::classifier::{Classifier, RawLabel};
use ndarray::Array2;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error};

/// Result of model inference
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionResult {
    /// One class label per row
    pub labels: Vec<i64>,
    /// Per-row class probabilities, when the model can estimate them
    pub probabilities: Option<Vec<Vec<f64>>>,
}

/// Runs the classifier on a normalized matrix and converts its outputs
/// into response-safe types
#[derive(Clone)]
pub struct InferenceAdapter {
    classifier: Arc<dyn Classifier>,
    metrics: Option<Arc<ServiceMetrics>>,
}

impl InferenceAdapter {
    pub fn new(classifier: Arc<dyn Classifier>) -> Self {
        Self {
            classifier,
            metrics: None,
        }
    }

    /// Record per-call model latency in `metrics`
    pub fn with_metrics(mut self, metrics: Arc<ServiceMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn classifier(&self) -> &Arc<dyn Classifier> {
        &self.classifier
    }

    /// Whether missing values can be left for the model to handle
    pub fn owns_imputation(&self) -> bool {
        self.classifier.owns_imputation()
    }

    /// Predict labels (and probabilities if supported) for every row.
    ///
    /// Fails as a whole: a single bad row or output fails the request.
    pub fn predict(&self, features: &Array2<f64>) -> PipelineResult<PredictionResult> {
        let rows = features.nrows();
        let model_name = self.classifier.name().to_string();
        let start = Instant::now();

        let (raw_labels, probabilities) =
            self.classifier.predict_with_proba(features).map_err(|e| {
                error!(model = %model_name, error = %e, "Model prediction failed");
                PipelineError::inference(e)
            })?;
        if raw_labels.len() != rows {
            return Err(PipelineError::Inference(format!(
                "model returned {} labels for {} rows",
                raw_labels.len(),
                rows
            )));
        }
        let labels = raw_labels
            .iter()
            .enumerate()
            .map(|(row, label)| {
                coerce_label(label)
                    .map_err(|e| PipelineError::Inference(format!("row {}: {}", row, e)))
            })
            .collect::<PipelineResult<Vec<i64>>>()?;

        if let Some(probabilities) = &probabilities {
            if probabilities.len() != rows {
                return Err(PipelineError::Inference(format!(
                    "model returned probabilities for {} rows, expected {}",
                    probabilities.len(),
                    rows
                )));
            }
        }

        let elapsed = start.elapsed();
        if let Some(metrics) = &self.metrics {
            metrics.record_model_time(&model_name, elapsed);
        }

        debug!(
            model = %model_name,
            rows = rows,
            with_probabilities = probabilities.is_some(),
            inference_us = elapsed.as_micros(),
            "Inference complete"
        );

        Ok(PredictionResult {
            labels,
            probabilities,
        })
    }
}

/// Coerce a raw model label to an integer class.
///
/// Floats are truncated toward zero and must be finite; strings must parse
/// as a number.
pub fn coerce_label(label: &RawLabel) -> Result<i64, String> {
    match label {
        RawLabel::Int(v) => Ok(*v),
        RawLabel::Float(v) => float_to_label(*v),
        RawLabel::Text(s) => {
            let trimmed = s.trim();
            if let Ok(v) = trimmed.parse::<i64>() {
                return Ok(v);
            }
            match trimmed.parse::<f64>() {
                Ok(v) => float_to_label(v),
                Err(_) => Err(format!("label {:?} is not an integer class", s)),
            }
        }
    }
}

fn float_to_label(v: f64) -> Result<i64, String> {
    if !v.is_finite() || v.abs() >= i64::MAX as f64 {
        return Err(format!("label {} cannot be converted to an integer", v));
    }
    Ok(v.trunc() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{bail, Result};
    use ndarray::array;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Predicts 1 when the first feature is positive
    struct SignClassifier {
        with_proba: bool,
    }

    impl Classifier for SignClassifier {
        fn name(&self) -> &str {
            "sign"
        }

        fn predict(&self, features: &Array2<f64>) -> Result<Vec<RawLabel>> {
            Ok(features
                .rows()
                .into_iter()
                .map(|r| RawLabel::Int(if r[0] > 0.0 { 1 } else { 0 }))
                .collect())
        }

        fn predict_proba(&self, features: &Array2<f64>) -> Result<Option<Vec<Vec<f64>>>> {
            if !self.with_proba {
                return Ok(None);
            }
            Ok(Some(
                features
                    .rows()
                    .into_iter()
                    .map(|r| if r[0] > 0.0 { vec![0.2, 0.8] } else { vec![0.9, 0.1] })
                    .collect(),
            ))
        }
    }

    /// Counts how many times the model is evaluated
    #[derive(Default)]
    struct CountingModel {
        passes: AtomicUsize,
    }

    impl Classifier for CountingModel {
        fn name(&self) -> &str {
            "counting"
        }

        fn predict(&self, features: &Array2<f64>) -> Result<Vec<RawLabel>> {
            self.passes.fetch_add(1, Ordering::SeqCst);
            Ok(vec![RawLabel::Int(1); features.nrows()])
        }

        fn predict_proba(&self, features: &Array2<f64>) -> Result<Option<Vec<Vec<f64>>>> {
            self.passes.fetch_add(1, Ordering::SeqCst);
            Ok(Some(vec![vec![0.4, 0.6]; features.nrows()]))
        }

        fn predict_with_proba(
            &self,
            features: &Array2<f64>,
        ) -> Result<(Vec<RawLabel>, Option<Vec<Vec<f64>>>)> {
            self.passes.fetch_add(1, Ordering::SeqCst);
            let rows = features.nrows();
            Ok((
                vec![RawLabel::Int(1); rows],
                Some(vec![vec![0.4, 0.6]; rows]),
            ))
        }
    }

    struct FixedLabels(Vec<RawLabel>);

    impl Classifier for FixedLabels {
        fn name(&self) -> &str {
            "fixed"
        }

        fn predict(&self, _features: &Array2<f64>) -> Result<Vec<RawLabel>> {
            Ok(self.0.clone())
        }
    }

    struct Broken;

    impl Classifier for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn predict(&self, _features: &Array2<f64>) -> Result<Vec<RawLabel>> {
            bail!("shape mismatch in graph")
        }
    }

    #[test]
    fn test_predict_with_probabilities() {
        let adapter = InferenceAdapter::new(Arc::new(SignClassifier { with_proba: true }));
        let result = adapter.predict(&array![[1.5, 0.0], [-2.0, 1.0]]).unwrap();

        assert_eq!(result.labels, vec![1, 0]);
        assert_eq!(
            result.probabilities,
            Some(vec![vec![0.2, 0.8], vec![0.9, 0.1]])
        );
    }

    #[test]
    fn test_single_model_pass_per_request() {
        let model = Arc::new(CountingModel::default());
        let adapter = InferenceAdapter::new(model.clone());
        let result = adapter.predict(&array![[1.0], [2.0]]).unwrap();

        assert_eq!(result.labels, vec![1, 1]);
        assert_eq!(result.probabilities.map(|p| p.len()), Some(2));
        assert_eq!(model.passes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_missing_probability_capability_is_not_an_error() {
        let adapter = InferenceAdapter::new(Arc::new(SignClassifier { with_proba: false }));
        let result = adapter.predict(&array![[1.0], [2.0], [-1.0]]).unwrap();

        assert_eq!(result.labels, vec![1, 1, 0]);
        assert!(result.probabilities.is_none());
    }

    #[test]
    fn test_model_failure_is_inference_error() {
        let adapter = InferenceAdapter::new(Arc::new(Broken));
        let err = adapter.predict(&array![[1.0]]).unwrap_err();

        assert_eq!(err.kind(), "inference_error");
        assert!(err.to_string().contains("shape mismatch in graph"));
    }

    #[test]
    fn test_label_count_mismatch() {
        let adapter = InferenceAdapter::new(Arc::new(FixedLabels(vec![RawLabel::Int(1)])));
        let err = adapter.predict(&array![[1.0], [2.0]]).unwrap_err();
        assert_eq!(err.kind(), "inference_error");
    }

    #[test]
    fn test_non_numeric_label_fails() {
        let adapter = InferenceAdapter::new(Arc::new(FixedLabels(vec![RawLabel::Text(
            "CONFIRMED".to_string(),
        )])));
        let err = adapter.predict(&array![[1.0]]).unwrap_err();
        assert!(err.to_string().contains("CONFIRMED"));
    }

    #[test]
    fn test_coerce_label() {
        assert_eq!(coerce_label(&RawLabel::Int(2)), Ok(2));
        assert_eq!(coerce_label(&RawLabel::Float(1.0)), Ok(1));
        assert_eq!(coerce_label(&RawLabel::Float(-1.7)), Ok(-1));
        assert_eq!(coerce_label(&RawLabel::Text(" 3 ".to_string())), Ok(3));
        assert_eq!(coerce_label(&RawLabel::Text("2.0".to_string())), Ok(2));
        assert!(coerce_label(&RawLabel::Float(f64::NAN)).is_err());
        assert!(coerce_label(&RawLabel::Float(f64::INFINITY)).is_err());
        assert!(coerce_label(&RawLabel::Text("FALSE POSITIVE".to_string())).is_err());
    }

    #[test]
    fn test_model_time_recorded() {
        let metrics = Arc::new(ServiceMetrics::new());
        let adapter = InferenceAdapter::new(Arc::new(SignClassifier { with_proba: false }))
            .with_metrics(metrics.clone());
        adapter.predict(&array![[1.0]]).unwrap();

        assert_eq!(metrics.get_model_stats().get("sign").map(|s| s.calls), Some(1));
    }
}
