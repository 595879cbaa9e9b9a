//! Capability interface for the opaque classifier

use anyhow::Result;
use ndarray::Array2;

/// A predicted label as the model emits it, before integer coercion
#[derive(Debug, Clone, PartialEq)]
pub enum RawLabel {
    Int(i64),
    Float(f64),
    Text(String),
}

/// Anything that can classify rows of the normalized feature matrix.
///
/// Only `predict` is required. A model without probability estimates keeps
/// the default `predict_proba`, which reports the capability as absent.
pub trait Classifier: Send + Sync {
    /// Short name used in logs and metrics
    fn name(&self) -> &str;

    /// One label per input row, in row order
    fn predict(&self, features: &Array2<f64>) -> Result<Vec<RawLabel>>;

    /// Per-row class probabilities ordered by class id, or `None` when the
    /// model cannot estimate them
    fn predict_proba(&self, _features: &Array2<f64>) -> Result<Option<Vec<Vec<f64>>>> {
        Ok(None)
    }

    /// Labels and probabilities from a single pass over `features`.
    ///
    /// The default calls `predict` then `predict_proba`; models that produce
    /// both from one evaluation override it.
    fn predict_with_proba(
        &self,
        features: &Array2<f64>,
    ) -> Result<(Vec<RawLabel>, Option<Vec<Vec<f64>>>)> {
        let labels = self.predict(features)?;
        let probabilities = self.predict_proba(features)?;
        Ok((labels, probabilities))
    }

    /// Input column names recorded when the model was fit, if known
    fn feature_names(&self) -> Option<Vec<String>> {
        None
    }

    /// True when the model fills missing values itself
    fn owns_imputation(&self) -> bool {
        false
    }
}
