//! Model loading and inference components

pub mod classifier;
pub mod inference;
pub mod loader;
pub mod onnx;

pub use classifier::{Classifier, RawLabel};
pub use inference::{InferenceAdapter, PredictionResult};
pub use loader::ModelLoader;
pub use onnx::OnnxClassifier;
