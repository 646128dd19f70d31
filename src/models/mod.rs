pub mod classifier;
pub mod features;

pub use classifier::TfLiteClassifier;
pub use features::{TfLiteFeatureConfig, TfLiteFeatureExtractor};

use crate::error::Result;

/// Inference engine consumed as a black box: a fully populated quantized
/// feature matrix in, a fixed-shape quantized score vector out.
pub trait Classifier {
    fn classify(&self, features: &[i8]) -> Result<Vec<i8>>;
}
