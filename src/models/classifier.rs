//! Quantized level classifier backed by TensorFlow Lite.

use std::path::Path;
use std::sync::Mutex;

use tflitec::interpreter::{Interpreter, Options};
use tflitec::model::Model;
use tflitec::tensor::Shape;

use crate::error::{LevelError, Result};
use crate::models::Classifier;

/// Runs the quantized level-classification model over a flattened feature
/// matrix. The model's tensors are uint8-quantized; the signed scores the
/// pipeline works with are bit-cast at this boundary.
pub struct TfLiteClassifier {
    interpreter: Mutex<Interpreter<'static>>,
    feature_len: usize,
    category_count: usize,
}

impl TfLiteClassifier {
    pub fn new(model_path: &str, feature_len: usize, category_count: usize) -> Result<Self> {
        if !Path::new(model_path).exists() {
            return Err(LevelError::ModelLoad(format!(
                "model file not found: {}",
                model_path
            )));
        }

        // Load the model and leak it for 'static lifetime
        let model = Box::leak(Box::new(Model::new(model_path).map_err(|e| {
            LevelError::ModelLoad(format!("failed to load classifier model: {}", e))
        })?));

        let mut options = Options::default();
        options.thread_count = 1;

        let interpreter = Interpreter::new(model, Some(options)).map_err(|e| {
            LevelError::ModelLoad(format!("failed to create classifier interpreter: {}", e))
        })?;

        let input_shape = Shape::new(vec![1, feature_len]);
        interpreter.resize_input(0, input_shape).map_err(|e| {
            LevelError::ModelLoad(format!("failed to resize classifier input: {}", e))
        })?;

        interpreter.allocate_tensors().map_err(|e| {
            LevelError::ModelLoad(format!("failed to allocate classifier tensors: {}", e))
        })?;

        log::info!(
            "level classifier loaded: {} features in, {} categories out",
            feature_len,
            category_count
        );

        Ok(Self {
            interpreter: Mutex::new(interpreter),
            feature_len,
            category_count,
        })
    }
}

impl Classifier for TfLiteClassifier {
    fn classify(&self, features: &[i8]) -> Result<Vec<i8>> {
        if features.len() != self.feature_len {
            return Err(LevelError::Inference(format!(
                "expected {} features, got {}",
                self.feature_len,
                features.len()
            )));
        }

        let interpreter = self
            .interpreter
            .lock()
            .map_err(|e| LevelError::Inference(format!("failed to lock interpreter: {}", e)))?;

        let input: Vec<u8> = features.iter().map(|&value| value as u8).collect();
        interpreter
            .copy(&input[..], 0)
            .map_err(|e| LevelError::Inference(format!("failed to set classifier input: {}", e)))?;

        interpreter
            .invoke()
            .map_err(|e| LevelError::Inference(format!("classifier inference failed: {}", e)))?;

        let output_tensor = interpreter
            .output(0)
            .map_err(|e| LevelError::Inference(format!("failed to get classifier output: {}", e)))?;

        let output_data = output_tensor.data::<u8>();
        if output_data.len() != self.category_count {
            return Err(LevelError::Inference(format!(
                "classifier produced {} scores, expected {}",
                output_data.len(),
                self.category_count
            )));
        }

        Ok(output_data.iter().map(|&value| value as i8).collect())
    }
}
