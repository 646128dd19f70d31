//! Spectral feature extraction backed by a TensorFlow Lite transform model.
//!
//! The transform itself is a black box: one analysis frame of raw samples in,
//! one float feature vector out, quantized here onto the signed int8 scale the
//! classifier expects.

use std::path::Path;
use std::sync::Mutex;

use tflitec::interpreter::{Interpreter, Options};
use tflitec::model::Model;
use tflitec::tensor::Shape;

use crate::error::{LevelError, Result};
use crate::features::FeatureExtractor;

#[derive(Debug, Clone)]
pub struct TfLiteFeatureConfig {
    /// Path to the feature-transform model.
    pub model_path: String,
    /// Samples per analysis frame the model expects.
    pub frame_samples: usize,
    /// Feature values produced per frame.
    pub slice_width: usize,
    /// Quantization scale applied to the model's float output.
    pub output_scale: f32,
    /// Quantization zero point for the model's float output.
    pub output_zero_point: i32,
}

impl Default for TfLiteFeatureConfig {
    fn default() -> Self {
        Self {
            model_path: "models/micro_features.tflite".to_string(),
            frame_samples: 480,
            slice_width: 40,
            output_scale: 0.25,
            output_zero_point: -128,
        }
    }
}

/// Lazily loaded feature-transform interpreter. `initialize` must run once
/// before the first `generate`.
pub struct TfLiteFeatureExtractor {
    config: TfLiteFeatureConfig,
    interpreter: Option<Mutex<Interpreter<'static>>>,
    input_scratch: Vec<f32>,
}

impl TfLiteFeatureExtractor {
    pub fn new(config: TfLiteFeatureConfig) -> Self {
        let frame_samples = config.frame_samples;
        Self {
            config,
            interpreter: None,
            input_scratch: vec![0.0; frame_samples],
        }
    }
}

impl FeatureExtractor for TfLiteFeatureExtractor {
    fn initialize(&mut self) -> Result<()> {
        if self.interpreter.is_some() {
            return Ok(());
        }
        if !Path::new(&self.config.model_path).exists() {
            return Err(LevelError::ModelLoad(format!(
                "feature model not found: {}",
                self.config.model_path
            )));
        }

        // Load the model and leak it for 'static lifetime
        let model = Box::leak(Box::new(Model::new(&self.config.model_path).map_err(
            |e| LevelError::ModelLoad(format!("failed to load feature model: {}", e)),
        )?));

        let mut options = Options::default();
        options.thread_count = 1;

        let interpreter = Interpreter::new(model, Some(options)).map_err(|e| {
            LevelError::ModelLoad(format!("failed to create feature interpreter: {}", e))
        })?;

        let input_shape = Shape::new(vec![1, self.config.frame_samples]);
        interpreter
            .resize_input(0, input_shape)
            .map_err(|e| LevelError::ModelLoad(format!("failed to resize feature input: {}", e)))?;

        interpreter
            .allocate_tensors()
            .map_err(|e| LevelError::ModelLoad(format!("failed to allocate feature tensors: {}", e)))?;

        log::info!("feature transform loaded from {}", self.config.model_path);
        self.interpreter = Some(Mutex::new(interpreter));
        Ok(())
    }

    fn generate(&mut self, samples: &[i16], out: &mut [i8]) -> Result<usize> {
        if samples.len() < self.config.frame_samples {
            return Err(LevelError::Feature(format!(
                "got {} samples, transform needs {}",
                samples.len(),
                self.config.frame_samples
            )));
        }
        if out.len() != self.config.slice_width {
            return Err(LevelError::Feature(format!(
                "output slice holds {} values, transform produces {}",
                out.len(),
                self.config.slice_width
            )));
        }
        let interpreter = self
            .interpreter
            .as_ref()
            .ok_or_else(|| LevelError::Feature("feature transform not initialized".to_string()))?
            .lock()
            .map_err(|e| LevelError::Feature(format!("failed to lock interpreter: {}", e)))?;

        for (scratch, &sample) in self
            .input_scratch
            .iter_mut()
            .zip(samples[..self.config.frame_samples].iter())
        {
            *scratch = sample as f32 / 32768.0;
        }

        interpreter
            .copy(&self.input_scratch[..], 0)
            .map_err(|e| LevelError::Feature(format!("failed to set transform input: {}", e)))?;

        interpreter
            .invoke()
            .map_err(|e| LevelError::Feature(format!("feature transform failed: {}", e)))?;

        let output_tensor = interpreter
            .output(0)
            .map_err(|e| LevelError::Feature(format!("failed to get transform output: {}", e)))?;
        let output_data = output_tensor.data::<f32>();
        if output_data.len() < self.config.slice_width {
            return Err(LevelError::Feature(format!(
                "transform produced {} values, expected {}",
                output_data.len(),
                self.config.slice_width
            )));
        }

        for (quantized, &value) in out.iter_mut().zip(output_data.iter()) {
            let scaled = value / self.config.output_scale + self.config.output_zero_point as f32;
            *quantized = scaled.round().clamp(-128.0, 127.0) as i8;
        }

        Ok(self.config.frame_samples)
    }
}
