//! Pipeline configuration and derived audio/feature geometry.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{LevelError, Result};
use crate::recognizer::DebounceConfig;

/// Tunable configuration for the whole detection pipeline.
///
/// The defaults reproduce the reference tuning: 16 kHz capture, 30 ms analysis
/// frames advancing by 20 ms, a 49x40 quantized feature window, and a one
/// second score-averaging window with a 1.5 s suppression interval.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Capture sample rate in Hz.
    pub sample_rate: u32,
    /// Length of one analysis frame in milliseconds.
    pub frame_duration_ms: u32,
    /// Time advance between consecutive frames in milliseconds.
    pub frame_stride_ms: u32,
    /// Number of feature slices retained in the sliding window.
    pub slice_count: usize,
    /// Quantized values per feature slice.
    pub slice_width: usize,
    /// Capacity of the capture ring buffer in bytes.
    pub ring_capacity_bytes: usize,
    /// Size of one producer capture chunk in bytes (16-bit samples).
    pub capture_chunk_bytes: usize,
    /// Score-averaging window in milliseconds.
    pub averaging_window_ms: i64,
    /// Detection threshold on the 0-255 averaged confidence scale.
    pub detection_threshold: u8,
    /// Minimum interval between repeated events for the same category.
    pub suppression_ms: i64,
    /// Minimum number of retained results before a decision is attempted.
    pub minimum_count: usize,
    /// Capacity of the bounded result history.
    pub result_history_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            frame_duration_ms: 30,
            frame_stride_ms: 20,
            slice_count: 49,
            slice_width: 40,
            ring_capacity_bytes: 80000,
            capture_chunk_bytes: 3200,
            averaging_window_ms: 1000,
            detection_threshold: 200,
            suppression_ms: 1500,
            minimum_count: 5,
            result_history_capacity: 50,
        }
    }
}

impl PipelineConfig {
    /// Loads and validates a configuration from a JSON file. Unspecified fields
    /// keep their defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| {
            LevelError::Config(format!(
                "failed to parse {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        config.validate()?;
        log::info!("loaded pipeline config from {}", path.as_ref().display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 || self.sample_rate % 1000 != 0 {
            return Err(LevelError::Config(format!(
                "sample rate {} must be a non-zero multiple of 1000",
                self.sample_rate
            )));
        }
        if self.frame_stride_ms == 0 || self.frame_stride_ms > self.frame_duration_ms {
            return Err(LevelError::Config(format!(
                "frame stride {}ms must be non-zero and no longer than the {}ms frame",
                self.frame_stride_ms, self.frame_duration_ms
            )));
        }
        if self.slice_count == 0 || self.slice_width == 0 {
            return Err(LevelError::Config(
                "feature window dimensions must be non-zero".to_string(),
            ));
        }
        if self.capture_chunk_bytes == 0 || self.capture_chunk_bytes % 2 != 0 {
            return Err(LevelError::Config(format!(
                "capture chunk of {} bytes must be a non-zero multiple of the 2-byte sample size",
                self.capture_chunk_bytes
            )));
        }
        if self.ring_capacity_bytes < self.capture_chunk_bytes {
            return Err(LevelError::Config(format!(
                "ring capacity {} bytes cannot hold one {}-byte capture chunk",
                self.ring_capacity_bytes, self.capture_chunk_bytes
            )));
        }
        if self.minimum_count == 0 || self.result_history_capacity < self.minimum_count {
            return Err(LevelError::Config(format!(
                "result history capacity {} must cover the minimum count {}",
                self.result_history_capacity, self.minimum_count
            )));
        }
        Ok(())
    }

    /// Samples in one analysis frame.
    pub fn frame_samples(&self) -> usize {
        (self.frame_duration_ms * self.sample_rate / 1000) as usize
    }

    /// Fresh samples consumed per frame advance.
    pub fn stride_samples(&self) -> usize {
        (self.frame_stride_ms * self.sample_rate / 1000) as usize
    }

    /// Samples of retained history covering the overlap between frames.
    pub fn history_samples(&self) -> usize {
        self.frame_samples() - self.stride_samples()
    }

    /// Total elements in the flattened feature matrix.
    pub fn feature_element_count(&self) -> usize {
        self.slice_count * self.slice_width
    }

    pub fn debounce(&self) -> DebounceConfig {
        DebounceConfig {
            averaging_window_ms: self.averaging_window_ms,
            detection_threshold: self.detection_threshold,
            suppression_ms: self.suppression_ms,
            minimum_count: self.minimum_count,
            history_capacity: self.result_history_capacity,
        }
    }
}
