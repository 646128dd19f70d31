//! Sliding window of quantized feature slices.
//!
//! Each tick, only the slices that elapsed since the previous tick are
//! recomputed; the rest of the matrix shifts toward the front. The very first
//! call synthesizes the whole matrix (cold start).

use crate::audio::provider::AudioProvider;
use crate::config::PipelineConfig;
use crate::error::{LevelError, Result};
use crate::features::FeatureExtractor;

/// Fixed matrix of `slice_count` feature slices, `slice_width` values each,
/// covering the most recent `slice_count * stride_ms` milliseconds of audio.
pub struct SlidingFeatureWindow {
    slice_count: usize,
    slice_width: usize,
    stride_ms: i64,
    frame_duration_ms: u32,
    frame_samples: usize,
    data: Vec<i8>,
    extractor: Box<dyn FeatureExtractor>,
    is_first_run: bool,
}

impl SlidingFeatureWindow {
    pub fn new(config: &PipelineConfig, extractor: Box<dyn FeatureExtractor>) -> Self {
        Self {
            slice_count: config.slice_count,
            slice_width: config.slice_width,
            stride_ms: config.frame_stride_ms as i64,
            frame_duration_ms: config.frame_duration_ms,
            frame_samples: config.frame_samples(),
            data: vec![0i8; config.feature_element_count()],
            extractor,
            is_first_run: true,
        }
    }

    /// Recomputes the slices that elapsed between `last_time_ms` and
    /// `current_time_ms`, shifting retained slices toward the front. Returns
    /// the number of new slices written; zero is a valid outcome when called
    /// faster than the stride interval and must not trigger inference.
    ///
    /// On failure the completed shift (and any slices already written) stays
    /// visible; retained older slices are never corrupted.
    pub fn populate(
        &mut self,
        audio: &mut dyn AudioProvider,
        last_time_ms: i64,
        current_time_ms: i64,
    ) -> Result<usize> {
        // Quantize both times into stride-sized steps to find how many slices
        // of audio elapsed.
        let last_step = last_time_ms / self.stride_ms;
        let current_step = current_time_ms / self.stride_ms;

        let mut slices_needed = (current_step - last_step).max(0) as usize;
        if self.is_first_run {
            self.extractor.initialize()?;
            self.is_first_run = false;
            slices_needed = self.slice_count;
        }
        slices_needed = slices_needed.min(self.slice_count);
        if slices_needed == 0 {
            return Ok(0);
        }

        // Shift the retained slices toward the front, oldest discarded.
        let slices_to_keep = self.slice_count - slices_needed;
        if slices_to_keep > 0 {
            self.data.copy_within(slices_needed * self.slice_width.., 0);
        }

        // Compute the new slices in chronological order.
        for new_slice in slices_to_keep..self.slice_count {
            let new_step = current_step - self.slice_count as i64 + 1 + new_slice as i64;
            let slice_start_ms = (new_step * self.stride_ms).max(0);
            let samples = audio.get_samples(slice_start_ms, self.frame_duration_ms)?;
            if samples.len() < self.frame_samples {
                return Err(LevelError::Feature(format!(
                    "audio window of {} samples too small, want {}",
                    samples.len(),
                    self.frame_samples
                )));
            }
            let offset = new_slice * self.slice_width;
            self.extractor
                .generate(samples, &mut self.data[offset..offset + self.slice_width])?;
        }

        log::trace!(
            "populated {} new feature slices for t={}ms",
            slices_needed,
            current_time_ms
        );
        Ok(slices_needed)
    }

    /// The flattened feature matrix, oldest slice first.
    pub fn features(&self) -> &[i8] {
        &self.data
    }
}
