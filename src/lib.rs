//! Streaming audio level-event detector.
//!
//! A producer thread captures 16-bit mono audio into a bounded ring buffer.
//! The consumer side maintains a rolling window over the capture timeline,
//! converts it into a sliding matrix of quantized feature slices, classifies
//! the matrix with a TensorFlow Lite model, and debounces the per-tick scores
//! into stable level-change events.

pub mod audio;
pub mod config;
pub mod error;
pub mod features;
pub mod models;
pub mod pipeline;
pub mod recognizer;
pub mod ring_buffer;

pub use error::{LevelError, Result};
