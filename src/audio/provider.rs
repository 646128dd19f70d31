//! Rolling audio window over the capture ring buffer.
//!
//! The producer thread pulls fixed-size chunks from the capture source, pushes
//! them into the ring buffer, and advances the shared capture timeline strictly
//! in proportion to the bytes it actually enqueued. The consumer side stitches
//! retained history with fresh ring-buffer reads to hand out fixed-size,
//! overlapping analysis windows.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::audio::capture::CaptureSource;
use crate::config::PipelineConfig;
use crate::error::{LevelError, Result};
use crate::ring_buffer::{RingBuffer, TransferOutcome};

/// Bounded wait for producer ring writes and consumer ring reads.
const TRANSFER_WAIT: Duration = Duration::from_millis(10);
/// How long the first `get_samples` call waits for the producer's first chunk.
const STARTUP_WAIT: Duration = Duration::from_secs(2);

/// Source of fixed-size audio analysis windows on the capture timeline.
///
/// Implemented by [`RollingAudioWindow`]; the trait exists so the feature
/// window and pipeline can run against a scripted provider in tests.
pub trait AudioProvider {
    /// Returns exactly `duration_ms` worth of samples nominally ending at the
    /// current read position. Freshness is best-effort: under back-pressure or
    /// capture stalls the tail of the window may be stale.
    fn get_samples(&mut self, start_ms: i64, duration_ms: u32) -> Result<&[i16]>;

    /// Most recent capture-timeline value in milliseconds.
    fn latest_timestamp(&self) -> i64;
}

/// Owns the capture producer, the ring buffer, and the retained history tail.
pub struct RollingAudioWindow {
    config: PipelineConfig,
    ring: Arc<RingBuffer>,
    timeline: Arc<AtomicI64>,
    history: Vec<i16>,
    window: Vec<i16>,
    byte_scratch: Vec<u8>,
    source: Option<Box<dyn CaptureSource>>,
    producer: Option<JoinHandle<()>>,
    stop_flag: Arc<AtomicBool>,
}

impl RollingAudioWindow {
    pub fn new(config: &PipelineConfig, source: Box<dyn CaptureSource>) -> Self {
        Self {
            config: config.clone(),
            ring: Arc::new(RingBuffer::new("audio_capture", config.ring_capacity_bytes)),
            timeline: Arc::new(AtomicI64::new(0)),
            history: vec![0i16; config.history_samples()],
            window: vec![0i16; config.frame_samples()],
            byte_scratch: vec![0u8; config.stride_samples() * 2],
            source: Some(source),
            producer: None,
            stop_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Starts the background capture producer. Idempotent; called lazily from
    /// the first `get_samples`. Waits (bounded) until the timeline has advanced
    /// past zero so the first window carries a defined timestamp.
    pub fn start(&mut self) -> Result<()> {
        if self.producer.is_some() {
            return Ok(());
        }
        let source = self
            .source
            .take()
            .ok_or_else(|| LevelError::Audio("capture producer already consumed".to_string()))?;

        let ring = Arc::clone(&self.ring);
        let timeline = Arc::clone(&self.timeline);
        let stop_flag = Arc::clone(&self.stop_flag);
        let sample_rate = self.config.sample_rate;
        let chunk_samples = self.config.capture_chunk_bytes / 2;
        let handle = thread::Builder::new()
            .name("audio-producer".to_string())
            .spawn(move || run_producer(source, ring, timeline, stop_flag, sample_rate, chunk_samples))
            .map_err(|e| LevelError::Audio(format!("failed to spawn capture producer: {}", e)))?;
        self.producer = Some(handle);

        let deadline = Instant::now() + STARTUP_WAIT;
        while self.timeline.load(Ordering::Acquire) == 0 {
            if Instant::now() >= deadline {
                return Err(LevelError::Audio(
                    "capture producer did not deliver audio in time".to_string(),
                ));
            }
            thread::sleep(Duration::from_millis(5));
        }
        log::info!("audio recording started");
        Ok(())
    }

    /// Stops the producer and joins its thread. Safe to call repeatedly.
    pub fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::Release);
        self.ring.abort_write();
        if let Some(handle) = self.producer.take() {
            if handle.join().is_err() {
                log::error!("capture producer panicked");
            }
        }
    }
}

impl AudioProvider for RollingAudioWindow {
    fn get_samples(&mut self, start_ms: i64, duration_ms: u32) -> Result<&[i16]> {
        if duration_ms != self.config.frame_duration_ms {
            return Err(LevelError::Audio(format!(
                "requested {}ms window, provider is configured for {}ms frames",
                duration_ms, self.config.frame_duration_ms
            )));
        }
        self.start()?;

        let history_len = self.history.len();
        let stride = self.config.stride_samples();

        // Front of the window is the overlap with the previous frame.
        self.window[..history_len].copy_from_slice(&self.history);

        // Remainder comes from the ring; shortfalls degrade freshness only.
        let wanted = stride * 2;
        match self.ring.read(&mut self.byte_scratch[..wanted], TRANSFER_WAIT) {
            TransferOutcome::Delivered(n) if n < wanted => {
                log::debug!(
                    "partial window read at {}ms: {} of {} bytes (ring filled: {})",
                    start_ms,
                    n,
                    wanted,
                    self.ring.filled()
                );
            }
            TransferOutcome::Delivered(_) => {}
            TransferOutcome::TimedOut => {
                log::debug!("window read at {}ms timed out, reusing stale samples", start_ms);
            }
            TransferOutcome::StreamEnded => {
                log::debug!("capture stream ended, window at {}ms reuses stale samples", start_ms);
            }
            TransferOutcome::Aborted => {
                return Err(LevelError::Audio("audio ring buffer read aborted".to_string()));
            }
        }
        // Bytes the read did not refresh keep their previous (stale) contents.
        for (i, sample) in self.window[history_len..].iter_mut().enumerate() {
            *sample = i16::from_le_bytes([self.byte_scratch[2 * i], self.byte_scratch[2 * i + 1]]);
        }

        // Retain the tail of this window as the next frame's overlap.
        self.history.copy_from_slice(&self.window[stride..]);
        Ok(&self.window)
    }

    fn latest_timestamp(&self) -> i64 {
        self.timeline.load(Ordering::Acquire)
    }
}

impl Drop for RollingAudioWindow {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Producer loop: capture source -> ring buffer, advancing the timeline by
/// `written_bytes / 2 / sample_rate * 1000` so back-pressure slows the reported
/// timeline instead of desynchronizing it from the enqueued audio.
fn run_producer(
    mut source: Box<dyn CaptureSource>,
    ring: Arc<RingBuffer>,
    timeline: Arc<AtomicI64>,
    stop_flag: Arc<AtomicBool>,
    sample_rate: u32,
    chunk_samples: usize,
) {
    let mut samples = vec![0i16; chunk_samples];
    let mut bytes = vec![0u8; chunk_samples * 2];
    while !stop_flag.load(Ordering::Acquire) {
        let captured = match source.next_chunk(&mut samples) {
            Ok(0) => {
                log::info!("capture source ended");
                ring.signal_writer_finished();
                break;
            }
            Ok(n) => {
                if n < chunk_samples {
                    log::warn!("partial capture chunk: {} of {} samples", n, chunk_samples);
                }
                n
            }
            Err(e) => {
                log::error!("capture read failed: {}", e);
                continue;
            }
        };

        for (i, &sample) in samples[..captured].iter().enumerate() {
            bytes[2 * i..2 * i + 2].copy_from_slice(&sample.to_le_bytes());
        }
        match ring.write(&bytes[..captured * 2], TRANSFER_WAIT) {
            TransferOutcome::Delivered(written) => {
                if written < captured * 2 {
                    log::warn!("partial ring write: {} of {} bytes", written, captured * 2);
                }
                let advance_ms = (written as i64 / 2) * 1000 / sample_rate as i64;
                timeline.fetch_add(advance_ms, Ordering::Release);
            }
            TransferOutcome::TimedOut => {
                log::warn!("ring buffer full, dropped {} bytes of capture", captured * 2);
            }
            TransferOutcome::Aborted | TransferOutcome::StreamEnded => {
                log::info!("capture producer shutting down");
                break;
            }
        }
    }
}
