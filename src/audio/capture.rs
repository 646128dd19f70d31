//! Capture sources feeding the pipeline's producer thread.
//!
//! A [`CaptureSource`] continuously yields fixed-size chunks of 16-bit samples
//! at the configured rate. Two implementations ship here: a cpal-backed
//! microphone source and a hound-backed WAV replay source for tests and demos.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, SupportedStreamConfig};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

use crate::error::{LevelError, Result};

/// Blocking stream of 16-bit mono samples.
pub trait CaptureSource: Send {
    /// Fills as much of `buf` as is available, blocking briefly if necessary.
    /// Returns the number of samples written; `0` means the stream has ended.
    fn next_chunk(&mut self, buf: &mut [i16]) -> Result<usize>;
}

/// Audio capture configuration.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub sample_rate: u32,
    pub channels: usize,
    pub device_name: Option<String>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            channels: 1,
            device_name: None,
        }
    }
}

/// Keep-alive guard for the cpal input stream. Must stay on the thread that
/// created it; dropping it stops capture and ends the paired [`CpalSource`].
pub struct CpalCapture {
    _stream: Stream,
}

/// The `Send` half of a cpal capture: receives mono sample chunks from the
/// stream callback and hands them to the producer thread.
pub struct CpalSource {
    receiver: Receiver<Vec<i16>>,
    pending: Vec<i16>,
}

impl CpalCapture {
    /// Opens the input device and starts capturing. Returns the stream guard
    /// and the `Send` source to move into the producer thread.
    pub fn start(config: CaptureConfig) -> Result<(CpalCapture, CpalSource)> {
        log::info!("starting audio capture: {:?}", config);
        let host = cpal::default_host();
        log::info!("using audio host: {}", host.id().name());

        let device = Self::find_input_device(&host, &config)?;
        let device_name = device
            .name()
            .map_err(|e| LevelError::Audio(format!("failed to get device name: {}", e)))?;
        log::info!("using input device: {}", device_name);

        let stream_config = Self::negotiate_config(&device, &config)?;
        let (sender, receiver) = mpsc::channel();
        let stream = Self::build_stream(&device, &stream_config, config.channels, sender)?;
        stream
            .play()
            .map_err(|e| LevelError::Audio(format!("failed to start audio stream: {}", e)))?;

        Ok((
            CpalCapture { _stream: stream },
            CpalSource {
                receiver,
                pending: Vec::new(),
            },
        ))
    }

    fn find_input_device(config_host: &cpal::Host, config: &CaptureConfig) -> Result<Device> {
        if let Some(device_name) = &config.device_name {
            let devices = config_host
                .input_devices()
                .map_err(|e| LevelError::Audio(format!("failed to enumerate input devices: {}", e)))?;
            for device in devices {
                let name = device
                    .name()
                    .map_err(|e| LevelError::Audio(format!("failed to get device name: {}", e)))?;
                if name.contains(device_name) {
                    log::info!("found matching device: {}", name);
                    return Ok(device);
                }
            }
            Err(LevelError::Audio(format!("device '{}' not found", device_name)))
        } else {
            config_host
                .default_input_device()
                .ok_or_else(|| LevelError::Audio("no default input device available".to_string()))
        }
    }

    fn negotiate_config(
        device: &Device,
        config: &CaptureConfig,
    ) -> Result<SupportedStreamConfig> {
        let supported: Vec<_> = device
            .supported_input_configs()
            .map_err(|e| LevelError::Audio(format!("failed to get supported configs: {}", e)))?
            .collect();

        for range in &supported {
            log::debug!(
                "available config: {} channels, {}-{} Hz, format: {:?}",
                range.channels(),
                range.min_sample_rate().0,
                range.max_sample_rate().0,
                range.sample_format()
            );
        }

        // Exact channel and rate match first.
        for range in &supported {
            if range.channels() == config.channels as u16
                && range.min_sample_rate().0 <= config.sample_rate
                && range.max_sample_rate().0 >= config.sample_rate
            {
                return Ok(range.with_sample_rate(cpal::SampleRate(config.sample_rate)));
            }
        }

        // Fall back to any channel layout that supports the sample rate; the
        // callback extracts channel 0 regardless.
        for range in &supported {
            if range.min_sample_rate().0 <= config.sample_rate
                && range.max_sample_rate().0 >= config.sample_rate
            {
                let negotiated = range.with_sample_rate(cpal::SampleRate(config.sample_rate));
                log::info!(
                    "using fallback config: {:?} (requested {} channels)",
                    negotiated,
                    config.channels
                );
                return Ok(negotiated);
            }
        }

        Err(LevelError::Audio(format!(
            "no suitable audio configuration found for {} channels at {} Hz",
            config.channels, config.sample_rate
        )))
    }

    fn build_stream(
        device: &Device,
        config: &SupportedStreamConfig,
        _requested_channels: usize,
        sender: Sender<Vec<i16>>,
    ) -> Result<Stream> {
        let stream_config = config.config();
        let channels = stream_config.channels as usize;

        let stream = match config.sample_format() {
            SampleFormat::I16 => device
                .build_input_stream(
                    &stream_config,
                    move |data: &[i16], _: &cpal::InputCallbackInfo| {
                        Self::forward_mono(data.iter().copied(), channels, &sender);
                    },
                    |err| log::error!("audio stream error: {}", err),
                    None,
                )
                .map_err(|e| LevelError::Audio(format!("failed to build i16 input stream: {}", e)))?,
            SampleFormat::F32 => device
                .build_input_stream(
                    &stream_config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        let converted = data
                            .iter()
                            .map(|&sample| (sample * i16::MAX as f32).clamp(-32768.0, 32767.0) as i16);
                        Self::forward_mono(converted, channels, &sender);
                    },
                    |err| log::error!("audio stream error: {}", err),
                    None,
                )
                .map_err(|e| LevelError::Audio(format!("failed to build f32 input stream: {}", e)))?,
            SampleFormat::U16 => device
                .build_input_stream(
                    &stream_config,
                    move |data: &[u16], _: &cpal::InputCallbackInfo| {
                        let converted = data
                            .iter()
                            .map(|&sample| (sample as i32 - 32768) as i16);
                        Self::forward_mono(converted, channels, &sender);
                    },
                    |err| log::error!("audio stream error: {}", err),
                    None,
                )
                .map_err(|e| LevelError::Audio(format!("failed to build u16 input stream: {}", e)))?,
            other => {
                return Err(LevelError::Audio(format!(
                    "unsupported sample format: {:?}",
                    other
                )))
            }
        };

        Ok(stream)
    }

    /// Extracts channel 0 from interleaved input and forwards it. A dropped
    /// receiver just means the pipeline shut down first.
    fn forward_mono<I: Iterator<Item = i16>>(samples: I, channels: usize, sender: &Sender<Vec<i16>>) {
        let mono: Vec<i16> = samples.step_by(channels.max(1)).collect();
        if !mono.is_empty() {
            if let Err(e) = sender.send(mono) {
                log::debug!("capture receiver gone: {}", e);
            }
        }
    }
}

impl CaptureSource for CpalSource {
    fn next_chunk(&mut self, buf: &mut [i16]) -> Result<usize> {
        let mut written = 0;
        loop {
            if !self.pending.is_empty() {
                let n = self.pending.len().min(buf.len() - written);
                buf[written..written + n].copy_from_slice(&self.pending[..n]);
                self.pending.drain(..n);
                written += n;
            }
            if written == buf.len() {
                return Ok(written);
            }
            match self.receiver.recv_timeout(Duration::from_millis(500)) {
                Ok(chunk) => self.pending.extend_from_slice(&chunk),
                Err(RecvTimeoutError::Timeout) => {
                    if written > 0 {
                        return Ok(written);
                    }
                    return Err(LevelError::Audio("capture timed out".to_string()));
                }
                // Stream guard dropped: end of stream.
                Err(RecvTimeoutError::Disconnected) => return Ok(written),
            }
        }
    }
}

/// Replays a 16-bit mono WAV file as a capture source. With `paced` set, each
/// chunk is delayed to simulate real-time capture.
pub struct WavFileSource {
    samples: Vec<i16>,
    position: usize,
    sample_rate: u32,
    paced: bool,
}

impl WavFileSource {
    pub fn open(path: &str, expected_rate: u32, paced: bool) -> Result<Self> {
        let mut reader = hound::WavReader::open(path)
            .map_err(|e| LevelError::Audio(format!("failed to open {}: {}", path, e)))?;
        let spec = reader.spec();
        if spec.channels != 1 || spec.bits_per_sample != 16 {
            return Err(LevelError::Audio(format!(
                "{} must be 16-bit mono, got {} channels at {} bits",
                path, spec.channels, spec.bits_per_sample
            )));
        }
        if spec.sample_rate != expected_rate {
            return Err(LevelError::Audio(format!(
                "{} is {} Hz, pipeline expects {} Hz",
                path, spec.sample_rate, expected_rate
            )));
        }
        let samples = reader
            .samples::<i16>()
            .collect::<std::result::Result<Vec<i16>, _>>()
            .map_err(|e| LevelError::Audio(format!("failed to read samples from {}: {}", path, e)))?;
        log::info!(
            "replaying {} ({} samples, {:.2}s)",
            path,
            samples.len(),
            samples.len() as f32 / spec.sample_rate as f32
        );
        Ok(Self {
            samples,
            position: 0,
            sample_rate: spec.sample_rate,
            paced,
        })
    }

    #[cfg(test)]
    pub(crate) fn from_samples(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self {
            samples,
            position: 0,
            sample_rate,
            paced: false,
        }
    }
}

impl CaptureSource for WavFileSource {
    fn next_chunk(&mut self, buf: &mut [i16]) -> Result<usize> {
        if self.position >= self.samples.len() {
            return Ok(0);
        }
        let n = buf.len().min(self.samples.len() - self.position);
        buf[..n].copy_from_slice(&self.samples[self.position..self.position + n]);
        self.position += n;
        if self.paced {
            std::thread::sleep(Duration::from_millis(
                n as u64 * 1000 / self.sample_rate as u64,
            ));
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wav_source_delivers_fixed_chunks_then_ends() {
        let samples: Vec<i16> = (0..100).collect();
        let mut source = WavFileSource::from_samples(samples, 16000);

        let mut buf = [0i16; 32];
        assert_eq!(source.next_chunk(&mut buf).expect("chunk"), 32);
        assert_eq!(buf[0], 0);
        assert_eq!(buf[31], 31);
        assert_eq!(source.next_chunk(&mut buf).expect("chunk"), 32);
        assert_eq!(buf[0], 32);
        assert_eq!(source.next_chunk(&mut buf).expect("chunk"), 32);
        // Tail is shorter than the chunk, then the stream ends.
        assert_eq!(source.next_chunk(&mut buf).expect("chunk"), 4);
        assert_eq!(source.next_chunk(&mut buf).expect("chunk"), 0);
    }

    #[test]
    fn wav_source_validates_format() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("stereo.wav");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 16000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).expect("create wav");
        for _ in 0..64 {
            writer.write_sample(0i16).expect("write");
            writer.write_sample(0i16).expect("write");
        }
        writer.finalize().expect("finalize");

        let result = WavFileSource::open(path.to_str().expect("utf8 path"), 16000, false);
        assert!(result.is_err());
    }
}
