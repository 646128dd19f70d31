pub mod capture;
pub mod provider;

pub use capture::{CaptureConfig, CaptureSource, CpalCapture, CpalSource, WavFileSource};
pub use provider::{AudioProvider, RollingAudioWindow};
