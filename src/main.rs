use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;

use level_edge_rs::audio::{
    CaptureConfig, CaptureSource, CpalCapture, RollingAudioWindow, WavFileSource,
};
use level_edge_rs::config::PipelineConfig;
use level_edge_rs::error::{LevelError, Result};
use level_edge_rs::features::SlidingFeatureWindow;
use level_edge_rs::models::{TfLiteClassifier, TfLiteFeatureConfig, TfLiteFeatureExtractor};
use level_edge_rs::pipeline::{LevelPipeline, LogEventSink};
use level_edge_rs::recognizer::{LevelDebouncer, PowerLevel};
use strum::EnumCount;

/// Streaming audio level-event detector.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Path to the quantized level-classification model.
    #[arg(long, default_value = "models/level_classifier.tflite")]
    model: String,

    /// Path to the feature-transform model.
    #[arg(long, default_value = "models/micro_features.tflite")]
    feature_model: String,

    /// Optional JSON pipeline configuration; unset fields keep their defaults.
    #[arg(long)]
    config: Option<String>,

    /// Capture device name; the host default is used when unset.
    #[arg(long)]
    device: Option<String>,

    /// Read audio from a 16-bit mono WAV file instead of a capture device.
    #[arg(long)]
    wav: Option<String>,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => PipelineConfig::from_file(path)?,
        None => PipelineConfig::default(),
    };
    config.validate()?;

    // The cpal stream handle is not Send, so it stays on this thread for the
    // life of the run while the Send half feeds the producer.
    let mut capture_guard: Option<CpalCapture> = None;
    let source: Box<dyn CaptureSource> = match &args.wav {
        Some(path) => {
            log::info!("reading audio from {}", path);
            Box::new(WavFileSource::open(path, config.sample_rate, true)?)
        }
        None => {
            let (guard, source) = CpalCapture::start(CaptureConfig {
                sample_rate: config.sample_rate,
                channels: 1,
                device_name: args.device.clone(),
            })?;
            capture_guard = Some(guard);
            Box::new(source)
        }
    };

    let mut audio = RollingAudioWindow::new(&config, source);
    audio.start()?;

    let extractor = TfLiteFeatureExtractor::new(TfLiteFeatureConfig {
        model_path: args.feature_model.clone(),
        frame_samples: config.frame_samples(),
        slice_width: config.slice_width,
        ..Default::default()
    });
    let features = SlidingFeatureWindow::new(&config, Box::new(extractor));

    let classifier = TfLiteClassifier::new(
        &args.model,
        config.feature_element_count(),
        PowerLevel::COUNT,
    )?;

    let debouncer = LevelDebouncer::new(config.debounce());
    let mut pipeline = LevelPipeline::new(audio, features, Box::new(classifier), debouncer);

    let stop = Arc::new(AtomicBool::new(false));
    let stop_handler = Arc::clone(&stop);
    ctrlc::set_handler(move || {
        log::info!("shutdown requested");
        stop_handler.store(true, Ordering::Release);
    })
    .map_err(|e| LevelError::Config(format!("failed to install signal handler: {}", e)))?;

    let mut sink = LogEventSink;
    pipeline.run(&mut sink, &stop)?;

    drop(capture_guard);
    Ok(())
}
