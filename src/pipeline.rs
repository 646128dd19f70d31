//! End-to-end detection pipeline: audio window -> feature window ->
//! classifier -> debouncer -> event sink.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crate::audio::provider::AudioProvider;
use crate::error::Result;
use crate::features::SlidingFeatureWindow;
use crate::models::Classifier;
use crate::recognizer::{Decision, LevelDebouncer};

/// Receives the latest decision once per processed tick, whether or not a new
/// event fired.
pub trait EventSink {
    fn on_decision(&mut self, timestamp_ms: i64, decision: &Decision);
}

/// Sink that logs fired events and traces everything else.
pub struct LogEventSink;

impl EventSink for LogEventSink {
    fn on_decision(&mut self, timestamp_ms: i64, decision: &Decision) {
        if decision.is_new_event {
            log::info!(
                "heard {} ({}) @{}ms",
                decision.level,
                decision.score,
                timestamp_ms
            );
        } else {
            log::trace!(
                "current belief: {} ({}) @{}ms",
                decision.level,
                decision.score,
                timestamp_ms
            );
        }
    }
}

/// Drives one consumer-side control loop over the pipeline stages.
pub struct LevelPipeline<A: AudioProvider> {
    audio: A,
    features: SlidingFeatureWindow,
    classifier: Box<dyn Classifier>,
    debouncer: LevelDebouncer,
    previous_time: i64,
}

impl<A: AudioProvider> LevelPipeline<A> {
    pub fn new(
        audio: A,
        features: SlidingFeatureWindow,
        classifier: Box<dyn Classifier>,
        debouncer: LevelDebouncer,
    ) -> Self {
        Self {
            audio,
            features,
            classifier,
            debouncer,
            previous_time: 0,
        }
    }

    /// Runs one tick: recompute elapsed feature slices, and if any were new,
    /// classify and debounce. Returns the decision, or `None` when no stride
    /// interval elapsed and inference was skipped.
    ///
    /// A failed tick reports its error and leaves retained state for the next
    /// tick; it never tears the pipeline down.
    pub fn tick(&mut self, sink: &mut dyn EventSink) -> Result<Option<Decision>> {
        let current_time = self.audio.latest_timestamp();
        let new_slices =
            self.features
                .populate(&mut self.audio, self.previous_time, current_time)?;
        self.previous_time = current_time;

        if new_slices == 0 {
            return Ok(None);
        }

        let scores = self.classifier.classify(self.features.features())?;
        let decision = self.debouncer.process(&scores, current_time)?;
        sink.on_decision(current_time, &decision);
        Ok(Some(decision))
    }

    /// Runs ticks until `stop` is set. Per-tick errors are logged and the loop
    /// continues with state intact.
    pub fn run(&mut self, sink: &mut dyn EventSink, stop: &AtomicBool) -> Result<()> {
        log::info!("pipeline running");
        while !stop.load(Ordering::Acquire) {
            match self.tick(sink) {
                Ok(Some(_)) => {}
                // No stride elapsed; yield briefly instead of spinning.
                Ok(None) => thread::sleep(Duration::from_millis(5)),
                Err(e) => {
                    log::error!("tick failed: {}", e);
                    thread::sleep(Duration::from_millis(5));
                }
            }
        }
        log::info!("pipeline stopped");
        Ok(())
    }
}
