//! End-to-end pipeline tests with scripted audio, a passthrough feature
//! transform, and a constant classifier, validating that raw per-tick scores
//! debounce into exactly one level-change event.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use level_edge_rs::audio::AudioProvider;
use level_edge_rs::config::PipelineConfig;
use level_edge_rs::error::Result;
use level_edge_rs::features::{FeatureExtractor, SlidingFeatureWindow};
use level_edge_rs::models::Classifier;
use level_edge_rs::pipeline::{EventSink, LevelPipeline};
use level_edge_rs::recognizer::{Decision, LevelDebouncer, PowerLevel};
use strum::EnumCount;

/// Capture timeline under test control: the window content is constant, only
/// the clock moves.
struct FakeAudioProvider {
    window: Vec<i16>,
    time_ms: Rc<Cell<i64>>,
}

impl AudioProvider for FakeAudioProvider {
    fn get_samples(&mut self, _start_ms: i64, _duration_ms: u32) -> Result<&[i16]> {
        Ok(&self.window)
    }

    fn latest_timestamp(&self) -> i64 {
        self.time_ms.get()
    }
}

struct PassthroughExtractor;

impl FeatureExtractor for PassthroughExtractor {
    fn initialize(&mut self) -> Result<()> {
        Ok(())
    }

    fn generate(&mut self, samples: &[i16], out: &mut [i8]) -> Result<usize> {
        out.fill(0);
        Ok(samples.len())
    }
}

/// Returns the shared score vector on every call and counts invocations. The
/// scores live behind a shared cell so a test can change the favored category
/// mid-run.
struct ConstClassifier {
    scores: Rc<RefCell<Vec<i8>>>,
    calls: Rc<Cell<u32>>,
}

impl Classifier for ConstClassifier {
    fn classify(&self, _features: &[i8]) -> Result<Vec<i8>> {
        self.calls.set(self.calls.get() + 1);
        Ok(self.scores.borrow().clone())
    }
}

#[derive(Default)]
struct RecordingSink {
    decisions: Vec<(i64, Decision)>,
}

impl EventSink for RecordingSink {
    fn on_decision(&mut self, timestamp_ms: i64, decision: &Decision) {
        self.decisions.push((timestamp_ms, *decision));
    }
}

struct Harness {
    pipeline: LevelPipeline<FakeAudioProvider>,
    time_ms: Rc<Cell<i64>>,
    scores: Rc<RefCell<Vec<i8>>>,
    classifier_calls: Rc<Cell<u32>>,
    sink: RecordingSink,
}

impl Harness {
    /// Makes the classifier favor `level` with `raw_score` from the next tick
    /// on, reporting the quantized minimum for every other category.
    fn set_scores(&self, level: PowerLevel, raw_score: i8) {
        let mut scores = self.scores.borrow_mut();
        scores.fill(-128);
        scores[level as usize] = raw_score;
    }
}

fn harness(level: PowerLevel, raw_score: i8) -> Harness {
    let config = PipelineConfig::default();
    let time_ms = Rc::new(Cell::new(0i64));
    let classifier_calls = Rc::new(Cell::new(0u32));
    let scores = Rc::new(RefCell::new(vec![-128i8; PowerLevel::COUNT]));
    scores.borrow_mut()[level as usize] = raw_score;

    let audio = FakeAudioProvider {
        window: vec![0i16; config.frame_samples()],
        time_ms: Rc::clone(&time_ms),
    };
    let features = SlidingFeatureWindow::new(&config, Box::new(PassthroughExtractor));
    let classifier = ConstClassifier {
        scores: Rc::clone(&scores),
        calls: Rc::clone(&classifier_calls),
    };

    let pipeline = LevelPipeline::new(
        audio,
        features,
        Box::new(classifier),
        LevelDebouncer::new(config.debounce()),
    );

    Harness {
        pipeline,
        time_ms,
        scores,
        classifier_calls,
        sink: RecordingSink::default(),
    }
}

#[test_log::test]
fn sustained_high_level_fires_exactly_one_event() {
    // Raw 120 re-centers to 248 on the unsigned scale, above the default
    // threshold of 200.
    let mut h = harness(PowerLevel::High, 120);

    for tick in 1..=10 {
        h.time_ms.set(tick * 100);
        let decision = h.pipeline.tick(&mut h.sink).expect("tick");
        assert!(decision.is_some(), "time advanced, inference must run");
    }

    let events: Vec<_> = h
        .sink
        .decisions
        .iter()
        .filter(|(_, decision)| decision.is_new_event)
        .collect();
    assert_eq!(events.len(), 1, "one sustained level, one event");

    // The event fires at the first tick where the history holds the minimum
    // of five results spanning a quarter of the averaging window.
    let (time, decision) = events[0];
    assert_eq!(*time, 500);
    assert_eq!(decision.level, PowerLevel::High);
    assert_eq!(decision.score, 248);

    // Every later tick is suppressed: same category, within 1500ms.
    assert!(h
        .sink
        .decisions
        .iter()
        .filter(|(t, _)| *t > 500)
        .all(|(_, decision)| !decision.is_new_event));
}

#[test_log::test]
fn early_ticks_report_neutral_belief_without_events() {
    let mut h = harness(PowerLevel::High, 120);

    for tick in 1..=4 {
        h.time_ms.set(tick * 100);
        h.pipeline.tick(&mut h.sink).expect("tick");
    }

    // Fewer than five retained results: the previous (neutral) belief holds.
    assert_eq!(h.sink.decisions.len(), 4);
    assert!(h.sink.decisions.iter().all(|(_, decision)| {
        decision.level == PowerLevel::None && decision.score == 0 && !decision.is_new_event
    }));
}

#[test_log::test]
fn tick_without_elapsed_stride_skips_inference() {
    let mut h = harness(PowerLevel::High, 120);

    h.time_ms.set(100);
    assert!(h.pipeline.tick(&mut h.sink).expect("tick").is_some());
    assert_eq!(h.classifier_calls.get(), 1);

    // Clock unchanged: no new slices, no inference, nothing sunk.
    let decision = h.pipeline.tick(&mut h.sink).expect("tick");
    assert!(decision.is_none());
    assert_eq!(h.classifier_calls.get(), 1);
    assert_eq!(h.sink.decisions.len(), 1);
}

#[test_log::test]
fn level_change_fires_again_without_waiting_out_suppression() {
    let mut h = harness(PowerLevel::High, 120);

    for tick in 1..=5 {
        h.time_ms.set(tick * 100);
        h.pipeline.tick(&mut h.sink).expect("tick");
    }
    assert_eq!(
        h.sink
            .decisions
            .iter()
            .filter(|(_, d)| d.is_new_event)
            .count(),
        1
    );

    // Swap the classifier's favored category; the averaging window drains of
    // High scores as Low scores arrive, and once Low wins the average a
    // second event fires despite being inside the suppression interval.
    h.set_scores(PowerLevel::Low, 120);

    for tick in 6..=20 {
        h.time_ms.set(tick * 100);
        h.pipeline.tick(&mut h.sink).expect("tick");
    }

    let events: Vec<_> = h
        .sink
        .decisions
        .iter()
        .filter(|(_, decision)| decision.is_new_event)
        .collect();
    assert_eq!(events.len(), 2);
    assert_eq!(events[1].1.level, PowerLevel::Low);
    assert!(events[1].0 - events[0].0 < 1500);
}
