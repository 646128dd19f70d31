//! Score smoothing and level-change debouncing.
//!
//! The classifier emits a noisy int8 score vector on every tick. This module
//! keeps a bounded, time-ordered history of those vectors, averages them over a
//! sliding time window, and applies a hysteresis/suppression policy so that a
//! user-visible event fires only on a genuine level change rather than on every
//! flicker of the per-tick scores.

use std::collections::VecDeque;

use strum::{Display, EnumCount, FromRepr};

use crate::error::{LevelError, Result};

/// Constant added to re-center a signed quantized score onto the unsigned
/// 0-255 confidence scale before averaging.
const ZERO_POINT_OFFSET: i32 = 128;

/// Detected power level. Variant order matches the classifier's output
/// categories; `None` is the neutral/background category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumCount, FromRepr)]
#[strum(serialize_all = "lowercase")]
pub enum PowerLevel {
    None,
    Low,
    High,
    Silence,
    Unknown,
}

/// Tunables for the debouncing policy.
#[derive(Debug, Clone)]
pub struct DebounceConfig {
    pub averaging_window_ms: i64,
    pub detection_threshold: u8,
    pub suppression_ms: i64,
    pub minimum_count: usize,
    pub history_capacity: usize,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            averaging_window_ms: 1000,
            detection_threshold: 200,
            suppression_ms: 1500,
            minimum_count: 5,
            history_capacity: 50,
        }
    }
}

/// One classifier output with the capture-timeline time it was produced at.
#[derive(Debug, Clone)]
struct ResultRecord {
    time_ms: i64,
    scores: [i8; PowerLevel::COUNT],
}

/// The debouncer's verdict for one tick.
///
/// `level`/`score` always report the current belief; `is_new_event` is true
/// only when the threshold, category-change, and suppression conditions all
/// allow a fresh notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub level: PowerLevel,
    pub score: u8,
    pub is_new_event: bool,
}

/// Converts raw per-tick classifier scores into stable level-change events.
pub struct LevelDebouncer {
    config: DebounceConfig,
    history: VecDeque<ResultRecord>,
    previous_top: PowerLevel,
    previous_top_time: Option<i64>,
}

impl LevelDebouncer {
    pub fn new(config: DebounceConfig) -> Self {
        let capacity = config.history_capacity;
        Self {
            config,
            history: VecDeque::with_capacity(capacity),
            previous_top: PowerLevel::None,
            previous_top_time: None,
        }
    }

    /// Ingests one raw score vector stamped with `current_time_ms`.
    ///
    /// Timestamps must be non-decreasing with respect to the oldest retained
    /// record, and the history must have room; either violation is reported
    /// without mutating any retained state.
    pub fn process(&mut self, raw_scores: &[i8], current_time_ms: i64) -> Result<Decision> {
        if raw_scores.len() != PowerLevel::COUNT {
            return Err(LevelError::ScoreShape {
                expected: PowerLevel::COUNT,
                got: raw_scores.len(),
            });
        }
        if let Some(oldest) = self.history.front() {
            if current_time_ms < oldest.time_ms {
                return Err(LevelError::OutOfOrderTimestamp {
                    current: current_time_ms,
                    oldest: oldest.time_ms,
                });
            }
        }
        if self.history.len() >= self.config.history_capacity {
            return Err(LevelError::ResultHistoryFull {
                capacity: self.config.history_capacity,
            });
        }

        let mut scores = [0i8; PowerLevel::COUNT];
        scores.copy_from_slice(raw_scores);
        self.history.push_back(ResultRecord {
            time_ms: current_time_ms,
            scores,
        });

        // Prune results that have aged out of the averaging window.
        let time_limit = current_time_ms - self.config.averaging_window_ms;
        while self
            .history
            .front()
            .is_some_and(|record| record.time_ms < time_limit)
        {
            self.history.pop_front();
        }

        // Bootstrap guard: with too few results, or a window that covers too
        // little time, the average is unreliable; keep the previous decision.
        let how_many_results = self.history.len();
        let earliest_time = self
            .history
            .front()
            .map(|record| record.time_ms)
            .unwrap_or(current_time_ms);
        let samples_duration = current_time_ms - earliest_time;
        if how_many_results < self.config.minimum_count
            || samples_duration < self.config.averaging_window_ms / 4
        {
            return Ok(Decision {
                level: self.previous_top,
                score: 0,
                is_new_event: false,
            });
        }

        // Average each category over the window. Scores are re-centered onto
        // the unsigned scale before summing; the divide truncates, matching the
        // quantized reference behavior.
        let mut average_scores = [0i32; PowerLevel::COUNT];
        for record in &self.history {
            for (sum, &score) in average_scores.iter_mut().zip(record.scores.iter()) {
                *sum += score as i32 + ZERO_POINT_OFFSET;
            }
        }
        for sum in average_scores.iter_mut() {
            *sum /= how_many_results as i32;
        }

        // First strictly-greater value wins, so ties keep the lowest index.
        let mut current_top_index = 0;
        let mut current_top_score = 0i32;
        for (index, &average) in average_scores.iter().enumerate() {
            if average > current_top_score {
                current_top_score = average;
                current_top_index = index;
            }
        }
        let current_top = PowerLevel::from_repr(current_top_index).unwrap_or(PowerLevel::None);

        // A neutral previous category, or no prior event at all, never
        // suppresses: treat the elapsed time as infinite.
        let time_since_last_top = match (self.previous_top, self.previous_top_time) {
            (PowerLevel::None, _) | (_, None) => i64::MAX,
            (_, Some(previous_time)) => current_time_ms - previous_time,
        };

        let is_new_event = current_top_score > self.config.detection_threshold as i32
            && (current_top != self.previous_top
                || time_since_last_top > self.config.suppression_ms);
        if is_new_event {
            self.previous_top = current_top;
            self.previous_top_time = Some(current_time_ms);
        }

        Ok(Decision {
            level: current_top,
            score: current_top_score.clamp(0, 255) as u8,
            is_new_event,
        })
    }

    /// Number of results currently retained in the averaging window.
    pub fn retained_results(&self) -> usize {
        self.history.len()
    }
}
