//! Tap tempo estimation
//!
//! Converts a phrase of manual taps into a tempo. A long pause between taps
//! starts a new phrase: the pause must exceed both the configured reset
//! window and twice the most recent inter-tap interval.

use crate::error::{Error, Result};
use dm_common::config::TapSettings;
use dm_common::protocol::{MAX_BPM, MIN_BPM};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Intervals needed before the largest and smallest are discarded
const OUTLIER_TRIM_MIN_INTERVALS: usize = 5;

/// Bounded history of recent taps
#[derive(Debug, Clone)]
pub struct TapEstimator {
    taps: VecDeque<Instant>,
    reset_after: Duration,
    max_taps: usize,
}

impl TapEstimator {
    /// Create an estimator
    ///
    /// `max_taps` below 2 is raised to 2, the minimum that yields an estimate.
    pub fn new(reset_after: Duration, max_taps: usize) -> Self {
        let max_taps = max_taps.max(2);
        Self {
            taps: VecDeque::with_capacity(max_taps),
            reset_after,
            max_taps,
        }
    }

    pub fn from_settings(settings: &TapSettings) -> Self {
        Self::new(Duration::from_millis(settings.reset_ms), settings.max_taps)
    }

    /// Record a tap
    ///
    /// Returns `true` when the pause since the previous tap started a new
    /// phrase and the older taps were discarded.
    pub fn register_tap(&mut self, at: Instant) -> bool {
        let reset = match self.taps.back() {
            Some(&last) => at.saturating_duration_since(last) > self.reset_threshold(),
            None => false,
        };
        if reset {
            self.taps.clear();
        }

        self.taps.push_back(at);
        while self.taps.len() > self.max_taps {
            self.taps.pop_front();
        }
        reset
    }

    /// Estimate tempo from the current phrase
    ///
    /// Fails with `InsufficientData` when fewer than two taps are available;
    /// the caller must leave the tempo untouched in that case.
    pub fn estimate_bpm(&self) -> Result<u32> {
        let mut intervals = self.intervals();
        if intervals.is_empty() {
            return Err(Error::InsufficientData {
                taps: self.taps.len(),
            });
        }

        if intervals.len() >= OUTLIER_TRIM_MIN_INTERVALS {
            intervals.sort_unstable();
            intervals.pop();
            intervals.remove(0);
        }

        let total: Duration = intervals.iter().sum();
        let mean_ms = total.as_secs_f64() * 1000.0 / intervals.len() as f64;
        if mean_ms <= 0.0 {
            return Err(Error::InsufficientData {
                taps: self.taps.len(),
            });
        }

        let bpm = (60_000.0 / mean_ms).round();
        Ok(bpm.clamp(MIN_BPM as f64, MAX_BPM as f64) as u32)
    }

    fn intervals(&self) -> Vec<Duration> {
        self.taps
            .iter()
            .zip(self.taps.iter().skip(1))
            .map(|(a, b)| b.saturating_duration_since(*a))
            .collect()
    }

    fn reset_threshold(&self) -> Duration {
        let len = self.taps.len();
        if len < 2 {
            return self.reset_after;
        }
        let last = self.taps[len - 1].saturating_duration_since(self.taps[len - 2]);
        self.reset_after.max(last * 2)
    }
}

impl Default for TapEstimator {
    fn default() -> Self {
        Self::from_settings(&TapSettings::default())
    }
}
