//! Authoritative timing state and the tick state machine
//!
//! [`SchedulerCore`] owns the [`TimingState`] and the [`TempoLadder`] and is
//! the only code that mutates them. It is synchronous and clock-agnostic:
//! callers pass `now` in, which keeps every transition unit-testable. The
//! async [`crate::scheduler::BeatScheduler`] wraps it in a mutex and drives
//! [`SchedulerCore::fire`] from a timer task.
//!
//! # Drift correction
//!
//! Each tick's deadline is the previous *intended* deadline plus one
//! interval, never `now` plus one interval, so timer jitter does not
//! accumulate. A tick serviced late fires once; missed grid slots are skipped
//! rather than replayed in a burst.

use crate::error::{Error, Result};
use crate::events::{BeatEvent, MetronomeEvent, TempoSource};
use crate::ladder::{LadderPlan, LadderState, LadderStep, TempoLadder};
use chrono::Utc;
use dm_common::config::MetronomeSettings;
use dm_common::protocol::clamp_bpm;
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Largest accepted beats per bar
pub const MAX_BEATS_PER_BAR: u32 = 12;

/// Largest accepted subdivisions per beat
pub const MAX_SUBDIVISIONS: u32 = 12;

/// Snapshot of the metronome's timing state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimingState {
    pub bpm: u32,
    pub beats_per_bar: u32,
    pub subdivisions_per_beat: u32,
    pub running: bool,
    /// Beat that the next tick will report
    pub beat_index: u32,
    /// Subdivision that the next tick will report
    pub subdivision_index: u32,
    /// Bars completed since the last start
    pub bar_index: u64,
    pub accent_on_one: bool,
}

impl TimingState {
    /// Create a stopped state; the tempo is clamped, the signature validated
    pub fn new(
        bpm: u32,
        beats_per_bar: u32,
        subdivisions_per_beat: u32,
        accent_on_one: bool,
    ) -> Result<Self> {
        validate_signature(beats_per_bar, subdivisions_per_beat)?;
        Ok(Self {
            bpm: clamp_bpm(bpm as i64),
            beats_per_bar,
            subdivisions_per_beat,
            running: false,
            beat_index: 0,
            subdivision_index: 0,
            bar_index: 0,
            accent_on_one,
        })
    }

    pub fn from_settings(settings: &MetronomeSettings) -> Result<Self> {
        Self::new(
            settings.bpm,
            settings.beats_per_bar,
            settings.subdivision,
            settings.accent_on_one,
        )
    }

    /// Time between consecutive ticks
    pub fn tick_interval(&self) -> Duration {
        tick_interval(self.bpm, self.subdivisions_per_beat)
    }
}

impl Default for TimingState {
    fn default() -> Self {
        Self {
            bpm: dm_common::protocol::DEFAULT_BPM,
            beats_per_bar: 4,
            subdivisions_per_beat: 1,
            running: false,
            beat_index: 0,
            subdivision_index: 0,
            bar_index: 0,
            accent_on_one: true,
        }
    }
}

/// Reject signatures outside `[1, 12]`
pub fn validate_signature(beats_per_bar: u32, subdivisions_per_beat: u32) -> Result<()> {
    if !(1..=MAX_BEATS_PER_BAR).contains(&beats_per_bar) {
        return Err(Error::Validation(format!(
            "beats per bar {} outside [1, {}]",
            beats_per_bar, MAX_BEATS_PER_BAR
        )));
    }
    if !(1..=MAX_SUBDIVISIONS).contains(&subdivisions_per_beat) {
        return Err(Error::Validation(format!(
            "subdivisions per beat {} outside [1, {}]",
            subdivisions_per_beat, MAX_SUBDIVISIONS
        )));
    }
    Ok(())
}

/// 60 s / bpm / subdivisions, at nanosecond resolution
pub fn tick_interval(bpm: u32, subdivisions_per_beat: u32) -> Duration {
    let per_minute = bpm.max(1) as u64 * subdivisions_per_beat.max(1) as u64;
    Duration::from_nanos(60_000_000_000 / per_minute)
}

/// Deadline following `previous_intended` on its grid, strictly after `now`
/// when the loop has fallen behind
pub fn next_deadline(previous_intended: Instant, interval: Duration, now: Instant) -> Instant {
    let next = previous_intended + interval;
    if next > now || interval.is_zero() {
        return next;
    }
    let behind = (now - next).as_nanos();
    let missed = behind / interval.as_nanos() + 1;
    let skip = Duration::from_nanos((interval.as_nanos() * missed) as u64);
    next + skip
}

/// Single-writer owner of the timing state
#[derive(Debug)]
pub struct SchedulerCore {
    state: TimingState,
    ladder: TempoLadder,
    next_due: Option<Instant>,
    last_intended: Option<Instant>,
    outbox: Vec<MetronomeEvent>,
}

impl SchedulerCore {
    pub fn new(state: TimingState) -> Self {
        Self {
            state: TimingState {
                running: false,
                ..state
            },
            ladder: TempoLadder::new(),
            next_due: None,
            last_intended: None,
            outbox: Vec::new(),
        }
    }

    pub fn state(&self) -> TimingState {
        self.state
    }

    pub fn ladder_state(&self) -> LadderState {
        self.ladder.state()
    }

    pub fn ladder_plan(&self) -> Option<LadderPlan> {
        self.ladder.plan()
    }

    /// When the next tick should fire, `None` while stopped
    pub fn next_due(&self) -> Option<Instant> {
        self.next_due
    }

    /// Events produced since the last drain, in order
    pub fn drain_events(&mut self) -> Vec<MetronomeEvent> {
        std::mem::take(&mut self.outbox)
    }

    /// Begin ticking from the top of a bar; no-op when already running
    pub fn start(&mut self, now: Instant) -> bool {
        if self.state.running {
            return false;
        }
        self.state.running = true;
        self.reset_position();
        self.last_intended = None;
        self.next_due = Some(now);
        info!("Metronome started at {} bpm", self.state.bpm);
        self.outbox.push(MetronomeEvent::running_changed(true));
        true
    }

    /// Stop ticking; the position is left as is
    pub fn stop(&mut self) -> bool {
        if !self.state.running {
            return false;
        }
        self.state.running = false;
        self.next_due = None;
        self.last_intended = None;
        info!("Metronome stopped");
        self.outbox.push(MetronomeEvent::running_changed(false));
        true
    }

    /// Apply an explicit tempo, cancelling any active ladder
    ///
    /// Returns the stored (clamped) tempo.
    pub fn set_tempo(&mut self, bpm: i64, source: TempoSource, now: Instant) -> u32 {
        let clamped = clamp_bpm(bpm);
        if clamped as i64 != bpm {
            debug!("Tempo {} clamped to {}", bpm, clamped);
        }
        if self.ladder.cancel() {
            info!("Tempo ladder cancelled by {:?} tempo change", source);
            self.outbox.push(MetronomeEvent::ladder_changed(LadderState::Inactive));
        }
        self.apply_bpm(clamped, source, now);
        clamped
    }

    /// Shift the tempo relative to the stored value
    pub fn nudge_tempo(&mut self, delta: i64, source: TempoSource, now: Instant) -> u32 {
        let target = self.state.bpm as i64 + delta;
        self.set_tempo(target, source, now)
    }

    /// Start when stopped, stop when running; returns the new running flag
    pub fn toggle(&mut self, now: Instant) -> bool {
        if self.state.running {
            self.stop();
            false
        } else {
            self.start(now)
        }
    }

    /// Change beats per bar and subdivisions; resets the bar position
    pub fn set_signature(
        &mut self,
        beats_per_bar: u32,
        subdivisions_per_beat: u32,
        now: Instant,
    ) -> Result<()> {
        validate_signature(beats_per_bar, subdivisions_per_beat)?;
        if beats_per_bar == self.state.beats_per_bar
            && subdivisions_per_beat == self.state.subdivisions_per_beat
        {
            return Ok(());
        }
        self.state.beats_per_bar = beats_per_bar;
        self.state.subdivisions_per_beat = subdivisions_per_beat;
        self.reset_position();
        self.reanchor(now);
        info!(
            "Signature set to {} beats x {} subdivisions",
            beats_per_bar, subdivisions_per_beat
        );
        self.outbox.push(MetronomeEvent::SignatureChanged {
            beats_per_bar,
            subdivisions_per_beat,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    pub fn set_accent_on_one(&mut self, accent_on_one: bool) {
        self.state.accent_on_one = accent_on_one;
    }

    /// Start a tempo ladder and jump to its first rung
    pub fn begin_ladder(&mut self, plan: LadderPlan, now: Instant) -> Result<LadderState> {
        let start_bpm = self.ladder.begin(plan)?;
        let state = self.ladder.state();
        info!(
            "Tempo ladder {} -> {} by {} every {} bar(s)",
            plan.start_bpm, plan.end_bpm, plan.step_bpm, plan.bars_per_step
        );
        self.outbox.push(MetronomeEvent::ladder_changed(state));
        self.apply_bpm(start_bpm, TempoSource::Ladder, now);
        Ok(state)
    }

    pub fn cancel_ladder(&mut self) -> bool {
        let cancelled = self.ladder.cancel();
        if cancelled {
            info!("Tempo ladder cancelled");
            self.outbox.push(MetronomeEvent::ladder_changed(LadderState::Inactive));
        }
        cancelled
    }

    /// Fire the pending tick and schedule the next one
    ///
    /// Returns `None` while stopped.
    pub fn fire(&mut self, now: Instant) -> Option<BeatEvent> {
        let intended = match (self.state.running, self.next_due) {
            (true, Some(due)) => due,
            _ => return None,
        };

        let beat = BeatEvent {
            bar_index: self.state.bar_index,
            beat_index: self.state.beat_index,
            subdivision_index: self.state.subdivision_index,
            is_beat: self.state.subdivision_index == 0,
            is_accent: self.state.accent_on_one
                && self.state.beat_index == 0
                && self.state.subdivision_index == 0,
        };
        self.outbox.push(MetronomeEvent::Beat(beat));
        self.last_intended = Some(intended);

        self.advance_position(now);
        self.next_due = Some(next_deadline(intended, self.state.tick_interval(), now));
        Some(beat)
    }

    fn advance_position(&mut self, now: Instant) {
        self.state.subdivision_index += 1;
        if self.state.subdivision_index < self.state.subdivisions_per_beat {
            return;
        }
        self.state.subdivision_index = 0;
        self.state.beat_index += 1;
        if self.state.beat_index < self.state.beats_per_bar {
            return;
        }
        self.state.beat_index = 0;
        self.state.bar_index += 1;
        self.outbox.push(MetronomeEvent::BarAdvanced {
            bar_index: self.state.bar_index,
        });

        match self.ladder.advance_on_bar_boundary() {
            LadderStep::NoChange => {}
            LadderStep::Step(bpm) => self.apply_bpm(bpm, TempoSource::Ladder, now),
            LadderStep::Final(bpm) => {
                self.apply_bpm(bpm, TempoSource::Ladder, now);
                info!("Tempo ladder completed at {} bpm", bpm);
                self.outbox.push(MetronomeEvent::ladder_changed(LadderState::Completed));
            }
        }
    }

    fn apply_bpm(&mut self, bpm: u32, source: TempoSource, now: Instant) {
        if bpm == self.state.bpm {
            return;
        }
        self.state.bpm = bpm;
        self.reanchor(now);
        debug!("Tempo set to {} ({:?})", bpm, source);
        self.outbox.push(MetronomeEvent::tempo_changed(bpm, source));
    }

    /// Re-derive the pending deadline from the last fired tick so the next
    /// tick uses the current interval
    fn reanchor(&mut self, now: Instant) {
        if !self.state.running {
            return;
        }
        if let Some(last) = self.last_intended {
            self.next_due = Some((last + self.state.tick_interval()).max(now));
        }
    }

    fn reset_position(&mut self) {
        self.state.beat_index = 0;
        self.state.subdivision_index = 0;
        self.state.bar_index = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn core(bpm: u32, beats: u32, subdiv: u32) -> SchedulerCore {
        SchedulerCore::new(TimingState::new(bpm, beats, subdiv, true).unwrap())
    }

    #[test]
    fn test_tick_interval() {
        assert_eq!(tick_interval(120, 1), ms(500));
        assert_eq!(tick_interval(120, 2), ms(250));
        assert_eq!(tick_interval(60, 4), ms(250));
        assert_eq!(tick_interval(100, 1), ms(600));
    }

    #[test]
    fn test_next_deadline_uses_intended_time() {
        let t0 = Instant::now();
        // Serviced 20ms late: next target still on the original grid
        assert_eq!(next_deadline(t0, ms(500), t0 + ms(20)), t0 + ms(500));
    }

    #[test]
    fn test_next_deadline_skips_missed_slots() {
        let t0 = Instant::now();
        // 1.2 intervals late: slot at 500 is gone, next is 1000
        assert_eq!(next_deadline(t0, ms(500), t0 + ms(600)), t0 + ms(1000));
        // Exactly on a slot boundary: that slot counts as missed
        assert_eq!(next_deadline(t0, ms(500), t0 + ms(1000)), t0 + ms(1500));
    }

    #[test]
    fn test_signature_validation() {
        assert!(TimingState::new(100, 0, 1, true).is_err());
        assert!(TimingState::new(100, 4, 0, true).is_err());
        assert!(TimingState::new(100, 13, 1, true).is_err());
        assert!(TimingState::new(100, 4, 13, true).is_err());
        assert!(TimingState::new(100, 12, 12, true).is_ok());
    }

    #[test]
    fn test_set_tempo_stores_exact_or_clamped_value() {
        let mut core = core(100, 4, 1);
        let now = Instant::now();
        for bpm in [20, 21, 120, 399, 400] {
            assert_eq!(core.set_tempo(bpm, TempoSource::Manual, now), bpm as u32);
            assert_eq!(core.state().bpm, bpm as u32);
        }
        assert_eq!(core.set_tempo(5, TempoSource::Manual, now), 20);
        assert_eq!(core.state().bpm, 20);
        assert_eq!(core.set_tempo(1000, TempoSource::Manual, now), 400);
        assert_eq!(core.state().bpm, 400);
    }

    #[test]
    fn test_nudge_is_relative_to_stored_tempo() {
        let mut core = core(100, 4, 1);
        let now = Instant::now();
        assert_eq!(core.nudge_tempo(5, TempoSource::Manual, now), 105);
        assert_eq!(core.nudge_tempo(-10, TempoSource::Manual, now), 95);
        assert_eq!(core.nudge_tempo(1000, TempoSource::Manual, now), 400);
        assert_eq!(core.nudge_tempo(-1000, TempoSource::Manual, now), 20);
    }

    #[test]
    fn test_toggle_flips_running() {
        let mut core = core(100, 4, 1);
        let t0 = Instant::now();
        assert!(core.toggle(t0));
        assert!(core.state().running);
        assert_eq!(core.next_due(), Some(t0));
        assert!(!core.toggle(t0 + ms(10)));
        assert!(!core.state().running);
        assert_eq!(core.next_due(), None);
    }

    #[test]
    fn test_first_tick_is_immediate_and_accented() {
        let mut core = core(120, 4, 1);
        let t0 = Instant::now();
        assert!(core.start(t0));
        assert_eq!(core.next_due(), Some(t0));

        let beat = core.fire(t0).unwrap();
        assert_eq!((beat.beat_index, beat.subdivision_index), (0, 0));
        assert!(beat.is_accent);
        assert_eq!(core.next_due(), Some(t0 + ms(500)));
    }

    #[test]
    fn test_positions_wrap_through_bar() {
        let mut core = core(120, 3, 2);
        let t0 = Instant::now();
        core.start(t0);

        let mut seen = Vec::new();
        for i in 0..7 {
            let beat = core.fire(t0 + ms(250 * i)).unwrap();
            seen.push((
                beat.bar_index,
                beat.beat_index,
                beat.subdivision_index,
                beat.is_beat,
                beat.is_accent,
            ));
        }
        assert_eq!(
            seen,
            vec![
                (0, 0, 0, true, true),
                (0, 0, 1, false, false),
                (0, 1, 0, true, false),
                (0, 1, 1, false, false),
                (0, 2, 0, true, false),
                (0, 2, 1, false, false),
                (1, 0, 0, true, true),
            ]
        );
    }

    #[test]
    fn test_accent_disabled() {
        let mut core = core(120, 4, 1);
        core.set_accent_on_one(false);
        let t0 = Instant::now();
        core.start(t0);
        assert!(!core.fire(t0).unwrap().is_accent);
    }

    #[test]
    fn test_start_is_idempotent() {
        let mut core = core(120, 4, 1);
        let t0 = Instant::now();
        assert!(core.start(t0));
        core.fire(t0);
        core.fire(t0 + ms(500));
        let before = core.state();
        let due = core.next_due();

        assert!(!core.start(t0 + ms(700)));
        assert!(core.state().running);
        assert_eq!(core.state().beat_index, before.beat_index);
        assert_eq!(core.state().beat_index, 2);
        assert_eq!(core.next_due(), due);
    }

    #[test]
    fn test_stop_keeps_position_and_start_resets_it() {
        let mut core = core(120, 4, 1);
        let t0 = Instant::now();
        core.start(t0);
        core.fire(t0);
        core.fire(t0 + ms(500));
        assert!(core.stop());
        assert_eq!(core.state().beat_index, 2);
        assert_eq!(core.next_due(), None);
        assert!(core.fire(t0 + ms(1000)).is_none());
        assert!(!core.stop());

        assert!(core.start(t0 + ms(5000)));
        assert_eq!(core.state().beat_index, 0);
        assert!(core.fire(t0 + ms(5000)).unwrap().is_accent);
    }

    #[test]
    fn test_tempo_change_reanchors_pending_tick() {
        let mut core = core(60, 4, 1);
        let t0 = Instant::now();
        core.start(t0);
        core.fire(t0);
        assert_eq!(core.next_due(), Some(t0 + ms(1000)));

        // Faster tempo: the pending tick moves in from the last fire
        core.set_tempo(120, TempoSource::Manual, t0 + ms(100));
        assert_eq!(core.next_due(), Some(t0 + ms(500)));

        // Change after the new deadline already passed: fire right away
        core.set_tempo(240, TempoSource::Manual, t0 + ms(400));
        assert_eq!(core.next_due(), Some(t0 + ms(400)));
    }

    #[test]
    fn test_late_tick_does_not_burst() {
        let mut core = core(120, 4, 1);
        let t0 = Instant::now();
        core.start(t0);
        core.fire(t0);
        // Loop stalls for 1.3s; a single tick fires, then back on the grid
        core.fire(t0 + ms(1300)).unwrap();
        assert_eq!(core.next_due(), Some(t0 + ms(1500)));
    }

    #[test]
    fn test_ladder_driven_by_bar_boundaries() {
        let mut core = core(100, 2, 1);
        let t0 = Instant::now();
        core.begin_ladder(LadderPlan::new(80, 90, 5, 1), t0).unwrap();
        assert_eq!(core.state().bpm, 80);
        core.start(t0);

        let mut now = t0;
        // Bar 1 completes after two ticks
        core.fire(now);
        now += ms(750);
        core.fire(now);
        assert_eq!(core.state().bpm, 85);
        assert_eq!(core.ladder_state(), LadderState::Active);

        for _ in 0..2 {
            now += ms(706);
            core.fire(now);
        }
        assert_eq!(core.state().bpm, 90);
        assert_eq!(core.ladder_state(), LadderState::Completed);

        for _ in 0..8 {
            now += ms(667);
            core.fire(now);
        }
        assert_eq!(core.state().bpm, 90);
    }

    #[test]
    fn test_manual_tempo_cancels_ladder() {
        let mut core = core(100, 4, 1);
        let t0 = Instant::now();
        core.begin_ladder(LadderPlan::new(80, 120, 5, 1), t0).unwrap();
        core.drain_events();

        core.set_tempo(100, TempoSource::Remote, t0);
        assert_eq!(core.ladder_state(), LadderState::Inactive);
        let events = core.drain_events();
        assert!(matches!(
            events[0],
            MetronomeEvent::LadderChanged {
                state: LadderState::Inactive,
                ..
            }
        ));
        assert!(matches!(
            events[1],
            MetronomeEvent::TempoChanged {
                bpm: 100,
                source: TempoSource::Remote,
                ..
            }
        ));
    }

    #[test]
    fn test_invalid_signature_leaves_state_untouched() {
        let mut core = core(100, 4, 2);
        let before = core.state();
        assert!(matches!(
            core.set_signature(0, 2, Instant::now()),
            Err(Error::Validation(_))
        ));
        assert_eq!(core.state(), before);
        assert!(core.drain_events().is_empty());
    }

    #[test]
    fn test_signature_change_resets_position_and_interval() {
        let mut core = core(120, 4, 1);
        let t0 = Instant::now();
        core.start(t0);
        core.fire(t0);
        core.set_signature(3, 2, t0 + ms(10)).unwrap();
        assert_eq!(core.state().beat_index, 0);
        assert_eq!(core.next_due(), Some(t0 + ms(250)));
    }
}
