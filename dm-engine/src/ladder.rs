//! Tempo ladder routine
//!
//! Moves the tempo from a start rung to an end rung in fixed steps, holding
//! each rung for a number of bars. The beat scheduler calls
//! [`TempoLadder::advance_on_bar_boundary`] once per completed bar and applies
//! whatever tempo it returns.
//!
//! ```text
//! Inactive --begin--> Active --final rung reached--> Completed
//!     ^                  |                               |
//!     +------cancel------+-------------cancel------------+
//! ```

use crate::error::{Error, Result};
use dm_common::protocol::{MAX_BPM, MIN_BPM};
use serde::{Deserialize, Serialize};

/// A tempo progression request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LadderPlan {
    pub start_bpm: u32,
    pub end_bpm: u32,
    /// Signed step; its sign must point from `start_bpm` toward `end_bpm`
    pub step_bpm: i32,
    pub bars_per_step: u32,
}

impl LadderPlan {
    pub fn new(start_bpm: u32, end_bpm: u32, step_bpm: i32, bars_per_step: u32) -> Self {
        Self {
            start_bpm,
            end_bpm,
            step_bpm,
            bars_per_step,
        }
    }

    /// Check internal consistency of the plan
    pub fn validate(&self) -> Result<()> {
        if self.bars_per_step < 1 {
            return Err(Error::Validation(
                "ladder bars_per_step must be at least 1".to_string(),
            ));
        }
        if self.step_bpm == 0 {
            return Err(Error::Validation("ladder step_bpm must not be zero".to_string()));
        }
        for (label, bpm) in [("start_bpm", self.start_bpm), ("end_bpm", self.end_bpm)] {
            if !(MIN_BPM..=MAX_BPM).contains(&bpm) {
                return Err(Error::Validation(format!(
                    "ladder {} {} outside [{}, {}]",
                    label, bpm, MIN_BPM, MAX_BPM
                )));
            }
        }
        let rising = self.end_bpm > self.start_bpm;
        let falling = self.end_bpm < self.start_bpm;
        if (rising && self.step_bpm < 0) || (falling && self.step_bpm > 0) {
            return Err(Error::Validation(format!(
                "ladder step {} moves away from {} toward {}",
                self.step_bpm, self.start_bpm, self.end_bpm
            )));
        }
        Ok(())
    }
}

/// Ladder lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LadderState {
    Inactive,
    Active,
    Completed,
}

/// Result of one bar boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LadderStep {
    /// The current rung has bars left, or the ladder is not active
    NoChange,
    /// Move to an intermediate rung
    Step(u32),
    /// Move to the end rung; the ladder is now completed
    Final(u32),
}

impl LadderStep {
    pub fn bpm(&self) -> Option<u32> {
        match *self {
            LadderStep::NoChange => None,
            LadderStep::Step(bpm) | LadderStep::Final(bpm) => Some(bpm),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TempoLadder {
    state: LadderState,
    plan: Option<LadderPlan>,
    rung_bpm: u32,
    bars_at_rung: u32,
}

impl TempoLadder {
    pub fn new() -> Self {
        Self {
            state: LadderState::Inactive,
            plan: None,
            rung_bpm: 0,
            bars_at_rung: 0,
        }
    }

    pub fn state(&self) -> LadderState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == LadderState::Active
    }

    pub fn plan(&self) -> Option<LadderPlan> {
        self.plan
    }

    /// Start a plan, returning the tempo to apply immediately
    ///
    /// A plan whose start equals its end completes at once.
    pub fn begin(&mut self, plan: LadderPlan) -> Result<u32> {
        plan.validate()?;
        self.plan = Some(plan);
        self.rung_bpm = plan.start_bpm;
        self.bars_at_rung = 0;
        self.state = if plan.start_bpm == plan.end_bpm {
            LadderState::Completed
        } else {
            LadderState::Active
        };
        Ok(plan.start_bpm)
    }

    /// Count one completed bar at the current rung
    pub fn advance_on_bar_boundary(&mut self) -> LadderStep {
        let plan = match (self.state, self.plan) {
            (LadderState::Active, Some(plan)) => plan,
            _ => return LadderStep::NoChange,
        };

        self.bars_at_rung += 1;
        if self.bars_at_rung < plan.bars_per_step {
            return LadderStep::NoChange;
        }
        self.bars_at_rung = 0;

        let stepped = self.rung_bpm as i64 + plan.step_bpm as i64;
        let next = if plan.step_bpm > 0 {
            stepped.min(plan.end_bpm as i64)
        } else {
            stepped.max(plan.end_bpm as i64)
        } as u32;
        self.rung_bpm = next;

        if next == plan.end_bpm {
            self.state = LadderState::Completed;
            LadderStep::Final(next)
        } else {
            LadderStep::Step(next)
        }
    }

    /// Abandon the routine; returns whether it was active
    pub fn cancel(&mut self) -> bool {
        let was_active = self.is_active();
        self.state = LadderState::Inactive;
        self.bars_at_rung = 0;
        was_active
    }
}

impl Default for TempoLadder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rising_ladder_steps_every_two_bars() {
        let mut ladder = TempoLadder::new();
        assert_eq!(ladder.begin(LadderPlan::new(80, 120, 5, 2)).unwrap(), 80);
        assert_eq!(ladder.state(), LadderState::Active);

        let mut bpm = 80;
        let mut bars = 0;
        while ladder.state() == LadderState::Active {
            assert_eq!(ladder.advance_on_bar_boundary(), LadderStep::NoChange);
            bars += 1;
            let next = ladder.advance_on_bar_boundary().bpm().unwrap();
            bars += 1;
            assert_eq!(next, bpm + 5);
            bpm = next;
        }

        assert_eq!(bpm, 120);
        assert_eq!(bars, 16);
        assert_eq!(ladder.state(), LadderState::Completed);

        for _ in 0..10 {
            assert_eq!(ladder.advance_on_bar_boundary(), LadderStep::NoChange);
        }
    }

    #[test]
    fn test_final_rung_is_clamped_not_overshot() {
        let mut ladder = TempoLadder::new();
        ladder.begin(LadderPlan::new(100, 103, 5, 1)).unwrap();
        assert_eq!(ladder.advance_on_bar_boundary(), LadderStep::Final(103));
        assert_eq!(ladder.state(), LadderState::Completed);
    }

    #[test]
    fn test_falling_ladder() {
        let mut ladder = TempoLadder::new();
        ladder.begin(LadderPlan::new(120, 100, -8, 1)).unwrap();
        assert_eq!(ladder.advance_on_bar_boundary(), LadderStep::Step(112));
        assert_eq!(ladder.advance_on_bar_boundary(), LadderStep::Step(104));
        assert_eq!(ladder.advance_on_bar_boundary(), LadderStep::Final(100));
        assert_eq!(ladder.advance_on_bar_boundary(), LadderStep::NoChange);
    }

    #[test]
    fn test_equal_start_and_end_completes_immediately() {
        let mut ladder = TempoLadder::new();
        assert_eq!(ladder.begin(LadderPlan::new(90, 90, 5, 4)).unwrap(), 90);
        assert_eq!(ladder.state(), LadderState::Completed);
        assert_eq!(ladder.advance_on_bar_boundary(), LadderStep::NoChange);
    }

    #[test]
    fn test_invalid_plans_are_rejected() {
        let mut ladder = TempoLadder::new();
        let invalid = [
            LadderPlan::new(80, 120, -5, 2),
            LadderPlan::new(120, 80, 5, 2),
            LadderPlan::new(80, 120, 0, 2),
            LadderPlan::new(80, 120, 5, 0),
            LadderPlan::new(10, 120, 5, 1),
            LadderPlan::new(80, 500, 5, 1),
        ];
        for plan in invalid {
            assert!(
                matches!(ladder.begin(plan), Err(Error::Validation(_))),
                "{plan:?} accepted"
            );
            assert_eq!(ladder.state(), LadderState::Inactive);
        }
    }

    #[test]
    fn test_cancel_returns_to_inactive() {
        let mut ladder = TempoLadder::new();
        ladder.begin(LadderPlan::new(80, 120, 5, 1)).unwrap();
        assert!(ladder.cancel());
        assert_eq!(ladder.state(), LadderState::Inactive);
        assert_eq!(ladder.advance_on_bar_boundary(), LadderStep::NoChange);
        assert!(!ladder.cancel());
    }

    #[test]
    fn test_restart_resets_bar_count() {
        let mut ladder = TempoLadder::new();
        ladder.begin(LadderPlan::new(80, 120, 5, 2)).unwrap();
        ladder.advance_on_bar_boundary();
        ladder.begin(LadderPlan::new(80, 120, 5, 2)).unwrap();
        assert_eq!(ladder.advance_on_bar_boundary(), LadderStep::NoChange);
        assert_eq!(ladder.advance_on_bar_boundary(), LadderStep::Step(85));
    }
}
