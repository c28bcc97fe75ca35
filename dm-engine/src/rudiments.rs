//! Rudiment practice routine
//!
//! Picks a random rudiment from the enabled set and rotates to the next one
//! every `bars_per_rudiment` bars. The upcoming rudiment is always known one
//! rotation ahead so a display can show it before it is due.

use crate::error::{Error, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::debug;

/// Built-in rudiments as (name, sticking)
///
/// Upper case is a full stroke, lower case a grace note.
const PRESETS: &[(&str, &str)] = &[
    ("Quarter Notes", "R L R L"),
    ("Eighth Notes", "RL RL RL RL"),
    ("16th Notes", "RLRL RLRL RLRL RLRL"),
    ("Triplets", "RLR LRL RLR LRL"),
    ("Paradiddle", "RLRR LRLL RLRR LRLL"),
    ("Flam", "lR rL lR rL"),
    ("Double Paradiddle", "RLRLRR LRLRLL"),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rudiment {
    pub name: String,
    pub sticking: String,
}

impl Rudiment {
    pub fn new(name: impl Into<String>, sticking: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sticking: sticking.into(),
        }
    }

    /// Same rudiment led with the other hand
    pub fn inverted(&self) -> Rudiment {
        let sticking = self
            .sticking
            .chars()
            .map(|c| match c {
                'R' => 'L',
                'L' => 'R',
                'r' => 'l',
                'l' => 'r',
                other => other,
            })
            .collect();
        Rudiment {
            name: self.name.clone(),
            sticking,
        }
    }
}

pub fn preset_rudiments() -> Vec<Rudiment> {
    PRESETS
        .iter()
        .map(|(name, sticking)| Rudiment::new(*name, *sticking))
        .collect()
}

/// Which hand leads each rudiment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadHand {
    #[default]
    Right,
    Left,
    /// Coin flip per rudiment
    Mixed,
}

impl std::str::FromStr for LeadHand {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "r" | "right" => Ok(LeadHand::Right),
            "l" | "left" => Ok(LeadHand::Left),
            "mixed" => Ok(LeadHand::Mixed),
            _ => Err(Error::Validation(format!(
                "Lead hand must be r, l or mixed, got {:?}",
                s
            ))),
        }
    }
}

/// Rudiment now being practised and the one after it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RudimentChange {
    pub current: Rudiment,
    pub next: Rudiment,
}

pub struct RudimentRoutine {
    library: Vec<Rudiment>,
    /// Indices into `library`; never empty
    enabled: Vec<usize>,
    lead_hand: LeadHand,
    bars_per_rudiment: u32,
    bar_counter: u32,
    current: Option<Rudiment>,
    next: Option<Rudiment>,
    running: bool,
    rng: StdRng,
}

impl RudimentRoutine {
    pub fn new(lead_hand: LeadHand, bars_per_rudiment: u32) -> Self {
        Self::with_rng(lead_hand, bars_per_rudiment, StdRng::from_entropy())
    }

    /// Deterministic picks for a given seed
    pub fn with_seed(lead_hand: LeadHand, bars_per_rudiment: u32, seed: u64) -> Self {
        Self::with_rng(lead_hand, bars_per_rudiment, StdRng::seed_from_u64(seed))
    }

    fn with_rng(lead_hand: LeadHand, bars_per_rudiment: u32, rng: StdRng) -> Self {
        let library = preset_rudiments();
        let enabled = (0..library.len()).collect();
        Self {
            library,
            enabled,
            lead_hand,
            bars_per_rudiment: bars_per_rudiment.max(1),
            bar_counter: 0,
            current: None,
            next: None,
            running: false,
            rng,
        }
    }

    pub fn names(&self) -> Vec<&str> {
        self.library.iter().map(|r| r.name.as_str()).collect()
    }

    pub fn enabled_names(&self) -> Vec<&str> {
        self.enabled
            .iter()
            .map(|&i| self.library[i].name.as_str())
            .collect()
    }

    pub fn lead_hand(&self) -> LeadHand {
        self.lead_hand
    }

    /// Applies from the next pick on
    pub fn set_lead_hand(&mut self, lead_hand: LeadHand) {
        self.lead_hand = lead_hand;
    }

    /// Restrict picks to the named rudiments (case-insensitive)
    ///
    /// An empty list, or one matching nothing, re-enables the whole library.
    pub fn set_enabled<S: AsRef<str>>(&mut self, names: &[S]) {
        let wanted: Vec<String> = names
            .iter()
            .map(|n| n.as_ref().trim().to_lowercase())
            .filter(|n| !n.is_empty())
            .collect();
        let filtered: Vec<usize> = self
            .library
            .iter()
            .enumerate()
            .filter(|(_, r)| wanted.contains(&r.name.to_lowercase()))
            .map(|(i, _)| i)
            .collect();

        self.enabled = if filtered.is_empty() {
            if !wanted.is_empty() {
                debug!("No rudiment matched {:?}; enabling all", wanted);
            }
            (0..self.library.len()).collect()
        } else {
            filtered
        };
    }

    pub fn bars_per_rudiment(&self) -> u32 {
        self.bars_per_rudiment
    }

    /// Values below 1 are raised to 1
    pub fn set_bars_per_rudiment(&mut self, bars: u32) -> u32 {
        self.bars_per_rudiment = bars.max(1);
        self.bars_per_rudiment
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn current(&self) -> Option<&Rudiment> {
        self.current.as_ref()
    }

    pub fn next(&self) -> Option<&Rudiment> {
        self.next.as_ref()
    }

    /// Pick the first two rudiments; `None` when already running
    pub fn start(&mut self) -> Option<RudimentChange> {
        if self.running {
            return None;
        }
        self.running = true;
        self.bar_counter = 0;
        let current = self.pick();
        let next = self.pick();
        self.current = Some(current.clone());
        self.next = Some(next.clone());
        Some(RudimentChange { current, next })
    }

    /// Returns `false` when it was not running
    pub fn stop(&mut self) -> bool {
        std::mem::replace(&mut self.running, false)
    }

    /// Count a completed bar; rotates once enough bars have passed
    pub fn on_bar_advanced(&mut self) -> Option<RudimentChange> {
        if !self.running {
            return None;
        }
        self.bar_counter += 1;
        if self.bar_counter < self.bars_per_rudiment {
            return None;
        }
        self.bar_counter = 0;

        let current = match self.next.take() {
            Some(next) => next,
            None => self.pick(),
        };
        let next = self.pick();
        self.current = Some(current.clone());
        self.next = Some(next.clone());
        Some(RudimentChange { current, next })
    }

    fn pick(&mut self) -> Rudiment {
        let index = self.enabled.choose(&mut self.rng).copied().unwrap_or(0);
        let rudiment = &self.library[index];
        let invert = match self.lead_hand {
            LeadHand::Right => false,
            LeadHand::Left => true,
            LeadHand::Mixed => self.rng.gen_bool(0.5),
        };
        if invert {
            rudiment.inverted()
        } else {
            rudiment.clone()
        }
    }
}

impl Default for RudimentRoutine {
    fn default() -> Self {
        Self::new(LeadHand::Right, 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inversion_swaps_hands_and_grace_notes() {
        let flam = Rudiment::new("Flam", "lR rL lR rL");
        assert_eq!(flam.inverted().sticking, "rL lR rL lR");
        assert_eq!(flam.inverted().inverted(), flam);
    }

    #[test]
    fn test_lead_hand_parse() {
        assert_eq!("R".parse::<LeadHand>().unwrap(), LeadHand::Right);
        assert_eq!("left".parse::<LeadHand>().unwrap(), LeadHand::Left);
        assert_eq!("Mixed".parse::<LeadHand>().unwrap(), LeadHand::Mixed);
        assert!(matches!("both".parse::<LeadHand>(), Err(Error::Validation(_))));
    }

    #[test]
    fn test_rotation_every_n_bars() {
        let mut routine = RudimentRoutine::with_seed(LeadHand::Right, 2, 7);
        let first = routine.start().unwrap();
        assert!(routine.start().is_none());

        assert!(routine.on_bar_advanced().is_none());
        let second = routine.on_bar_advanced().unwrap();
        // The announced "next" becomes current
        assert_eq!(second.current, first.next);
        assert_eq!(routine.current(), Some(&second.current));
        assert_eq!(routine.next(), Some(&second.next));

        assert!(routine.on_bar_advanced().is_none());
        assert!(routine.on_bar_advanced().is_some());
    }

    #[test]
    fn test_bars_not_counted_while_stopped() {
        let mut routine = RudimentRoutine::with_seed(LeadHand::Right, 1, 1);
        assert!(routine.on_bar_advanced().is_none());
        routine.start();
        assert!(routine.stop());
        assert!(!routine.stop());
        assert!(routine.on_bar_advanced().is_none());
    }

    #[test]
    fn test_restart_resets_bar_counter() {
        let mut routine = RudimentRoutine::with_seed(LeadHand::Right, 2, 3);
        routine.start();
        routine.on_bar_advanced();
        routine.stop();
        routine.start();
        assert!(routine.on_bar_advanced().is_none());
        assert!(routine.on_bar_advanced().is_some());
    }

    #[test]
    fn test_enabled_subset_and_fallback() {
        let mut routine = RudimentRoutine::with_seed(LeadHand::Right, 1, 11);
        routine.set_enabled(&["paradiddle", "  Flam "]);
        assert_eq!(routine.enabled_names(), vec!["Paradiddle", "Flam"]);

        routine.start();
        for _ in 0..20 {
            let change = routine.on_bar_advanced().unwrap();
            assert!(["Paradiddle", "Flam"].contains(&change.current.name.as_str()));
        }

        routine.set_enabled(&["Moeller"]);
        assert_eq!(routine.enabled_names().len(), PRESETS.len());
        routine.set_enabled::<&str>(&[]);
        assert_eq!(routine.enabled_names(), routine.names());
    }

    #[test]
    fn test_left_lead_inverts_every_pick() {
        let mut routine = RudimentRoutine::with_seed(LeadHand::Left, 1, 5);
        routine.set_enabled(&["Paradiddle"]);
        let change = routine.start().unwrap();
        assert_eq!(change.current.sticking, "LRLL RLRR LRLL RLRR");
        assert_eq!(change.next.sticking, "LRLL RLRR LRLL RLRR");
    }

    #[test]
    fn test_mixed_lead_uses_both_hands() {
        let mut routine = RudimentRoutine::with_seed(LeadHand::Mixed, 1, 9);
        routine.set_enabled(&["Paradiddle"]);
        routine.start();
        let stickings: Vec<String> = (0..40)
            .filter_map(|_| routine.on_bar_advanced())
            .map(|change| change.current.sticking)
            .collect();
        assert!(stickings.iter().any(|s| s.starts_with('R')));
        assert!(stickings.iter().any(|s| s.starts_with('L')));
    }

    #[test]
    fn test_bars_per_rudiment_floor() {
        let mut routine = RudimentRoutine::new(LeadHand::Right, 0);
        assert_eq!(routine.bars_per_rudiment(), 1);
        assert_eq!(routine.set_bars_per_rudiment(0), 1);
        assert_eq!(routine.set_bars_per_rudiment(4), 4);
    }
}
