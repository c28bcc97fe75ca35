//! Drum grooves and the groove play-along routine
//!
//! A groove is a one-or-more bar pattern of drum hits on a beat/subdivision
//! grid. The routine follows the scheduler's ticks and reports which hits
//! fall on each one, looping the pattern a set number of times.
//!
//! Custom grooves are JSON files, one groove per file:
//!
//! ```json
//! {
//!   "name": "Four on the Floor",
//!   "beats_per_bar": 4,
//!   "subdivision": 2,
//!   "notes": [
//!     { "voice": "kick", "beat": 0, "subdivision": 0, "accent": true },
//!     { "voice": "hihat", "beat": 0, "subdivision": 1 }
//!   ]
//! }
//! ```

use crate::error::{Error, Result};
use crate::events::BeatEvent;
use crate::timing::validate_signature;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DrumVoice {
    Kick,
    Snare,
    Hihat,
    Ride,
    Crash,
    Tom1,
    Tom2,
    Tom3,
}

/// One hit in a groove
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrumNote {
    pub voice: DrumVoice,
    /// Beat within the bar, from 0
    pub beat: u32,
    /// Subdivision within the beat, from 0
    pub subdivision: u32,
    #[serde(default)]
    pub accent: bool,
}

impl DrumNote {
    pub fn new(voice: DrumVoice, beat: u32, subdivision: u32) -> Self {
        Self {
            voice,
            beat,
            subdivision,
            accent: false,
        }
    }

    pub fn accented(voice: DrumVoice, beat: u32, subdivision: u32) -> Self {
        Self {
            accent: true,
            ..Self::new(voice, beat, subdivision)
        }
    }
}

fn default_beats_per_bar() -> u32 {
    4
}

fn default_bars() -> u32 {
    1
}

fn default_subdivision() -> u32 {
    4
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrumGroove {
    pub name: String,
    pub notes: Vec<DrumNote>,
    #[serde(default = "default_beats_per_bar")]
    pub beats_per_bar: u32,
    /// Pattern length in bars
    #[serde(default = "default_bars")]
    pub bars: u32,
    /// Subdivisions per beat
    #[serde(default = "default_subdivision")]
    pub subdivision: u32,
}

impl DrumGroove {
    /// Hits at a grid position
    ///
    /// Every bar of a multi-bar pattern plays the same notes; notes carry no
    /// bar of their own.
    pub fn notes_at(&self, beat: u32, subdivision: u32) -> Vec<DrumNote> {
        self.notes
            .iter()
            .filter(|n| n.beat == beat && n.subdivision == subdivision)
            .copied()
            .collect()
    }

    /// Check the signature is playable and every note sits on the grid
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Validation("Groove name is empty".to_string()));
        }
        if self.bars == 0 {
            return Err(Error::Validation(format!("Groove '{}' has zero bars", self.name)));
        }
        validate_signature(self.beats_per_bar, self.subdivision)?;
        if let Some(note) = self
            .notes
            .iter()
            .find(|n| n.beat >= self.beats_per_bar || n.subdivision >= self.subdivision)
        {
            return Err(Error::Validation(format!(
                "Groove '{}' has a note off the {}x{} grid at beat {} subdivision {}",
                self.name, self.beats_per_bar, self.subdivision, note.beat, note.subdivision
            )));
        }
        Ok(())
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let groove: DrumGroove = serde_json::from_str(text)
            .map_err(|e| Error::Validation(format!("Invalid groove file: {}", e)))?;
        groove.validate()?;
        Ok(groove)
    }
}

/// Built-in and custom grooves, looked up by name
#[derive(Debug, Clone)]
pub struct GrooveLibrary {
    grooves: Vec<DrumGroove>,
}

impl GrooveLibrary {
    pub fn with_presets() -> Self {
        Self {
            grooves: preset_grooves(),
        }
    }

    pub fn names(&self) -> Vec<&str> {
        self.grooves.iter().map(|g| g.name.as_str()).collect()
    }

    /// Case-insensitive lookup
    pub fn by_name(&self, name: &str) -> Option<&DrumGroove> {
        let name = name.trim();
        self.grooves
            .iter()
            .find(|g| g.name.eq_ignore_ascii_case(name))
    }

    /// Add a groove, replacing any with the same name
    pub fn add(&mut self, groove: DrumGroove) -> Result<()> {
        groove.validate()?;
        match self
            .grooves
            .iter_mut()
            .find(|g| g.name.eq_ignore_ascii_case(&groove.name))
        {
            Some(existing) => *existing = groove,
            None => self.grooves.push(groove),
        }
        Ok(())
    }

    /// Load every `*.json` groove in `dir`; returns how many were added
    ///
    /// A missing directory loads nothing. Files that fail to read or parse
    /// are logged and skipped.
    pub fn load_dir(&mut self, dir: &Path) -> Result<usize> {
        if !dir.is_dir() {
            debug!("No groove directory at {}", dir.display());
            return Ok(0);
        }

        let mut paths: Vec<_> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();

        let mut loaded = 0;
        for path in paths {
            let groove = std::fs::read_to_string(&path)
                .map_err(Error::from)
                .and_then(|text| DrumGroove::from_json(&text));
            match groove {
                Ok(groove) => {
                    debug!("Loaded groove '{}' from {}", groove.name, path.display());
                    self.add(groove)?;
                    loaded += 1;
                }
                Err(e) => warn!("Skipping groove {}: {}", path.display(), e),
            }
        }
        if loaded > 0 {
            info!("Loaded {} custom groove(s) from {}", loaded, dir.display());
        }
        Ok(loaded)
    }
}

impl Default for GrooveLibrary {
    fn default() -> Self {
        Self::with_presets()
    }
}

/// Plays a groove along with the scheduler's ticks
#[derive(Debug, Default)]
pub struct GrooveRoutine {
    groove: Option<DrumGroove>,
    /// Passes through the pattern before stopping; 0 loops forever
    loop_count: u32,
    bars_played: u32,
    bar_in_groove: u32,
    running: bool,
}

impl GrooveRoutine {
    pub fn groove(&self) -> Option<&DrumGroove> {
        self.groove.as_ref()
    }

    /// Switch patterns; a running routine continues from the new pattern's
    /// first bar
    pub fn set_groove(&mut self, groove: DrumGroove) {
        self.bar_in_groove = 0;
        self.groove = Some(groove);
    }

    pub fn loop_count(&self) -> u32 {
        self.loop_count
    }

    pub fn set_loop_count(&mut self, loop_count: u32) {
        self.loop_count = loop_count;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Bar of the pattern now playing, from 0
    pub fn bar_in_groove(&self) -> u32 {
        self.bar_in_groove
    }

    /// Begin from the first bar; `Ok(false)` when already running
    pub fn start(&mut self) -> Result<bool> {
        if self.groove.is_none() {
            return Err(Error::Validation("No groove selected".to_string()));
        }
        if self.running {
            return Ok(false);
        }
        self.running = true;
        self.bars_played = 0;
        self.bar_in_groove = 0;
        Ok(true)
    }

    pub fn stop(&mut self) -> bool {
        std::mem::replace(&mut self.running, false)
    }

    /// Notes for this tick; empty between hits, `None` while stopped
    pub fn on_beat(&self, beat: &BeatEvent) -> Option<Vec<DrumNote>> {
        if !self.running {
            return None;
        }
        let groove = self.groove.as_ref()?;
        Some(groove.notes_at(beat.beat_index, beat.subdivision_index))
    }

    /// Count a completed bar; returns `true` when the last loop just ended
    /// and the routine stopped itself
    pub fn on_bar_advanced(&mut self) -> bool {
        let bars = match (&self.groove, self.running) {
            (Some(groove), true) => groove.bars.max(1),
            _ => return false,
        };
        self.bars_played += 1;
        self.bar_in_groove = (self.bar_in_groove + 1) % bars;

        if self.loop_count > 0 && self.bars_played >= bars.saturating_mul(self.loop_count) {
            self.running = false;
            return true;
        }
        false
    }
}

// =============================================================================
// Presets
// =============================================================================

/// Hits on every subdivision listed, for each beat in `beats`
fn pattern(voice: DrumVoice, beats: std::ops::Range<u32>, subdivisions: &[u32]) -> Vec<DrumNote> {
    beats
        .flat_map(|beat| subdivisions.iter().map(move |&s| DrumNote::new(voice, beat, s)))
        .collect()
}

fn groove(name: &str, subdivision: u32, notes: Vec<DrumNote>) -> DrumGroove {
    DrumGroove {
        name: name.to_string(),
        notes,
        beats_per_bar: default_beats_per_bar(),
        bars: 1,
        subdivision,
    }
}

fn backbeat() -> [DrumNote; 2] {
    [
        DrumNote::accented(DrumVoice::Snare, 1, 0),
        DrumNote::accented(DrumVoice::Snare, 3, 0),
    ]
}

pub fn preset_grooves() -> Vec<DrumGroove> {
    use DrumVoice::*;
    use DrumNote as N;

    let beats = 0..4;

    let mut basic_rock = pattern(Hihat, beats.clone(), &[0, 1]);
    basic_rock.extend([N::accented(Kick, 0, 0), N::new(Kick, 2, 0)]);
    basic_rock.extend(backbeat());

    let mut kick_variations = pattern(Hihat, beats.clone(), &[0, 2]);
    kick_variations.extend([
        N::accented(Kick, 0, 0),
        N::new(Kick, 1, 3),
        N::new(Kick, 2, 0),
        N::new(Kick, 3, 2),
    ]);
    kick_variations.extend(backbeat());

    let mut motown: Vec<DrumNote> = beats.clone().map(|b| N::accented(Hihat, b, 0)).collect();
    motown.extend([
        N::accented(Kick, 0, 0),
        N::new(Kick, 1, 2),
        N::new(Kick, 2, 1),
        N::new(Kick, 3, 3),
    ]);
    motown.extend(backbeat());

    let mut swing: Vec<DrumNote> = beats
        .clone()
        .flat_map(|b| [N::accented(Ride, b, 0), N::new(Ride, b, 2)])
        .collect();
    swing.extend([
        N::new(Hihat, 1, 0),
        N::new(Hihat, 3, 0),
        N::new(Kick, 0, 0),
        N::new(Kick, 2, 1),
    ]);

    let linear = vec![
        N::accented(Kick, 0, 0),
        N::new(Hihat, 0, 1),
        N::new(Snare, 0, 2),
        N::new(Hihat, 0, 3),
        N::new(Kick, 1, 0),
        N::new(Hihat, 1, 1),
        N::accented(Snare, 1, 2),
        N::new(Hihat, 1, 3),
        N::new(Kick, 2, 0),
        N::new(Hihat, 2, 1),
        N::new(Snare, 2, 2),
        N::new(Hihat, 2, 3),
        N::new(Kick, 3, 0),
        N::new(Hihat, 3, 1),
        N::accented(Snare, 3, 2),
        N::new(Kick, 3, 3),
    ];

    let mut tom_fill = pattern(Hihat, 0..3, &[0, 2]);
    tom_fill.extend([
        N::accented(Kick, 0, 0),
        N::accented(Snare, 1, 0),
        N::new(Kick, 2, 0),
        N::accented(Tom1, 3, 0),
        N::new(Tom1, 3, 1),
        N::new(Tom2, 3, 2),
        N::new(Tom3, 3, 3),
    ]);

    let mut half_time = pattern(Hihat, beats.clone(), &[0, 1, 2, 3]);
    half_time.extend([N::accented(Kick, 0, 0), N::accented(Snare, 2, 0)]);

    let mut shuffle = pattern(Hihat, beats, &[0, 2]);
    shuffle[0].accent = true;
    shuffle[4].accent = true;
    shuffle.extend([N::accented(Kick, 0, 0), N::new(Kick, 2, 0)]);
    shuffle.extend(backbeat());

    // RLRR LRLL with the right hand on hi-hat and the left on snare
    let paradiddle = vec![
        N::accented(Hihat, 0, 0),
        N::new(Snare, 0, 1),
        N::new(Hihat, 0, 2),
        N::new(Snare, 0, 3),
        N::accented(Snare, 1, 0),
        N::new(Hihat, 1, 1),
        N::new(Snare, 1, 2),
        N::new(Snare, 1, 3),
        N::new(Hihat, 2, 0),
        N::new(Snare, 2, 1),
        N::new(Hihat, 2, 2),
        N::new(Snare, 2, 3),
        N::new(Snare, 3, 0),
        N::new(Hihat, 3, 1),
        N::new(Snare, 3, 2),
        N::new(Snare, 3, 3),
        N::accented(Kick, 0, 0),
        N::new(Kick, 2, 0),
    ];

    vec![
        groove("Basic Rock Beat", 2, basic_rock),
        groove("Rock with Kick Variations", 4, kick_variations),
        groove("Motown Groove", 4, motown),
        groove("Jazz Swing Pattern", 3, swing),
        groove("Linear Groove", 4, linear),
        groove("Basic Tom Fill", 4, tom_fill),
        groove("Half-time Groove", 4, half_time),
        groove("Shuffle Pattern", 3, shuffle),
        groove("Paradiddle Groove", 4, paradiddle),
    ]
}
