//! Events published by the beat scheduler
//!
//! Audio, MIDI and display collaborators subscribe to these over a
//! broadcast channel; the control server forwards them as SSE.

use crate::groove::DrumNote;
use crate::ladder::LadderState;
use crate::rudiments::{Rudiment, RudimentChange};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// One scheduler tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BeatEvent {
    /// Bars completed since the last start
    pub bar_index: u64,
    pub beat_index: u32,
    pub subdivision_index: u32,
    /// First subdivision of a beat
    pub is_beat: bool,
    /// First subdivision of the first beat, when accenting is enabled
    pub is_accent: bool,
}

/// Origin of a tempo change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TempoSource {
    Manual,
    Tap,
    Remote,
    Ladder,
}

/// Practice routines that follow the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutineKind {
    Rudiments,
    Groove,
}

/// Metronome event types
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum MetronomeEvent {
    /// A tick fired
    Beat(BeatEvent),

    /// A bar completed
    BarAdvanced { bar_index: u64 },

    /// Tempo changed
    TempoChanged {
        bpm: u32,
        source: TempoSource,
        timestamp: DateTime<Utc>,
    },

    /// Metronome started or stopped
    RunningChanged {
        running: bool,
        timestamp: DateTime<Utc>,
    },

    /// Time signature or subdivision changed
    SignatureChanged {
        beats_per_bar: u32,
        subdivisions_per_beat: u32,
        timestamp: DateTime<Utc>,
    },

    /// Tempo ladder changed state
    LadderChanged {
        state: LadderState,
        timestamp: DateTime<Utc>,
    },

    /// A practice routine started or stopped
    RoutineChanged {
        routine: RoutineKind,
        active: bool,
        timestamp: DateTime<Utc>,
    },

    /// Rudiment routine rotated
    RudimentChanged { current: Rudiment, next: Rudiment },

    /// Groove chosen for play-along
    GrooveSelected {
        name: String,
        beats_per_bar: u32,
        subdivisions_per_beat: u32,
        timestamp: DateTime<Utc>,
    },

    /// Groove hits on the tick just fired; empty between hits
    GrooveNotes { notes: Vec<DrumNote> },
}

impl MetronomeEvent {
    /// Event name used for the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            MetronomeEvent::Beat(_) => "Beat",
            MetronomeEvent::BarAdvanced { .. } => "BarAdvanced",
            MetronomeEvent::TempoChanged { .. } => "TempoChanged",
            MetronomeEvent::RunningChanged { .. } => "RunningChanged",
            MetronomeEvent::SignatureChanged { .. } => "SignatureChanged",
            MetronomeEvent::LadderChanged { .. } => "LadderChanged",
            MetronomeEvent::RoutineChanged { .. } => "RoutineChanged",
            MetronomeEvent::RudimentChanged { .. } => "RudimentChanged",
            MetronomeEvent::GrooveSelected { .. } => "GrooveSelected",
            MetronomeEvent::GrooveNotes { .. } => "GrooveNotes",
        }
    }

    pub fn tempo_changed(bpm: u32, source: TempoSource) -> Self {
        MetronomeEvent::TempoChanged {
            bpm,
            source,
            timestamp: Utc::now(),
        }
    }

    pub fn running_changed(running: bool) -> Self {
        MetronomeEvent::RunningChanged {
            running,
            timestamp: Utc::now(),
        }
    }

    pub fn ladder_changed(state: LadderState) -> Self {
        MetronomeEvent::LadderChanged {
            state,
            timestamp: Utc::now(),
        }
    }

    pub fn routine_changed(routine: RoutineKind, active: bool) -> Self {
        MetronomeEvent::RoutineChanged {
            routine,
            active,
            timestamp: Utc::now(),
        }
    }

    pub fn rudiment_changed(change: RudimentChange) -> Self {
        MetronomeEvent::RudimentChanged {
            current: change.current,
            next: change.next,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_beat_serializes_flat_with_type_tag() {
        let event = MetronomeEvent::Beat(BeatEvent {
            bar_index: 2,
            beat_index: 0,
            subdivision_index: 0,
            is_beat: true,
            is_accent: true,
        });
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "Beat");
        assert_eq!(value["bar_index"], 2);
        assert_eq!(value["is_accent"], true);
    }

    #[test]
    fn test_tempo_source_is_snake_case() {
        let value = serde_json::to_value(MetronomeEvent::tempo_changed(90, TempoSource::Remote))
            .unwrap();
        assert_eq!(value["type"], "TempoChanged");
        assert_eq!(value["source"], "remote");
        assert_eq!(value["bpm"], 90);
    }

    #[test]
    fn test_groove_notes_serialize_voices_lowercase() {
        use crate::groove::DrumVoice;
        let event = MetronomeEvent::GrooveNotes {
            notes: vec![DrumNote::accented(DrumVoice::Tom1, 3, 0)],
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "GrooveNotes");
        assert_eq!(value["notes"][0]["voice"], "tom1");
        assert_eq!(value["notes"][0]["accent"], true);

        let value =
            serde_json::to_value(MetronomeEvent::routine_changed(RoutineKind::Rudiments, true))
                .unwrap();
        assert_eq!(value["routine"], "rudiments");
        assert_eq!(value["active"], true);
    }
}
