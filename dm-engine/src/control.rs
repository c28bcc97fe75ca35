//! Local control surface
//!
//! Entry points used by the operator on the machine running the engine.
//! Each one funnels into the [`BeatScheduler`] or the practice routines;
//! nothing here holds timing state of its own except the tap history.

use crate::error::{Error, Result};
use crate::events::TempoSource;
use crate::ladder::{LadderPlan, LadderState};
use crate::practice::PracticeRoutines;
use crate::rudiments::{LeadHand, Rudiment};
use crate::scheduler::BeatScheduler;
use crate::tap::TapEstimator;
use crate::timing::TimingState;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info};

pub struct ControlSurface {
    scheduler: Arc<BeatScheduler>,
    practice: Arc<PracticeRoutines>,
    tap: Mutex<TapEstimator>,
}

impl ControlSurface {
    pub fn new(
        scheduler: Arc<BeatScheduler>,
        practice: Arc<PracticeRoutines>,
        tap: TapEstimator,
    ) -> Self {
        Self {
            scheduler,
            practice,
            tap: Mutex::new(tap),
        }
    }

    pub async fn status(&self) -> TimingState {
        self.scheduler.snapshot().await
    }

    pub async fn start(&self) -> bool {
        self.scheduler.start().await
    }

    pub async fn stop(&self) -> bool {
        self.scheduler.stop().await
    }

    /// Start when stopped, stop when running; returns the new running flag
    pub async fn toggle(&self) -> bool {
        self.scheduler.toggle().await
    }

    pub async fn set_tempo(&self, bpm: i64) -> u32 {
        self.scheduler.set_tempo(bpm, TempoSource::Manual).await
    }

    /// Shift the tempo by a signed amount
    pub async fn nudge(&self, delta: i64) -> u32 {
        self.scheduler.nudge_tempo(delta, TempoSource::Manual).await
    }

    /// Register a tap now and apply the resulting estimate, if any
    pub async fn tap(&self) -> Result<u32> {
        self.tap_at(Instant::now()).await
    }

    /// Register a tap at `at`; the tempo is only changed when an estimate
    /// is available
    pub async fn tap_at(&self, at: Instant) -> Result<u32> {
        let estimate = {
            let mut tap = self.tap.lock().await;
            if tap.register_tap(at) {
                debug!("Tap pause exceeded reset window, starting new phrase");
            }
            tap.estimate_bpm()
        }?;
        Ok(self.scheduler.set_tempo(estimate as i64, TempoSource::Tap).await)
    }

    pub async fn set_signature(&self, beats_per_bar: u32, subdivisions: u32) -> Result<()> {
        self.scheduler.set_signature(beats_per_bar, subdivisions).await
    }

    pub async fn set_accent_on_one(&self, accent_on_one: bool) {
        self.scheduler.set_accent_on_one(accent_on_one).await
    }

    /// Begin a tempo ladder and make sure the metronome is running
    pub async fn begin_ladder(&self, plan: LadderPlan) -> Result<LadderState> {
        let (state, started) = self.scheduler.begin_ladder_running(plan).await?;
        if started {
            info!("Metronome started for tempo ladder");
        }
        Ok(state)
    }

    pub async fn cancel_ladder(&self) -> bool {
        self.scheduler.cancel_ladder().await
    }

    /// Run one console command and describe the outcome
    pub async fn execute(&self, command: ConsoleCommand) -> Result<String> {
        let reply = match command {
            ConsoleCommand::Start => {
                self.start().await;
                "running".to_string()
            }
            ConsoleCommand::Stop => {
                self.stop().await;
                "stopped".to_string()
            }
            ConsoleCommand::Toggle => {
                if self.toggle().await {
                    "running".to_string()
                } else {
                    "stopped".to_string()
                }
            }
            ConsoleCommand::Tempo(bpm) => format!("{} bpm", self.set_tempo(bpm).await),
            ConsoleCommand::Nudge(delta) => format!("{} bpm", self.nudge(delta).await),
            ConsoleCommand::Tap => match self.tap().await {
                Ok(bpm) => format!("{} bpm", bpm),
                Err(Error::InsufficientData { .. }) => "keep tapping".to_string(),
                Err(e) => return Err(e),
            },
            ConsoleCommand::Signature {
                beats_per_bar,
                subdivisions,
            } => {
                self.set_signature(beats_per_bar, subdivisions).await?;
                format!("{} beats x {} subdivisions", beats_per_bar, subdivisions)
            }
            ConsoleCommand::Accent(on) => {
                self.set_accent_on_one(on).await;
                format!("accent {}", if on { "on" } else { "off" })
            }
            ConsoleCommand::Ladder(plan) => {
                let state = self.begin_ladder(plan).await?;
                format!("ladder {:?}", state).to_lowercase()
            }
            ConsoleCommand::LadderCancel => {
                if self.cancel_ladder().await {
                    "ladder cancelled".to_string()
                } else {
                    "no active ladder".to_string()
                }
            }
            ConsoleCommand::Rudiments(command) => self.execute_rudiments(command).await,
            ConsoleCommand::Groove(command) => self.execute_groove(command).await?,
            ConsoleCommand::Status => self.describe_status().await,
            ConsoleCommand::Quit => "bye".to_string(),
        };
        Ok(reply)
    }

    async fn execute_rudiments(&self, command: RudimentCommand) -> String {
        let practice = &self.practice;
        match command {
            RudimentCommand::Start => match practice.start_rudiments().await {
                Some(change) => {
                    format!("{} (next: {})", render_rudiment(&change.current), change.next.name)
                }
                None => "rudiments already running".to_string(),
            },
            RudimentCommand::Stop => {
                if practice.stop_rudiments().await {
                    "rudiments stopped".to_string()
                } else {
                    "rudiments not running".to_string()
                }
            }
            RudimentCommand::Bars(bars) => {
                format!("{} bar(s) per rudiment", practice.set_bars_per_rudiment(bars).await)
            }
            RudimentCommand::Hand(hand) => {
                practice.set_lead_hand(hand).await;
                format!("lead hand {:?}", hand).to_lowercase()
            }
            RudimentCommand::Only(names) => practice.enable_rudiments(&names).await.join(", "),
            RudimentCommand::All => practice.enable_rudiments(&[]).await.join(", "),
            RudimentCommand::List => practice.rudiment_names().await.join(", "),
        }
    }

    async fn execute_groove(&self, command: GrooveCommand) -> Result<String> {
        let practice = &self.practice;
        let reply = match command {
            GrooveCommand::List => practice.groove_names().join(", "),
            GrooveCommand::Use(name) => {
                let groove = practice.use_groove(&name).await?;
                format!(
                    "{}: {} beats x {} subdivisions, {} bar(s)",
                    groove.name, groove.beats_per_bar, groove.subdivision, groove.bars
                )
            }
            GrooveCommand::Loops(count) => {
                practice.set_loop_count(count).await;
                if count == 0 {
                    "groove loops forever".to_string()
                } else {
                    format!("groove stops after {} loop(s)", count)
                }
            }
            GrooveCommand::Start => {
                if practice.start_groove().await? {
                    "groove started".to_string()
                } else {
                    "groove already running".to_string()
                }
            }
            GrooveCommand::Stop => {
                if practice.stop_groove().await {
                    "groove stopped".to_string()
                } else {
                    "groove not running".to_string()
                }
            }
        };
        Ok(reply)
    }

    async fn describe_status(&self) -> String {
        let state = self.status().await;
        let ladder = match self.scheduler.ladder().await {
            (state, Some(plan)) => format!(
                "ladder {:?} {}->{} by {} every {} bar(s)",
                state, plan.start_bpm, plan.end_bpm, plan.step_bpm, plan.bars_per_step
            ),
            (state, None) => format!("ladder {:?}", state),
        };
        let mut reply = format!(
            "{} bpm, {}/{}, {}, {}",
            state.bpm,
            state.beats_per_bar,
            state.subdivisions_per_beat,
            if state.running { "running" } else { "stopped" },
            ladder
        );
        if let Some(change) = self.practice.current_rudiment().await {
            reply.push_str(&format!(", rudiment {}", render_rudiment(&change.current)));
        }
        if self.practice.groove_running().await {
            reply.push_str(", groove playing");
        }
        reply
    }
}

fn render_rudiment(rudiment: &Rudiment) -> String {
    format!("{} [{}]", rudiment.name, rudiment.sticking)
}

/// `rudiments ...` console subcommands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RudimentCommand {
    Start,
    Stop,
    Bars(u32),
    Hand(LeadHand),
    /// Comma-separated rudiment names
    Only(Vec<String>),
    All,
    List,
}

/// `groove ...` console subcommands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrooveCommand {
    List,
    Use(String),
    Loops(u32),
    Start,
    Stop,
}

/// A line typed at the engine console
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Start,
    Stop,
    Toggle,
    Tempo(i64),
    Nudge(i64),
    Tap,
    Signature {
        beats_per_bar: u32,
        subdivisions: u32,
    },
    Accent(bool),
    Ladder(LadderPlan),
    LadderCancel,
    Rudiments(RudimentCommand),
    Groove(GrooveCommand),
    Status,
    Quit,
}

impl std::str::FromStr for ConsoleCommand {
    type Err = Error;

    fn from_str(line: &str) -> Result<Self> {
        let words: Vec<&str> = line.split_whitespace().collect();
        let command = match words.as_slice() {
            ["start"] => ConsoleCommand::Start,
            ["stop"] => ConsoleCommand::Stop,
            ["toggle"] | ["space"] => ConsoleCommand::Toggle,
            ["tempo", bpm] | ["bpm", bpm] => ConsoleCommand::Tempo(parse_arg(bpm)?),
            ["nudge", delta] => ConsoleCommand::Nudge(parse_arg(delta.trim_start_matches('+'))?),
            ["+"] => ConsoleCommand::Nudge(1),
            ["-"] => ConsoleCommand::Nudge(-1),
            ["tap"] | ["t"] => ConsoleCommand::Tap,
            ["sig", beats, subdivisions] => ConsoleCommand::Signature {
                beats_per_bar: parse_arg(beats)?,
                subdivisions: parse_arg(subdivisions)?,
            },
            ["accent", "on"] => ConsoleCommand::Accent(true),
            ["accent", "off"] => ConsoleCommand::Accent(false),
            ["ladder", "cancel"] => ConsoleCommand::LadderCancel,
            ["ladder", start, end, step, bars] => ConsoleCommand::Ladder(LadderPlan::new(
                parse_arg(start)?,
                parse_arg(end)?,
                parse_arg(step.trim_start_matches('+'))?,
                parse_arg(bars)?,
            )),
            ["rudiments", rest @ ..] => ConsoleCommand::Rudiments(match rest {
                ["start"] => RudimentCommand::Start,
                ["stop"] => RudimentCommand::Stop,
                ["bars", bars] => RudimentCommand::Bars(parse_arg(bars)?),
                ["hand", hand] => RudimentCommand::Hand(hand.parse()?),
                ["only", names @ ..] if !names.is_empty() => RudimentCommand::Only(
                    names
                        .join(" ")
                        .split(',')
                        .map(|name| name.trim().to_string())
                        .filter(|name| !name.is_empty())
                        .collect(),
                ),
                ["all"] => RudimentCommand::All,
                ["list"] | [] => RudimentCommand::List,
                _ => return Err(Error::InvalidCommand(line.trim().to_string())),
            }),
            ["groove", rest @ ..] => ConsoleCommand::Groove(match rest {
                ["list"] | [] => GrooveCommand::List,
                ["use", name @ ..] if !name.is_empty() => GrooveCommand::Use(name.join(" ")),
                ["loops", count] => GrooveCommand::Loops(parse_arg(count)?),
                ["start"] => GrooveCommand::Start,
                ["stop"] => GrooveCommand::Stop,
                _ => return Err(Error::InvalidCommand(line.trim().to_string())),
            }),
            ["status"] | ["s"] => ConsoleCommand::Status,
            ["quit"] | ["exit"] | ["q"] => ConsoleCommand::Quit,
            _ => return Err(Error::InvalidCommand(line.trim().to_string())),
        };
        Ok(command)
    }
}

fn parse_arg<T: std::str::FromStr>(word: &str) -> Result<T> {
    word.parse().map_err(|_| Error::InvalidCommand(format!("not a number: {}", word)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::groove::GrooveLibrary;
    use crate::rudiments::RudimentRoutine;
    use std::time::Duration;

    fn surface() -> ControlSurface {
        let scheduler = BeatScheduler::new(TimingState::default());
        let practice = PracticeRoutines::new(
            Arc::clone(&scheduler),
            RudimentRoutine::with_seed(LeadHand::Right, 1, 1),
            GrooveLibrary::with_presets(),
        );
        ControlSurface::new(scheduler, practice, TapEstimator::default())
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!("start".parse::<ConsoleCommand>().unwrap(), ConsoleCommand::Start);
        assert_eq!(
            "  tempo 132 ".parse::<ConsoleCommand>().unwrap(),
            ConsoleCommand::Tempo(132)
        );
        assert_eq!(
            "nudge +5".parse::<ConsoleCommand>().unwrap(),
            ConsoleCommand::Nudge(5)
        );
        assert_eq!(
            "nudge -3".parse::<ConsoleCommand>().unwrap(),
            ConsoleCommand::Nudge(-3)
        );
        assert_eq!(
            "sig 7 2".parse::<ConsoleCommand>().unwrap(),
            ConsoleCommand::Signature {
                beats_per_bar: 7,
                subdivisions: 2
            }
        );
        assert_eq!(
            "ladder 120 80 -5 4".parse::<ConsoleCommand>().unwrap(),
            ConsoleCommand::Ladder(LadderPlan::new(120, 80, -5, 4))
        );
        assert_eq!(
            "ladder cancel".parse::<ConsoleCommand>().unwrap(),
            ConsoleCommand::LadderCancel
        );
    }

    #[test]
    fn test_parse_practice_commands() {
        assert_eq!(
            "rudiments only Paradiddle, Double Paradiddle".parse::<ConsoleCommand>().unwrap(),
            ConsoleCommand::Rudiments(RudimentCommand::Only(vec![
                "Paradiddle".to_string(),
                "Double Paradiddle".to_string()
            ]))
        );
        assert_eq!(
            "rudiments hand L".parse::<ConsoleCommand>().unwrap(),
            ConsoleCommand::Rudiments(RudimentCommand::Hand(LeadHand::Left))
        );
        assert_eq!(
            "rudiments bars 4".parse::<ConsoleCommand>().unwrap(),
            ConsoleCommand::Rudiments(RudimentCommand::Bars(4))
        );
        assert_eq!(
            "groove use Motown Groove".parse::<ConsoleCommand>().unwrap(),
            ConsoleCommand::Groove(GrooveCommand::Use("Motown Groove".to_string()))
        );
        assert_eq!(
            "groove".parse::<ConsoleCommand>().unwrap(),
            ConsoleCommand::Groove(GrooveCommand::List)
        );
        assert!(matches!(
            "rudiments hand both".parse::<ConsoleCommand>(),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for line in [
            "",
            "tempo",
            "tempo fast",
            "sig 4",
            "dance",
            "accent maybe",
            "groove use",
            "rudiments only",
            "groove loops many",
        ] {
            assert!(
                matches!(line.parse::<ConsoleCommand>(), Err(Error::InvalidCommand(_))),
                "{line:?} parsed"
            );
        }
    }

    #[tokio::test]
    async fn test_tap_applies_estimate_only_with_two_taps() {
        let surface = surface();
        let base = Instant::now();

        let first = surface.tap_at(base).await;
        assert!(matches!(first, Err(Error::InsufficientData { taps: 1 })));
        assert_eq!(surface.status().await.bpm, 100);

        let second = surface.tap_at(base + Duration::from_millis(500)).await.unwrap();
        assert_eq!(second, 120);
        assert_eq!(surface.status().await.bpm, 120);
    }

    #[tokio::test]
    async fn test_nudge_clamps() {
        let surface = surface();
        surface.set_tempo(398).await;
        assert_eq!(surface.nudge(5).await, 400);
        assert_eq!(surface.nudge(-1).await, 399);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_nudges_are_not_lost() {
        let surface = Arc::new(surface());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let surface = Arc::clone(&surface);
            handles.push(tokio::spawn(async move {
                for _ in 0..500 {
                    surface.nudge(1).await;
                    surface.nudge(-1).await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(surface.status().await.bpm, 100);
    }

    #[tokio::test]
    async fn test_ladder_starts_metronome() {
        let surface = surface();
        let state = surface
            .begin_ladder(LadderPlan::new(80, 120, 5, 2))
            .await
            .unwrap();
        assert_eq!(state, LadderState::Active);
        let status = surface.status().await;
        assert!(status.running);
        assert_eq!(status.bpm, 80);

        let reply = surface.execute(ConsoleCommand::Status).await.unwrap();
        assert!(reply.contains("80->120 by 5 every 2 bar(s)"), "{reply}");
    }

    #[tokio::test]
    async fn test_invalid_signature_reported() {
        let surface = surface();
        let result = surface
            .execute(ConsoleCommand::Signature {
                beats_per_bar: 0,
                subdivisions: 1,
            })
            .await;
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn test_toggle() {
        let surface = surface();
        assert!(surface.toggle().await);
        assert!(surface.status().await.running);
        assert!(!surface.toggle().await);
        assert!(!surface.status().await.running);
    }

    #[tokio::test]
    async fn test_practice_commands_from_console() {
        let surface = surface();

        let reply = surface
            .execute(ConsoleCommand::Groove(GrooveCommand::Use("shuffle pattern".to_string())))
            .await
            .unwrap();
        assert!(reply.starts_with("Shuffle Pattern: 4 beats x 3"), "{reply}");
        assert_eq!(surface.status().await.subdivisions_per_beat, 3);

        surface
            .execute(ConsoleCommand::Groove(GrooveCommand::Start))
            .await
            .unwrap();
        surface
            .execute(ConsoleCommand::Rudiments(RudimentCommand::Only(vec!["flam".to_string()])))
            .await
            .unwrap();
        let reply = surface
            .execute(ConsoleCommand::Rudiments(RudimentCommand::Start))
            .await
            .unwrap();
        assert_eq!(reply, "Flam [lR rL lR rL] (next: Flam)");

        let status = surface.execute(ConsoleCommand::Status).await.unwrap();
        assert!(status.contains("rudiment Flam"), "{status}");
        assert!(status.contains("groove playing"), "{status}");
    }

    #[tokio::test]
    async fn test_unknown_groove_is_an_error() {
        let surface = surface();
        let result = surface
            .execute(ConsoleCommand::Groove(GrooveCommand::Use("Polka".to_string())))
            .await;
        assert!(matches!(result, Err(Error::Validation(_))));
    }
}
