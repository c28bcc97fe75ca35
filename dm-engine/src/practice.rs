//! Practice routines driver
//!
//! Subscribes to the scheduler's events and feeds bar and tick boundaries to
//! the rudiment and groove routines. Their output is published back on the
//! scheduler's event channel, so displays and the SSE stream see it next to
//! the beats that caused it.

use crate::error::{Error, Result};
use crate::events::{MetronomeEvent, RoutineKind};
use crate::groove::{DrumGroove, GrooveLibrary, GrooveRoutine};
use crate::rudiments::{LeadHand, RudimentChange, RudimentRoutine};
use crate::scheduler::BeatScheduler;
use chrono::Utc;
use dm_common::config::PracticeSettings;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct PracticeRoutines {
    scheduler: Arc<BeatScheduler>,
    rudiments: Mutex<RudimentRoutine>,
    groove: Mutex<GrooveRoutine>,
    library: GrooveLibrary,
}

impl PracticeRoutines {
    pub fn new(
        scheduler: Arc<BeatScheduler>,
        rudiments: RudimentRoutine,
        library: GrooveLibrary,
    ) -> Arc<Self> {
        Arc::new(Self {
            scheduler,
            rudiments: Mutex::new(rudiments),
            groove: Mutex::new(GrooveRoutine::default()),
            library,
        })
    }

    /// Build from settings, loading custom grooves from the groove directory
    pub fn from_settings(
        scheduler: Arc<BeatScheduler>,
        settings: &PracticeSettings,
    ) -> Result<Arc<Self>> {
        let lead_hand: LeadHand = settings.lead_hand.parse()?;
        let mut library = GrooveLibrary::with_presets();
        if let Some(dir) = settings.groove_dir() {
            if let Err(e) = library.load_dir(&dir) {
                warn!("Cannot read groove directory {}: {}", dir.display(), e);
            }
        }
        Ok(Self::new(
            scheduler,
            RudimentRoutine::new(lead_hand, settings.bars_per_rudiment),
            library,
        ))
    }

    /// Follow scheduler events until `cancel` fires
    ///
    /// The subscription is taken before this returns, so no bar that ends
    /// after the call is missed.
    pub fn spawn(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let rx = self.scheduler.subscribe();
        let routines = Arc::clone(self);
        tokio::spawn(async move { routines.run(rx, cancel).await })
    }

    async fn run(&self, mut rx: broadcast::Receiver<MetronomeEvent>, cancel: CancellationToken) {
        debug!("Practice routines following scheduler");
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = rx.recv() => event,
            };
            match event {
                Ok(event) => self.handle(&event).await,
                Err(RecvError::Lagged(n)) => warn!("Practice routines lagged by {} events", n),
                Err(RecvError::Closed) => break,
            }
        }
        debug!("Practice routines stopped");
    }

    /// React to one scheduler event
    pub async fn handle(&self, event: &MetronomeEvent) {
        match event {
            MetronomeEvent::Beat(beat) => {
                let notes = self.groove.lock().await.on_beat(beat);
                if let Some(notes) = notes {
                    self.scheduler.announce(MetronomeEvent::GrooveNotes { notes });
                }
            }
            MetronomeEvent::BarAdvanced { .. } => {
                let change = self.rudiments.lock().await.on_bar_advanced();
                if let Some(change) = change {
                    debug!("Rudiment now {}", change.current.name);
                    self.scheduler.announce(MetronomeEvent::rudiment_changed(change));
                }
                let finished = self.groove.lock().await.on_bar_advanced();
                if finished {
                    info!("Groove loops complete");
                    self.announce_groove_stopped();
                }
            }
            _ => {}
        }
    }

    // =========================================================================
    // Rudiments
    // =========================================================================

    /// Start rotating rudiments; `None` when already running
    pub async fn start_rudiments(&self) -> Option<RudimentChange> {
        let change = self.rudiments.lock().await.start()?;
        info!("Rudiment practice started with {}", change.current.name);
        self.scheduler.announce(MetronomeEvent::routine_changed(RoutineKind::Rudiments, true));
        self.scheduler.announce(MetronomeEvent::rudiment_changed(change.clone()));
        Some(change)
    }

    pub async fn stop_rudiments(&self) -> bool {
        let stopped = self.rudiments.lock().await.stop();
        if stopped {
            info!("Rudiment practice stopped");
            self.scheduler.announce(MetronomeEvent::routine_changed(RoutineKind::Rudiments, false));
        }
        stopped
    }

    pub async fn set_bars_per_rudiment(&self, bars: u32) -> u32 {
        self.rudiments.lock().await.set_bars_per_rudiment(bars)
    }

    pub async fn set_lead_hand(&self, lead_hand: LeadHand) {
        self.rudiments.lock().await.set_lead_hand(lead_hand);
    }

    /// Restrict the rotation; returns the names now enabled
    pub async fn enable_rudiments(&self, names: &[String]) -> Vec<String> {
        let mut rudiments = self.rudiments.lock().await;
        rudiments.set_enabled(names);
        rudiments.enabled_names().into_iter().map(str::to_string).collect()
    }

    pub async fn rudiment_names(&self) -> Vec<String> {
        let rudiments = self.rudiments.lock().await;
        rudiments.names().into_iter().map(str::to_string).collect()
    }

    /// The rudiment being practised and the next one, while running
    pub async fn current_rudiment(&self) -> Option<RudimentChange> {
        let rudiments = self.rudiments.lock().await;
        if !rudiments.is_running() {
            return None;
        }
        Some(RudimentChange {
            current: rudiments.current()?.clone(),
            next: rudiments.next()?.clone(),
        })
    }

    // =========================================================================
    // Grooves
    // =========================================================================

    pub fn groove_names(&self) -> Vec<&str> {
        self.library.names()
    }

    /// Select a groove by name and adopt its signature
    ///
    /// The signature change resets the bar position like any other.
    pub async fn use_groove(&self, name: &str) -> Result<DrumGroove> {
        let groove = self
            .library
            .by_name(name)
            .cloned()
            .ok_or_else(|| Error::Validation(format!("Unknown groove: {}", name.trim())))?;

        self.scheduler
            .set_signature(groove.beats_per_bar, groove.subdivision)
            .await?;
        self.groove.lock().await.set_groove(groove.clone());

        info!("Groove '{}' selected", groove.name);
        self.scheduler.announce(MetronomeEvent::GrooveSelected {
            name: groove.name.clone(),
            beats_per_bar: groove.beats_per_bar,
            subdivisions_per_beat: groove.subdivision,
            timestamp: Utc::now(),
        });
        Ok(groove)
    }

    /// Passes through the groove before it stops by itself; 0 loops forever
    pub async fn set_loop_count(&self, loop_count: u32) {
        self.groove.lock().await.set_loop_count(loop_count);
    }

    /// Fails when no groove has been selected
    pub async fn start_groove(&self) -> Result<bool> {
        let started = self.groove.lock().await.start()?;
        if started {
            info!("Groove play-along started");
            self.scheduler.announce(MetronomeEvent::routine_changed(RoutineKind::Groove, true));
        }
        Ok(started)
    }

    pub async fn stop_groove(&self) -> bool {
        let stopped = self.groove.lock().await.stop();
        if stopped {
            info!("Groove play-along stopped");
            self.announce_groove_stopped();
        }
        stopped
    }

    pub async fn groove_running(&self) -> bool {
        self.groove.lock().await.is_running()
    }

    fn announce_groove_stopped(&self) {
        self.scheduler.announce(MetronomeEvent::routine_changed(RoutineKind::Groove, false));
        self.scheduler.announce(MetronomeEvent::GrooveNotes { notes: Vec::new() });
    }
}
