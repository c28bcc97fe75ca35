//! Beat scheduler
//!
//! Owns the [`SchedulerCore`] behind a single mutex and runs the timing loop
//! as one long-lived tokio task. Every mutation (local console, tap tempo,
//! control server, ladder) goes through this type, so a network tempo change
//! and a bar-boundary ladder step are applied atomically between ticks.
//!
//! The loop sleeps until the next deadline or until a mutation wakes it to
//! re-read the deadline; it never busy-polls and never touches the network.
//! Events are fanned out over a broadcast channel: a slow subscriber lags
//! and loses events instead of delaying ticks.

use crate::error::Result;
use crate::events::{MetronomeEvent, TempoSource};
use crate::ladder::{LadderPlan, LadderState};
use crate::timing::{SchedulerCore, TimingState};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

/// Event buffer per subscriber before it starts lagging
const EVENT_CAPACITY: usize = 256;

pub struct BeatScheduler {
    core: Mutex<SchedulerCore>,
    wake: Notify,
    event_tx: broadcast::Sender<MetronomeEvent>,
}

impl BeatScheduler {
    pub fn new(initial: TimingState) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
        Arc::new(Self {
            core: Mutex::new(SchedulerCore::new(initial)),
            wake: Notify::new(),
            event_tx,
        })
    }

    /// Spawn the timing loop; it exits when `cancel` fires
    pub fn spawn_timing_loop(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move { scheduler.run_timing_loop(cancel).await })
    }

    /// Subscribe to beat and state events
    pub fn subscribe(&self) -> broadcast::Receiver<MetronomeEvent> {
        self.event_tx.subscribe()
    }

    /// Consistent copy of the current timing state
    pub async fn snapshot(&self) -> TimingState {
        self.core.lock().await.state()
    }

    /// Ladder state and plan read under one lock
    pub async fn ladder(&self) -> (LadderState, Option<LadderPlan>) {
        let core = self.core.lock().await;
        (core.ladder_state(), core.ladder_plan())
    }

    /// Start ticking; returns `false` if already running
    pub async fn start(&self) -> bool {
        self.mutate(|core, now| core.start(now)).await
    }

    /// Stop ticking; returns `false` if already stopped
    pub async fn stop(&self) -> bool {
        self.mutate(|core, _| core.stop()).await
    }

    /// Flip the running flag in one step; returns the new value
    pub async fn toggle(&self) -> bool {
        self.mutate(|core, now| core.toggle(now)).await
    }

    /// Set tempo (clamped to the legal range); returns the stored value
    pub async fn set_tempo(&self, bpm: i64, source: TempoSource) -> u32 {
        self.mutate(|core, now| core.set_tempo(bpm, source, now)).await
    }

    /// Shift the tempo by `delta` from whatever is stored when the lock is held
    pub async fn nudge_tempo(&self, delta: i64, source: TempoSource) -> u32 {
        self.mutate(|core, now| core.nudge_tempo(delta, source, now)).await
    }

    pub async fn set_signature(
        &self,
        beats_per_bar: u32,
        subdivisions_per_beat: u32,
    ) -> Result<()> {
        self.mutate(|core, now| core.set_signature(beats_per_bar, subdivisions_per_beat, now))
            .await
    }

    pub async fn set_accent_on_one(&self, accent_on_one: bool) {
        self.mutate(|core, _| core.set_accent_on_one(accent_on_one)).await
    }

    /// Begin a ladder and start ticking under the same lock
    ///
    /// Returns the ladder state and whether the metronome was started.
    pub async fn begin_ladder_running(&self, plan: LadderPlan) -> Result<(LadderState, bool)> {
        self.mutate(|core, now| {
            let state = core.begin_ladder(plan, now)?;
            Ok((state, core.start(now)))
        })
        .await
    }

    /// Publish an event produced outside the core, such as a practice
    /// routine update
    pub fn announce(&self, event: MetronomeEvent) {
        let _ = self.event_tx.send(event);
    }

    pub async fn cancel_ladder(&self) -> bool {
        self.mutate(|core, _| core.cancel_ladder()).await
    }

    /// Run a mutation under the lock, publish its events and wake the loop
    async fn mutate<T>(&self, f: impl FnOnce(&mut SchedulerCore, Instant) -> T) -> T {
        let mut core = self.core.lock().await;
        let result = f(&mut core, Instant::now());
        self.publish(core.drain_events());
        drop(core);
        self.wake.notify_one();
        result
    }

    fn publish(&self, events: Vec<MetronomeEvent>) {
        for event in events {
            // No receivers is fine
            let _ = self.event_tx.send(event);
        }
    }

    async fn run_timing_loop(self: Arc<Self>, cancel: CancellationToken) {
        debug!("Timing loop started");
        loop {
            let deadline = self.core.lock().await.next_due();
            match deadline {
                Some(due) => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = self.wake.notified() => continue,
                        _ = sleep_until(due) => self.service_tick().await,
                    }
                }
                None => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = self.wake.notified() => continue,
                    }
                }
            }
        }

        // Shutdown halts output; the stored position is irrelevant afterwards
        let mut core = self.core.lock().await;
        core.stop();
        self.publish(core.drain_events());
        info!("Timing loop stopped");
    }

    async fn service_tick(&self) {
        let mut core = self.core.lock().await;
        let now = Instant::now();
        // The deadline may have moved while we slept
        match core.next_due() {
            Some(due) if due <= now => {}
            _ => return,
        }
        if let Some(beat) = core.fire(now) {
            trace!(
                "Tick bar={} beat={} sub={} accent={}",
                beat.bar_index,
                beat.beat_index,
                beat.subdivision_index,
                beat.is_accent
            );
        }
        self.publish(core.drain_events());
    }
}
