//! Status document shared by discovery replies and the control API

use crate::scheduler::BeatScheduler;
use crate::timing::TimingState;
use dm_common::StatusPayload;

/// How this instance identifies itself on the network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceInfo {
    pub name: String,
    /// Port the control server actually bound
    pub http_port: u16,
}

impl InstanceInfo {
    pub fn new(name: impl Into<String>, http_port: u16) -> Self {
        Self {
            name: name.into(),
            http_port,
        }
    }

    pub fn payload(&self, state: &TimingState) -> StatusPayload {
        StatusPayload {
            name: self.name.clone(),
            http_port: self.http_port,
            bpm: state.bpm,
            running: state.running,
        }
    }

    /// Status reflecting the scheduler at call time
    pub async fn status(&self, scheduler: &BeatScheduler) -> StatusPayload {
        self.payload(&scheduler.snapshot().await)
    }
}
