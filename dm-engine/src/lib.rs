//! # Drum Metronome Engine (dm-engine)
//!
//! The authoritative metronome: a drift-correcting beat scheduler that
//! advances a tempo ladder, fed by tap tempo and a local console, and
//! exposed on the LAN through a UDP discovery responder and an HTTP
//! control server. Rudiment and groove practice routines ride along on the
//! scheduler's bar and tick events.
//!
//! All timing state lives in [`scheduler::BeatScheduler`]; every other
//! component either reads snapshots from it or asks it to mutate.

pub mod api;
pub mod control;
pub mod discovery;
pub mod error;
pub mod events;
pub mod groove;
pub mod ladder;
pub mod practice;
pub mod rudiments;
pub mod scheduler;
pub mod status;
pub mod tap;
pub mod timing;

pub use error::{Error, Result};
pub use scheduler::BeatScheduler;
pub use status::InstanceInfo;
pub use timing::TimingState;
