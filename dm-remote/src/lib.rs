//! # Drum Metronome Remote (dm-remote)
//!
//! Client side of the LAN protocol: finds running engines, keeps a registry
//! of what it has seen, polls the selected engine and sends it commands.

pub mod client;
pub mod discovery;
pub mod error;
pub mod registry;
pub mod session;

pub use client::{Command, ControlClient};
pub use discovery::DiscoveryClient;
pub use error::{RemoteError, Result};
pub use registry::{DeviceId, DeviceRecord, DeviceRegistry, ScanDiff};
pub use session::RemoteController;
