//! # Drum Metronome Common Library
//!
//! Shared code for the desktop engine and the remote client:
//! - Wire protocol (discovery probe, status payload, bpm coercion)
//! - Bootstrap settings loading
//! - Common error types

pub mod config;
pub mod error;
pub mod protocol;

pub use config::Settings;
pub use error::{Error, Result};
pub use protocol::StatusPayload;
