//! Error types for dm-remote
//!
//! Network failures are expected on a LAN and never fatal: they leave the
//! last known device state in place and the next poll or scan retries.

use crate::registry::DeviceId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RemoteError {
    /// Timeout, refused connection or error status
    #[error("Network error: {0}")]
    Transient(String),

    /// Reply that could not be decoded
    #[error("Malformed reply: {0}")]
    Malformed(String),

    /// Device not present in the registry
    #[error("Unknown device: {0}")]
    UnknownDevice(DeviceId),

    /// Command issued with no device selected
    #[error("No device selected")]
    NoDeviceSelected,

    /// Socket setup errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for RemoteError {
    fn from(e: reqwest::Error) -> Self {
        RemoteError::Transient(e.to_string())
    }
}

impl RemoteError {
    /// Whether retrying on the next natural cycle may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Transient(_) | RemoteError::Malformed(_))
    }
}

pub type Result<T> = std::result::Result<T, RemoteError>;
