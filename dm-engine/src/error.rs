//! Error types for dm-engine
//!
//! Local configuration mistakes surface as `Validation` and block the
//! affected action before any state is mutated.

use thiserror::Error;

/// Main error type for the metronome engine
#[derive(Error, Debug)]
pub enum Error {
    /// Bad signature, subdivision or ladder configuration
    #[error("Validation error: {0}")]
    Validation(String),

    /// Tap estimate requested without enough taps
    #[error("Insufficient data: {taps} tap(s) recorded, at least 2 required")]
    InsufficientData { taps: usize },

    /// Console command that could not be parsed
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// HTTP server errors
    #[error("HTTP server error: {0}")]
    Http(String),

    /// Discovery responder errors
    #[error("Discovery error: {0}")]
    Discovery(String),

    /// File or socket I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type using the engine Error
pub type Result<T> = std::result::Result<T, Error>;
