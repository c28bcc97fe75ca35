//! LAN control protocol shared by the engine and remote clients
//!
//! Two transports carry the same status document:
//!
//! 1. **Discovery (UDP)**: a client broadcasts [`DISCOVERY_MAGIC`] to
//!    [`DISCOVERY_PORT`]; every running engine answers the sender with a
//!    JSON [`StatusPayload`].
//! 2. **Control API (HTTP)**: `GET /status`, `POST /start`, `POST /stop` and
//!    `POST /tempo` on [`HTTP_PORT`], all answering with a [`StatusPayload`].
//!
//! The engine always writes every field. Decoding is lenient so that a
//! partial document from an older or foreign peer still yields usable values.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Well-known UDP port the discovery responder listens on
pub const DISCOVERY_PORT: u16 = 45833;

/// Default HTTP control API port
pub const HTTP_PORT: u16 = 45834;

/// Probe token carried by discovery datagrams
pub const DISCOVERY_MAGIC: &[u8] = b"DRUM_METRONOME_DISCOVER";

/// Instance name used when none is configured or reported
pub const DEFAULT_NAME: &str = "Drum Metronome";

/// Lowest accepted tempo
pub const MIN_BPM: u32 = 20;

/// Highest accepted tempo
pub const MAX_BPM: u32 = 400;

/// Tempo at process start and for peers that do not report one
pub const DEFAULT_BPM: u32 = 100;

/// Live state of one metronome instance as seen on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusPayload {
    /// Human readable instance name
    #[serde(default = "default_name")]
    pub name: String,

    /// Port of the instance's HTTP control API
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Current tempo in beats per minute
    #[serde(default = "default_bpm")]
    pub bpm: u32,

    /// Whether the metronome is ticking
    #[serde(default)]
    pub running: bool,
}

fn default_name() -> String {
    DEFAULT_NAME.to_string()
}

fn default_http_port() -> u16 {
    HTTP_PORT
}

fn default_bpm() -> u32 {
    DEFAULT_BPM
}

impl Default for StatusPayload {
    fn default() -> Self {
        Self {
            name: default_name(),
            http_port: HTTP_PORT,
            bpm: DEFAULT_BPM,
            running: false,
        }
    }
}

impl StatusPayload {
    /// Decode a status document received from a peer
    ///
    /// Unknown fields are ignored and missing fields take their defaults.
    pub fn decode(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }

    /// Encode for transmission
    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

/// Body of `POST /tempo`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TempoRequest {
    pub bpm: u32,
}

/// Error document returned with non-2xx control API responses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

impl ErrorBody {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}

/// Clamp any integer tempo into `[MIN_BPM, MAX_BPM]`
pub fn clamp_bpm(bpm: i64) -> u32 {
    bpm.clamp(MIN_BPM as i64, MAX_BPM as i64) as u32
}

/// Interpret a JSON value as a tempo, clamping it into range
///
/// Integers are clamped, floats are truncated toward zero first and integer
/// strings are parsed. Everything else (booleans, fractional strings, NaN,
/// objects) yields `None`.
pub fn coerce_bpm(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(clamp_bpm(i))
            } else if n.as_u64().is_some() {
                // Larger than i64::MAX
                Some(MAX_BPM)
            } else {
                let f = n.as_f64()?;
                if !f.is_finite() {
                    return None;
                }
                // Saturating float-to-int cast
                Some(clamp_bpm(f.trunc() as i64))
            }
        }
        Value::String(s) => s.trim().parse::<i64>().ok().map(clamp_bpm),
        _ => None,
    }
}

/// Whether a received datagram is a discovery probe
pub fn is_discovery_probe(datagram: &[u8]) -> bool {
    datagram.trim_ascii() == DISCOVERY_MAGIC
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_clamp_bpm_bounds() {
        assert_eq!(clamp_bpm(19), 20);
        assert_eq!(clamp_bpm(20), 20);
        assert_eq!(clamp_bpm(133), 133);
        assert_eq!(clamp_bpm(400), 400);
        assert_eq!(clamp_bpm(401), 400);
        assert_eq!(clamp_bpm(-5), 20);
    }

    #[test]
    fn test_coerce_bpm_accepts_numbers_and_integer_strings() {
        assert_eq!(coerce_bpm(&json!(120)), Some(120));
        assert_eq!(coerce_bpm(&json!(999)), Some(400));
        assert_eq!(coerce_bpm(&json!(0)), Some(20));
        assert_eq!(coerce_bpm(&json!(120.9)), Some(120));
        assert_eq!(coerce_bpm(&json!(" 90 ")), Some(90));
        assert_eq!(coerce_bpm(&json!(u64::MAX)), Some(400));
    }

    #[test]
    fn test_coerce_bpm_rejects_other_values() {
        assert_eq!(coerce_bpm(&json!("fast")), None);
        assert_eq!(coerce_bpm(&json!("120.5")), None);
        assert_eq!(coerce_bpm(&json!(true)), None);
        assert_eq!(coerce_bpm(&json!(null)), None);
        assert_eq!(coerce_bpm(&json!({"bpm": 120})), None);
    }

    #[test]
    fn test_status_decode_fills_missing_fields() {
        let status = StatusPayload::decode(br#"{"bpm": 132}"#).unwrap();
        assert_eq!(status.name, "Drum Metronome");
        assert_eq!(status.http_port, 45834);
        assert_eq!(status.bpm, 132);
        assert!(!status.running);

        let empty = StatusPayload::decode(b"{}").unwrap();
        assert_eq!(empty, StatusPayload::default());
    }

    #[test]
    fn test_status_decode_ignores_unknown_fields() {
        let status = StatusPayload::decode(
            br#"{"name":"Studio","http_port":5000,"bpm":90,"running":true,"extra":[1,2]}"#,
        )
        .unwrap();
        assert_eq!(status.name, "Studio");
        assert_eq!(status.http_port, 5000);
        assert!(status.running);
    }

    #[test]
    fn test_status_encode_writes_every_field() {
        let bytes = StatusPayload::default().encode().unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        for key in ["name", "http_port", "bpm", "running"] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
    }

    #[test]
    fn test_discovery_probe_matching() {
        assert!(is_discovery_probe(b"DRUM_METRONOME_DISCOVER"));
        assert!(is_discovery_probe(b"DRUM_METRONOME_DISCOVER\n"));
        assert!(is_discovery_probe(b"  DRUM_METRONOME_DISCOVER "));
        assert!(!is_discovery_probe(b"DRUM_METRONOME"));
        assert!(!is_discovery_probe(b""));
    }
}
