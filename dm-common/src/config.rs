//! Bootstrap settings
//!
//! Settings are resolved in priority order:
//! 1. Command-line flags (applied by each binary after loading)
//! 2. Environment variables (via clap `env`)
//! 3. TOML settings file
//! 4. Compiled defaults
//!
//! A missing default settings file is not fatal: a warning is logged and the
//! compiled defaults are used. A file that exists but cannot be parsed is a
//! configuration error.

use crate::protocol::{DEFAULT_BPM, DEFAULT_NAME, DISCOVERY_PORT, HTTP_PORT};
use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Directory name under the platform config directory
const APP_DIR: &str = "drum-metronome";

/// Settings file name
const SETTINGS_FILE: &str = "settings.toml";

/// Custom groove directory name
const GROOVE_DIR: &str = "grooves";

/// All bootstrap settings
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub remote: RemoteSettings,
    pub metronome: MetronomeSettings,
    pub tap: TapSettings,
    pub client: ClientSettings,
    pub practice: PracticeSettings,
    pub logging: LoggingSettings,
}

/// Network identity and ports (`remote/http_port`, `remote/discovery_port`)
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct RemoteSettings {
    pub name: String,
    pub http_port: u16,
    pub discovery_port: u16,
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            http_port: HTTP_PORT,
            discovery_port: DISCOVERY_PORT,
        }
    }
}

/// Initial timing state
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct MetronomeSettings {
    pub bpm: u32,
    pub beats_per_bar: u32,
    pub subdivision: u32,
    pub accent_on_one: bool,
}

impl Default for MetronomeSettings {
    fn default() -> Self {
        Self {
            bpm: DEFAULT_BPM,
            beats_per_bar: 4,
            subdivision: 1,
            accent_on_one: true,
        }
    }
}

/// Tap tempo window
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct TapSettings {
    /// Minimum pause that starts a new tapping phrase
    pub reset_ms: u64,
    /// Most recent taps kept for the estimate
    pub max_taps: usize,
}

impl Default for TapSettings {
    fn default() -> Self {
        Self {
            reset_ms: 2000,
            max_taps: 8,
        }
    }
}

/// Remote client cadence
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientSettings {
    pub poll_interval_ms: u64,
    pub scan_window_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            scan_window_ms: 1500,
            request_timeout_ms: 1500,
        }
    }
}

/// Rudiment and groove routines
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct PracticeSettings {
    /// Bars each rudiment is held before rotating
    pub bars_per_rudiment: u32,
    /// `R`, `L` or `Mixed`
    pub lead_hand: String,
    /// Extra grooves (`*.json`); defaults to [`default_groove_dir`]
    pub groove_dir: Option<PathBuf>,
}

impl Default for PracticeSettings {
    fn default() -> Self {
        Self {
            bars_per_rudiment: 1,
            lead_hand: "R".to_string(),
            groove_dir: None,
        }
    }
}

impl PracticeSettings {
    /// Configured groove directory, falling back to the platform default
    pub fn groove_dir(&self) -> Option<PathBuf> {
        self.groove_dir.clone().or_else(default_groove_dir)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Settings {
    /// Parse settings from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Invalid settings file: {}", e)))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from an explicit path, or from the default location
    ///
    /// An explicit path must exist. The default location is optional.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            let content = std::fs::read_to_string(path).map_err(|e| {
                Error::Config(format!("Cannot read settings {}: {}", path.display(), e))
            })?;
            info!("Loaded settings from {}", path.display());
            return Self::from_toml_str(&content);
        }

        match default_settings_path() {
            Some(path) if path.exists() => {
                let content = std::fs::read_to_string(&path)?;
                info!("Loaded settings from {}", path.display());
                Self::from_toml_str(&content)
            }
            Some(path) => {
                warn!(
                    "Settings file {} not found, using defaults",
                    path.display()
                );
                Ok(Self::default())
            }
            None => {
                warn!("Could not determine config directory, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Reject values that can never work at runtime
    pub fn validate(&self) -> Result<()> {
        if self.tap.reset_ms == 0 {
            return Err(Error::Config("tap.reset_ms must be positive".to_string()));
        }
        if self.tap.max_taps < 2 {
            return Err(Error::Config("tap.max_taps must be at least 2".to_string()));
        }
        if self.client.poll_interval_ms == 0 {
            return Err(Error::Config(
                "client.poll_interval_ms must be positive".to_string(),
            ));
        }
        if self.client.request_timeout_ms == 0 {
            return Err(Error::Config(
                "client.request_timeout_ms must be positive".to_string(),
            ));
        }
        if self.practice.bars_per_rudiment == 0 {
            return Err(Error::Config(
                "practice.bars_per_rudiment must be at least 1".to_string(),
            ));
        }
        let hand = self.practice.lead_hand.trim().to_ascii_lowercase();
        if !["r", "l", "right", "left", "mixed"].contains(&hand.as_str()) {
            return Err(Error::Config(format!(
                "practice.lead_hand must be R, L or Mixed, not {:?}",
                self.practice.lead_hand
            )));
        }
        Ok(())
    }
}

/// Platform settings path, e.g. `~/.config/drum-metronome/settings.toml`
pub fn default_settings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_DIR).join(SETTINGS_FILE))
}

/// Platform directory for custom grooves, e.g. `~/.config/drum-metronome/grooves`
pub fn default_groove_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_DIR).join(GROOVE_DIR))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.remote.http_port, 45834);
        assert_eq!(settings.remote.discovery_port, 45833);
        assert_eq!(settings.remote.name, "Drum Metronome");
        assert_eq!(settings.metronome.bpm, 100);
        assert_eq!(settings.metronome.beats_per_bar, 4);
        assert_eq!(settings.metronome.subdivision, 1);
        assert!(settings.metronome.accent_on_one);
        assert_eq!(settings.logging.level, "info");
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let settings = Settings::from_toml_str(
            r#"
            [remote]
            http_port = 5000

            [metronome]
            beats_per_bar = 3
            "#,
        )
        .unwrap();
        assert_eq!(settings.remote.http_port, 5000);
        assert_eq!(settings.remote.discovery_port, 45833);
        assert_eq!(settings.metronome.beats_per_bar, 3);
        assert_eq!(settings.metronome.bpm, 100);
        assert_eq!(settings.tap, TapSettings::default());
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let err = Settings::from_toml_str("[remote\nhttp_port = ").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_validation_rejects_zero_poll_interval() {
        let err = Settings::from_toml_str("[client]\npoll_interval_ms = 0").unwrap_err();
        assert!(err.to_string().contains("poll_interval_ms"));
    }

    #[test]
    fn test_practice_section() {
        let settings = Settings::from_toml_str(
            r#"
            [practice]
            bars_per_rudiment = 4
            lead_hand = "mixed"
            groove_dir = "/srv/grooves"
            "#,
        )
        .unwrap();
        assert_eq!(settings.practice.bars_per_rudiment, 4);
        assert_eq!(settings.practice.lead_hand, "mixed");
        assert_eq!(
            settings.practice.groove_dir(),
            Some(PathBuf::from("/srv/grooves"))
        );
    }

    #[test]
    fn test_practice_validation() {
        let err = Settings::from_toml_str("[practice]\nbars_per_rudiment = 0").unwrap_err();
        assert!(err.to_string().contains("bars_per_rudiment"));

        let err = Settings::from_toml_str("[practice]\nlead_hand = \"both\"").unwrap_err();
        assert!(err.to_string().contains("lead_hand"));
    }
}
