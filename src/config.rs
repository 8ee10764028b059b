//! Engine configuration: env-var defaults with an optional TOML overlay.
//!
//! Every knob has a `FEJKUR_*` environment default so a bare binary runs
//! against local services; a config file overrides whichever fields it
//! names.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use serde::Deserialize;

/// YOLO detector sidecar endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct DetectorEndpoint {
    pub url: String,
    /// Detection confidence threshold passed through to the model.
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

fn default_confidence() -> f64 {
    0.5
}

/// Reasoning backend endpoint (chat-completions shaped).
#[derive(Debug, Clone, Deserialize)]
pub struct ReasoningEndpoint {
    pub url: String,
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

/// Optional speech-synthesis endpoint; without it narration goes to the
/// console.
#[derive(Debug, Clone, Deserialize)]
pub struct NarratorEndpoint {
    pub url: String,
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Nominal tick cadence.
    pub tick_interval_ms: u64,
    /// Frames older than this are skipped unused.
    pub frame_staleness_ms: u64,
    /// Sustained absence beyond this triggers the full reset to Idle.
    pub absence_timeout_ms: u64,
    /// Empty room while Playing beyond this ends the run (must be shorter
    /// than the absence timeout).
    pub abandon_grace_ms: u64,
    /// Consecutive presence ticks required to leave Idle.
    pub debounce_ticks: u32,
    /// Per-tick hint chance increment while not Idle.
    pub hint_step: f64,
    /// Hint chance must exceed this before hint narration may fire.
    pub hint_floor: f64,
    /// Hint chance must exceed this before the final-gesture disclosure
    /// may fire.
    pub gesture_floor: f64,
    /// Flat hint-chance bonus on task completion.
    pub completion_bonus: f64,
    /// Narration history length.
    pub history_cap: usize,
    /// Whether narration history survives a full reset.
    pub keep_history_on_reset: bool,
    /// Directory the capture pipeline writes frames into.
    pub frames_dir: PathBuf,
    /// Directory watched for condition marker files (doors closed, escape
    /// gesture).
    pub signals_dir: PathBuf,
    pub detector: DetectorEndpoint,
    pub reasoning: ReasoningEndpoint,
    pub narrator: Option<NarratorEndpoint>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: env_u64("FEJKUR_TICK_INTERVAL_MS", 15_000),
            frame_staleness_ms: env_u64("FEJKUR_FRAME_STALENESS_MS", 5_000),
            absence_timeout_ms: env_u64("FEJKUR_ABSENCE_TIMEOUT_MS", 90_000),
            abandon_grace_ms: env_u64("FEJKUR_ABANDON_GRACE_MS", 30_000),
            debounce_ticks: 2,
            hint_step: 0.01,
            hint_floor: 0.3,
            gesture_floor: 0.6,
            completion_bonus: 0.1,
            history_cap: 5,
            keep_history_on_reset: false,
            frames_dir: env_path("FEJKUR_FRAMES_DIR", "/var/lib/fejkur/frames"),
            signals_dir: env_path("FEJKUR_SIGNALS_DIR", "/var/lib/fejkur/signals"),
            detector: DetectorEndpoint {
                url: env_str("FEJKUR_DETECTOR_URL", "http://127.0.0.1:8001"),
                confidence: 0.5,
            },
            reasoning: ReasoningEndpoint {
                url: env_str("FEJKUR_REASONING_URL", "http://127.0.0.1:8080/v1"),
                model: env_str("FEJKUR_REASONING_MODEL", "gemma-3-12b-it"),
                api_key: std::env::var("FEJKUR_REASONING_API_KEY").ok(),
            },
            narrator: std::env::var("FEJKUR_TTS_URL")
                .ok()
                .map(|url| NarratorEndpoint { url }),
        }
    }
}

fn env_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_path(key: &str, default: &str) -> PathBuf {
    std::env::var(key)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(default))
}

impl EngineConfig {
    /// Load configuration: env defaults, overridden by the TOML file when
    /// one is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config: Self = match path {
            Some(p) => {
                let raw = std::fs::read_to_string(p)
                    .with_context(|| format!("Failed to read config {}", p.display()))?;
                toml::from_str(&raw)
                    .with_context(|| format!("Failed to parse config {}", p.display()))?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        ensure!(self.tick_interval_ms > 0, "tick_interval_ms must be nonzero");
        ensure!(
            self.frame_staleness_ms > 0,
            "frame_staleness_ms must be nonzero"
        );
        ensure!(self.debounce_ticks >= 2, "debounce_ticks must be at least 2");
        ensure!(
            self.abandon_grace_ms < self.absence_timeout_ms,
            "abandon_grace_ms must be shorter than absence_timeout_ms"
        );
        for (name, value) in [
            ("hint_step", self.hint_step),
            ("hint_floor", self.hint_floor),
            ("gesture_floor", self.gesture_floor),
            ("completion_bonus", self.completion_bonus),
        ] {
            ensure!(
                (0.0..=1.0).contains(&value),
                "{name} must be within [0, 1], got {value}"
            );
        }
        ensure!(
            self.hint_floor < self.gesture_floor,
            "hint_floor must be below gesture_floor"
        );
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn frame_staleness(&self) -> Duration {
        Duration::from_millis(self.frame_staleness_ms)
    }

    pub fn absence_timeout(&self) -> Duration {
        Duration::from_millis(self.absence_timeout_ms)
    }

    pub fn abandon_grace(&self) -> Duration {
        Duration::from_millis(self.abandon_grace_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.tick_interval(), Duration::from_secs(15));
        assert_eq!(config.frame_staleness(), Duration::from_secs(5));
        assert_eq!(config.debounce_ticks, 2);
        assert_eq!(config.history_cap, 5);
        assert!(!config.keep_history_on_reset);
    }

    #[test]
    fn test_toml_overlay_keeps_defaults_for_missing_fields() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
tick_interval_ms = 45000
keep_history_on_reset = true

[detector]
url = "http://camera-pi:8001"
confidence = 0.4
"#
        )
        .unwrap();

        let config = EngineConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.tick_interval_ms, 45_000);
        assert!(config.keep_history_on_reset);
        assert_eq!(config.detector.url, "http://camera-pi:8001");
        assert_eq!(config.detector.confidence, 0.4);
        // Untouched fields fall back to defaults.
        assert_eq!(config.hint_step, 0.01);
        assert_eq!(config.history_cap, 5);
    }

    #[test]
    fn test_validation_rejects_bad_probabilities() {
        let mut config = EngineConfig::default();
        config.hint_step = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_inverted_floors() {
        let mut config = EngineConfig::default();
        config.hint_floor = 0.9;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_grace_longer_than_timeout() {
        let mut config = EngineConfig::default();
        config.abandon_grace_ms = config.absence_timeout_ms + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_single_tick_debounce() {
        let mut config = EngineConfig::default();
        config.debounce_ticks = 1;
        assert!(config.validate().is_err());
    }
}
