//! Port traits for the engine's external collaborators.
//!
//! These are the only abstractions in the engine; everything else is
//! concrete. Ports exist for:
//! - frame capture (directory watcher today, camera pipeline tomorrow)
//! - human-presence detection (YOLO sidecar)
//! - structured reasoning queries (LLM backend)
//! - narration output (console or speech synthesis)
//!
//! Failures at a port never escape a tick: the engine logs and degrades
//! (skip the tick, treat a condition as unmet, fall back to a template).

use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A camera frame reference with its capture timestamp.
///
/// The engine never owns pixel data; collaborators receive the path.
#[derive(Debug, Clone)]
pub struct Frame {
    pub path: PathBuf,
    pub captured_at: SystemTime,
}

impl Frame {
    /// Age of the frame relative to now. Zero if the clock went backward.
    pub fn age(&self) -> Duration {
        self.captured_at.elapsed().unwrap_or_default()
    }
}

/// Result of a presence-detection pass over one frame.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Presence {
    pub present: bool,
    pub count: u32,
}

/// One person as described by the reasoning backend.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PlayerSighting {
    /// Free-text appearance ("tall, red scarf, glasses").
    pub appearance: String,
    /// What they are currently doing.
    pub activity: String,
    #[serde(default)]
    pub held_item: Option<String>,
    pub gender: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// Outcome of a narration call, carrying an optional speech-duration
/// estimate the scheduler uses as a one-shot extra delay.
#[derive(Debug, Clone, Copy, Default)]
pub struct NarrationOutcome {
    pub speech_duration: Option<Duration>,
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame source unavailable: {0}")]
    Unavailable(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum DetectError {
    #[error("detector request failed: {0}")]
    RequestFailed(String),
    #[error("invalid detector response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ReasoningError {
    #[error("reasoning request failed: {0}")]
    RequestFailed(String),
    #[error("invalid reasoning response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, thiserror::Error)]
pub enum NarrateError {
    #[error("narration failed: {0}")]
    Failed(String),
}

/// Supplies the most recent camera frame.
#[async_trait]
pub trait FrameSource: Send + Sync {
    async fn latest_frame(&self) -> Result<Frame, FrameError>;
}

/// Reports whether humans are present in a frame, and how many.
#[async_trait]
pub trait PresenceDetector: Send + Sync {
    async fn detect(&self, frame: &Frame) -> Result<Presence, DetectError>;
}

/// Generic structured-query interface over the LLM backend.
///
/// The engine supplies a JSON schema describing the shape it expects and
/// receives a JSON value back; typed deserialization happens at the call
/// site, so unvalidated data never crosses this boundary.
#[async_trait]
pub trait ReasoningBackend: Send + Sync {
    async fn evaluate(
        &self,
        frame: &Frame,
        context: &str,
        schema: &serde_json::Value,
    ) -> Result<serde_json::Value, ReasoningError>;
}

/// Performs narration output (print or speech).
#[async_trait]
pub trait Narrator: Send + Sync {
    async fn narrate(&self, text: &str) -> Result<NarrationOutcome, NarrateError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_age_is_zero_for_future_timestamps() {
        let frame = Frame {
            path: PathBuf::from("/tmp/f.jpg"),
            captured_at: SystemTime::now() + Duration::from_secs(60),
        };
        assert_eq!(frame.age(), Duration::ZERO);
    }

    #[test]
    fn test_frame_age_grows_with_capture_distance() {
        let frame = Frame {
            path: PathBuf::from("/tmp/f.jpg"),
            captured_at: SystemTime::now() - Duration::from_secs(30),
        };
        assert!(frame.age() >= Duration::from_secs(29));
    }

    #[test]
    fn test_player_sighting_optional_fields() {
        let json = r#"{"appearance": "red scarf", "activity": "looking around", "gender": "unknown"}"#;
        let sighting: PlayerSighting = serde_json::from_str(json).unwrap();
        assert!(sighting.held_item.is_none());
        assert!(sighting.name.is_none());
    }
}
