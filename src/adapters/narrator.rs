//! Narrators: a console fallback for development and an HTTP client for
//! the TTS service.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::NarratorEndpoint;
use crate::ports::{NarrateError, NarrationOutcome, Narrator};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Speaking rate used to estimate speech duration when no TTS service
/// reports one.
const WORDS_PER_MINUTE: u64 = 150;

fn estimate_speech(text: &str) -> Duration {
    let words = text.split_whitespace().count() as u64;
    Duration::from_millis(words * 60_000 / WORDS_PER_MINUTE)
}

/// Prints lines to stdout. Used when no TTS endpoint is configured.
pub struct ConsoleNarrator;

#[async_trait]
impl Narrator for ConsoleNarrator {
    async fn narrate(&self, text: &str) -> Result<NarrationOutcome, NarrateError> {
        println!("[wardrobe] {text}");
        Ok(NarrationOutcome {
            speech_duration: Some(estimate_speech(text)),
        })
    }
}

#[derive(Debug, Serialize)]
struct SpeakRequest<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct SpeakResponse {
    #[serde(default)]
    duration_ms: Option<u64>,
}

/// Sends lines to a TTS service that plays them on the room speakers.
pub struct HttpNarrator {
    client: reqwest::Client,
    endpoint: NarratorEndpoint,
}

impl HttpNarrator {
    pub fn new(endpoint: NarratorEndpoint) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
        }
    }
}

#[async_trait]
impl Narrator for HttpNarrator {
    async fn narrate(&self, text: &str) -> Result<NarrationOutcome, NarrateError> {
        let response = self
            .client
            .post(&self.endpoint.url)
            .timeout(REQUEST_TIMEOUT)
            .json(&SpeakRequest { text })
            .send()
            .await
            .map_err(|e| NarrateError::Failed(e.to_string()))?
            .error_for_status()
            .map_err(|e| NarrateError::Failed(e.to_string()))?;
        // The body is optional: services that stream to the speakers may
        // answer with an empty 200.
        let body: SpeakResponse = response.json().await.unwrap_or_default();
        let speech_duration = body
            .duration_ms
            .map(Duration::from_millis)
            .or_else(|| Some(estimate_speech(text)));
        Ok(NarrationOutcome { speech_duration })
    }
}
