//! Reasoning backend over an OpenAI-compatible chat-completions API
//! serving a vision-capable model.
//!
//! Every call is a single structured query: the system prompt embeds the
//! JSON schema the caller expects and demands a JSON-only answer, the
//! user message carries the context plus the frame as a base64 image.
//! The reply is fence-stripped and parsed into a `serde_json::Value`;
//! typed validation happens at the caller against the same schema.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::config::ReasoningEndpoint;
use crate::ports::{Frame, ReasoningBackend, ReasoningError};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

pub struct HttpReasoning {
    client: reqwest::Client,
    endpoint: ReasoningEndpoint,
}

impl HttpReasoning {
    pub fn new(endpoint: ReasoningEndpoint) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
        }
    }

    fn system_prompt(schema: &serde_json::Value) -> String {
        format!(
            "You are the perception and voice of an interactive escape room. \
             Answer with a single JSON object matching this schema, and \
             nothing else. No prose, no code fences.\n\n{}",
            serde_json::to_string_pretty(schema).unwrap_or_default()
        )
    }
}

/// Strip an optional markdown code fence from a model reply.
fn strip_fences(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

#[async_trait]
impl ReasoningBackend for HttpReasoning {
    async fn evaluate(
        &self,
        frame: &Frame,
        context: &str,
        schema: &serde_json::Value,
    ) -> Result<serde_json::Value, ReasoningError> {
        let image = tokio::fs::read(&frame.path)
            .await
            .map_err(|e| ReasoningError::RequestFailed(format!("reading frame: {e}")))?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(image);

        let body = json!({
            "model": self.endpoint.model,
            "messages": [
                {"role": "system", "content": Self::system_prompt(schema)},
                {"role": "user", "content": [
                    {"type": "text", "text": context},
                    {"type": "image_url", "image_url": {
                        "url": format!("data:image/jpeg;base64,{encoded}")
                    }},
                ]},
            ],
            "temperature": 0.7,
        });

        let url = format!(
            "{}/chat/completions",
            self.endpoint.url.trim_end_matches('/')
        );
        let mut request = self.client.post(&url).timeout(REQUEST_TIMEOUT).json(&body);
        if let Some(key) = &self.endpoint.api_key {
            request = request.bearer_auth(key);
        }
        let response = request
            .send()
            .await
            .map_err(|e| ReasoningError::RequestFailed(e.to_string()))?
            .error_for_status()
            .map_err(|e| ReasoningError::RequestFailed(e.to_string()))?;
        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| ReasoningError::InvalidResponse(e.to_string()))?;

        let content = chat
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .ok_or_else(|| ReasoningError::InvalidResponse("empty choices".into()))?;
        debug!(reply = content, "Reasoning reply");
        serde_json::from_str(strip_fences(content))
            .map_err(|e| ReasoningError::InvalidResponse(format!("not JSON: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_fences_plain_json() {
        assert_eq!(strip_fences(r#"{"a": 1}"#), r#"{"a": 1}"#);
    }

    #[test]
    fn test_strip_fences_json_fence() {
        let fenced = "```json\n{\"satisfied\": true}\n```";
        assert_eq!(strip_fences(fenced), "{\"satisfied\": true}");
    }

    #[test]
    fn test_strip_fences_bare_fence() {
        let fenced = "```\n{\"line\": \"x\"}\n```";
        assert_eq!(strip_fences(fenced), "{\"line\": \"x\"}");
    }

    #[test]
    fn test_system_prompt_embeds_schema() {
        let schema = json!({"type": "object"});
        let prompt = HttpReasoning::system_prompt(&schema);
        assert!(prompt.contains("\"type\": \"object\""));
        assert!(prompt.contains("single JSON object"));
    }

    #[test]
    fn test_chat_response_parses() {
        let raw = r#"{"choices": [{"message": {"role": "assistant", "content": "{}"}}]}"#;
        let chat: ChatResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(chat.choices[0].message.content, "{}");
    }
}
