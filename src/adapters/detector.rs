//! HTTP client for the YOLO person-detection sidecar.
//!
//! The sidecar exposes `POST /detect` taking a frame path it can read
//! from a shared volume, plus a confidence threshold, and answers with
//! camelCase JSON.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::DetectorEndpoint;
use crate::ports::{DetectError, Frame, Presence, PresenceDetector};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct DetectRequest<'a> {
    source_path: &'a str,
    conf: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DetectResponse {
    humans_detected: bool,
    humans_count: u32,
}

pub struct HttpDetector {
    client: reqwest::Client,
    endpoint: DetectorEndpoint,
}

impl HttpDetector {
    pub fn new(endpoint: DetectorEndpoint) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
        }
    }
}

#[async_trait]
impl PresenceDetector for HttpDetector {
    async fn detect(&self, frame: &Frame) -> Result<Presence, DetectError> {
        let url = format!("{}/detect", self.endpoint.url.trim_end_matches('/'));
        let source_path = frame.path.to_string_lossy();
        let request = DetectRequest {
            source_path: source_path.as_ref(),
            conf: self.endpoint.confidence,
        };
        let response = self
            .client
            .post(&url)
            .timeout(REQUEST_TIMEOUT)
            .json(&request)
            .send()
            .await
            .map_err(|e| DetectError::RequestFailed(e.to_string()))?
            .error_for_status()
            .map_err(|e| DetectError::RequestFailed(e.to_string()))?;
        let body: DetectResponse = response
            .json()
            .await
            .map_err(|e| DetectError::InvalidResponse(e.to_string()))?;
        Ok(Presence {
            present: body.humans_detected,
            count: body.humans_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_request_wire_shape() {
        let request = DetectRequest {
            source_path: "/frames/latest.jpg",
            conf: 0.5,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["source_path"], "/frames/latest.jpg");
        assert_eq!(json["conf"], 0.5);
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_path_is_sent_lossily_not_empty() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;
        use std::path::PathBuf;

        let path = PathBuf::from(OsStr::from_bytes(b"/frames/fr\xFFame.jpg"));
        let source_path = path.to_string_lossy();
        let request = DetectRequest {
            source_path: source_path.as_ref(),
            conf: 0.5,
        };
        let json = serde_json::to_value(&request).unwrap();
        let sent = json["source_path"].as_str().unwrap();
        assert!(!sent.is_empty());
        assert!(sent.ends_with("ame.jpg"));
    }

    #[test]
    fn test_detect_response_is_camel_case() {
        let body: DetectResponse =
            serde_json::from_str(r#"{"humansDetected": true, "humansCount": 2}"#).unwrap();
        assert!(body.humans_detected);
        assert_eq!(body.humans_count, 2);
    }
}
