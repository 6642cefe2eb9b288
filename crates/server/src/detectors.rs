//! HTTP clients for the external detectors
//!
//! Both detectors take a base64 page image in a JSON body. They block, so
//! callers run them on the blocking pool.

use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use takeoff_core::{
    CountCandidate, CountDetector, CountRequest, ScaleDetectionInput, ScaleDetector, TakeoffError,
    TakeoffResult,
};

#[derive(Debug, Serialize)]
struct ScaleDetectionBody {
    image_base64: String,
}

#[derive(Debug, Serialize)]
struct CountDetectionBody<'a> {
    image_base64: String,
    #[serde(flatten)]
    request: &'a CountRequest,
}

#[derive(Debug, Deserialize)]
struct CountDetectionResponse {
    candidates: Vec<CountCandidate>,
}

fn post_json<B: Serialize, R: serde::de::DeserializeOwned>(
    agent: &ureq::Agent,
    url: &str,
    body: &B,
) -> TakeoffResult<R> {
    let payload = serde_json::to_string(body)
        .map_err(|e| TakeoffError::DetectionFailure(format!("failed to encode request: {e}")))?;

    let resp = agent
        .post(url)
        .set("Content-Type", "application/json")
        .set("User-Agent", "takeoff-server")
        .send_string(&payload)
        .map_err(|e| TakeoffError::DetectionFailure(format!("detector request failed: {e}")))?;

    let text = resp
        .into_string()
        .map_err(|e| TakeoffError::DetectionFailure(format!("unreadable detector response: {e}")))?;

    serde_json::from_str(&text)
        .map_err(|e| TakeoffError::DetectionFailure(format!("malformed detector response: {e}")))
}

fn agent(timeout: Duration) -> ureq::Agent {
    ureq::AgentBuilder::new().timeout(timeout).build()
}

/// OCR/vision scale detector behind an HTTP endpoint
///
/// The endpoint answers with `{ocr: {text, text_blocks}, vision: {...}}`,
/// either part optional.
pub struct HttpScaleDetector {
    agent: ureq::Agent,
    url: String,
}

impl HttpScaleDetector {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            agent: agent(timeout),
            url: url.into(),
        }
    }
}

impl ScaleDetector for HttpScaleDetector {
    fn detect_scale(&self, image: &[u8]) -> TakeoffResult<ScaleDetectionInput> {
        let body = ScaleDetectionBody {
            image_base64: STANDARD.encode(image),
        };
        post_json(&self.agent, &self.url, &body)
    }
}

/// Template or vision symbol detector behind an HTTP endpoint
pub struct HttpCountDetector {
    agent: ureq::Agent,
    url: String,
}

impl HttpCountDetector {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            agent: agent(timeout),
            url: url.into(),
        }
    }
}

impl CountDetector for HttpCountDetector {
    fn detect(&self, image: &[u8], request: &CountRequest) -> TakeoffResult<Vec<CountCandidate>> {
        let body = CountDetectionBody {
            image_base64: STANDARD.encode(image),
            request,
        };
        let response: CountDetectionResponse = post_json(&self.agent, &self.url, &body)?;
        Ok(response.candidates)
    }
}

/// Stand-in used when no detector endpoint is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredDetector;

impl ScaleDetector for UnconfiguredDetector {
    fn detect_scale(&self, _image: &[u8]) -> TakeoffResult<ScaleDetectionInput> {
        Err(TakeoffError::DetectionFailure(
            "no scale detector configured".to_string(),
        ))
    }
}

impl CountDetector for UnconfiguredDetector {
    fn detect(&self, _image: &[u8], _request: &CountRequest) -> TakeoffResult<Vec<CountCandidate>> {
        Err(TakeoffError::DetectionFailure(
            "no count detector configured".to_string(),
        ))
    }
}
