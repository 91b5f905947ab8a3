//! One-shot delivery of a payload to the collection endpoint.
//!
//! No automatic retries: a failure re-enables the submit control and the
//! participant decides whether to try again.

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::config::SubmissionConfig;
use crate::payload::SubmissionPayload;

// ── Error ───────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    /// The remote server returned a non-2xx status code.
    #[error("collector returned HTTP {0}")]
    Status(u16),

    /// The request never completed (DNS, connection, TLS, ...).
    #[error("network error: {0}")]
    Network(String),

    #[error("a submission is already in flight")]
    InFlight,

    #[error("payload could not be encoded: {0}")]
    Encode(String),
}

// ── Request ─────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq)]
pub struct SubmissionRequest {
    pub url: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub body: Value,
}

/// Sends a request and reports the HTTP status. Non-2xx statuses are `Ok`;
/// only transport failures are `Err`.
pub trait Transport: Send + Sync {
    fn send(&self, request: &SubmissionRequest) -> Result<u16, SubmitError>;
}

/// Blocking HTTP via `ureq`; run it off the UI thread.
#[derive(Clone, Copy, Debug, Default)]
pub struct UreqTransport;

impl Transport for UreqTransport {
    fn send(&self, request: &SubmissionRequest) -> Result<u16, SubmitError> {
        let body = serde_json::to_vec(&request.body).map_err(|e| SubmitError::Encode(e.to_string()))?;
        let mut call = ureq::request(&request.method, &request.url);
        for (name, value) in &request.headers {
            call = call.set(name, value);
        }
        match call.send_bytes(&body) {
            Ok(response) => Ok(response.status()),
            Err(ureq::Error::Status(code, _)) => Ok(code),
            Err(e) => Err(SubmitError::Network(e.to_string())),
        }
    }
}

// ── Client ──────────────────────────────────────────────────────────────────

#[derive(Clone, Debug)]
pub struct SubmissionClient {
    config: SubmissionConfig,
}

impl SubmissionClient {
    pub fn new(config: SubmissionConfig) -> Self {
        Self { config }
    }

    /// Serialize, merge the configured extra fields, and wrap.
    pub fn build_request(&self, payload: &SubmissionPayload) -> Result<SubmissionRequest, SubmitError> {
        let mut object = match serde_json::to_value(payload) {
            Ok(Value::Object(object)) => object,
            Ok(_) => return Err(SubmitError::Encode("payload is not an object".into())),
            Err(e) => return Err(SubmitError::Encode(e.to_string())),
        };
        for (key, value) in &self.config.additional_fields {
            object.insert(
                key.clone(),
                expand_placeholders(value, &payload.participant_id, &payload.clip_id),
            );
        }
        let body = match &self.config.body_wrapper {
            Some(key) if !key.is_empty() => {
                let mut outer = Map::new();
                outer.insert(key.clone(), Value::Object(object));
                Value::Object(outer)
            }
            _ => Value::Object(object),
        };
        Ok(SubmissionRequest {
            url: self.config.endpoint.clone(),
            method: self.config.method.to_uppercase(),
            headers: self.config.headers.clone(),
            body,
        })
    }

    /// Send and classify. Blocking.
    pub fn deliver(&self, transport: &dyn Transport, request: &SubmissionRequest) -> Result<(), SubmitError> {
        match transport.send(request) {
            Ok(status) if (200..300).contains(&status) => {
                info!(url = %request.url, status, "submission accepted");
                Ok(())
            }
            Ok(status) => {
                warn!(url = %request.url, status, "submission rejected");
                Err(SubmitError::Status(status))
            }
            Err(e) => {
                warn!(url = %request.url, error = %e, "submission failed");
                Err(e)
            }
        }
    }
}

/// Substitute `{participantId}` and `{clipId}` inside string values, e.g.
/// `"filenameHint": "{participantId}_{clipId}"`.
fn expand_placeholders(value: &Value, participant_id: &str, clip_id: &str) -> Value {
    match value {
        Value::String(s) => Value::String(
            s.replace("{participantId}", participant_id)
                .replace("{clipId}", clip_id),
        ),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| expand_placeholders(v, participant_id, clip_id))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), expand_placeholders(v, participant_id, clip_id)))
                .collect(),
        ),
        other => other.clone(),
    }
}

// ── In-flight guard ─────────────────────────────────────────────────────────

/// At most one outstanding submission per clip.
#[derive(Debug, Default)]
pub struct InFlight {
    busy: bool,
}

impl InFlight {
    pub fn try_begin(&mut self) -> Result<(), SubmitError> {
        if self.busy {
            return Err(SubmitError::InFlight);
        }
        self.busy = true;
        Ok(())
    }

    pub fn end(&mut self) {
        self.busy = false;
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coords::{Point, RasterSize};
    use crate::payload::{NormalizedLine, Segment};
    use serde_json::json;
    use std::sync::Mutex;

    struct Fixed(Result<u16, SubmitError>, Mutex<Vec<SubmissionRequest>>);

    impl Transport for Fixed {
        fn send(&self, request: &SubmissionRequest) -> Result<u16, SubmitError> {
            self.1.lock().unwrap().push(request.clone());
            self.0.clone()
        }
    }

    fn payload() -> SubmissionPayload {
        SubmissionPayload {
            clip_id: "clip_04_gt".into(),
            clip_label: "Clip 4".into(),
            video_src: "clip_04".into(),
            captured_frame_time: 9.9,
            line: NormalizedLine::Incision {
                incision: Segment {
                    start: Point::new(0.1, 0.2),
                    end: Point::new(0.3, 0.4),
                },
            },
            canvas_size: RasterSize::new(640, 360),
            participant_id: "P12".into(),
            generated_at: "2026-10-18T00:00:00.000Z".into(),
            fatigue: Some(2),
            confidence: None,
            reference_annotation: None,
        }
    }

    #[test]
    fn wraps_under_configured_key_and_merges_fields() {
        let mut config = SubmissionConfig::new("https://collector.example/f/x");
        config.additional_fields.insert("studyId".into(), json!("corridor-2"));
        config
            .additional_fields
            .insert("filenameHint".into(), json!("{participantId}_{clipId}"));
        let request = SubmissionClient::new(config).build_request(&payload()).unwrap();

        assert_eq!(request.method, "POST");
        let inner = &request.body["annotation"];
        assert_eq!(inner["clipId"], "clip_04_gt");
        assert_eq!(inner["studyId"], "corridor-2");
        assert_eq!(inner["filenameHint"], "P12_clip_04_gt");
        assert_eq!(inner["fatigue"], 2);
        assert_eq!(request.headers["Content-Type"], "application/json");
    }

    #[test]
    fn no_wrapper_sends_bare_payload() {
        let mut config = SubmissionConfig::new("https://x");
        config.body_wrapper = None;
        let request = SubmissionClient::new(config).build_request(&payload()).unwrap();
        assert_eq!(request.body["clipId"], "clip_04_gt");
        assert!(request.body.get("annotation").is_none());
    }

    #[test]
    fn deliver_classifies_statuses() {
        let client = SubmissionClient::new(SubmissionConfig::new("https://x"));
        let request = client.build_request(&payload()).unwrap();

        let ok = Fixed(Ok(204), Mutex::new(Vec::new()));
        assert_eq!(client.deliver(&ok, &request), Ok(()));
        assert_eq!(ok.1.lock().unwrap().len(), 1);

        let server_error = Fixed(Ok(500), Mutex::new(Vec::new()));
        assert_eq!(client.deliver(&server_error, &request), Err(SubmitError::Status(500)));

        let offline = Fixed(Err(SubmitError::Network("dns".into())), Mutex::new(Vec::new()));
        assert!(matches!(client.deliver(&offline, &request), Err(SubmitError::Network(_))));
    }

    #[test]
    fn in_flight_guard_rejects_second_begin() {
        let mut guard = InFlight::default();
        assert!(guard.try_begin().is_ok());
        assert_eq!(guard.try_begin(), Err(SubmitError::InFlight));
        guard.end();
        assert!(!guard.is_busy());
        assert!(guard.try_begin().is_ok());
    }

    #[test]
    fn error_display_is_stable() {
        assert_eq!(SubmitError::Status(502).to_string(), "collector returned HTTP 502");
    }
}
