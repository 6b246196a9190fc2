//! Request and response bodies of the routing API.
//!
//! # Overview
//!
//! Clients send a [`RouteRequest`] to `POST /route`. The router classifies it
//! (or reuses the session's earlier decision), dispatches it to the backend
//! serving the chosen use case, and answers with a [`RouteResponse`].
//!
//! ## Sessions
//!
//! A response always carries a `session_id`. Sending it back on the next turn
//! lets the router skip classification ("bypass") while the session is alive.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{Modality, UseCase};

/// Body of `POST /route`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouteRequest {
    pub query: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    /// Input modality hint.
    #[serde(default)]
    pub modality: Option<Modality>,
    /// Free-form context such as `language`, `domain` or `gender`.
    #[serde(default)]
    pub context: BTreeMap<String, String>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
    /// Base64-encoded input audio. Its presence asks for a transcription.
    #[serde(default)]
    pub audio: Option<String>,
    /// Requested output modality. `audio` without input audio asks for synthesis.
    #[serde(default)]
    pub output: Option<Modality>,
}

impl RouteRequest {
    /// Convenience constructor for a bare text query.
    pub fn text(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_modality(mut self, modality: Modality) -> Self {
        self.modality = Some(modality);
        self
    }

    /// Whether `audio` carries anything to transcribe. Blank strings do not.
    pub fn has_audio_payload(&self) -> bool {
        self.audio.as_deref().is_some_and(|a| !a.trim().is_empty())
    }
}

/// Whether the routing decision came from the classifier or from the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionSource {
    Classified,
    Bypassed,
}

impl DecisionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Classified => "classified",
            Self::Bypassed => "bypassed",
        }
    }
}

impl std::fmt::Display for DecisionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body returned by `POST /route`.
///
/// `use_case` and `selected_backend` are filled even when `success` is false,
/// so callers can tell a failed inference from a failed routing step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    pub use_case: UseCase,
    pub selected_backend: String,
    pub confidence: f64,
    pub decision_source: DecisionSource,
    pub session_id: String,
    pub new_session: bool,
    pub routing_time_ms: f64,
    pub inference_time_ms: f64,
    pub total_time_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Body returned by `GET /sessions/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub use_case: UseCase,
    pub backend: String,
    pub confidence: f64,
    pub turn_count: u64,
    pub created_at: String,
    pub last_used_at: String,
    pub ttl_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_request_minimal() {
        let json = r#"{"query": "write a fibonacci function"}"#;
        let req: RouteRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.query, "write a fibonacci function");
        assert!(req.session_id.is_none());
        assert!(req.modality.is_none());
        assert!(req.context.is_empty());
        assert!(!req.has_audio_payload());
    }

    #[test]
    fn test_route_request_full() {
        let json = r#"{
            "query": "transcribe this audio",
            "session_id": "abc",
            "user_id": "u1",
            "modality": "audio",
            "context": {"language": "hi"},
            "max_tokens": 50,
            "temperature": 0.2,
            "audio": "AAAA"
        }"#;
        let req: RouteRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.modality, Some(Modality::Audio));
        assert_eq!(req.context.get("language").map(String::as_str), Some("hi"));
        assert_eq!(req.max_tokens, Some(50));
        assert!(req.has_audio_payload());
    }

    #[test]
    fn test_route_request_rejects_unknown_modality() {
        let json = r#"{"query": "hi", "modality": "smell"}"#;
        assert!(serde_json::from_str::<RouteRequest>(json).is_err());
    }

    #[test]
    fn test_empty_audio_is_not_a_payload() {
        let mut req = RouteRequest::text("hello");
        req.audio = Some(String::new());
        assert!(!req.has_audio_payload());
        req.audio = Some(" \n\t ".to_string());
        assert!(!req.has_audio_payload());
        req.audio = Some(" UklGRg== ".to_string());
        assert!(req.has_audio_payload());
    }

    #[test]
    fn test_route_response_skips_absent_fields() {
        let resp = RouteResponse {
            success: true,
            result: None,
            use_case: UseCase::Agent,
            selected_backend: "completion".to_string(),
            confidence: 0.3,
            decision_source: DecisionSource::Bypassed,
            session_id: "s1".to_string(),
            new_session: false,
            routing_time_ms: 0.1,
            inference_time_ms: 2.0,
            total_time_ms: 2.1,
            error_message: None,
        };
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains(r#""decision_source":"bypassed""#));
        assert!(json.contains(r#""use_case":"agent""#));
        assert!(!json.contains("error_message"));
        assert!(!json.contains("\"result\""));
    }
}
