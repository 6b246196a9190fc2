//! Dispatch of routed requests to inference backends.
//!
//! Each backend speaks one of three wire contracts (see [`AdapterKind`]).
//! Transport failures (connect errors, timeouts) are retried against the same
//! backend with exponential backoff. A backend that answers with an error
//! status or an unusable body fails the request immediately. There is no
//! fallback to another backend.

mod completion;
mod retry;
mod synthesis;
mod transcription;

pub use self::retry::{RetryPolicy, Retryable};

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::Client;

use crate::config::{AdapterKind, DispatchConfig};
use crate::registry::Backend;

/// Longest slice of an error body quoted in error messages.
const ERROR_BODY_LIMIT: usize = 200;

/// What a backend needs to serve a request.
#[derive(Debug, Clone, Copy)]
pub struct DispatchRequest<'a> {
    pub query: &'a str,
    pub context: &'a BTreeMap<String, String>,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Decoded audio, for transcription.
    pub audio: Option<&'a [u8]>,
}

/// Why a dispatch failed. The display form is what clients see as
/// `error_message`.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("backend_unreachable: {backend} after {attempts} attempt(s): {reason}")]
    Unreachable {
        backend: String,
        attempts: u32,
        reason: String,
    },
    #[error("backend_error: {backend}: {reason}")]
    Backend { backend: String, reason: String },
    #[error("invalid_payload: {0}")]
    InvalidPayload(String),
}

/// Failure of a single attempt, before retry bookkeeping.
#[derive(Debug)]
enum CallError {
    Transport(String),
    Backend(String),
    Payload(String),
}

impl std::fmt::Display for CallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(msg) | Self::Backend(msg) | Self::Payload(msg) => f.write_str(msg),
        }
    }
}

impl Retryable for CallError {
    fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

impl CallError {
    /// Classify a reqwest error raised while sending or reading a body.
    fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Transport(format!("timed out: {e}"))
        } else if e.is_connect() || e.is_request() {
            Self::Transport(format!("connection failed: {e}"))
        } else {
            Self::Backend(e.to_string())
        }
    }

    fn into_dispatch_error(self, backend: &Backend, attempts: u32) -> DispatchError {
        match self {
            Self::Transport(reason) => DispatchError::Unreachable {
                backend: backend.name.clone(),
                attempts,
                reason,
            },
            Self::Backend(reason) => DispatchError::Backend {
                backend: backend.name.clone(),
                reason,
            },
            Self::Payload(reason) => DispatchError::InvalidPayload(reason),
        }
    }
}

/// Turn a non-2xx response into a backend error quoting the body.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, CallError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let body: String = body.chars().take(ERROR_BODY_LIMIT).collect();
    Err(CallError::Backend(format!("HTTP {}: {}", status.as_u16(), body)))
}

/// Read and decode a JSON body. Decoding failures are backend errors.
async fn read_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
    what: &str,
) -> Result<T, CallError> {
    let bytes = response.bytes().await.map_err(CallError::from_reqwest)?;
    serde_json::from_slice(&bytes)
        .map_err(|e| CallError::Backend(format!("malformed {what} response: {e}")))
}

/// Sends requests to backends.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    http_client: Client,
    retry: RetryPolicy,
}

impl Dispatcher {
    /// `timeout` bounds each attempt, connection included.
    pub fn new(timeout: Duration, retry: RetryPolicy) -> Result<Self, reqwest::Error> {
        let http_client = Client::builder().timeout(timeout).build()?;
        Ok(Self { http_client, retry })
    }

    pub fn from_config(config: &DispatchConfig) -> Result<Self, reqwest::Error> {
        Self::new(
            Duration::from_secs(config.timeout_secs),
            RetryPolicy::new(config.max_retries, Duration::from_millis(config.backoff_base_ms)),
        )
    }

    /// Send a request to `backend` and return its result text.
    pub async fn dispatch(
        &self,
        backend: &Backend,
        request: &DispatchRequest<'_>,
    ) -> Result<String, DispatchError> {
        self.retry
            .run(|| self.call(backend, request))
            .await
            .map_err(|(e, attempts)| {
                tracing::warn!(
                    backend = %backend.name,
                    adapter = backend.adapter.as_str(),
                    attempts,
                    error = %e,
                    "Dispatch failed"
                );
                e.into_dispatch_error(backend, attempts)
            })
    }

    async fn call(
        &self,
        backend: &Backend,
        request: &DispatchRequest<'_>,
    ) -> Result<String, CallError> {
        match backend.adapter {
            AdapterKind::Completion => completion::call(&self.http_client, backend, request).await,
            AdapterKind::Transcription => {
                transcription::call(&self.http_client, backend, request).await
            }
            AdapterKind::Synthesis => synthesis::call(&self.http_client, backend, request).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn backend(base_url: &str, adapter: AdapterKind) -> Backend {
        Backend {
            name: "test-backend".to_string(),
            base_url: base_url.to_string(),
            adapter,
            model: Some("test-model".to_string()),
        }
    }

    fn dispatcher(timeout: Duration) -> Dispatcher {
        Dispatcher::new(timeout, RetryPolicy::new(2, Duration::from_millis(1))).unwrap()
    }

    fn request<'a>(
        query: &'a str,
        context: &'a BTreeMap<String, String>,
        audio: Option<&'a [u8]>,
    ) -> DispatchRequest<'a> {
        DispatchRequest {
            query,
            context,
            max_tokens: 64,
            temperature: 0.2,
            audio,
        }
    }

    #[tokio::test]
    async fn test_completion_dispatch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{
                    "index": 0,
                    "message": {"role": "assistant", "content": "def fib(n): ..."}
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let context = BTreeMap::new();
        let result = dispatcher(Duration::from_secs(5))
            .dispatch(
                &backend(&server.uri(), AdapterKind::Completion),
                &request("write a fibonacci function", &context, None),
            )
            .await
            .unwrap();
        assert_eq!(result, "def fib(n): ...");

        let received = server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&received[0].body).unwrap();
        assert_eq!(body["model"], "test-model");
        assert_eq!(body["messages"][0]["content"], "write a fibonacci function");
        assert_eq!(body["max_tokens"], 64);
        assert_eq!(body["stream"], false);
    }

    #[tokio::test]
    async fn test_error_status_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("model crashed"))
            .expect(1)
            .mount(&server)
            .await;

        let context = BTreeMap::new();
        let err = dispatcher(Duration::from_secs(5))
            .dispatch(
                &backend(&server.uri(), AdapterKind::Completion),
                &request("hi", &context, None),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Backend { .. }));
        let message = err.to_string();
        assert!(message.starts_with("backend_error:"));
        assert!(message.contains("500"));
        assert!(message.contains("model crashed"));
    }

    #[tokio::test]
    async fn test_malformed_body_is_backend_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let context = BTreeMap::new();
        let err = dispatcher(Duration::from_secs(5))
            .dispatch(
                &backend(&server.uri(), AdapterKind::Completion),
                &request("hi", &context, None),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("malformed completion response"));
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_retried() {
        let context = BTreeMap::new();
        let err = dispatcher(Duration::from_secs(2))
            .dispatch(
                &backend("http://127.0.0.1:1", AdapterKind::Completion),
                &request("hi", &context, None),
            )
            .await
            .unwrap_err();
        match err {
            DispatchError::Unreachable { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("expected Unreachable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_is_retried_then_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_millis(500))
                    .set_body_json(json!({"choices": []})),
            )
            .expect(3)
            .mount(&server)
            .await;

        let context = BTreeMap::new();
        let err = dispatcher(Duration::from_millis(50))
            .dispatch(
                &backend(&server.uri(), AdapterKind::Completion),
                &request("hi", &context, None),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("backend_unreachable:"));
    }

    #[tokio::test]
    async fn test_transcription_dispatch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/transcribe"))
            .and(query_param("language", "hi"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "text": "namaste",
                "language": "hi",
                "status": "success"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut context = BTreeMap::new();
        context.insert("language".to_string(), "hi".to_string());
        let audio = b"RIFF....WAVE".to_vec();
        let result = dispatcher(Duration::from_secs(5))
            .dispatch(
                &backend(&server.uri(), AdapterKind::Transcription),
                &request("transcribe this", &context, Some(&audio)),
            )
            .await
            .unwrap();
        assert_eq!(result, "namaste");

        let received = server.received_requests().await.unwrap();
        let body = String::from_utf8_lossy(&received[0].body);
        assert!(body.contains("name=\"file\""));
        assert!(body.contains("RIFF....WAVE"));
    }

    #[tokio::test]
    async fn test_transcription_without_audio_is_invalid_payload() {
        let context = BTreeMap::new();
        let err = dispatcher(Duration::from_secs(5))
            .dispatch(
                &backend("http://127.0.0.1:1", AdapterKind::Transcription),
                &request("transcribe the meeting", &context, None),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::InvalidPayload(_)));

        let err = dispatcher(Duration::from_secs(5))
            .dispatch(
                &backend("http://127.0.0.1:1", AdapterKind::Transcription),
                &request("transcribe the meeting", &context, Some(&[][..])),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::InvalidPayload(_)));
    }

    #[tokio::test]
    async fn test_synthesis_dispatch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/synthesize"))
            .and(query_param("text", "hello there"))
            .and(query_param("language", "hi"))
            .and(query_param("gender", "female"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "audio_data": "UklGRiQAAABXQVZF",
                "sample_rate": 22050,
                "duration": 0.5,
                "status": "success"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let context = BTreeMap::new();
        let result = dispatcher(Duration::from_secs(5))
            .dispatch(
                &backend(&server.uri(), AdapterKind::Synthesis),
                &request("hello there", &context, None),
            )
            .await
            .unwrap();
        assert_eq!(result, "UklGRiQAAABXQVZF");
    }

    #[tokio::test]
    async fn test_synthesis_error_status_field() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/synthesize"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "audio_data": "",
                "sample_rate": 22050,
                "duration": 0.0,
                "status": "error",
                "error": "unsupported language"
            })))
            .mount(&server)
            .await;

        let mut context = BTreeMap::new();
        context.insert("language".to_string(), "xx".to_string());
        let err = dispatcher(Duration::from_secs(5))
            .dispatch(
                &backend(&server.uri(), AdapterKind::Synthesis),
                &request("hello", &context, None),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unsupported language"));
    }
}
