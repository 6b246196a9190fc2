//! Text-to-speech backends: `/synthesize` with query parameters.

use reqwest::Client;
use serde::Deserialize;

use super::{check_status, read_json, CallError, DispatchRequest};
use crate::registry::Backend;

const DEFAULT_LANGUAGE: &str = "hi";
const DEFAULT_GENDER: &str = "female";

#[derive(Debug, Deserialize)]
struct SynthesisResponse {
    /// Base64-encoded WAV.
    #[serde(default)]
    audio_data: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

pub(super) async fn call(
    client: &Client,
    backend: &Backend,
    request: &DispatchRequest<'_>,
) -> Result<String, CallError> {
    let language = request
        .context
        .get("language")
        .map_or(DEFAULT_LANGUAGE, String::as_str);
    let gender = request
        .context
        .get("gender")
        .map_or(DEFAULT_GENDER, String::as_str);

    let response = client
        .post(backend.url("/synthesize"))
        .query(&[
            ("text", request.query),
            ("language", language),
            ("gender", gender),
        ])
        .send()
        .await
        .map_err(CallError::from_reqwest)?;

    let response = check_status(response).await?;
    let body: SynthesisResponse = read_json(response, "synthesis").await?;

    if body.status.as_deref() == Some("error") {
        return Err(CallError::Backend(
            body.error.unwrap_or_else(|| "synthesis failed".to_string()),
        ));
    }
    match body.audio_data {
        Some(audio) if !audio.is_empty() => Ok(audio),
        _ => Err(CallError::Backend("synthesis response has no audio".to_string())),
    }
}
