//! Speech-to-text backends: multipart upload to `/transcribe`.

use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;

use super::{check_status, read_json, CallError, DispatchRequest};
use crate::registry::Backend;

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    #[serde(default)]
    text: Option<String>,
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
    let audio = request.audio.filter(|a| !a.is_empty()).ok_or_else(|| {
        CallError::Payload("transcription requires an `audio` payload".to_string())
    })?;

    let form = Form::new().part("file", Part::bytes(audio.to_vec()).file_name("audio.wav"));
    let mut builder = client.post(backend.url("/transcribe")).multipart(form);
    if let Some(language) = request.context.get("language") {
        builder = builder.query(&[("language", language)]);
    }

    let response = builder.send().await.map_err(CallError::from_reqwest)?;
    let response = check_status(response).await?;
    let body: TranscriptionResponse = read_json(response, "transcription").await?;

    if body.status.as_deref() == Some("error") {
        return Err(CallError::Backend(
            body.error.unwrap_or_else(|| "transcription failed".to_string()),
        ));
    }
    body.text
        .ok_or_else(|| CallError::Backend("transcription response has no text".to_string()))
}
