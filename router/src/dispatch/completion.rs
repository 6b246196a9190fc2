//! OpenAI-compatible chat completion backends.

use reqwest::Client;
use turnstile_common::{ChatCompletionRequest, ChatCompletionResponse};

use super::{check_status, read_json, CallError, DispatchRequest};
use crate::registry::Backend;

pub(super) async fn call(
    client: &Client,
    backend: &Backend,
    request: &DispatchRequest<'_>,
) -> Result<String, CallError> {
    let body = ChatCompletionRequest::user_prompt(
        backend.model.clone(),
        request.query,
        request.max_tokens,
        request.temperature,
    );

    let response = client
        .post(backend.url("/v1/chat/completions"))
        .json(&body)
        .send()
        .await
        .map_err(CallError::from_reqwest)?;

    let response = check_status(response).await?;
    let completion: ChatCompletionResponse = read_json(response, "completion").await?;

    completion
        .first_content()
        .map(str::to_string)
        .ok_or_else(|| CallError::Backend("completion response has no content".to_string()))
}
