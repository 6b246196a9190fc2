//! OpenAI-compatible chat completion types.
//!
//! Completion-style backends (agent, avatar, multimodal, video) speak this
//! format on `POST /v1/chat/completions`.

use serde::{Deserialize, Serialize};

/// OpenAI-compatible chat completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Whether to stream the response.
    #[serde(default)]
    pub stream: bool,
}

impl ChatCompletionRequest {
    /// Single-turn, non-streaming request carrying one user message.
    pub fn user_prompt(
        model: Option<String>,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Self {
        Self {
            model,
            messages: vec![ChatMessage::user(prompt)],
            max_tokens: Some(max_tokens),
            temperature: Some(temperature),
            stream: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<String>,
}

impl ChatMessage {
    pub fn user(content: &str) -> Self {
        Self {
            role: "user".to_string(),
            content: Some(content.to_string()),
        }
    }
}

/// OpenAI-compatible chat completion response.
///
/// Only the fields the router reads are required; backends differ in what
/// else they send.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionResponse {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    pub choices: Vec<Choice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl ChatCompletionResponse {
    /// Content of the first choice, if any.
    pub fn first_content(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|c| c.message.content.as_deref())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub index: u32,
    pub message: ChatMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_prompt_request() {
        let req = ChatCompletionRequest::user_prompt(
            Some("/app/models/minicpm-v-4".to_string()),
            "Hello",
            100,
            0.7,
        );
        assert_eq!(req.messages.len(), 1);
        assert_eq!(req.messages[0].role, "user");
        assert_eq!(req.messages[0].content.as_deref(), Some("Hello"));
        assert!(!req.stream);

        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["model"], "/app/models/minicpm-v-4");
        assert_eq!(json["max_tokens"], 100);
        assert_eq!(json["stream"], false);
    }

    #[test]
    fn test_request_without_model_omits_field() {
        let req = ChatCompletionRequest::user_prompt(None, "Hi", 10, 0.5);
        let json = serde_json::to_string(&req).unwrap();
        assert!(!json.contains("\"model\""));
    }

    #[test]
    fn test_response_first_content() {
        let json = r#"{
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "created": 0,
            "model": "m",
            "choices": [
                {
                    "index": 0,
                    "message": {"role": "assistant", "content": "def fib(n): ..."},
                    "finish_reason": "stop"
                }
            ],
            "usage": {"prompt_tokens": 3, "completion_tokens": 5, "total_tokens": 8}
        }"#;
        let resp: ChatCompletionResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.first_content(), Some("def fib(n): ..."));
        assert_eq!(resp.usage.unwrap().total_tokens, 8);
    }

    #[test]
    fn test_response_without_choices_has_no_content() {
        let resp: ChatCompletionResponse = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        assert_eq!(resp.first_content(), None);
    }

    #[test]
    fn test_response_missing_choices_is_rejected() {
        assert!(serde_json::from_str::<ChatCompletionResponse>(r#"{"id": "x"}"#).is_err());
    }
}
