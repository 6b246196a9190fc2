//! Response bodies the inference backends send.

use serde_json::{json, Value};

/// Chat completion answer carrying `content`.
pub fn completion(content: &str) -> Value {
    json!({
        "id": "chatcmpl-test",
        "object": "chat.completion",
        "created": 0,
        "model": "/app/models/minicpm-v-4",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }],
        "usage": {
            "prompt_tokens": 10,
            "completion_tokens": content.split_whitespace().count(),
            "total_tokens": 10 + content.split_whitespace().count()
        }
    })
}

pub fn transcription(text: &str, language: &str) -> Value {
    json!({
        "text": text,
        "language": language,
        "status": "success"
    })
}

pub fn synthesis(audio_base64: &str) -> Value {
    json!({
        "audio_data": audio_base64,
        "sample_rate": 22050,
        "duration": 1.0,
        "status": "success"
    })
}

pub fn synthesis_error(message: &str) -> Value {
    json!({
        "audio_data": "",
        "sample_rate": 22050,
        "duration": 0.0,
        "status": "error",
        "error": message
    })
}
