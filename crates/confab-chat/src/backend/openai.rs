//! OpenAI-compatible chat completions backend.
//!
//! Also used for local servers (Ollama, llama.cpp, vLLM) that expose the
//! same `/chat/completions` endpoint without a credential.

use serde_json::{json, Value};
use tokio::sync::mpsc;

use super::sse::{spawn_reader, SseEvent};
use super::traits::{ModelRequest, PromptMessage, StreamingToken};
use crate::error::ChatError;

pub async fn stream(
    http: &reqwest::Client,
    base_url: &str,
    request: &ModelRequest,
) -> Result<mpsc::Receiver<StreamingToken>, ChatError> {
    let url = format!("{}/chat/completions", base_url.trim_end_matches('/'));

    let mut builder = http.post(&url).json(&build_body(request));
    if let Some(key) = &request.credential {
        builder = builder.bearer_auth(key);
    }

    let response = builder
        .send()
        .await
        .map_err(|e| ChatError::Stream(format!("request to {} failed: {}", url, e)))?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(ChatError::Stream(format!("{} returned {}: {}", url, status, body)));
    }

    Ok(spawn_reader(response, parse_event))
}

pub fn build_body(request: &ModelRequest) -> Value {
    let mut messages = Vec::new();
    if let Some(system) = &request.system {
        messages.push(json!({ "role": "system", "content": system }));
    }
    messages.extend(request.sendable_messages().map(message_json));

    let mut body = json!({
        "model": request.model,
        "stream": true,
        "messages": messages,
    });
    if request.max_tokens > 0 {
        body["max_tokens"] = json!(request.max_tokens);
    }
    body
}

fn message_json(message: &PromptMessage) -> Value {
    if message.images.is_empty() {
        return json!({ "role": message.role.as_str(), "content": message.content });
    }

    let mut parts = vec![json!({ "type": "text", "text": message.content })];
    parts.extend(message.images.iter().map(|image| {
        json!({ "type": "image_url", "image_url": { "url": image.url } })
    }));
    json!({ "role": message.role.as_str(), "content": parts })
}

pub fn parse_event(data: &str) -> SseEvent {
    if data == "[DONE]" {
        return SseEvent::Done;
    }

    let Ok(value) = serde_json::from_str::<Value>(data) else {
        tracing::debug!(payload = %data, "Skipping unparseable chunk");
        return SseEvent::Skip;
    };

    if let Some(error) = value.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        return SseEvent::Error(message.to_string());
    }

    match value
        .pointer("/choices/0/delta/content")
        .and_then(Value::as_str)
    {
        Some(text) if !text.is_empty() => SseEvent::Delta(text.to_string()),
        _ => SseEvent::Skip,
    }
}
