//! Anthropic messages API backend.

use serde_json::{json, Value};
use tokio::sync::mpsc;

use confab_core::types::Attachment;

use super::sse::{spawn_reader, SseEvent};
use super::traits::{ModelRequest, PromptMessage, StreamingToken};
use crate::error::ChatError;

const API_VERSION: &str = "2023-06-01";

pub async fn stream(
    http: &reqwest::Client,
    base_url: &str,
    request: &ModelRequest,
) -> Result<mpsc::Receiver<StreamingToken>, ChatError> {
    let url = format!("{}/messages", base_url.trim_end_matches('/'));
    let key = request.credential.as_deref().unwrap_or_default();

    let response = http
        .post(&url)
        .header("x-api-key", key)
        .header("anthropic-version", API_VERSION)
        .json(&build_body(request))
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
    let messages: Vec<Value> = request.sendable_messages().map(message_json).collect();

    let mut body = json!({
        "model": request.model,
        "max_tokens": if request.max_tokens > 0 { request.max_tokens } else { 4096 },
        "stream": true,
        "messages": messages,
    });
    if let Some(system) = &request.system {
        body["system"] = json!(system);
    }
    body
}

fn message_json(message: &PromptMessage) -> Value {
    let mut content: Vec<Value> = message.images.iter().map(image_block).collect();
    if !message.content.is_empty() {
        content.push(json!({ "type": "text", "text": message.content }));
    }
    json!({ "role": message.role.as_str(), "content": content })
}

/// Data URLs are sent inline as base64; anything else by URL.
fn image_block(image: &Attachment) -> Value {
    if let Some(rest) = image.url.strip_prefix("data:") {
        if let Some((meta, data)) = rest.split_once(',') {
            if let Some(media_type) = meta.strip_suffix(";base64") {
                return json!({
                    "type": "image",
                    "source": { "type": "base64", "media_type": media_type, "data": data },
                });
            }
        }
    }
    json!({ "type": "image", "source": { "type": "url", "url": image.url } })
}

pub fn parse_event(data: &str) -> SseEvent {
    let Ok(value) = serde_json::from_str::<Value>(data) else {
        return SseEvent::Skip;
    };

    match value.get("type").and_then(Value::as_str) {
        Some("content_block_delta") => match value.pointer("/delta/text").and_then(Value::as_str) {
            Some(text) if !text.is_empty() => SseEvent::Delta(text.to_string()),
            _ => SseEvent::Skip,
        },
        Some("message_stop") => SseEvent::Done,
        Some("error") => SseEvent::Error(
            value
                .pointer("/error/message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string(),
        ),
        _ => SseEvent::Skip,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use confab_core::types::Turn;

    #[test]
    fn test_body_puts_system_at_top_level() {
        let request = ModelRequest {
            model: "claude-3-5-sonnet".into(),
            credential: Some("key".into()),
            system: Some("be kind".into()),
            messages: vec![PromptMessage::from(&Turn::user("hello", vec![]))],
            max_tokens: 0,
        };
        let body = build_body(&request);
        assert_eq!(body["system"], "be kind");
        assert_eq!(body["max_tokens"], 4096);
        assert_eq!(body["messages"][0]["content"][0]["text"], "hello");
    }

    #[test]
    fn test_image_block_from_data_url() {
        let block = image_block(&Attachment::new("data:image/png;base64,QUJD", "image/png"));
        assert_eq!(block["source"]["type"], "base64");
        assert_eq!(block["source"]["media_type"], "image/png");
        assert_eq!(block["source"]["data"], "QUJD");

        let block = image_block(&Attachment::new("https://x/y.png", "image/png"));
        assert_eq!(block["source"]["type"], "url");
    }

    #[test]
    fn test_parse_event() {
        assert_eq!(
            parse_event(r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}}"#),
            SseEvent::Delta("Hi".into())
        );
        assert_eq!(parse_event(r#"{"type":"message_stop"}"#), SseEvent::Done);
        assert_eq!(parse_event(r#"{"type":"ping"}"#), SseEvent::Skip);
        assert_eq!(
            parse_event(r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#),
            SseEvent::Error("Overloaded".into())
        );
    }
}
