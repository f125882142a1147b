//! Server-sent events plumbing shared by the HTTP backends.

use futures::StreamExt;
use tokio::sync::mpsc;

use super::traits::StreamingToken;

/// What a backend made of one `data:` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    Delta(String),
    Done,
    Error(String),
    Skip,
}

/// Splits a byte stream into SSE `data:` payloads.
///
/// Bytes are buffered until a full line is available so multi-byte UTF-8
/// sequences split across chunks decode correctly.
#[derive(Debug, Default)]
pub struct SseBuffer {
    pending: Vec<u8>,
}

impl SseBuffer {
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);

        let mut payloads = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\r', '\n']);
            if let Some(data) = line.strip_prefix("data:") {
                payloads.push(data.trim_start().to_string());
            }
        }
        payloads
    }
}

/// Read an SSE response on a background task, translating payloads with
/// `parse`. The task stops when the receiver is dropped.
pub fn spawn_reader(
    response: reqwest::Response,
    parse: fn(&str) -> SseEvent,
) -> mpsc::Receiver<StreamingToken> {
    let (tx, rx) = mpsc::channel(100);
    let mut stream = response.bytes_stream();

    tokio::spawn(async move {
        let mut buffer = SseBuffer::default();

        while let Some(chunk) = stream.next().await {
            let bytes = match chunk {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!(error = %e, "Model stream interrupted");
                    let _ = tx.send(StreamingToken::Error(e.to_string())).await;
                    return;
                }
            };

            for payload in buffer.push(&bytes) {
                let token = match parse(&payload) {
                    SseEvent::Delta(text) => StreamingToken::Token(text),
                    SseEvent::Done => {
                        let _ = tx.send(StreamingToken::Complete).await;
                        return;
                    }
                    SseEvent::Error(message) => {
                        let _ = tx.send(StreamingToken::Error(message)).await;
                        return;
                    }
                    SseEvent::Skip => continue,
                };
                if tx.send(token).await.is_err() {
                    // Receiver dropped (cancelled); stop reading.
                    return;
                }
            }
        }

        let _ = tx.send(StreamingToken::Complete).await;
    });

    rx
}
