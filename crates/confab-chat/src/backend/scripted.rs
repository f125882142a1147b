//! Deterministic in-process backend.
//!
//! Plays queued scripts in order; with nothing queued it echoes the last
//! user message word by word. Used by tests and by `confab chat --offline`.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use confab_core::types::Role;

use super::traits::{ModelClient, ModelRequest, StreamingToken};
use crate::error::ChatError;

/// One step of a scripted reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptStep {
    Delta(String),
    /// Break the stream with this error.
    Fail(String),
    /// Stall until the receiver goes away.
    Hold,
}

#[derive(Debug, Default)]
struct Recorded {
    scripts: VecDeque<Vec<ScriptStep>>,
    requests: Vec<ModelRequest>,
}

#[derive(Debug, Default)]
pub struct ScriptedModel {
    recorded: Mutex<Recorded>,
    delay: Duration,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pause between deltas.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn lock(&self) -> MutexGuard<'_, Recorded> {
        self.recorded.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Queue a script for the next unscripted call.
    pub fn push_script(&self, steps: Vec<ScriptStep>) {
        self.lock().scripts.push_back(steps);
    }

    /// Queue a reply made of plain deltas.
    pub fn push_reply(&self, deltas: &[&str]) {
        self.push_script(
            deltas
                .iter()
                .map(|d| ScriptStep::Delta(d.to_string()))
                .collect(),
        );
    }

    /// Number of streams started so far.
    pub fn calls(&self) -> usize {
        self.lock().requests.len()
    }

    /// Every request received, oldest first.
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.lock().requests.clone()
    }

    fn echo(request: &ModelRequest) -> Vec<ScriptStep> {
        let last = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or_default();
        format!("You said: {}", last)
            .split_inclusive(' ')
            .map(|word| ScriptStep::Delta(word.to_string()))
            .collect()
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn stream(
        &self,
        request: ModelRequest,
    ) -> Result<mpsc::Receiver<StreamingToken>, ChatError> {
        let steps = {
            let mut recorded = self.lock();
            let steps = recorded
                .scripts
                .pop_front()
                .unwrap_or_else(|| Self::echo(&request));
            recorded.requests.push(request);
            steps
        };

        let (tx, rx) = mpsc::channel(100);
        let delay = self.delay;

        tokio::spawn(async move {
            for step in steps {
                match step {
                    ScriptStep::Delta(text) => {
                        if !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }
                        if tx.send(StreamingToken::Token(text)).await.is_err() {
                            return;
                        }
                    }
                    ScriptStep::Fail(message) => {
                        let _ = tx.send(StreamingToken::Error(message)).await;
                        return;
                    }
                    ScriptStep::Hold => {
                        tx.closed().await;
                        return;
                    }
                }
            }
            let _ = tx.send(StreamingToken::Complete).await;
        });

        Ok(rx)
    }
}
