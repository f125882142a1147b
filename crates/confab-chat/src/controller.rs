//! Drives one streamed request/response turn.
//!
//! At most one turn is active per session. The controller owns the
//! cancellation token of that turn; `drive` consumes the token stream,
//! feeds the artifact parser and reports every change through `emit`.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio_util::sync::CancellationToken;

use confab_core::events::{ChatEvent, FinishReason};
use confab_core::types::{Artifact, TurnId};

use crate::artifact::ArtifactParser;
use crate::backend::{ModelClient, ModelRequest, StreamingToken};
use crate::error::ChatError;

/// Result of one driven turn.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    pub turn_id: TurnId,
    /// Everything received before the stream ended.
    pub content: String,
    pub reason: FinishReason,
    /// The last artifact of the turn, finalized.
    pub artifact: Option<Artifact>,
}

pub struct TurnController {
    client: Arc<dyn ModelClient>,
    active: Mutex<Option<(TurnId, CancellationToken)>>,
}

impl TurnController {
    pub fn new(client: Arc<dyn ModelClient>) -> Self {
        Self {
            client,
            active: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<(TurnId, CancellationToken)>> {
        self.active.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Claim the controller for `turn_id`.
    pub fn begin(&self, turn_id: TurnId) -> Result<CancellationToken, ChatError> {
        let mut active = self.lock();
        if active.is_some() {
            return Err(ChatError::StreamInProgress);
        }
        let token = CancellationToken::new();
        *active = Some((turn_id, token.clone()));
        Ok(token)
    }

    /// Cancel the active turn. Returns false when nothing is streaming.
    pub fn cancel(&self) -> bool {
        match self.lock().as_ref() {
            Some((turn_id, token)) => {
                tracing::info!(turn_id = %turn_id, "Cancelling turn");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Release the controller if `turn_id` still holds it.
    pub fn end(&self, turn_id: TurnId) {
        let mut active = self.lock();
        if matches!(active.as_ref(), Some((id, _)) if *id == turn_id) {
            *active = None;
        }
    }

    pub fn is_active(&self) -> bool {
        self.lock().is_some()
    }

    /// Stream one turn to completion, cancellation or failure.
    ///
    /// Deltas are emitted in arrival order. Dropping the receiver on exit
    /// aborts the underlying request.
    pub async fn drive(
        &self,
        turn_id: TurnId,
        cancel: CancellationToken,
        request: ModelRequest,
        mut emit: impl FnMut(ChatEvent) + Send,
    ) -> TurnOutcome {
        let mut content = String::new();
        let mut parser = ArtifactParser::new();

        tracing::debug!(
            turn_id = %turn_id,
            backend = self.client.name(),
            model = %request.model,
            "Starting turn"
        );

        let started = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = self.client.stream(request) => Some(result),
        };

        let reason = match started {
            None => FinishReason::Cancelled,
            Some(Err(e)) => {
                tracing::warn!(turn_id = %turn_id, error = %e, "Model stream failed to start");
                FinishReason::Failed(e.to_string())
            }
            Some(Ok(mut rx)) => {
                let reason = loop {
                    let token = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break FinishReason::Cancelled,
                        token = rx.recv() => token,
                    };

                    match token {
                        Some(StreamingToken::Token(text)) => {
                            content.push_str(&text);
                            emit(ChatEvent::DeltaReceived { turn_id, text });
                            if let Some(artifact) = parser.update(&content) {
                                emit(ChatEvent::ArtifactUpdated { artifact });
                            }
                        }
                        Some(StreamingToken::Complete) | None => break FinishReason::Completed,
                        Some(StreamingToken::Error(message)) => {
                            tracing::warn!(turn_id = %turn_id, error = %message, "Model stream broke");
                            break FinishReason::Failed(message);
                        }
                    }
                };
                drop(rx);
                reason
            }
        };

        if let Some(artifact) = parser.finish() {
            emit(ChatEvent::ArtifactUpdated { artifact });
        }

        tracing::info!(
            turn_id = %turn_id,
            chars = content.len(),
            reason = ?reason,
            "Turn finished"
        );

        TurnOutcome {
            turn_id,
            content,
            reason,
            artifact: parser.current().cloned(),
        }
    }
}
