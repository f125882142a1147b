//! Chat orchestrator: the coordinator of one conversation.
//!
//! Owns the session, the turn sequence and the current artifact. User calls,
//! the model stream, voice transcription and the persistence writer all
//! mutate state through [`ChatEvent`]s, applied in order by one reducer and
//! broadcast to subscribers.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use confab_core::config::ModelConfig;
use confab_core::events::{ChatEvent, FinishReason, NoticeLevel};
use confab_core::persistence::PersistenceService;
use confab_core::types::{Artifact, Attachment, Role, Session, SessionId, Transcript, Turn, TurnId};
use confab_whisper::Transcriber;

use crate::artifact::extract_all;
use crate::attachments::{AttachmentManager, PendingAttachments};
use crate::backend::{ModelClient, ModelRequest, PromptMessage, Provider};
use crate::controller::{TurnController, TurnOutcome};
use crate::error::ChatError;
use crate::lifecycle::{EventSink, SessionLifecycle, SessionStatus};
use crate::state::ChatState;
use crate::voice::{VoiceInput, VoiceState};

/// Capacity of the event broadcast channel. Slow subscribers lag, they
/// never block the orchestrator.
const EVENT_CAPACITY: usize = 1024;

/// Collaborators of the orchestrator, resolved once at startup.
pub struct ChatDeps {
    pub persistence: Arc<dyn PersistenceService>,
    pub model_client: Arc<dyn ModelClient>,
    pub transcriber: Transcriber,
    pub model: ModelConfig,
    pub sample_rate: u32,
}

struct Inner {
    state: Mutex<ChatState>,
    events: broadcast::Sender<ChatEvent>,
    attachments: AttachmentManager,
    voice: VoiceInput,
    controller: TurnController,
    lifecycle: SessionLifecycle,
    model: ModelConfig,
    current_turn: Mutex<Option<JoinHandle<()>>>,
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, ChatState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Apply and broadcast one event. Must not be called while holding
    /// another orchestrator lock.
    fn dispatch(&self, event: ChatEvent) {
        let mut state = self.lock_state();
        state.apply(&event);
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn notice(&self, level: NoticeLevel, message: impl Into<String>) {
        self.dispatch(ChatEvent::Notice {
            level,
            message: message.into(),
        });
    }
}

/// Handle to a running conversation. Clones share the same session.
#[derive(Clone)]
pub struct ChatOrchestrator {
    inner: Arc<Inner>,
}

impl ChatOrchestrator {
    /// Build an orchestrator and load the history of `session_id` before
    /// returning. A failed load leaves an empty history and a notice.
    pub async fn open(deps: ChatDeps, session_id: Option<SessionId>) -> Self {
        let orchestrator = Self::new(deps);
        orchestrator.load(session_id).await;
        orchestrator
    }

    fn new(deps: ChatDeps) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let inner = Arc::new_cyclic(|weak: &Weak<Inner>| {
            let weak = weak.clone();
            let sink: EventSink = Arc::new(move |event| {
                if let Some(inner) = weak.upgrade() {
                    inner.dispatch(event);
                }
            });

            Inner {
                state: Mutex::new(ChatState::default()),
                events,
                attachments: AttachmentManager::new(),
                voice: VoiceInput::new(deps.transcriber, deps.sample_rate),
                controller: TurnController::new(deps.model_client),
                lifecycle: SessionLifecycle::spawn(deps.persistence, sink),
                model: deps.model,
                current_turn: Mutex::new(None),
            }
        });

        Self { inner }
    }

    async fn load(&self, session_id: Option<SessionId>) {
        let result = self.inner.lifecycle.load(session_id).await;

        if let Some(id) = session_id {
            self.inner.dispatch(ChatEvent::SessionBound {
                session: Session {
                    id: Some(id),
                    ..Session::unbound()
                },
            });
        }

        match result {
            Ok(turns) => self.inner.dispatch(ChatEvent::HistoryLoaded { turns }),
            Err(e) => {
                tracing::warn!(error = %e, "Starting with empty history");
                self.inner.notice(NoticeLevel::Error, e.to_string());
            }
        }
    }

    // =========================================================================
    // Turns
    // =========================================================================

    /// Send a user message and start streaming the reply.
    ///
    /// Returns the id of the assistant turn being streamed. Fails without
    /// touching state or the network on empty input, a missing model
    /// credential, or a stream already in progress.
    pub fn send_message(&self, text: &str) -> Result<TurnId, ChatError> {
        let inner = &self.inner;

        let content = text.trim();
        if content.is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        let provider = Provider::from_model(&inner.model.model);
        let credential = match provider.credential(&inner.model) {
            Ok(credential) => credential,
            Err(e) => {
                tracing::warn!(model = %inner.model.model, "Missing model credential");
                inner.notice(NoticeLevel::Error, e.to_string());
                return Err(e);
            }
        };

        let assistant = Turn::assistant();
        let turn_id = assistant.id;
        let cancel = inner.controller.begin(turn_id)?;

        let pending = match inner.attachments.drain_for_send() {
            Ok(pending) => pending,
            Err(e) => {
                inner.controller.end(turn_id);
                return Err(e);
            }
        };
        let had_attachments = !pending.is_empty();
        let user = Turn::user(content, pending.into_turn_attachments());

        // A previous first exchange whose session creation failed.
        self.check_creation(None);

        let mut messages: Vec<PromptMessage> = inner
            .lock_state()
            .turns
            .iter()
            .map(PromptMessage::from)
            .collect();
        messages.push(PromptMessage::from(&user));

        let request = ModelRequest {
            model: inner.model.model.clone(),
            credential,
            system: inner.model.system_prompt.clone(),
            messages,
            max_tokens: inner.model.max_tokens,
        };

        if had_attachments {
            inner.dispatch(ChatEvent::AttachmentsChanged {
                attachments: Vec::new(),
                artifact_refs: Vec::new(),
            });
        }
        inner.lifecycle.persist_turn(&user);
        inner.dispatch(ChatEvent::TurnStarted { user, assistant });

        // Held across the spawn so a send started from within this turn's
        // finish cannot store its handle before this one.
        let mut current = lock(&inner.current_turn);
        let orchestrator = self.clone();
        *current = Some(tokio::spawn(async move {
            orchestrator.run_turn(turn_id, cancel, request).await;
        }));

        Ok(turn_id)
    }

    async fn run_turn(&self, turn_id: TurnId, cancel: CancellationToken, request: ModelRequest) {
        let inner = &self.inner;
        let outcome = inner
            .controller
            .drive(turn_id, cancel, request, |event| inner.dispatch(event))
            .await;
        self.finish_turn(outcome);
    }

    fn finish_turn(&self, outcome: TurnOutcome) {
        let inner = &self.inner;
        let TurnOutcome {
            turn_id, reason, ..
        } = outcome;

        if let FinishReason::Failed(message) = &reason {
            let err = ChatError::Stream(message.clone());
            inner.notice(NoticeLevel::Error, err.to_string());
        }

        // Every delta is applied by now, so the turn content is final. It is
        // queued and the controller released before subscribers learn the
        // turn is over, so a send reacting to `TurnFinished` is accepted and
        // its user turn persists after this one.
        let finished = inner
            .lock_state()
            .turns
            .iter()
            .rev()
            .find(|t| t.id == turn_id)
            .cloned();
        if let Some(turn) = finished {
            inner.lifecycle.persist_turn(&turn);
        }
        self.check_creation(Some(turn_id));
        inner.controller.end(turn_id);

        inner.dispatch(ChatEvent::TurnFinished { turn_id, reason });
    }

    /// Start session creation once the conversation holds exactly its
    /// first completed exchange. `finished` names an assistant turn whose
    /// stream is over even if `TurnFinished` has not been applied yet.
    fn check_creation(&self, finished: Option<TurnId>) {
        let inner = &self.inner;
        if inner.lifecycle.status() != SessionStatus::Unbound {
            return;
        }

        let exchange = {
            let state = inner.lock_state();
            match state.turns.as_slice() {
                [first, second]
                    if first.role == Role::User
                        && (state.streaming_turn != Some(second.id) || finished == Some(second.id)) =>
                {
                    Some((first.clone(), second.clone()))
                }
                _ => None,
            }
        };

        if let Some((first, second)) = exchange {
            inner.lifecycle.ensure_created(&first, &second);
        }
    }

    /// Stop the active stream. Delivered deltas are kept. Returns false
    /// when nothing was streaming.
    pub fn cancel(&self) -> bool {
        self.inner.controller.cancel()
    }

    // =========================================================================
    // Attachments
    // =========================================================================

    pub fn attach(&self, items: impl IntoIterator<Item = Attachment>) -> Result<(), ChatError> {
        self.inner.attachments.add(items)?;
        self.publish_attachments()
    }

    /// Remove a pending attachment by URL. Unknown URLs are ignored.
    pub fn remove_attachment(&self, url: &str) -> Result<(), ChatError> {
        self.inner.attachments.remove(url)?;
        self.publish_attachments()
    }

    /// Attach a selection image captured from a rendered artifact.
    pub fn capture_from_artifact(
        &self,
        selection_image: Attachment,
        artifact_ref: impl Into<String>,
    ) -> Result<(), ChatError> {
        self.inner
            .attachments
            .capture_from_artifact(selection_image, artifact_ref)?;
        self.publish_attachments()
    }

    pub fn pending_attachments(&self) -> Result<PendingAttachments, ChatError> {
        self.inner.attachments.snapshot()
    }

    fn publish_attachments(&self) -> Result<(), ChatError> {
        let pending = self.inner.attachments.snapshot()?;
        self.inner.dispatch(ChatEvent::AttachmentsChanged {
            attachments: pending.images,
            artifact_refs: pending.artifact_refs,
        });
        Ok(())
    }

    // =========================================================================
    // Voice
    // =========================================================================

    pub fn start_recording(&self) -> Result<(), ChatError> {
        self.inner.voice.start_recording()?;
        self.publish_voice_status();
        Ok(())
    }

    pub fn push_audio(&self, samples: &[f32]) -> Result<(), ChatError> {
        self.inner.voice.push_audio(samples)
    }

    /// Stop recording and append the transcript to the input buffer. The
    /// transcript is never sent on its own.
    pub async fn stop_recording(&self) -> Result<Option<Transcript>, ChatError> {
        let inner = &self.inner;
        if inner.voice.state()? != VoiceState::Recording {
            return Err(ChatError::Voice("not recording".to_string()));
        }

        inner.dispatch(ChatEvent::VoiceStatus {
            recording: false,
            transcribing: true,
        });
        let result = inner.voice.stop_recording().await;
        self.publish_voice_status();

        match result {
            Ok(Some(transcript)) => {
                inner.dispatch(ChatEvent::TranscriptAppended {
                    text: transcript.text.clone(),
                });
                Ok(Some(transcript))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                tracing::warn!(error = %e, "Transcription failed");
                inner.notice(NoticeLevel::Warning, e.to_string());
                Err(e)
            }
        }
    }

    fn publish_voice_status(&self) {
        match self.inner.voice.status() {
            Ok(status) => self.inner.dispatch(ChatEvent::VoiceStatus {
                recording: status.recording,
                transcribing: status.transcribing,
            }),
            Err(e) => tracing::warn!(error = %e, "Voice status unavailable"),
        }
    }

    // =========================================================================
    // Input buffer
    // =========================================================================

    pub fn set_input(&self, text: impl Into<String>) {
        self.inner
            .dispatch(ChatEvent::InputChanged { text: text.into() });
    }

    pub fn input(&self) -> String {
        self.inner.lock_state().input.clone()
    }

    /// Send the input buffer, clear it and drop any active recording.
    pub fn submit_input(&self) -> Result<TurnId, ChatError> {
        let text = self.input();
        let turn_id = self.send_message(&text)?;
        self.set_input(String::new());
        if self.inner.voice.discard()? {
            self.publish_voice_status();
        }
        Ok(turn_id)
    }

    // =========================================================================
    // Artifacts
    // =========================================================================

    /// Show an artifact from the conversation by id. The newest message
    /// containing it wins.
    pub fn select_artifact(&self, id: &str) -> Result<Artifact, ChatError> {
        let found = {
            let state = self.inner.lock_state();
            match state.current_artifact.as_ref().filter(|a| a.id == id) {
                Some(current) => Some(current.clone()),
                None => state
                    .turns
                    .iter()
                    .rev()
                    .filter(|t| t.role == Role::Assistant)
                    .find_map(|t| extract_all(&t.content).into_iter().find(|a| a.id == id)),
            }
        };

        let artifact = found.ok_or_else(|| ChatError::ArtifactNotFound(id.to_string()))?;
        self.inner.dispatch(ChatEvent::ArtifactSelected {
            artifact: artifact.clone(),
        });
        Ok(artifact)
    }

    pub fn close_artifact(&self) {
        self.inner.dispatch(ChatEvent::ArtifactClosed);
    }

    // =========================================================================
    // Observation
    // =========================================================================

    pub fn snapshot(&self) -> ChatState {
        self.inner.lock_state().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.inner.events.subscribe()
    }

    pub fn messages(&self) -> Vec<Turn> {
        self.inner.lock_state().turns.clone()
    }

    pub fn current_artifact(&self) -> Option<Artifact> {
        self.inner.lock_state().current_artifact.clone()
    }

    pub fn is_streaming(&self) -> bool {
        self.inner.lock_state().streaming
    }

    pub fn session(&self) -> Session {
        self.inner.lock_state().session.clone()
    }

    /// Wait for the current turn and every persistence job queued so far.
    pub async fn wait_idle(&self) {
        let handle = lock(&self.inner.current_turn).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Turn task failed");
            }
        }
        self.inner.lifecycle.flush().await;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|p| p.into_inner())
}
