//! Observable chat state and its reducer.
//!
//! Every mutation is a [`ChatEvent`] applied here, in dispatch order.

use serde::Serialize;

use confab_core::events::{ChatEvent, FinishReason};
use confab_core::types::{Artifact, Attachment, Session, Turn, TurnId};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatState {
    pub session: Session,
    pub turns: Vec<Turn>,
    pub streaming: bool,
    pub streaming_turn: Option<TurnId>,
    pub current_artifact: Option<Artifact>,
    /// Pending input buffer (typed text plus appended transcripts).
    pub input: String,
    pub pending_attachments: Vec<Attachment>,
    pub artifact_refs: Vec<String>,
    pub recording: bool,
    pub transcribing: bool,
    pub creating_session: bool,
    pub last_notice: Option<String>,
}

impl Default for ChatState {
    fn default() -> Self {
        Self {
            session: Session::unbound(),
            turns: Vec::new(),
            streaming: false,
            streaming_turn: None,
            current_artifact: None,
            input: String::new(),
            pending_attachments: Vec::new(),
            artifact_refs: Vec::new(),
            recording: false,
            transcribing: false,
            creating_session: false,
            last_notice: None,
        }
    }
}

impl ChatState {
    pub fn apply(&mut self, event: &ChatEvent) {
        match event {
            ChatEvent::HistoryLoaded { turns } => {
                self.turns = turns.clone();
            }
            ChatEvent::SessionCreating => {
                self.creating_session = true;
            }
            ChatEvent::SessionBound { session } => {
                self.session = session.clone();
                self.creating_session = false;
            }
            ChatEvent::SessionCreationFailed { .. } => {
                self.creating_session = false;
            }
            ChatEvent::TurnStarted { user, assistant } => {
                self.turns.push(user.clone());
                self.turns.push(assistant.clone());
                self.streaming = true;
                self.streaming_turn = Some(assistant.id);
            }
            ChatEvent::DeltaReceived { turn_id, text } => {
                if let Some(turn) = self.turn_mut(*turn_id) {
                    turn.content.push_str(text);
                }
            }
            ChatEvent::TurnFinished { turn_id, reason } => {
                // A late finish for an older turn must not end a newer stream.
                if self.streaming_turn == Some(*turn_id) {
                    self.streaming = false;
                    self.streaming_turn = None;
                    if let Some(artifact) = self.current_artifact.as_mut() {
                        artifact.generating = false;
                    }
                }
                if let FinishReason::Failed(message) = reason {
                    self.last_notice = Some(message.clone());
                }
            }
            ChatEvent::ArtifactUpdated { artifact } | ChatEvent::ArtifactSelected { artifact } => {
                self.current_artifact = Some(artifact.clone());
            }
            ChatEvent::ArtifactClosed => {
                self.current_artifact = None;
            }
            ChatEvent::InputChanged { text } => {
                self.input = text.clone();
            }
            ChatEvent::TranscriptAppended { text } => {
                if !self.input.is_empty() {
                    self.input.push(' ');
                }
                self.input.push_str(text);
            }
            ChatEvent::AttachmentsChanged {
                attachments,
                artifact_refs,
            } => {
                self.pending_attachments = attachments.clone();
                self.artifact_refs = artifact_refs.clone();
            }
            ChatEvent::VoiceStatus {
                recording,
                transcribing,
            } => {
                self.recording = *recording;
                self.transcribing = *transcribing;
            }
            ChatEvent::Notice { message, .. } => {
                self.last_notice = Some(message.clone());
            }
            _ => {}
        }
    }

    fn turn_mut(&mut self, turn_id: TurnId) -> Option<&mut Turn> {
        self.turns.iter_mut().rev().find(|t| t.id == turn_id)
    }
}
