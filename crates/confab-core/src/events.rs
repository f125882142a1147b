use serde::{Deserialize, Serialize};

use crate::types::{Artifact, Attachment, Session, Turn, TurnId};

/// How an assistant turn ended.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "reason", rename_all = "snake_case")]
pub enum FinishReason {
    /// The model signalled end of turn.
    Completed,
    /// The caller cancelled the stream.
    Cancelled,
    /// The stream broke mid-turn; the partial content is kept.
    Failed(String),
}

/// Severity of a user-facing notice.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// Every state change of a chat session, in the order it happened.
///
/// Events are applied by the session reducer and then broadcast to
/// subscribers (terminal renderer, tests, logging).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
#[non_exhaustive]
pub enum ChatEvent {
    // =========================================================================
    // Session lifecycle
    // =========================================================================
    /// Persisted history replaced the in-memory turn list.
    HistoryLoaded { turns: Vec<Turn> },

    /// Session creation was submitted to the persistence service.
    SessionCreating,

    /// The conversation is now bound to a persisted session.
    SessionBound { session: Session },

    /// Session creation failed; the conversation stays unbound.
    SessionCreationFailed { reason: String },

    // =========================================================================
    // Turns
    // =========================================================================
    /// A user turn was sent and an empty assistant turn opened for streaming.
    TurnStarted { user: Turn, assistant: Turn },

    /// One streamed text delta for the open assistant turn.
    DeltaReceived { turn_id: TurnId, text: String },

    /// The open assistant turn was finalized.
    TurnFinished {
        turn_id: TurnId,
        reason: FinishReason,
    },

    // =========================================================================
    // Artifacts
    // =========================================================================
    /// The artifact being generated changed.
    ArtifactUpdated { artifact: Artifact },

    /// The user picked an artifact from history for display.
    ArtifactSelected { artifact: Artifact },

    /// The artifact panel was closed.
    ArtifactClosed,

    // =========================================================================
    // Input
    // =========================================================================
    /// The pending input buffer was replaced.
    InputChanged { text: String },

    /// A finalized transcript was appended to the input buffer.
    TranscriptAppended { text: String },

    /// The pending attachment set changed.
    AttachmentsChanged {
        attachments: Vec<Attachment>,
        artifact_refs: Vec<String>,
    },

    /// Recording or transcription status changed.
    VoiceStatus { recording: bool, transcribing: bool },

    // =========================================================================
    // Diagnostics
    // =========================================================================
    /// A user-visible, non-fatal message.
    Notice { level: NoticeLevel, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_tagged_serialization() {
        let event = ChatEvent::DeltaReceived {
            turn_id: TurnId::new(),
            text: "hi".into(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "delta_received");
        assert_eq!(value["text"], "hi");
    }

    #[test]
    fn test_finish_reason_failed_carries_reason() {
        let value = serde_json::to_value(FinishReason::Failed("reset".into())).unwrap();
        assert_eq!(value["kind"], "failed");
        assert_eq!(value["reason"], "reset");

        let back: FinishReason = serde_json::from_value(value).unwrap();
        assert_eq!(back, FinishReason::Failed("reset".into()));
    }

    #[test]
    fn test_notice_round_trip() {
        let event = ChatEvent::Notice {
            level: NoticeLevel::Warning,
            message: "could not save".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: ChatEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
