//! Chat session orchestration for Confab.
//!
//! Streams model responses, extracts artifacts from streamed text, manages
//! pending attachments and voice input, and keeps the conversation in sync
//! with durable storage.

pub mod artifact;
pub mod attachments;
pub mod backend;
pub mod controller;
pub mod error;
pub mod lifecycle;
pub mod orchestrator;
pub mod remote;
pub mod state;
pub mod voice;

pub use artifact::{extract_all, split_parts, ArtifactParser, MessagePart};
pub use attachments::{AttachmentManager, PendingAttachments, ARTIFACT_SNAPSHOT_TYPE};
pub use backend::{
    HttpModelClient, ModelClient, ModelRequest, PromptMessage, Provider, ScriptStep,
    ScriptedModel, StreamingToken,
};
pub use controller::{TurnController, TurnOutcome};
pub use error::ChatError;
pub use lifecycle::{SessionLifecycle, SessionStatus};
pub use orchestrator::{ChatDeps, ChatOrchestrator};
pub use remote::HttpPersistence;
pub use state::ChatState;
pub use voice::{VoiceInput, VoiceState, VoiceStatus};
