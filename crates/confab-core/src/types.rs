use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum number of characters kept from the first user message when a
/// session title is derived from it.
pub const TITLE_MAX_CHARS: usize = 100;

// =============================================================================
// Newtype Wrappers - Identity
// =============================================================================

/// Unique identifier for a persisted chat session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Unique identifier for a single turn (message).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TurnId(pub Uuid);

impl TurnId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TurnId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TurnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// =============================================================================
// Enums
// =============================================================================

/// Author of a turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

/// Kind of structured content carried by an artifact block.
///
/// Parsed from either a short name (`code`) or the MIME-style names that
/// models tend to emit (`application/code`, `text/markdown`, ...).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactType {
    Code,
    Document,
    Diagram,
    Html,
    Svg,
    React,
    #[serde(other)]
    Other,
}

impl ArtifactType {
    /// Parse an artifact `type` attribute. Never fails; unknown values map to `Other`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "code" | "application/code" => ArtifactType::Code,
            "document" | "markdown" | "text/markdown" => ArtifactType::Document,
            "diagram" | "mermaid" | "application/mermaid" => ArtifactType::Diagram,
            "html" | "text/html" => ArtifactType::Html,
            "svg" | "image/svg+xml" => ArtifactType::Svg,
            "react" | "application/react" => ArtifactType::React,
            _ => ArtifactType::Other,
        }
    }
}

// =============================================================================
// Conversation model
// =============================================================================

/// A file or image reference attached to a turn.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub url: String,
    pub content_type: String,
}

impl Attachment {
    pub fn new(url: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            content_type: content_type.into(),
        }
    }

    /// Whether this attachment is an image the model can be shown.
    pub fn is_image(&self) -> bool {
        self.content_type.starts_with("image")
    }
}

/// One message in a conversation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Turn {
    pub id: TurnId,
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub created_at: DateTime<Utc>,
}

impl Turn {
    pub fn user(content: impl Into<String>, attachments: Vec<Attachment>) -> Self {
        Self {
            id: TurnId::new(),
            role: Role::User,
            content: content.into(),
            attachments,
            created_at: Utc::now(),
        }
    }

    /// An assistant turn that starts empty and grows while streaming.
    pub fn assistant() -> Self {
        Self {
            id: TurnId::new(),
            role: Role::Assistant,
            content: String::new(),
            attachments: Vec::new(),
            created_at: Utc::now(),
        }
    }
}

/// The in-memory view of the active conversation.
///
/// `id` stays `None` until the first exchange has been persisted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: Option<SessionId>,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn unbound() -> Self {
        Self {
            id: None,
            title: String::new(),
            created_at: Utc::now(),
        }
    }
}

/// A session record as returned by the persistence service.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: SessionId,
    pub title: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
}

impl From<SessionRecord> for Session {
    fn from(record: SessionRecord) -> Self {
        Self {
            id: Some(record.id),
            title: record.title,
            created_at: record.created_at,
        }
    }
}

/// The message payload accepted by `append_turn`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewTurn {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl From<&Turn> for NewTurn {
    fn from(turn: &Turn) -> Self {
        Self {
            role: turn.role,
            content: turn.content.clone(),
            metadata: None,
        }
    }
}

/// Body of `POST /chats/{id}/messages`.
///
/// `message` stays optional so a missing one can be answered with a 400
/// instead of a deserialization failure.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AppendTurnRequest {
    #[serde(default)]
    pub message: Option<NewTurn>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

/// Body of `POST /chats`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub title: String,
}

/// A turn as stored by the persistence service.
///
/// `attachments` is optional on the wire; older rows may not carry it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredTurn {
    pub id: TurnId,
    pub session_id: SessionId,
    pub role: Role,
    #[serde(alias = "text")]
    pub content: String,
    #[serde(default)]
    pub attachments: Option<Vec<Attachment>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl From<StoredTurn> for Turn {
    fn from(stored: StoredTurn) -> Self {
        Self {
            id: stored.id,
            role: stored.role,
            content: stored.content,
            attachments: stored.attachments.unwrap_or_default(),
            created_at: stored.created_at,
        }
    }
}

/// A structured content block extracted from assistant output.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ArtifactType,
    pub title: String,
    pub language: Option<String>,
    pub content: String,
    pub generating: bool,
}

/// Text produced by one recording.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transcript {
    pub text: String,
}

/// Derive a session title from the first user message.
pub fn title_from_seed(seed: &str) -> String {
    seed.chars().take(TITLE_MAX_CHARS).collect()
}
