//! Model backend traits and request types.
//!
//! A backend turns a prompt plus history into a channel of streamed tokens.
//! The channel closes after `Complete` or `Error`; dropping the receiver
//! aborts the underlying request.

use async_trait::async_trait;
use tokio::sync::mpsc;

use confab_core::config::ModelConfig;
use confab_core::types::{Attachment, Role, Turn};

use crate::error::ChatError;

/// Token stream events from model backends.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamingToken {
    /// One text delta.
    Token(String),
    /// End of turn.
    Complete,
    /// The stream broke; no more tokens follow.
    Error(String),
}

/// One history entry as sent to the model.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PromptMessage {
    pub role: Role,
    pub content: String,
    /// Image attachments only; other content types are not forwarded.
    pub images: Vec<Attachment>,
}

impl From<&Turn> for PromptMessage {
    fn from(turn: &Turn) -> Self {
        Self {
            role: turn.role,
            content: turn.content.clone(),
            images: turn
                .attachments
                .iter()
                .filter(|a| a.is_image())
                .cloned()
                .collect(),
        }
    }
}

impl PromptMessage {
    pub fn is_empty(&self) -> bool {
        self.content.trim().is_empty() && self.images.is_empty()
    }
}

/// A streaming completion request.
#[derive(Clone, Debug)]
pub struct ModelRequest {
    pub model: String,
    /// Absent for local endpoints that need no credential.
    pub credential: Option<String>,
    pub system: Option<String>,
    pub messages: Vec<PromptMessage>,
    pub max_tokens: u32,
}

impl ModelRequest {
    /// Messages worth sending. Empty turns (e.g. a response cancelled before
    /// its first token) are rejected by some providers.
    pub fn sendable_messages(&self) -> impl Iterator<Item = &PromptMessage> {
        self.messages.iter().filter(|m| !m.is_empty())
    }
}

/// Model backend trait.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &str;

    /// Start a streaming completion.
    ///
    /// Fails only if the request could not be started; failures after the
    /// first byte arrive as [`StreamingToken::Error`].
    async fn stream(
        &self,
        request: ModelRequest,
    ) -> Result<mpsc::Receiver<StreamingToken>, ChatError>;
}

/// Which API a model id is served by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAi,
    Anthropic,
    /// An OpenAI-compatible server that needs no credential.
    Local,
}

impl Provider {
    pub fn from_model(model: &str) -> Self {
        let model = model.trim().to_ascii_lowercase();
        if model.starts_with("gpt") {
            Provider::OpenAi
        } else if model.starts_with("claude") {
            Provider::Anthropic
        } else {
            Provider::Local
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Provider::OpenAi => "OpenAI",
            Provider::Anthropic => "Anthropic",
            Provider::Local => "local",
        }
    }

    pub fn base_url<'a>(&self, config: &'a ModelConfig) -> &'a str {
        match self {
            Provider::OpenAi => &config.openai_base_url,
            Provider::Anthropic => &config.anthropic_base_url,
            Provider::Local => &config.local_base_url,
        }
    }

    /// The credential the configured model needs.
    ///
    /// Returns `AuthConfig` when it is missing or blank, before any network
    /// call is made.
    pub fn credential(&self, config: &ModelConfig) -> Result<Option<String>, ChatError> {
        let key = match self {
            Provider::OpenAi => config.openai_api_key.as_deref(),
            Provider::Anthropic => config.anthropic_api_key.as_deref(),
            Provider::Local => return Ok(None),
        };

        match key.map(str::trim).filter(|k| !k.is_empty()) {
            Some(key) => Ok(Some(key.to_string())),
            None => Err(ChatError::AuthConfig {
                model: config.model.clone(),
                provider: self.label().to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(model: &str) -> ModelConfig {
        ModelConfig {
            model: model.to_string(),
            ..ModelConfig::default()
        }
    }

    #[test]
    fn test_provider_from_model() {
        assert_eq!(Provider::from_model("gpt-4o"), Provider::OpenAi);
        assert_eq!(Provider::from_model("GPT-4"), Provider::OpenAi);
        assert_eq!(Provider::from_model("claude-3-5-sonnet"), Provider::Anthropic);
        assert_eq!(Provider::from_model("llama3"), Provider::Local);
    }

    #[test]
    fn test_gpt_without_key_is_auth_error() {
        let result = Provider::OpenAi.credential(&config("gpt-4o"));
        assert!(matches!(result, Err(ChatError::AuthConfig { .. })));
    }

    #[test]
    fn test_blank_key_is_auth_error() {
        let mut cfg = config("claude-3-opus");
        cfg.anthropic_api_key = Some("   ".to_string());
        let result = Provider::Anthropic.credential(&cfg);
        assert!(matches!(result, Err(ChatError::AuthConfig { .. })));
    }

    #[test]
    fn test_credential_present() {
        let mut cfg = config("gpt-4o");
        cfg.openai_api_key = Some("sk-test".to_string());
        assert_eq!(
            Provider::OpenAi.credential(&cfg).unwrap().as_deref(),
            Some("sk-test")
        );
    }

    #[test]
    fn test_local_needs_no_credential() {
        assert_eq!(Provider::Local.credential(&config("llama3")).unwrap(), None);
    }

    #[test]
    fn test_prompt_message_forwards_only_images() {
        let turn = Turn::user(
            "look",
            vec![
                Attachment::new("a.png", "image/png"),
                Attachment::new("b.pdf", "application/pdf"),
            ],
        );
        let message = PromptMessage::from(&turn);
        assert_eq!(message.images, vec![Attachment::new("a.png", "image/png")]);
    }

    #[test]
    fn test_sendable_messages_skip_empty() {
        let request = ModelRequest {
            model: "llama3".into(),
            credential: None,
            system: None,
            messages: vec![
                PromptMessage::from(&Turn::user("hi", vec![])),
                PromptMessage::from(&Turn::assistant()),
            ],
            max_tokens: 16,
        };
        assert_eq!(request.sendable_messages().count(), 1);
    }
}
