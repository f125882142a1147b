//! Model streaming backends.

pub mod anthropic;
pub mod openai;
pub mod scripted;
pub mod sse;
pub mod traits;

use async_trait::async_trait;
use tokio::sync::mpsc;

use confab_core::config::ModelConfig;

use crate::error::ChatError;

pub use scripted::{ScriptStep, ScriptedModel};
pub use traits::{ModelClient, ModelRequest, PromptMessage, Provider, StreamingToken};

/// HTTP backend that routes each request to the API serving its model id.
#[derive(Debug, Clone)]
pub struct HttpModelClient {
    http: reqwest::Client,
    config: ModelConfig,
}

impl HttpModelClient {
    pub fn new(config: ModelConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl ModelClient for HttpModelClient {
    fn name(&self) -> &str {
        "http"
    }

    async fn stream(
        &self,
        request: ModelRequest,
    ) -> Result<mpsc::Receiver<StreamingToken>, ChatError> {
        let provider = Provider::from_model(&request.model);
        let base_url = provider.base_url(&self.config);
        tracing::debug!(
            provider = provider.label(),
            model = %request.model,
            messages = request.messages.len(),
            "Starting model stream"
        );

        match provider {
            Provider::Anthropic => anthropic::stream(&self.http, base_url, &request).await,
            Provider::OpenAi | Provider::Local => {
                openai::stream(&self.http, base_url, &request).await
            }
        }
    }
}
