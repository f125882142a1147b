//! Persistence over HTTP, against a `confab serve` instance.

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use confab_core::error::{ConfabError, Result};
use confab_core::persistence::PersistenceService;
use confab_core::types::{
    AppendTurnRequest, Attachment, CreateSessionRequest, NewTurn, SessionId, SessionRecord,
    StoredTurn,
};

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// [`PersistenceService`] backed by the `/chats` HTTP API.
#[derive(Debug, Clone)]
pub struct HttpPersistence {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpPersistence {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| ConfabError::Http(e.to_string()))?;
        decode(response).await
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        return response
            .json()
            .await
            .map_err(|e| ConfabError::Serialization(e.to_string()));
    }

    let message = match response.json::<ErrorBody>().await {
        Ok(body) => body.message,
        Err(_) => status.to_string(),
    };
    Err(match status.as_u16() {
        404 => ConfabError::NotFound(message),
        _ => ConfabError::Api(format!("{}: {}", status, message)),
    })
}

#[async_trait]
impl PersistenceService for HttpPersistence {
    async fn list_turns(&self, session_id: SessionId) -> Result<Vec<StoredTurn>> {
        let url = self.url(&format!("/chats/{}/messages", session_id));
        self.send(self.client.get(url)).await
    }

    async fn create_session(&self, title: &str) -> Result<SessionRecord> {
        let body = CreateSessionRequest {
            title: title.to_string(),
        };
        self.send(self.client.post(self.url("/chats")).json(&body))
            .await
    }

    async fn append_turn(
        &self,
        session_id: SessionId,
        turn: NewTurn,
        attachments: Vec<Attachment>,
    ) -> Result<StoredTurn> {
        let url = self.url(&format!("/chats/{}/messages", session_id));
        let body = AppendTurnRequest {
            message: Some(turn),
            attachments,
        };
        self.send(self.client.post(url).json(&body)).await
    }
}
