//! HTTP transport for the remote conversation API.
//!
//! One [`GenieTransport`] wraps one workspace base URL and one credential and
//! lives for a single orchestrated operation. Every trait method issues
//! exactly one outbound request; retries and polling live in the
//! orchestrator, not here.

use async_trait::async_trait;
use geniebridge_core::{
    AttachmentId, AttachmentResult, Conversation, ConversationId, GenieError, Message, MessageId,
    SpaceId,
};
use reqwest::header::AUTHORIZATION;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::auth::Credential;

#[async_trait]
pub trait ConversationApi: Send + Sync {
    async fn create_conversation(&self, space_id: &SpaceId) -> Result<Conversation, GenieError>;

    async fn create_message(
        &self,
        space_id: &SpaceId,
        conversation_id: &ConversationId,
        content: &str,
    ) -> Result<Message, GenieError>;

    async fn get_message(
        &self,
        space_id: &SpaceId,
        conversation_id: &ConversationId,
        message_id: &MessageId,
    ) -> Result<Message, GenieError>;

    /// Messages in the order the remote service returns them.
    async fn list_messages(
        &self,
        space_id: &SpaceId,
        conversation_id: &ConversationId,
    ) -> Result<Vec<Message>, GenieError>;

    async fn get_conversation(
        &self,
        space_id: &SpaceId,
        conversation_id: &ConversationId,
    ) -> Result<Conversation, GenieError>;

    async fn get_attachment(
        &self,
        space_id: &SpaceId,
        conversation_id: &ConversationId,
        message_id: &MessageId,
        attachment_id: &AttachmentId,
    ) -> Result<AttachmentResult, GenieError>;
}

pub struct GenieTransport {
    client: reqwest::Client,
    base_url: String,
    credential: Credential,
}

#[derive(Debug, Default, Deserialize)]
struct MessageList {
    #[serde(default)]
    messages: Vec<Message>,
}

impl GenieTransport {
    pub fn new(client: reqwest::Client, workspace_url: &str, credential: Credential) -> Self {
        let base_url = format!("{}/api/2.0/genie", workspace_url.trim_end_matches('/'));
        Self { client, base_url, credential }
    }

    fn space_url(&self, space_id: &SpaceId, suffix: &str) -> String {
        format!("{}/spaces/{}{}", self.base_url, space_id, suffix)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: String) -> Result<T, GenieError> {
        self.execute(self.client.get(url)).await
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        url: String,
        body: &Value,
    ) -> Result<T, GenieError> {
        self.execute(self.client.post(url).json(body)).await
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, GenieError> {
        let response = request
            .header(AUTHORIZATION, self.credential.bearer_header())
            .send()
            .await
            .map_err(|error| GenieError::Connection(error.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| GenieError::Connection(error.to_string()))?;

        if !status.is_success() {
            debug!(event_name = "transport.remote_status", status = status.as_u16(), "remote call returned non-success status");
            return Err(GenieError::RemoteStatus { status: status.as_u16(), body });
        }

        serde_json::from_str(&body).map_err(|error| GenieError::Decode(error.to_string()))
    }
}

#[async_trait]
impl ConversationApi for GenieTransport {
    async fn create_conversation(&self, space_id: &SpaceId) -> Result<Conversation, GenieError> {
        let url = self.space_url(space_id, "/conversations");
        self.post_json(url, &json!({})).await
    }

    async fn create_message(
        &self,
        space_id: &SpaceId,
        conversation_id: &ConversationId,
        content: &str,
    ) -> Result<Message, GenieError> {
        let url = self.space_url(space_id, &format!("/conversations/{conversation_id}/messages"));
        self.post_json(url, &json!({ "content": content })).await
    }

    async fn get_message(
        &self,
        space_id: &SpaceId,
        conversation_id: &ConversationId,
        message_id: &MessageId,
    ) -> Result<Message, GenieError> {
        let url = self
            .space_url(space_id, &format!("/conversations/{conversation_id}/messages/{message_id}"));
        self.get_json(url).await
    }

    async fn list_messages(
        &self,
        space_id: &SpaceId,
        conversation_id: &ConversationId,
    ) -> Result<Vec<Message>, GenieError> {
        let url = self.space_url(space_id, &format!("/conversations/{conversation_id}/messages"));
        let list: MessageList = self.get_json(url).await?;
        Ok(list.messages)
    }

    async fn get_conversation(
        &self,
        space_id: &SpaceId,
        conversation_id: &ConversationId,
    ) -> Result<Conversation, GenieError> {
        let url = self.space_url(space_id, &format!("/conversations/{conversation_id}"));
        self.get_json(url).await
    }

    async fn get_attachment(
        &self,
        space_id: &SpaceId,
        conversation_id: &ConversationId,
        message_id: &MessageId,
        attachment_id: &AttachmentId,
    ) -> Result<AttachmentResult, GenieError> {
        let url = self.space_url(
            space_id,
            &format!(
                "/conversations/{conversation_id}/messages/{message_id}/query-result/{attachment_id}"
            ),
        );
        self.get_json(url).await
    }
}
