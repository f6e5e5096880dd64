//! Request/response API surface. `RestApi` is the seam the core talks through;
//! `HttpRestApi` is the production implementation speaking JSON over HTTP.
//! Tests swap in an in-process fake (see `core` tests).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::state::{CallSummary, MessageKind, ReactionRecord, ReplyPreview, UserProfile};

/// A message as the server knows it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: String,
    pub chat_id: String,
    pub sender_id: String,
    pub content: String,
    pub kind: MessageKind,
    pub created_at: i64,
    /// Echoed back on messages we originated; the dedup key for optimistic
    /// sends. Absent on messages from other members.
    #[serde(default)]
    pub client_temp_id: Option<String>,
    #[serde(default)]
    pub reply_to: Option<ReplyPreview>,
    #[serde(default)]
    pub reactions: Vec<ReactionRecord>,
    #[serde(default)]
    pub edited: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRecord {
    pub id: String,
    pub is_group: bool,
    #[serde(default)]
    pub name: Option<String>,
    pub members: Vec<UserProfile>,
    #[serde(default)]
    pub last_message_preview: Option<String>,
    #[serde(default)]
    pub last_message_at: Option<i64>,
    #[serde(default)]
    pub unread_count: u32,
    /// Populated when the chat has a live call; refreshed by transport events
    /// after the initial load.
    #[serde(default)]
    pub active_call: Option<CallSessionInfo>,
}

/// One live call instance, identified by its channel token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallSessionInfo {
    pub call_id: String,
    pub chat_id: String,
    pub started_by: String,
    pub participants: Vec<UserProfile>,
    pub started_at: i64,
}

impl CallSessionInfo {
    pub fn summary(&self) -> CallSummary {
        CallSummary {
            call_id: self.call_id.clone(),
            chat_id: self.chat_id.clone(),
            started_by: self.started_by.clone(),
            participant_count: self.participants.len() as u32,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub chat_id: String,
    pub client_temp_id: String,
    pub content: String,
    pub kind: MessageKind,
    #[serde(default)]
    pub reply_to_message_id: Option<String>,
}

#[async_trait]
pub trait RestApi: Send + Sync + 'static {
    async fn fetch_chats(&self) -> Result<Vec<ChatRecord>, CoreError>;

    /// Newest-first page of history; `before_id` pages backwards from a loaded
    /// message, `None` fetches the newest page.
    async fn fetch_history(
        &self,
        chat_id: &str,
        before_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<MessageRecord>, CoreError>;

    async fn send_message(&self, message: &OutgoingMessage) -> Result<MessageRecord, CoreError>;

    /// Toggles the caller's reaction; returns the authoritative reaction list
    /// for the message after the toggle.
    async fn toggle_reaction(
        &self,
        chat_id: &str,
        message_id: &str,
        emoji: &str,
    ) -> Result<Vec<ReactionRecord>, CoreError>;

    async fn delete_message(&self, chat_id: &str, message_id: &str) -> Result<(), CoreError>;

    async fn fetch_profile(&self, user_id: &str) -> Result<UserProfile, CoreError>;

    async fn create_call_session(&self, chat_id: &str) -> Result<CallSessionInfo, CoreError>;

    async fn join_call_session(
        &self,
        chat_id: &str,
        call_id: &str,
    ) -> Result<CallSessionInfo, CoreError>;
}

/// JSON-over-HTTP `RestApi`.
pub struct HttpRestApi {
    base_url: String,
    http: reqwest::Client,
}

impl HttpRestApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response, CoreError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(CoreError::ApiStatus {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl RestApi for HttpRestApi {
    async fn fetch_chats(&self) -> Result<Vec<ChatRecord>, CoreError> {
        let resp = self.http.get(self.url("/chats")).send().await?;
        Ok(Self::check(resp).await?.json().await?)
    }

    async fn fetch_history(
        &self,
        chat_id: &str,
        before_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<MessageRecord>, CoreError> {
        let mut req = self
            .http
            .get(self.url(&format!("/chats/{chat_id}/messages")))
            .query(&[("limit", limit.to_string())]);
        if let Some(before) = before_id {
            req = req.query(&[("before", before)]);
        }
        let resp = req.send().await?;
        Ok(Self::check(resp).await?.json().await?)
    }

    async fn send_message(&self, message: &OutgoingMessage) -> Result<MessageRecord, CoreError> {
        let resp = self
            .http
            .post(self.url(&format!("/chats/{}/messages", message.chat_id)))
            .json(message)
            .send()
            .await?;
        Ok(Self::check(resp).await?.json().await?)
    }

    async fn toggle_reaction(
        &self,
        chat_id: &str,
        message_id: &str,
        emoji: &str,
    ) -> Result<Vec<ReactionRecord>, CoreError> {
        let resp = self
            .http
            .post(self.url(&format!(
                "/chats/{chat_id}/messages/{message_id}/reactions"
            )))
            .json(&serde_json::json!({ "emoji": emoji }))
            .send()
            .await?;
        Ok(Self::check(resp).await?.json().await?)
    }

    async fn delete_message(&self, chat_id: &str, message_id: &str) -> Result<(), CoreError> {
        let resp = self
            .http
            .delete(self.url(&format!("/chats/{chat_id}/messages/{message_id}")))
            .send()
            .await?;
        Self::check(resp).await?;
        Ok(())
    }

    async fn fetch_profile(&self, user_id: &str) -> Result<UserProfile, CoreError> {
        let resp = self
            .http
            .get(self.url(&format!("/users/{user_id}")))
            .send()
            .await?;
        Ok(Self::check(resp).await?.json().await?)
    }

    async fn create_call_session(&self, chat_id: &str) -> Result<CallSessionInfo, CoreError> {
        let resp = self
            .http
            .post(self.url(&format!("/chats/{chat_id}/call")))
            .send()
            .await?;
        Ok(Self::check(resp).await?.json().await?)
    }

    async fn join_call_session(
        &self,
        chat_id: &str,
        call_id: &str,
    ) -> Result<CallSessionInfo, CoreError> {
        let resp = self
            .http
            .post(self.url(&format!("/chats/{chat_id}/call/{call_id}/join")))
            .send()
            .await?;
        Ok(Self::check(resp).await?.json().await?)
    }
}
