//! The outbound Slack Web API capability consumed by the core.
//!
//! Dispatch itself never calls Slack. Only the assistant defaults, the
//! assistant utilities, [`SlackRequest::say`](crate::SlackRequest::say) and
//! the metadata-backed thread context store do, and all of them go through
//! the [`SlackApi`] trait so the transport can be swapped out (see
//! [`SlackClient`](crate::SlackClient) for the reqwest-backed one).

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;

/// Structured metadata attached to a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageMetadata {
    pub event_type: String,
    pub event_payload: Value,
}

/// Body of `chat.postMessage`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PostMessage {
    pub channel: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_ts: Option<String>,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocks: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MessageMetadata>,
}

impl PostMessage {
    pub fn text(channel: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn in_thread(mut self, thread_ts: impl Into<String>) -> Self {
        self.thread_ts = Some(thread_ts.into());
        self
    }
}

/// Body of `chat.update`.
///
/// Fields serialize in declaration order and `metadata` is declared last:
/// consumers of the raw update body rely on metadata being the final field.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UpdateMessage {
    pub channel: String,
    pub ts: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocks: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MessageMetadata>,
}

/// Parameters of `conversations.replies`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RepliesQuery {
    pub channel: String,
    /// Parent message timestamp of the thread.
    pub ts: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    pub include_all_metadata: bool,
}

/// A message returned by `conversations.replies`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ThreadMessage {
    pub ts: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub bot_id: Option<String>,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub blocks: Option<Vec<Value>>,
    #[serde(default)]
    pub thread_ts: Option<String>,
    #[serde(default)]
    pub metadata: Option<MessageMetadata>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuggestedPrompt {
    pub title: String,
    pub message: String,
}

impl SuggestedPrompt {
    pub fn new(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
        }
    }
}

/// Body of `assistant.threads.setStatus`.
#[derive(Debug, Clone, Serialize)]
pub struct SetStatus {
    pub channel_id: String,
    pub thread_ts: String,
    pub status: String,
}

/// Body of `assistant.threads.setSuggestedPrompts`.
#[derive(Debug, Clone, Serialize)]
pub struct SetSuggestedPrompts {
    pub channel_id: String,
    pub thread_ts: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub prompts: Vec<SuggestedPrompt>,
}

/// Body of `assistant.threads.setTitle`.
#[derive(Debug, Clone, Serialize)]
pub struct SetTitle {
    pub channel_id: String,
    pub thread_ts: String,
    pub title: String,
}

/// Slack Web API operations the core depends on.
///
/// Implementations must be `Send + Sync` so they can be shared across
/// spawned lazy tasks.
pub trait SlackApi: Send + Sync {
    /// `chat.postMessage`; resolves to the new message's `ts`.
    fn post_message(&self, message: PostMessage) -> BoxFuture<'_, Result<String, CoreError>>;

    /// `chat.update`.
    fn update_message(&self, update: UpdateMessage) -> BoxFuture<'_, Result<(), CoreError>>;

    /// `conversations.replies`, oldest first.
    fn conversations_replies(
        &self,
        query: RepliesQuery,
    ) -> BoxFuture<'_, Result<Vec<ThreadMessage>, CoreError>>;

    fn assistant_threads_set_status(
        &self,
        request: SetStatus,
    ) -> BoxFuture<'_, Result<(), CoreError>>;

    fn assistant_threads_set_suggested_prompts(
        &self,
        request: SetSuggestedPrompts,
    ) -> BoxFuture<'_, Result<(), CoreError>>;

    fn assistant_threads_set_title(&self, request: SetTitle) -> BoxFuture<'_, Result<(), CoreError>>;
}
