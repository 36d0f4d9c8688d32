//! Per-thread context persistence for assistant conversations.
//!
//! [`ThreadContextStore`] is keyed by [`AssistantThreadKey`] and stores an
//! [`AssistantThreadContext`] verbatim. Stores are best-effort: backend
//! failures are logged and read back as "absent" or a no-op, never raised.
//!
//! [`MetadataThreadContextStore`] keeps the context in the message metadata
//! of the bot's own first reply in the thread, so it needs no storage of its
//! own. [`MemoryThreadContextStore`] keeps it in process memory.

use std::sync::Arc;

use dashmap::DashMap;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::CoreError;
use crate::slack_api::{MessageMetadata, RepliesQuery, SlackApi, ThreadMessage, UpdateMessage};

/// Metadata event type under which the context is stored.
pub const THREAD_CONTEXT_EVENT_TYPE: &str = "assistant_thread_context";

/// How many replies are scanned when looking for the bot's first reply.
const FIRST_REPLY_SCAN_LIMIT: u32 = 4;

/// Identity of one assistant conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AssistantThreadKey {
    pub channel_id: String,
    pub thread_ts: String,
}

impl AssistantThreadKey {
    pub fn new(channel_id: impl Into<String>, thread_ts: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            thread_ts: thread_ts.into(),
        }
    }
}

/// Where the user was when they opened the assistant.
///
/// Unknown fields are kept so the context round-trips unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssistantThreadContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enterprise_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Pluggable persistence for assistant thread context.
pub trait ThreadContextStore: Send + Sync {
    /// Stores `context` for `key`. Failures are swallowed by the store.
    fn save<'a>(
        &'a self,
        key: &'a AssistantThreadKey,
        context: &'a AssistantThreadContext,
    ) -> BoxFuture<'a, ()>;

    /// Looks up the context for `key`, `None` when absent or unreachable.
    fn find<'a>(
        &'a self,
        key: &'a AssistantThreadKey,
    ) -> BoxFuture<'a, Option<AssistantThreadContext>>;
}

/// Stores context in the metadata of the bot's first reply in the thread.
///
/// The anchor message is looked up on every call and never cached, since
/// its metadata can change out of band. Saving before the bot has replied
/// is a silent no-op. Concurrent saves for the same thread race and the
/// last `chat.update` wins.
pub struct MetadataThreadContextStore {
    client: Arc<dyn SlackApi>,
    bot_user_id: String,
}

impl std::fmt::Debug for MetadataThreadContextStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataThreadContextStore")
            .field("bot_user_id", &self.bot_user_id)
            .finish_non_exhaustive()
    }
}

impl MetadataThreadContextStore {
    pub fn new(client: Arc<dyn SlackApi>, bot_user_id: impl Into<String>) -> Self {
        Self {
            client,
            bot_user_id: bot_user_id.into(),
        }
    }

    /// Finds the bot's earliest reply without a subtype in the thread.
    async fn first_reply(
        &self,
        key: &AssistantThreadKey,
    ) -> Result<Option<ThreadMessage>, CoreError> {
        let messages = self
            .client
            .conversations_replies(RepliesQuery {
                channel: key.channel_id.clone(),
                ts: key.thread_ts.clone(),
                oldest: Some(key.thread_ts.clone()),
                limit: Some(FIRST_REPLY_SCAN_LIMIT),
                include_all_metadata: true,
            })
            .await
            .map_err(|e| CoreError::StoreUnavailable(e.to_string()))?;

        Ok(messages.into_iter().find(|m| {
            m.subtype.is_none() && m.user.as_deref() == Some(self.bot_user_id.as_str())
        }))
    }

    async fn save_inner(
        &self,
        key: &AssistantThreadKey,
        context: &AssistantThreadContext,
    ) -> Result<(), CoreError> {
        let Some(anchor) = self.first_reply(key).await? else {
            debug!(
                channel_id = %key.channel_id,
                thread_ts = %key.thread_ts,
                "No bot reply to anchor thread context yet, skipping save"
            );
            return Ok(());
        };

        let update = UpdateMessage {
            channel: key.channel_id.clone(),
            ts: anchor.ts,
            text: anchor.text,
            blocks: anchor.blocks,
            metadata: Some(MessageMetadata {
                event_type: THREAD_CONTEXT_EVENT_TYPE.to_string(),
                event_payload: serde_json::to_value(context)?,
            }),
        };
        self.client
            .update_message(update)
            .await
            .map_err(|e| CoreError::StoreUnavailable(e.to_string()))
    }

    async fn find_inner(
        &self,
        key: &AssistantThreadKey,
    ) -> Result<Option<AssistantThreadContext>, CoreError> {
        let Some(metadata) = self.first_reply(key).await?.and_then(|m| m.metadata) else {
            return Ok(None);
        };
        if metadata.event_type != THREAD_CONTEXT_EVENT_TYPE {
            return Ok(None);
        }
        Ok(Some(serde_json::from_value(metadata.event_payload)?))
    }
}

impl ThreadContextStore for MetadataThreadContextStore {
    fn save<'a>(
        &'a self,
        key: &'a AssistantThreadKey,
        context: &'a AssistantThreadContext,
    ) -> BoxFuture<'a, ()> {
        async move {
            if let Err(e) = self.save_inner(key, context).await {
                warn!(
                    channel_id = %key.channel_id,
                    thread_ts = %key.thread_ts,
                    error = %e,
                    "Failed to save assistant thread context"
                );
            }
        }
        .boxed()
    }

    fn find<'a>(
        &'a self,
        key: &'a AssistantThreadKey,
    ) -> BoxFuture<'a, Option<AssistantThreadContext>> {
        async move {
            match self.find_inner(key).await {
                Ok(found) => found,
                Err(e) => {
                    warn!(
                        channel_id = %key.channel_id,
                        thread_ts = %key.thread_ts,
                        error = %e,
                        "Failed to look up assistant thread context"
                    );
                    None
                }
            }
        }
        .boxed()
    }
}

/// In-process store backed by a [`DashMap`].
#[derive(Debug, Default)]
pub struct MemoryThreadContextStore {
    contexts: DashMap<AssistantThreadKey, AssistantThreadContext>,
}

impl MemoryThreadContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }
}

impl ThreadContextStore for MemoryThreadContextStore {
    fn save<'a>(
        &'a self,
        key: &'a AssistantThreadKey,
        context: &'a AssistantThreadContext,
    ) -> BoxFuture<'a, ()> {
        self.contexts.insert(key.clone(), context.clone());
        futures::future::ready(()).boxed()
    }

    fn find<'a>(
        &'a self,
        key: &'a AssistantThreadKey,
    ) -> BoxFuture<'a, Option<AssistantThreadContext>> {
        let found = self.contexts.get(key).map(|c| c.value().clone());
        futures::future::ready(found).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeSlack, SlackCall};
    use serde_json::json;

    const BOT: &str = "UBOT";

    fn context() -> AssistantThreadContext {
        serde_json::from_value(json!({
            "channel_id": "C42",
            "team_id": "T1",
            "enterprise_id": null
        }))
        .expect("context")
    }

    #[tokio::test]
    async fn test_should_round_trip_context_through_first_reply() {
        let slack = Arc::new(FakeSlack::new(BOT));
        slack.seed_reply("D1", "1.0", "U1", None);
        slack.seed_reply("D1", "1.1", BOT, None);
        let store = MetadataThreadContextStore::new(slack.clone(), BOT);
        let key = AssistantThreadKey::new("D1", "1.0");

        store.save(&key, &context()).await;
        assert_eq!(store.find(&key).await, Some(context()));

        let updates = slack.calls_matching(|c| matches!(c, SlackCall::Update(_)));
        assert_eq!(updates.len(), 1);
        let SlackCall::Update(update) = &updates[0] else {
            unreachable!()
        };
        assert_eq!(update.ts, "1.1");
    }

    #[tokio::test]
    async fn test_should_store_context_without_adding_absent_fields() {
        let slack = Arc::new(FakeSlack::new(BOT));
        slack.seed_reply("D1", "1.1", BOT, None);
        let store = MetadataThreadContextStore::new(slack.clone(), BOT);
        let raw = json!({"channel_id": "C42", "team_id": "T1"});
        let ctx: AssistantThreadContext = serde_json::from_value(raw.clone()).expect("context");

        store.save(&AssistantThreadKey::new("D1", "1.0"), &ctx).await;

        let updates = slack.calls_matching(|c| matches!(c, SlackCall::Update(_)));
        let SlackCall::Update(update) = &updates[0] else {
            unreachable!()
        };
        let metadata = update.metadata.as_ref().expect("metadata");
        assert_eq!(metadata.event_payload, raw);
    }

    #[tokio::test]
    async fn test_should_skip_bot_messages_with_subtype() {
        let slack = Arc::new(FakeSlack::new(BOT));
        slack.seed_reply("D1", "1.0", BOT, Some("channel_join"));
        slack.seed_reply("D1", "1.2", BOT, None);
        let store = MetadataThreadContextStore::new(slack.clone(), BOT);
        let key = AssistantThreadKey::new("D1", "1.0");

        store.save(&key, &context()).await;
        let updates = slack.calls_matching(|c| matches!(c, SlackCall::Update(_)));
        let SlackCall::Update(update) = &updates[0] else {
            unreachable!()
        };
        assert_eq!(update.ts, "1.2");
    }

    #[tokio::test]
    async fn test_should_return_none_without_bot_reply() {
        let slack = Arc::new(FakeSlack::new(BOT));
        slack.seed_reply("D1", "1.0", "U1", None);
        let store = MetadataThreadContextStore::new(slack.clone(), BOT);
        let key = AssistantThreadKey::new("D1", "1.0");

        assert_eq!(store.find(&key).await, None);
        store.save(&key, &context()).await;
        assert!(slack.calls_matching(|c| matches!(c, SlackCall::Update(_))).is_empty());
        assert_eq!(store.find(&key).await, None);
    }

    #[tokio::test]
    async fn test_should_swallow_backend_failures() {
        let slack = Arc::new(FakeSlack::new(BOT));
        slack.seed_reply("D1", "1.1", BOT, None);
        slack.fail_reads(true);
        let store = MetadataThreadContextStore::new(slack.clone(), BOT);
        let key = AssistantThreadKey::new("D1", "1.0");

        store.save(&key, &context()).await;
        assert_eq!(store.find(&key).await, None);
    }

    #[tokio::test]
    async fn test_should_ignore_foreign_metadata() {
        let slack = Arc::new(FakeSlack::new(BOT));
        slack.seed_reply("D1", "1.1", BOT, None);
        slack
            .update_message(UpdateMessage {
                channel: "D1".into(),
                ts: "1.1".into(),
                metadata: Some(MessageMetadata {
                    event_type: "task_created".into(),
                    event_payload: json!({"id": 1}),
                }),
                ..UpdateMessage::default()
            })
            .await
            .expect("update");
        let store = MetadataThreadContextStore::new(slack.clone(), BOT);
        assert_eq!(store.find(&AssistantThreadKey::new("D1", "1.0")).await, None);
    }

    #[tokio::test]
    async fn test_should_scan_replies_from_thread_root_with_metadata() {
        let slack = Arc::new(FakeSlack::new(BOT));
        let store = MetadataThreadContextStore::new(slack.clone(), BOT);
        store.find(&AssistantThreadKey::new("D1", "1.0")).await;

        let reads = slack.calls_matching(|c| matches!(c, SlackCall::Replies(_)));
        let SlackCall::Replies(query) = &reads[0] else {
            unreachable!()
        };
        assert_eq!(query.oldest.as_deref(), Some("1.0"));
        assert_eq!(query.limit, Some(FIRST_REPLY_SCAN_LIMIT));
        assert!(query.include_all_metadata);
    }

    #[tokio::test]
    async fn test_should_keep_unknown_context_fields() {
        let store = MemoryThreadContextStore::new();
        let key = AssistantThreadKey::new("D1", "1.0");
        let mut ctx = context();
        ctx.extra.insert("channel_name".into(), json!("general"));

        store.save(&key, &ctx).await;
        assert_eq!(store.len(), 1);
        assert_eq!(store.find(&key).await, Some(ctx));
        assert_eq!(store.find(&AssistantThreadKey::new("D1", "9.9")).await, None);
    }
}
