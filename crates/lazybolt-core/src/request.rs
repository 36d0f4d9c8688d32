//! The request object handed to every handler.
//!
//! [`SlackRequest`] bundles the raw body, the classified [`Payload`], the
//! [`RetryContext`] and a best-effort [`RequestContext`] with the ids
//! handlers most often need. Context extraction never fails: fields that a
//! payload shape does not carry are simply `None`.

use std::sync::Arc;

use serde_json::Value;

use crate::error::CoreError;
use crate::payload::Payload;
use crate::retry::RetryContext;
use crate::slack_api::{PostMessage, SlackApi};

/// Ids pulled out of a payload for convenience.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    /// This app's bot user, from settings or the event's bot authorization.
    pub bot_user_id: Option<String>,
    pub team_id: Option<String>,
    pub enterprise_id: Option<String>,
    pub user_id: Option<String>,
    pub channel_id: Option<String>,
    pub thread_ts: Option<String>,
    pub trigger_id: Option<String>,
    pub response_url: Option<String>,
}

impl RequestContext {
    /// Builds the context for a classified payload.
    pub fn from_payload(payload: &Payload, bot_user_id: Option<&str>) -> Self {
        let mut ctx = Self {
            bot_user_id: bot_user_id.map(String::from),
            team_id: payload.team_id().map(String::from),
            enterprise_id: payload.enterprise_id().map(String::from),
            user_id: payload.user_id().map(String::from),
            ..Self::default()
        };

        match payload {
            Payload::BlockAction(p) => {
                ctx.channel_id = p
                    .channel
                    .as_ref()
                    .map(|c| c.id.clone())
                    .or_else(|| str_at(p.container.as_ref(), &["channel_id"]));
                ctx.thread_ts = str_at(p.container.as_ref(), &["thread_ts"])
                    .or_else(|| str_at(p.message.as_ref(), &["thread_ts"]));
                ctx.trigger_id = p.trigger_id.clone();
                ctx.response_url = p.response_url.clone();
            }
            Payload::BlockSuggestion(p) => {
                ctx.channel_id = p.channel.as_ref().map(|c| c.id.clone());
            }
            Payload::MessageShortcut(p) => {
                ctx.channel_id = Some(p.channel.id.clone());
                ctx.thread_ts = str_at(Some(&p.message), &["thread_ts"]);
                ctx.trigger_id = Some(p.trigger_id.clone());
                ctx.response_url = Some(p.response_url.clone());
            }
            Payload::GlobalShortcut(p) => {
                ctx.trigger_id = Some(p.trigger_id.clone());
            }
            Payload::EventsApi(envelope) => {
                let event = &envelope.event;
                let fields = Value::Object(event.fields.clone());
                ctx.channel_id = event
                    .channel
                    .clone()
                    .or_else(|| str_at(Some(&fields), &["channel_id"]))
                    .or_else(|| str_at(Some(&fields), &["item", "channel"]))
                    .or_else(|| str_at(Some(&fields), &["assistant_thread", "channel_id"]));
                ctx.thread_ts = event
                    .thread_ts
                    .clone()
                    .or_else(|| str_at(Some(&fields), &["assistant_thread", "thread_ts"]));
                if ctx.bot_user_id.is_none() {
                    ctx.bot_user_id = envelope
                        .authorizations
                        .iter()
                        .find(|a| a.is_bot)
                        .map(|a| a.user_id.clone());
                }
            }
            Payload::ViewSubmission(p) => {
                ctx.trigger_id = p.trigger_id.clone();
            }
            Payload::SlashCommand(p) => {
                ctx.channel_id = Some(p.channel_id.clone());
                ctx.trigger_id = Some(p.trigger_id.clone());
                ctx.response_url = Some(p.response_url.clone());
            }
            Payload::ViewClosed(_) | Payload::AppRateLimited(_) => {}
        }
        ctx
    }
}

/// Walks `path` through nested objects and returns the string at the end.
fn str_at(value: Option<&Value>, path: &[&str]) -> Option<String> {
    let mut current = value?;
    for key in path {
        current = current.get(key)?;
    }
    current.as_str().map(String::from)
}

/// One inbound delivery, as seen by handlers.
pub struct SlackRequest {
    /// The body exactly as received.
    pub body: Value,
    pub payload: Payload,
    pub retry: RetryContext,
    pub context: RequestContext,
    client: Option<Arc<dyn SlackApi>>,
}

impl std::fmt::Debug for SlackRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlackRequest")
            .field("kind", &self.payload.kind())
            .field("retry", &self.retry)
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

impl SlackRequest {
    pub fn new(
        body: Value,
        payload: Payload,
        retry: RetryContext,
        context: RequestContext,
        client: Option<Arc<dyn SlackApi>>,
    ) -> Self {
        Self {
            body,
            payload,
            retry,
            context,
            client,
        }
    }

    /// The app's Slack client, when one was configured.
    pub fn client(&self) -> Option<&Arc<dyn SlackApi>> {
        self.client.as_ref()
    }

    /// Posts `text` into the request's channel, inside its thread if any.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::SlackApi` when no client is configured, the
    /// payload has no channel, or the API call fails.
    pub async fn say(&self, text: &str) -> Result<String, CoreError> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| CoreError::SlackApi("no Slack client configured".into()))?;
        let channel = self
            .context
            .channel_id
            .as_deref()
            .ok_or_else(|| CoreError::SlackApi("request has no channel to reply in".into()))?;
        let mut message = PostMessage::text(channel, text);
        message.thread_ts = self.context.thread_ts.clone();
        client.post_message(message).await
    }
}
