//! Assistant thread coordinator.
//!
//! [`Assistant`] sits on top of event dispatch and owns three event types:
//! `assistant_thread_started`, `assistant_thread_context_changed` and
//! `message`. Messages are split into a bot-message and a user-message branch.
//! Each of the four slots holds at most one handler; setting a slot again
//! replaces the previous handler. An empty slot falls back to a default:
//!
//! | slot                     | default                                   |
//! |--------------------------|-------------------------------------------|
//! | `thread_started`         | greet and set suggested prompts           |
//! | `thread_context_changed` | save the new context in the store         |
//! | `user_message`           | acknowledge only                          |
//! | `bot_message`            | acknowledge only                          |

use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::error::CoreError;
use crate::event::{EventSubtype, InnerEvent};
use crate::handler::invoke_isolated;
use crate::request::SlackRequest;
use crate::retry::RetryContext;
use crate::slack_api::{
    MessageMetadata, PostMessage, SetStatus, SetSuggestedPrompts, SetTitle, SlackApi,
    SuggestedPrompt,
};
use crate::thread_context::{
    AssistantThreadContext, AssistantThreadKey, MetadataThreadContextStore,
    THREAD_CONTEXT_EVENT_TYPE, ThreadContextStore,
};

/// Greeting posted by the default `thread_started` behavior.
pub const DEFAULT_GREETING: &str = ":wave: Hi, how can I help you today?";

const DEFAULT_PROMPTS_TITLE: &str = "Try one of these:";

fn default_prompts() -> Vec<SuggestedPrompt> {
    vec![
        SuggestedPrompt::new(
            "Summarize this channel",
            "Can you summarize the recent discussion in the channel I'm viewing?",
        ),
        SuggestedPrompt::new("What can you do?", "What kinds of things can you help me with?"),
        SuggestedPrompt::new("Draft a message", "Help me draft a short update for my team."),
    ]
}

/// Slot handler.
pub type AssistantHandler =
    Arc<dyn Fn(AssistantRequest) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// The four overridable branches of the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssistantSlot {
    ThreadStarted,
    ThreadContextChanged,
    UserMessage,
    BotMessage,
}

impl AssistantSlot {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ThreadStarted => "assistant:thread_started",
            Self::ThreadContextChanged => "assistant:thread_context_changed",
            Self::UserMessage => "assistant:user_message",
            Self::BotMessage => "assistant:bot_message",
        }
    }
}

/// Guard for the user-message branch: no subtype, or `file_share`.
pub fn is_user_message(event: &InnerEvent) -> bool {
    event.event_type == "message"
        && matches!(event.subtype(), None | Some(EventSubtype::FileShare))
}

/// Guard for the bot-message branch: no subtype and authored by this bot.
pub fn is_bot_message(event: &InnerEvent, bot_user_id: &str) -> bool {
    event.event_type == "message"
        && event.subtype.is_none()
        && event.user.as_deref() == Some(bot_user_id)
}

/// Coordinator for assistant threads. Built once, then handed to
/// [`App::assistant`](crate::App::assistant).
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use lazybolt_core::{Assistant, SlackClient};
///
/// let client = Arc::new(SlackClient::new("xoxb-test".into()));
/// let assistant = Assistant::new(client, "UBOT").user_message(|req| async move {
///     req.set_status("is thinking...").await?;
///     req.say("On it!").await?;
///     Ok(())
/// });
/// assert!(format!("{assistant:?}").contains("user_message: true"));
/// ```
pub struct Assistant {
    client: Arc<dyn SlackApi>,
    store: Arc<dyn ThreadContextStore>,
    bot_user_id: String,
    thread_started: Option<AssistantHandler>,
    thread_context_changed: Option<AssistantHandler>,
    user_message: Option<AssistantHandler>,
    bot_message: Option<AssistantHandler>,
}

impl std::fmt::Debug for Assistant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Assistant")
            .field("bot_user_id", &self.bot_user_id)
            .field("thread_started", &self.thread_started.is_some())
            .field("thread_context_changed", &self.thread_context_changed.is_some())
            .field("user_message", &self.user_message.is_some())
            .field("bot_message", &self.bot_message.is_some())
            .finish()
    }
}

fn slot_handler<F, Fut>(f: F) -> AssistantHandler
where
    F: Fn(AssistantRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |req| f(req).boxed())
}

impl Assistant {
    /// Creates a coordinator that persists context in thread metadata.
    pub fn new(client: Arc<dyn SlackApi>, bot_user_id: impl Into<String>) -> Self {
        let bot_user_id = bot_user_id.into();
        let store = Arc::new(MetadataThreadContextStore::new(
            client.clone(),
            bot_user_id.clone(),
        ));
        Self {
            client,
            store,
            bot_user_id,
            thread_started: None,
            thread_context_changed: None,
            user_message: None,
            bot_message: None,
        }
    }

    /// Replaces the thread context store.
    pub fn with_store(mut self, store: Arc<dyn ThreadContextStore>) -> Self {
        self.store = store;
        self
    }

    pub fn thread_started<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(AssistantRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.thread_started = Some(slot_handler(f));
        self
    }

    pub fn thread_context_changed<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(AssistantRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.thread_context_changed = Some(slot_handler(f));
        self
    }

    pub fn user_message<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(AssistantRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.user_message = Some(slot_handler(f));
        self
    }

    pub fn bot_message<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(AssistantRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.bot_message = Some(slot_handler(f));
        self
    }

    pub fn bot_user_id(&self) -> &str {
        &self.bot_user_id
    }

    /// Picks the slot that owns `event`, if any.
    ///
    /// The bot-message guard is checked first so a message is never routed
    /// to both message branches.
    pub fn route(&self, event: &InnerEvent) -> Option<AssistantSlot> {
        match event.event_type.as_str() {
            "assistant_thread_started" => Some(AssistantSlot::ThreadStarted),
            "assistant_thread_context_changed" => Some(AssistantSlot::ThreadContextChanged),
            "message" if is_bot_message(event, &self.bot_user_id) => {
                Some(AssistantSlot::BotMessage)
            }
            "message" if is_user_message(event) => Some(AssistantSlot::UserMessage),
            _ => None,
        }
    }

    /// Runs `slot` for `request` behind the same isolation boundary as
    /// registry handlers. Never fails.
    #[instrument(skip_all, fields(slot = slot.as_str()))]
    pub(crate) async fn run(&self, slot: AssistantSlot, request: Arc<SlackRequest>) {
        let Some(event) = request.payload.event().cloned() else {
            debug!("Assistant slot invoked without an event, skipping");
            return;
        };
        let retry = request.retry.clone();
        let req = AssistantRequest {
            thread: thread_key(&event),
            event,
            request,
            client: self.client.clone(),
            store: self.store.clone(),
        };

        let handler = match slot {
            AssistantSlot::ThreadStarted => &self.thread_started,
            AssistantSlot::ThreadContextChanged => &self.thread_context_changed,
            AssistantSlot::UserMessage => &self.user_message,
            AssistantSlot::BotMessage => &self.bot_message,
        };

        let _ = match handler.clone() {
            Some(handler) => {
                invoke_isolated(slot.as_str(), "assistant", &retry, move || handler(req)).await
            }
            None => {
                invoke_isolated(slot.as_str(), "assistant-default", &retry, move || {
                    default_behavior(slot, req).boxed()
                })
                .await
            }
        };
    }
}

async fn default_behavior(slot: AssistantSlot, req: AssistantRequest) -> anyhow::Result<()> {
    match slot {
        AssistantSlot::ThreadStarted => {
            req.say(DEFAULT_GREETING).await?;
            req.set_suggested_prompts(Some(DEFAULT_PROMPTS_TITLE), default_prompts())
                .await?;
        }
        AssistantSlot::ThreadContextChanged => match req.event_context() {
            Some(context) => req.save_thread_context(&context).await,
            None => debug!("Context change carried no context, nothing to save"),
        },
        AssistantSlot::UserMessage | AssistantSlot::BotMessage => {
            debug!(slot = slot.as_str(), "No handler registered, acknowledged only");
        }
    }
    Ok(())
}

fn thread_key(event: &InnerEvent) -> AssistantThreadKey {
    if let Some(thread) = event.fields.get("assistant_thread") {
        let field = |name: &str| {
            thread
                .get(name)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        return AssistantThreadKey::new(field("channel_id"), field("thread_ts"));
    }
    AssistantThreadKey::new(
        event.channel.clone().unwrap_or_default(),
        event
            .thread_ts
            .clone()
            .or_else(|| event.ts.clone())
            .unwrap_or_default(),
    )
}

/// What an assistant slot handler receives.
#[derive(Clone)]
pub struct AssistantRequest {
    /// The underlying delivery.
    pub request: Arc<SlackRequest>,
    pub event: InnerEvent,
    pub thread: AssistantThreadKey,
    client: Arc<dyn SlackApi>,
    store: Arc<dyn ThreadContextStore>,
}

impl std::fmt::Debug for AssistantRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssistantRequest")
            .field("event_type", &self.event.event_type)
            .field("thread", &self.thread)
            .finish_non_exhaustive()
    }
}

impl AssistantRequest {
    pub fn retry(&self) -> &RetryContext {
        &self.request.retry
    }

    /// Context carried by `assistant_thread_*` events themselves.
    pub fn event_context(&self) -> Option<AssistantThreadContext> {
        let raw = self.event.fields.get("assistant_thread")?.get("context")?;
        serde_json::from_value(raw.clone()).ok()
    }

    /// Posts into the assistant thread.
    ///
    /// When the event carries a thread context it is attached as message
    /// metadata, so the first reply becomes the anchor the metadata store
    /// reads from.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::SlackApi` if the API call fails.
    pub async fn say(&self, text: &str) -> Result<String, CoreError> {
        let mut message = PostMessage::text(&self.thread.channel_id, text)
            .in_thread(&self.thread.thread_ts);
        if let Some(context) = self.event_context() {
            message.metadata = Some(MessageMetadata {
                event_type: THREAD_CONTEXT_EVENT_TYPE.to_string(),
                event_payload: serde_json::to_value(context)?,
            });
        }
        self.client.post_message(message).await
    }

    /// # Errors
    ///
    /// Returns `CoreError::SlackApi` if the API call fails.
    pub async fn set_status(&self, status: &str) -> Result<(), CoreError> {
        self.client
            .assistant_threads_set_status(SetStatus {
                channel_id: self.thread.channel_id.clone(),
                thread_ts: self.thread.thread_ts.clone(),
                status: status.to_string(),
            })
            .await
    }

    /// # Errors
    ///
    /// Returns `CoreError::SlackApi` if the API call fails.
    pub async fn set_suggested_prompts(
        &self,
        title: Option<&str>,
        prompts: Vec<SuggestedPrompt>,
    ) -> Result<(), CoreError> {
        self.client
            .assistant_threads_set_suggested_prompts(SetSuggestedPrompts {
                channel_id: self.thread.channel_id.clone(),
                thread_ts: self.thread.thread_ts.clone(),
                title: title.map(String::from),
                prompts,
            })
            .await
    }

    /// # Errors
    ///
    /// Returns `CoreError::SlackApi` if the API call fails.
    pub async fn set_title(&self, title: &str) -> Result<(), CoreError> {
        self.client
            .assistant_threads_set_title(SetTitle {
                channel_id: self.thread.channel_id.clone(),
                thread_ts: self.thread.thread_ts.clone(),
                title: title.to_string(),
            })
            .await
    }

    /// The thread's context: from the event when it carries one, otherwise
    /// from the store.
    pub async fn thread_context(&self) -> Option<AssistantThreadContext> {
        match self.event_context() {
            Some(context) => Some(context),
            None => self.store.find(&self.thread).await,
        }
    }

    pub async fn save_thread_context(&self, context: &AssistantThreadContext) {
        self.store.save(&self.thread, context).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::classify;
    use crate::payload::fixtures::event_callback;
    use crate::request::RequestContext;
    use crate::test_support::{FakeSlack, SlackCall};
    use crate::thread_context::MemoryThreadContextStore;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const BOT: &str = "BOT1";

    fn event(value: Value) -> InnerEvent {
        serde_json::from_value(value).expect("event")
    }

    fn request(event: Value) -> Arc<SlackRequest> {
        let body = event_callback(event);
        let payload = classify(&body).expect("classify");
        let ctx = RequestContext::from_payload(&payload, Some(BOT));
        Arc::new(SlackRequest::new(
            body,
            payload,
            RetryContext::default(),
            ctx,
            None,
        ))
    }

    fn started_event() -> Value {
        json!({
            "type": "assistant_thread_started",
            "assistant_thread": {
                "user_id": "U1",
                "channel_id": "D1",
                "thread_ts": "1.0",
                "context": {"channel_id": "C42", "team_id": "T1", "enterprise_id": null}
            }
        })
    }

    #[test]
    fn test_should_route_bot_authored_message_to_bot_slot() {
        let slack = Arc::new(FakeSlack::new(BOT));
        let assistant = Assistant::new(slack, BOT);
        let e = event(json!({"type": "message", "user": "BOT1"}));
        assert_eq!(assistant.route(&e), Some(AssistantSlot::BotMessage));
    }

    #[test]
    fn test_should_route_human_message_to_user_slot() {
        let slack = Arc::new(FakeSlack::new(BOT));
        let assistant = Assistant::new(slack, BOT);
        let e = event(json!({"type": "message", "user": "U2"}));
        assert_eq!(assistant.route(&e), Some(AssistantSlot::UserMessage));
    }

    #[test]
    fn test_should_route_bot_file_share_to_user_slot() {
        // Guards are independent: a bot file share only satisfies the user guard.
        let slack = Arc::new(FakeSlack::new(BOT));
        let assistant = Assistant::new(slack, BOT);
        let e = event(json!({"type": "message", "subtype": "file_share", "user": "BOT1"}));
        assert!(is_user_message(&e));
        assert!(!is_bot_message(&e, BOT));
        assert_eq!(assistant.route(&e), Some(AssistantSlot::UserMessage));
    }

    #[test]
    fn test_should_not_route_structural_messages_or_other_events() {
        let slack = Arc::new(FakeSlack::new(BOT));
        let assistant = Assistant::new(slack, BOT);
        let edit = event(json!({"type": "message", "subtype": "message_changed", "user": "U2"}));
        assert_eq!(assistant.route(&edit), None);
        assert_eq!(assistant.route(&event(json!({"type": "app_mention"}))), None);
        assert_eq!(
            assistant.route(&event(json!({"type": "assistant_thread_context_changed"}))),
            Some(AssistantSlot::ThreadContextChanged)
        );
    }

    #[tokio::test]
    async fn test_should_greet_and_suggest_prompts_by_default() {
        let slack = Arc::new(FakeSlack::new(BOT));
        let assistant = Assistant::new(slack.clone(), BOT);

        assistant
            .run(AssistantSlot::ThreadStarted, request(started_event()))
            .await;

        let calls = slack.calls();
        let SlackCall::Post(post) = &calls[0] else {
            panic!("Expected greeting post, got {calls:?}");
        };
        assert_eq!(post.text, DEFAULT_GREETING);
        assert_eq!(post.channel, "D1");
        assert_eq!(post.thread_ts.as_deref(), Some("1.0"));
        assert_eq!(
            post.metadata.as_ref().map(|m| m.event_type.as_str()),
            Some(THREAD_CONTEXT_EVENT_TYPE)
        );
        assert!(matches!(&calls[1], SlackCall::Prompts(p) if p.prompts.len() == 3));
    }

    #[tokio::test]
    async fn test_should_replace_default_with_registered_handler() {
        let slack = Arc::new(FakeSlack::new(BOT));
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_in = hits.clone();
        let assistant = Assistant::new(slack.clone(), BOT).thread_started(move |_req| {
            let hits = hits_in.clone();
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        assistant
            .run(AssistantSlot::ThreadStarted, request(started_event()))
            .await;

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(slack.calls().is_empty());
    }

    #[tokio::test]
    async fn test_should_keep_only_last_registration_per_slot() {
        let slack = Arc::new(FakeSlack::new(BOT));
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let (f, s) = (first.clone(), second.clone());
        let assistant = Assistant::new(slack, BOT)
            .user_message(move |_req| {
                let f = f.clone();
                async move {
                    f.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .user_message(move |_req| {
                let s = s.clone();
                async move {
                    s.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            });

        assistant
            .run(
                AssistantSlot::UserMessage,
                request(json!({"type": "message", "user": "U2", "channel": "D1", "ts": "1.1"})),
            )
            .await;

        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_should_save_changed_context_by_default() {
        let slack = Arc::new(FakeSlack::new(BOT));
        let store = Arc::new(MemoryThreadContextStore::new());
        let assistant = Assistant::new(slack, BOT).with_store(store.clone());

        let mut changed = started_event();
        changed["type"] = json!("assistant_thread_context_changed");
        changed["assistant_thread"]["context"]["channel_id"] = json!("C77");
        assistant
            .run(AssistantSlot::ThreadContextChanged, request(changed))
            .await;

        let saved = store
            .find(&AssistantThreadKey::new("D1", "1.0"))
            .await
            .expect("saved");
        assert_eq!(saved.channel_id.as_deref(), Some("C77"));
    }

    #[tokio::test]
    async fn test_should_contain_slot_handler_failure() {
        let slack = Arc::new(FakeSlack::new(BOT));
        let assistant = Assistant::new(slack, BOT)
            .bot_message(|_req| async { Err(anyhow::anyhow!("model unavailable")) });

        // Completes without panicking or propagating.
        assistant
            .run(
                AssistantSlot::BotMessage,
                request(json!({"type": "message", "user": "BOT1", "channel": "D1", "ts": "1.2"})),
            )
            .await;
    }

    #[tokio::test]
    async fn test_should_read_context_from_store_for_messages() {
        let slack = Arc::new(FakeSlack::new(BOT));
        let store = Arc::new(MemoryThreadContextStore::new());
        let key = AssistantThreadKey::new("D1", "1.0");
        let ctx: AssistantThreadContext =
            serde_json::from_value(json!({"channel_id": "C42"})).expect("ctx");
        store.save(&key, &ctx).await;

        let seen = Arc::new(std::sync::Mutex::new(None));
        let seen_in = seen.clone();
        let assistant = Assistant::new(slack, BOT)
            .with_store(store)
            .user_message(move |req| {
                let seen = seen_in.clone();
                async move {
                    let found = req.thread_context().await;
                    *seen.lock().expect("lock") = found;
                    Ok(())
                }
            });

        assistant
            .run(
                AssistantSlot::UserMessage,
                request(json!({
                    "type": "message", "user": "U2", "channel": "D1",
                    "ts": "1.3", "thread_ts": "1.0"
                })),
            )
            .await;

        assert_eq!(*seen.lock().expect("lock"), Some(ctx));
    }

    #[tokio::test]
    async fn test_should_use_utilities_against_thread() {
        let slack = Arc::new(FakeSlack::new(BOT));
        let assistant = Assistant::new(slack.clone(), BOT).user_message(|req| async move {
            req.set_status("is typing...").await?;
            req.set_title("Weekly report").await?;
            req.say("Here you go").await?;
            Ok(())
        });

        assistant
            .run(
                AssistantSlot::UserMessage,
                request(json!({
                    "type": "message", "user": "U2", "channel": "D1",
                    "ts": "1.3", "thread_ts": "1.0"
                })),
            )
            .await;

        let calls = slack.calls();
        assert!(matches!(&calls[0], SlackCall::Status(s) if s.thread_ts == "1.0"));
        assert!(matches!(&calls[1], SlackCall::Title(t) if t.title == "Weekly report"));
        assert!(
            matches!(&calls[2], SlackCall::Post(p) if p.metadata.is_none() && p.channel == "D1")
        );
    }
}
