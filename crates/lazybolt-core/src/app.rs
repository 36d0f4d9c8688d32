//! The application: handler registry and dispatcher.
//!
//! [`App`] owns an append-only table of [`HandlerEntry`] rows plus an
//! optional [`Assistant`]. A delivery goes through two phases:
//!
//! 1. [`App::process`] classifies the body, resolves matching entries in
//!    registration order and awaits the first ack handler. Nothing lazy has
//!    started when it returns.
//! 2. [`Processed::run_lazy`] schedules the remaining handlers on the app's
//!    task tracker. Adapters call it once the ack has been sent.
//!
//! [`App::dispatch`] runs both phases back to back for callers that return
//! the ack body from the same function.

use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::Value;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, info_span, instrument, warn};

use crate::assistant::{Assistant, AssistantSlot};
use crate::error::CoreError;
use crate::handler::{
    AckFn, AckMode, AckResponse, Handler, HandlerEntry, HandlerKey, LazyFn, SubtypeFilter, ack_fn,
    invoke_isolated, lazy_fn,
};
use crate::pattern::{ActionConstraints, Pattern};
use crate::payload::classify;
use crate::request::{RequestContext, SlackRequest};
use crate::retry::RetryContext;
use crate::slack_api::SlackApi;

/// Static settings of an [`App`].
#[derive(Debug, Clone, Default)]
pub struct AppSettings {
    /// This app's bot user. When unset, events fall back to the bot
    /// authorization carried in the envelope.
    pub bot_user_id: Option<String>,
}

/// Handler registry and dispatcher.
///
/// Registration is a startup-phase operation: it takes `&mut self`, while
/// dispatch only needs `&self`, so a fully registered app can be shared
/// behind an `Arc`.
///
/// # Examples
///
/// ```
/// use lazybolt_core::{AckResponse, App, RetryContext};
///
/// # async fn example() -> Result<(), lazybolt_core::CoreError> {
/// let mut app = App::new();
/// app.command("/echo", |req| async move {
///     let text = req.body["text"].as_str().unwrap_or_default().to_string();
///     Ok(AckResponse::text(text))
/// });
///
/// let body = serde_json::json!({
///     "command": "/echo",
///     "text": "hi",
///     "team_id": "T1",
///     "user_id": "U1",
///     "channel_id": "C1",
///     "response_url": "https://hooks.slack.com/commands/1",
///     "trigger_id": "1.2.3"
/// });
/// let ack = app.dispatch(body, RetryContext::first_attempt()).await?;
/// assert_eq!(ack, AckResponse::text("hi"));
/// # Ok(())
/// # }
/// ```
pub struct App {
    entries: Vec<HandlerEntry>,
    assistant: Option<Arc<Assistant>>,
    settings: AppSettings,
    client: Option<Arc<dyn SlackApi>>,
    tracker: TaskTracker,
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("entries", &self.entries)
            .field("assistant", &self.assistant)
            .field("settings", &self.settings)
            .field("client", &self.client.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

impl App {
    pub fn new() -> Self {
        Self::with_settings(AppSettings::default())
    }

    pub fn with_settings(settings: AppSettings) -> Self {
        Self {
            entries: Vec::new(),
            assistant: None,
            settings,
            client: None,
            tracker: TaskTracker::new(),
        }
    }

    /// Sets the Slack client exposed to handlers through
    /// [`SlackRequest::say`] and [`SlackRequest::client`].
    pub fn with_client(mut self, client: Arc<dyn SlackApi>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn settings(&self) -> &AppSettings {
        &self.settings
    }

    /// Registered entries in registration order.
    pub fn entries(&self) -> &[HandlerEntry] {
        &self.entries
    }

    /// Appends one entry. Entries are never removed.
    pub fn register(&mut self, key: HandlerKey, handler: Handler) -> &mut Self {
        debug!(key = %key, mode = handler.mode().as_str(), "Registered handler");
        self.entries.push(HandlerEntry { key, handler });
        self
    }

    /// Installs the assistant coordinator, replacing any previous one.
    pub fn assistant(&mut self, assistant: Assistant) -> &mut Self {
        if self.assistant.is_some() {
            debug!("Replacing previously installed assistant");
        }
        self.assistant = Some(Arc::new(assistant));
        self
    }

    fn start_with(&mut self, key: HandlerKey, handler: Handler) -> Registration<'_> {
        self.register(key.clone(), handler);
        Registration { app: self, key }
    }

    /// Slash command. The ack handler's return value is the response body.
    pub fn command<F, Fut>(&mut self, command: impl Into<Pattern>, ack: F) -> Registration<'_>
    where
        F: Fn(Arc<SlackRequest>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<AckResponse>> + Send + 'static,
    {
        self.start_with(HandlerKey::Command(command.into()), Handler::Ack(ack_fn(ack)))
    }

    /// Block action, matched on the first action's `action_id` (and
    /// optionally `block_id`).
    pub fn action<F, Fut>(
        &mut self,
        constraints: impl Into<ActionConstraints>,
        ack: F,
    ) -> Registration<'_>
    where
        F: Fn(Arc<SlackRequest>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<AckResponse>> + Send + 'static,
    {
        self.start_with(HandlerKey::Action(constraints.into()), Handler::Ack(ack_fn(ack)))
    }

    /// Block suggestion; the ack body carries the options list.
    pub fn options<F, Fut>(
        &mut self,
        constraints: impl Into<ActionConstraints>,
        ack: F,
    ) -> Registration<'_>
    where
        F: Fn(Arc<SlackRequest>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<AckResponse>> + Send + 'static,
    {
        self.start_with(HandlerKey::Options(constraints.into()), Handler::Ack(ack_fn(ack)))
    }

    /// Global shortcut by `callback_id`.
    pub fn shortcut<F, Fut>(&mut self, callback_id: impl Into<Pattern>, ack: F) -> Registration<'_>
    where
        F: Fn(Arc<SlackRequest>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<AckResponse>> + Send + 'static,
    {
        self.start_with(
            HandlerKey::GlobalShortcut(callback_id.into()),
            Handler::Ack(ack_fn(ack)),
        )
    }

    pub fn message_shortcut<F, Fut>(
        &mut self,
        callback_id: impl Into<Pattern>,
        ack: F,
    ) -> Registration<'_>
    where
        F: Fn(Arc<SlackRequest>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<AckResponse>> + Send + 'static,
    {
        self.start_with(
            HandlerKey::MessageShortcut(callback_id.into()),
            Handler::Ack(ack_fn(ack)),
        )
    }

    /// View submission; the ack body may carry a `response_action`.
    pub fn view_submission<F, Fut>(
        &mut self,
        callback_id: impl Into<Pattern>,
        ack: F,
    ) -> Registration<'_>
    where
        F: Fn(Arc<SlackRequest>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<AckResponse>> + Send + 'static,
    {
        self.start_with(
            HandlerKey::ViewSubmission(callback_id.into()),
            Handler::Ack(ack_fn(ack)),
        )
    }

    pub fn view_closed<F, Fut>(&mut self, callback_id: impl Into<Pattern>, lazy: F) -> Registration<'_>
    where
        F: Fn(Arc<SlackRequest>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.start_with(
            HandlerKey::ViewClosed(callback_id.into()),
            Handler::Lazy(lazy_fn(lazy)),
        )
    }

    pub fn app_rate_limited<F, Fut>(&mut self, lazy: F) -> Registration<'_>
    where
        F: Fn(Arc<SlackRequest>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.start_with(HandlerKey::AppRateLimited, Handler::Lazy(lazy_fn(lazy)))
    }

    /// Any Events API event of `event_type`, regardless of subtype.
    pub fn event<F, Fut>(&mut self, event_type: impl Into<String>, lazy: F) -> Registration<'_>
    where
        F: Fn(Arc<SlackRequest>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.start_with(HandlerKey::event(event_type), Handler::Lazy(lazy_fn(lazy)))
    }

    /// Posted `message` events whose text contains (or matches) `pattern`.
    /// Edits, deletions and other structural subtypes never match.
    pub fn message<F, Fut>(&mut self, pattern: impl Into<Pattern>, lazy: F) -> Registration<'_>
    where
        F: Fn(Arc<SlackRequest>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let key = HandlerKey::Event {
            event_type: "message".to_string(),
            subtype: SubtypeFilter::PostedMessage,
            text: Some(pattern.into()),
        };
        self.start_with(key, Handler::Lazy(lazy_fn(lazy)))
    }

    /// Classifies `body`, resolves handlers and produces the ack.
    ///
    /// The first matching ack handler decides the ack body. If it fails the
    /// ack falls back to [`AckResponse::Empty`]. Further ack handlers that
    /// match are demoted to lazy work and their return values discarded.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::UnknownPayloadType` or
    /// `CoreError::MalformedPayload` when the body cannot be classified.
    /// Handler failures never surface here.
    #[instrument(skip_all, fields(retry_num = retry.retry_num))]
    pub async fn process(&self, body: Value, retry: RetryContext) -> Result<Processed, CoreError> {
        let payload = match classify(&body) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Rejected payload");
                return Err(e);
            }
        };
        let kind = payload.kind();

        let matched: Vec<HandlerEntry> = self
            .entries
            .iter()
            .filter(|entry| entry.key.matches(&payload))
            .cloned()
            .collect();
        let assistant = match (&self.assistant, payload.event()) {
            (Some(assistant), Some(event)) => assistant
                .route(event)
                .map(|slot| (Arc::clone(assistant), slot)),
            _ => None,
        };

        let context = RequestContext::from_payload(&payload, self.settings.bot_user_id.as_deref());
        let request = Arc::new(SlackRequest::new(
            body,
            payload,
            retry,
            context,
            self.client.clone(),
        ));
        debug!(
            kind = %kind,
            matched = matched.len(),
            assistant_slot = assistant.as_ref().map(|(_, slot)| slot.as_str()),
            retry_reason = request.retry.retry_reason.as_ref().map(|r| r.as_str()),
            "Resolved handlers"
        );

        let mut ack = None;
        let mut lazy = Vec::new();
        for entry in matched {
            let key = entry.key.to_string();
            match entry.handler {
                Handler::Ack(f) if ack.is_none() => {
                    let req = Arc::clone(&request);
                    let response =
                        invoke_isolated(&key, AckMode::Immediate.as_str(), &request.retry, move || {
                            f(req)
                        })
                        .await
                        .unwrap_or_else(|_| {
                            warn!(handler = %key, "Ack handler failed, acknowledging with empty body");
                            AckResponse::Empty
                        });
                    ack = Some(response);
                }
                Handler::Ack(f) => {
                    debug!(handler = %key, "Ack already decided, running handler lazily");
                    lazy.push((key, demote(f)));
                }
                Handler::Lazy(f) => lazy.push((key, f)),
            }
        }

        Ok(Processed {
            ack: ack.unwrap_or_default(),
            request,
            lazy,
            assistant,
            tracker: self.tracker.clone(),
        })
    }

    /// Processes `body`, schedules lazy work and returns the ack.
    ///
    /// # Errors
    ///
    /// Same as [`process`](Self::process).
    pub async fn dispatch(&self, body: Value, retry: RetryContext) -> Result<AckResponse, CoreError> {
        let processed = self.process(body, retry).await?;
        let ack = processed.ack().clone();
        processed.run_lazy();
        Ok(ack)
    }

    /// Waits for every lazy task scheduled so far. New work may be scheduled
    /// again once this returns.
    pub async fn wait_for_lazy(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Number of lazy tasks still running.
    pub fn pending_lazy(&self) -> usize {
        self.tracker.len()
    }
}

/// Wraps an ack handler so it can run after the ack decision.
fn demote(f: AckFn) -> LazyFn {
    Arc::new(move |req| {
        let fut = f(req);
        async move { fut.await.map(drop) }.boxed()
    })
}

/// Chains further lazy handlers onto the key of the previous registration.
///
/// # Examples
///
/// ```
/// use lazybolt_core::{AckResponse, App};
///
/// let mut app = App::new();
/// app.command("/deploy", |_req| async { Ok(AckResponse::text("Deploying...")) })
///     .lazy(|_req| async { Ok(()) })
///     .lazy(|_req| async { Ok(()) });
/// assert_eq!(app.entries().len(), 3);
/// ```
pub struct Registration<'a> {
    app: &'a mut App,
    key: HandlerKey,
}

impl Registration<'_> {
    /// Appends a lazy handler for the same key.
    pub fn lazy<F, Fut>(mut self, lazy: F) -> Self
    where
        F: Fn(Arc<SlackRequest>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.app.register(self.key.clone(), Handler::Lazy(lazy_fn(lazy)));
        self
    }

    pub fn key(&self) -> &HandlerKey {
        &self.key
    }
}

/// Outcome of [`App::process`]: the ack plus the lazy work still to run.
pub struct Processed {
    ack: AckResponse,
    request: Arc<SlackRequest>,
    lazy: Vec<(String, LazyFn)>,
    assistant: Option<(Arc<Assistant>, AssistantSlot)>,
    tracker: TaskTracker,
}

impl std::fmt::Debug for Processed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let lazy: Vec<&str> = self.lazy.iter().map(|(key, _)| key.as_str()).collect();
        f.debug_struct("Processed")
            .field("ack", &self.ack)
            .field("lazy", &lazy)
            .field("assistant", &self.assistant.as_ref().map(|(_, slot)| slot))
            .finish_non_exhaustive()
    }
}

impl Processed {
    pub fn ack(&self) -> &AckResponse {
        &self.ack
    }

    pub fn request(&self) -> &Arc<SlackRequest> {
        &self.request
    }

    /// Lazy handlers waiting to run, not counting the assistant slot.
    pub fn lazy_len(&self) -> usize {
        self.lazy.len()
    }

    /// Schedules the lazy work.
    ///
    /// Registry handlers run one after another in registration order inside
    /// one task, so a failure in one never stops the next. The assistant slot
    /// runs in its own task with no ordering relative to them.
    pub fn run_lazy(self) {
        let Self {
            request,
            lazy,
            assistant,
            tracker,
            ..
        } = self;
        let kind = request.payload.kind();

        if !lazy.is_empty() {
            let request = Arc::clone(&request);
            tracker.spawn(
                async move {
                    for (key, f) in lazy {
                        let req = Arc::clone(&request);
                        let _ = invoke_isolated(&key, AckMode::Lazy.as_str(), &request.retry, move || {
                            f(req)
                        })
                        .await;
                    }
                }
                .instrument(info_span!("lazy", kind = %kind)),
            );
        }

        if let Some((assistant, slot)) = assistant {
            tracker.spawn(
                async move { assistant.run(slot, request).await }
                    .instrument(info_span!("assistant", kind = %kind)),
            );
        }
    }
}
