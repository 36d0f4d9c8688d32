//! Handler registration entries and the isolation boundary around them.
//!
//! A [`HandlerEntry`] pairs a [`HandlerKey`] with one [`Handler`], either an
//! ack handler (awaited before the response is sent, its return value is the
//! response body) or a lazy handler (run after the ack). Every invocation
//! goes through [`invoke_isolated`], which turns returned errors and panics
//! into a logged [`CoreError::HandlerFailure`] so nothing escapes to the ack
//! path or to sibling handlers.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;
use tracing::error;

use crate::error::CoreError;
use crate::event::{InnerEvent, is_posted_message};
use crate::pattern::{ActionConstraints, Pattern};
use crate::payload::Payload;
use crate::request::SlackRequest;
use crate::retry::RetryContext;

/// Body returned to Slack within the ack deadline.
///
/// # Examples
///
/// ```
/// use lazybolt_core::AckResponse;
///
/// assert_eq!(AckResponse::Empty.into_body(), None);
/// assert_eq!(
///     AckResponse::text("Got it").into_body(),
///     Some(serde_json::json!({"text": "Got it"}))
/// );
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub enum AckResponse {
    /// Plain `200` with no body.
    #[default]
    Empty,
    /// A message text, sent as `{"text": ...}`.
    Text(String),
    /// Any JSON body (options lists, `response_action`, blocks).
    Json(Value),
}

impl AckResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Serialized response body, `None` for an empty ack.
    pub fn into_body(self) -> Option<Value> {
        match self {
            Self::Empty => None,
            Self::Text(text) => Some(serde_json::json!({ "text": text })),
            Self::Json(value) => Some(value),
        }
    }
}

/// Ack handler: produces the response body.
pub type AckFn =
    Arc<dyn Fn(Arc<SlackRequest>) -> BoxFuture<'static, anyhow::Result<AckResponse>> + Send + Sync>;

/// Lazy handler: runs after the ack decision.
pub type LazyFn =
    Arc<dyn Fn(Arc<SlackRequest>) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Wraps an async closure as an [`AckFn`].
pub fn ack_fn<F, Fut>(f: F) -> AckFn
where
    F: Fn(Arc<SlackRequest>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<AckResponse>> + Send + 'static,
{
    Arc::new(move |req| f(req).boxed())
}

/// Wraps an async closure as a [`LazyFn`].
pub fn lazy_fn<F, Fut>(f: F) -> LazyFn
where
    F: Fn(Arc<SlackRequest>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |req| f(req).boxed())
}

#[derive(Clone)]
pub enum Handler {
    Ack(AckFn),
    Lazy(LazyFn),
}

/// When a handler runs relative to the ack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckMode {
    Immediate,
    Lazy,
}

impl AckMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Immediate => "ack",
            Self::Lazy => "lazy",
        }
    }
}

impl Handler {
    pub fn mode(&self) -> AckMode {
        match self {
            Self::Ack(_) => AckMode::Immediate,
            Self::Lazy(_) => AckMode::Lazy,
        }
    }
}

/// Constraint on an inner event's subtype.
#[derive(Debug, Clone, Default)]
pub enum SubtypeFilter {
    /// Any subtype or none.
    #[default]
    Any,
    /// Only events without a subtype.
    Absent,
    /// Exactly this subtype.
    Is(String),
    /// Only posted messages, see [`is_posted_message`].
    PostedMessage,
}

impl SubtypeFilter {
    pub fn matches(&self, event: &InnerEvent) -> bool {
        match self {
            Self::Any => true,
            Self::Absent => event.subtype.is_none(),
            Self::Is(subtype) => event.subtype.as_deref() == Some(subtype.as_str()),
            Self::PostedMessage => is_posted_message(event),
        }
    }
}

/// What a handler is registered for. One variant per payload shape.
#[derive(Debug, Clone)]
pub enum HandlerKey {
    /// `block_actions`, matched on the first action.
    Action(ActionConstraints),
    /// `block_suggestion`.
    Options(ActionConstraints),
    MessageShortcut(Pattern),
    GlobalShortcut(Pattern),
    Event {
        event_type: String,
        subtype: SubtypeFilter,
        /// Text pattern; events without text never match when set.
        text: Option<Pattern>,
    },
    ViewSubmission(Pattern),
    ViewClosed(Pattern),
    AppRateLimited,
    Command(Pattern),
}

impl HandlerKey {
    /// Any event of `event_type`, regardless of subtype.
    pub fn event(event_type: impl Into<String>) -> Self {
        Self::Event {
            event_type: event_type.into(),
            subtype: SubtypeFilter::Any,
            text: None,
        }
    }

    pub fn matches(&self, payload: &Payload) -> bool {
        match (self, payload) {
            (Self::Action(c), Payload::BlockAction(p)) => p
                .actions
                .first()
                .is_some_and(|a| c.matches(&a.action_id, a.block_id.as_deref())),
            (Self::Options(c), Payload::BlockSuggestion(p)) => {
                c.matches(&p.action_id, Some(&p.block_id))
            }
            (Self::MessageShortcut(pattern), Payload::MessageShortcut(p)) => {
                pattern.matches(&p.callback_id)
            }
            (Self::GlobalShortcut(pattern), Payload::GlobalShortcut(p)) => {
                pattern.matches(&p.callback_id)
            }
            (
                Self::Event {
                    event_type,
                    subtype,
                    text,
                },
                Payload::EventsApi(envelope),
            ) => {
                let event = &envelope.event;
                event.event_type == *event_type
                    && subtype.matches(event)
                    && text.as_ref().is_none_or(|pattern| {
                        event
                            .text
                            .as_deref()
                            .is_some_and(|t| pattern.matches_within(t))
                    })
            }
            (Self::ViewSubmission(pattern), Payload::ViewSubmission(p)) => {
                pattern.matches(&p.view.callback_id)
            }
            (Self::ViewClosed(pattern), Payload::ViewClosed(p)) => {
                pattern.matches(&p.view.callback_id)
            }
            (Self::AppRateLimited, Payload::AppRateLimited(_)) => true,
            (Self::Command(pattern), Payload::SlashCommand(p)) => pattern.matches(&p.command),
            _ => false,
        }
    }
}

impl std::fmt::Display for HandlerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Action(c) => write!(f, "action:{c}"),
            Self::Options(c) => write!(f, "options:{c}"),
            Self::MessageShortcut(p) => write!(f, "message_shortcut:{p}"),
            Self::GlobalShortcut(p) => write!(f, "shortcut:{p}"),
            Self::Event {
                event_type, text, ..
            } => match text {
                Some(text) => write!(f, "event:{event_type}:{text}"),
                None => write!(f, "event:{event_type}"),
            },
            Self::ViewSubmission(p) => write!(f, "view_submission:{p}"),
            Self::ViewClosed(p) => write!(f, "view_closed:{p}"),
            Self::AppRateLimited => f.write_str("app_rate_limited"),
            Self::Command(p) => write!(f, "command:{p}"),
        }
    }
}

/// One row of the registry. Entries are never removed once registered.
#[derive(Clone)]
pub struct HandlerEntry {
    pub key: HandlerKey,
    pub handler: Handler,
}

impl std::fmt::Debug for HandlerEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerEntry")
            .field("key", &self.key.to_string())
            .field("mode", &self.handler.mode())
            .finish()
    }
}

/// Runs a handler behind an error and panic boundary.
///
/// Both the call that builds the future and the future itself are guarded.
/// Failures are logged with the handler key, the mode label and the retry
/// context, then returned as [`CoreError::HandlerFailure`] for the caller to
/// continue past.
pub(crate) async fn invoke_isolated<T, F>(
    key: &str,
    mode: &str,
    retry: &RetryContext,
    start: F,
) -> Result<T, CoreError>
where
    F: FnOnce() -> BoxFuture<'static, anyhow::Result<T>>,
{
    let outcome = match std::panic::catch_unwind(AssertUnwindSafe(start)) {
        Ok(fut) => AssertUnwindSafe(fut).catch_unwind().await,
        Err(panic) => Err(panic),
    };

    let message = match outcome {
        Ok(Ok(value)) => return Ok(value),
        Ok(Err(e)) => {
            error!(
                handler = key,
                mode,
                retry_num = retry.retry_num,
                error = ?e,
                "Handler failed"
            );
            format!("{e:#}")
        }
        Err(panic) => {
            let panic_msg = panic
                .downcast_ref::<String>()
                .map(String::as_str)
                .or_else(|| panic.downcast_ref::<&str>().copied())
                .unwrap_or("unknown panic")
                .to_string();
            error!(
                handler = key,
                mode,
                retry_num = retry.retry_num,
                error = panic_msg,
                "Handler panicked"
            );
            format!("panicked: {panic_msg}")
        }
    };

    Err(CoreError::HandlerFailure {
        key: key.to_string(),
        message,
    })
}
