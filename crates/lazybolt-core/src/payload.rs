//! Payload classification for inbound Slack request bodies.
//!
//! Every delivery is exactly one of nine shapes. Eight of them carry a `type`
//! tag; slash commands are the odd one out and are recognized by the
//! presence of `command` together with the absence of `type`. [`classify`]
//! turns an untyped JSON body into a [`Payload`] or rejects it with
//! [`CoreError::UnknownPayloadType`] / [`CoreError::MalformedPayload`].

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::CoreError;
use crate::event::InnerEvent;

/// Which of the nine payload shapes a body is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    BlockAction,
    BlockSuggestion,
    MessageShortcut,
    GlobalShortcut,
    EventsApi,
    ViewSubmission,
    ViewClosed,
    AppRateLimited,
    SlashCommand,
}

impl PayloadKind {
    /// Wire tag of the kind. Slash commands have no tag on the wire;
    /// `"slash_command"` is used for logging only.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BlockAction => "block_actions",
            Self::BlockSuggestion => "block_suggestion",
            Self::MessageShortcut => "message_action",
            Self::GlobalShortcut => "shortcut",
            Self::EventsApi => "event_callback",
            Self::ViewSubmission => "view_submission",
            Self::ViewClosed => "view_closed",
            Self::AppRateLimited => "app_rate_limited",
            Self::SlashCommand => "slash_command",
        }
    }

    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "block_actions" => Some(Self::BlockAction),
            "block_suggestion" => Some(Self::BlockSuggestion),
            "message_action" => Some(Self::MessageShortcut),
            "shortcut" => Some(Self::GlobalShortcut),
            "event_callback" => Some(Self::EventsApi),
            "view_submission" => Some(Self::ViewSubmission),
            "view_closed" => Some(Self::ViewClosed),
            "app_rate_limited" => Some(Self::AppRateLimited),
            _ => None,
        }
    }
}

impl std::fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified request body.
#[derive(Debug, Clone)]
pub enum Payload {
    BlockAction(BlockActionPayload),
    BlockSuggestion(BlockSuggestionPayload),
    MessageShortcut(MessageShortcutPayload),
    GlobalShortcut(GlobalShortcutPayload),
    EventsApi(EventEnvelope),
    ViewSubmission(ViewSubmissionPayload),
    ViewClosed(ViewClosedPayload),
    AppRateLimited(AppRateLimitedPayload),
    SlashCommand(SlashCommandPayload),
}

impl Payload {
    pub fn kind(&self) -> PayloadKind {
        match self {
            Self::BlockAction(_) => PayloadKind::BlockAction,
            Self::BlockSuggestion(_) => PayloadKind::BlockSuggestion,
            Self::MessageShortcut(_) => PayloadKind::MessageShortcut,
            Self::GlobalShortcut(_) => PayloadKind::GlobalShortcut,
            Self::EventsApi(_) => PayloadKind::EventsApi,
            Self::ViewSubmission(_) => PayloadKind::ViewSubmission,
            Self::ViewClosed(_) => PayloadKind::ViewClosed,
            Self::AppRateLimited(_) => PayloadKind::AppRateLimited,
            Self::SlashCommand(_) => PayloadKind::SlashCommand,
        }
    }

    /// Workspace id of the request, when the shape carries one.
    pub fn team_id(&self) -> Option<&str> {
        match self {
            Self::BlockAction(p) => p.identity.team_id(),
            Self::BlockSuggestion(p) => p.identity.team_id(),
            Self::MessageShortcut(p) => p.identity.team_id(),
            Self::GlobalShortcut(p) => p.identity.team_id(),
            Self::ViewSubmission(p) => p.identity.team_id(),
            Self::ViewClosed(p) => p.identity.team_id(),
            Self::EventsApi(p) => Some(&p.team_id),
            Self::AppRateLimited(p) => Some(&p.team_id),
            Self::SlashCommand(p) => Some(&p.team_id),
        }
    }

    pub fn enterprise_id(&self) -> Option<&str> {
        match self {
            Self::BlockAction(p) => p.identity.enterprise_id(),
            Self::BlockSuggestion(p) => p.identity.enterprise_id(),
            Self::MessageShortcut(p) => p.identity.enterprise_id(),
            Self::GlobalShortcut(p) => p.identity.enterprise_id(),
            Self::ViewSubmission(p) => p.identity.enterprise_id(),
            Self::ViewClosed(p) => p.identity.enterprise_id(),
            Self::EventsApi(p) => p.enterprise_id.as_deref(),
            Self::AppRateLimited(_) => None,
            Self::SlashCommand(p) => p.enterprise_id.as_deref(),
        }
    }

    /// Acting user. For events this is the inner event's author.
    pub fn user_id(&self) -> Option<&str> {
        match self {
            Self::BlockAction(p) => Some(&p.identity.user.id),
            Self::BlockSuggestion(p) => Some(&p.identity.user.id),
            Self::MessageShortcut(p) => Some(&p.identity.user.id),
            Self::GlobalShortcut(p) => Some(&p.identity.user.id),
            Self::ViewSubmission(p) => Some(&p.identity.user.id),
            Self::ViewClosed(p) => Some(&p.identity.user.id),
            Self::EventsApi(p) => p.event.user.as_deref(),
            Self::AppRateLimited(_) => None,
            Self::SlashCommand(p) => Some(&p.user_id),
        }
    }

    /// Legacy verification token, if the platform still sends one.
    pub fn token(&self) -> Option<&str> {
        match self {
            Self::BlockAction(p) => p.identity.token.as_deref(),
            Self::BlockSuggestion(p) => p.identity.token.as_deref(),
            Self::MessageShortcut(p) => p.identity.token.as_deref(),
            Self::GlobalShortcut(p) => p.identity.token.as_deref(),
            Self::ViewSubmission(p) => p.identity.token.as_deref(),
            Self::ViewClosed(p) => p.identity.token.as_deref(),
            Self::EventsApi(p) => p.token.as_deref(),
            Self::AppRateLimited(p) => p.token.as_deref(),
            Self::SlashCommand(p) => p.token.as_deref(),
        }
    }

    /// The inner event when this is an Events API envelope.
    pub fn event(&self) -> Option<&InnerEvent> {
        match self {
            Self::EventsApi(envelope) => Some(&envelope.event),
            _ => None,
        }
    }
}

/// Classifies a decoded request body.
///
/// # Errors
///
/// Returns [`CoreError::UnknownPayloadType`] when the `type` tag is missing
/// (and the body is not a slash command) or outside the vocabulary, and
/// [`CoreError::MalformedPayload`] when the tag is known but the variant's
/// required fields are absent.
///
/// # Examples
///
/// ```
/// use lazybolt_core::payload::{classify, PayloadKind};
///
/// let body = serde_json::json!({
///     "command": "/todo",
///     "text": "buy milk",
///     "team_id": "T1",
///     "user_id": "U1",
///     "channel_id": "C1",
///     "response_url": "https://hooks.slack.com/commands/1",
///     "trigger_id": "13345224609.738474920.8088930838d88f008e0"
/// });
/// let payload = classify(&body).unwrap();
/// assert_eq!(payload.kind(), PayloadKind::SlashCommand);
/// ```
pub fn classify(body: &Value) -> Result<Payload, CoreError> {
    let tag = body.get("type").and_then(Value::as_str);
    let has_type = body.get("type").is_some();

    if !has_type && body.get("command").is_some() {
        return decode(body, PayloadKind::SlashCommand).map(Payload::SlashCommand);
    }

    let Some(tag) = tag else {
        return Err(CoreError::UnknownPayloadType(
            if has_type { "<non-string>" } else { "<missing>" }.to_string(),
        ));
    };
    let kind =
        PayloadKind::from_tag(tag).ok_or_else(|| CoreError::UnknownPayloadType(tag.to_string()))?;
    debug!(kind = %kind, "Classified payload");

    Ok(match kind {
        PayloadKind::BlockAction => Payload::BlockAction(decode(body, kind)?),
        PayloadKind::BlockSuggestion => Payload::BlockSuggestion(decode(body, kind)?),
        PayloadKind::MessageShortcut => Payload::MessageShortcut(decode(body, kind)?),
        PayloadKind::GlobalShortcut => Payload::GlobalShortcut(decode(body, kind)?),
        PayloadKind::EventsApi => Payload::EventsApi(decode(body, kind)?),
        PayloadKind::ViewSubmission => Payload::ViewSubmission(decode(body, kind)?),
        PayloadKind::ViewClosed => Payload::ViewClosed(decode(body, kind)?),
        PayloadKind::AppRateLimited => Payload::AppRateLimited(decode(body, kind)?),
        PayloadKind::SlashCommand => Payload::SlashCommand(decode(body, kind)?),
    })
}

fn decode<T: DeserializeOwned>(body: &Value, kind: PayloadKind) -> Result<T, CoreError> {
    T::deserialize(body).map_err(|e| CoreError::MalformedPayload {
        variant: kind.as_str(),
        reason: e.to_string(),
    })
}

// ── Shared references ────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct TeamRef {
    pub id: String,
    #[serde(default)]
    pub domain: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EnterpriseRef {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserRef {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub team_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelRef {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// Identity fields shared by every interactive payload.
///
/// `team` is null for some org-wide installs, and `token` is the legacy
/// verification token.
#[derive(Debug, Clone, Deserialize)]
pub struct InteractiveIdentity {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub team: Option<TeamRef>,
    #[serde(default)]
    pub enterprise: Option<EnterpriseRef>,
    pub user: UserRef,
    #[serde(default)]
    pub api_app_id: Option<String>,
}

impl InteractiveIdentity {
    fn team_id(&self) -> Option<&str> {
        self.team
            .as_ref()
            .map(|t| t.id.as_str())
            .or(self.user.team_id.as_deref())
    }

    fn enterprise_id(&self) -> Option<&str> {
        self.enterprise.as_ref().map(|e| e.id.as_str())
    }
}

/// A modal or home tab view record.
#[derive(Debug, Clone, Deserialize)]
pub struct View {
    pub id: String,
    #[serde(default)]
    pub callback_id: String,
    #[serde(default, rename = "type")]
    pub view_type: Option<String>,
    #[serde(default)]
    pub private_metadata: Option<String>,
    #[serde(default)]
    pub state: Option<Value>,
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

// ── Variants ─────────────────────────────────────────────────────

/// One element of a `block_actions` payload's `actions` list.
#[derive(Debug, Clone, Deserialize)]
pub struct BlockAction {
    pub action_id: String,
    #[serde(default)]
    pub block_id: Option<String>,
    #[serde(default, rename = "type")]
    pub action_type: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub action_ts: Option<String>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlockActionPayload {
    #[serde(flatten)]
    pub identity: InteractiveIdentity,
    pub actions: Vec<BlockAction>,
    #[serde(default)]
    pub trigger_id: Option<String>,
    #[serde(default)]
    pub response_url: Option<String>,
    #[serde(default)]
    pub container: Option<Value>,
    #[serde(default)]
    pub channel: Option<ChannelRef>,
    #[serde(default)]
    pub message: Option<Value>,
    #[serde(default)]
    pub view: Option<View>,
    #[serde(default)]
    pub state: Option<Value>,
}

/// An external select asking for options.
#[derive(Debug, Clone, Deserialize)]
pub struct BlockSuggestionPayload {
    #[serde(flatten)]
    pub identity: InteractiveIdentity,
    pub action_id: String,
    pub block_id: String,
    pub value: String,
    #[serde(default)]
    pub container: Option<Value>,
    #[serde(default)]
    pub channel: Option<ChannelRef>,
    #[serde(default)]
    pub view: Option<View>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageShortcutPayload {
    #[serde(flatten)]
    pub identity: InteractiveIdentity,
    pub callback_id: String,
    pub trigger_id: String,
    pub message_ts: String,
    pub message: Value,
    pub channel: ChannelRef,
    pub response_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GlobalShortcutPayload {
    #[serde(flatten)]
    pub identity: InteractiveIdentity,
    pub callback_id: String,
    pub trigger_id: String,
    #[serde(default)]
    pub action_ts: Option<String>,
}

/// An Events API `event_callback` envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct EventEnvelope {
    #[serde(default)]
    pub token: Option<String>,
    pub team_id: String,
    #[serde(default)]
    pub enterprise_id: Option<String>,
    pub api_app_id: String,
    pub event: InnerEvent,
    pub event_id: String,
    pub event_time: i64,
    #[serde(default)]
    pub authorizations: Vec<Authorization>,
    #[serde(default)]
    pub is_ext_shared_channel: Option<bool>,
    #[serde(default)]
    pub event_context: Option<String>,
}

/// One installation the event is visible to.
#[derive(Debug, Clone, Deserialize)]
pub struct Authorization {
    #[serde(default)]
    pub enterprise_id: Option<String>,
    #[serde(default)]
    pub team_id: Option<String>,
    pub user_id: String,
    #[serde(default)]
    pub is_bot: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ViewSubmissionPayload {
    #[serde(flatten)]
    pub identity: InteractiveIdentity,
    pub view: View,
    #[serde(default)]
    pub trigger_id: Option<String>,
    #[serde(default)]
    pub response_urls: Vec<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ViewClosedPayload {
    #[serde(flatten)]
    pub identity: InteractiveIdentity,
    pub view: View,
    #[serde(default)]
    pub is_cleared: bool,
}

/// Sent when the app exceeded its Events API delivery budget.
#[derive(Debug, Clone, Deserialize)]
pub struct AppRateLimitedPayload {
    #[serde(default)]
    pub token: Option<String>,
    pub team_id: String,
    pub minute_rate_limited: i64,
    pub api_app_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SlashCommandPayload {
    #[serde(default)]
    pub token: Option<String>,
    pub command: String,
    #[serde(default)]
    pub text: String,
    pub team_id: String,
    #[serde(default)]
    pub team_domain: Option<String>,
    #[serde(default)]
    pub enterprise_id: Option<String>,
    pub user_id: String,
    #[serde(default)]
    pub user_name: Option<String>,
    pub channel_id: String,
    #[serde(default)]
    pub channel_name: Option<String>,
    pub response_url: String,
    pub trigger_id: String,
    #[serde(default)]
    pub api_app_id: Option<String>,
}
