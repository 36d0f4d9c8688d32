//! Inner events of Events API envelopes and the subtype predicates over them.
//!
//! An `event_callback` payload wraps an [`InnerEvent`]. Message events carry an
//! optional `subtype`; only a handful of subtypes describe a message that was
//! actually sent, the rest are structural changes (edits, deletes, joins).
//! The predicates here are pure and can be called from handlers directly.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The event wrapped by an `event_callback` envelope.
///
/// Common fields are typed; everything else stays in [`fields`](Self::fields).
///
/// # Examples
///
/// ```
/// use lazybolt_core::event::InnerEvent;
///
/// let event: InnerEvent = serde_json::from_value(serde_json::json!({
///     "type": "message",
///     "channel": "D123",
///     "user": "U1",
///     "text": "hello",
///     "ts": "1700000000.000100"
/// })).unwrap();
/// assert_eq!(event.event_type, "message");
/// assert!(event.subtype.is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InnerEvent {
    /// Event type such as `message` or `app_mention`.
    #[serde(rename = "type")]
    pub event_type: String,

    /// Raw subtype; see [`subtype`](Self::subtype) for the typed view.
    #[serde(default, rename = "subtype", skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,

    /// `im`, `channel`, `group` or `mpim` for message events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_ts: Option<String>,

    /// Every other field of the event, verbatim.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// Known message subtypes.
///
/// Anything outside the list becomes [`Unrecognized`](Self::Unrecognized),
/// which never satisfies a special predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventSubtype {
    BotMessage,
    FileShare,
    ThreadBroadcast,
    MeMessage,
    MessageChanged,
    MessageDeleted,
    MessageReplied,
    ChannelJoin,
    ChannelLeave,
    ChannelTopic,
    ChannelPurpose,
    ChannelName,
    ChannelArchive,
    ChannelUnarchive,
    ChannelPostingPermissions,
    GroupJoin,
    GroupLeave,
    GroupTopic,
    GroupPurpose,
    GroupName,
    GroupArchive,
    GroupUnarchive,
    EkmAccessDenied,
    ReminderAdd,
    AssistantAppThread,
    /// A subtype this crate does not know about.
    Unrecognized(String),
}

impl EventSubtype {
    /// Maps a wire subtype onto the closed set.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "bot_message" => Self::BotMessage,
            "file_share" => Self::FileShare,
            "thread_broadcast" => Self::ThreadBroadcast,
            "me_message" => Self::MeMessage,
            "message_changed" => Self::MessageChanged,
            "message_deleted" => Self::MessageDeleted,
            "message_replied" => Self::MessageReplied,
            "channel_join" => Self::ChannelJoin,
            "channel_leave" => Self::ChannelLeave,
            "channel_topic" => Self::ChannelTopic,
            "channel_purpose" => Self::ChannelPurpose,
            "channel_name" => Self::ChannelName,
            "channel_archive" => Self::ChannelArchive,
            "channel_unarchive" => Self::ChannelUnarchive,
            "channel_posting_permissions" => Self::ChannelPostingPermissions,
            "group_join" => Self::GroupJoin,
            "group_leave" => Self::GroupLeave,
            "group_topic" => Self::GroupTopic,
            "group_purpose" => Self::GroupPurpose,
            "group_name" => Self::GroupName,
            "group_archive" => Self::GroupArchive,
            "group_unarchive" => Self::GroupUnarchive,
            "ekm_access_denied" => Self::EkmAccessDenied,
            "reminder_add" => Self::ReminderAdd,
            "assistant_app_thread" => Self::AssistantAppThread,
            other => Self::Unrecognized(other.to_string()),
        }
    }
}

impl InnerEvent {
    /// Typed view of the subtype, `None` when the event has none.
    pub fn subtype(&self) -> Option<EventSubtype> {
        self.subtype.as_deref().map(EventSubtype::parse)
    }

    /// Returns a string field from [`fields`](Self::fields).
    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }
}

/// Whether the event is a message that was actually posted.
///
/// True for message events with no subtype or with `bot_message`,
/// `file_share` or `thread_broadcast`. Edits, deletes, joins and unknown
/// subtypes are structural and return false.
///
/// # Examples
///
/// ```
/// use lazybolt_core::event::{is_posted_message, InnerEvent};
///
/// let edit: InnerEvent = serde_json::from_value(serde_json::json!({
///     "type": "message", "subtype": "message_changed"
/// })).unwrap();
/// assert!(!is_posted_message(&edit));
/// ```
pub fn is_posted_message(event: &InnerEvent) -> bool {
    if event.event_type != "message" {
        return false;
    }
    matches!(
        event.subtype(),
        None | Some(EventSubtype::BotMessage)
            | Some(EventSubtype::FileShare)
            | Some(EventSubtype::ThreadBroadcast)
    )
}

/// Whether the event is a custom step `function_executed` event.
pub fn is_function_executed(event: &InnerEvent) -> bool {
    event.event_type == "function_executed"
}
