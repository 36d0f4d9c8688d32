//! Socket Mode frame parsing.
//!
//! Slack Socket Mode delivers system frames (`hello`, `disconnect`) and
//! envelopes over WebSocket. Envelopes wrap exactly the body an HTTP
//! endpoint would receive, so their `payload` goes straight into
//! [`App::process`](lazybolt_core::App::process). Each envelope must be
//! acknowledged by echoing its `envelope_id`, optionally with a response
//! payload.

use lazybolt_core::{AckResponse, RetryContext};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::ServerError;

/// A Socket Mode envelope received from Slack.
#[derive(Debug, Clone)]
pub struct Envelope {
    /// Unique identifier for this envelope, used in acknowledgment.
    pub envelope_id: String,

    pub envelope_type: EnvelopeType,

    /// The delivery body, shaped like the HTTP request body.
    pub payload: Value,

    /// Redelivery information from `retry_attempt` / `retry_reason`.
    pub retry: RetryContext,

    /// Whether Slack accepts a `payload` in the ack frame.
    pub accepts_response_payload: bool,
}

/// The type of a Socket Mode envelope payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeType {
    SlashCommands,
    EventsApi,
    Interactive,
}

impl EnvelopeType {
    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "slash_commands" => Some(Self::SlashCommands),
            "events_api" => Some(Self::EventsApi),
            "interactive" => Some(Self::Interactive),
            _ => None,
        }
    }
}

/// Result of parsing a raw Socket Mode frame.
#[derive(Debug)]
pub enum ParsedMessage {
    /// A `hello` message confirming connection.
    Hello,

    /// A `disconnect` message requesting reconnection.
    Disconnect,

    /// A delivery that needs acknowledgment and dispatch.
    Envelope(Envelope),
}

/// Parses a raw JSON frame from the WebSocket.
///
/// Returns `None` for unknown frame types and envelopes without an id
/// (logged as a warning).
///
/// # Errors
///
/// Returns `ServerError::Frame` if the frame is not a JSON object with a
/// string `type`.
pub fn parse_message(text: &str) -> Result<Option<ParsedMessage>, ServerError> {
    let raw: Value =
        serde_json::from_str(text).map_err(|e| ServerError::Frame(format!("Bad JSON: {e}")))?;
    let Some(frame_type) = raw.get("type").and_then(Value::as_str) else {
        return Err(ServerError::Frame("frame has no 'type'".into()));
    };

    match frame_type {
        "hello" => {
            info!("Received hello from Slack, connection established");
            Ok(Some(ParsedMessage::Hello))
        }
        "disconnect" => {
            let reason = raw.get("reason").and_then(Value::as_str).unwrap_or("");
            info!(reason, "Received disconnect from Slack, will reconnect");
            Ok(Some(ParsedMessage::Disconnect))
        }
        tag => {
            let Some(envelope_type) = EnvelopeType::from_tag(tag) else {
                warn!(frame_type = tag, "Unknown Socket Mode frame type, ignoring");
                return Ok(None);
            };
            let Some(envelope_id) = raw.get("envelope_id").and_then(Value::as_str) else {
                warn!(frame_type = tag, "Envelope missing envelope_id, skipping");
                return Ok(None);
            };

            let retry = RetryContext::from_socket_envelope(&raw);
            let payload = raw.get("payload").cloned().unwrap_or(Value::Null);
            debug!(
                envelope_id,
                envelope_type = ?envelope_type,
                retry_num = retry.retry_num,
                "Parsed envelope"
            );

            Ok(Some(ParsedMessage::Envelope(Envelope {
                envelope_id: envelope_id.to_string(),
                envelope_type,
                retry,
                accepts_response_payload: raw
                    .get("accepts_response_payload")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
                payload,
            })))
        }
    }
}

/// Builds the ack frame for an envelope.
///
/// The ack body is only attached when it is non-empty and the envelope
/// accepts a response payload.
pub fn ack_frame(envelope: &Envelope, ack: AckResponse) -> String {
    let mut frame = serde_json::json!({ "envelope_id": envelope.envelope_id });
    match ack.into_body() {
        Some(body) if envelope.accepts_response_payload => frame["payload"] = body,
        Some(_) => debug!(
            envelope_id = %envelope.envelope_id,
            "Envelope does not accept a response payload, dropping ack body"
        ),
        None => {}
    }
    frame.to_string()
}
