//! Error types for the dispatch core.
//!
//! Defines [`CoreError`] as the primary error type for all operations
//! within `lazybolt-core`. Only the classification variants ever reach the
//! caller of [`App::dispatch`](crate::App::dispatch); everything past
//! classification is isolated and logged.

use thiserror::Error;

/// Error type for lazybolt-core operations.
///
/// # Examples
///
/// ```
/// use lazybolt_core::CoreError;
///
/// let err = CoreError::UnknownPayloadType("url_verification".into());
/// assert!(err.to_string().contains("url_verification"));
/// assert!(err.is_classification());
/// ```
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CoreError {
    /// The body carried a `type` outside the known payload vocabulary.
    #[error("Unknown payload type: {0}")]
    UnknownPayloadType(String),

    /// The payload type was recognized but required fields were missing.
    #[error("Malformed {variant} payload: {reason}")]
    MalformedPayload {
        /// Wire tag of the variant the body claimed to be.
        variant: &'static str,
        /// What was missing or mistyped.
        reason: String,
    },

    /// A registered handler returned an error or panicked.
    #[error("Handler {key} failed: {message}")]
    HandlerFailure {
        /// Registration key or assistant slot name of the handler.
        key: String,
        /// Rendered error chain or panic message.
        message: String,
    },

    /// A thread context store could not reach its backend.
    #[error("Thread context store unavailable: {0}")]
    StoreUnavailable(String),

    /// An error from a Slack Web API call.
    #[error("Slack API error: {0}")]
    SlackApi(String),

    /// A JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    /// Returns `true` for errors that reject a request before any handler runs.
    pub fn is_classification(&self) -> bool {
        matches!(
            self,
            Self::UnknownPayloadType(_) | Self::MalformedPayload { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_display_unknown_payload_type() {
        let err = CoreError::UnknownPayloadType("mystery".into());
        assert_eq!(err.to_string(), "Unknown payload type: mystery");
    }

    #[test]
    fn test_should_display_malformed_payload() {
        let err = CoreError::MalformedPayload {
            variant: "view_submission",
            reason: "missing field `view`".into(),
        };
        assert_eq!(
            err.to_string(),
            "Malformed view_submission payload: missing field `view`"
        );
    }

    #[test]
    fn test_should_only_flag_classification_errors() {
        assert!(CoreError::UnknownPayloadType("x".into()).is_classification());
        assert!(
            CoreError::MalformedPayload {
                variant: "shortcut",
                reason: "r".into(),
            }
            .is_classification()
        );
        assert!(!CoreError::StoreUnavailable("down".into()).is_classification());
        assert!(
            !CoreError::HandlerFailure {
                key: "event:message".into(),
                message: "boom".into(),
            }
            .is_classification()
        );
    }

    #[test]
    fn test_should_convert_from_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid").unwrap_err();
        let err: CoreError = json_err.into();
        assert!(matches!(err, CoreError::Json(_)));
    }
}
