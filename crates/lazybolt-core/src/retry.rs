//! Redelivery metadata for at-least-once event delivery.
//!
//! Slack retries events it could not deliver or that were acknowledged too
//! slowly. Over HTTP the attempt number and reason arrive in the
//! `X-Slack-Retry-Num` / `X-Slack-Retry-Reason` headers; over Socket Mode they
//! are `retry_attempt` / `retry_reason` on the envelope. [`RetryContext`] is
//! derived per request and handed to every handler. The dispatcher itself
//! never deduplicates.

use serde_json::Value;

/// Header carrying the retry attempt number.
pub const RETRY_NUM_HEADER: &str = "x-slack-retry-num";

/// Header carrying the retry reason.
pub const RETRY_REASON_HEADER: &str = "x-slack-retry-reason";

/// Why the platform redelivered a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryReason {
    HttpTimeout,
    TooManyRedirects,
    HttpError,
    SslError,
    ConnectionFailed,
    UnknownError,
    Other(String),
}

impl RetryReason {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "http_timeout" | "timeout" => Self::HttpTimeout,
            "too_many_redirects" => Self::TooManyRedirects,
            "http_error" => Self::HttpError,
            "ssl_error" => Self::SslError,
            "connection_failed" => Self::ConnectionFailed,
            "unknown_error" => Self::UnknownError,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::HttpTimeout => "http_timeout",
            Self::TooManyRedirects => "too_many_redirects",
            Self::HttpError => "http_error",
            Self::SslError => "ssl_error",
            Self::ConnectionFailed => "connection_failed",
            Self::UnknownError => "unknown_error",
            Self::Other(s) => s,
        }
    }
}

/// Delivery attempt information for one request.
///
/// `retry_num` is `0` for a first delivery.
///
/// # Examples
///
/// ```
/// use lazybolt_core::{RetryContext, RetryReason};
///
/// let retry = RetryContext::from_headers([
///     ("X-Slack-Retry-Num", "2"),
///     ("X-Slack-Retry-Reason", "http_timeout"),
/// ]);
/// assert!(retry.is_retry());
/// assert_eq!(retry.retry_num, 2);
/// assert_eq!(retry.retry_reason, Some(RetryReason::HttpTimeout));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryContext {
    pub retry_num: u32,
    pub retry_reason: Option<RetryReason>,
}

impl RetryContext {
    /// A first delivery.
    pub fn first_attempt() -> Self {
        Self::default()
    }

    pub fn is_retry(&self) -> bool {
        self.retry_num > 0
    }

    /// Reads retry headers, matching names case-insensitively.
    ///
    /// Unparseable attempt numbers are treated as a first delivery.
    pub fn from_headers<I, K, V>(headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut retry = Self::default();
        for (name, value) in headers {
            let name = name.as_ref();
            let value = value.as_ref().trim();
            if name.eq_ignore_ascii_case(RETRY_NUM_HEADER) {
                retry.retry_num = value.parse().unwrap_or(0);
            } else if name.eq_ignore_ascii_case(RETRY_REASON_HEADER) && !value.is_empty() {
                retry.retry_reason = Some(RetryReason::parse(value));
            }
        }
        retry
    }

    /// Reads `retry_attempt` / `retry_reason` from a Socket Mode envelope.
    pub fn from_socket_envelope(envelope: &Value) -> Self {
        let retry_num = envelope
            .get("retry_attempt")
            .and_then(Value::as_u64)
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(0);
        let retry_reason = envelope
            .get("retry_reason")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(RetryReason::parse);
        Self {
            retry_num,
            retry_reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_should_default_to_first_attempt() {
        let retry = RetryContext::first_attempt();
        assert!(!retry.is_retry());
        assert!(retry.retry_reason.is_none());
    }

    #[test]
    fn test_should_read_headers_case_insensitively() {
        let retry = RetryContext::from_headers(vec![
            ("x-slack-retry-num".to_string(), "1".to_string()),
            ("X-SLACK-RETRY-REASON".to_string(), "http_error".to_string()),
            ("Content-Type".to_string(), "application/json".to_string()),
        ]);
        assert_eq!(retry.retry_num, 1);
        assert_eq!(retry.retry_reason, Some(RetryReason::HttpError));
    }

    #[test]
    fn test_should_ignore_garbage_retry_num() {
        let retry = RetryContext::from_headers([("X-Slack-Retry-Num", "many")]);
        assert!(!retry.is_retry());
    }

    #[test]
    fn test_should_keep_unknown_reason_verbatim() {
        assert_eq!(
            RetryReason::parse("solar_flare"),
            RetryReason::Other("solar_flare".into())
        );
        assert_eq!(RetryReason::parse("solar_flare").as_str(), "solar_flare");
    }

    #[test]
    fn test_should_read_socket_envelope_retry_fields() {
        let retry = RetryContext::from_socket_envelope(&json!({
            "envelope_id": "e1",
            "type": "events_api",
            "retry_attempt": 3,
            "retry_reason": "timeout",
            "payload": {}
        }));
        assert_eq!(retry.retry_num, 3);
        assert_eq!(retry.retry_reason, Some(RetryReason::HttpTimeout));
    }

    #[test]
    fn test_should_treat_zero_attempt_envelope_as_first_delivery() {
        let retry = RetryContext::from_socket_envelope(&json!({
            "retry_attempt": 0,
            "retry_reason": ""
        }));
        assert_eq!(retry, RetryContext::first_attempt());
    }
}
