//! Error types for the lazybolt-server application.
//!
//! Defines [`ServerError`] as the primary error type for all operations
//! within `lazybolt-server`.

use thiserror::Error;

/// Error type for lazybolt-server operations.
///
/// Variants are grouped by subsystem: configuration, WebSocket transport,
/// frame parsing, I/O, serialization, and the core library.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ServerError {
    /// A configuration error (missing or invalid config file/values).
    #[error("Config error: {0}")]
    Config(String),

    /// A WebSocket transport error (connection, read, write).
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// A Socket Mode frame that could not be parsed.
    #[error("Frame error: {0}")]
    Frame(String),

    /// An I/O error from file system operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A YAML serialization/deserialization error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// An error from `lazybolt-core`, including Slack API failures.
    #[error(transparent)]
    Core(#[from] lazybolt_core::CoreError),
}
