//! Server configuration types and loading.
//!
//! Defines [`ServerConfig`] which is loaded from `~/.lazybolt-server/config.yml`
//! unless `LAZYBOLT_CONFIG` points elsewhere.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ServerError;

/// Environment variable overriding the config file location.
pub const CONFIG_PATH_ENV: &str = "LAZYBOLT_CONFIG";

/// Top-level server configuration.
///
/// ```yaml
/// slack:
///   app_token: "xapp-1-..."
///   bot_token: "xoxb-..."
///   bot_user_id: "U0BOT"          # optional, resolved via auth.test otherwise
///   api_base: "https://slack.com/api"  # optional
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub slack: SlackConfig,
}

/// Slack credentials and endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlackConfig {
    /// App-level token for Socket Mode (`xapp-...`).
    pub app_token: String,

    /// Bot User OAuth Token for Web API calls (`xoxb-...`).
    pub bot_token: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_user_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
}

/// Returns the default configuration directory path (`~/.lazybolt-server/`).
///
/// # Errors
///
/// Returns `ServerError::Config` if the `HOME` environment variable is not set.
pub fn default_config_dir() -> Result<PathBuf, ServerError> {
    let home = std::env::var("HOME")
        .map_err(|_| ServerError::Config("HOME environment variable not set".into()))?;
    Ok(PathBuf::from(home).join(".lazybolt-server"))
}

/// Returns the configuration file path: `$LAZYBOLT_CONFIG` when set,
/// `~/.lazybolt-server/config.yml` otherwise.
///
/// # Errors
///
/// Returns `ServerError::Config` if neither `LAZYBOLT_CONFIG` nor `HOME` is set.
pub fn default_config_path() -> Result<PathBuf, ServerError> {
    match std::env::var_os(CONFIG_PATH_ENV) {
        Some(path) if !path.is_empty() => Ok(PathBuf::from(path)),
        _ => Ok(default_config_dir()?.join("config.yml")),
    }
}

impl ServerConfig {
    /// Loads configuration from the given YAML file path.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Config` if the file cannot be read, contains
    /// invalid YAML, or has malformed token values.
    pub fn load(path: &Path) -> Result<Self, ServerError> {
        info!(path = %path.display(), "Loading configuration");
        let content = std::fs::read_to_string(path).map_err(|e| {
            ServerError::Config(format!("Cannot read config at {}: {e}", path.display()))
        })?;
        let config: Self = serde_yaml::from_str(&content).map_err(|e| {
            ServerError::Config(format!("Invalid YAML in config at {}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ServerError> {
        check_token("slack.app_token", &self.slack.app_token, "xapp-")?;
        check_token("slack.bot_token", &self.slack.bot_token, "xoxb-")?;
        if self.slack.bot_user_id.as_deref() == Some("") {
            return Err(ServerError::Config(
                "slack.bot_user_id must not be empty when set".into(),
            ));
        }
        Ok(())
    }
}

fn check_token(name: &str, value: &str, prefix: &str) -> Result<(), ServerError> {
    if value.is_empty() {
        return Err(ServerError::Config(format!("{name} must not be empty")));
    }
    if !value.starts_with(prefix) {
        return Err(ServerError::Config(format!(
            "{name} must start with '{prefix}'"
        )));
    }
    Ok(())
}
