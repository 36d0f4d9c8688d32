//! lazybolt Slack server: a Socket Mode adapter around `lazybolt-core`.
//!
//! Connects to Slack over an outbound WebSocket, feeds every envelope through
//! the app's two-phase dispatch (ack first, lazy work after) and drains
//! outstanding lazy work on shutdown.

mod config;
mod envelope;
mod error;
mod handlers;
mod socket;

use std::sync::Arc;

use anyhow::Context;
use lazybolt_core::SlackClient;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("lazybolt_server=info".parse()?)
                .add_directive("lazybolt_core=info".parse()?),
        )
        .init();

    let config_path = config::default_config_path().context("Failed to determine config path")?;
    let server_config = config::ServerConfig::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    info!("Configuration loaded successfully");

    let slack = match &server_config.slack.api_base {
        Some(base) => SlackClient::with_api_base(server_config.slack.bot_token.clone(), base.clone()),
        None => SlackClient::new(server_config.slack.bot_token.clone()),
    };

    let bot_user_id = match &server_config.slack.bot_user_id {
        Some(id) => id.clone(),
        None => slack
            .auth_test()
            .await
            .context("Failed to resolve bot user id via auth.test")?,
    };
    info!(bot_user_id = %bot_user_id, "Resolved bot identity");

    let app = Arc::new(handlers::build_app(Arc::new(slack.clone()), &bot_user_id));
    info!(handler_count = app.entries().len(), "Handlers registered");

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(signal) => signal,
                Err(e) => {
                    tracing::warn!(error = %e, "Cannot register SIGTERM handler");
                    ctrl_c.await.ok();
                    let _ = shutdown_tx.send(true);
                    return;
                }
            };

        #[cfg(unix)]
        tokio::select! {
            _ = ctrl_c => {
                info!("Received SIGINT, shutting down...");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down...");
            }
        }

        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
            info!("Received SIGINT, shutting down...");
        }

        let _ = shutdown_tx.send(true);
    });

    let socket = socket::SocketClient::new(server_config.slack.app_token.clone(), slack);

    info!("Starting Socket Mode connection...");
    socket
        .run(Arc::clone(&app), shutdown_rx)
        .await
        .context("Socket Mode event loop failed")?;

    info!(pending = app.pending_lazy(), "Waiting for lazy handlers to finish");
    app.wait_for_lazy().await;

    info!("Server shut down cleanly");
    Ok(())
}
