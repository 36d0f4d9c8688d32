//! Socket Mode WebSocket connection management.
//!
//! [`SocketClient`] manages the outbound WebSocket connection to Slack's
//! Socket Mode endpoint. It handles connection lifecycle, ack frames built
//! from the app's ack handlers, and automatic reconnection with exponential
//! backoff.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use lazybolt_core::{AckResponse, App, SlackClient};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{info, instrument, warn};

use crate::envelope::{self, Envelope, ParsedMessage};
use crate::error::ServerError;

/// Initial backoff delay for reconnection.
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Maximum backoff delay cap for reconnection.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Manages the WebSocket connection to Slack Socket Mode.
///
/// Connects using the app-level token (`xapp-...`) via `apps.connections.open`,
/// then keeps the connection alive. When the connection drops, it reconnects
/// with exponential backoff (1s, 2s, 4s, ..., 30s cap).
#[derive(Debug)]
pub struct SocketClient {
    app_token: String,
    slack: SlackClient,
}

impl SocketClient {
    pub fn new(app_token: String, slack: SlackClient) -> Self {
        Self { app_token, slack }
    }

    /// Connects and runs the event loop until shutdown.
    ///
    /// Each envelope is processed in its own task: the app's ack handler
    /// runs first, the ack frame is queued for the writer, and only then is
    /// the lazy work released. In-flight envelope tasks are aborted on
    /// shutdown; lazy work belongs to the app and is awaited by the caller.
    ///
    /// # Errors
    ///
    /// Returns `ServerError` only for failures outside the reconnect loop;
    /// connection errors are logged and retried.
    pub async fn run(
        &self,
        app: Arc<App>,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> Result<(), ServerError> {
        let mut backoff = INITIAL_BACKOFF;
        let mut tasks = JoinSet::new();

        loop {
            if *shutdown.borrow() {
                info!("Shutdown requested, exiting socket loop");
                break;
            }

            match self.connect_and_run(&app, &mut shutdown, &mut tasks).await {
                Ok(ConnectionExit::Shutdown) => {
                    info!("Shutdown signal received, closing connection");
                    break;
                }
                Ok(ConnectionExit::Disconnect) => {
                    info!(
                        backoff_secs = backoff.as_secs(),
                        "Disconnected, reconnecting after backoff"
                    );
                    // Slack asked for the reconnect
                    backoff = INITIAL_BACKOFF;
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        backoff_secs = backoff.as_secs(),
                        "Connection error, reconnecting after backoff"
                    );
                }
            }

            tokio::select! {
                () = tokio::time::sleep(backoff) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Shutdown during backoff, exiting");
                        break;
                    }
                }
            }

            backoff = next_backoff(backoff);
        }

        let task_count = tasks.len();
        if task_count > 0 {
            info!(task_count, "Aborting in-flight envelope tasks");
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
        }

        Ok(())
    }

    /// Runs the event loop for a single connection.
    async fn connect_and_run(
        &self,
        app: &Arc<App>,
        shutdown: &mut tokio::sync::watch::Receiver<bool>,
        tasks: &mut JoinSet<()>,
    ) -> Result<ConnectionExit, ServerError> {
        let wss_url = self.slack.connections_open(&self.app_token).await?;
        info!("Obtained WebSocket URL, connecting...");

        let (ws_stream, _response): (WsStream, _) = connect_async(wss_url.as_str())
            .await
            .map_err(|e| ServerError::WebSocket(format!("WebSocket connect failed: {e}")))?;
        info!("WebSocket connected to Slack Socket Mode");

        let (mut write, mut read) = ws_stream.split();
        let (ack_tx, mut ack_rx) = mpsc::unbounded_channel::<String>();

        loop {
            tokio::select! {
                msg = read.next() => {
                    let Some(msg_result) = msg else {
                        info!("WebSocket stream ended");
                        return Ok(ConnectionExit::Disconnect);
                    };

                    let ws_msg = msg_result.map_err(|e| {
                        ServerError::WebSocket(format!("WebSocket read error: {e}"))
                    })?;

                    match ws_msg {
                        WsMessage::Text(text) => match envelope::parse_message(&text) {
                            Ok(Some(ParsedMessage::Hello)) => {}
                            Ok(Some(ParsedMessage::Disconnect)) => {
                                return Ok(ConnectionExit::Disconnect);
                            }
                            Ok(Some(ParsedMessage::Envelope(envelope))) => {
                                reap_finished(tasks);
                                tasks.spawn(handle_envelope(
                                    Arc::clone(app),
                                    envelope,
                                    ack_tx.clone(),
                                ));
                            }
                            Ok(None) => {}
                            Err(e) => warn!(error = %e, "Dropping unreadable frame"),
                        },
                        WsMessage::Ping(data) => {
                            write.send(WsMessage::Pong(data)).await.map_err(|e| {
                                ServerError::WebSocket(format!("Pong send failed: {e}"))
                            })?;
                        }
                        WsMessage::Close(_) => {
                            info!("Received WebSocket close frame");
                            return Ok(ConnectionExit::Disconnect);
                        }
                        _ => {}
                    }
                }
                Some(frame) = ack_rx.recv() => {
                    write.send(WsMessage::Text(frame)).await.map_err(|e| {
                        ServerError::WebSocket(format!("Ack send failed: {e}"))
                    })?;
                    reap_finished(tasks);
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return Ok(ConnectionExit::Shutdown);
                    }
                }
            }
        }
    }
}

/// Processes one envelope: ack first, lazy work after.
///
/// Bodies the app cannot classify are still acknowledged with an empty ack
/// so Slack stops redelivering them.
#[instrument(
    skip_all,
    fields(
        envelope_id = %envelope.envelope_id,
        envelope_type = ?envelope.envelope_type,
        retry_num = envelope.retry.retry_num,
    )
)]
async fn handle_envelope(app: Arc<App>, envelope: Envelope, acks: mpsc::UnboundedSender<String>) {
    let payload = envelope.payload.clone();
    match app.process(payload, envelope.retry.clone()).await {
        Ok(processed) => {
            let frame = envelope::ack_frame(&envelope, processed.ack().clone());
            if acks.send(frame).is_err() {
                warn!("Connection closed before the ack was sent, skipping lazy work");
                return;
            }
            processed.run_lazy();
        }
        Err(e) => {
            warn!(error = %e, "Acknowledging unprocessable envelope");
            let _ = acks.send(envelope::ack_frame(&envelope, AckResponse::Empty));
        }
    }
}

/// Drops finished envelope tasks from the set and returns how many went.
fn reap_finished(tasks: &mut JoinSet<()>) -> usize {
    let mut reaped = 0;
    while let Some(result) = tasks.try_join_next() {
        if let Err(e) = result {
            if e.is_panic() {
                warn!(error = %e, "Envelope task panicked");
            }
        }
        reaped += 1;
    }
    reaped
}

fn next_backoff(current: Duration) -> Duration {
    (current * 2).min(MAX_BACKOFF)
}

/// Reason the event loop exited a single connection.
enum ConnectionExit {
    /// Clean shutdown requested by the application.
    Shutdown,
    /// Slack requested a disconnect or connection was lost.
    Disconnect,
}

#[cfg(test)]
mod tests {
    use super::*;
    use lazybolt_core::RetryContext;
    use serde_json::{Value, json};

    fn slash_envelope(accepts_response_payload: bool) -> Envelope {
        Envelope {
            envelope_id: "env-1".into(),
            envelope_type: envelope::EnvelopeType::SlashCommands,
            payload: json!({
                "command": "/echo",
                "text": "ping",
                "team_id": "T1",
                "user_id": "U1",
                "channel_id": "C1",
                "response_url": "https://hooks.slack.com/commands/1",
                "trigger_id": "1.2.3"
            }),
            retry: RetryContext::first_attempt(),
            accepts_response_payload,
        }
    }

    #[test]
    fn test_should_create_socket_client() {
        let slack = SlackClient::new("xoxb-test".into());
        let socket = SocketClient::new("xapp-1-test".into(), slack);
        assert!(format!("{socket:?}").contains("SocketClient"));
    }

    #[test]
    fn test_should_follow_exponential_backoff_sequence() {
        let mut backoff = INITIAL_BACKOFF;
        let mut sequence = vec![backoff];
        for _ in 0..6 {
            backoff = next_backoff(backoff);
            sequence.push(backoff);
        }
        let secs: Vec<u64> = sequence.iter().map(Duration::as_secs).collect();
        assert_eq!(secs, vec![1, 2, 4, 8, 16, 30, 30]);
    }

    #[tokio::test]
    async fn test_should_send_ack_body_before_lazy_work() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (lazy_tx, mut lazy_rx) = mpsc::unbounded_channel::<&'static str>();
        let mut app = App::new();
        app.command("/echo", |req| async move {
            let text = req.body["text"].as_str().unwrap_or_default().to_string();
            Ok(AckResponse::text(text))
        })
        .lazy(move |_req| {
            let lazy_tx = lazy_tx.clone();
            async move {
                lazy_tx.send("lazy")?;
                Ok(())
            }
        });
        let app = Arc::new(app);

        handle_envelope(Arc::clone(&app), slash_envelope(true), tx).await;

        let frame: Value = serde_json::from_str(&rx.recv().await.expect("ack")).expect("json");
        assert_eq!(frame["envelope_id"], "env-1");
        assert_eq!(frame["payload"]["text"], "ping");

        app.wait_for_lazy().await;
        assert_eq!(lazy_rx.recv().await, Some("lazy"));
    }

    #[tokio::test]
    async fn test_should_release_finished_envelope_tasks() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut app = App::new();
        app.command("/echo", |_req| async { Ok(AckResponse::Empty) });
        let app = Arc::new(app);
        let mut tasks = JoinSet::new();

        for _ in 0..200 {
            tasks.spawn(handle_envelope(
                Arc::clone(&app),
                slash_envelope(false),
                tx.clone(),
            ));
        }
        for _ in 0..200 {
            rx.recv().await.expect("ack");
        }

        let mut reaped = 0;
        tokio::time::timeout(Duration::from_secs(5), async {
            while !tasks.is_empty() {
                reaped += reap_finished(&mut tasks);
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("envelope tasks finish");
        assert_eq!(reaped, 200);
        assert_eq!(tasks.len(), 0);
    }

    #[tokio::test]
    async fn test_should_ack_unclassifiable_payload() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let app = Arc::new(App::new());
        let mut env = slash_envelope(true);
        env.payload = json!({"type": "url_verification"});

        handle_envelope(app, env, tx).await;

        let frame: Value = serde_json::from_str(&rx.recv().await.expect("ack")).expect("json");
        assert_eq!(frame, json!({"envelope_id": "env-1"}));
    }
}
