//! Handler registrations served by this binary.
//!
//! A small but complete app: a slash command with an immediate reply and a
//! lazy follow-up, a button action, mention and keyword listeners, rate-limit
//! reporting, and an assistant that answers in its own threads.

use std::sync::Arc;

use lazybolt_core::{
    AckResponse, App, AppSettings, Assistant, SlackApi, SlackRequest, SuggestedPrompt,
};
use serde_json::json;
use tracing::{info, warn};

/// Builds the app with every registration wired to `client`.
pub fn build_app(client: Arc<dyn SlackApi>, bot_user_id: &str) -> App {
    let settings = AppSettings {
        bot_user_id: Some(bot_user_id.to_string()),
    };
    let mut app = App::with_settings(settings).with_client(Arc::clone(&client));

    app.command("/echo", |req| async move { Ok(echo_ack(&req)) })
        .lazy(|req| async move {
            if req.retry.is_retry() {
                info!(retry_num = req.retry.retry_num, "Skipping redelivered /echo follow-up");
                return Ok(());
            }
            let user = req.context.user_id.as_deref().unwrap_or("someone");
            req.say(&format!("<@{user}> used /echo")).await?;
            Ok(())
        });

    app.action("approve", |_req| async { Ok(AckResponse::Empty) })
        .lazy(|req| async move {
            let user = req.context.user_id.as_deref().unwrap_or("someone");
            req.say(&format!(":white_check_mark: Approved by <@{user}>"))
                .await?;
            Ok(())
        });

    app.event("app_mention", |req| async move {
        req.say("Hi! Open the assistant panel to chat with me.")
            .await?;
        Ok(())
    });

    app.message("hello", |req| async move {
        if req.retry.is_retry() {
            return Ok(());
        }
        req.say(":wave: Hello there").await?;
        Ok(())
    });

    app.app_rate_limited(|req| async move {
        warn!(
            team_id = req.context.team_id.as_deref().unwrap_or(""),
            "Events API deliveries are being rate limited"
        );
        Ok(())
    });

    app.assistant(build_assistant(client, bot_user_id));
    app
}

fn echo_ack(req: &SlackRequest) -> AckResponse {
    let text = req.body["text"].as_str().unwrap_or_default().trim();
    if text.is_empty() {
        AckResponse::Json(json!({
            "response_type": "ephemeral",
            "text": "Usage: /echo <text>"
        }))
    } else {
        AckResponse::text(text)
    }
}

fn build_assistant(client: Arc<dyn SlackApi>, bot_user_id: &str) -> Assistant {
    Assistant::new(client, bot_user_id)
        .thread_started(|req| async move {
            req.say("Hi, I'm lazybolt. Ask me anything about this workspace.")
                .await?;
            req.set_suggested_prompts(
                Some("Start with"),
                vec![
                    SuggestedPrompt::new("Where am I?", "Which channel was I viewing?"),
                    SuggestedPrompt::new("Echo", "Repeat after me: hello"),
                ],
            )
            .await?;
            Ok(())
        })
        .user_message(|req| async move {
            req.set_status("is thinking...").await?;
            let text = req.event.text.clone().unwrap_or_default();
            let reply = match req.thread_context().await.and_then(|ctx| ctx.channel_id) {
                Some(channel) if text.contains("Which channel") => {
                    format!("You were viewing <#{channel}>.")
                }
                _ => format!("You said: {text}"),
            };
            req.say(&reply).await?;
            Ok(())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use lazybolt_core::{HandlerKey, RetryContext, SlackClient};

    fn app() -> App {
        build_app(Arc::new(SlackClient::new("xoxb-test".into())), "UBOT")
    }

    #[test]
    fn test_should_register_expected_handlers() {
        let app = app();
        let keys: Vec<String> = app.entries().iter().map(|e| e.key.to_string()).collect();
        assert_eq!(
            keys,
            vec![
                "command:/echo",
                "command:/echo",
                "action:approve",
                "action:approve",
                "event:app_mention",
                "event:message:hello",
                "app_rate_limited",
            ]
        );
        assert!(matches!(app.entries()[0].key, HandlerKey::Command(_)));
        assert_eq!(app.settings().bot_user_id.as_deref(), Some("UBOT"));
    }

    #[tokio::test]
    async fn test_should_echo_slash_command_text_in_ack() {
        let app = app();
        let body = json!({
            "command": "/echo",
            "text": "  ping  ",
            "team_id": "T1",
            "user_id": "U1",
            "channel_id": "C1",
            "response_url": "https://hooks.slack.com/commands/1",
            "trigger_id": "1.2.3"
        });
        // Redelivery keeps the follow-up from calling Slack.
        let retry = RetryContext::from_headers([("X-Slack-Retry-Num", "1")]);
        let ack = app.dispatch(body, retry).await.expect("dispatch");
        app.wait_for_lazy().await;
        assert_eq!(ack, AckResponse::text("ping"));
    }

    #[tokio::test]
    async fn test_should_reply_with_usage_for_empty_echo() {
        let app = app();
        let processed = app
            .process(
                json!({
                    "command": "/echo",
                    "text": "",
                    "team_id": "T1",
                    "user_id": "U1",
                    "channel_id": "C1",
                    "response_url": "https://hooks.slack.com/commands/1",
                    "trigger_id": "1.2.3"
                }),
                RetryContext::first_attempt(),
            )
            .await
            .expect("process");
        let body = processed.ack().clone().into_body().expect("body");
        assert_eq!(body["response_type"], "ephemeral");
    }
}
