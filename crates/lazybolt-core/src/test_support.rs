//! In-memory Slack fake shared by unit tests.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use futures::FutureExt;
use futures::future::BoxFuture;

use crate::error::CoreError;
use crate::slack_api::{
    PostMessage, RepliesQuery, SetStatus, SetSuggestedPrompts, SetTitle, SlackApi, ThreadMessage,
    UpdateMessage,
};

/// One recorded API call.
#[derive(Debug, Clone)]
pub(crate) enum SlackCall {
    Post(PostMessage),
    Update(UpdateMessage),
    Replies(RepliesQuery),
    Status(SetStatus),
    Prompts(SetSuggestedPrompts),
    Title(SetTitle),
}

/// Records every call and simulates thread replies per channel.
///
/// Posted messages are authored by the configured bot user.
#[derive(Debug)]
pub(crate) struct FakeSlack {
    bot_user_id: String,
    messages: Mutex<Vec<(String, ThreadMessage)>>,
    calls: Mutex<Vec<SlackCall>>,
    fail_reads: AtomicBool,
    next_ts: AtomicU64,
}

impl FakeSlack {
    pub fn new(bot_user_id: &str) -> Self {
        Self {
            bot_user_id: bot_user_id.to_string(),
            messages: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            fail_reads: AtomicBool::new(false),
            next_ts: AtomicU64::new(1),
        }
    }

    pub fn seed_reply(&self, channel: &str, ts: &str, user: &str, subtype: Option<&str>) {
        self.messages.lock().expect("lock").push((
            channel.to_string(),
            ThreadMessage {
                ts: ts.to_string(),
                user: Some(user.to_string()),
                subtype: subtype.map(String::from),
                text: Some(format!("message {ts}")),
                ..ThreadMessage::default()
            },
        ));
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<SlackCall> {
        self.calls.lock().expect("lock").clone()
    }

    pub fn calls_matching(&self, pred: impl Fn(&SlackCall) -> bool) -> Vec<SlackCall> {
        self.calls().into_iter().filter(|c| pred(c)).collect()
    }

    fn record(&self, call: SlackCall) {
        self.calls.lock().expect("lock").push(call);
    }
}

impl SlackApi for FakeSlack {
    fn post_message(&self, message: PostMessage) -> BoxFuture<'_, Result<String, CoreError>> {
        let ts = format!("9000.{:06}", self.next_ts.fetch_add(1, Ordering::SeqCst));
        self.messages.lock().expect("lock").push((
            message.channel.clone(),
            ThreadMessage {
                ts: ts.clone(),
                user: Some(self.bot_user_id.clone()),
                text: Some(message.text.clone()),
                blocks: message.blocks.clone(),
                thread_ts: message.thread_ts.clone(),
                metadata: message.metadata.clone(),
                ..ThreadMessage::default()
            },
        ));
        self.record(SlackCall::Post(message));
        futures::future::ready(Ok(ts)).boxed()
    }

    fn update_message(&self, update: UpdateMessage) -> BoxFuture<'_, Result<(), CoreError>> {
        {
            let mut messages = self.messages.lock().expect("lock");
            if let Some((_, msg)) = messages
                .iter_mut()
                .find(|(channel, m)| *channel == update.channel && m.ts == update.ts)
            {
                if update.text.is_some() {
                    msg.text = update.text.clone();
                }
                if update.blocks.is_some() {
                    msg.blocks = update.blocks.clone();
                }
                if update.metadata.is_some() {
                    msg.metadata = update.metadata.clone();
                }
            }
        }
        self.record(SlackCall::Update(update));
        futures::future::ready(Ok(())).boxed()
    }

    fn conversations_replies(
        &self,
        query: RepliesQuery,
    ) -> BoxFuture<'_, Result<Vec<ThreadMessage>, CoreError>> {
        self.record(SlackCall::Replies(query.clone()));
        let result = if self.fail_reads.load(Ordering::SeqCst) {
            Err(CoreError::SlackApi("conversations.replies error: ratelimited".into()))
        } else {
            let limit = query.limit.map_or(usize::MAX, |l| l as usize);
            Ok(self
                .messages
                .lock()
                .expect("lock")
                .iter()
                .filter(|(channel, _)| *channel == query.channel)
                .map(|(_, m)| m.clone())
                .take(limit)
                .collect())
        };
        futures::future::ready(result).boxed()
    }

    fn assistant_threads_set_status(
        &self,
        request: SetStatus,
    ) -> BoxFuture<'_, Result<(), CoreError>> {
        self.record(SlackCall::Status(request));
        futures::future::ready(Ok(())).boxed()
    }

    fn assistant_threads_set_suggested_prompts(
        &self,
        request: SetSuggestedPrompts,
    ) -> BoxFuture<'_, Result<(), CoreError>> {
        self.record(SlackCall::Prompts(request));
        futures::future::ready(Ok(())).boxed()
    }

    fn assistant_threads_set_title(&self, request: SetTitle) -> BoxFuture<'_, Result<(), CoreError>> {
        self.record(SlackCall::Title(request));
        futures::future::ready(Ok(())).boxed()
    }
}
