//! Core dispatch library for Slack apps.
//!
//! `lazybolt-core` turns one inbound Slack delivery (an Events API envelope,
//! an interactive payload or a slash command) into an ack body plus lazy
//! work that runs after the ack:
//!
//! - [`payload`]: classifies request bodies into a closed [`Payload`] enum
//! - [`event`]: inner event subtypes and message predicates
//! - [`App`]: append-only handler registry with two-phase dispatch
//! - [`RetryContext`]: redelivery detection exposed to handlers
//! - [`Assistant`]: assistant thread coordinator with overridable slots
//! - [`ThreadContextStore`]: per-thread context persistence
//! - [`SlackApi`] / [`SlackClient`]: the outbound Web API capability

mod app;
mod assistant;
mod error;
pub mod event;
mod handler;
mod pattern;
pub mod payload;
mod request;
mod retry;
mod slack_api;
mod slack_client;
mod thread_context;

#[cfg(test)]
mod test_support;

pub use app::{App, AppSettings, Processed, Registration};
pub use assistant::{
    Assistant, AssistantHandler, AssistantRequest, AssistantSlot, DEFAULT_GREETING,
    is_bot_message, is_user_message,
};
pub use error::CoreError;
pub use event::{EventSubtype, InnerEvent, is_function_executed, is_posted_message};
pub use handler::{
    AckFn, AckMode, AckResponse, Handler, HandlerEntry, HandlerKey, LazyFn, SubtypeFilter, ack_fn,
    lazy_fn,
};
pub use pattern::{ActionConstraints, Pattern};
pub use payload::{Payload, PayloadKind, classify};
pub use request::{RequestContext, SlackRequest};
pub use retry::{RETRY_NUM_HEADER, RETRY_REASON_HEADER, RetryContext, RetryReason};
pub use slack_api::{
    MessageMetadata, PostMessage, RepliesQuery, SetStatus, SetSuggestedPrompts, SetTitle,
    SlackApi, SuggestedPrompt, ThreadMessage, UpdateMessage,
};
pub use slack_client::{SLACK_API_BASE, SlackClient};
pub use thread_context::{
    AssistantThreadContext, AssistantThreadKey, MemoryThreadContextStore,
    MetadataThreadContextStore, THREAD_CONTEXT_EVENT_TYPE, ThreadContextStore,
};
