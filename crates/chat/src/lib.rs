//! Request lifecycle for a chat front-end backed by a local inference server.
//!
//! A [`ChatSession`] owns the message list and opens one request cycle per submit. The
//! [`InferenceClient`] streams the reply into the cycle's placeholder and, when the endpoint
//! cannot serve it, settles the placeholder with a mock reply or a fixed failure message.

mod client;
mod environment;
mod events;
mod message;
mod mock;
mod notify;
mod session;
mod terminal;

pub use client::{
    CycleOptions, CycleSink, DEFAULT_MOCK_DELAY, DEFAULT_TIMEOUT, EMPTY_REPLY_MESSAGE,
    INTERRUPTED_MESSAGE, InferenceClient, RequestCycle, connection_failure_message,
};
pub use environment::{
    Environment, EnvironmentClassifier, FixedEnvironment, StaticHost, classify_host,
    startup_banner,
};
pub use events::{CycleFailure, CycleHandle, CycleOutcome};
pub use message::{
    Conversation, Message, MessageId, MessageStatus, Role, StreamSessionId, StreamState,
    StreamTarget, StreamTransition, StreamTransitionRejection, StreamTransitionResult,
};
pub use mock::{MOCK_REPLIES, MockReplies};
pub use notify::{Notification, NotificationQueue, NotificationSink, Severity};
pub use session::{ChatSession, ConversationObserver};
pub use terminal::{LogSink, TerminalLog};
