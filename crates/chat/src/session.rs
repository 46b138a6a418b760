use std::sync::Arc;

use crate::client::{CycleSink, INTERRUPTED_MESSAGE, InferenceClient, RequestCycle};
use crate::environment::startup_banner;
use crate::events::{CycleHandle, CycleOutcome};
use crate::message::{
    Conversation, Message, MessageId, MessageStatus, StreamSessionId, StreamTarget,
};
use crate::terminal::TerminalLog;

/// Told about every visible change while a cycle runs.
pub trait ConversationObserver {
    fn conversation_changed(&mut self, messages: &[Message], is_loading: bool);
}

impl<F> ConversationObserver for F
where
    F: FnMut(&[Message], bool),
{
    fn conversation_changed(&mut self, messages: &[Message], is_loading: bool) {
        self(messages, is_loading)
    }
}

/// The view-facing façade: message list, input buffer, loading flag and submit.
#[derive(Debug)]
pub struct ChatSession {
    conversation: Conversation,
    input: String,
    client: Arc<InferenceClient>,
    log: TerminalLog,
    pending: Option<RequestCycle>,
    next_message_id: u64,
    next_stream_session_id: u64,
}

impl ChatSession {
    /// Writes the startup banner into `log` when it is still empty.
    pub fn new(client: Arc<InferenceClient>, log: TerminalLog) -> Self {
        if log.is_empty() {
            for line in startup_banner(client.environment(), client.server_address()) {
                log.log(&line);
            }
        }

        Self {
            conversation: Conversation::new(),
            input: String::new(),
            client,
            log,
            pending: None,
            next_message_id: 1,
            next_stream_session_id: 1,
        }
    }

    pub fn messages(&self) -> &[Message] {
        self.conversation.messages()
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn on_input_change(&mut self, text: impl Into<String>) {
        self.input = text.into();
    }

    /// True from submit until the placeholder settles.
    pub fn is_loading(&self) -> bool {
        self.conversation.stream_state().active_target().is_some()
    }

    pub fn log(&self) -> &TerminalLog {
        &self.log
    }

    pub fn client(&self) -> &Arc<InferenceClient> {
        &self.client
    }

    /// Model used by the next cycle.
    pub fn set_model(&mut self, model: impl Into<String>) {
        Arc::make_mut(&mut self.client).set_model(model);
    }

    /// Opens a cycle for `text` without running it.
    ///
    /// Returns `None`, changing nothing, for blank text or while another cycle is open.
    ///
    /// The cycle stays pending, and [`ChatSession::is_loading`] stays true, until
    /// [`ChatSession::drive`] runs it. Dropping the handle does not close the cycle.
    pub fn begin(&mut self, text: &str) -> Option<CycleHandle> {
        let prompt = text.trim();
        if prompt.is_empty() {
            return None;
        }
        if self.is_loading() {
            tracing::debug!("submission ignored while a cycle is open");
            return None;
        }

        let user_message_id = self.alloc_message_id();
        let target = StreamTarget::new(self.alloc_stream_session_id(), self.alloc_message_id());
        if let Err(rejection) = self.conversation.open_cycle(user_message_id, prompt, target) {
            tracing::warn!(?rejection, "failed to open request cycle");
            return None;
        }

        self.log.log(&format!("User message: {prompt}"));
        self.log.log("Sending request to LLM server...");

        let cycle = RequestCycle::new(prompt, target);
        let handle = CycleHandle::new(target, cycle.cancel.clone());
        self.pending = Some(cycle);
        Some(handle)
    }

    /// Runs the cycle opened by [`ChatSession::begin`], if any, until its placeholder settles.
    ///
    /// Dropping the returned future mid-cycle still settles the placeholder.
    pub async fn drive(&mut self, observer: &mut dyn ConversationObserver) -> Option<CycleOutcome> {
        let cycle = self.pending.take()?;
        let client = Arc::clone(&self.client);

        let mut guard = CycleGuard {
            conversation: &mut self.conversation,
            log: &self.log,
            observer,
            target: cycle.target,
            settled: false,
        };
        guard.publish();

        let outcome = client.run(&cycle, &mut guard).await;
        guard.settle(outcome.message_status());
        Some(outcome)
    }

    /// Opens a cycle for the input buffer, clearing the buffer when it opens.
    ///
    /// Like [`ChatSession::begin`], the cycle must be run with [`ChatSession::drive`].
    pub fn begin_input(&mut self) -> Option<CycleHandle> {
        let text = std::mem::take(&mut self.input);
        match self.begin(&text) {
            Some(handle) => Some(handle),
            None => {
                self.input = text;
                None
            }
        }
    }

    pub async fn submit(
        &mut self,
        text: &str,
        observer: &mut dyn ConversationObserver,
    ) -> Option<CycleOutcome> {
        self.begin(text)?;
        self.drive(observer).await
    }

    pub async fn submit_input(
        &mut self,
        observer: &mut dyn ConversationObserver,
    ) -> Option<CycleOutcome> {
        self.begin_input()?;
        self.drive(observer).await
    }

    fn alloc_message_id(&mut self) -> MessageId {
        let id = MessageId::new(self.next_message_id);
        self.next_message_id += 1;
        id
    }

    fn alloc_stream_session_id(&mut self) -> StreamSessionId {
        let id = StreamSessionId::new(self.next_stream_session_id);
        self.next_stream_session_id += 1;
        id
    }
}

/// Applies one cycle's mutations and guarantees the cycle is closed exactly once.
struct CycleGuard<'a> {
    conversation: &'a mut Conversation,
    log: &'a TerminalLog,
    observer: &'a mut dyn ConversationObserver,
    target: StreamTarget,
    settled: bool,
}

impl CycleGuard<'_> {
    fn publish(&mut self) {
        let is_loading = self.conversation.stream_state().active_target().is_some();
        self.observer
            .conversation_changed(self.conversation.messages(), is_loading);
    }

    fn settle(&mut self, status: MessageStatus) {
        if self.settled {
            return;
        }
        self.settled = true;

        if let Err(rejection) = self.conversation.close_cycle(self.target, status) {
            tracing::warn!(?rejection, target = ?self.target, "failed to close request cycle");
        }
        self.log.log("Request completed");
        self.publish();
    }
}

impl CycleSink for CycleGuard<'_> {
    fn append_fragment(&mut self, target: StreamTarget, fragment: &str) {
        if self.conversation.append_fragment(target, fragment) {
            self.publish();
        } else {
            tracing::trace!(?target, "dropping stale fragment");
        }
    }

    fn replace_content(&mut self, target: StreamTarget, content: &str) {
        if self.conversation.replace_content(target, content) {
            self.publish();
        } else {
            tracing::trace!(?target, "dropping stale replacement");
        }
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        tracing::warn!(target = ?self.target, "request cycle interrupted");
        self.conversation
            .replace_content(self.target, INTERRUPTED_MESSAGE);
        self.settle(MessageStatus::Error(INTERRUPTED_MESSAGE.to_string()));
    }
}
