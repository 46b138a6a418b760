/// Stable identifier for one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(pub u64);

impl MessageId {
    /// Creates a typed message identifier.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

/// Identifier for one request cycle.
///
/// This must change on every submit so stale updates can be rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamSessionId(pub u64);

impl StreamSessionId {
    /// Creates a typed stream session identifier.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

/// Cycle-scoped handle of the assistant placeholder, captured when the placeholder is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamTarget {
    pub session_id: StreamSessionId,
    pub message_id: MessageId,
}

impl StreamTarget {
    pub const fn new(session_id: StreamSessionId, message_id: MessageId) -> Self {
        Self {
            session_id,
            message_id,
        }
    }
}

/// Chat speaker role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    User,
    Assistant,
}

/// Lifecycle status for one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageStatus {
    Done,
    Streaming(StreamSessionId),
    /// Content is a synthetic reply substituted for an unreachable endpoint.
    Mocked,
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    pub status: MessageStatus,
}

impl Message {
    pub fn new(
        id: MessageId,
        role: Role,
        content: impl Into<String>,
        status: MessageStatus,
    ) -> Self {
        Self {
            id,
            role,
            content: content.into(),
            status,
        }
    }

    pub fn user(id: MessageId, content: impl Into<String>) -> Self {
        Self::new(id, Role::User, content, MessageStatus::Done)
    }

    /// Creates the empty assistant placeholder for a cycle.
    pub fn assistant_streaming(target: StreamTarget) -> Self {
        Self::new(
            target.message_id,
            Role::Assistant,
            String::new(),
            MessageStatus::Streaming(target.session_id),
        )
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self.status, MessageStatus::Streaming(_))
    }
}

/// Ordered message list plus the lifecycle of the one cycle that may be open.
///
/// Insertion order is display order. At most one message is ever in `Streaming` status, and it is
/// always the trailing one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Conversation {
    messages: Vec<Message>,
    stream_state: StreamState,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn stream_state(&self) -> &StreamState {
        &self.stream_state
    }

    /// Opens a cycle: appends the user message and the assistant placeholder together.
    ///
    /// Rejected without touching the message list while another cycle is streaming.
    pub fn open_cycle(
        &mut self,
        user_message_id: MessageId,
        prompt: impl Into<String>,
        target: StreamTarget,
    ) -> StreamTransitionResult {
        let next_state = self.stream_state.apply(StreamTransition::Start(target))?;

        self.messages.push(Message::user(user_message_id, prompt));
        self.messages.push(Message::assistant_streaming(target));
        self.stream_state = next_state.clone();
        Ok(next_state)
    }

    /// Appends streamed text to the target placeholder. Returns false for stale targets.
    pub fn append_fragment(&mut self, target: StreamTarget, fragment: &str) -> bool {
        match self.streaming_message_mut(target) {
            Some(message) => {
                message.content.push_str(fragment);
                true
            }
            None => false,
        }
    }

    /// Overwrites the target placeholder's content. Returns false for stale targets.
    pub fn replace_content(&mut self, target: StreamTarget, content: &str) -> bool {
        match self.streaming_message_mut(target) {
            Some(message) => {
                message.content.clear();
                message.content.push_str(content);
                true
            }
            None => false,
        }
    }

    /// Closes the cycle, settling the placeholder into `status`.
    pub fn close_cycle(
        &mut self,
        target: StreamTarget,
        status: MessageStatus,
    ) -> StreamTransitionResult {
        let transition = match &status {
            MessageStatus::Error(message) => StreamTransition::Fail {
                target,
                message: message.clone(),
            },
            MessageStatus::Done | MessageStatus::Mocked | MessageStatus::Streaming(_) => {
                StreamTransition::Complete(target)
            }
        };
        let next_state = self.stream_state.apply(transition)?;

        if let Some(message) = self.streaming_message_mut(target) {
            message.status = match status {
                // A placeholder never stays open past its cycle.
                MessageStatus::Streaming(_) => MessageStatus::Done,
                status => status,
            };
        }
        self.stream_state = next_state.clone();
        Ok(next_state)
    }

    fn streaming_message_mut(&mut self, target: StreamTarget) -> Option<&mut Message> {
        if !self.stream_state.accepts_stream_event(target) {
            return None;
        }

        self.messages.last_mut().filter(|message| {
            message.id == target.message_id
                && message.status == MessageStatus::Streaming(target.session_id)
        })
    }
}

/// Stream state boundary for conversation orchestration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StreamState {
    #[default]
    Idle,
    Streaming(StreamTarget),
    Done(StreamTarget),
    Error {
        target: StreamTarget,
        message: String,
    },
}

/// State transition input for stream lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamTransition {
    Start(StreamTarget),
    Complete(StreamTarget),
    Fail {
        target: StreamTarget,
        message: String,
    },
    ResetToIdle,
}

/// Rejection reason for illegal stream transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamTransitionRejection {
    AlreadyStreaming {
        active: StreamTarget,
        attempted: StreamTarget,
    },
    NoActiveStream,
    SessionMismatch {
        active: StreamTarget,
        attempted: StreamTarget,
    },
}

/// Result type for stream transition application.
pub type StreamTransitionResult = Result<StreamState, StreamTransitionRejection>;

impl StreamState {
    /// Returns active streaming target if and only if state is `Streaming`.
    pub fn active_target(&self) -> Option<StreamTarget> {
        match self {
            Self::Streaming(target) => Some(*target),
            Self::Idle | Self::Done(_) | Self::Error { .. } => None,
        }
    }

    /// Returns true when incoming stream data matches the active session.
    pub fn accepts_stream_event(&self, target: StreamTarget) -> bool {
        matches!(self, Self::Streaming(active) if *active == target)
    }

    /// Applies one transition deterministically.
    ///
    /// Only a non-streaming state may start a session, so two cycles can never be open at once.
    /// Terminal transitions (`Complete`/`Fail`) must match the active session exactly.
    pub fn apply(&self, transition: StreamTransition) -> StreamTransitionResult {
        match transition {
            StreamTransition::Start(target) => self.apply_start(target),
            StreamTransition::Complete(target) => self.apply_complete(target),
            StreamTransition::Fail { target, message } => self.apply_fail(target, message),
            StreamTransition::ResetToIdle => Ok(Self::Idle),
        }
    }

    fn apply_start(&self, target: StreamTarget) -> StreamTransitionResult {
        match self {
            Self::Streaming(active) => Err(StreamTransitionRejection::AlreadyStreaming {
                active: *active,
                attempted: target,
            }),
            Self::Idle | Self::Done(_) | Self::Error { .. } => Ok(Self::Streaming(target)),
        }
    }

    fn apply_complete(&self, target: StreamTarget) -> StreamTransitionResult {
        match self {
            Self::Streaming(active) if *active == target => Ok(Self::Done(target)),
            Self::Streaming(active) => Err(StreamTransitionRejection::SessionMismatch {
                active: *active,
                attempted: target,
            }),
            Self::Idle | Self::Done(_) | Self::Error { .. } => {
                Err(StreamTransitionRejection::NoActiveStream)
            }
        }
    }

    fn apply_fail(&self, target: StreamTarget, message: String) -> StreamTransitionResult {
        match self {
            Self::Streaming(active) if *active == target => Ok(Self::Error { target, message }),
            Self::Streaming(active) => Err(StreamTransitionRejection::SessionMismatch {
                active: *active,
                attempted: target,
            }),
            Self::Idle | Self::Done(_) | Self::Error { .. } => {
                Err(StreamTransitionRejection::NoActiveStream)
            }
        }
    }
}
