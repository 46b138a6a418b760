use std::fmt;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::message::{MessageStatus, StreamTarget};

/// Why a cycle could not stream a reply from the endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleFailure {
    /// Connection refused, DNS failure, or the body broke off mid-transfer.
    Transport(String),
    /// The endpoint answered with a non-success status.
    Status(u16),
    /// The cycle deadline expired and cancelled the request.
    Timeout(Duration),
    /// The user cancelled the request.
    Cancelled,
}

impl fmt::Display for CycleFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(message) => f.write_str(message),
            Self::Status(status) => write!(f, "Server returned {status}"),
            Self::Timeout(timeout) => {
                write!(f, "request timed out after {}s", timeout.as_secs_f32())
            }
            Self::Cancelled => f.write_str("request cancelled"),
        }
    }
}

/// How a cycle resolved its assistant message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The full streamed reply is in place.
    Completed { characters: usize },
    /// The stream ended without any text; a fixed retry hint is in place.
    Empty,
    /// A mock reply replaced whatever had streamed.
    Mocked { failure: CycleFailure },
    /// The fixed connection-failure text replaced whatever had streamed.
    Failed { failure: CycleFailure },
}

impl CycleOutcome {
    /// Final status of the assistant message for this outcome.
    pub fn message_status(&self) -> MessageStatus {
        match self {
            Self::Completed { .. } | Self::Empty => MessageStatus::Done,
            Self::Mocked { .. } => MessageStatus::Mocked,
            Self::Failed { failure } => MessageStatus::Error(failure.to_string()),
        }
    }

    pub fn failure(&self) -> Option<&CycleFailure> {
        match self {
            Self::Completed { .. } | Self::Empty => None,
            Self::Mocked { failure } | Self::Failed { failure } => Some(failure),
        }
    }
}

/// What the view keeps of an open cycle: its target and a way to cancel it.
#[derive(Debug, Clone)]
pub struct CycleHandle {
    target: StreamTarget,
    cancel: CancellationToken,
}

impl CycleHandle {
    pub(crate) fn new(target: StreamTarget, cancel: CancellationToken) -> Self {
        Self { target, cancel }
    }

    pub fn target(&self) -> StreamTarget {
        self.target
    }

    /// Token that aborts the in-flight request when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}
