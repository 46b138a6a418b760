use std::io::{self, Write};

use parley_chat::{ConversationObserver, Message, MessageId, MessageStatus, Role};

const ASSISTANT_PREFIX: &str = "assistant> ";

/// Prints the trailing assistant message as it streams.
///
/// Appends are printed as deltas. When the content is replaced instead of extended, the whole
/// replacement is printed on a fresh line.
#[derive(Debug)]
pub struct TranscriptRenderer<W: Write> {
    out: W,
    current: Option<MessageId>,
    printed: String,
    finished: bool,
    error: Option<io::Error>,
}

impl<W: Write> TranscriptRenderer<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            current: None,
            printed: String::new(),
            finished: false,
            error: None,
        }
    }

    pub fn render(&mut self, messages: &[Message], is_loading: bool) {
        if self.error.is_some() {
            return;
        }
        if let Err(error) = self.write_update(messages, is_loading) {
            self.error = Some(error);
        }
    }

    /// First write failure since the last call, if any.
    pub fn take_error(&mut self) -> Option<io::Error> {
        self.error.take()
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_update(&mut self, messages: &[Message], is_loading: bool) -> io::Result<()> {
        let Some(message) = messages.last().filter(|message| message.role == Role::Assistant)
        else {
            return Ok(());
        };

        if self.current != Some(message.id) {
            self.current = Some(message.id);
            self.printed.clear();
            self.finished = false;
            write!(self.out, "{ASSISTANT_PREFIX}")?;
        }
        if self.finished {
            return Ok(());
        }

        match message.content.strip_prefix(self.printed.as_str()) {
            Some(delta) => write!(self.out, "{delta}")?,
            None => write!(self.out, "\n{ASSISTANT_PREFIX}{}", message.content)?,
        }
        self.printed.clone_from(&message.content);

        if !is_loading {
            self.finished = true;
            match &message.status {
                MessageStatus::Mocked => writeln!(self.out, "\n  (mock reply)")?,
                MessageStatus::Error(reason) => writeln!(self.out, "\n  (failed: {reason})")?,
                MessageStatus::Done | MessageStatus::Streaming(_) => writeln!(self.out)?,
            }
        }
        self.out.flush()
    }
}

impl<W: Write> ConversationObserver for TranscriptRenderer<W> {
    fn conversation_changed(&mut self, messages: &[Message], is_loading: bool) {
        self.render(messages, is_loading);
    }
}
