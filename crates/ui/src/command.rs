/// One line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    /// Toggle the log panel.
    Logs,
    /// Clear the log panel.
    Clear,
    Model(String),
    Host(String),
    Quit,
    /// A slash command that is not recognized or lacks its argument.
    Invalid(String),
    /// Anything else is a chat message, submitted as typed.
    Message(String),
}

pub const HELP: &str = "\
Type a message and press Enter to send it.
  /help          show this help
  /logs          show or hide the request log
  /clear         clear the request log
  /model <name>  switch the model used for new requests
  /host <name>   set the host identity (localhost talks to the server, anything else uses mock replies)
  /quit          exit (Ctrl-D also works)
Press Ctrl-C while a reply is streaming to cancel it.";

impl Command {
    pub fn parse(line: &str) -> Self {
        let trimmed = line.trim();
        let Some(rest) = trimmed.strip_prefix('/') else {
            return Self::Message(line.to_string());
        };

        let (name, argument) = match rest.split_once(char::is_whitespace) {
            Some((name, argument)) => (name, argument.trim()),
            None => (rest, ""),
        };

        match (name, argument) {
            ("help", _) => Self::Help,
            ("logs", _) => Self::Logs,
            ("clear", _) => Self::Clear,
            ("quit" | "exit", _) => Self::Quit,
            ("model", argument) if !argument.is_empty() => Self::Model(argument.to_string()),
            ("host", argument) if !argument.is_empty() => Self::Host(argument.to_string()),
            _ => Self::Invalid(trimmed.to_string()),
        }
    }
}
