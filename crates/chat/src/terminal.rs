use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Receives human-readable diagnostics for each phase of a request cycle.
pub trait LogSink: Send + Sync {
    fn log_line(&self, message: &str);
}

#[derive(Debug, Default)]
struct TerminalState {
    lines: Vec<String>,
    visible: bool,
}

/// Append-only log shown by the log panel.
///
/// Cloning yields another handle to the same log. Starts empty and hidden.
#[derive(Debug, Clone, Default)]
pub struct TerminalLog {
    state: Arc<Mutex<TerminalState>>,
}

impl TerminalLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `message` prefixed with the local wall-clock time.
    pub fn log(&self, message: &str) {
        let timestamp = chrono::Local::now().format("%H:%M:%S");
        self.add_raw(format!("[{timestamp}] {message}"));
    }

    /// Appends a line verbatim.
    pub fn add_raw(&self, line: impl Into<String>) {
        let line = line.into();
        tracing::debug!(target: "parley::terminal", "{line}");
        self.state().lines.push(line);
    }

    pub fn clear(&self) {
        self.state().lines.clear();
    }

    pub fn lines(&self) -> Vec<String> {
        self.state().lines.clone()
    }

    pub fn len(&self) -> usize {
        self.state().lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().lines.is_empty()
    }

    pub fn is_visible(&self) -> bool {
        self.state().visible
    }

    pub fn set_visible(&self, visible: bool) {
        self.state().visible = visible;
    }

    /// Flips visibility and returns the new value.
    pub fn toggle_visible(&self) -> bool {
        let mut state = self.state();
        state.visible = !state.visible;
        state.visible
    }

    fn state(&self) -> MutexGuard<'_, TerminalState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl LogSink for TerminalLog {
    fn log_line(&self, message: &str) {
        self.log(message);
    }
}
