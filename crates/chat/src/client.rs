use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::StreamExt;
use parley_llm::{
    DEFAULT_MODEL, GenerateRequest, InferenceProvider, ProviderError, StreamItem, fragment_stream,
};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::environment::{Environment, EnvironmentClassifier};
use crate::events::{CycleFailure, CycleOutcome};
use crate::message::StreamTarget;
use crate::mock::MockReplies;
use crate::notify::{Notification, NotificationSink};
use crate::terminal::LogSink;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_MOCK_DELAY: Duration = Duration::from_millis(1000);

/// Shown when the stream finished without producing any text.
pub const EMPTY_REPLY_MESSAGE: &str = "I couldn't generate a response. Please try again.";

/// Shown when a cycle is abandoned before it settled.
pub const INTERRUPTED_MESSAGE: &str = "Request interrupted before completion.";

/// Placeholder text after a local connection failure.
pub fn connection_failure_message(server_address: &str) -> String {
    format!(
        "I'm having trouble connecting to the LLM server. Please check that your local server is \
         running at {server_address}. If you're viewing this in a preview environment, you'll \
         need to run the app locally to connect to your LLM server."
    )
}

/// Receives the two kinds of placeholder mutation a cycle performs.
///
/// Every call names the cycle's target; implementations drop calls for stale targets.
pub trait CycleSink {
    fn append_fragment(&mut self, target: StreamTarget, fragment: &str);
    fn replace_content(&mut self, target: StreamTarget, content: &str);
}

/// Per-cycle knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleOptions {
    pub model: String,
    /// Deadline for the whole transport phase, connect through end of body.
    pub timeout: Duration,
    pub mock_delay: Duration,
}

impl Default for CycleOptions {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            timeout: DEFAULT_TIMEOUT,
            mock_delay: DEFAULT_MOCK_DELAY,
        }
    }
}

/// Everything one request cycle owns while it runs.
#[derive(Debug, Clone)]
pub struct RequestCycle {
    pub prompt: String,
    pub target: StreamTarget,
    pub cancel: CancellationToken,
    pub started_at: Instant,
}

impl RequestCycle {
    pub fn new(prompt: impl Into<String>, target: StreamTarget) -> Self {
        Self {
            prompt: prompt.into(),
            target,
            cancel: CancellationToken::new(),
            started_at: Instant::now(),
        }
    }
}

/// Cancels the cycle token once the deadline passes. Disarmed on drop.
struct DeadlineGuard {
    fired: Arc<AtomicBool>,
    timer: JoinHandle<()>,
}

impl DeadlineGuard {
    fn arm(cancel: CancellationToken, timeout: Duration) -> Self {
        let fired = Arc::new(AtomicBool::new(false));
        let timer = tokio::spawn({
            let fired = Arc::clone(&fired);
            async move {
                tokio::time::sleep(timeout).await;
                fired.store(true, Ordering::SeqCst);
                cancel.cancel();
            }
        });
        Self { fired, timer }
    }

    fn fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }
}

impl Drop for DeadlineGuard {
    fn drop(&mut self) {
        self.timer.abort();
    }
}

/// Runs request cycles against one provider and applies the fallback policy when they fail.
///
/// Cheap to clone: every collaborator is shared.
#[derive(Clone)]
pub struct InferenceClient {
    provider: Arc<dyn InferenceProvider>,
    classifier: Arc<dyn EnvironmentClassifier>,
    log: Arc<dyn LogSink>,
    notifier: Arc<dyn NotificationSink>,
    options: CycleOptions,
    mock_replies: MockReplies,
}

impl InferenceClient {
    pub fn new(
        provider: Arc<dyn InferenceProvider>,
        classifier: Arc<dyn EnvironmentClassifier>,
        log: Arc<dyn LogSink>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        let options = CycleOptions {
            model: provider.default_model().to_string(),
            ..CycleOptions::default()
        };
        Self {
            provider,
            classifier,
            log,
            notifier,
            options,
            mock_replies: MockReplies::default(),
        }
    }

    pub fn with_options(mut self, options: CycleOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_mock_replies(mut self, mock_replies: MockReplies) -> Self {
        self.mock_replies = mock_replies;
        self
    }

    pub fn options(&self) -> &CycleOptions {
        &self.options
    }

    pub fn set_model(&mut self, model: impl Into<String>) {
        self.options.model = model.into();
    }

    pub fn provider(&self) -> &Arc<dyn InferenceProvider> {
        &self.provider
    }

    pub fn server_address(&self) -> &str {
        self.provider.server_address()
    }

    pub fn environment(&self) -> Environment {
        self.classifier.classify()
    }

    /// Drives one cycle to a settled placeholder.
    ///
    /// Never fails: transport errors, timeouts and cancellation all resolve through the fallback
    /// policy. Does not close the cycle; the caller does that with the returned outcome.
    pub async fn run(&self, cycle: &RequestCycle, sink: &mut dyn CycleSink) -> CycleOutcome {
        self.log
            .log_line(&format!("POST {}", self.provider.endpoint()));

        let deadline = DeadlineGuard::arm(cycle.cancel.clone(), self.options.timeout);
        let streamed = self.stream_reply(cycle, sink).await;
        let timed_out = deadline.fired();
        drop(deadline);

        match streamed {
            Ok(0) => {
                self.log.log_line("Generated 0 characters of text");
                sink.replace_content(cycle.target, EMPTY_REPLY_MESSAGE);
                tracing::debug!(target = ?cycle.target, "stream produced no text");
                CycleOutcome::Empty
            }
            Ok(characters) => {
                self.log
                    .log_line(&format!("Generated {characters} characters of text"));
                tracing::debug!(
                    target = ?cycle.target,
                    characters,
                    elapsed_ms = cycle.started_at.elapsed().as_millis() as u64,
                    "stream completed"
                );
                CycleOutcome::Completed { characters }
            }
            Err(CycleFailure::Cancelled) if timed_out => {
                self.log.log_line(&format!(
                    "Request timed out after {}s",
                    self.options.timeout.as_secs_f32()
                ));
                self.fall_back(cycle, CycleFailure::Timeout(self.options.timeout), sink)
                    .await
            }
            Err(CycleFailure::Cancelled) => {
                self.log.log_line("Request cancelled");
                self.fall_back(cycle, CycleFailure::Cancelled, sink).await
            }
            Err(failure) => self.fall_back(cycle, failure, sink).await,
        }
    }

    /// Streams the reply into the placeholder and returns how many characters arrived.
    async fn stream_reply(
        &self,
        cycle: &RequestCycle,
        sink: &mut dyn CycleSink,
    ) -> Result<usize, CycleFailure> {
        let request = GenerateRequest::streaming(&self.options.model, &cycle.prompt);
        let opened = tokio::select! {
            biased;
            _ = cycle.cancel.cancelled() => return Err(CycleFailure::Cancelled),
            opened = self.provider.open_stream(request) => opened,
        };
        let body = opened.map_err(|error| self.open_failure(error))?;
        self.log.log_line("Response received from server");

        let mut fragments = fragment_stream(body);
        let mut characters = 0;

        loop {
            let item = tokio::select! {
                biased;
                _ = cycle.cancel.cancelled() => {
                    tracing::debug!(target = ?cycle.target, "stream cancelled");
                    return Err(CycleFailure::Cancelled);
                }
                item = fragments.next() => item,
            };

            match item {
                Some(StreamItem::Fragment(fragment)) => {
                    if let Some(text) = fragment.text() {
                        sink.append_fragment(cycle.target, text);
                        characters += text.chars().count();
                    }
                    if fragment.done {
                        break;
                    }
                }
                Some(StreamItem::Malformed { line, error }) => {
                    self.log
                        .log_line(&format!("Failed to parse stream line: {error}"));
                    tracing::warn!(target = ?cycle.target, %line, %error, "skipping stream line");
                }
                Some(StreamItem::Failed(error)) => {
                    tracing::warn!(target = ?cycle.target, %error, "stream broke off");
                    return Err(CycleFailure::Transport(error.to_string()));
                }
                None => break,
            }
        }

        self.log.log_line("Stream completed");
        Ok(characters)
    }

    fn open_failure(&self, error: ProviderError) -> CycleFailure {
        tracing::error!(
            provider_id = %self.provider.id(),
            model = %self.options.model,
            %error,
            "failed to open provider stream"
        );
        match error.status() {
            Some(status) => {
                self.log
                    .log_line(&format!("Error: Server returned {status}"));
                CycleFailure::Status(status)
            }
            None => CycleFailure::Transport(error.to_string()),
        }
    }

    async fn fall_back(
        &self,
        cycle: &RequestCycle,
        failure: CycleFailure,
        sink: &mut dyn CycleSink,
    ) -> CycleOutcome {
        self.log.log_line(&format!("Fetch error: {failure}"));

        match self.classifier.classify() {
            Environment::RemotePreview => {
                self.log
                    .log_line("Using mock response mode (not on localhost)");
                tokio::time::sleep(self.options.mock_delay).await;
                sink.replace_content(cycle.target, self.mock_replies.pick());
                self.log.log_line("Generated mock response");
                CycleOutcome::Mocked { failure }
            }
            Environment::Local => {
                let server_address = self.provider.server_address();
                self.log.log_line(&format!("Connection error: {failure}"));
                self.notifier.notify(Notification::error(
                    "Connection Error",
                    format!(
                        "Failed to connect to the LLM server at {server_address}. Make sure your \
                         server is running."
                    ),
                ));
                sink.replace_content(cycle.target, &connection_failure_message(server_address));
                CycleOutcome::Failed { failure }
            }
        }
    }
}

impl std::fmt::Debug for InferenceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceClient")
            .field("provider_id", &self.provider.id())
            .field("endpoint", &self.provider.endpoint())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_text_names_the_server() {
        let text = connection_failure_message("127.0.0.1:11434");
        assert!(text.contains("running at 127.0.0.1:11434."));
        assert!(text.starts_with("I'm having trouble connecting"));
    }

    #[test]
    fn default_options_use_sixty_second_deadline() {
        let options = CycleOptions::default();
        assert_eq!(options.timeout, Duration::from_secs(60));
        assert_eq!(options.mock_delay, Duration::from_secs(1));
        assert_eq!(options.model, DEFAULT_MODEL);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_cancels_token_and_reports_fired() {
        let token = CancellationToken::new();
        let guard = DeadlineGuard::arm(token.clone(), Duration::from_secs(5));

        token.cancelled().await;
        assert!(guard.fired());
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_deadline_never_fires() {
        let token = CancellationToken::new();
        drop(DeadlineGuard::arm(token.clone(), Duration::from_secs(5)));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(!token.is_cancelled());
    }
}
