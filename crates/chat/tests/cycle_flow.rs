use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures::stream::{self, StreamExt};
use parley_chat::{
    ChatSession, CycleFailure, CycleOptions, CycleOutcome, EMPTY_REPLY_MESSAGE, Environment,
    FixedEnvironment, INTERRUPTED_MESSAGE, InferenceClient, MOCK_REPLIES, Message, MessageStatus,
    NotificationQueue, Role, Severity, TerminalLog, connection_failure_message,
};
use parley_llm::{
    BoxFuture, ByteStream, GenerateRequest, InferenceProvider, OllamaProvider, ProviderConfig,
    ProviderError, ProviderResult,
};
use tokio::time::Instant;

const FAKE_ENDPOINT: &str = "http://127.0.0.1:11434/api/generate";
const FAKE_ADDRESS: &str = "127.0.0.1:11434";

#[derive(Debug, Clone)]
enum Reply {
    /// Body chunks in order; `Err` breaks the body off at that point.
    Body(Vec<Result<&'static str, &'static str>>),
    /// Body chunks, then the body never ends.
    Stall(Vec<&'static str>),
    Status(u16),
    Refused,
    /// The request never gets response headers.
    Hang,
}

struct FakeProvider {
    reply: Reply,
    requests: Mutex<Vec<GenerateRequest>>,
}

impl FakeProvider {
    fn new(reply: Reply) -> Self {
        Self {
            reply,
            requests: Mutex::new(Vec::new()),
        }
    }

    fn requests(&self) -> Vec<GenerateRequest> {
        self.requests.lock().expect("requests").clone()
    }
}

fn refused(details: &str) -> ProviderError {
    ProviderError::InvalidEndpoint {
        stage: "fake-send",
        endpoint: FAKE_ENDPOINT.to_string(),
        details: details.to_string(),
    }
}

fn chunk(text: &'static str) -> ProviderResult<Bytes> {
    Ok(Bytes::from_static(text.as_bytes()))
}

impl InferenceProvider for FakeProvider {
    fn id(&self) -> &str {
        "fake"
    }

    fn name(&self) -> &str {
        "Fake"
    }

    fn endpoint(&self) -> &str {
        FAKE_ENDPOINT
    }

    fn server_address(&self) -> &str {
        FAKE_ADDRESS
    }

    fn default_model(&self) -> &str {
        "llama3"
    }

    fn open_stream<'a>(
        &'a self,
        request: GenerateRequest,
    ) -> BoxFuture<'a, ProviderResult<ByteStream>> {
        self.requests.lock().expect("requests").push(request);
        let reply = self.reply.clone();

        Box::pin(async move {
            match reply {
                Reply::Body(chunks) => {
                    let body = stream::iter(chunks.into_iter().map(|item| match item {
                        Ok(text) => chunk(text),
                        Err(details) => Err(refused(details)),
                    }));
                    Ok(Box::pin(body) as ByteStream)
                }
                Reply::Stall(chunks) => {
                    let body = stream::iter(chunks.into_iter().map(chunk)).chain(stream::pending());
                    Ok(Box::pin(body) as ByteStream)
                }
                Reply::Status(status) => Err(ProviderError::Status {
                    stage: "fake-status",
                    status,
                    body: "{\"error\":\"model not found\"}".to_string(),
                }),
                Reply::Refused => Err(refused("connection refused")),
                Reply::Hang => std::future::pending().await,
            }
        })
    }
}

struct Harness {
    session: ChatSession,
    log: TerminalLog,
    toasts: NotificationQueue,
    provider: Arc<FakeProvider>,
}

fn harness(reply: Reply, environment: Environment) -> Harness {
    harness_with(reply, environment, CycleOptions::default())
}

fn harness_with(reply: Reply, environment: Environment, options: CycleOptions) -> Harness {
    let provider = Arc::new(FakeProvider::new(reply));
    let log = TerminalLog::new();
    let toasts = NotificationQueue::new();
    let client = InferenceClient::new(
        provider.clone(),
        Arc::new(FixedEnvironment(environment)),
        Arc::new(log.clone()),
        Arc::new(toasts.clone()),
    )
    .with_options(options);
    let session = ChatSession::new(Arc::new(client), log.clone());
    log.clear();

    Harness {
        session,
        log,
        toasts,
        provider,
    }
}

fn log_messages(log: &TerminalLog) -> Vec<String> {
    log.lines()
        .into_iter()
        .map(|line| {
            line.split_once("] ")
                .map(|(_, message)| message.to_string())
                .unwrap_or(line)
        })
        .collect()
}

fn ignore(_: &[Message], _: bool) {}

fn assistant(session: &ChatSession) -> &Message {
    let message = session.messages().last().expect("assistant message");
    assert_eq!(message.role, Role::Assistant);
    message
}

#[tokio::test]
async fn streamed_fragments_concatenate_in_order() {
    let mut h = harness(
        Reply::Body(vec![
            Ok("{\"response\":\"Hel\",\"done\":false}\n{\"resp"),
            Ok("onse\":\"lo\",\"done\":false}\n"),
            Ok("{\"response\":\" world\",\"done\":false}\n"),
            Ok("{\"response\":\"\",\"done\":true}\n"),
        ]),
        Environment::Local,
    );

    let mut snapshots = Vec::new();
    let mut observer = |messages: &[Message], is_loading: bool| {
        let content = messages.last().map(|message| message.content.clone());
        snapshots.push((content, is_loading));
    };
    let outcome = h.session.submit("  hi there  ", &mut observer).await;

    assert_eq!(outcome, Some(CycleOutcome::Completed { characters: 11 }));
    assert_eq!(h.session.messages().len(), 2);
    assert_eq!(h.session.messages()[0].role, Role::User);
    assert_eq!(h.session.messages()[0].content, "hi there");
    assert_eq!(assistant(&h.session).content, "Hello world");
    assert_eq!(assistant(&h.session).status, MessageStatus::Done);
    assert!(!h.session.is_loading());

    let progress: Vec<_> = snapshots
        .iter()
        .map(|(content, _)| content.clone().unwrap_or_default())
        .collect();
    assert_eq!(progress, vec!["", "Hel", "Hello", "Hello world", "Hello world"]);
    assert!(snapshots[..4].iter().all(|(_, is_loading)| *is_loading));
    assert_eq!(snapshots.last().map(|(_, is_loading)| *is_loading), Some(false));

    let requests = h.provider.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].prompt, "hi there");
    assert_eq!(requests[0].model, "llama3");
    assert!(requests[0].stream);

    assert_eq!(
        log_messages(&h.log),
        vec![
            "User message: hi there".to_string(),
            "Sending request to LLM server...".to_string(),
            format!("POST {FAKE_ENDPOINT}"),
            "Response received from server".to_string(),
            "Stream completed".to_string(),
            "Generated 11 characters of text".to_string(),
            "Request completed".to_string(),
        ]
    );
    assert!(h.toasts.is_empty());
}

#[tokio::test]
async fn malformed_line_is_skipped_without_aborting() {
    let mut h = harness(
        Reply::Body(vec![Ok(
            "{\"response\":\"Hel\"}\nnot json at all\n{\"response\":\"lo\"}\n{\"done\":true}\n",
        )]),
        Environment::Local,
    );

    let outcome = h.session.submit("hi", &mut ignore).await;

    assert_eq!(outcome, Some(CycleOutcome::Completed { characters: 5 }));
    assert_eq!(assistant(&h.session).content, "Hello");
    assert_eq!(assistant(&h.session).status, MessageStatus::Done);
    let log = log_messages(&h.log);
    assert!(
        log.iter()
            .any(|line| line.starts_with("Failed to parse stream line: "))
    );
    assert!(!log.iter().any(|line| line.starts_with("Fetch error")));
}

#[tokio::test]
async fn done_and_end_of_body_both_finish_the_stream() {
    let mut after_done = harness(
        Reply::Body(vec![Ok(
            "{\"response\":\"a\",\"done\":true}\n{\"response\":\"ignored\"}\n",
        )]),
        Environment::Local,
    );
    after_done.session.submit("hi", &mut ignore).await;
    assert_eq!(assistant(&after_done.session).content, "a");

    let mut without_done = harness(
        Reply::Body(vec![Ok("{\"response\":\"b\"}\n{\"response\":\"c\"}")]),
        Environment::Local,
    );
    let outcome = without_done.session.submit("hi", &mut ignore).await;
    assert_eq!(outcome, Some(CycleOutcome::Completed { characters: 2 }));
    assert_eq!(assistant(&without_done.session).content, "bc");
}

#[tokio::test]
async fn stream_without_text_settles_with_retry_hint() {
    let mut h = harness(
        Reply::Body(vec![Ok("{\"done\":true}\n")]),
        Environment::Local,
    );

    let outcome = h.session.submit("hi", &mut ignore).await;

    assert_eq!(outcome, Some(CycleOutcome::Empty));
    assert_eq!(assistant(&h.session).content, EMPTY_REPLY_MESSAGE);
    assert_eq!(assistant(&h.session).status, MessageStatus::Done);
    assert_eq!(
        log_messages(&h.log).last().map(String::as_str),
        Some("Generated 0 characters of text")
    );
}

#[tokio::test]
async fn blank_submissions_change_nothing() {
    let mut h = harness(Reply::Refused, Environment::Local);

    for text in ["", "   ", "\n\t "] {
        h.session.on_input_change(text);
        assert_eq!(h.session.submit_input(&mut ignore).await, None);
        assert_eq!(h.session.submit(text, &mut ignore).await, None);
        assert!(!h.session.is_loading());
    }

    assert!(h.session.messages().is_empty());
    assert!(h.provider.requests().is_empty());
    assert!(h.log.is_empty());
}

#[tokio::test]
async fn submit_while_loading_is_ignored() {
    let mut h = harness(
        Reply::Body(vec![Ok("{\"response\":\"first\",\"done\":true}\n")]),
        Environment::Local,
    );

    h.session.on_input_change("first");
    let handle = h.session.begin("first").expect("cycle opens");
    assert!(h.session.is_loading());
    assert_eq!(h.session.messages().len(), 2);

    h.session.on_input_change("second");
    assert!(h.session.begin("second").is_none());
    assert_eq!(h.session.submit("second", &mut ignore).await, None);
    assert_eq!(h.session.submit_input(&mut ignore).await, None);
    assert_eq!(h.session.messages().len(), 2);
    assert_eq!(h.session.input(), "second");

    let outcome = h.session.drive(&mut ignore).await;
    assert_eq!(outcome, Some(CycleOutcome::Completed { characters: 5 }));
    assert_eq!(assistant(&h.session).id, handle.target().message_id);
    assert!(!h.session.is_loading());
    assert_eq!(h.session.drive(&mut ignore).await, None);
}

#[tokio::test]
async fn dropped_handle_leaves_cycle_pending_until_driven() {
    let mut h = harness(
        Reply::Body(vec![Ok("{\"response\":\"later\",\"done\":true}\n")]),
        Environment::Local,
    );

    drop(h.session.begin("hi").expect("cycle opens"));
    assert!(h.session.is_loading());
    assert!(h.session.begin("again").is_none());
    assert!(h.provider.requests().is_empty());

    let outcome = h.session.drive(&mut ignore).await;
    assert_eq!(outcome, Some(CycleOutcome::Completed { characters: 5 }));
    assert_eq!(assistant(&h.session).content, "later");
    assert!(!h.session.is_loading());
}

#[tokio::test]
async fn submit_input_clears_the_buffer() {
    let mut h = harness(
        Reply::Body(vec![Ok("{\"response\":\"ok\",\"done\":true}\n")]),
        Environment::Local,
    );

    h.session.on_input_change(" hello ");
    h.session.submit_input(&mut ignore).await;

    assert_eq!(h.session.input(), "");
    assert_eq!(h.session.messages()[0].content, "hello");
}

#[tokio::test(start_paused = true)]
async fn remote_transport_failure_uses_mock_reply() {
    let mut h = harness(Reply::Refused, Environment::RemotePreview);

    let started = Instant::now();
    let outcome = h.session.submit("hi", &mut ignore).await;

    assert!(matches!(
        outcome,
        Some(CycleOutcome::Mocked {
            failure: CycleFailure::Transport(_)
        })
    ));
    assert!(started.elapsed() >= Duration::from_millis(1000));
    assert!(MOCK_REPLIES.contains(&assistant(&h.session).content.as_str()));
    assert_eq!(assistant(&h.session).status, MessageStatus::Mocked);
    assert!(!h.session.is_loading());
    assert!(h.toasts.is_empty());

    let log = log_messages(&h.log);
    assert_eq!(log[2], format!("POST {FAKE_ENDPOINT}"));
    assert!(log[3].starts_with("Fetch error: "));
    assert_eq!(
        &log[4..],
        [
            "Using mock response mode (not on localhost)",
            "Generated mock response",
            "Request completed",
        ]
    );
}

#[tokio::test]
async fn local_transport_failure_raises_error_notification() {
    let mut h = harness(Reply::Refused, Environment::Local);

    let outcome = h.session.submit("hi", &mut ignore).await;

    assert!(matches!(
        outcome,
        Some(CycleOutcome::Failed {
            failure: CycleFailure::Transport(_)
        })
    ));
    assert_eq!(
        assistant(&h.session).content,
        connection_failure_message(FAKE_ADDRESS)
    );
    assert!(matches!(assistant(&h.session).status, MessageStatus::Error(_)));
    assert!(!h.session.is_loading());

    let toasts = h.toasts.drain();
    assert_eq!(toasts.len(), 1);
    assert_eq!(toasts[0].severity, Severity::Error);
    assert_eq!(toasts[0].title, "Connection Error");
    assert!(toasts[0].description.contains(FAKE_ADDRESS));

    let log = log_messages(&h.log);
    assert!(log.iter().any(|line| line.starts_with("Connection error: ")));
    assert_eq!(log.last().map(String::as_str), Some("Request completed"));
}

#[tokio::test]
async fn error_status_goes_through_fallback() {
    let mut h = harness(Reply::Status(500), Environment::Local);

    let outcome = h.session.submit("hi", &mut ignore).await;

    assert_eq!(
        outcome,
        Some(CycleOutcome::Failed {
            failure: CycleFailure::Status(500)
        })
    );
    assert_eq!(
        assistant(&h.session).status,
        MessageStatus::Error("Server returned 500".to_string())
    );
    let lines = log_messages(&h.log);
    let status_line = lines
        .iter()
        .position(|line| line == "Error: Server returned 500")
        .expect("status line logged");
    assert_eq!(lines[status_line + 1], "Fetch error: Server returned 500");
    assert_eq!(h.toasts.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn broken_body_replaces_partial_text() {
    let mut h = harness(
        Reply::Body(vec![
            Ok("{\"response\":\"partial answer\"}\n"),
            Err("connection reset"),
        ]),
        Environment::RemotePreview,
    );

    let outcome = h.session.submit("hi", &mut ignore).await;

    assert!(matches!(outcome, Some(CycleOutcome::Mocked { .. })));
    let content = &assistant(&h.session).content;
    assert!(!content.contains("partial answer"));
    assert!(MOCK_REPLIES.contains(&content.as_str()));
}

#[tokio::test(start_paused = true)]
async fn timeout_with_no_response_is_bounded() {
    let options = CycleOptions {
        timeout: Duration::from_secs(60),
        ..CycleOptions::default()
    };
    let mut h = harness_with(Reply::Hang, Environment::RemotePreview, options);

    let started = Instant::now();
    let outcome = h.session.submit("hi", &mut ignore).await;
    let elapsed = started.elapsed();

    assert_eq!(
        outcome,
        Some(CycleOutcome::Mocked {
            failure: CycleFailure::Timeout(Duration::from_secs(60))
        })
    );
    assert!(elapsed >= Duration::from_secs(61));
    assert!(elapsed < Duration::from_secs(62));
    assert!(!h.session.is_loading());
    assert!(
        log_messages(&h.log)
            .iter()
            .any(|line| line == "Request timed out after 60s")
    );
}

#[tokio::test(start_paused = true)]
async fn timeout_covers_a_stalled_body() {
    let options = CycleOptions {
        timeout: Duration::from_secs(5),
        ..CycleOptions::default()
    };
    let mut h = harness_with(
        Reply::Stall(vec!["{\"response\":\"slow\"}\n"]),
        Environment::Local,
        options,
    );

    let started = Instant::now();
    let outcome = h.session.submit("hi", &mut ignore).await;

    assert_eq!(
        outcome,
        Some(CycleOutcome::Failed {
            failure: CycleFailure::Timeout(Duration::from_secs(5))
        })
    );
    assert!(started.elapsed() < Duration::from_secs(6));
    assert_eq!(
        assistant(&h.session).content,
        connection_failure_message(FAKE_ADDRESS)
    );
}

#[tokio::test(start_paused = true)]
async fn user_cancellation_follows_fallback() {
    let mut h = harness(
        Reply::Stall(vec!["{\"response\":\"Hel\"}\n"]),
        Environment::RemotePreview,
    );

    let handle = h.session.begin("hi").expect("cycle opens");
    let token = handle.cancel_token();
    let mut observer = move |messages: &[Message], _: bool| {
        if messages.last().is_some_and(|message| message.content == "Hel") {
            token.cancel();
        }
    };
    let outcome = h.session.drive(&mut observer).await;

    assert_eq!(
        outcome,
        Some(CycleOutcome::Mocked {
            failure: CycleFailure::Cancelled
        })
    );
    assert!(!h.session.is_loading());
    let log = log_messages(&h.log);
    assert!(log.iter().any(|line| line == "Request cancelled"));
    assert!(!log.iter().any(|line| line == "Stream completed"));
}

#[tokio::test(start_paused = true)]
async fn dropped_cycle_still_settles() {
    let options = CycleOptions {
        timeout: Duration::from_secs(600),
        ..CycleOptions::default()
    };
    let mut h = harness_with(Reply::Hang, Environment::Local, options);

    h.session.begin("hi").expect("cycle opens");
    let abandoned =
        tokio::time::timeout(Duration::from_secs(1), h.session.drive(&mut ignore)).await;
    assert!(abandoned.is_err());

    assert!(!h.session.is_loading());
    assert_eq!(assistant(&h.session).content, INTERRUPTED_MESSAGE);
    assert_eq!(
        assistant(&h.session).status,
        MessageStatus::Error(INTERRUPTED_MESSAGE.to_string())
    );
    assert_eq!(
        log_messages(&h.log).last().map(String::as_str),
        Some("Request completed")
    );
    assert!(h.toasts.is_empty());
}

#[tokio::test]
async fn consecutive_cycles_each_add_one_pair() {
    let mut h = harness(
        Reply::Body(vec![Ok("{\"response\":\"ok\",\"done\":true}\n")]),
        Environment::Local,
    );

    for prompt in ["one", "two", "three"] {
        h.session.submit(prompt, &mut ignore).await;
    }

    let roles: Vec<_> = h.session.messages().iter().map(|message| message.role).collect();
    assert_eq!(
        roles,
        vec![
            Role::User,
            Role::Assistant,
            Role::User,
            Role::Assistant,
            Role::User,
            Role::Assistant
        ]
    );
    let mut ids: Vec<_> = h.session.messages().iter().map(|message| message.id).collect();
    ids.dedup();
    assert_eq!(ids.len(), 6);
    assert!(
        h.session
            .messages()
            .iter()
            .all(|message| !message.is_streaming())
    );
}

#[tokio::test]
async fn model_switch_applies_to_next_cycle() {
    let mut h = harness(
        Reply::Body(vec![Ok("{\"response\":\"ok\",\"done\":true}\n")]),
        Environment::Local,
    );

    h.session.set_model("mistral");
    h.session.submit("hi", &mut ignore).await;

    assert_eq!(h.provider.requests()[0].model, "mistral");
}

#[tokio::test]
async fn refused_loopback_connection_fails_locally() {
    let provider = OllamaProvider::new(ProviderConfig::new(
        "ollama",
        "http://127.0.0.1:1/api/generate",
        None,
    ))
    .expect("provider");
    let log = TerminalLog::new();
    let toasts = NotificationQueue::new();
    let client = InferenceClient::new(
        Arc::new(provider),
        Arc::new(FixedEnvironment(Environment::Local)),
        Arc::new(log.clone()),
        Arc::new(toasts.clone()),
    );
    let mut session = ChatSession::new(Arc::new(client), log.clone());

    let outcome = session.submit("hi", &mut ignore).await;

    assert!(matches!(
        outcome,
        Some(CycleOutcome::Failed {
            failure: CycleFailure::Transport(_)
        })
    ));
    assert_eq!(
        session.messages()[1].content,
        connection_failure_message("127.0.0.1:1")
    );
    assert_eq!(toasts.len(), 1);
}

#[tokio::test]
async fn startup_banner_reflects_environment() {
    let provider = Arc::new(FakeProvider::new(Reply::Refused));
    let log = TerminalLog::new();
    let client = InferenceClient::new(
        provider,
        Arc::new(FixedEnvironment(Environment::RemotePreview)),
        Arc::new(log.clone()),
        Arc::new(NotificationQueue::new()),
    );
    let _session = ChatSession::new(Arc::new(client), log.clone());

    assert_eq!(
        log_messages(&log),
        vec![
            "Running in preview/production environment".to_string(),
            format!("Local LLM server at {FAKE_ADDRESS} won't be accessible"),
            "Using mock response mode for demonstration".to_string(),
            "To use with a real LLM server, run this app locally".to_string(),
        ]
    );
}
