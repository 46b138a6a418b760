use std::io::{self, Write};
use std::sync::Arc;

use parley_chat::{
    ChatSession, CycleOutcome, EnvironmentClassifier, InferenceClient, Notification,
    NotificationQueue, NotificationSink, Severity, TerminalLog,
};
use parley_llm::{ProviderError, create_provider};
use snafu::{ResultExt, Snafu};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::command::{Command, HELP};
use crate::render::TranscriptRenderer;
use crate::settings::{AppSettings, SettingsStore};

const PROMPT: &str = "you> ";

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum AppError {
    #[snafu(display("failed to build async runtime on `{stage}`: {source}"))]
    BuildRuntime {
        stage: &'static str,
        source: io::Error,
    },
    #[snafu(display("failed to read input on `{stage}`: {source}"))]
    ReadInput {
        stage: &'static str,
        source: io::Error,
    },
    #[snafu(display("failed to write output on `{stage}`: {source}"))]
    WriteOutput {
        stage: &'static str,
        source: io::Error,
    },
    #[snafu(display("failed to create inference provider on `{stage}`: {source}"))]
    CreateProvider {
        stage: &'static str,
        source: ProviderError,
    },
}

/// Terminal chat shell: reads lines, runs cycles, prints replies, logs and toasts.
pub struct ChatApp {
    settings: SettingsStore,
    session: ChatSession,
    log: TerminalLog,
    toasts: NotificationQueue,
    log_cursor: usize,
}

impl ChatApp {
    pub fn new(settings: SettingsStore) -> Result<Self, AppError> {
        let current = settings.settings();
        let provider = create_provider(current.provider_config()).context(CreateProviderSnafu {
            stage: "create-provider",
        })?;

        let log = TerminalLog::new();
        log.set_visible(current.show_log);
        let toasts = NotificationQueue::new();
        let client = InferenceClient::new(
            provider,
            Arc::new(settings.clone()),
            Arc::new(log.clone()),
            Arc::new(toasts.clone()),
        )
        .with_options(current.cycle_options());

        tracing::info!(
            provider_id = %current.provider_id,
            endpoint = %current.endpoint,
            model = %current.model,
            host = %current.host,
            "chat session ready"
        );

        Ok(Self {
            session: ChatSession::new(Arc::new(client), log.clone()),
            settings,
            log,
            toasts,
            log_cursor: 0,
        })
    }

    pub async fn run(&mut self) -> Result<(), AppError> {
        let mut out = io::stdout();
        writeln!(out, "parley: chatting with {}", self.session.client().server_address())
            .and_then(|()| writeln!(out, "{HELP}\n"))
            .context(WriteOutputSnafu {
                stage: "write-banner",
            })?;
        self.flush_log()?;

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            write!(out, "{PROMPT}")
                .and_then(|()| out.flush())
                .context(WriteOutputSnafu {
                    stage: "write-prompt",
                })?;

            let line = tokio::select! {
                line = lines.next_line() => line.context(ReadInputSnafu { stage: "read-stdin" })?,
                _ = tokio::signal::ctrl_c() => None,
            };
            let Some(line) = line else {
                writeln!(out).context(WriteOutputSnafu { stage: "write-exit" })?;
                break;
            };

            match Command::parse(&line) {
                Command::Quit => break,
                Command::Help => {
                    writeln!(out, "{HELP}").context(WriteOutputSnafu { stage: "write-help" })?
                }
                Command::Logs => self.toggle_log()?,
                Command::Clear => {
                    self.log.clear();
                    self.log_cursor = 0;
                    eprintln!("(log cleared)");
                }
                Command::Model(model) => self.switch_model(model),
                Command::Host(host) => self.switch_host(host),
                Command::Invalid(command) => {
                    eprintln!("unknown command `{command}`; try /help");
                }
                Command::Message(text) => {
                    self.session.on_input_change(text);
                    self.submit_input().await?;
                }
            }
            self.show_toasts();
        }

        Ok(())
    }

    async fn submit_input(&mut self) -> Result<(), AppError> {
        let Some(handle) = self.session.begin_input() else {
            return Ok(());
        };

        let cancel = handle.cancel_token();
        let interrupt = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });

        let mut renderer = TranscriptRenderer::new(io::stdout());
        let outcome = self.session.drive(&mut renderer).await;
        interrupt.abort();

        if let Some(error) = renderer.take_error() {
            return Err(error).context(WriteOutputSnafu {
                stage: "write-reply",
            });
        }
        if let Some(CycleOutcome::Mocked { failure } | CycleOutcome::Failed { failure }) = &outcome
        {
            tracing::debug!(%failure, "cycle settled through fallback");
        }
        self.flush_log()
    }

    fn toggle_log(&mut self) -> Result<(), AppError> {
        if self.log.toggle_visible() {
            self.log_cursor = 0;
            self.flush_log()
        } else {
            eprintln!("(log hidden)");
            Ok(())
        }
    }

    /// Prints log lines added since the last flush while the panel is visible.
    fn flush_log(&mut self) -> Result<(), AppError> {
        let lines = self.log.lines();
        if self.log.is_visible() {
            let mut err = io::stderr().lock();
            for line in lines.iter().skip(self.log_cursor) {
                writeln!(err, "  | {line}").context(WriteOutputSnafu { stage: "write-log" })?;
            }
        }
        self.log_cursor = lines.len();
        Ok(())
    }

    fn switch_model(&mut self, model: String) {
        let updated = AppSettings {
            model: model.clone(),
            ..(*self.settings.settings()).clone()
        };
        if let Err(error) = self.settings.update(updated) {
            tracing::warn!(%error, "failed to persist model selection");
            eprintln!("(model not saved: {error})");
        }

        self.session.set_model(model.clone());
        self.toasts.notify(Notification::info(
            "Model changed",
            format!("New requests use {model}"),
        ));
    }

    fn switch_host(&mut self, host: String) {
        self.settings.override_host(&host);

        let mode = if self.settings.classify().is_local() {
            "requests go to the local server"
        } else {
            "requests fall back to mock replies"
        };
        self.toasts.notify(Notification::info(
            "Host changed",
            format!("Running as {}; {mode}", self.settings.host()),
        ));
    }

    fn show_toasts(&self) {
        for toast in self.toasts.drain() {
            let label = match toast.severity {
                Severity::Info => "info",
                Severity::Error => "error",
            };
            eprintln!("[{label}] {}: {}", toast.title, toast.description);
        }
    }
}

/// Loads settings and runs the shell on a single-threaded runtime.
pub fn run() -> Result<(), AppError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context(BuildRuntimeSnafu {
            stage: "build-runtime",
        })?;

    runtime.block_on(async {
        let mut app = ChatApp::new(SettingsStore::load())?;
        app.run().await
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_provider_fails_to_start() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SettingsStore::new(dir.path().join("settings.json"));
        store
            .update(AppSettings {
                provider_id: "openai".into(),
                ..AppSettings::default()
            })
            .expect("update");

        assert!(matches!(
            ChatApp::new(store),
            Err(AppError::CreateProvider { .. })
        ));
    }

    #[tokio::test]
    async fn model_switch_persists_and_raises_toast() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SettingsStore::new(dir.path().join("settings.json"));
        let mut app = ChatApp::new(store.clone()).expect("app");

        app.switch_model("mistral".into());

        assert_eq!(store.settings().model, "mistral");
        assert_eq!(app.session.client().options().model, "mistral");
        assert!(store.config_path().exists());
        let toasts = app.toasts.drain();
        assert_eq!(toasts.len(), 1);
        assert_eq!(toasts[0].severity, Severity::Info);
    }

    #[tokio::test]
    async fn host_switch_changes_classification_without_saving() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SettingsStore::new(dir.path().join("settings.json"));
        let mut app = ChatApp::new(store.clone()).expect("app");
        assert!(app.session.client().environment().is_local());

        app.switch_host("preview.example.app".into());

        assert!(!app.session.client().environment().is_local());
        assert!(!store.config_path().exists());
    }

    #[tokio::test]
    async fn model_switch_after_host_switch_keeps_saved_host() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SettingsStore::new(dir.path().join("settings.json"));
        let mut app = ChatApp::new(store.clone()).expect("app");

        app.switch_host("preview.example.app".into());
        app.switch_model("mistral".into());

        assert!(!app.session.client().environment().is_local());
        let saved = std::fs::read_to_string(store.config_path()).expect("read settings");
        assert!(!saved.contains("preview.example.app"));

        let reloaded = SettingsStore::new(store.config_path().to_path_buf());
        assert_eq!(reloaded.settings().host, "localhost");
        assert_eq!(reloaded.settings().model, "mistral");
        assert!(reloaded.classify().is_local());
    }

    #[tokio::test]
    async fn startup_log_holds_the_banner() {
        let dir = tempfile::tempdir().expect("tempdir");
        let app = ChatApp::new(SettingsStore::new(dir.path().join("settings.json"))).expect("app");

        let lines = app.log.lines();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].ends_with("Running on localhost"));
        assert!(!app.log.is_visible());
    }
}
