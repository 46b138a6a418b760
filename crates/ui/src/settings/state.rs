use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::{ArcSwap, ArcSwapOption};
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use parley_chat::{CycleOptions, Environment, EnvironmentClassifier, classify_host};
use parley_llm::{DEFAULT_ENDPOINT, DEFAULT_MODEL, OLLAMA_PROVIDER_ID, ProviderConfig};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

pub const SETTINGS_DIRECTORY_NAME: &str = "parley";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const ENV_PREFIX: &str = "PARLEY_";
pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_MOCK_DELAY_MS: u64 = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppSettings {
    #[serde(default = "default_provider_id")]
    pub provider_id: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_mock_delay_ms")]
    pub mock_delay_ms: u64,
    /// Identity of the host the front-end runs on; decides local versus preview behavior.
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default)]
    pub show_log: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            provider_id: default_provider_id(),
            endpoint: default_endpoint(),
            model: default_model(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            mock_delay_ms: DEFAULT_MOCK_DELAY_MS,
            host: default_host(),
            show_log: false,
        }
    }
}

impl AppSettings {
    pub fn normalized(mut self) -> Self {
        self.provider_id = non_blank_or(&self.provider_id, default_provider_id);
        self.endpoint = non_blank_or(&self.endpoint, default_endpoint);
        self.model = non_blank_or(&self.model, default_model);
        self.host = non_blank_or(&self.host, default_host);
        self.timeout_secs = self.timeout_secs.max(1);
        self
    }

    pub fn provider_config(&self) -> ProviderConfig {
        ProviderConfig::new(&self.provider_id, &self.endpoint, Some(self.model.clone()))
    }

    pub fn cycle_options(&self) -> CycleOptions {
        CycleOptions {
            model: self.model.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
            mock_delay: Duration::from_millis(self.mock_delay_ms),
        }
    }
}

/// Shared, lock-free view of the current settings plus their backing file.
///
/// Clones share the same settings. A host override lives beside the saved settings and is never
/// written to disk.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    settings: Arc<ArcSwap<AppSettings>>,
    host_override: Arc<ArcSwapOption<String>>,
    config_path: PathBuf,
}

impl SettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".parley"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    pub fn new(config_path: PathBuf) -> Self {
        let settings = Self::load_from(&config_path);
        Self {
            settings: Arc::new(ArcSwap::from_pointee(settings)),
            host_override: Arc::new(ArcSwapOption::empty()),
            config_path,
        }
    }

    pub fn load() -> Self {
        Self::new(Self::default_config_path())
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn settings(&self) -> Arc<AppSettings> {
        self.settings.load_full()
    }

    /// Normalizes, persists, then publishes `settings`.
    pub fn update(&self, settings: AppSettings) -> Result<(), SettingsError> {
        let normalized_settings = settings.normalized();
        self.persist(&normalized_settings)?;
        self.settings.store(Arc::new(normalized_settings));
        Ok(())
    }

    /// Overrides the host identity for this process only.
    pub fn override_host(&self, host: &str) {
        let host = host.trim();
        let host = (!host.is_empty()).then(|| Arc::new(host.to_string()));
        self.host_override.store(host);
    }

    /// The override when set, otherwise the saved host.
    pub fn host(&self) -> String {
        match self.host_override.load_full() {
            Some(host) => host.as_ref().clone(),
            None => self.settings.load().host.clone(),
        }
    }

    fn load_from(path: &Path) -> AppSettings {
        if !path.exists() {
            tracing::info!("settings file not found at {:?}, using defaults", path);
        }

        let figment = Figment::from(Serialized::defaults(AppSettings::default()))
            .merge(Json::file(path))
            .merge(Env::prefixed(ENV_PREFIX));

        match figment.extract::<AppSettings>() {
            Ok(settings) => settings.normalized(),
            Err(error) => {
                tracing::warn!(
                    "failed to parse settings from {:?}: {}. using defaults",
                    path,
                    error
                );
                AppSettings::default()
            }
        }
    }

    fn persist(&self, settings: &AppSettings) -> Result<(), SettingsError> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).context(CreateDirSnafu {
                stage: "create-settings-directory",
                path: parent.to_path_buf(),
            })?;
        }

        let content = serde_json::to_string_pretty(settings).context(SerializeConfigSnafu {
            stage: "serialize-settings-json",
        })?;

        let temp_path = self.config_path.with_extension("json.tmp");
        std::fs::write(&temp_path, content).context(WriteFileSnafu {
            stage: "write-temporary-settings-file",
            path: temp_path.clone(),
        })?;

        std::fs::rename(&temp_path, &self.config_path).context(RenameTempFileSnafu {
            stage: "rename-temporary-settings-file",
            from: temp_path,
            to: self.config_path.clone(),
        })?;

        tracing::info!("saved settings to {:?}", self.config_path);
        Ok(())
    }
}

/// Re-reads the host on every call.
impl EnvironmentClassifier for SettingsStore {
    fn classify(&self) -> Environment {
        classify_host(&self.host())
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("failed to create settings directory at {path:?} on `{stage}`: {source}"))]
    CreateDir {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to serialize settings on `{stage}`: {source}"))]
    SerializeConfig {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to write settings file at {path:?} on `{stage}`: {source}"))]
    WriteFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display(
        "failed to replace settings file from {from:?} to {to:?} on `{stage}`: {source}"
    ))]
    RenameTempFile {
        stage: &'static str,
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

fn non_blank_or(value: &str, fallback: fn() -> String) -> String {
    let value = value.trim();
    if value.is_empty() {
        fallback()
    } else {
        value.to_string()
    }
}

fn default_provider_id() -> String {
    OLLAMA_PROVIDER_ID.to_string()
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_mock_delay_ms() -> u64 {
    DEFAULT_MOCK_DELAY_MS
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}
