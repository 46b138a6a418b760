use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};
use snafu::Snafu;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub provider_id: String,
    pub endpoint: String,
    pub default_model: Option<String>,
}

impl ProviderConfig {
    pub fn new(
        provider_id: impl Into<String>,
        endpoint: impl Into<String>,
        default_model: Option<String>,
    ) -> Self {
        Self {
            provider_id: provider_id.into().trim().to_string(),
            endpoint: endpoint.into().trim().to_string(),
            default_model: default_model
                .map(|model| model.trim().to_string())
                .filter(|model| !model.is_empty()),
        }
    }
}

/// JSON body of one generate call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    pub stream: bool,
}

impl GenerateRequest {
    /// Builds a streaming request; the endpoint is always asked to stream.
    pub fn streaming(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            stream: true,
        }
    }
}

/// One decoded line of the response body.
///
/// Both fields are optional on the wire: metadata-only lines carry no `response`, and only the
/// final line carries `done: true`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct GenerateFragment {
    #[serde(default)]
    pub response: Option<String>,
    #[serde(default)]
    pub done: bool,
}

impl GenerateFragment {
    /// Returns the text carried by this fragment, if any.
    pub fn text(&self) -> Option<&str> {
        self.response.as_deref().filter(|text| !text.is_empty())
    }
}

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
pub type ByteStream = Pin<Box<dyn Stream<Item = ProviderResult<Bytes>> + Send + 'static>>;
pub type ProviderResult<T> = Result<T, ProviderError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ProviderError {
    #[snafu(display("failed to build http client on `{stage}`: {source}"))]
    BuildClient {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("provider '{provider_id}' is not supported"))]
    UnsupportedProvider {
        stage: &'static str,
        provider_id: String,
    },
    #[snafu(display("endpoint '{endpoint}' is not a valid URL: {details}"))]
    InvalidEndpoint {
        stage: &'static str,
        endpoint: String,
        details: String,
    },
    #[snafu(display("generate request has an empty prompt"))]
    EmptyPrompt { stage: &'static str },
    #[snafu(display("failed to send request on `{stage}`: {source}"))]
    SendRequest {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("Server returned {status}"))]
    Status {
        stage: &'static str,
        status: u16,
        body: String,
    },
    #[snafu(display("failed to read response body on `{stage}`: {source}"))]
    ReadBody {
        stage: &'static str,
        source: reqwest::Error,
    },
}

impl ProviderError {
    /// HTTP status reported by the endpoint, for status failures only.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub trait InferenceProvider: Send + Sync {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn endpoint(&self) -> &str;
    /// `host:port` of the inference server, used in user-facing text.
    fn server_address(&self) -> &str;
    fn default_model(&self) -> &str;
    /// Sends the request and resolves once response headers arrive.
    ///
    /// Non-success statuses resolve to [`ProviderError::Status`]; the returned stream yields the
    /// raw body chunks in arrival order.
    fn open_stream<'a>(
        &'a self,
        request: GenerateRequest,
    ) -> BoxFuture<'a, ProviderResult<ByteStream>>;
}
