use futures::StreamExt;
use reqwest::{Client, Url};
use snafu::{ResultExt, ensure};

use super::model::{OLLAMA_PROVIDER_ID, resolve_model_name};
use super::provider::{
    BoxFuture, BuildClientSnafu, ByteStream, EmptyPromptSnafu, GenerateRequest, InferenceProvider,
    ProviderConfig, ProviderError, ProviderResult, ReadBodySnafu, SendRequestSnafu, StatusSnafu,
};

pub struct OllamaProvider {
    config: ProviderConfig,
    endpoint: Url,
    server_address: String,
    default_model: String,
    client: Client,
}

impl OllamaProvider {
    pub fn new(config: ProviderConfig) -> ProviderResult<Self> {
        let endpoint = Url::parse(&config.endpoint).map_err(|source| {
            ProviderError::InvalidEndpoint {
                stage: "ollama-provider-new",
                endpoint: config.endpoint.clone(),
                details: source.to_string(),
            }
        })?;
        let server_address = Self::server_address_of(&endpoint);
        let default_model = resolve_model_name(config.default_model.as_deref());

        // No client-level timeout: the chat cycle owns the deadline and cancels the request.
        let client = Client::builder().build().context(BuildClientSnafu {
            stage: "build-client",
        })?;

        Ok(Self {
            config,
            endpoint,
            server_address,
            default_model,
            client,
        })
    }

    fn server_address_of(endpoint: &Url) -> String {
        match (endpoint.host_str(), endpoint.port_or_known_default()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            _ => endpoint.to_string(),
        }
    }

    async fn send(&self, request: GenerateRequest) -> ProviderResult<ByteStream> {
        ensure!(
            !request.prompt.trim().is_empty(),
            EmptyPromptSnafu {
                stage: "ollama-open-stream",
            }
        );

        tracing::debug!(
            endpoint = %self.endpoint,
            model = %request.model,
            "sending generate request"
        );

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&request)
            .send()
            .await
            .context(SendRequestSnafu {
                stage: "send-generate-request",
            })?;

        let status = response.status();
        if !status.is_success() {
            // Best effort: the body only enriches the error.
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(
                endpoint = %self.endpoint,
                status = status.as_u16(),
                "generate request rejected"
            );
            return StatusSnafu {
                stage: "generate-http-status",
                status: status.as_u16(),
                body,
            }
            .fail();
        }

        let body = response.bytes_stream().map(|chunk| {
            chunk.context(ReadBodySnafu {
                stage: "read-generate-chunk",
            })
        });

        Ok(Box::pin(body))
    }
}

impl InferenceProvider for OllamaProvider {
    fn id(&self) -> &str {
        &self.config.provider_id
    }

    fn name(&self) -> &str {
        "Ollama"
    }

    fn endpoint(&self) -> &str {
        self.endpoint.as_str()
    }

    fn server_address(&self) -> &str {
        &self.server_address
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    fn open_stream<'a>(
        &'a self,
        request: GenerateRequest,
    ) -> BoxFuture<'a, ProviderResult<ByteStream>> {
        Box::pin(self.send(request))
    }
}

impl std::fmt::Debug for OllamaProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OllamaProvider")
            .field("provider_id", &self.config.provider_id)
            .field("endpoint", &self.endpoint.as_str())
            .field("default_model", &self.default_model)
            .finish()
    }
}
