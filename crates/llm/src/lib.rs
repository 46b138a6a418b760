use std::sync::Arc;

mod model;
mod ndjson;
mod ollama;
mod provider;

pub use model::{DEFAULT_ENDPOINT, DEFAULT_MODEL, OLLAMA_PROVIDER_ID, resolve_model_name};
pub use ndjson::{
    FragmentDecoder, FragmentStream, LineDecoder, StreamItem, Utf8ChunkDecoder, fragment_stream,
};
pub use ollama::OllamaProvider;
pub use provider::{
    BoxFuture, ByteStream, GenerateFragment, GenerateRequest, InferenceProvider, ProviderConfig,
    ProviderError, ProviderResult,
};

pub fn create_provider(mut config: ProviderConfig) -> ProviderResult<Arc<dyn InferenceProvider>> {
    if config.provider_id.trim().is_empty() {
        config.provider_id = OLLAMA_PROVIDER_ID.to_string();
    }
    if config.endpoint.trim().is_empty() {
        config.endpoint = DEFAULT_ENDPOINT.to_string();
    }

    match config.provider_id.as_str() {
        "ollama" | "local" => {
            config.provider_id = OLLAMA_PROVIDER_ID.to_string();
            Ok(Arc::new(OllamaProvider::new(config)?))
        }
        _ => Err(ProviderError::UnsupportedProvider {
            stage: "create-provider",
            provider_id: config.provider_id,
        }),
    }
}
