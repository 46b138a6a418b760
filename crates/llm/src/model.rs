pub const OLLAMA_PROVIDER_ID: &str = "ollama";
pub const DEFAULT_MODEL: &str = "llama3";
pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:11434/api/generate";

/// Falls back to [`DEFAULT_MODEL`] when the configured name is blank.
pub fn resolve_model_name(configured: Option<&str>) -> String {
    configured
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or(DEFAULT_MODEL)
        .to_string()
}
