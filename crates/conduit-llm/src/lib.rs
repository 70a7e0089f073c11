pub mod providers;
pub mod retry;

use std::sync::Arc;

use tracing::warn;

use conduit_core::config::ModelConfig;
use conduit_core::error::{ConduitError, Result};
use conduit_core::traits::ProviderAdapter;

pub use providers::openai::OpenAiProvider;
pub use providers::presets;
pub use retry::{generate_with_retry, RetryPolicy};

/// Endpoint for the configured provider: the explicit `base_url`, else the preset default.
///
/// Names without a preset (self-hosted `vllm`, custom gateways) are accepted
/// only with an explicit `base_url`.
pub fn resolve_base_url(config: &ModelConfig) -> Result<String> {
    if let Some(ref url) = config.base_url {
        return Ok(url.clone());
    }
    match presets::get_preset(&config.provider) {
        Some(preset) => Ok(preset.default_base_url.to_string()),
        None => Err(ConduitError::Config(format!(
            "model provider '{}' has no default endpoint; set model.base_url",
            config.provider
        ))),
    }
}

/// Create a generation provider based on the provider name.
///
/// Every backend speaks the OpenAI chat-completions protocol.
pub fn create_provider(config: &ModelConfig) -> Result<Arc<dyn ProviderAdapter>> {
    let base_url = resolve_base_url(config)?;
    let needs_key = presets::get_preset(&config.provider).map_or(false, |p| p.needs_api_key);
    if needs_key && config.api_key.is_none() {
        warn!(provider = %config.provider, "No API key configured; requests will likely be rejected");
    }
    let config = ModelConfig {
        base_url: Some(base_url),
        ..config.clone()
    };
    Ok(Arc::new(OpenAiProvider::new(config)))
}
