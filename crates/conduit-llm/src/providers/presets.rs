/// Endpoint defaults for a named OpenAI-compatible backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderPreset {
    pub default_base_url: &'static str,
    pub needs_api_key: bool,
}

/// Look up a provider preset by name.
pub fn get_preset(provider: &str) -> Option<ProviderPreset> {
    let (default_base_url, needs_api_key) = match provider {
        "openai" => ("https://api.openai.com/v1/chat/completions", true),
        "ollama" => ("http://localhost:11434/v1/chat/completions", false),
        "groq" => ("https://api.groq.com/openai/v1/chat/completions", true),
        "openrouter" => ("https://openrouter.ai/api/v1/chat/completions", true),
        "together" => ("https://api.together.xyz/v1/chat/completions", true),
        "mistral" => ("https://api.mistral.ai/v1/chat/completions", true),
        "deepseek" => ("https://api.deepseek.com/v1/chat/completions", true),
        _ => return None,
    };
    Some(ProviderPreset {
        default_base_url,
        needs_api_key,
    })
}

/// Provider names with a built-in endpoint.
pub fn all_preset_names() -> &'static [&'static str] {
    &[
        "openai",
        "ollama",
        "groq",
        "openrouter",
        "together",
        "mistral",
        "deepseek",
    ]
}
