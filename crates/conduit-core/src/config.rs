use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ConduitError, Result};

/// Top-level Conduit configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub retrieval: Option<RetrievalConfig>,
    #[serde(default)]
    pub web_search: Option<WebSearchConfig>,
}

/// Scheduler limits and the Generation retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Upper bound on concurrently running nodes within one level.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Run-wide deadline. `None` disables it.
    #[serde(default)]
    pub deadline_ms: Option<u64>,
    /// Per-node timeout. `None` disables it.
    #[serde(default)]
    pub node_timeout_ms: Option<u64>,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            deadline_ms: None,
            node_timeout_ms: None,
            retry: RetryConfig::default(),
        }
    }
}

fn default_max_concurrency() -> usize { 8 }

/// Retry configuration for transient provider failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: u32,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
    /// Scale each delay by a random factor in [0.8, 1.2].
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            backoff_factor: default_backoff_factor(),
            max_backoff_ms: default_max_backoff(),
            jitter: default_jitter(),
        }
    }
}

fn default_max_retries() -> u32 { 3 }
fn default_initial_backoff() -> u64 { 500 }
fn default_backoff_factor() -> u32 { 2 }
fn default_max_backoff() -> u64 { 8000 }
fn default_jitter() -> bool { true }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model_id")]
    pub model_id: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model_id: default_model_id(),
            api_key: None,
            base_url: None,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_request_timeout(),
        }
    }
}

fn default_provider() -> String { "openai".to_string() }
fn default_model_id() -> String { "gpt-4o-mini".to_string() }
fn default_max_tokens() -> u32 { 1024 }
fn default_temperature() -> f32 { 0.2 }
fn default_request_timeout() -> u64 { 60 }

/// Vector-store service used by KnowledgeRetrieval nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,
}

fn default_collection() -> String { "documents".to_string() }

/// Web search backend used by WebSearch nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSearchConfig {
    pub api_key: String,
    #[serde(default)]
    pub base_url: Option<String>,
}

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| ConduitError::ConfigNotFound(path.display().to_string()))?;

        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(&content);

        let config: Self =
            toml::from_str(&expanded).map_err(|e| ConduitError::Config(e.to_string()))?;
        config.check()?;
        debug!(path = %path.display(), provider = %config.model.provider, "Config loaded");
        Ok(config)
    }

    /// Reject values that parse but cannot drive the engine.
    pub fn check(&self) -> Result<()> {
        if self.engine.max_concurrency == 0 {
            return Err(ConduitError::Config(
                "engine.max_concurrency must be at least 1".into(),
            ));
        }
        if self.engine.retry.backoff_factor == 0 {
            return Err(ConduitError::Config(
                "engine.retry.backoff_factor must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("TEST_CONDUIT_VAR", "hello");
        let result = expand_env_vars("key = \"${TEST_CONDUIT_VAR}\"");
        assert_eq!(result, "key = \"hello\"");
        std::env::remove_var("TEST_CONDUIT_VAR");
    }

    #[test]
    fn test_expand_env_vars_missing() {
        let result = expand_env_vars("key = \"${NONEXISTENT_CONDUIT_VAR}\"");
        assert_eq!(result, "key = \"${NONEXISTENT_CONDUIT_VAR}\"");
    }

    #[test]
    fn test_defaults_from_empty_toml() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config.engine.max_concurrency, 8);
        assert!(config.engine.deadline_ms.is_none());
        assert_eq!(config.engine.retry.max_retries, 3);
        assert_eq!(config.engine.retry.initial_backoff_ms, 500);
        assert_eq!(config.engine.retry.backoff_factor, 2);
        assert!(config.engine.retry.jitter);
        assert_eq!(config.model.provider, "openai");
        assert!(config.retrieval.is_none());
        assert!(config.web_search.is_none());
    }

    #[test]
    fn test_partial_sections() {
        let toml_str = r#"
[engine]
max_concurrency = 2
deadline_ms = 15000

[engine.retry]
max_retries = 1

[retrieval]
base_url = "http://localhost:8100"
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.engine.max_concurrency, 2);
        assert_eq!(config.engine.deadline_ms, Some(15000));
        assert_eq!(config.engine.retry.max_retries, 1);
        assert_eq!(config.engine.retry.max_backoff_ms, 8000);
        let retrieval = config.retrieval.unwrap();
        assert_eq!(retrieval.collection, "documents");
        assert_eq!(retrieval.timeout_secs, 60);
    }

    #[test]
    fn test_check_rejects_zero_concurrency() {
        let config: AppConfig = toml::from_str("[engine]\nmax_concurrency = 0\n").unwrap();
        assert!(matches!(config.check(), Err(ConduitError::Config(_))));
    }
}
