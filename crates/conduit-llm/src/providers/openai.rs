use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use conduit_core::config::ModelConfig;
use conduit_core::error::ProviderError;
use conduit_core::traits::ProviderAdapter;
use conduit_core::types::*;

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// OpenAI-compatible client. Works with OpenAI, Ollama, vLLM, Groq, OpenRouter, etc.
pub struct OpenAiProvider {
    http: Client,
    config: ModelConfig,
}

impl OpenAiProvider {
    pub fn new(config: ModelConfig) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();
        Self { http, config }
    }
}

// Request types
#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<OaiMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

#[derive(Serialize)]
struct OaiMessage {
    role: &'static str,
    content: String,
}

// Response types
#[derive(Deserialize, Debug)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize, Debug)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize, Debug)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize, Debug)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

fn build_request(config: &ModelConfig, prompt: Prompt, params: &GenerationParams) -> ChatRequest {
    let mut messages = Vec::with_capacity(2);
    if !prompt.system.is_empty() {
        messages.push(OaiMessage {
            role: "system",
            content: prompt.system,
        });
    }
    messages.push(OaiMessage {
        role: "user",
        content: prompt.user,
    });

    ChatRequest {
        model: params
            .model
            .clone()
            .unwrap_or_else(|| config.model_id.clone()),
        messages,
        max_tokens: params.max_tokens.unwrap_or(config.max_tokens),
        temperature: Some(params.temperature.unwrap_or(config.temperature)),
        stream: false,
    }
}

fn parse_response(body: &str, requested_model: &str) -> Result<GeneratedText, ProviderError> {
    let parsed: ChatResponse =
        serde_json::from_str(body).map_err(|e| ProviderError::Parse(e.to_string()))?;
    let text = parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| ProviderError::Parse("response has no message content".into()))?;
    let usage = parsed
        .usage
        .map(|u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
        })
        .unwrap_or_default();
    Ok(GeneratedText {
        text,
        model: parsed.model.unwrap_or_else(|| requested_model.to_string()),
        usage,
    })
}

fn classify_transport(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(e.to_string())
    } else if e.is_connect() || e.is_request() {
        ProviderError::Connection(e.to_string())
    } else {
        ProviderError::InvalidRequest(e.to_string())
    }
}

impl ProviderAdapter for OpenAiProvider {
    fn name(&self) -> &str {
        &self.config.provider
    }

    fn generate(
        &self,
        prompt: Prompt,
        params: GenerationParams,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<GeneratedText, ProviderError>> {
        Box::pin(async move {
            let url = self.config.base_url.as_deref().unwrap_or(OPENAI_API_URL);
            let body = build_request(&self.config, prompt, &params);
            let model = body.model.clone();

            let mut req = self.http.post(url).json(&body);
            if let Some(api_key) = &self.config.api_key {
                req = req.bearer_auth(api_key);
            }

            let exchange = async {
                let response = req.send().await?;
                let status = response.status();
                let text = response.text().await?;
                Ok::<_, reqwest::Error>((status, text))
            };
            let (status, text) = tokio::select! {
                r = exchange => r.map_err(classify_transport)?,
                _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
            };

            if !status.is_success() {
                return Err(ProviderError::from_status(status.as_u16(), text));
            }

            debug!(model = %model, bytes = text.len(), "Chat completion received");
            parse_response(&text, &model)
        })
    }
}
