use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use conduit_core::error::ExecutorError;
use conduit_core::types::{Artifact, GenerationParams, Prompt, SearchHit};
use conduit_core::workflow::NodeKind;
use conduit_llm::generate_with_retry;

use super::{chunks_of, collect_citations, Adapters, NodeContext, NodeInputs};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GenerationConfig {
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    /// Overrides the provider's configured model.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            model: None,
            temperature: None,
            max_tokens: None,
        }
    }
}

fn default_system_prompt() -> String {
    "You are a helpful assistant. Answer using the provided context.".to_string()
}

impl GenerationConfig {
    pub(crate) fn check(&self) -> Result<(), String> {
        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(format!("temperature must be between 0.0 and 2.0, got {}", t));
            }
        }
        if self.max_tokens == Some(0) {
            return Err("max_tokens must be greater than 0".into());
        }
        Ok(())
    }

    fn params(&self) -> GenerationParams {
        GenerationParams {
            model: self.model.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

/// Build the user message from the predecessors' artifacts in id order,
/// followed by the question.
pub(crate) fn build_prompt(config: &GenerationConfig, inputs: &NodeInputs) -> Prompt {
    let mut sections = Vec::new();

    for (id, input) in &inputs.predecessors {
        match input.kind {
            NodeKind::KnowledgeRetrieval => {
                let chunks = chunks_of(&input.artifact);
                if chunks.is_empty() {
                    sections.push(format!("Context from {}: no relevant documents found.", id));
                    continue;
                }
                let mut block = format!("Context from {}:", id);
                for (i, chunk) in chunks.iter().enumerate() {
                    block.push_str(&format!(
                        "\n[{}] ({}, score {:.2}) {}",
                        i + 1,
                        chunk.source_document_id,
                        chunk.score,
                        chunk.chunk_text
                    ));
                }
                sections.push(block);
            }
            NodeKind::WebSearch => {
                let hits: Vec<SearchHit> =
                    serde_json::from_value(input.artifact.payload.clone()).unwrap_or_default();
                if hits.is_empty() {
                    sections.push(format!("Web results from {}: none.", id));
                    continue;
                }
                let mut block = format!("Web results from {}:", id);
                for (i, hit) in hits.iter().enumerate() {
                    block.push_str(&format!(
                        "\n[{}] {} ({})\n{}",
                        i + 1,
                        hit.title,
                        hit.url,
                        hit.snippet
                    ));
                }
                sections.push(block);
            }
            NodeKind::Generation => {
                if let Some(text) = input.artifact.as_text() {
                    sections.push(format!("Earlier answer from {}:\n{}", id, text));
                }
            }
            NodeKind::UserQuery | NodeKind::Output => {}
        }
    }

    sections.push(format!("Question: {}", inputs.query_text()));

    Prompt {
        system: config.system_prompt.clone(),
        user: sections.join("\n\n"),
    }
}

/// Generate an answer from the assembled prompt, retrying transient
/// provider failures.
pub async fn execute(
    config: &GenerationConfig,
    inputs: &NodeInputs,
    adapters: &Adapters,
    ctx: &NodeContext,
) -> Result<Artifact, ExecutorError> {
    let prompt = build_prompt(config, inputs);
    let sources = collect_citations(inputs);

    let generated = generate_with_retry(
        adapters.provider.as_ref(),
        prompt,
        config.params(),
        &ctx.retry,
        &ctx.cancel,
        |attempt| ctx.record_attempt(attempt),
    )
    .await?;

    debug!(
        node_id = %ctx.node_id,
        model = %generated.model,
        attempts = ctx.attempts(),
        completion_tokens = generated.usage.completion_tokens,
        "Generation complete"
    );

    Ok(Artifact::text(generated.text)
        .with_meta("attempts", json!(ctx.attempts()))
        .with_meta("model", json!(generated.model))
        .with_meta("sources", json!(sources))
        .with_meta("token_usage", json!(generated.usage)))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use conduit_core::error::ProviderError;
    use conduit_llm::RetryPolicy;
    use conduit_test_utils::{refund_chunks, web_hits, MockProvider};
    use tokio_util::sync::CancellationToken;

    fn ctx(retries: u32) -> NodeContext {
        NodeContext::new("gen", CancellationToken::new(), RetryPolicy::immediate(retries))
    }

    fn kb_artifact() -> Artifact {
        Artifact::new(json!(refund_chunks()[..2].to_vec()))
    }

    #[test]
    fn test_prompt_orders_by_predecessor_id() {
        let inputs = NodeInputs::new("What is the refund policy?")
            .with("web", NodeKind::WebSearch, Artifact::new(json!(web_hits())))
            .with("kb", NodeKind::KnowledgeRetrieval, kb_artifact());
        let prompt = build_prompt(&GenerationConfig::default(), &inputs);

        let kb_at = prompt.user.find("Context from kb:").unwrap();
        let web_at = prompt.user.find("Web results from web:").unwrap();
        let q_at = prompt.user.find("Question: What is the refund policy?").unwrap();
        assert!(kb_at < web_at && web_at < q_at);
        assert!(prompt.user.contains("(policy-handbook, score 0.91)"));
        assert_eq!(prompt.system, default_system_prompt());
    }

    #[test]
    fn test_prompt_notes_empty_retrieval() {
        let inputs = NodeInputs::new("q").with("kb", NodeKind::KnowledgeRetrieval, Artifact::new(json!([])));
        let prompt = build_prompt(&GenerationConfig::default(), &inputs);
        assert!(prompt.user.contains("no relevant documents found"));
    }

    #[test]
    fn test_prompt_is_deterministic() {
        let inputs = NodeInputs::new("q")
            .with("b", NodeKind::KnowledgeRetrieval, kb_artifact())
            .with("a", NodeKind::KnowledgeRetrieval, Artifact::new(json!([])));
        let first = build_prompt(&GenerationConfig::default(), &inputs);
        let second = build_prompt(&GenerationConfig::default(), &inputs.clone());
        assert_eq!(first, second);
        assert!(first.user.find("Context from a").unwrap() < first.user.find("Context from b").unwrap());
    }

    #[tokio::test]
    async fn test_generates_with_sources() {
        let provider = Arc::new(MockProvider::replying("Refunds are issued within 30 days."));
        let adapters = Adapters::new(provider.clone());
        let inputs = NodeInputs::new("What is the refund policy?")
            .with("kb", NodeKind::KnowledgeRetrieval, kb_artifact());
        let config = GenerationConfig {
            model: Some("small".into()),
            ..GenerationConfig::default()
        };

        let out = execute(&config, &inputs, &adapters, &ctx(0)).await.unwrap();
        assert_eq!(out.as_text(), Some("Refunds are issued within 30 days."));
        assert_eq!(out.meta("model"), Some(&json!("small")));
        assert_eq!(out.meta("attempts"), Some(&json!(1)));
        let sources = out.meta("sources").unwrap().as_array().unwrap();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0]["source_document_id"], "policy-handbook");
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let provider = Arc::new(MockProvider::scripted(vec![
            Err(ProviderError::RateLimited("slow down".into())),
            Err(ProviderError::Server {
                status: 503,
                message: "busy".into(),
            }),
            Ok("done".into()),
        ]));
        let adapters = Adapters::new(provider.clone());
        let context = ctx(3);
        let out = execute(&GenerationConfig::default(), &NodeInputs::new("q"), &adapters, &context)
            .await
            .unwrap();
        assert_eq!(out.as_text(), Some("done"));
        assert_eq!(out.meta("attempts"), Some(&json!(3)));
        assert_eq!(context.attempts(), 3);
    }

    #[tokio::test]
    async fn test_auth_error_is_not_retried() {
        let provider = Arc::new(MockProvider::scripted(vec![Err(ProviderError::Auth(
            "bad key".into(),
        ))]));
        let adapters = Adapters::new(provider.clone());
        let context = ctx(3);
        let err = execute(&GenerationConfig::default(), &NodeInputs::new("q"), &adapters, &context)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::Provider(_)));
        assert_eq!(provider.calls(), 1);
        assert_eq!(context.attempts(), 1);
    }

    #[test]
    fn test_check_bounds() {
        let hot = GenerationConfig {
            temperature: Some(2.5),
            ..GenerationConfig::default()
        };
        assert!(hot.check().is_err());
        let empty = GenerationConfig {
            max_tokens: Some(0),
            ..GenerationConfig::default()
        };
        assert!(empty.check().is_err());
        assert!(GenerationConfig::default().check().is_ok());
    }
}
