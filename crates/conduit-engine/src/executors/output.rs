use serde::{Deserialize, Serialize};
use serde_json::json;

use conduit_core::error::ExecutorError;
use conduit_core::types::{Artifact, Citation, SearchHit};
use conduit_core::workflow::NodeKind;

use super::{chunks_of, collect_citations, NodeContext, NodeInputs};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    Text,
    Markdown,
    Json,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Markdown => "markdown",
            Self::Json => "json",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    #[serde(default)]
    pub format: OutputFormat,
    #[serde(default = "default_show_sources")]
    pub show_sources: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: OutputFormat::default(),
            show_sources: default_show_sources(),
        }
    }
}

fn default_show_sources() -> bool { true }

const NO_DOCUMENTS: &str = "No relevant documents found.";
const NO_WEB_RESULTS: &str = "No web results found.";

/// The answer text: generation outputs first, then any other text input,
/// then the raw retrieved chunks or search snippets. An empty retrieval or
/// search result still yields an answer.
fn answer_text(inputs: &NodeInputs) -> Option<String> {
    let generated: Vec<&str> = inputs
        .of_kind(NodeKind::Generation)
        .filter_map(|(_, a)| a.as_text())
        .collect();
    if !generated.is_empty() {
        return Some(generated.join("\n\n"));
    }

    if let Some(text) = inputs
        .predecessors
        .values()
        .find_map(|input| input.artifact.as_text())
    {
        return Some(text.to_string());
    }

    let retrieved: Vec<&Artifact> = inputs
        .of_kind(NodeKind::KnowledgeRetrieval)
        .map(|(_, a)| a)
        .collect();
    if !retrieved.is_empty() {
        let chunks: Vec<String> = retrieved
            .into_iter()
            .flat_map(chunks_of)
            .map(|c| c.chunk_text)
            .collect();
        return Some(if chunks.is_empty() {
            NO_DOCUMENTS.to_string()
        } else {
            chunks.join("\n\n")
        });
    }

    let searched: Vec<&Artifact> = inputs.of_kind(NodeKind::WebSearch).map(|(_, a)| a).collect();
    if !searched.is_empty() {
        let snippets: Vec<String> = searched
            .into_iter()
            .flat_map(|a| {
                serde_json::from_value::<Vec<SearchHit>>(a.payload.clone()).unwrap_or_default()
            })
            .map(|hit| format!("{} ({})\n{}", hit.title, hit.url, hit.snippet))
            .collect();
        return Some(if snippets.is_empty() {
            NO_WEB_RESULTS.to_string()
        } else {
            snippets.join("\n\n")
        });
    }

    None
}

fn render(format: OutputFormat, answer: &str, citations: &[Citation]) -> serde_json::Value {
    match format {
        OutputFormat::Json => json!({ "answer": answer, "sources": citations }),
        OutputFormat::Text | OutputFormat::Markdown if citations.is_empty() => json!(answer),
        OutputFormat::Text => {
            let mut out = format!("{}\n\nSources:", answer);
            for c in citations {
                out.push_str(&format!("\n- {} (score {:.2})", c.source_document_id, c.score));
            }
            json!(out)
        }
        OutputFormat::Markdown => {
            let mut out = format!("{}\n\n### Sources", answer);
            for c in citations {
                out.push_str(&format!("\n- `{}` (score {:.2})", c.source_document_id, c.score));
            }
            json!(out)
        }
    }
}

/// Format the final answer and attach citations.
pub fn execute(
    config: &OutputConfig,
    inputs: &NodeInputs,
    ctx: &NodeContext,
) -> Result<Artifact, ExecutorError> {
    ctx.record_attempt(1);
    let answer = answer_text(inputs)
        .ok_or_else(|| ExecutorError::MissingInput("no text to format".into()))?;

    let citations = if config.show_sources {
        collect_citations(inputs)
    } else {
        Vec::new()
    };

    Ok(Artifact::new(render(config.format, &answer, &citations))
        .with_meta("citations", json!(citations))
        .with_meta("format", json!(config.format.as_str())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_llm::RetryPolicy;
    use tokio_util::sync::CancellationToken;

    fn ctx() -> NodeContext {
        NodeContext::new("out", CancellationToken::new(), RetryPolicy::immediate(0))
    }

    fn generated() -> Artifact {
        Artifact::text("Refunds are issued within 30 days.").with_meta(
            "sources",
            json!([
                {"source_document_id": "policy-handbook", "score": 0.91},
                {"source_document_id": "faq", "score": 0.78}
            ]),
        )
    }

    fn inputs() -> NodeInputs {
        NodeInputs::new("q").with("gen", NodeKind::Generation, generated())
    }

    #[test]
    fn test_text_with_sources() {
        let out = execute(&OutputConfig::default(), &inputs(), &ctx()).unwrap();
        assert_eq!(
            out.as_text(),
            Some(
                "Refunds are issued within 30 days.\n\nSources:\n- policy-handbook (score 0.91)\n- faq (score 0.78)"
            )
        );
        assert_eq!(out.meta("format"), Some(&json!("text")));
        assert_eq!(out.meta("citations").unwrap().as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_markdown() {
        let config = OutputConfig {
            format: OutputFormat::Markdown,
            show_sources: true,
        };
        let out = execute(&config, &inputs(), &ctx()).unwrap();
        let text = out.as_text().unwrap();
        assert!(text.contains("### Sources\n- `policy-handbook` (score 0.91)"));
    }

    #[test]
    fn test_json() {
        let config = OutputConfig {
            format: OutputFormat::Json,
            show_sources: true,
        };
        let out = execute(&config, &inputs(), &ctx()).unwrap();
        assert_eq!(out.payload["answer"], "Refunds are issued within 30 days.");
        assert_eq!(out.payload["sources"][0]["source_document_id"], "policy-handbook");
    }

    #[test]
    fn test_hide_sources() {
        let config = OutputConfig {
            format: OutputFormat::Text,
            show_sources: false,
        };
        let out = execute(&config, &inputs(), &ctx()).unwrap();
        assert_eq!(out.as_text(), Some("Refunds are issued within 30 days."));
        assert_eq!(out.meta("citations"), Some(&json!([])));
    }

    #[test]
    fn test_falls_back_to_chunks() {
        let kb = Artifact::new(json!([
            {"chunk_text": "Refunds within 30 days.", "source_document_id": "policy", "score": 0.9}
        ]));
        let inputs = NodeInputs::new("q").with("kb", NodeKind::KnowledgeRetrieval, kb);
        let out = execute(&OutputConfig::default(), &inputs, &ctx()).unwrap();
        assert!(out.as_text().unwrap().starts_with("Refunds within 30 days."));
    }

    #[test]
    fn test_empty_retrieval_is_an_answer() {
        let inputs =
            NodeInputs::new("q").with("kb", NodeKind::KnowledgeRetrieval, Artifact::new(json!([])));
        let out = execute(&OutputConfig::default(), &inputs, &ctx()).unwrap();
        assert_eq!(out.as_text(), Some("No relevant documents found."));
        assert_eq!(out.meta("citations"), Some(&json!([])));
    }

    #[test]
    fn test_falls_back_to_search_snippets() {
        let web = Artifact::new(json!([
            {"title": "Refunds", "url": "https://example.org/refunds", "snippet": "30 days.", "score": 0.8}
        ]));
        let inputs = NodeInputs::new("q").with("web", NodeKind::WebSearch, web);
        let out = execute(&OutputConfig::default(), &inputs, &ctx()).unwrap();
        assert_eq!(out.as_text(), Some("Refunds (https://example.org/refunds)\n30 days."));
    }

    #[test]
    fn test_missing_input() {
        let err = execute(&OutputConfig::default(), &NodeInputs::new("q"), &ctx()).unwrap_err();
        assert!(matches!(err, ExecutorError::MissingInput(_)));
    }
}
