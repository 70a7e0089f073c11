use serde::Serialize;

use conduit_core::workflow::NodeKind;

use crate::executors::{
    GenerationConfig, OutputConfig, RetrievalConfig, UserQueryConfig, WebSearchConfig,
};

/// What one node kind does and how it is configured.
#[derive(Debug, Clone, Serialize)]
pub struct ComponentInfo {
    pub kind: NodeKind,
    pub description: &'static str,
    /// Config keys with their default values.
    pub defaults: serde_json::Value,
}

fn describe(kind: NodeKind) -> &'static str {
    match kind {
        NodeKind::UserQuery => "Entry point. Passes the caller's question downstream.",
        NodeKind::KnowledgeRetrieval => {
            "Searches the document store and keeps chunks above the similarity threshold."
        }
        NodeKind::WebSearch => "Searches the web and returns ranked result snippets.",
        NodeKind::Generation => "Asks the language model to answer using upstream context.",
        NodeKind::Output => "Formats the final answer and attaches source citations.",
    }
}

fn defaults(kind: NodeKind) -> serde_json::Value {
    let value = match kind {
        NodeKind::UserQuery => serde_json::to_value(UserQueryConfig::default()),
        NodeKind::KnowledgeRetrieval => serde_json::to_value(RetrievalConfig::default()),
        NodeKind::WebSearch => serde_json::to_value(WebSearchConfig::default()),
        NodeKind::Generation => serde_json::to_value(GenerationConfig::default()),
        NodeKind::Output => serde_json::to_value(OutputConfig::default()),
    };
    value.unwrap_or_default()
}

/// Every available node kind.
pub fn catalog() -> Vec<ComponentInfo> {
    NodeKind::ALL
        .into_iter()
        .map(|kind| ComponentInfo {
            kind,
            description: describe(kind),
            defaults: defaults(kind),
        })
        .collect()
}
