use std::io::Write;

use serde_json::json;

use conduit_core::types::{RetrievedChunk, SearchHit};
use conduit_core::workflow::{NodeKind, NodeSpec, WorkflowDefinition};

/// `query -> kb -> gen -> out`
pub fn linear_chain() -> WorkflowDefinition {
    WorkflowDefinition::new()
        .node(NodeSpec::new("query", NodeKind::UserQuery))
        .node(
            NodeSpec::new("kb", NodeKind::KnowledgeRetrieval)
                .with("top_k", json!(5))
                .with("similarity_threshold", json!(0.7)),
        )
        .node(
            NodeSpec::new("gen", NodeKind::Generation)
                .with("system_prompt", json!("You answer customer support questions.")),
        )
        .node(NodeSpec::new("out", NodeKind::Output).with("show_sources", json!(true)))
        .edge("query", "kb")
        .edge("kb", "gen")
        .edge("gen", "out")
}

/// `query -> {kb, web} -> gen -> out`
pub fn diamond() -> WorkflowDefinition {
    WorkflowDefinition::new()
        .node(NodeSpec::new("query", NodeKind::UserQuery))
        .node(NodeSpec::new("kb", NodeKind::KnowledgeRetrieval))
        .node(NodeSpec::new("web", NodeKind::WebSearch).with("max_results", json!(2)))
        .node(NodeSpec::new("gen", NodeKind::Generation))
        .node(NodeSpec::new("out", NodeKind::Output))
        .edge("query", "kb")
        .edge("query", "web")
        .edge("kb", "gen")
        .edge("web", "gen")
        .edge("gen", "out")
}

/// Two chunks above 0.7 and one below.
pub fn refund_chunks() -> Vec<RetrievedChunk> {
    vec![
        RetrievedChunk {
            chunk_text: "Refunds are issued within 30 days of purchase.".into(),
            source_document_id: "policy-handbook".into(),
            score: 0.91,
        },
        RetrievedChunk {
            chunk_text: "Digital goods are refundable only if unopened.".into(),
            source_document_id: "faq".into(),
            score: 0.78,
        },
        RetrievedChunk {
            chunk_text: "Our office is closed on public holidays.".into(),
            source_document_id: "office-hours".into(),
            score: 0.41,
        },
    ]
}

pub fn web_hits() -> Vec<SearchHit> {
    vec![
        SearchHit {
            title: "Consumer refund rights".into(),
            url: "https://example.org/refunds".into(),
            snippet: "Retailers must refund faulty goods.".into(),
            score: 0.8,
        },
        SearchHit {
            title: "Return windows explained".into(),
            url: "https://example.org/returns".into(),
            snippet: "Most stores allow returns within 30 days.".into(),
            score: 0.6,
        },
    ]
}

/// Write `toml` to a temporary file that lives as long as the handle.
pub fn temp_config(toml: &str) -> tempfile::NamedTempFile {
    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml.as_bytes()).expect("write toml");
    tmp
}
