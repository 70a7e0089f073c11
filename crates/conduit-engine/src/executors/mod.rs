//! Component executors: one per node kind, behind a single `execute` entry point.
//!
//! An executor reads only its typed config, the artifacts of its direct
//! predecessors, and the adapters injected for the run.

pub mod generation;
pub mod output;
pub mod retrieval;
pub mod user_query;
pub mod web_search;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use conduit_core::error::ExecutorError;
use conduit_core::traits::{ProviderAdapter, RetrievalAdapter, WebSearchAdapter};
use conduit_core::types::{Artifact, Citation, RetrievedChunk};
use conduit_core::workflow::NodeKind;
use conduit_llm::RetryPolicy;

pub use generation::GenerationConfig;
pub use output::{OutputConfig, OutputFormat};
pub use retrieval::RetrievalConfig;
pub use user_query::UserQueryConfig;
pub use web_search::WebSearchConfig;

/// Backends injected into a run. Only the provider is mandatory; nodes that
/// need a missing adapter fail with `ConfigInvalid`.
#[derive(Clone)]
pub struct Adapters {
    pub provider: Arc<dyn ProviderAdapter>,
    pub retrieval: Option<Arc<dyn RetrievalAdapter>>,
    pub web_search: Option<Arc<dyn WebSearchAdapter>>,
}

impl Adapters {
    pub fn new(provider: Arc<dyn ProviderAdapter>) -> Self {
        Self {
            provider,
            retrieval: None,
            web_search: None,
        }
    }

    pub fn with_retrieval(mut self, retrieval: Arc<dyn RetrievalAdapter>) -> Self {
        self.retrieval = Some(retrieval);
        self
    }

    pub fn with_web_search(mut self, web_search: Arc<dyn WebSearchAdapter>) -> Self {
        self.web_search = Some(web_search);
        self
    }
}

/// The artifact of one direct predecessor, tagged with the kind that made it.
#[derive(Debug, Clone)]
pub struct NodeInput {
    pub kind: NodeKind,
    pub artifact: Arc<Artifact>,
}

/// Everything a node may read: the run's query and its predecessors'
/// artifacts keyed by predecessor id (iteration order is id order).
#[derive(Debug, Clone, Default)]
pub struct NodeInputs {
    pub query: String,
    pub predecessors: BTreeMap<String, NodeInput>,
}

impl NodeInputs {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            predecessors: BTreeMap::new(),
        }
    }

    pub fn with(mut self, id: impl Into<String>, kind: NodeKind, artifact: Artifact) -> Self {
        self.predecessors.insert(
            id.into(),
            NodeInput {
                kind,
                artifact: Arc::new(artifact),
            },
        );
        self
    }

    /// Predecessors of one kind, in id order.
    pub fn of_kind(&self, kind: NodeKind) -> impl Iterator<Item = (&String, &Artifact)> {
        self.predecessors
            .iter()
            .filter(move |(_, input)| input.kind == kind)
            .map(|(id, input)| (id, input.artifact.as_ref()))
    }

    /// The query text: the UserQuery artifact if one is a direct
    /// predecessor, otherwise the query the run was started with.
    pub fn query_text(&self) -> &str {
        self.of_kind(NodeKind::UserQuery)
            .find_map(|(_, a)| a.as_text())
            .unwrap_or(&self.query)
    }
}

/// Per-node execution handle: cancellation, retry policy, attempt counter.
#[derive(Debug)]
pub struct NodeContext {
    pub node_id: String,
    pub cancel: CancellationToken,
    pub retry: RetryPolicy,
    attempts: AtomicU32,
    started_at: OnceLock<Instant>,
}

impl NodeContext {
    pub fn new(node_id: impl Into<String>, cancel: CancellationToken, retry: RetryPolicy) -> Self {
        Self {
            node_id: node_id.into(),
            cancel,
            retry,
            attempts: AtomicU32::new(0),
            started_at: OnceLock::new(),
        }
    }

    pub fn record_attempt(&self, attempt: u32) {
        self.attempts.fetch_max(attempt, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Mark the node as running. Later calls are ignored.
    pub fn mark_started(&self) {
        let _ = self.started_at.set(Instant::now());
    }

    pub fn started_at(&self) -> Option<Instant> {
        self.started_at.get().copied()
    }
}

/// A node's typed behavior, selected by its kind tag.
#[derive(Debug, Clone, PartialEq)]
pub enum ComponentExecutor {
    UserQuery(UserQueryConfig),
    KnowledgeRetrieval(RetrievalConfig),
    WebSearch(WebSearchConfig),
    Generation(GenerationConfig),
    Output(OutputConfig),
}

fn parse_config<T: DeserializeOwned>(
    config: &serde_json::Map<String, serde_json::Value>,
) -> Result<T, String> {
    serde_json::from_value(serde_json::Value::Object(config.clone())).map_err(|e| e.to_string())
}

impl ComponentExecutor {
    /// Build the executor for `kind`, checking `config` against the kind's schema.
    pub fn from_config(
        kind: NodeKind,
        config: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Self, String> {
        let executor = match kind {
            NodeKind::UserQuery => Self::UserQuery(parse_config(config)?),
            NodeKind::KnowledgeRetrieval => Self::KnowledgeRetrieval(parse_config(config)?),
            NodeKind::WebSearch => Self::WebSearch(parse_config(config)?),
            NodeKind::Generation => Self::Generation(parse_config(config)?),
            NodeKind::Output => Self::Output(parse_config(config)?),
        };
        executor.check()?;
        Ok(executor)
    }

    fn check(&self) -> Result<(), String> {
        match self {
            Self::UserQuery(c) => c.check(),
            Self::KnowledgeRetrieval(c) => c.check(),
            Self::WebSearch(c) => c.check(),
            Self::Generation(c) => c.check(),
            Self::Output(_) => Ok(()),
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            Self::UserQuery(_) => NodeKind::UserQuery,
            Self::KnowledgeRetrieval(_) => NodeKind::KnowledgeRetrieval,
            Self::WebSearch(_) => NodeKind::WebSearch,
            Self::Generation(_) => NodeKind::Generation,
            Self::Output(_) => NodeKind::Output,
        }
    }

    pub async fn execute(
        &self,
        inputs: &NodeInputs,
        adapters: &Adapters,
        ctx: &NodeContext,
    ) -> Result<Artifact, ExecutorError> {
        match self {
            Self::UserQuery(c) => user_query::execute(c, inputs, ctx),
            Self::KnowledgeRetrieval(c) => retrieval::execute(c, inputs, adapters, ctx).await,
            Self::WebSearch(c) => web_search::execute(c, inputs, adapters, ctx).await,
            Self::Generation(c) => generation::execute(c, inputs, adapters, ctx).await,
            Self::Output(c) => output::execute(c, inputs, ctx),
        }
    }
}

/// Chunks carried by a KnowledgeRetrieval artifact.
pub(crate) fn chunks_of(artifact: &Artifact) -> Vec<RetrievedChunk> {
    serde_json::from_value(artifact.payload.clone()).unwrap_or_default()
}

/// Citations reachable from `inputs`: chunks of retrieval predecessors plus
/// sources carried forward by generation predecessors. Deduplicated by
/// document (highest score wins), best first.
pub(crate) fn collect_citations(inputs: &NodeInputs) -> Vec<Citation> {
    let mut best: BTreeMap<String, f64> = BTreeMap::new();
    let mut offer = |doc: String, score: f64| {
        let entry = best.entry(doc).or_insert(score);
        if score > *entry {
            *entry = score;
        }
    };

    for input in inputs.predecessors.values() {
        match input.kind {
            NodeKind::KnowledgeRetrieval => {
                for chunk in chunks_of(&input.artifact) {
                    offer(chunk.source_document_id, chunk.score);
                }
            }
            NodeKind::Generation => {
                let carried: Vec<Citation> = input
                    .artifact
                    .meta("sources")
                    .cloned()
                    .and_then(|v| serde_json::from_value(v).ok())
                    .unwrap_or_default();
                for c in carried {
                    offer(c.source_document_id, c.score);
                }
            }
            _ => {}
        }
    }

    let mut citations: Vec<Citation> = best
        .into_iter()
        .map(|(source_document_id, score)| Citation {
            source_document_id,
            score,
        })
        .collect();
    citations.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.source_document_id.cmp(&b.source_document_id))
    });
    citations
}
