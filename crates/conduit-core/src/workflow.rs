use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ConduitError, Result};

/// The kind of processing step a node performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    #[serde(alias = "UserQuery")]
    UserQuery,
    #[serde(alias = "KnowledgeRetrieval")]
    KnowledgeRetrieval,
    #[serde(alias = "WebSearch")]
    WebSearch,
    #[serde(alias = "Generation")]
    Generation,
    #[serde(alias = "Output")]
    Output,
}

impl NodeKind {
    pub const ALL: [NodeKind; 5] = [
        NodeKind::UserQuery,
        NodeKind::KnowledgeRetrieval,
        NodeKind::WebSearch,
        NodeKind::Generation,
        NodeKind::Output,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserQuery => "user_query",
            Self::KnowledgeRetrieval => "knowledge_retrieval",
            Self::WebSearch => "web_search",
            Self::Generation => "generation",
            Self::Output => "output",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A node as submitted by the caller. `config` is untyped until validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    pub id: String,
    pub kind: NodeKind,
    #[serde(default)]
    pub config: serde_json::Map<String, serde_json::Value>,
}

impl NodeSpec {
    pub fn new(id: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            kind,
            config: serde_json::Map::new(),
        }
    }

    /// Set one config key.
    pub fn with(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.config.insert(key.into(), value);
        self
    }
}

/// A directed dependency: `target` consumes the artifact of `source`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EdgeSpec {
    #[serde(alias = "from")]
    pub source: String,
    #[serde(alias = "to")]
    pub target: String,
}

impl EdgeSpec {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

/// A workflow submission: nodes, edges and per-node config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub edges: Vec<EdgeSpec>,
}

impl WorkflowDefinition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(mut self, node: NodeSpec) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn edge(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.edges.push(EdgeSpec::new(source, target));
        self
    }

    /// Load a workflow definition from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| ConduitError::ConfigNotFound(path.display().to_string()))?;
        Ok(serde_json::from_str(&content)?)
    }
}
