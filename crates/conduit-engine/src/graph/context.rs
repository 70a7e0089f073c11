use std::collections::BTreeMap;
use std::sync::Arc;

use conduit_core::error::{ConduitError, Result};
use conduit_core::types::Artifact;

use super::plan::{ExecutionPlan, PlannedNode};
use crate::executors::{NodeInput, NodeInputs};

/// Per-run artifact store. Each node id is written at most once.
#[derive(Debug, Default)]
pub struct ExecutionContext {
    query: String,
    artifacts: BTreeMap<String, Arc<Artifact>>,
}

impl ExecutionContext {
    /// The query is stored trimmed so every node reads the same text.
    pub fn new(query: &str) -> Self {
        Self {
            query: query.trim().to_string(),
            artifacts: BTreeMap::new(),
        }
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    /// Store a node's artifact. A second write for the same id is a
    /// scheduler fault.
    pub fn insert(&mut self, node_id: &str, artifact: Artifact) -> Result<()> {
        if self.artifacts.contains_key(node_id) {
            return Err(ConduitError::Internal(format!(
                "artifact for node '{}' written twice",
                node_id
            )));
        }
        self.artifacts.insert(node_id.to_string(), Arc::new(artifact));
        Ok(())
    }

    pub fn get(&self, node_id: &str) -> Option<&Arc<Artifact>> {
        self.artifacts.get(node_id)
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    /// Inputs for `node`: the run query plus every predecessor artifact.
    /// `None` if any predecessor has no artifact.
    pub fn inputs_for(&self, node: &PlannedNode, plan: &ExecutionPlan) -> Option<NodeInputs> {
        let mut predecessors = BTreeMap::new();
        for pred in &node.predecessors {
            let artifact = self.artifacts.get(pred)?.clone();
            let kind = plan.node(pred)?.kind;
            predecessors.insert(pred.clone(), NodeInput { kind, artifact });
        }
        Some(NodeInputs {
            query: self.query.clone(),
            predecessors,
        })
    }
}
