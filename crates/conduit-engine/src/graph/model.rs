use std::collections::{BTreeMap, BTreeSet};

use conduit_core::error::ValidationIssue;
use conduit_core::workflow::{NodeKind, NodeSpec, WorkflowDefinition};

/// Adjacency view of a workflow definition.
///
/// Built once per submission. Duplicate node ids keep the first
/// declaration; edges naming unknown nodes are dropped. Both are reported
/// as issues by [`GraphModel::build`].
#[derive(Debug, Clone, Default)]
pub struct GraphModel {
    pub nodes: BTreeMap<String, NodeSpec>,
    preds: BTreeMap<String, BTreeSet<String>>,
    succs: BTreeMap<String, BTreeSet<String>>,
}

impl GraphModel {
    pub fn build(definition: &WorkflowDefinition) -> (Self, Vec<ValidationIssue>) {
        let mut model = GraphModel::default();
        let mut issues = Vec::new();

        for node in &definition.nodes {
            if model.nodes.contains_key(&node.id) {
                let issue = ValidationIssue::DuplicateNodeId { id: node.id.clone() };
                if !issues.contains(&issue) {
                    issues.push(issue);
                }
                continue;
            }
            model.preds.insert(node.id.clone(), BTreeSet::new());
            model.succs.insert(node.id.clone(), BTreeSet::new());
            model.nodes.insert(node.id.clone(), node.clone());
        }

        for edge in &definition.edges {
            let mut known = true;
            for end in [&edge.source, &edge.target] {
                if !model.nodes.contains_key(end) {
                    issues.push(ValidationIssue::UnknownNode {
                        edge: (edge.source.clone(), edge.target.clone()),
                        id: end.clone(),
                    });
                    known = false;
                }
            }
            if !known {
                continue;
            }
            if let Some(s) = model.succs.get_mut(&edge.source) {
                s.insert(edge.target.clone());
            }
            if let Some(p) = model.preds.get_mut(&edge.target) {
                p.insert(edge.source.clone());
            }
        }

        (model, issues)
    }

    pub fn kind(&self, id: &str) -> Option<NodeKind> {
        self.nodes.get(id).map(|n| n.kind)
    }

    /// Direct predecessors, in id order.
    pub fn predecessors(&self, id: &str) -> impl Iterator<Item = &String> {
        self.preds.get(id).into_iter().flatten()
    }

    /// Direct successors, in id order.
    pub fn successors(&self, id: &str) -> impl Iterator<Item = &String> {
        self.succs.get(id).into_iter().flatten()
    }

    pub fn indegree(&self, id: &str) -> usize {
        self.preds.get(id).map_or(0, |p| p.len())
    }

    pub fn outdegree(&self, id: &str) -> usize {
        self.succs.get(id).map_or(0, |s| s.len())
    }

    /// Ids of every node of `kind`, in id order.
    pub fn ids_of_kind(&self, kind: NodeKind) -> Vec<String> {
        self.nodes
            .values()
            .filter(|n| n.kind == kind)
            .map(|n| n.id.clone())
            .collect()
    }
}
