use std::collections::BTreeMap;

use serde::Serialize;

use conduit_core::error::{ConduitError, Result};
use conduit_core::workflow::NodeKind;

use super::validate::ValidatedGraph;
use crate::executors::ComponentExecutor;

/// One node as the scheduler sees it.
#[derive(Debug, Clone)]
pub struct PlannedNode {
    pub id: String,
    pub kind: NodeKind,
    pub executor: ComponentExecutor,
    /// Direct predecessors, in id order.
    pub predecessors: Vec<String>,
    pub level: usize,
}

/// Dependency levels of a validated graph. Every node in level `k` depends
/// only on nodes in levels below `k`.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub levels: Vec<Vec<String>>,
    pub nodes: BTreeMap<String, PlannedNode>,
    pub entry: String,
    pub terminal: String,
}

/// Serializable view of a plan, for display.
#[derive(Debug, Clone, Serialize)]
pub struct PlanSummary {
    pub levels: Vec<Vec<String>>,
    pub entry: String,
    pub terminal: String,
    pub max_width: usize,
}

impl ExecutionPlan {
    pub fn node(&self, id: &str) -> Option<&PlannedNode> {
        self.nodes.get(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn max_width(&self) -> usize {
        self.levels.iter().map(|l| l.len()).max().unwrap_or(0)
    }

    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            levels: self.levels.clone(),
            entry: self.entry.clone(),
            terminal: self.terminal.clone(),
            max_width: self.max_width(),
        }
    }
}

/// Kahn-style leveling: each node lands on the lowest level above all of
/// its predecessors. Levels are sorted by id, so the same graph always
/// yields the same plan.
pub fn plan(graph: &ValidatedGraph) -> Result<ExecutionPlan> {
    let model = &graph.model;
    let mut in_degree: BTreeMap<&str, usize> = model
        .nodes
        .keys()
        .map(|id| (id.as_str(), model.indegree(id)))
        .collect();

    let mut levels: Vec<Vec<String>> = Vec::new();
    let mut ready: Vec<String> = in_degree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(id, _)| id.to_string())
        .collect();

    while !ready.is_empty() {
        let mut next = Vec::new();
        for id in &ready {
            for succ in model.successors(id) {
                if let Some(d) = in_degree.get_mut(succ.as_str()) {
                    *d -= 1;
                    if *d == 0 {
                        next.push(succ.clone());
                    }
                }
            }
        }
        next.sort();
        levels.push(std::mem::replace(&mut ready, next));
    }

    let placed: usize = levels.iter().map(|l| l.len()).sum();
    if placed != model.nodes.len() {
        return Err(ConduitError::Internal(format!(
            "planner placed {} of {} nodes; graph is not acyclic",
            placed,
            model.nodes.len()
        )));
    }

    let mut nodes = BTreeMap::new();
    for (level, ids) in levels.iter().enumerate() {
        for id in ids {
            let executor = graph
                .executors
                .get(id)
                .cloned()
                .ok_or_else(|| ConduitError::Internal(format!("no executor for node '{}'", id)))?;
            nodes.insert(
                id.clone(),
                PlannedNode {
                    id: id.clone(),
                    kind: executor.kind(),
                    executor,
                    predecessors: model.predecessors(id).cloned().collect(),
                    level,
                },
            );
        }
    }

    Ok(ExecutionPlan {
        levels,
        nodes,
        entry: graph.entry.clone(),
        terminal: graph.terminal.clone(),
    })
}
