use std::collections::{BTreeMap, BTreeSet, VecDeque};

use conduit_core::error::{ValidationError, ValidationIssue};
use conduit_core::workflow::{NodeKind, WorkflowDefinition};

use super::model::GraphModel;
use crate::executors::ComponentExecutor;

/// A graph that passed every structural and config check.
#[derive(Debug, Clone)]
pub struct ValidatedGraph {
    pub model: GraphModel,
    pub executors: BTreeMap<String, ComponentExecutor>,
    pub entry: String,
    pub terminal: String,
}

/// Check a workflow definition and build its executors.
///
/// Every check runs even after an earlier one fails, so the error lists all
/// problems at once.
pub fn validate(definition: &WorkflowDefinition) -> Result<ValidatedGraph, ValidationError> {
    let (model, mut issues) = GraphModel::build(definition);

    let entry = check_entry(&model, &mut issues);
    let terminal = check_terminal(&model, &mut issues);
    check_cycles(&model, &mut issues);
    check_reachability(&model, &mut issues);
    check_arity(&model, &mut issues);
    let executors = check_configs(&model, &mut issues);

    match (entry, terminal) {
        (Some(entry), Some(terminal)) if issues.is_empty() => Ok(ValidatedGraph {
            model,
            executors,
            entry,
            terminal,
        }),
        _ => Err(ValidationError { issues }),
    }
}

fn check_entry(model: &GraphModel, issues: &mut Vec<ValidationIssue>) -> Option<String> {
    let ids = model.ids_of_kind(NodeKind::UserQuery);
    for id in &ids {
        if model.indegree(id) > 0 {
            issues.push(ValidationIssue::EntryHasIncomingEdges { id: id.clone() });
        }
    }
    match ids.len() {
        0 => {
            issues.push(ValidationIssue::MissingEntry);
            None
        }
        1 => ids.into_iter().next(),
        _ => {
            issues.push(ValidationIssue::MultipleEntries { ids });
            None
        }
    }
}

fn check_terminal(model: &GraphModel, issues: &mut Vec<ValidationIssue>) -> Option<String> {
    let ids = model.ids_of_kind(NodeKind::Output);
    for id in &ids {
        if model.outdegree(id) > 0 {
            issues.push(ValidationIssue::OutputHasOutgoingEdges { id: id.clone() });
        }
    }
    match ids.len() {
        0 => {
            issues.push(ValidationIssue::MissingOutput);
            None
        }
        1 => ids.into_iter().next(),
        _ => {
            issues.push(ValidationIssue::MultipleOutputs { ids });
            None
        }
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    Unvisited,
    OnStack,
    Done,
}

/// Depth-first search from every node in id order; each back edge is one
/// cycle, reported as the path from the re-entered node back to itself.
fn check_cycles(model: &GraphModel, issues: &mut Vec<ValidationIssue>) {
    let mut marks: BTreeMap<&str, Mark> =
        model.nodes.keys().map(|id| (id.as_str(), Mark::Unvisited)).collect();
    let mut seen_cycles: BTreeSet<Vec<String>> = BTreeSet::new();

    for root in model.nodes.keys() {
        if marks.get(root.as_str()) != Some(&Mark::Unvisited) {
            continue;
        }

        // Iterative DFS; `stack` holds (successors, next index) parallel to `path`.
        let mut path: Vec<&str> = vec![root.as_str()];
        let mut stack: Vec<(Vec<&String>, usize)> = vec![(model.successors(root).collect(), 0)];
        marks.insert(root.as_str(), Mark::OnStack);

        while let Some((succs, next)) = stack.last_mut() {
            if *next >= succs.len() {
                stack.pop();
                if let Some(done) = path.pop() {
                    marks.insert(done, Mark::Done);
                }
                continue;
            }
            let child: &String = succs[*next];
            let child = child.as_str();
            *next += 1;

            match marks.get(child).copied().unwrap_or(Mark::Done) {
                Mark::Unvisited => {
                    marks.insert(child, Mark::OnStack);
                    path.push(child);
                    stack.push((model.successors(child).collect(), 0));
                }
                Mark::OnStack => {
                    let start = path.iter().position(|id| *id == child).unwrap_or(0);
                    let mut cycle: Vec<String> = path[start..].iter().map(|s| s.to_string()).collect();
                    cycle.push(child.to_string());
                    if seen_cycles.insert(cycle.clone()) {
                        issues.push(ValidationIssue::CycleDetected { path: cycle });
                    }
                }
                Mark::Done => {}
            }
        }
    }
}

/// Forward reachability from the UserQuery node(s). Skipped when there is
/// no entry, since that is already reported.
fn check_reachability(model: &GraphModel, issues: &mut Vec<ValidationIssue>) {
    let entries = model.ids_of_kind(NodeKind::UserQuery);
    if entries.is_empty() {
        return;
    }

    let mut reached: BTreeSet<&str> = BTreeSet::new();
    let mut queue: VecDeque<&str> = VecDeque::new();
    for id in &entries {
        if let Some((key, _)) = model.nodes.get_key_value(id) {
            reached.insert(key.as_str());
            queue.push_back(key.as_str());
        }
    }
    while let Some(id) = queue.pop_front() {
        for next in model.successors(id) {
            if reached.insert(next.as_str()) {
                queue.push_back(next.as_str());
            }
        }
    }

    for id in model.nodes.keys() {
        if !reached.contains(id.as_str()) {
            issues.push(ValidationIssue::UnreachableNode { id: id.clone() });
        }
    }
}

fn check_arity(model: &GraphModel, issues: &mut Vec<ValidationIssue>) {
    for (id, node) in &model.nodes {
        let violation = |detail: &str| ValidationIssue::ArityViolation {
            id: id.clone(),
            kind: node.kind,
            detail: detail.to_string(),
        };
        match node.kind {
            NodeKind::UserQuery => {
                if model.outdegree(id) == 0 {
                    issues.push(violation("needs at least one outgoing edge"));
                }
            }
            NodeKind::KnowledgeRetrieval | NodeKind::WebSearch | NodeKind::Generation => {
                if model.indegree(id) == 0 {
                    issues.push(violation("needs at least one incoming edge"));
                }
                if model.outdegree(id) == 0 {
                    issues.push(violation("has no outgoing edges; only the output node may be terminal"));
                }
            }
            NodeKind::Output => {
                if model.indegree(id) == 0 {
                    issues.push(violation("needs at least one incoming edge"));
                }
            }
        }
    }
}

fn check_configs(
    model: &GraphModel,
    issues: &mut Vec<ValidationIssue>,
) -> BTreeMap<String, ComponentExecutor> {
    let mut executors = BTreeMap::new();
    for (id, node) in &model.nodes {
        match ComponentExecutor::from_config(node.kind, &node.config) {
            Ok(exec) => {
                executors.insert(id.clone(), exec);
            }
            Err(reason) => issues.push(ValidationIssue::InvalidConfig {
                id: id.clone(),
                reason,
            }),
        }
    }
    executors
}
