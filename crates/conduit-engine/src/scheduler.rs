use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use conduit_core::config::EngineConfig;
use conduit_core::error::{ConduitError, ExecutorError, Result};
use conduit_core::event::{EventBus, RunEvent};
use conduit_core::types::{
    Artifact, NodeStatus, NodeTrace, RunId, RunResult, RunStatus, SkipReason,
};
use conduit_core::workflow::NodeKind;
use conduit_llm::RetryPolicy;

use crate::executors::{Adapters, NodeContext, NodeInputs};
use crate::graph::{ExecutionContext, ExecutionPlan, PlannedNode};

/// Final state of one node, before it becomes a [`NodeTrace`].
struct Outcome {
    status: NodeStatus,
    duration_ms: u64,
    attempts: u32,
    error: Option<String>,
}

impl Outcome {
    fn skipped(reason: SkipReason) -> Self {
        Self {
            status: NodeStatus::Skipped(reason),
            duration_ms: 0,
            attempts: 0,
            error: None,
        }
    }
}

/// Runs a plan level by level. A level is a barrier: level `k + 1` starts
/// only once every node in level `k` is terminal.
pub struct ExecutionScheduler {
    adapters: Adapters,
    config: EngineConfig,
    retry: RetryPolicy,
    events: Option<Arc<EventBus>>,
}

impl ExecutionScheduler {
    pub fn new(adapters: Adapters, config: EngineConfig) -> Self {
        let retry = RetryPolicy::from(&config.retry);
        Self {
            adapters,
            config,
            retry,
            events: None,
        }
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn publish(&self, event: RunEvent) {
        if let Some(ref bus) = self.events {
            bus.publish(event);
        }
    }

    /// Execute `plan` against `query`.
    ///
    /// Node failures end up in the trace. Only a broken scheduler invariant
    /// returns `Err`.
    pub async fn run(
        &self,
        plan: &ExecutionPlan,
        query: &str,
        deadline: Option<Duration>,
        cancel: CancellationToken,
    ) -> Result<RunResult> {
        let run_id = RunId::new();
        let started_at = Utc::now();
        let start = Instant::now();
        let deadline_at = deadline
            .or(self.config.deadline_ms.map(Duration::from_millis))
            .map(|d| start + d);
        // Adapters observe this token; cancelling it never touches the caller's.
        let run_cancel = cancel.child_token();

        info!(
            run_id = %run_id,
            nodes = plan.len(),
            levels = plan.levels.len(),
            deadline_ms = deadline_at.map(|d| (d - start).as_millis() as u64),
            "Run started"
        );
        self.publish(RunEvent::RunStarted {
            run_id: run_id.clone(),
            levels: plan.levels.len(),
        });

        let mut context = ExecutionContext::new(query);
        let mut outcomes: BTreeMap<String, Outcome> = BTreeMap::new();
        let mut interrupted: Option<SkipReason> = None;

        for (level, ids) in plan.levels.iter().enumerate() {
            if interrupted.is_none() {
                interrupted = interruption(deadline_at, &cancel);
            }

            let mut runnable: Vec<(&PlannedNode, NodeInputs)> = Vec::new();
            for id in ids {
                let node = plan
                    .node(id)
                    .ok_or_else(|| ConduitError::Internal(format!("node '{}' missing from plan", id)))?;
                let reason = match (interrupted, context.inputs_for(node, plan)) {
                    (Some(reason), _) => reason,
                    (None, None) => SkipReason::UpstreamFailed,
                    (None, Some(inputs)) => {
                        runnable.push((node, inputs));
                        continue;
                    }
                };
                debug!(run_id = %run_id, node_id = %id, reason = ?reason, "Skipping node");
                let outcome = Outcome::skipped(reason);
                self.publish(RunEvent::NodeSkipped {
                    run_id: run_id.clone(),
                    node_id: id.clone(),
                    status: outcome.status,
                });
                outcomes.insert(id.clone(), outcome);
            }

            if runnable.is_empty() {
                continue;
            }

            let permits = runnable.len().min(self.config.max_concurrency).max(1);
            debug!(run_id = %run_id, level, width = runnable.len(), permits, "Dispatching level");
            let semaphore = Semaphore::new(permits);
            let contexts: Vec<NodeContext> = runnable
                .iter()
                .map(|(node, _)| NodeContext::new(&node.id, run_cancel.clone(), self.retry.clone()))
                .collect();

            let mut finished: BTreeMap<String, (std::result::Result<Artifact, ExecutorError>, u64)> =
                BTreeMap::new();
            {
                let mut pending: FuturesUnordered<_> = runnable
                    .iter()
                    .zip(contexts.iter())
                    .map(|((node, inputs), ctx)| self.run_node(&run_id, node, inputs, ctx, &semaphore))
                    .collect();

                loop {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            interrupted = Some(SkipReason::Cancelled);
                            break;
                        }
                        _ = wait_until(deadline_at) => {
                            interrupted = Some(SkipReason::DeadlineExceeded);
                            break;
                        }
                        next = pending.next() => match next {
                            Some((id, result, duration_ms)) => {
                                finished.insert(id, (result, duration_ms));
                            }
                            None => break,
                        },
                    }
                }
            }

            if let Some(reason) = interrupted {
                warn!(run_id = %run_id, level, reason = ?reason, "Run interrupted, cancelling in-flight nodes");
                run_cancel.cancel();
            }

            for ((node, _), ctx) in runnable.iter().zip(contexts.iter()) {
                let outcome = match finished.remove(&node.id) {
                    Some((Ok(artifact), duration_ms)) => {
                        context.insert(&node.id, artifact)?;
                        Outcome {
                            status: NodeStatus::Succeeded,
                            duration_ms,
                            attempts: ctx.attempts(),
                            error: None,
                        }
                    }
                    Some((Err(e), duration_ms)) => {
                        warn!(run_id = %run_id, node_id = %node.id, kind = %node.kind, error = %e, "Node failed");
                        Outcome {
                            status: NodeStatus::Failed,
                            duration_ms,
                            attempts: ctx.attempts(),
                            error: Some(e.to_string()),
                        }
                    }
                    None => match (ctx.started_at(), interrupted) {
                        (Some(began), Some(reason)) => {
                            let error = match reason {
                                SkipReason::Cancelled => ExecutorError::Cancelled,
                                _ => ExecutorError::DeadlineExceeded,
                            };
                            Outcome {
                                status: NodeStatus::Failed,
                                duration_ms: began.elapsed().as_millis() as u64,
                                attempts: ctx.attempts(),
                                error: Some(error.to_string()),
                            }
                        }
                        (None, Some(reason)) => Outcome::skipped(reason),
                        (_, None) => {
                            return Err(ConduitError::Internal(format!(
                                "node '{}' finished without a result",
                                node.id
                            )))
                        }
                    },
                };

                match outcome.status {
                    NodeStatus::Skipped(_) => self.publish(RunEvent::NodeSkipped {
                        run_id: run_id.clone(),
                        node_id: node.id.clone(),
                        status: outcome.status,
                    }),
                    _ => self.publish(RunEvent::NodeFinished {
                        run_id: run_id.clone(),
                        node_id: node.id.clone(),
                        status: outcome.status,
                        duration_ms: outcome.duration_ms,
                    }),
                }
                outcomes.insert(node.id.clone(), outcome);
            }
        }

        let node_traces = collect_traces(plan, outcomes)?;
        let terminal_ok = node_traces
            .iter()
            .any(|t| t.node_id == plan.terminal && t.status == NodeStatus::Succeeded);
        let status = if terminal_ok {
            RunStatus::Succeeded
        } else if interrupted.is_some() {
            RunStatus::Cancelled
        } else {
            RunStatus::Failed
        };
        let final_artifact = if terminal_ok {
            context.get(&plan.terminal).map(|a| a.as_ref().clone())
        } else {
            None
        };

        let elapsed_ms = start.elapsed().as_millis() as u64;
        info!(run_id = %run_id, status = %status, elapsed_ms, "Run finished");
        self.publish(RunEvent::RunFinished {
            run_id: run_id.clone(),
            status,
            elapsed_ms,
        });

        Ok(RunResult {
            run_id,
            status,
            final_artifact,
            node_traces,
            started_at,
            finished_at: Utc::now(),
            elapsed_ms,
        })
    }

    /// Wait for a permit, then execute one node under the per-node timeout.
    async fn run_node(
        &self,
        run_id: &RunId,
        node: &PlannedNode,
        inputs: &NodeInputs,
        ctx: &NodeContext,
        permits: &Semaphore,
    ) -> (String, std::result::Result<Artifact, ExecutorError>, u64) {
        let _permit = match permits.acquire().await {
            Ok(p) => p,
            Err(_) => return (node.id.clone(), Err(ExecutorError::Cancelled), 0),
        };

        ctx.mark_started();
        let start = Instant::now();
        self.publish(RunEvent::NodeStarted {
            run_id: run_id.clone(),
            node_id: node.id.clone(),
        });
        debug!(run_id = %run_id, node_id = %node.id, kind = %node.kind, "Node started");

        let execution = node.executor.execute(inputs, &self.adapters, ctx);
        let result = match self.config.node_timeout_ms {
            Some(ms) => tokio::time::timeout(Duration::from_millis(ms), execution)
                .await
                .unwrap_or(Err(ExecutorError::Timeout(ms))),
            None => execution.await,
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        if result.is_ok() {
            debug!(run_id = %run_id, node_id = %node.id, duration_ms, "Node succeeded");
        }
        (node.id.clone(), result, duration_ms)
    }
}

/// Which interruption, if any, has already happened.
fn interruption(deadline_at: Option<Instant>, cancel: &CancellationToken) -> Option<SkipReason> {
    if cancel.is_cancelled() {
        Some(SkipReason::Cancelled)
    } else if deadline_at.is_some_and(|d| Instant::now() >= d) {
        Some(SkipReason::DeadlineExceeded)
    } else {
        None
    }
}

async fn wait_until(deadline_at: Option<Instant>) {
    match deadline_at {
        Some(d) => tokio::time::sleep_until(tokio::time::Instant::from_std(d)).await,
        None => std::future::pending().await,
    }
}

/// Traces in level order, then id order within a level.
fn collect_traces(plan: &ExecutionPlan, mut outcomes: BTreeMap<String, Outcome>) -> Result<Vec<NodeTrace>> {
    let mut traces = Vec::with_capacity(plan.len());
    for (level, ids) in plan.levels.iter().enumerate() {
        for id in ids {
            let outcome = outcomes
                .remove(id)
                .ok_or_else(|| ConduitError::Internal(format!("node '{}' has no outcome", id)))?;
            let kind = plan.node(id).map_or(NodeKind::Output, |n| n.kind);
            traces.push(NodeTrace {
                node_id: id.clone(),
                kind,
                level,
                status: outcome.status,
                duration_ms: outcome.duration_ms,
                attempts: outcome.attempts,
                error: outcome.error,
            });
        }
    }
    Ok(traces)
}
