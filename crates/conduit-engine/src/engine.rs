use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use conduit_core::config::EngineConfig;
use conduit_core::error::Result;
use conduit_core::event::EventBus;
use conduit_core::types::RunResult;
use conduit_core::workflow::WorkflowDefinition;
use conduit_llm::RetryPolicy;

use crate::executors::Adapters;
use crate::graph::{self, ExecutionPlan, ValidatedGraph};
use crate::scheduler::ExecutionScheduler;

/// Per-submission overrides.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Overrides `engine.deadline_ms`.
    pub deadline: Option<Duration>,
    pub cancel: Option<CancellationToken>,
}

/// Validate, plan, and run workflow definitions against injected adapters.
///
/// Runs share no mutable state; one engine can serve concurrent submissions.
pub struct Engine {
    scheduler: ExecutionScheduler,
}

impl Engine {
    pub fn new(adapters: Adapters, config: EngineConfig) -> Self {
        Self {
            scheduler: ExecutionScheduler::new(adapters, config),
        }
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.scheduler = self.scheduler.with_events(events);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.scheduler = self.scheduler.with_retry(retry);
        self
    }

    pub fn validate(&self, definition: &WorkflowDefinition) -> Result<ValidatedGraph> {
        graph::validate(definition).map_err(|e| {
            warn!(issues = e.issues.len(), error = %e, "Workflow rejected");
            e.into()
        })
    }

    pub fn plan(&self, definition: &WorkflowDefinition) -> Result<ExecutionPlan> {
        graph::plan(&self.validate(definition)?)
    }

    pub async fn submit(&self, definition: &WorkflowDefinition, query: &str) -> Result<RunResult> {
        self.submit_with_options(definition, query, RunOptions::default())
            .await
    }

    pub async fn submit_with_cancel(
        &self,
        definition: &WorkflowDefinition,
        query: &str,
        cancel: CancellationToken,
    ) -> Result<RunResult> {
        let options = RunOptions {
            cancel: Some(cancel),
            ..RunOptions::default()
        };
        self.submit_with_options(definition, query, options).await
    }

    pub async fn submit_with_options(
        &self,
        definition: &WorkflowDefinition,
        query: &str,
        options: RunOptions,
    ) -> Result<RunResult> {
        let plan = self.plan(definition)?;
        info!(
            workflow = definition.name.as_deref().unwrap_or("unnamed"),
            nodes = plan.len(),
            "Workflow accepted"
        );
        self.scheduler
            .run(
                &plan,
                query,
                options.deadline,
                options.cancel.unwrap_or_default(),
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_core::error::{ConduitError, ValidationIssue};
    use conduit_core::types::RunStatus;
    use conduit_test_utils::{linear_chain, refund_chunks, MockProvider, MockRetrieval};

    fn engine(provider: Arc<MockProvider>) -> Engine {
        let adapters =
            Adapters::new(provider).with_retrieval(Arc::new(MockRetrieval::new(refund_chunks())));
        Engine::new(adapters, EngineConfig::default()).with_retry(RetryPolicy::immediate(3))
    }

    #[tokio::test]
    async fn test_submit() {
        let result = engine(Arc::new(MockProvider::new()))
            .submit(&linear_chain(), "What is the refund policy?")
            .await
            .unwrap();
        assert_eq!(result.status, RunStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_invalid_graph_never_runs() {
        let provider = Arc::new(MockProvider::new());
        let err = engine(provider.clone())
            .submit(&linear_chain().edge("out", "kb"), "q")
            .await
            .unwrap_err();
        match err {
            ConduitError::Validation(v) => {
                assert!(v.has(|i| matches!(i, ValidationIssue::CycleDetected { .. })));
                assert!(v.has(|i| matches!(i, ValidationIssue::OutputHasOutgoingEdges { .. })));
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_submit_with_cancelled_token() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = engine(Arc::new(MockProvider::new()))
            .submit_with_cancel(&linear_chain(), "q", cancel)
            .await
            .unwrap();
        assert_eq!(result.status, RunStatus::Cancelled);
        assert!(result.final_artifact.is_none());
        assert!(result.node_traces.iter().all(|t| t.attempts == 0));
    }
}
