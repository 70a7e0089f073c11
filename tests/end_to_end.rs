use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use tokio_util::sync::CancellationToken;

use conduit_core::config::{EngineConfig, RetryConfig};
use conduit_core::error::{ConduitError, ProviderError, RetrievalError, ValidationIssue};
use conduit_core::event::{EventBus, RunEvent};
use conduit_core::types::{NodeStatus, RunStatus, SkipReason};
use conduit_core::workflow::{NodeKind, NodeSpec, WorkflowDefinition};
use conduit_engine::{Adapters, Engine, RunOptions};
use conduit_test_utils::{
    diamond, linear_chain, refund_chunks, web_hits, MockProvider, MockRetrieval, MockWebSearch,
};

const QUESTION: &str = "What is the refund policy?";

/// Engine config with fast, deterministic backoff.
fn fast_config() -> EngineConfig {
    EngineConfig {
        retry: RetryConfig {
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
            jitter: false,
            ..RetryConfig::default()
        },
        ..EngineConfig::default()
    }
}

fn engine_with(provider: Arc<MockProvider>) -> Engine {
    let adapters = Adapters::new(provider)
        .with_retrieval(Arc::new(MockRetrieval::new(refund_chunks())))
        .with_web_search(Arc::new(MockWebSearch::new(web_hits())));
    Engine::new(adapters, fast_config())
}

#[tokio::test]
async fn test_linear_chain_with_citations() {
    let provider = Arc::new(MockProvider::replying(
        "Refunds are issued within 30 days of purchase.",
    ));
    let result = engine_with(provider).submit(&linear_chain(), QUESTION).await.unwrap();

    assert_eq!(result.status, RunStatus::Succeeded);
    let artifact = result.final_artifact.expect("final artifact");
    let text = artifact.as_text().unwrap();
    assert!(text.starts_with("Refunds are issued within 30 days of purchase."));
    assert!(text.contains("Sources:"));
    assert_eq!(
        artifact.metadata["citations"],
        json!([
            {"source_document_id": "policy-handbook", "score": 0.91},
            {"source_document_id": "faq", "score": 0.78}
        ])
    );
    assert!(result.node_traces.iter().all(|t| t.status == NodeStatus::Succeeded));
}

#[tokio::test]
async fn test_diamond_generation_sees_both_branches() {
    let provider = Arc::new(MockProvider::new());
    let result = engine_with(provider.clone())
        .submit(&diamond(), QUESTION)
        .await
        .unwrap();

    assert!(result.succeeded());
    let prompts = provider.prompts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].user.contains("Context from kb:"));
    assert!(prompts[0].user.contains("Web results from web:"));
    assert!(prompts[0].user.contains("https://example.org/refunds"));
    assert!(prompts[0].user.ends_with(&format!("Question: {}", QUESTION)));
}

#[tokio::test]
async fn test_padded_query_reaches_generation_trimmed() {
    let provider = Arc::new(MockProvider::new());
    let result = engine_with(provider.clone())
        .submit(&linear_chain(), &format!("  {}\n", QUESTION))
        .await
        .unwrap();

    assert!(result.succeeded());
    let prompts = provider.prompts();
    assert!(prompts[0].user.ends_with(&format!("\n\nQuestion: {}", QUESTION)));
}

#[tokio::test]
async fn test_missing_entry_is_rejected_before_planning() {
    let def = WorkflowDefinition::new()
        .node(NodeSpec::new("kb", NodeKind::KnowledgeRetrieval))
        .node(NodeSpec::new("gen", NodeKind::Generation))
        .node(NodeSpec::new("out", NodeKind::Output))
        .edge("kb", "gen")
        .edge("gen", "out");
    let provider = Arc::new(MockProvider::new());
    let err = engine_with(provider.clone()).submit(&def, QUESTION).await.unwrap_err();

    match err {
        ConduitError::Validation(v) => assert!(v.issues.contains(&ValidationIssue::MissingEntry)),
        other => panic!("expected validation error, got {}", other),
    }
    assert_eq!(provider.calls(), 0);
}

#[tokio::test]
async fn test_transient_failures_then_success() {
    let provider = Arc::new(MockProvider::scripted(vec![
        Err(ProviderError::Server {
            status: 502,
            message: "bad gateway".into(),
        }),
        Err(ProviderError::RateLimited("slow down".into())),
        Ok("Refunds within 30 days.".into()),
    ]));
    let result = engine_with(provider.clone())
        .submit(&linear_chain(), QUESTION)
        .await
        .unwrap();

    let gen = result.trace("gen").unwrap();
    assert_eq!(gen.status, NodeStatus::Succeeded);
    assert_eq!(gen.attempts, 3);
    assert_eq!(provider.calls(), 3);
    assert_eq!(result.status, RunStatus::Succeeded);
}

#[tokio::test]
async fn test_empty_retrieval_reaches_output() {
    let def = WorkflowDefinition::new()
        .node(NodeSpec::new("q", NodeKind::UserQuery))
        .node(NodeSpec::new("kb", NodeKind::KnowledgeRetrieval))
        .node(NodeSpec::new("out", NodeKind::Output))
        .edge("q", "kb")
        .edge("kb", "out");
    let adapters = Adapters::new(Arc::new(MockProvider::new()))
        .with_retrieval(Arc::new(MockRetrieval::empty()));
    let result = Engine::new(adapters, fast_config())
        .submit(&def, QUESTION)
        .await
        .unwrap();

    assert_eq!(result.status, RunStatus::Succeeded);
    let artifact = result.final_artifact.expect("final artifact");
    assert_eq!(artifact.as_text(), Some("No relevant documents found."));
    assert_eq!(artifact.metadata["citations"], json!([]));
}

#[tokio::test]
async fn test_deadline_cancels_run() {
    let provider = Arc::new(MockProvider::new().with_delay(Duration::from_secs(5)));
    let options = RunOptions {
        deadline: Some(Duration::from_millis(100)),
        ..RunOptions::default()
    };
    let started = Instant::now();
    let result = engine_with(provider)
        .submit_with_options(&linear_chain(), QUESTION, options)
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(result.status, RunStatus::Cancelled);
    assert!(result.final_artifact.is_none());
    assert_eq!(
        result.trace("out").unwrap().status,
        NodeStatus::Skipped(SkipReason::DeadlineExceeded)
    );
    assert_eq!(result.trace("gen").unwrap().status, NodeStatus::Failed);
}

#[tokio::test]
async fn test_identical_runs_produce_identical_artifacts() {
    let engine = engine_with(Arc::new(MockProvider::new()));
    let first = engine.submit(&diamond(), QUESTION).await.unwrap();
    let second = engine.submit(&diamond(), QUESTION).await.unwrap();

    assert_ne!(first.run_id, second.run_id);
    let a = serde_json::to_vec(&first.final_artifact).unwrap();
    let b = serde_json::to_vec(&second.final_artifact).unwrap();
    assert_eq!(a, b);
}

#[tokio::test]
async fn test_dependents_of_failed_node_never_start() {
    let bus = Arc::new(EventBus::default());
    let mut rx = bus.subscribe();
    let provider = Arc::new(MockProvider::new());
    let adapters = Adapters::new(provider.clone())
        .with_retrieval(Arc::new(MockRetrieval::failing(RetrievalError::Status {
            status: 500,
            message: "index offline".into(),
        })))
        .with_web_search(Arc::new(MockWebSearch::new(web_hits())));
    let result = Engine::new(adapters, fast_config())
        .with_events(bus.clone())
        .submit(&diamond(), QUESTION)
        .await
        .unwrap();

    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(result.trace("web").unwrap().status, NodeStatus::Succeeded);
    for id in ["gen", "out"] {
        assert_eq!(
            result.trace(id).unwrap().status,
            NodeStatus::Skipped(SkipReason::UpstreamFailed)
        );
    }

    let mut started = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let RunEvent::NodeStarted { node_id, .. } = event {
            started.push(node_id);
        }
    }
    assert!(!started.contains(&"gen".to_string()));
    assert!(!started.contains(&"out".to_string()));
    assert_eq!(provider.calls(), 0);
}

#[tokio::test]
async fn test_concurrent_runs_are_independent() {
    let engine = Arc::new(engine_with(Arc::new(MockProvider::new())));
    let runs = (0..4).map(|i| {
        let engine = engine.clone();
        async move {
            engine
                .submit(&linear_chain(), &format!("question {}", i))
                .await
                .unwrap()
        }
    });
    let results = futures::future::join_all(runs).await;
    assert!(results.iter().all(|r| r.succeeded()));
    let ids: std::collections::BTreeSet<_> = results.iter().map(|r| r.run_id.clone().0).collect();
    assert_eq!(ids.len(), 4);
}

#[tokio::test]
async fn test_explicit_cancel_before_start() {
    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = engine_with(Arc::new(MockProvider::new()))
        .submit_with_cancel(&linear_chain(), QUESTION, cancel)
        .await
        .unwrap();
    assert_eq!(result.status, RunStatus::Cancelled);
    assert!(result
        .node_traces
        .iter()
        .all(|t| t.status == NodeStatus::Skipped(SkipReason::Cancelled)));
}

/// Validation accepts exactly the graphs with one entry, one output, no
/// cycle, and full reachability.
#[test]
fn test_validation_matches_structure() {
    let q = || NodeSpec::new("q", NodeKind::UserQuery);
    let g = |id: &str| NodeSpec::new(id, NodeKind::Generation);
    let o = || NodeSpec::new("o", NodeKind::Output);

    let cases: Vec<(WorkflowDefinition, bool)> = vec![
        (WorkflowDefinition::new().node(q()).node(o()).edge("q", "o"), true),
        (
            WorkflowDefinition::new()
                .node(q())
                .node(g("a"))
                .node(g("b"))
                .node(o())
                .edge("q", "a")
                .edge("q", "b")
                .edge("a", "b")
                .edge("b", "o")
                .edge("a", "o"),
            true,
        ),
        // cycle
        (
            WorkflowDefinition::new()
                .node(q())
                .node(g("a"))
                .node(g("b"))
                .node(o())
                .edge("q", "a")
                .edge("a", "b")
                .edge("b", "a")
                .edge("b", "o"),
            false,
        ),
        // no output
        (WorkflowDefinition::new().node(q()).node(g("a")).edge("q", "a"), false),
        // unreachable
        (
            WorkflowDefinition::new()
                .node(q())
                .node(g("a"))
                .node(g("stray"))
                .node(o())
                .edge("q", "a")
                .edge("a", "o")
                .edge("stray", "a"),
            false,
        ),
    ];

    for (i, (def, valid)) in cases.iter().enumerate() {
        assert_eq!(conduit_engine::validate(def).is_ok(), *valid, "case {}", i);
    }
}

#[test]
fn test_every_back_edge_is_a_cycle() {
    let ids = ["query", "kb", "gen", "out"];
    for later in 1..ids.len() {
        for earlier in 1..=later {
            let def = linear_chain().edge(ids[later], ids[earlier]);
            let err = conduit_engine::validate(&def).unwrap_err();
            assert!(
                err.has(|i| matches!(i, ValidationIssue::CycleDetected { .. })),
                "{} -> {}",
                ids[later],
                ids[earlier]
            );
        }
    }
}

#[test]
fn test_workflow_file_loads() {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(
        tmp.path(),
        r#"{
            "name": "support",
            "nodes": [
                {"id": "q", "kind": "user_query"},
                {"id": "kb", "kind": "knowledge_retrieval", "config": {"top_k": 3}},
                {"id": "gen", "kind": "generation"},
                {"id": "out", "kind": "output", "config": {"format": "markdown"}}
            ],
            "edges": [
                {"source": "q", "target": "kb"},
                {"source": "kb", "target": "gen"},
                {"source": "gen", "target": "out"}
            ]
        }"#,
    )
    .unwrap();

    let def = WorkflowDefinition::load(tmp.path()).unwrap();
    let plan = conduit_engine::plan(&conduit_engine::validate(&def).unwrap()).unwrap();
    assert_eq!(plan.levels.len(), 4);
    assert_eq!(def.name.as_deref(), Some("support"));
}
