use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use conduit_core::error::{ExecutorError, RetrievalError};
use conduit_core::types::{Artifact, RetrievalQuery};

use super::{Adapters, NodeContext, NodeInputs};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetrievalConfig {
    /// Documents to search; empty searches the whole store.
    #[serde(default)]
    pub document_ids: Vec<String>,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            document_ids: Vec::new(),
            top_k: default_top_k(),
            similarity_threshold: default_similarity_threshold(),
        }
    }
}

fn default_top_k() -> usize { 5 }
fn default_similarity_threshold() -> f64 { 0.7 }

impl RetrievalConfig {
    pub(crate) fn check(&self) -> Result<(), String> {
        if !(1..=100).contains(&self.top_k) {
            return Err(format!("top_k must be between 1 and 100, got {}", self.top_k));
        }
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(format!(
                "similarity_threshold must be between 0.0 and 1.0, got {}",
                self.similarity_threshold
            ));
        }
        Ok(())
    }
}

/// Query the document store and keep chunks at or above the threshold.
///
/// An empty result is a valid artifact with zero chunks.
pub async fn execute(
    config: &RetrievalConfig,
    inputs: &NodeInputs,
    adapters: &Adapters,
    ctx: &NodeContext,
) -> Result<Artifact, ExecutorError> {
    let retrieval = adapters
        .retrieval
        .as_ref()
        .ok_or_else(|| ExecutorError::ConfigInvalid("no retrieval adapter configured".into()))?;

    let query = RetrievalQuery {
        document_ids: config.document_ids.clone(),
        text: inputs.query_text().to_string(),
        top_k: config.top_k,
        score_threshold: config.similarity_threshold,
    };

    ctx.record_attempt(1);
    let mut chunks = retrieval
        .query(query, ctx.cancel.clone())
        .await
        .map_err(|e| match e {
            RetrievalError::Cancelled => ExecutorError::Cancelled,
            other => ExecutorError::RetrievalFailure(other.to_string()),
        })?;

    let returned = chunks.len();
    chunks.retain(|c| c.score >= config.similarity_threshold);
    chunks.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.source_document_id.cmp(&b.source_document_id))
    });
    chunks.truncate(config.top_k);

    debug!(
        node_id = %ctx.node_id,
        backend = retrieval.name(),
        returned,
        kept = chunks.len(),
        "Retrieval complete"
    );

    Ok(Artifact::new(json!(chunks))
        .with_meta("result_count", json!(chunks.len()))
        .with_meta("similarity_threshold", json!(config.similarity_threshold))
        .with_meta("top_k", json!(config.top_k)))
}
