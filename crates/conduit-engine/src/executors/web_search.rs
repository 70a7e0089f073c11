use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use conduit_core::error::{ExecutorError, RetrievalError};
use conduit_core::types::Artifact;

use super::{Adapters, NodeContext, NodeInputs};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WebSearchConfig {
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

impl Default for WebSearchConfig {
    fn default() -> Self {
        Self {
            max_results: default_max_results(),
        }
    }
}

fn default_max_results() -> usize { 5 }

impl WebSearchConfig {
    pub(crate) fn check(&self) -> Result<(), String> {
        if !(1..=20).contains(&self.max_results) {
            return Err(format!(
                "max_results must be between 1 and 20, got {}",
                self.max_results
            ));
        }
        Ok(())
    }
}

pub async fn execute(
    config: &WebSearchConfig,
    inputs: &NodeInputs,
    adapters: &Adapters,
    ctx: &NodeContext,
) -> Result<Artifact, ExecutorError> {
    let search = adapters
        .web_search
        .as_ref()
        .ok_or_else(|| ExecutorError::ConfigInvalid("no web search adapter configured".into()))?;

    ctx.record_attempt(1);
    let mut hits = search
        .search(
            inputs.query_text().to_string(),
            config.max_results,
            ctx.cancel.clone(),
        )
        .await
        .map_err(|e| match e {
            RetrievalError::Cancelled => ExecutorError::Cancelled,
            other => ExecutorError::WebSearchFailure(other.to_string()),
        })?;
    hits.truncate(config.max_results);

    debug!(node_id = %ctx.node_id, backend = search.name(), hits = hits.len(), "Web search complete");

    Ok(Artifact::new(json!(hits)).with_meta("result_count", json!(hits.len())))
}
