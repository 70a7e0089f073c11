use serde::{Deserialize, Serialize};
use serde_json::json;

use conduit_core::error::ExecutorError;
use conduit_core::types::Artifact;

use super::{NodeContext, NodeInputs};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserQueryConfig {
    /// Maximum query length in characters.
    #[serde(default = "default_max_length")]
    pub max_length: usize,
}

impl Default for UserQueryConfig {
    fn default() -> Self {
        Self {
            max_length: default_max_length(),
        }
    }
}

fn default_max_length() -> usize { 2000 }

impl UserQueryConfig {
    pub(crate) fn check(&self) -> Result<(), String> {
        if self.max_length == 0 {
            return Err("max_length must be greater than 0".into());
        }
        Ok(())
    }
}

/// Pass the caller's query through after checking it.
pub fn execute(
    config: &UserQueryConfig,
    inputs: &NodeInputs,
    ctx: &NodeContext,
) -> Result<Artifact, ExecutorError> {
    ctx.record_attempt(1);
    let query = inputs.query.trim();
    if query.is_empty() {
        return Err(ExecutorError::InvalidInput("query is empty".into()));
    }
    let length = query.chars().count();
    if length > config.max_length {
        return Err(ExecutorError::InvalidInput(format!(
            "query is {} characters, limit is {}",
            length, config.max_length
        )));
    }
    Ok(Artifact::text(query).with_meta("length", json!(length)))
}
