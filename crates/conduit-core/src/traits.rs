use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::error::{ProviderError, RetrievalError};
use crate::types::*;

/// Generation backend: one or more interchangeable language-model providers.
///
/// Implementations must be safe to call concurrently from several nodes and
/// runs, and must return promptly once `cancel` fires.
pub trait ProviderAdapter: Send + Sync + 'static {
    /// Provider name for logs (e.g., "openai").
    fn name(&self) -> &str;

    /// Generate a completion for a single prompt.
    fn generate(
        &self,
        prompt: Prompt,
        params: GenerationParams,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, std::result::Result<GeneratedText, ProviderError>>;
}

/// Document store with similarity search.
pub trait RetrievalAdapter: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Ranked chunks for `query.text`, best first.
    fn query(
        &self,
        query: RetrievalQuery,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, std::result::Result<Vec<RetrievedChunk>, RetrievalError>>;
}

/// Web search backend used for augmentation branches.
pub trait WebSearchAdapter: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Ranked snippets for `query`, at most `max_results`.
    fn search(
        &self,
        query: String,
        max_results: usize,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, std::result::Result<Vec<SearchHit>, RetrievalError>>;
}
