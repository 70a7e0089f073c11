use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use conduit_core::error::{ProviderError, RetrievalError};
use conduit_core::traits::{ProviderAdapter, RetrievalAdapter, WebSearchAdapter};
use conduit_core::types::*;

/// Wait for `delay`, or fail early if `cancel` fires first.
async fn stall(delay: Option<Duration>, cancel: &CancellationToken) -> bool {
    match delay {
        Some(d) => tokio::select! {
            _ = tokio::time::sleep(d) => true,
            _ = cancel.cancelled() => false,
        },
        None => !cancel.is_cancelled(),
    }
}

/// Scripted generation backend.
///
/// Pops one scripted result per call, and the last scripted `Ok` repeats for
/// every later call. With an empty script it replies with a deterministic
/// answer derived from the prompt.
pub struct MockProvider {
    script: Mutex<VecDeque<Result<String, ProviderError>>>,
    delay: Option<Duration>,
    calls: AtomicU32,
    prompts: Mutex<Vec<Prompt>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            delay: None,
            calls: AtomicU32::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Always reply with `text`.
    pub fn replying(text: &str) -> Self {
        let provider = Self::new();
        provider.push(Ok(text.to_string()));
        provider
    }

    /// Reply with the given results in order.
    pub fn scripted(results: Vec<Result<String, ProviderError>>) -> Self {
        let provider = Self::new();
        for r in results {
            provider.push(r);
        }
        provider
    }

    /// Sleep before every reply (cancellable).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push(&self, result: Result<String, ProviderError>) {
        self.script.lock().unwrap().push_back(result);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<Prompt> {
        self.prompts.lock().unwrap().clone()
    }

    fn next_reply(&self, prompt: &Prompt) -> Result<String, ProviderError> {
        let mut script = self.script.lock().unwrap();
        if script.len() == 1 && matches!(script.front(), Some(Ok(_))) {
            return script.front().cloned().unwrap_or_else(|| Ok(String::new()));
        }
        match script.pop_front() {
            Some(r) => r,
            None => Ok(format!(
                "Answer based on {} characters of context.",
                prompt.user.len()
            )),
        }
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderAdapter for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn generate(
        &self,
        prompt: Prompt,
        params: GenerationParams,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<GeneratedText, ProviderError>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prompts.lock().unwrap().push(prompt.clone());

            if !stall(self.delay, &cancel).await {
                return Err(ProviderError::Cancelled);
            }

            let text = self.next_reply(&prompt)?;
            Ok(GeneratedText {
                usage: TokenUsage {
                    prompt_tokens: (prompt.system.len() + prompt.user.len()) as u64 / 4,
                    completion_tokens: text.len() as u64 / 4,
                },
                text,
                model: params.model.unwrap_or_else(|| "mock-model".to_string()),
            })
        })
    }
}

/// In-memory retrieval backend over a fixed chunk list.
///
/// Applies `top_k`, the score threshold and the document filter the way a
/// vector store would.
pub struct MockRetrieval {
    chunks: Vec<RetrievedChunk>,
    failure: Option<RetrievalError>,
    delay: Option<Duration>,
    queries: Mutex<Vec<RetrievalQuery>>,
}

impl MockRetrieval {
    pub fn new(chunks: Vec<RetrievedChunk>) -> Self {
        Self {
            chunks,
            failure: None,
            delay: None,
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn failing(error: RetrievalError) -> Self {
        let mut r = Self::empty();
        r.failure = Some(error);
        r
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn queries(&self) -> Vec<RetrievalQuery> {
        self.queries.lock().unwrap().clone()
    }
}

impl RetrievalAdapter for MockRetrieval {
    fn name(&self) -> &str {
        "mock"
    }

    fn query(
        &self,
        query: RetrievalQuery,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<Vec<RetrievedChunk>, RetrievalError>> {
        Box::pin(async move {
            self.queries.lock().unwrap().push(query.clone());
            if !stall(self.delay, &cancel).await {
                return Err(RetrievalError::Cancelled);
            }
            if let Some(ref e) = self.failure {
                return Err(e.clone());
            }
            Ok(self
                .chunks
                .iter()
                .filter(|c| {
                    query.document_ids.is_empty()
                        || query.document_ids.contains(&c.source_document_id)
                })
                .filter(|c| c.score >= query.score_threshold)
                .take(query.top_k)
                .cloned()
                .collect())
        })
    }
}

/// In-memory web search backend.
pub struct MockWebSearch {
    hits: Vec<SearchHit>,
    failure: Option<RetrievalError>,
    calls: AtomicU32,
}

impl MockWebSearch {
    pub fn new(hits: Vec<SearchHit>) -> Self {
        Self {
            hits,
            failure: None,
            calls: AtomicU32::new(0),
        }
    }

    pub fn failing(error: RetrievalError) -> Self {
        let mut w = Self::new(Vec::new());
        w.failure = Some(error);
        w
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl WebSearchAdapter for MockWebSearch {
    fn name(&self) -> &str {
        "mock"
    }

    fn search(
        &self,
        _query: String,
        max_results: usize,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<Vec<SearchHit>, RetrievalError>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if cancel.is_cancelled() {
                return Err(RetrievalError::Cancelled);
            }
            if let Some(ref e) = self.failure {
                return Err(e.clone());
            }
            Ok(self.hits.iter().take(max_results).cloned().collect())
        })
    }
}
