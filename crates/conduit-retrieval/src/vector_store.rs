use std::time::Duration;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use conduit_core::config::RetrievalConfig;
use conduit_core::error::RetrievalError;
use conduit_core::traits::RetrievalAdapter;
use conduit_core::types::{RetrievalQuery, RetrievedChunk};

/// HTTP client for a vector-store query service.
///
/// Sends `POST {base_url}/collections/{collection}/query` and expects a ranked
/// list of matches. Chunking and embedding happen on the service side.
pub struct HttpRetrieval {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    collection: String,
}

impl HttpRetrieval {
    pub fn new(config: &RetrievalConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            collection: config.collection.clone(),
        }
    }

    fn url(&self) -> String {
        format!("{}/collections/{}/query", self.base_url, self.collection)
    }
}

#[derive(Serialize)]
struct QueryRequest<'a> {
    query: &'a str,
    top_k: usize,
    score_threshold: f64,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    document_ids: &'a [String],
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<Match>,
}

#[derive(Deserialize)]
struct Match {
    #[serde(alias = "text", alias = "content")]
    chunk_text: String,
    #[serde(alias = "document_id")]
    source_document_id: String,
    score: f64,
}

fn parse_matches(body: &str) -> Result<Vec<RetrievedChunk>, RetrievalError> {
    let parsed: QueryResponse =
        serde_json::from_str(body).map_err(|e| RetrievalError::Parse(e.to_string()))?;
    Ok(parsed
        .matches
        .into_iter()
        .map(|m| RetrievedChunk {
            chunk_text: m.chunk_text,
            source_document_id: m.source_document_id,
            score: m.score,
        })
        .collect())
}

impl RetrievalAdapter for HttpRetrieval {
    fn name(&self) -> &str {
        "http"
    }

    fn query(
        &self,
        query: RetrievalQuery,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<Vec<RetrievedChunk>, RetrievalError>> {
        Box::pin(async move {
            let body = QueryRequest {
                query: &query.text,
                top_k: query.top_k,
                score_threshold: query.score_threshold,
                document_ids: &query.document_ids,
            };
            let mut req = self.http.post(self.url()).json(&body);
            if let Some(ref key) = self.api_key {
                req = req.bearer_auth(key);
            }

            let resp = tokio::select! {
                r = req.send() => r.map_err(|e| RetrievalError::Request(e.to_string()))?,
                _ = cancel.cancelled() => return Err(RetrievalError::Cancelled),
            };

            let status = resp.status();
            let text = resp
                .text()
                .await
                .map_err(|e| RetrievalError::Request(e.to_string()))?;
            if !status.is_success() {
                return Err(RetrievalError::Status {
                    status: status.as_u16(),
                    message: text,
                });
            }

            let chunks = parse_matches(&text)?;
            debug!(collection = %self.collection, matches = chunks.len(), "Vector store query complete");
            Ok(chunks)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url() {
        let r = HttpRetrieval::new(&RetrievalConfig {
            base_url: "http://localhost:8100/".into(),
            api_key: None,
            collection: "handbook".into(),
            timeout_secs: 5,
        });
        assert_eq!(r.url(), "http://localhost:8100/collections/handbook/query");
    }

    #[test]
    fn test_parse_matches_with_aliases() {
        let body = r#"{"matches": [
            {"text": "Refunds within 30 days", "document_id": "policy", "score": 0.92},
            {"chunk_text": "Opened items excluded", "source_document_id": "faq", "score": 0.71}
        ]}"#;
        let chunks = parse_matches(body).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].source_document_id, "policy");
        assert_eq!(chunks[1].chunk_text, "Opened items excluded");
    }

    #[test]
    fn test_parse_matches_empty_and_invalid() {
        assert!(parse_matches("{}").unwrap().is_empty());
        assert!(matches!(parse_matches("not json"), Err(RetrievalError::Parse(_))));
    }
}
