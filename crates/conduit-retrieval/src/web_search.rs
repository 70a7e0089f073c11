use futures::future::BoxFuture;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use conduit_core::config::WebSearchConfig;
use conduit_core::error::RetrievalError;
use conduit_core::traits::WebSearchAdapter;
use conduit_core::types::SearchHit;

const TAVILY_API_URL: &str = "https://api.tavily.com/search";

pub struct TavilySearch {
    api_key: String,
    url: String,
    http: reqwest::Client,
}

impl TavilySearch {
    pub fn new(config: &WebSearchConfig) -> Self {
        Self {
            api_key: config.api_key.clone(),
            url: config
                .base_url
                .clone()
                .unwrap_or_else(|| TAVILY_API_URL.to_string()),
            http: reqwest::Client::new(),
        }
    }
}

fn parse_hits(body: &serde_json::Value) -> Vec<SearchHit> {
    body["results"]
        .as_array()
        .map(|arr| {
            arr.iter()
                .map(|r| SearchHit {
                    title: r["title"].as_str().unwrap_or("").to_string(),
                    url: r["url"].as_str().unwrap_or("").to_string(),
                    snippet: r["content"].as_str().unwrap_or("").to_string(),
                    score: r["score"].as_f64().unwrap_or(0.0),
                })
                .collect()
        })
        .unwrap_or_default()
}

impl WebSearchAdapter for TavilySearch {
    fn name(&self) -> &str {
        "tavily"
    }

    fn search(
        &self,
        query: String,
        max_results: usize,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<Vec<SearchHit>, RetrievalError>> {
        Box::pin(async move {
            let send = self
                .http
                .post(&self.url)
                .json(&json!({
                    "api_key": self.api_key,
                    "query": query,
                    "max_results": max_results,
                }))
                .send();

            let resp = tokio::select! {
                r = send => r.map_err(|e| RetrievalError::Request(e.to_string()))?,
                _ = cancel.cancelled() => return Err(RetrievalError::Cancelled),
            };

            if !resp.status().is_success() {
                let status = resp.status().as_u16();
                let message = resp.text().await.unwrap_or_default();
                return Err(RetrievalError::Status { status, message });
            }

            let body: serde_json::Value = resp
                .json()
                .await
                .map_err(|e| RetrievalError::Parse(e.to_string()))?;

            Ok(parse_hits(&body))
        })
    }
}
