//! HTTP clients for the embedding and reranker services (§6).

use serde::Deserialize;
use serde_json::json;

use crate::config::timeouts;
use crate::error::{EngineError, EngineResult};

/// Prepended to every query before embedding, steering the embedding model
/// toward code-search-relevant vectors. Kept byte-for-byte identical to the
/// reference deployment so cached/ precomputed vectors stay comparable.
pub const QUERY_INSTRUCTION: &str =
    "Instruct: Given a code search query, retrieve relevant code snippets\nQuery: ";

pub struct EmbedClient {
    base_url: String,
    http: reqwest::Client,
}

impl EmbedClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            http: reqwest::Client::new(),
        }
    }

    /// Batch-embeds `texts` in one request. 30s timeout for indexing-sized
    /// batches.
    pub async fn embed_texts(&self, texts: &[String]) -> EngineResult<Vec<Vec<f32>>> {
        let body = json!({ "inputs": texts });
        let response = self
            .http
            .post(format!("{}/embed", self.base_url.trim_end_matches('/')))
            .json(&body)
            .timeout(timeouts::EMBED_BATCH)
            .send()
            .await
            .map_err(|e| EngineError::Backend {
                service: "embedding",
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(EngineError::Backend {
                service: "embedding",
                message: format!("status {}", response.status()),
            });
        }

        response
            .json::<Vec<Vec<f32>>>()
            .await
            .map_err(|e| EngineError::Backend {
                service: "embedding",
                message: e.to_string(),
            })
    }

    /// Single query embedding with the instruction prefix prepended. 10s
    /// timeout.
    pub async fn embed_query(&self, query: &str) -> EngineResult<Vec<f32>> {
        let formatted = format!("{QUERY_INSTRUCTION}{query}");
        let body = json!({ "inputs": [formatted], "truncate": true });
        let response = self
            .http
            .post(format!("{}/embed", self.base_url.trim_end_matches('/')))
            .json(&body)
            .timeout(timeouts::EMBED_QUERY)
            .send()
            .await
            .map_err(|e| EngineError::Backend {
                service: "embedding",
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(EngineError::Backend {
                service: "embedding",
                message: format!("status {}", response.status()),
            });
        }

        let mut vectors = response
            .json::<Vec<Vec<f32>>>()
            .await
            .map_err(|e| EngineError::Backend {
                service: "embedding",
                message: e.to_string(),
            })?;

        vectors.pop().ok_or_else(|| EngineError::Backend {
            service: "embedding",
            message: "empty embedding response".to_string(),
        })
    }

    pub async fn health_check(&self) -> bool {
        self.http
            .get(format!("{}/health", self.base_url.trim_end_matches('/')))
            .timeout(timeouts::HEALTH_PROBE)
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}

#[derive(Debug, Deserialize)]
struct RerankHit {
    index: usize,
    score: f32,
}

pub struct RerankClient {
    base_url: Option<String>,
    http: reqwest::Client,
}

impl RerankClient {
    pub fn new(base_url: Option<String>) -> Self {
        Self {
            base_url,
            http: reqwest::Client::new(),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.base_url.is_some()
    }

    /// Returns `(original_index, score)` pairs. Absent reranker URL, or any
    /// failure/timeout talking to a configured one, falls back to an
    /// identity ranking with a decaying score (`1.0 - 0.01 * i`) — callers
    /// should treat the fallback as "keep fusion order", not an error.
    pub async fn rerank(
        &self,
        query: &str,
        documents: &[String],
        instruction: Option<&str>,
    ) -> Vec<(usize, f32)> {
        let identity = || {
            documents
                .iter()
                .enumerate()
                .map(|(i, _)| (i, 1.0 - i as f32 * 0.01))
                .collect::<Vec<_>>()
        };

        let Some(base_url) = &self.base_url else {
            return identity();
        };

        let mut body = json!({ "query": query, "documents": documents });
        if let Some(instruction) = instruction {
            body["instruction"] = json!(instruction);
        }

        let response = self
            .http
            .post(format!("{}/rerank", base_url.trim_end_matches('/')))
            .json(&body)
            .timeout(timeouts::RERANK)
            .send()
            .await;

        let Ok(response) = response else {
            return identity();
        };
        if !response.status().is_success() {
            return identity();
        }
        match response.json::<Vec<RerankHit>>().await {
            Ok(hits) => hits.into_iter().map(|h| (h.index, h.score)).collect(),
            Err(_) => identity(),
        }
    }

    pub async fn health_check(&self) -> bool {
        let Some(base_url) = &self.base_url else {
            return false;
        };
        self.http
            .get(format!("{}/health", base_url.trim_end_matches('/')))
            .timeout(timeouts::HEALTH_PROBE)
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn identity_fallback_decays_by_rank() {
        let client = RerankClient::new(None);
        let docs = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let ranked = client.rerank("query", &docs, None).await;
        assert_eq!(ranked, vec![(0, 1.0), (1, 0.99), (2, 0.98)]);
    }
}
