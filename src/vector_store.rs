//! Thin HTTP client over the external vector store's wire protocol.
//!
//! The store itself (collection creation, named dense/sparse vectors,
//! payload filters, reciprocal-rank-fusion queries) is an out-of-process
//! collaborator (§1); this module only knows the JSON shapes it speaks.
//! Field names mirror the vector store's REST schema directly rather than
//! going through a dedicated SDK crate, keeping the dependency surface to
//! `reqwest` + `serde_json`.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::types::{ChunkKind, Preset};

const PREFETCH_LIMIT: usize = 50;
const BM25_AVG_LEN: f32 = 150.0;

pub struct VectorStoreClient {
    base_url: String,
    http: reqwest::Client,
}

#[derive(Debug, Clone)]
pub struct ChunkPayload<'a> {
    pub repo_id: &'a str,
    pub workspace_id: Uuid,
    pub file_path: &'a str,
    pub file_hash: &'a str,
    pub chunk_hash: &'a str,
    pub start_line: u32,
    pub end_line: u32,
    pub language: Option<&'a str>,
    pub chunk_kind: ChunkKind,
    pub symbol: Option<&'a str>,
    pub content: &'a str,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchFilter {
    pub languages: Vec<String>,
    pub chunk_kinds: Vec<ChunkKind>,
}

#[derive(Debug, Clone)]
pub struct Hit {
    pub point_id: Uuid,
    pub score: f32,
    pub file_path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub chunk_hash: String,
    pub language: Option<String>,
    pub chunk_kind: ChunkKind,
    pub symbol: Option<String>,
}

impl VectorStoreClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            http: reqwest::Client::new(),
        }
    }

    fn collection_url(&self, preset: Preset, suffix: &str) -> String {
        format!(
            "{}/collections/{}{}",
            self.base_url.trim_end_matches('/'),
            preset.collection_name(),
            suffix
        )
    }

    /// Idempotent create of the preset's collection: one COSINE dense vector
    /// named `dense`, one IDF-modified sparse vector named `sparse_bm25`,
    /// keyword payload indexes on repo_id/workspace_id/file_path/language/
    /// chunk_kind.
    pub async fn ensure_collection(&self, preset: Preset) -> EngineResult<()> {
        let body = json!({
            "vectors": { "dense": { "size": preset.dimension(), "distance": "Cosine" } },
            "sparse_vectors": { "sparse_bm25": { "modifier": "idf" } },
        });
        self.put(&self.collection_url(preset, ""), &body).await?;

        for field in ["repo_id", "workspace_id", "file_path", "language", "chunk_kind"] {
            let index_body = json!({ "field_name": field, "field_schema": "keyword" });
            self.put(&self.collection_url(preset, "/index"), &index_body)
                .await?;
        }
        Ok(())
    }

    pub async fn upsert_chunk(
        &self,
        preset: Preset,
        point_id: Uuid,
        payload: ChunkPayload<'_>,
        dense_vector: Vec<f32>,
    ) -> EngineResult<()> {
        let body = json!({
            "points": [{
                "id": point_id.to_string(),
                "vector": {
                    "dense": dense_vector,
                    "sparse_bm25": {
                        "text": payload.content,
                        "model": "bm25",
                        "options": { "language": "none", "avg_len": BM25_AVG_LEN },
                    },
                },
                "payload": {
                    "repo_id": payload.repo_id,
                    "workspace_id": payload.workspace_id.to_string(),
                    "file_path": payload.file_path,
                    "file_hash": payload.file_hash,
                    "chunk_hash": payload.chunk_hash,
                    "start_line": payload.start_line,
                    "end_line": payload.end_line,
                    "language": payload.language,
                    "chunk_kind": kind_str(payload.chunk_kind),
                    "symbol": payload.symbol,
                    "indexed_at": chrono::Utc::now().to_rfc3339(),
                },
            }],
        });
        self.put(&self.collection_url(preset, "/points"), &body)
            .await?;
        Ok(())
    }

    pub async fn delete_by_file(
        &self,
        preset: Preset,
        workspace_id: Uuid,
        file_path: &str,
    ) -> EngineResult<()> {
        let body = json!({
            "filter": {
                "must": [
                    { "key": "workspace_id", "match": { "value": workspace_id.to_string() } },
                    { "key": "file_path", "match": { "value": file_path } },
                ],
            },
        });
        self.post(&self.collection_url(preset, "/points/delete"), &body)
            .await?;
        Ok(())
    }

    pub async fn delete_workspace(&self, preset: Preset, workspace_id: Uuid) -> EngineResult<()> {
        let body = json!({
            "filter": {
                "must": [
                    { "key": "workspace_id", "match": { "value": workspace_id.to_string() } },
                ],
            },
        });
        self.post(&self.collection_url(preset, "/points/delete"), &body)
            .await?;
        Ok(())
    }

    /// Two prefetches (dense; sparse), each limit 50, fused via RRF. Glob
    /// filters are applied by the caller post-hoc (they're not part of the
    /// store's filter vocabulary).
    pub async fn hybrid_search(
        &self,
        preset: Preset,
        workspace_id: Uuid,
        dense_vector: Vec<f32>,
        query_text: &str,
        limit: usize,
        filter: &SearchFilter,
    ) -> EngineResult<Vec<Hit>> {
        let mut must = vec![json!({
            "key": "workspace_id",
            "match": { "value": workspace_id.to_string() },
        })];
        if !filter.languages.is_empty() {
            must.push(json!({ "key": "language", "match": { "any": filter.languages } }));
        }
        if !filter.chunk_kinds.is_empty() {
            let kinds: Vec<&str> = filter.chunk_kinds.iter().map(|k| kind_str(*k)).collect();
            must.push(json!({ "key": "chunk_kind", "match": { "any": kinds } }));
        }
        let store_filter = json!({ "must": must });

        let body = json!({
            "prefetch": [
                {
                    "query": dense_vector,
                    "using": "dense",
                    "filter": store_filter,
                    "limit": PREFETCH_LIMIT,
                },
                {
                    "query": { "text": query_text },
                    "using": "sparse_bm25",
                    "filter": store_filter,
                    "limit": PREFETCH_LIMIT,
                },
            ],
            "query": { "fusion": "rrf" },
            "limit": limit,
            "with_payload": true,
        });

        let response = self
            .post_json(&self.collection_url(preset, "/points/query"), &body)
            .await?;
        parse_hits(&response)
    }

    pub async fn health_check(&self) -> bool {
        self.http
            .get(format!("{}/collections", self.base_url.trim_end_matches('/')))
            .timeout(crate::config::timeouts::HEALTH_PROBE)
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    async fn put(&self, url: &str, body: &Value) -> EngineResult<()> {
        self.request(reqwest::Method::PUT, url, body).await.map(|_| ())
    }

    async fn post(&self, url: &str, body: &Value) -> EngineResult<()> {
        self.request(reqwest::Method::POST, url, body).await.map(|_| ())
    }

    async fn post_json(&self, url: &str, body: &Value) -> EngineResult<Value> {
        self.request(reqwest::Method::POST, url, body).await
    }

    async fn request(
        &self,
        method: reqwest::Method,
        url: &str,
        body: &Value,
    ) -> EngineResult<Value> {
        let response = self
            .http
            .request(method, url)
            .json(body)
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| EngineError::Backend {
                service: "vector-store",
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(EngineError::Backend {
                service: "vector-store",
                message: format!("status {}", response.status()),
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| EngineError::Backend {
                service: "vector-store",
                message: e.to_string(),
            })
    }
}

fn kind_str(kind: ChunkKind) -> &'static str {
    match kind {
        ChunkKind::Code => "code",
        ChunkKind::Doc => "doc",
        ChunkKind::Config => "config",
    }
}

fn parse_hits(response: &Value) -> EngineResult<Vec<Hit>> {
    let points = response
        .get("result")
        .and_then(|r| r.get("points"))
        .and_then(|p| p.as_array())
        .ok_or_else(|| EngineError::Backend {
            service: "vector-store",
            message: "malformed query response".to_string(),
        })?;

    let mut hits = Vec::with_capacity(points.len());
    for point in points {
        let id = point
            .get("id")
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok())
            .ok_or_else(|| EngineError::Backend {
                service: "vector-store",
                message: "missing point id".to_string(),
            })?;
        let score = point.get("score").and_then(|v| v.as_f64()).unwrap_or(0.0) as f32;
        let payload = point.get("payload").cloned().unwrap_or(Value::Null);
        let file_path = payload
            .get("file_path")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let start_line = payload.get("start_line").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
        let end_line = payload.get("end_line").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
        let chunk_hash = payload
            .get("chunk_hash")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let language = payload
            .get("language")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());
        let chunk_kind = match payload.get("chunk_kind").and_then(|v| v.as_str()) {
            Some("doc") => ChunkKind::Doc,
            Some("config") => ChunkKind::Config,
            _ => ChunkKind::Code,
        };
        let symbol = payload
            .get("symbol")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        hits.push(Hit {
            point_id: id,
            score,
            file_path,
            start_line,
            end_line,
            chunk_hash,
            language,
            chunk_kind,
            symbol,
        });
    }
    Ok(hits)
}
