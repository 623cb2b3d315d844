//! In-process HTTP stubs standing in for the embedding, vector-store and
//! reranker backends. Used only by integration-style tests in indexer.rs,
//! watcher.rs and retriever.rs — never compiled into the shipped binary.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::extract::{Path as AxumPath, State};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde_json::{json, Value};

#[derive(Default)]
struct VectorStoreState {
    points: HashMap<String, Vec<Value>>,
}

type SharedState = Arc<Mutex<VectorStoreState>>;

/// A fake Qdrant-shaped store: collections are created on demand, points are
/// kept in memory per collection, and `points/query` applies the same
/// payload-filter vocabulary the real client sends (`match.value`/`match.any`
/// on the first prefetch clause), skipping the fusion itself since tests only
/// need deterministic membership, not ranking fidelity.
pub struct VectorStoreStub {
    pub base_url: String,
    state: SharedState,
    _handle: tokio::task::JoinHandle<()>,
}

impl VectorStoreStub {
    pub async fn spawn() -> Self {
        let state: SharedState = Arc::new(Mutex::new(VectorStoreState::default()));
        let app = Router::new()
            .route("/collections", get(list_collections))
            .route("/collections/{name}", put(ensure_collection))
            .route("/collections/{name}/index", put(ensure_index))
            .route("/collections/{name}/points", put(upsert_points))
            .route("/collections/{name}/points/delete", post(delete_points))
            .route("/collections/{name}/points/query", post(query_points))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        Self {
            base_url: format!("http://{addr}"),
            state,
            _handle: handle,
        }
    }

    pub fn point_count(&self, collection: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .points
            .get(collection)
            .map(|v| v.len())
            .unwrap_or(0)
    }
}

async fn list_collections() -> Json<Value> {
    Json(json!({ "result": { "collections": [] } }))
}

async fn ensure_collection() -> Json<Value> {
    Json(json!({ "result": true }))
}

async fn ensure_index() -> Json<Value> {
    Json(json!({ "result": true }))
}

async fn upsert_points(
    AxumPath(name): AxumPath<String>,
    State(state): State<SharedState>,
    Json(body): Json<Value>,
) -> Json<Value> {
    let incoming = body
        .get("points")
        .and_then(|p| p.as_array())
        .cloned()
        .unwrap_or_default();
    let mut guard = state.lock().unwrap();
    let entry = guard.points.entry(name).or_default();
    for point in incoming {
        let id = point.get("id").and_then(|v| v.as_str()).map(|s| s.to_string());
        if let Some(id) = &id {
            entry.retain(|p| p.get("id").and_then(|v| v.as_str()) != Some(id.as_str()));
        }
        entry.push(point);
    }
    Json(json!({ "result": true }))
}

async fn delete_points(
    AxumPath(name): AxumPath<String>,
    State(state): State<SharedState>,
    Json(body): Json<Value>,
) -> Json<Value> {
    let must = body
        .get("filter")
        .and_then(|f| f.get("must"))
        .and_then(|m| m.as_array())
        .cloned()
        .unwrap_or_default();
    let mut guard = state.lock().unwrap();
    if let Some(entry) = guard.points.get_mut(&name) {
        entry.retain(|point| !matches_all(point, &must));
    }
    Json(json!({ "result": true }))
}

async fn query_points(
    AxumPath(name): AxumPath<String>,
    State(state): State<SharedState>,
    Json(body): Json<Value>,
) -> Json<Value> {
    let limit = body.get("limit").and_then(|v| v.as_u64()).unwrap_or(10) as usize;
    let must = body
        .get("prefetch")
        .and_then(|p| p.as_array())
        .and_then(|a| a.first())
        .and_then(|p| p.get("filter"))
        .and_then(|f| f.get("must"))
        .and_then(|m| m.as_array())
        .cloned()
        .unwrap_or_default();

    let guard = state.lock().unwrap();
    let mut matched: Vec<Value> = guard
        .points
        .get(&name)
        .cloned()
        .unwrap_or_default()
        .into_iter()
        .filter(|point| matches_all(point, &must))
        .collect();
    matched.truncate(limit);

    let result_points: Vec<Value> = matched
        .into_iter()
        .map(|point| {
            json!({
                "id": point.get("id").cloned().unwrap_or(Value::Null),
                "score": 0.9,
                "payload": point.get("payload").cloned().unwrap_or(Value::Null),
            })
        })
        .collect();

    Json(json!({ "result": { "points": result_points } }))
}

fn matches_all(point: &Value, must: &[Value]) -> bool {
    must.iter().all(|clause| {
        let Some(key) = clause.get("key").and_then(|k| k.as_str()) else {
            return true;
        };
        let payload_value = point.get("payload").and_then(|p| p.get(key));
        if let Some(target) = clause.get("match").and_then(|m| m.get("value")) {
            payload_value == Some(target)
        } else if let Some(any) = clause
            .get("match")
            .and_then(|m| m.get("any"))
            .and_then(|a| a.as_array())
        {
            payload_value.map(|v| any.contains(v)).unwrap_or(false)
        } else {
            true
        }
    })
}

/// Fake TEI-shaped `/embed` endpoint: returns one fixed-length zero-ish
/// vector per input string, plus a trivially-OK `/health`.
pub struct EmbedStub {
    pub base_url: String,
    _handle: tokio::task::JoinHandle<()>,
}

impl EmbedStub {
    pub async fn spawn(dimension: usize) -> Self {
        let app = Router::new()
            .route(
                "/embed",
                post(move |Json(body): Json<Value>| async move {
                    let count = body
                        .get("inputs")
                        .and_then(|v| v.as_array())
                        .map(|a| a.len())
                        .unwrap_or(1);
                    let vectors: Vec<Vec<f32>> = (0..count).map(|_| vec![0.1f32; dimension]).collect();
                    Json(json!(vectors))
                }),
            )
            .route("/health", get(|| async { "ok" }));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        Self {
            base_url: format!("http://{addr}"),
            _handle: handle,
        }
    }
}
