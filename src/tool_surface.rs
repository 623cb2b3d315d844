//! The three agent-facing operations, exposed as a plain trait plus a
//! concrete implementation over the engine's own types. Framing these as a
//! stdio JSON-line server is left to whatever binary embeds this crate.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::context::EngineContext;
use crate::error::{EngineError, EngineResult};
use crate::retriever::Retriever;
use crate::types::{compute_file_hash, SearchFilters, SearchMode, SearchResult};
use crate::watcher::WatcherState;

#[derive(Debug, Clone, Deserialize)]
pub struct SearchArgs {
    pub query: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub mode: SearchMode,
    pub instruction: Option<String>,
    #[serde(default)]
    pub filters: SearchFilters,
}

fn default_top_k() -> usize {
    12
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenFileArgs {
    pub path: String,
    pub start_line: u32,
    pub end_line: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct OpenFileResult {
    pub content: String,
    pub file_hash: String,
    pub mtime: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexStatus {
    pub watcher_running: bool,
    pub last_scan_time: Option<String>,
    pub files_indexed: u64,
    pub chunks_indexed: u64,
    pub index_generation: u64,
    pub backend_reachable: bool,
    pub last_error: Option<String>,
    pub current_preset: String,
    pub dense_available: bool,
    pub bm25_available: bool,
    pub reranker_available: bool,
    pub indexing_in_progress: bool,
    pub progress: Option<String>,
}

/// Three operations consuming named arguments and producing a textual
/// (JSON-serializable) payload.
pub trait ToolSurface {
    async fn search(&self, args: SearchArgs) -> EngineResult<Vec<SearchResult>>;
    async fn open_file(&self, args: OpenFileArgs) -> EngineResult<OpenFileResult>;
    async fn index_status(&self) -> EngineResult<IndexStatus>;
}

pub struct Engine {
    ctx: Arc<EngineContext>,
    retriever: Retriever,
    watcher_state: Option<Arc<WatcherState>>,
}

impl Engine {
    pub fn new(ctx: Arc<EngineContext>, watcher_state: Option<Arc<WatcherState>>) -> Self {
        Self {
            retriever: Retriever::new(ctx.clone()),
            ctx,
            watcher_state,
        }
    }

    /// Resolves `relative_path` against `project_root`, canonicalizing both
    /// sides and rejecting anything whose canonical form escapes the root
    /// (symlinks included). `dunce::canonicalize` avoids Windows' UNC-prefixed
    /// paths breaking the `starts_with` prefix check.
    fn resolve_sandboxed(&self, relative_path: &str) -> EngineResult<PathBuf> {
        let root = dunce::canonicalize(&self.ctx.project_root)
            .map_err(|e| EngineError::Internal(anyhow::anyhow!(e)))?;
        let candidate = self.ctx.absolute(relative_path);
        let canonical = dunce::canonicalize(&candidate)
            .map_err(|_| EngineError::FileNotFound(relative_path.to_string()))?;
        if !canonical.starts_with(&root) {
            return Err(EngineError::PathNotAllowed(relative_path.to_string()));
        }
        Ok(canonical)
    }
}

impl ToolSurface for Engine {
    #[instrument(skip(self, args), fields(query = %args.query))]
    async fn search(&self, args: SearchArgs) -> EngineResult<Vec<SearchResult>> {
        self.retriever
            .search(
                &args.query,
                Some(args.top_k),
                args.mode,
                args.instruction.as_deref(),
                &args.filters,
            )
            .await
    }

    #[instrument(skip(self, args), fields(path = %args.path))]
    async fn open_file(&self, args: OpenFileArgs) -> EngineResult<OpenFileResult> {
        let absolute = self.resolve_sandboxed(&args.path)?;
        let metadata = std::fs::metadata(&absolute)?;
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);

        let bytes = std::fs::read(&absolute)?;
        let file_hash = compute_file_hash(&bytes);
        let text = std::str::from_utf8(&bytes)
            .map_err(|_| EngineError::NotUtf8(args.path.clone()))?;

        let lines: Vec<&str> = text.lines().collect();
        let total = lines.len() as u32;
        let start = args.start_line.max(1).min(total.max(1));
        let end = args.end_line.max(start).min(total.max(1));

        let content = lines[(start - 1) as usize..end as usize]
            .iter()
            .enumerate()
            .map(|(i, line)| format!("{}: {}", start as usize + i, line))
            .collect::<Vec<_>>()
            .join("\n");

        Ok(OpenFileResult {
            content,
            file_hash,
            mtime,
        })
    }

    #[instrument(skip(self))]
    async fn index_status(&self) -> EngineResult<IndexStatus> {
        let (files_indexed, chunks_indexed) = self.ctx.catalog.get_stats()?;
        let (watcher_running, last_scan_secs, index_generation) = self
            .watcher_state
            .as_ref()
            .map(|s| s.snapshot())
            .unwrap_or((false, 0, 0));

        let last_scan_time = if last_scan_secs == 0 {
            None
        } else {
            chrono::DateTime::from_timestamp(last_scan_secs as i64, 0).map(|t| t.to_rfc3339())
        };

        let (dense_available, bm25_available) = {
            let reachable = self.ctx.vector_store.health_check().await;
            (reachable, reachable)
        };
        let embed_reachable = self.ctx.embedder.health_check().await;
        let reranker_available = if self.ctx.reranker.is_configured() {
            self.ctx.reranker.health_check().await
        } else {
            false
        };
        let backend_reachable = dense_available && embed_reachable;

        Ok(IndexStatus {
            watcher_running,
            last_scan_time,
            files_indexed,
            chunks_indexed,
            index_generation,
            backend_reachable,
            last_error: None,
            current_preset: self.ctx.preset.as_str().to_string(),
            dense_available,
            bm25_available,
            reranker_available,
            indexing_in_progress: false,
            progress: None,
        })
    }
}

pub fn error_payload(err: &EngineError) -> serde_json::Value {
    err.as_payload()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::types::{Preset, WorkspaceConfig};
    use uuid::Uuid;

    fn test_engine(root: &Path) -> Engine {
        let workspace = WorkspaceConfig {
            workspace_id: Uuid::new_v4(),
            repo_id: "test-repo".to_string(),
            preset: Preset::Lite,
            created_at: chrono::Utc::now(),
        };
        let config = EngineConfig {
            qdrant_url: "http://127.0.0.1:0".to_string(),
            tei_url: "http://127.0.0.1:0".to_string(),
            reranker_url: None,
            preset: Preset::Lite,
        };
        let ctx = EngineContext::open(root.to_path_buf(), workspace, &config).unwrap();
        Engine::new(ctx, None)
    }

    #[tokio::test]
    async fn open_file_rejects_path_escaping_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.py"), "a\nb\nc").unwrap();
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("secret.txt"), "shh").unwrap();

        let engine = test_engine(dir.path());
        let escaping_relative = format!("../{}/secret.txt", outside.path().file_name().unwrap().to_string_lossy());
        let result = engine
            .open_file(OpenFileArgs {
                path: escaping_relative,
                start_line: 1,
                end_line: 1,
            })
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn open_file_returns_numbered_lines() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.py"), "a\nb\nc").unwrap();
        let engine = test_engine(dir.path());
        let result = engine
            .open_file(OpenFileArgs {
                path: "main.py".to_string(),
                start_line: 1,
                end_line: 2,
            })
            .await
            .unwrap();
        assert_eq!(result.content, "1: a\n2: b");
    }
}
