//! Query embedding, hybrid search, staleness-aware snippet materialization,
//! optional reranking, and final result assembly.

use std::sync::Arc;

use globset::Glob;
use serde_json::json;
use tracing::{instrument, warn};

use crate::context::EngineContext;
use crate::error::EngineResult;
use crate::types::{compute_chunk_hash, SearchFilters, SearchMode, SearchResult};
use crate::vector_store::{Hit, SearchFilter};

const DEFAULT_TOP_K: usize = 12;
const QUALITY_CANDIDATE_LIMIT: usize = 30;
const SNIPPET_MAX_LINES: usize = 15;
const UNREADABLE_SNIPPET: &str = "(file not found or unreadable)";

pub struct Retriever {
    ctx: Arc<EngineContext>,
}

impl Retriever {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    #[instrument(skip(self, filters), fields(query = %query))]
    pub async fn search(
        &self,
        query: &str,
        top_k: Option<usize>,
        mode: SearchMode,
        instruction: Option<&str>,
        filters: &SearchFilters,
    ) -> EngineResult<Vec<SearchResult>> {
        let top_k = top_k.unwrap_or(DEFAULT_TOP_K);
        let resolved_mode = match mode {
            SearchMode::Auto if self.ctx.reranker.is_configured() => SearchMode::Quality,
            SearchMode::Auto => SearchMode::Fast,
            other => other,
        };

        let query_vector = self.ctx.embedder.embed_query(query).await?;

        let candidate_limit = if resolved_mode == SearchMode::Quality {
            QUALITY_CANDIDATE_LIMIT
        } else {
            top_k
        };

        let store_filter = SearchFilter {
            languages: filters.languages.clone(),
            chunk_kinds: filters.chunk_kinds.clone(),
        };

        let hits = self
            .ctx
            .vector_store
            .hybrid_search(
                self.ctx.preset,
                self.ctx.workspace_id,
                query_vector,
                query,
                candidate_limit,
                &store_filter,
            )
            .await?;

        let hits = apply_glob_filters(hits, filters);

        let mut materialized: Vec<(Hit, String, bool)> = Vec::with_capacity(hits.len());
        for hit in hits {
            let (snippet, stale) = self.materialize_snippet(&hit);
            materialized.push((hit, snippet, stale));
        }

        let mut signals: Vec<serde_json::Map<String, serde_json::Value>> =
            materialized.iter().map(|_| serde_json::Map::new()).collect();

        let ordered: Vec<usize> = if resolved_mode == SearchMode::Quality {
            let documents: Vec<String> = materialized.iter().map(|(_, s, _)| s.clone()).collect();
            let mut ranked = self.ctx.reranker.rerank(query, &documents, instruction).await;
            for (original_index, score) in &ranked {
                if let Some(map) = signals.get_mut(*original_index) {
                    map.insert("rerank_score".to_string(), json!(score));
                }
            }
            ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
            ranked.into_iter().map(|(idx, _)| idx).collect()
        } else {
            (0..materialized.len()).collect()
        };

        let mut results = Vec::with_capacity(top_k.min(ordered.len()));
        for index in ordered.into_iter().take(top_k) {
            let (hit, snippet, stale) = &materialized[index];
            results.push(SearchResult {
                repo_id: self.ctx.repo_id.clone(),
                workspace_id: self.ctx.workspace_id,
                path: hit.file_path.clone(),
                start_line: hit.start_line,
                end_line: hit.end_line,
                snippet: snippet.clone(),
                score: hit.score,
                stale: *stale,
                source: format!("{}#L{}-L{}", hit.file_path, hit.start_line, hit.end_line),
                signals: signals[index].clone(),
            });
        }

        Ok(results)
    }

    /// Reads the candidate's current on-disk content, slices the recorded
    /// line range, truncates for display, and flags `stale` when the
    /// recomputed chunk hash no longer matches the catalog's.
    fn materialize_snippet(&self, hit: &Hit) -> (String, bool) {
        let absolute = self.ctx.absolute(&hit.file_path);
        let bytes = match std::fs::read(&absolute) {
            Ok(b) => b,
            Err(_) => return (UNREADABLE_SNIPPET.to_string(), true),
        };
        let content = match std::str::from_utf8(&bytes) {
            Ok(s) => s,
            Err(_) => return (UNREADABLE_SNIPPET.to_string(), true),
        };

        let lines: Vec<&str> = content.lines().collect();
        let total = lines.len() as u32;
        if total == 0 {
            return (UNREADABLE_SNIPPET.to_string(), true);
        }
        let start = hit.start_line.max(1).min(total);
        let end = hit.end_line.max(start).min(total);
        let slice = lines[(start - 1) as usize..end as usize].join("\n");

        let recomputed = compute_chunk_hash(&slice);
        let stale = recomputed != hit.chunk_hash;

        let display_lines: Vec<&str> = slice.lines().collect();
        let snippet = if display_lines.len() > SNIPPET_MAX_LINES {
            let mut truncated = display_lines[..SNIPPET_MAX_LINES].join("\n");
            truncated.push_str("\n...");
            truncated
        } else {
            slice
        };

        (snippet, stale)
    }
}

fn apply_glob_filters(hits: Vec<Hit>, filters: &SearchFilters) -> Vec<Hit> {
    if filters.include_globs.is_empty() && filters.exclude_globs.is_empty() {
        return hits;
    }

    let includes: Vec<Glob> = filters
        .include_globs
        .iter()
        .filter_map(|p| Glob::new(p).map_err(|e| warn!(pattern = %p, error = %e, "bad include glob")).ok())
        .collect();
    let excludes: Vec<Glob> = filters
        .exclude_globs
        .iter()
        .filter_map(|p| Glob::new(p).map_err(|e| warn!(pattern = %p, error = %e, "bad exclude glob")).ok())
        .collect();

    hits.into_iter()
        .filter(|hit| {
            let included = includes.is_empty()
                || includes.iter().any(|g| g.compile_matcher().is_match(&hit.file_path));
            let excluded = excludes.iter().any(|g| g.compile_matcher().is_match(&hit.file_path));
            included && !excluded
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChunkKind;
    use uuid::Uuid;

    fn sample_hit(path: &str) -> Hit {
        Hit {
            point_id: Uuid::nil(),
            score: 0.5,
            file_path: path.to_string(),
            start_line: 1,
            end_line: 3,
            chunk_hash: "abc".to_string(),
            language: Some("python".to_string()),
            chunk_kind: ChunkKind::Code,
            symbol: None,
        }
    }

    #[test]
    fn include_glob_keeps_matching_paths_only() {
        let filters = SearchFilters {
            include_globs: vec!["*.py".to_string()],
            ..Default::default()
        };
        let hits = vec![sample_hit("main.py"), sample_hit("main.rs")];
        let filtered = apply_glob_filters(hits, &filters);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].file_path, "main.py");
    }

    #[test]
    fn exclude_glob_drops_matching_paths() {
        let filters = SearchFilters {
            exclude_globs: vec!["*.rs".to_string()],
            ..Default::default()
        };
        let hits = vec![sample_hit("main.py"), sample_hit("main.rs")];
        let filtered = apply_glob_filters(hits, &filters);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].file_path, "main.py");
    }

    #[test]
    fn no_globs_is_a_no_op() {
        let filters = SearchFilters::default();
        let hits = vec![sample_hit("main.py")];
        assert_eq!(apply_glob_filters(hits, &filters).len(), 1);
    }

    #[tokio::test]
    async fn search_round_trips_through_index_to_query() {
        use crate::config::EngineConfig;
        use crate::context::EngineContext;
        use crate::indexer::Indexer;
        use crate::types::{Preset, WorkspaceConfig};

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("greet.py"),
            "def greet(name):\n    return f\"hello {name}\"\n",
        )
        .unwrap();

        let vector_store = crate::test_support::VectorStoreStub::spawn().await;
        let embedder = crate::test_support::EmbedStub::spawn(Preset::Lite.dimension()).await;
        let workspace = WorkspaceConfig {
            workspace_id: Uuid::new_v4(),
            repo_id: "test-repo".to_string(),
            preset: Preset::Lite,
            created_at: chrono::Utc::now(),
        };
        let config = EngineConfig {
            qdrant_url: vector_store.base_url.clone(),
            tei_url: embedder.base_url.clone(),
            reranker_url: None,
            preset: Preset::Lite,
        };
        let ctx = EngineContext::open(dir.path().to_path_buf(), workspace, &config).unwrap();

        Indexer::new(ctx.clone()).index_file("greet.py").await.unwrap();

        let retriever = Retriever::new(ctx);
        let results = retriever
            .search("greet", None, SearchMode::Fast, None, &SearchFilters::default())
            .await
            .unwrap();

        assert!(!results.is_empty());
        assert_eq!(results[0].path, "greet.py");
        assert!(results[0].snippet.contains("greet"));
    }
}
