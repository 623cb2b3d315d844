//! Single-file indexing and whole-tree scanning. Composes the chunker,
//! embedding client, catalog and vector-store client into the wholesale
//! replace-by-delete-then-insert operation described for the catalog/vector
//! store's cyclic relationship.

use std::path::Path;
use std::sync::Arc;

use ignore::WalkBuilder;
use rayon::prelude::*;
use tracing::{debug, instrument, warn};

use crate::chunker::chunk_file;
use crate::context::EngineContext;
use crate::error::EngineResult;
use crate::types::{compute_chunk_hash, compute_file_hash, compute_point_id, IndexedChunk};
use crate::vector_store::ChunkPayload;

/// Directories and filenames never walked or indexed, regardless of
/// `.gitignore` contents — this is the *floor*, layered under whatever
/// `ignore::WalkBuilder`'s standard gitignore handling already excludes.
const IGNORED_DIR_NAMES: &[&str] = &[
    ".git",
    ".probe",
    "node_modules",
    "venv",
    ".venv",
    "__pycache__",
    "target",
    "dist",
    "build",
    ".next",
];

const BINARY_SUFFIXES: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "bmp", "ico", "webp", "svg", "pdf", "zip", "tar", "gz", "7z",
    "rar", "exe", "dll", "so", "dylib", "bin", "wasm", "woff", "woff2", "ttf", "otf", "mp3",
    "mp4", "mov", "avi", "lock",
];

pub fn is_ignored_dir(name: &str) -> bool {
    IGNORED_DIR_NAMES.contains(&name) || (name.starts_with('.') && name != ".")
}

pub fn has_binary_suffix(path: &str) -> bool {
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|ext| BINARY_SUFFIXES.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

pub struct Indexer {
    ctx: Arc<EngineContext>,
}

impl Indexer {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    /// Indexes one file, repo-relative `file_path`. Returns the number of
    /// chunks written (0 for every skip path: unchanged, undecodable, or
    /// chunker yielded nothing).
    #[instrument(skip(self), fields(file_path = %file_path))]
    pub async fn index_file(&self, file_path: &str) -> EngineResult<usize> {
        let absolute = self.ctx.absolute(file_path);

        let metadata = match std::fs::metadata(&absolute) {
            Ok(m) => m,
            Err(_) => return Ok(0),
        };
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        let size = metadata.len();

        if let Some(existing) = self.ctx.catalog.get_file(file_path)? {
            if existing.mtime == mtime && existing.size == size {
                debug!("unchanged, fast-skip");
                return Ok(0);
            }
        }

        let bytes = std::fs::read(&absolute)?;
        let file_hash = compute_file_hash(&bytes);

        // Erase phase: both stores, strictly before any new insert. Deletes
        // the FileRecord itself (not just its chunks) so a crash between
        // here and the final upsert leaves nothing for the next scan's
        // (mtime, size) comparison to fast-skip against.
        self.ctx
            .vector_store
            .delete_by_file(self.ctx.preset, self.ctx.workspace_id, file_path)
            .await?;
        self.ctx.catalog.delete_file_chunks(file_path)?;
        self.ctx.catalog.delete_file(file_path)?;

        let content = match std::str::from_utf8(&bytes) {
            Ok(s) => s,
            Err(_) => {
                debug!("not valid utf-8, skipping");
                return Ok(0);
            }
        };

        let chunks = chunk_file(content, file_path);
        if chunks.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = self.ctx.embedder.embed_texts(&texts).await?;

        let mut indexed = Vec::with_capacity(chunks.len());
        for (idx, (chunk, vector)) in chunks.into_iter().zip(vectors.into_iter()).enumerate() {
            let point_id = compute_point_id(
                self.ctx.workspace_id,
                file_path,
                chunk.start_line,
                chunk.end_line,
            );
            let chunk_hash = compute_chunk_hash(&chunk.content);

            self.ctx
                .vector_store
                .upsert_chunk(
                    self.ctx.preset,
                    point_id,
                    ChunkPayload {
                        repo_id: &self.ctx.repo_id,
                        workspace_id: self.ctx.workspace_id,
                        file_path,
                        file_hash: &file_hash,
                        chunk_hash: &chunk_hash,
                        start_line: chunk.start_line,
                        end_line: chunk.end_line,
                        language: chunk.language.as_deref(),
                        chunk_kind: chunk.kind,
                        symbol: chunk.symbol.as_deref(),
                        content: &chunk.content,
                    },
                    vector,
                )
                .await?;

            indexed.push(IndexedChunk {
                file_path: file_path.to_string(),
                start_line: chunk.start_line,
                end_line: chunk.end_line,
                chunk_hash,
                point_id,
                chunk_idx: idx as u32,
                language: chunk.language,
                kind: chunk.kind,
                symbol: chunk.symbol,
            });
        }

        self.ctx
            .catalog
            .upsert_file(file_path, mtime, size, &file_hash, None)?;
        self.ctx.catalog.upsert_chunks(&indexed)?;

        Ok(indexed.len())
    }

    /// Walks the tree respecting the fixed ignore list, calls `index_file`
    /// on every discovered file, then prunes catalog/vector-store state for
    /// any previously-tracked file no longer present on disk.
    #[instrument(skip(self))]
    pub async fn run_scan(&self) -> EngineResult<(u64, u64)> {
        let root = self.ctx.project_root.clone();
        let seen = self.walk_files(&root)?;

        let mut files_scanned = 0u64;
        let mut chunks_indexed = 0u64;
        for relative in &seen {
            match self.index_file(relative).await {
                Ok(n) => {
                    files_scanned += 1;
                    chunks_indexed += n as u64;
                }
                Err(e) => warn!(file_path = %relative, error = %e, "index_file failed during scan"),
            }
        }

        let tracked = self.ctx.catalog.list_file_paths()?;
        let seen_set: std::collections::HashSet<&str> =
            seen.iter().map(|s| s.as_str()).collect();
        for path in tracked {
            if !seen_set.contains(path.as_str()) {
                self.ctx
                    .vector_store
                    .delete_by_file(self.ctx.preset, self.ctx.workspace_id, &path)
                    .await?;
                self.ctx.catalog.delete_file(&path)?;
                debug!(file_path = %path, "pruned vanished file");
            }
        }

        Ok((files_scanned, chunks_indexed))
    }

    /// Parallel (rayon) directory walk producing repo-relative paths,
    /// respecting `.gitignore` plus the fixed ignore/binary-suffix floor.
    fn walk_files(&self, root: &Path) -> EngineResult<Vec<String>> {
        let entries: Vec<_> = WalkBuilder::new(root)
            .hidden(false)
            .git_ignore(true)
            .filter_entry(|entry| {
                if entry.depth() == 0 {
                    return true;
                }
                // Only directory components are checked against the ignore
                // list — a top-level dotfile like `.env` is a file, not a
                // directory, and must stay indexable.
                let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
                if !is_dir {
                    return true;
                }
                entry
                    .file_name()
                    .to_str()
                    .map(|name| !is_ignored_dir(name))
                    .unwrap_or(true)
            })
            .build()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
            .collect();

        let relative_paths: Vec<String> = entries
            .par_iter()
            .filter_map(|entry| {
                let path = entry.path();
                let relative = path.strip_prefix(root).ok()?.to_string_lossy().replace('\\', "/");
                if has_binary_suffix(&relative) {
                    return None;
                }
                Some(relative)
            })
            .collect();

        Ok(relative_paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::types::{Preset, WorkspaceConfig};
    use uuid::Uuid;

    fn test_ctx(root: &Path) -> Arc<EngineContext> {
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
        EngineContext::open(root.to_path_buf(), workspace, &config).unwrap()
    }

    async fn test_ctx_with_backends(
        root: &Path,
        vector_store: &crate::test_support::VectorStoreStub,
        embedder: &crate::test_support::EmbedStub,
    ) -> Arc<EngineContext> {
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
        EngineContext::open(root.to_path_buf(), workspace, &config).unwrap()
    }

    #[test]
    fn ignored_dirs_include_vcs_and_dependency_trees() {
        assert!(is_ignored_dir(".git"));
        assert!(is_ignored_dir("node_modules"));
        assert!(is_ignored_dir(".hidden"));
        assert!(!is_ignored_dir("src"));
    }

    #[test]
    fn binary_suffix_detection_is_case_insensitive() {
        assert!(has_binary_suffix("photo.PNG"));
        assert!(!has_binary_suffix("main.rs"));
    }

    #[test]
    fn walk_files_skips_ignored_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("node_modules")).unwrap();
        std::fs::write(dir.path().join("node_modules/dep.js"), "x").unwrap();
        std::fs::write(dir.path().join("main.py"), "a\nb\nc").unwrap();

        let ctx = test_ctx(dir.path());
        let indexer = Indexer::new(ctx);
        let files = indexer.walk_files(dir.path()).unwrap();
        assert!(files.contains(&"main.py".to_string()));
        assert!(!files.iter().any(|f| f.contains("node_modules")));
    }

    #[test]
    fn walk_files_keeps_top_level_dotfiles() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".env"), "KEY=value").unwrap();
        std::fs::write(dir.path().join(".gitignore"), "target/\n").unwrap();

        let ctx = test_ctx(dir.path());
        let indexer = Indexer::new(ctx);
        let files = indexer.walk_files(dir.path()).unwrap();
        assert!(files.contains(&".env".to_string()));
        assert!(files.contains(&".gitignore".to_string()));
    }

    #[tokio::test]
    async fn index_file_writes_chunks_to_catalog_and_vector_store() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("main.py"),
            "def greet(name):\n    return f\"hello {name}\"\n\n\ndef farewell(name):\n    return f\"bye {name}\"\n",
        )
        .unwrap();

        let vector_store = crate::test_support::VectorStoreStub::spawn().await;
        let embedder = crate::test_support::EmbedStub::spawn(Preset::Lite.dimension()).await;
        let ctx = test_ctx_with_backends(dir.path(), &vector_store, &embedder).await;
        let indexer = Indexer::new(ctx.clone());

        let written = indexer.index_file("main.py").await.unwrap();
        assert!(written > 0);

        let (files_indexed, chunks_indexed) = ctx.catalog.get_stats().unwrap();
        assert_eq!(files_indexed, 1);
        assert_eq!(chunks_indexed as usize, written);
        assert_eq!(
            vector_store.point_count(&Preset::Lite.collection_name()),
            written
        );
    }

    #[tokio::test]
    async fn index_file_fast_skips_unchanged_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.py"), "def f():\n    return 1\n").unwrap();

        let vector_store = crate::test_support::VectorStoreStub::spawn().await;
        let embedder = crate::test_support::EmbedStub::spawn(Preset::Lite.dimension()).await;
        let ctx = test_ctx_with_backends(dir.path(), &vector_store, &embedder).await;
        let indexer = Indexer::new(ctx);

        let first = indexer.index_file("main.py").await.unwrap();
        assert!(first > 0);
        let second = indexer.index_file("main.py").await.unwrap();
        assert_eq!(second, 0);
    }

    #[tokio::test]
    async fn run_scan_prunes_vanished_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "def a():\n    return 1\n").unwrap();
        std::fs::write(dir.path().join("b.py"), "def b():\n    return 2\n").unwrap();

        let vector_store = crate::test_support::VectorStoreStub::spawn().await;
        let embedder = crate::test_support::EmbedStub::spawn(Preset::Lite.dimension()).await;
        let ctx = test_ctx_with_backends(dir.path(), &vector_store, &embedder).await;
        let indexer = Indexer::new(ctx.clone());

        let (files_first, _) = indexer.run_scan().await.unwrap();
        assert_eq!(files_first, 2);

        std::fs::remove_file(dir.path().join("b.py")).unwrap();
        let (files_second, _) = indexer.run_scan().await.unwrap();
        assert_eq!(files_second, 1);

        let tracked = ctx.catalog.list_file_paths().unwrap();
        assert_eq!(tracked, vec!["a.py".to_string()]);
    }
}
