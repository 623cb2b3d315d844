//! Semantic types shared across the chunker, catalog, vector-store client,
//! indexer and retriever, plus the deterministic id-derivation functions.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Fixed UUIDv5 namespace point ids are derived under. Kept bit-for-bit
/// identical to the reference deployment's namespace so ids are reproducible
/// against any existing vector-store collection.
pub const POINT_ID_NAMESPACE: Uuid = Uuid::from_bytes([
    0x6b, 0xa7, 0xb8, 0x10, 0x9d, 0xad, 0x11, 0xd1, 0x80, 0xb4, 0x00, 0xc0, 0x4f, 0xd4, 0x30, 0xc8,
]);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    Code,
    Doc,
    Config,
}

impl Default for ChunkKind {
    fn default() -> Self {
        ChunkKind::Code
    }
}

/// A contiguous, line-aligned slice of a source file produced by the chunker.
/// Transient — never persisted directly; the catalog stores its positional
/// coordinates plus a content hash (see [`IndexedChunk`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub file_path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub content: String,
    pub language: Option<String>,
    pub kind: ChunkKind,
    pub symbol: Option<String>,
}

/// The catalog's durable record of a chunk: positional coordinates plus the
/// derived identifiers needed to keep the catalog and the vector store in
/// lockstep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedChunk {
    pub file_path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub chunk_hash: String,
    pub point_id: Uuid,
    pub chunk_idx: u32,
    pub language: Option<String>,
    pub kind: ChunkKind,
    pub symbol: Option<String>,
}

/// Catalog row tracking a single file's last-seen disk state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub file_path: String,
    pub mtime: f64,
    pub size: u64,
    pub file_hash: String,
    pub last_indexed_at: f64,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    Lite,
    Balanced,
    Pro,
}

impl Preset {
    pub fn dimension(self) -> usize {
        match self {
            Preset::Lite => 1024,
            Preset::Balanced => 2560,
            Preset::Pro => 4096,
        }
    }

    /// Advisory embedding-model tag; the engine never loads this model itself,
    /// it is a label the external embedding service is expected to honor.
    pub fn model_tag(self) -> &'static str {
        match self {
            Preset::Lite => "Qwen/Qwen3-Embedding-0.6B",
            Preset::Balanced => "Qwen/Qwen3-Embedding-4B",
            Preset::Pro => "Qwen/Qwen3-Embedding-8B",
        }
    }

    pub fn collection_name(self) -> String {
        format!("chunks_{}", self.as_str())
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Preset::Lite => "lite",
            Preset::Balanced => "balanced",
            Preset::Pro => "pro",
        }
    }

    pub fn default_reranker_expected(self) -> bool {
        matches!(self, Preset::Balanced | Preset::Pro)
    }
}

impl std::str::FromStr for Preset {
    type Err = crate::error::EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lite" => Ok(Preset::Lite),
            "balanced" => Ok(Preset::Balanced),
            "pro" => Ok(Preset::Pro),
            other => Err(crate::error::EngineError::Config(format!(
                "unknown preset: {other}"
            ))),
        }
    }
}

/// `{project_root}/.probe/config.json` — created once by an external
/// initialize step and treated as immutable by the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    pub workspace_id: Uuid,
    pub repo_id: String,
    pub preset: Preset,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchFilters {
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub chunk_kinds: Vec<ChunkKind>,
    #[serde(default)]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Fast,
    Quality,
    Auto,
}

impl Default for SearchMode {
    fn default() -> Self {
        SearchMode::Auto
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub repo_id: String,
    pub workspace_id: Uuid,
    pub path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub snippet: String,
    pub score: f32,
    pub stale: bool,
    pub source: String,
    #[serde(default)]
    pub signals: serde_json::Map<String, serde_json::Value>,
}

/// UUIDv5 point id over `"{workspace_id}:{file_path}:{start_line}:{end_line}"`.
/// Position-keyed, not content-keyed: re-edits overwrite the same point.
pub fn compute_point_id(
    workspace_id: Uuid,
    file_path: &str,
    start_line: u32,
    end_line: u32,
) -> Uuid {
    let name = format!("{workspace_id}:{file_path}:{start_line}:{end_line}");
    Uuid::new_v5(&POINT_ID_NAMESPACE, name.as_bytes())
}

/// First 16 hex characters of the SHA-256 digest of `content`.
pub fn compute_chunk_hash(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    format!("{digest:x}")[..16].to_string()
}

/// Full SHA-256 hex digest of `bytes`.
pub fn compute_file_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}
