//! File→chunks transformation (§4.1): AST-aware for known languages,
//! heading-based for Markdown, overlapping line windows as fallback.

mod ast;
mod text;

use std::path::Path;

use crate::lang::{self, FileKind};
use crate::types::{Chunk, ChunkKind};

pub use text::{DEFAULT_CHUNK_LINES, DEFAULT_OVERLAP_LINES};

/// Splits `(start, end)` (1-indexed, inclusive) into overlapping windows of
/// at most `window` lines with `overlap` lines shared between consecutive
/// windows. A single window covering the whole range is returned when it
/// already fits.
pub(crate) fn sliding_windows(start: u32, end: u32, window: u32, overlap: u32) -> Vec<(u32, u32)> {
    let total = end - start + 1;
    if total <= window {
        return vec![(start, end)];
    }
    let mut out = Vec::new();
    let mut s = start;
    loop {
        let e = (s + window - 1).min(end);
        out.push((s, e));
        if e >= end {
            break;
        }
        s = e - overlap + 1;
    }
    out
}

fn kind_from_file_kind(kind: FileKind) -> ChunkKind {
    match kind {
        FileKind::Doc => ChunkKind::Doc,
        FileKind::Config => ChunkKind::Config,
        FileKind::Code => ChunkKind::Code,
    }
}

/// Dispatch to the appropriate chunking strategy. Returns an empty sequence
/// for empty content; callers handle the undecodable case before calling
/// this (the chunker only ever sees valid UTF-8 text).
pub fn chunk_file(content: &str, path: &str) -> Vec<Chunk> {
    if content.is_empty() {
        return Vec::new();
    }

    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();
    let language = lang::detect_language(&ext);
    let kind = kind_from_file_kind(lang::detect_kind(path));

    if lang::is_ast_supported(language) {
        let chunks = ast::chunk_with_tree_sitter(content, path, language, kind);
        if !chunks.is_empty() {
            return chunks;
        }
    }

    if kind == ChunkKind::Doc && ext == "md" {
        let chunks = text::chunk_markdown(content, path);
        if !chunks.is_empty() {
            return chunks;
        }
    }

    text::chunk_lines(
        content,
        path,
        kind,
        text::DEFAULT_CHUNK_LINES,
        text::DEFAULT_OVERLAP_LINES,
    )
}
