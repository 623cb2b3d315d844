//! Markdown heading chunking and the overlapping line-window fallback.

use regex::Regex;
use std::sync::LazyLock;

use super::sliding_windows;
use crate::types::{Chunk, ChunkKind};

pub const DEFAULT_CHUNK_LINES: u32 = 150;
pub const DEFAULT_OVERLAP_LINES: u32 = 30;

static ATX_HEADING: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(#{1,6})\s+(.+)$").unwrap());

fn slice(lines: &[&str], start_line: u32, end_line: u32) -> String {
    lines[(start_line - 1) as usize..end_line as usize].join("\n")
}

fn is_blank_range(lines: &[&str], start_line: u32, end_line: u32) -> bool {
    lines[(start_line - 1) as usize..end_line as usize]
        .iter()
        .all(|l| l.trim().is_empty())
}

/// Chunks Markdown by ATX heading: each section from one heading (inclusive)
/// to the next heading (exclusive) becomes one chunk; the prelude (if any)
/// is a chunk named `"(intro)"`. Empty sections drop. Returns a single
/// whole-file chunk with no symbol if no headings were found at all.
pub fn chunk_markdown(content: &str, path: &str) -> Vec<Chunk> {
    let lines: Vec<&str> = content.lines().collect();
    if lines.is_empty() {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    let mut current_start: u32 = 1;
    let mut current_heading: Option<String> = None;

    for (idx, line) in lines.iter().enumerate() {
        let line_no = (idx + 1) as u32;
        if let Some(caps) = ATX_HEADING.captures(line) {
            let section_end = line_no - 1;
            if section_end >= current_start && !is_blank_range(&lines, current_start, section_end)
            {
                chunks.push(Chunk {
                    file_path: path.to_string(),
                    start_line: current_start,
                    end_line: section_end,
                    content: slice(&lines, current_start, section_end),
                    language: None,
                    kind: ChunkKind::Doc,
                    symbol: Some(
                        current_heading
                            .clone()
                            .unwrap_or_else(|| "(intro)".to_string()),
                    ),
                });
            }
            current_start = line_no;
            current_heading = Some(caps.get(2).unwrap().as_str().trim().to_string());
        }
    }

    let last_line = lines.len() as u32;
    if last_line >= current_start && !is_blank_range(&lines, current_start, last_line) {
        chunks.push(Chunk {
            file_path: path.to_string(),
            start_line: current_start,
            end_line: last_line,
            content: slice(&lines, current_start, last_line),
            language: None,
            kind: ChunkKind::Doc,
            symbol: Some(
                current_heading
                    .clone()
                    .unwrap_or_else(|| "(intro)".to_string()),
            ),
        });
    }

    if chunks.is_empty() && !content.trim().is_empty() {
        chunks.push(Chunk {
            file_path: path.to_string(),
            start_line: 1,
            end_line: last_line,
            content: content.to_string(),
            language: None,
            kind: ChunkKind::Doc,
            symbol: None,
        });
    }

    chunks
}

/// Overlapping line windows of `chunk_size` lines with `overlap` lines of
/// overlap; files of `<= chunk_size` lines become one chunk. This is the
/// terminal fallback strategy — never tagged with a language, since it
/// carries no semantic information about the content.
pub fn chunk_lines(content: &str, path: &str, kind: ChunkKind, chunk_size: u32, overlap: u32) -> Vec<Chunk> {
    let lines: Vec<&str> = content.lines().collect();
    if lines.is_empty() {
        return Vec::new();
    }
    let total = lines.len() as u32;

    sliding_windows(1, total, chunk_size, overlap)
        .into_iter()
        .map(|(start, end)| Chunk {
            file_path: path.to_string(),
            start_line: start,
            end_line: end,
            content: slice(&lines, start, end),
            language: None,
            kind,
            symbol: None,
        })
        .collect()
}
