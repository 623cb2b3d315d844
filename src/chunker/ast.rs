//! AST-aware semantic chunking via `tree-sitter`.
//!
//! One chunk per top-level semantic node (functions, classes, impls, enums,
//! traits, structs, methods — enumerated per language below), preceded by a
//! header chunk covering contiguous import-like nodes and their attached
//! leading comments. Falls through to an empty result (triggering the
//! caller's Markdown/line-window fallback) whenever the language has no
//! grammar wired up or no semantic nodes were found.

use tree_sitter::{Language as TsLanguage, Node, Parser};

use super::sliding_windows;
use crate::types::{Chunk, ChunkKind};

const MAX_CHUNK_LINES: u32 = 250;
const SPLIT_WINDOW_LINES: u32 = 200;
const SPLIT_OVERLAP_LINES: u32 = 30;

/// Nodes considered "header" material at the root: imports/uses and the
/// doc-comments immediately attached to them. A header chunk is only
/// emitted if at least one such node is found at the front of the file.
fn header_node_kinds(language: &str) -> &'static [&'static str] {
    match language {
        "rust" => &["use_declaration", "extern_crate_declaration", "mod_item"],
        "python" => &["import_statement", "import_from_statement"],
        "javascript" | "typescript" | "tsx" => &["import_statement"],
        "go" => &["import_declaration"],
        _ => &[],
    }
}

/// Top-level node kinds that become one chunk each.
fn semantic_node_kinds(language: &str) -> &'static [&'static str] {
    match language {
        "rust" => &[
            "function_item",
            "impl_item",
            "struct_item",
            "enum_item",
            "trait_item",
        ],
        "python" => &[
            "function_definition",
            "class_definition",
            "decorated_definition",
        ],
        "javascript" => &[
            "function_declaration",
            "class_declaration",
            "arrow_function",
            "method_definition",
        ],
        "typescript" | "tsx" => &[
            "function_declaration",
            "class_declaration",
            "arrow_function",
            "method_definition",
        ],
        "go" => &[
            "function_declaration",
            "method_declaration",
            "type_declaration",
        ],
        _ => &[],
    }
}

fn ts_language(language: &str) -> Option<TsLanguage> {
    match language {
        "rust" => Some(tree_sitter_rust::language()),
        "python" => Some(tree_sitter_python::language()),
        "javascript" => Some(tree_sitter_javascript::language()),
        "typescript" => Some(tree_sitter_typescript::language_typescript()),
        "tsx" => Some(tree_sitter_typescript::language_tsx()),
        "go" => Some(tree_sitter_go::language()),
        _ => None,
    }
}

fn line_range(node: Node) -> (u32, u32) {
    (
        node.start_position().row as u32 + 1,
        node.end_position().row as u32 + 1,
    )
}

/// First `identifier`-ish child of `node`, used as the chunk's symbol name.
fn extract_symbol_name<'a>(node: Node, source: &'a str) -> Option<&'a str> {
    const NAME_KINDS: &[&str] = &[
        "identifier",
        "type_identifier",
        "field_identifier",
        "property_identifier",
    ];
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if NAME_KINDS.contains(&child.kind()) {
            return child.utf8_text(source.as_bytes()).ok();
        }
    }
    None
}

fn find_header_end(root: Node, language: &str, source: &str) -> u32 {
    let header_kinds = header_node_kinds(language);
    if header_kinds.is_empty() {
        return 0;
    }
    let mut header_end: u32 = 0;
    let mut cursor = root.walk();
    for child in root.children(&mut cursor) {
        if header_kinds.contains(&child.kind()) {
            header_end = line_range(child).1;
        } else if child.kind() == "comment" && header_end > 0 {
            let (start, end) = line_range(child);
            if start <= header_end + 2 {
                header_end = end;
                continue;
            }
            break;
        } else {
            break;
        }
    }
    let _ = source;
    header_end
}

/// Pre-order walk collecting every node whose kind is in `kinds`, in
/// document order — including nested matches (e.g. methods inside a class),
/// intentionally producing overlapping chunks at different symbol
/// granularities.
fn collect_semantic_nodes<'a>(node: Node<'a>, kinds: &[&str], out: &mut Vec<Node<'a>>) {
    if kinds.contains(&node.kind()) {
        out.push(node);
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect_semantic_nodes(child, kinds, out);
    }
}

fn split_large_chunk(
    path: &str,
    language: &str,
    kind: ChunkKind,
    lines: &[&str],
    start_line: u32,
    end_line: u32,
    symbol: Option<&str>,
) -> Vec<Chunk> {
    sliding_windows(start_line, end_line, SPLIT_WINDOW_LINES, SPLIT_OVERLAP_LINES)
        .into_iter()
        .map(|(s, e)| Chunk {
            file_path: path.to_string(),
            start_line: s,
            end_line: e,
            content: lines[(s - 1) as usize..e as usize].join("\n"),
            language: Some(language.to_string()),
            kind,
            symbol: symbol.map(|name| format!("{name}[part]")),
        })
        .collect()
}

pub fn chunk_with_tree_sitter(
    content: &str,
    path: &str,
    language: &str,
    kind: ChunkKind,
) -> Vec<Chunk> {
    let Some(ts_lang) = ts_language(language) else {
        return Vec::new();
    };
    let mut parser = Parser::new();
    if parser.set_language(ts_lang).is_err() {
        return Vec::new();
    }
    let Some(tree) = parser.parse(content, None) else {
        return Vec::new();
    };

    let lines: Vec<&str> = content.lines().collect();
    let root = tree.root_node();
    let semantic_kinds = semantic_node_kinds(language);
    if semantic_kinds.is_empty() {
        return Vec::new();
    }

    let mut semantic_nodes = Vec::new();
    collect_semantic_nodes(root, semantic_kinds, &mut semantic_nodes);
    if semantic_nodes.is_empty() {
        return Vec::new();
    }

    let mut chunks = Vec::new();

    let header_end = find_header_end(root, language, content);
    if header_end > 0 {
        chunks.push(Chunk {
            file_path: path.to_string(),
            start_line: 1,
            end_line: header_end,
            content: lines[0..header_end as usize].join("\n"),
            language: Some(language.to_string()),
            kind,
            symbol: Some("(header)".to_string()),
        });
    }

    for node in semantic_nodes {
        let (start_line, end_line) = line_range(node);
        let symbol = extract_symbol_name(node, content);
        if end_line - start_line + 1 > MAX_CHUNK_LINES {
            chunks.extend(split_large_chunk(
                path, language, kind, &lines, start_line, end_line, symbol,
            ));
        } else {
            chunks.push(Chunk {
                file_path: path.to_string(),
                start_line,
                end_line,
                content: lines[(start_line - 1) as usize..end_line as usize].join("\n"),
                language: Some(language.to_string()),
                kind,
                symbol: symbol.map(|s| s.to_string()),
            });
        }
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunks_rust_functions_with_header() {
        let src = "use std::fmt;\n\nfn hello() -> &'static str {\n    \"hi\"\n}\n\nstruct Foo;\n";
        let chunks = chunk_with_tree_sitter(src, "lib.rs", "rust", ChunkKind::Code);
        assert!(chunks.iter().any(|c| c.symbol.as_deref() == Some("(header)")));
        assert!(chunks.iter().any(|c| c.symbol.as_deref() == Some("hello")));
        assert!(chunks.iter().any(|c| c.symbol.as_deref() == Some("Foo")));
    }

    #[test]
    fn unsupported_language_yields_nothing() {
        assert!(chunk_with_tree_sitter("x = 1", "x.rb", "ruby", ChunkKind::Code).is_empty());
    }

    #[test]
    fn python_nested_methods_produce_overlapping_chunks() {
        let src = "class Greeter:\n    def hello(self):\n        return 'hi'\n";
        let chunks = chunk_with_tree_sitter(src, "greeter.py", "python", ChunkKind::Code);
        assert!(chunks.iter().any(|c| c.symbol.as_deref() == Some("Greeter")));
        assert!(chunks.iter().any(|c| c.symbol.as_deref() == Some("hello")));
    }
}
