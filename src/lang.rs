//! Language and content-kind detection.
//!
//! `detect_language` is the teacher's consolidated extension→language table
//! (it covered four duplicate implementations in the original backend), kept
//! for payload tagging and symbol-regex selection. `detect_kind` and
//! `is_ast_supported` narrow that broad table to the decisions the chunker
//! actually needs to make.

use std::path::Path;

/// Detect programming language from file extension. Returns a static string
/// identifier for the language, used for payload tagging regardless of
/// whether an AST grammar backs it.
pub fn detect_language(ext: &str) -> &'static str {
    match ext.to_lowercase().as_str() {
        "ts" => "typescript",
        "tsx" => "tsx",
        "js" | "jsx" | "mjs" | "cjs" => "javascript",
        "rs" => "rust",
        "py" | "pyi" | "pyw" => "python",
        "go" => "go",
        "java" => "java",
        "c" | "h" => "c",
        "cpp" | "hpp" | "cc" | "cxx" | "hxx" => "cpp",
        "cs" => "csharp",
        "rb" | "rake" => "ruby",
        "php" => "php",
        "swift" => "swift",
        "kt" | "kts" => "kotlin",
        "scala" | "sc" => "scala",
        "html" | "htm" => "html",
        "css" => "css",
        "scss" | "sass" | "less" => "scss",
        "json" | "jsonc" => "json",
        "yaml" | "yml" => "yaml",
        "toml" => "toml",
        "xml" | "xsl" | "xslt" => "xml",
        "md" | "mdx" => "markdown",
        "rst" => "rst",
        "sql" => "sql",
        "graphql" | "gql" => "graphql",
        "sh" | "bash" | "zsh" | "fish" => "shell",
        "ps1" | "psm1" | "psd1" => "powershell",
        "bat" | "cmd" => "batch",
        "vue" => "vue",
        "svelte" => "svelte",
        "astro" => "astro",
        "lua" => "lua",
        "zig" => "zig",
        "nim" => "nim",
        "dart" => "dart",
        "ex" | "exs" => "elixir",
        "erl" | "hrl" => "erlang",
        "r" => "r",
        "jl" => "julia",
        "clj" | "cljs" | "cljc" => "clojure",
        "tf" | "hcl" => "hcl",
        "proto" => "protobuf",
        "ini" | "cfg" | "conf" => "ini",
        "env" => "dotenv",
        "txt" => "plaintext",
        _ => "plaintext",
    }
}

/// File suffixes treated as documentation for chunk-kind purposes.
const DOC_SUFFIXES: &[&str] = &["md", "mdx", "rst", "txt", "adoc"];

/// File suffixes treated as configuration for chunk-kind purposes.
const CONFIG_SUFFIXES: &[&str] = &["json", "yaml", "yml", "toml", "ini", "cfg", "conf"];

const CONFIG_FILENAMES: &[&str] = &["dockerfile", "makefile"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Doc,
    Config,
    Code,
}

/// Kind detection by suffix and well-known filenames: documentation, then
/// configuration (including dotfiles and `Dockerfile`/`Makefile`), else code.
pub fn detect_kind(path: &str) -> FileKind {
    let p = Path::new(path);
    let filename = p
        .file_name()
        .and_then(|f| f.to_str())
        .unwrap_or_default()
        .to_lowercase();
    let suffix = p
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_lowercase();

    if DOC_SUFFIXES.contains(&suffix.as_str()) {
        return FileKind::Doc;
    }
    if CONFIG_SUFFIXES.contains(&suffix.as_str()) || CONFIG_FILENAMES.contains(&filename.as_str())
    {
        return FileKind::Config;
    }
    if filename.starts_with('.') {
        return FileKind::Config;
    }
    FileKind::Code
}

/// Languages with a wired tree-sitter grammar and a `SEMANTIC_NODES` table in
/// `chunker::ast`. A language absent from this set always falls through to
/// the Markdown/line-window strategies, even if `detect_language` gives it a
/// display tag.
pub fn is_ast_supported(language: &str) -> bool {
    matches!(
        language,
        "rust" | "python" | "javascript" | "typescript" | "tsx" | "go"
    )
}
