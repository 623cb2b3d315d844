//! Incremental indexing and hybrid retrieval engine for a per-project
//! coding-agent memory server. See the module-level docs on `context` for
//! how the pieces compose.

pub mod catalog;
pub mod chunker;
pub mod config;
pub mod context;
pub mod embed_client;
pub mod error;
pub mod indexer;
pub mod lang;
pub mod retriever;
#[cfg(test)]
pub(crate) mod test_support;
pub mod tool_surface;
pub mod types;
pub mod vector_store;
pub mod watcher;
