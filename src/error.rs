use serde_json::json;
use thiserror::Error;

/// Errors surfaced by the indexing/retrieval engine.
///
/// These never carry transport semantics (no HTTP status codes) since the tool
/// surface is transport-agnostic; `as_payload` renders the same JSON shape the
/// agent-facing framing layer is expected to emit.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("workspace not found: {0}")]
    WorkspaceNotFound(String),

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("path not allowed: {0}")]
    PathNotAllowed(String),

    #[error("file is not valid UTF-8: {0}")]
    NotUtf8(String),

    #[error("{service} backend error: {message}")]
    Backend { service: &'static str, message: String },

    #[error("catalog error: {0}")]
    Catalog(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl EngineError {
    /// JSON error payload shape shared with the reference backend's HTTP error
    /// responses, minus the actual status code (the tool surface has no transport).
    pub fn as_payload(&self) -> serde_json::Value {
        let status = match self {
            EngineError::WorkspaceNotFound(_) | EngineError::FileNotFound(_) => 404,
            EngineError::PathNotAllowed(_) => 403,
            EngineError::NotUtf8(_) | EngineError::BadRequest(_) => 400,
            EngineError::Backend { .. } | EngineError::Catalog(_) | EngineError::Io(_) => 502,
            EngineError::Serde(_) => 400,
            EngineError::Config(_) => 500,
            EngineError::Internal(_) => 500,
        };
        json!({ "error": self.to_string(), "status": status })
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
