//! Shared handles composed by the indexer, watcher, retriever and tool
//! surface. Bundles the workspace identity plus the catalog and backend
//! clients so each component takes one `Arc<EngineContext>` instead of a
//! growing argument list.

use std::path::PathBuf;
use std::sync::Arc;

use uuid::Uuid;

use crate::catalog::Catalog;
use crate::config::EngineConfig;
use crate::embed_client::{EmbedClient, RerankClient};
use crate::error::EngineResult;
use crate::types::{Preset, WorkspaceConfig};
use crate::vector_store::VectorStoreClient;

pub struct EngineContext {
    pub project_root: PathBuf,
    pub workspace_id: Uuid,
    pub repo_id: String,
    pub preset: Preset,
    pub catalog: Catalog,
    pub vector_store: VectorStoreClient,
    pub embedder: EmbedClient,
    pub reranker: RerankClient,
}

impl EngineContext {
    /// Wires up the catalog and backend clients from a loaded workspace
    /// config and the process-wide backend configuration. Does not perform
    /// any I/O against the backends themselves (`ensure_collection` and
    /// health probes are the caller's responsibility to invoke explicitly).
    pub fn open(
        project_root: PathBuf,
        workspace: WorkspaceConfig,
        config: &EngineConfig,
    ) -> EngineResult<Arc<Self>> {
        let manifest_path = crate::config::manifest_path(&project_root);
        let catalog = Catalog::open(&manifest_path)?;
        Ok(Arc::new(Self {
            project_root,
            workspace_id: workspace.workspace_id,
            repo_id: workspace.repo_id,
            preset: workspace.preset,
            catalog,
            vector_store: VectorStoreClient::new(config.qdrant_url.clone()),
            embedder: EmbedClient::new(config.tei_url.clone()),
            reranker: RerankClient::new(config.reranker_url.clone()),
        }))
    }

    pub fn absolute(&self, relative_path: &str) -> PathBuf {
        self.project_root.join(relative_path)
    }
}
