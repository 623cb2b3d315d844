use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::types::{Preset, WorkspaceConfig};

/// Maximum allowed length for search queries (characters).
pub const MAX_SEARCH_QUERY_LENGTH: usize = 1000;

pub const DEFAULT_QDRANT_URL: &str = "http://127.0.0.1:6333";
pub const DEFAULT_TEI_URL: &str = "http://127.0.0.1:8080";
pub const DEFAULT_RERANKER_URL: &str = "http://127.0.0.1:8083";

/// Backend URLs and operational knobs the engine needs, read from the
/// environment the way the reference backend's `AppConfig::from_env` reads
/// its own knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub qdrant_url: String,
    pub tei_url: String,
    pub reranker_url: Option<String>,
    pub preset: Preset,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let preset: Preset = std::env::var("PROBE_PRESET")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(Preset::Lite);

        let reranker_url = std::env::var("RERANKER_URL").ok().or_else(|| {
            preset
                .default_reranker_expected()
                .then(|| DEFAULT_RERANKER_URL.to_string())
        });

        Self {
            qdrant_url: std::env::var("QDRANT_URL").unwrap_or_else(|_| DEFAULT_QDRANT_URL.to_string()),
            tei_url: std::env::var("TEI_EMBED_URL").unwrap_or_else(|_| DEFAULT_TEI_URL.to_string()),
            reranker_url,
            preset,
        }
    }
}

/// `{project_root}/.probe`
pub fn probe_dir(project_root: &Path) -> PathBuf {
    project_root.join(".probe")
}

fn config_path(project_root: &Path) -> PathBuf {
    probe_dir(project_root).join("config.json")
}

pub fn manifest_path(project_root: &Path) -> PathBuf {
    probe_dir(project_root).join("manifest.sqlite")
}

const GIT_REMOTE_TIMEOUT: Duration = Duration::from_secs(5);
const GIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// `git config --get remote.origin.url` in `project_root`, with a 5s timeout;
/// falls back to the project directory's base name on any failure (not a
/// git repo, no remote, git missing, timeout).
pub fn get_repo_id(project_root: &Path) -> String {
    let fallback = || {
        project_root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "unknown".to_string())
    };

    match run_git_remote_with_timeout(project_root) {
        Some(url) if !url.is_empty() => url,
        _ => fallback(),
    }
}

/// Spawns `git config --get remote.origin.url` and polls for completion
/// instead of blocking on `output()`, killing the child if it outruns
/// `GIT_REMOTE_TIMEOUT` — a wedged or hung git process (e.g. a broken
/// credential helper) must not stall workspace initialization.
fn run_git_remote_with_timeout(project_root: &Path) -> Option<String> {
    let mut child = std::process::Command::new("git")
        .args(["config", "--get", "remote.origin.url"])
        .current_dir(project_root)
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::null())
        .spawn()
        .ok()?;

    let deadline = std::time::Instant::now() + GIT_REMOTE_TIMEOUT;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                if !status.success() {
                    return None;
                }
                let mut stdout = child.stdout.take()?;
                use std::io::Read;
                let mut buf = String::new();
                stdout.read_to_string(&mut buf).ok()?;
                return Some(buf.trim().to_string());
            }
            Ok(None) => {
                if std::time::Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    return None;
                }
                std::thread::sleep(GIT_POLL_INTERVAL);
            }
            Err(_) => return None,
        }
    }
}

/// Creates `{project_root}/.probe/config.json` with a freshly generated
/// workspace id. Fails (rather than overwriting) if one already exists — the
/// external initialize step owns workspace creation; the core treats the
/// result as immutable once loaded.
pub fn init_workspace(project_root: &Path, preset: Preset) -> EngineResult<WorkspaceConfig> {
    let path = config_path(project_root);
    if path.exists() {
        return Err(EngineError::Config(format!(
            "workspace already initialized at {}",
            path.display()
        )));
    }

    let config = WorkspaceConfig {
        workspace_id: Uuid::new_v4(),
        repo_id: get_repo_id(project_root),
        preset,
        created_at: chrono::Utc::now(),
    };
    save_workspace_config(project_root, &config)?;
    Ok(config)
}

pub fn load_workspace_config(project_root: &Path) -> EngineResult<WorkspaceConfig> {
    let path = config_path(project_root);
    let bytes = std::fs::read(&path).map_err(|e| {
        EngineError::Config(format!("no workspace config at {}: {e}", path.display()))
    })?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Atomic tmp-then-rename write, matching the reference backend's
/// `workspaces.json` sidecar persistence pattern.
pub fn save_workspace_config(project_root: &Path, config: &WorkspaceConfig) -> EngineResult<()> {
    let dir = probe_dir(project_root);
    std::fs::create_dir_all(&dir)?;
    let path = dir.join("config.json");
    let tmp_path = dir.join("config.json.tmp");
    std::fs::write(&tmp_path, serde_json::to_vec_pretty(config)?)?;
    std::fs::rename(&tmp_path, &path)?;
    Ok(())
}

/// Timeouts fixed by the protocol contract (§5/§6), kept as named constants
/// rather than env-overridable knobs since the spec treats them as part of
/// the external interface, not operator tuning.
pub mod timeouts {
    use super::Duration;

    pub const EMBED_BATCH: Duration = Duration::from_secs(30);
    pub const EMBED_QUERY: Duration = Duration::from_secs(10);
    pub const RERANK: Duration = Duration::from_secs(5);
    pub const HEALTH_PROBE: Duration = Duration::from_secs(2);
    pub const FILE_STABILITY: Duration = Duration::from_millis(300);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workspace_config_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let created = init_workspace(dir.path(), Preset::Lite).unwrap();
        let loaded = load_workspace_config(dir.path()).unwrap();
        assert_eq!(created.workspace_id, loaded.workspace_id);
        assert_eq!(loaded.preset, Preset::Lite);
    }

    #[test]
    fn reinitializing_fails() {
        let dir = tempfile::tempdir().unwrap();
        init_workspace(dir.path(), Preset::Lite).unwrap();
        assert!(init_workspace(dir.path(), Preset::Lite).is_err());
    }
}
